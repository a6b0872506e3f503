//! 异步评估任务
//!
//! 任务状态机：PENDING → SUCCESS | FAILURE，终态不再迁移，本层不做重试。
//!
//! SUCCESS 表示任务函数正常返回，其返回值 [`TaskOutcome`] 自身仍可能是业务错误
//! （例如提交后规则被停用）；FAILURE 表示任务执行本身失败（如 panic）。两条通道
//! 在轮询时都要以失败呈现给调用方，见 [`TaskStatusView`]。

use crate::error::{Result, RuleError};
use crate::models::{EvaluationResult, Payload, Verdict};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use eligibility_shared::observability::metrics;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};
use uuid::Uuid;

/// 任务状态（任务执行层视角）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    /// 已提交、执行中或未知
    Pending,
    /// 任务函数已返回
    Success,
    /// 任务执行失败
    Failure,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// 任务函数返回状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// 评估任务函数的返回值
///
/// 结构与 `{status: success|error, result?, error?}` 一致。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<EvaluationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn success(result: EvaluationResult) -> Self {
        Self {
            status: OutcomeStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            result: None,
            error: Some(message.into()),
        }
    }
}

/// 待执行的评估任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationJob {
    pub rule_names: Vec<String>,
    pub payload: Payload,
}

/// 任务执行函数：由任务执行层在工作线程中调用
pub type JobHandler = Arc<dyn Fn(EvaluationJob) -> BoxFuture<'static, TaskOutcome> + Send + Sync>;

/// 任务执行层接口
///
/// 只约定入队与轮询，不假设具体的队列技术。
#[async_trait]
pub trait TaskSubstrate: Send + Sync {
    /// 入队任务，立即返回任务 ID
    async fn enqueue(&self, job: EvaluationJob) -> Result<String>;

    /// 查询任务状态，未知任务返回 Pending
    async fn state(&self, task_id: &str) -> Result<TaskState>;

    /// 获取终态任务的结果
    ///
    /// SUCCESS 时为任务函数返回值；FAILURE 时为失败描述（包装为 error 结果）；
    /// 非终态或未知任务返回 None。
    async fn result(&self, task_id: &str) -> Result<Option<TaskOutcome>>;

    /// 一次性读取状态与结果
    ///
    /// 默认实现分两次查询，两次之间结果可能被清理；
    /// 能原子读取的实现应覆盖此方法。
    async fn snapshot(&self, task_id: &str) -> Result<(TaskState, Option<TaskOutcome>)> {
        let state = self.state(task_id).await?;
        let outcome = if state.is_terminal() {
            self.result(task_id).await?
        } else {
            None
        };
        Ok((state, outcome))
    }
}

/// 轮询视图
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatusView {
    /// 任务未完成或未知
    Pending { task_id: String },
    /// 评估完成
    Completed {
        task_id: String,
        result: EvaluationResult,
        verdict: Verdict,
    },
    /// 任务函数返回了业务错误（客户端错误）
    Rejected { task_id: String, detail: String },
    /// 任务执行失败或状态无法识别（服务端错误）
    Failed { task_id: String, detail: String },
}

impl TaskStatusView {
    /// 根据任务状态与结果构建轮询视图
    ///
    /// 终态但没有结果说明记录在两次读取之间被清理，与未知任务一样视为 Pending。
    pub fn from_parts(task_id: &str, state: TaskState, outcome: Option<TaskOutcome>) -> Self {
        let task_id = task_id.to_string();
        match (state, outcome) {
            (TaskState::Pending, _) | (_, None) => Self::Pending { task_id },
            (TaskState::Success, Some(outcome)) => match outcome.status {
                OutcomeStatus::Error => Self::Rejected {
                    task_id,
                    detail: outcome
                        .error
                        .unwrap_or_else(|| "Unknown evaluation error".to_string()),
                },
                OutcomeStatus::Success => match outcome.result {
                    Some(result) => Self::Completed {
                        task_id,
                        verdict: result.verdict(),
                        result,
                    },
                    None => Self::Failed {
                        task_id,
                        detail: "Task succeeded without an evaluation result".to_string(),
                    },
                },
            },
            (state, Some(outcome)) => Self::Failed {
                task_id,
                detail: outcome
                    .error
                    .unwrap_or_else(|| format!("Task failed with status: {}", state.as_str())),
            },
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Self::Pending { task_id }
            | Self::Completed { task_id, .. }
            | Self::Rejected { task_id, .. }
            | Self::Failed { task_id, .. } => task_id,
        }
    }
}

/// 任务记录
#[derive(Debug, Clone)]
struct TaskRecord {
    state: TaskState,
    outcome: Option<TaskOutcome>,
    submitted_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

/// 进程内任务执行层
///
/// 使用 tokio 任务作为工作池，Semaphore 限制并发，DashMap 保存任务结果。
/// 终态结果保留 `result_ttl` 后由 [`reap_expired`](Self::reap_expired) 清理。
#[derive(Clone)]
pub struct InProcessTaskSubstrate {
    tasks: Arc<DashMap<String, TaskRecord>>,
    permits: Arc<Semaphore>,
    handler: JobHandler,
    result_ttl: Duration,
}

impl InProcessTaskSubstrate {
    /// 创建任务执行层
    ///
    /// # Arguments
    /// * `handler` - 任务函数
    /// * `concurrency` - 同时执行的任务上限（至少为 1）
    /// * `result_ttl` - 终态结果保留时长
    pub fn new(handler: JobHandler, concurrency: usize, result_ttl: Duration) -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            handler,
            result_ttl,
        }
    }

    /// 当前保留的任务记录数
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 清理超过保留时长的终态任务，返回清理数量
    pub fn reap_expired(&self) -> usize {
        let ttl = chrono::Duration::from_std(self.result_ttl).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let before = self.tasks.len();

        self.tasks.retain(|_, record| match record.finished_at {
            Some(finished_at) => now.signed_duration_since(finished_at) < ttl,
            None => true,
        });

        let reaped = before.saturating_sub(self.tasks.len());
        if reaped > 0 {
            info!(reaped, "已清理过期任务结果");
            metrics::record_tasks_reaped(reaped);
        }
        metrics::set_retained_tasks(self.tasks.len());
        reaped
    }

    /// 启动后台清理循环
    pub fn spawn_reaper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let substrate = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            loop {
                ticker.tick().await;
                substrate.reap_expired();
            }
        })
    }

    /// 写入终态，已是终态的任务不再迁移
    fn finish(tasks: &DashMap<String, TaskRecord>, task_id: &str, state: TaskState, outcome: TaskOutcome) {
        if let Some(mut record) = tasks.get_mut(task_id) {
            if record.state.is_terminal() {
                warn!(task_id, "任务已处于终态，忽略重复完成");
                return;
            }
            let now = Utc::now();
            debug!(
                task_id,
                state = state.as_str(),
                elapsed_ms = now.signed_duration_since(record.submitted_at).num_milliseconds(),
                "任务进入终态"
            );
            record.state = state;
            record.outcome = Some(outcome);
            record.finished_at = Some(now);
        }
    }
}

#[async_trait]
impl TaskSubstrate for InProcessTaskSubstrate {
    #[instrument(skip(self, job), fields(rule_count = job.rule_names.len()))]
    async fn enqueue(&self, job: EvaluationJob) -> Result<String> {
        let task_id = Uuid::new_v4().to_string();

        self.tasks.insert(
            task_id.clone(),
            TaskRecord {
                state: TaskState::Pending,
                outcome: None,
                submitted_at: Utc::now(),
                finished_at: None,
            },
        );

        let tasks = Arc::clone(&self.tasks);
        let permits = Arc::clone(&self.permits);
        let handler = Arc::clone(&self.handler);
        let id = task_id.clone();
        let span = info_span!("evaluation_task", task_id = %task_id);

        tokio::spawn(
            async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!(error = %e, "任务执行层已关闭");
                        Self::finish(
                            &tasks,
                            &id,
                            TaskState::Failure,
                            TaskOutcome::error(RuleError::TaskFailure(e.to_string()).to_string()),
                        );
                        metrics::record_task_event("failure");
                        return;
                    }
                };

                // 在独立任务中执行，panic 会体现为 JoinError 而不是拖垮工作循环
                let job_future = (handler)(job);
                match tokio::spawn(job_future).await {
                    Ok(outcome) => {
                        info!(status = ?outcome.status, "评估任务完成");
                        Self::finish(&tasks, &id, TaskState::Success, outcome);
                        metrics::record_task_event("success");
                    }
                    Err(e) => {
                        error!(error = %e, "评估任务执行失败");
                        Self::finish(
                            &tasks,
                            &id,
                            TaskState::Failure,
                            TaskOutcome::error(RuleError::TaskFailure(e.to_string()).to_string()),
                        );
                        metrics::record_task_event("failure");
                    }
                }
            }
            .instrument(span),
        );

        metrics::record_task_event("enqueued");
        metrics::set_retained_tasks(self.tasks.len());
        info!(task_id = %task_id, "评估任务已入队");
        Ok(task_id)
    }

    async fn state(&self, task_id: &str) -> Result<TaskState> {
        Ok(self
            .tasks
            .get(task_id)
            .map(|record| record.state)
            .unwrap_or(TaskState::Pending))
    }

    async fn result(&self, task_id: &str) -> Result<Option<TaskOutcome>> {
        Ok(self
            .tasks
            .get(task_id)
            .filter(|record| record.state.is_terminal())
            .and_then(|record| record.outcome.clone()))
    }

    async fn snapshot(&self, task_id: &str) -> Result<(TaskState, Option<TaskOutcome>)> {
        Ok(self
            .tasks
            .get(task_id)
            .map(|record| (record.state, record.outcome.clone()))
            .unwrap_or((TaskState::Pending, None)))
    }
}

impl std::fmt::Debug for InProcessTaskSubstrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessTaskSubstrate")
            .field("tasks", &self.tasks.len())
            .field("available_permits", &self.permits.available_permits())
            .field("result_ttl", &self.result_ttl)
            .finish()
    }
}
