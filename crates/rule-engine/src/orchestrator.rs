//! 评估编排
//!
//! 同步路径：解析规则 → 逐条评估 → 汇总通过/未通过列表。
//! 异步路径：先同步解析一次（规则缺失时立即失败，不创建任务），再入队；
//! 工作端会按名称重新解析，提交与执行之间的规则变更以执行时为准。

use crate::error::{Result, RuleError};
use crate::evaluator::ConditionEvaluator;
use crate::models::{EvaluationContext, EvaluationResult, Payload, ResolvedRule};
use crate::resolver::RuleResolver;
use crate::task::{EvaluationJob, JobHandler, TaskOutcome, TaskStatusView, TaskSubstrate};
use eligibility_shared::observability::metrics;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// 评估一组已解析的规则
///
/// 每条规则独立评估，按输入顺序写入 `passed_rules` 或 `failed_rules`，
/// 规则之间没有短路。
pub fn evaluate_rules(resolved: &[ResolvedRule], payload: &Payload) -> EvaluationResult {
    let context = EvaluationContext::new(payload);
    let mut result = EvaluationResult::default();

    for rule in resolved {
        if ConditionEvaluator::evaluate_node(&rule.condition, &context) {
            debug!(rule_name = %rule.name, "规则通过");
            result.passed_rules.push(rule.name.clone());
        } else {
            debug!(rule_name = %rule.name, "规则未通过");
            result.failed_rules.push(rule.name.clone());
        }
    }

    result
}

/// 异步任务函数：重新解析并评估
///
/// 所有错误都被转换为 `status=error` 的返回值，不会向任务执行层抛出。
#[instrument(skip(resolver, rule_names, payload), fields(rule_count = rule_names.len()))]
pub async fn evaluate_rules_async(
    resolver: &RuleResolver,
    rule_names: &[String],
    payload: &Payload,
) -> TaskOutcome {
    let start = Instant::now();

    match resolver.resolve(rule_names).await {
        Ok(resolved) => {
            let result = evaluate_rules(&resolved, payload);
            metrics::record_rule_evaluation(
                "async",
                result.verdict().as_str(),
                result.len(),
                start.elapsed().as_secs_f64(),
            );
            info!(verdict = %result.verdict(), "异步评估完成");
            TaskOutcome::success(result)
        }
        Err(e @ RuleError::RuleNotFound { .. }) => {
            warn!(error = %e, "异步评估时规则不可用");
            TaskOutcome::error(e.to_string())
        }
        Err(e) => {
            error!(error = %e, "异步评估出现意外错误");
            TaskOutcome::error(format!("An unexpected error occurred: {}", e))
        }
    }
}

/// 构建供任务执行层调用的任务函数
pub fn job_handler(resolver: RuleResolver) -> JobHandler {
    Arc::new(move |job: EvaluationJob| {
        let resolver = resolver.clone();
        async move { evaluate_rules_async(&resolver, &job.rule_names, &job.payload).await }.boxed()
    })
}

/// 规则评估服务
#[derive(Clone)]
pub struct RuleEvaluationService {
    resolver: RuleResolver,
    substrate: Arc<dyn TaskSubstrate>,
}

impl RuleEvaluationService {
    pub fn new(resolver: RuleResolver, substrate: Arc<dyn TaskSubstrate>) -> Self {
        Self {
            resolver,
            substrate,
        }
    }

    pub fn resolver(&self) -> &RuleResolver {
        &self.resolver
    }

    /// 同步评估
    #[instrument(skip(self, rule_names, payload), fields(rule_count = rule_names.len()))]
    pub async fn submit(&self, rule_names: &[String], payload: &Payload) -> Result<EvaluationResult> {
        let start = Instant::now();

        let resolved = self.resolver.resolve(rule_names).await?;
        let result = evaluate_rules(&resolved, payload);

        metrics::record_rule_evaluation(
            "sync",
            result.verdict().as_str(),
            result.len(),
            start.elapsed().as_secs_f64(),
        );
        info!(
            verdict = %result.verdict(),
            passed = result.passed_rules.len(),
            failed = result.failed_rules.len(),
            "同步评估完成"
        );
        Ok(result)
    }

    /// 提交异步评估，返回任务 ID
    ///
    /// 规则缺失时返回 `RuleNotFound`，不会创建任务。
    #[instrument(skip(self, rule_names, payload), fields(rule_count = rule_names.len()))]
    pub async fn submit_async(&self, rule_names: Vec<String>, payload: Payload) -> Result<String> {
        self.resolver.resolve(&rule_names).await?;

        self.substrate
            .enqueue(EvaluationJob {
                rule_names,
                payload,
            })
            .await
    }

    /// 查询异步评估结果
    #[instrument(skip(self))]
    pub async fn poll(&self, task_id: &str) -> Result<TaskStatusView> {
        let (state, outcome) = self.substrate.snapshot(task_id).await?;
        Ok(TaskStatusView::from_parts(task_id, state, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Condition, NewRule, Rule, Verdict};
    use crate::operators::Operator;
    use crate::store::{InMemoryRuleStore, MockRuleStore, RuleStore};
    use crate::task::{InProcessTaskSubstrate, OutcomeStatus};
    use serde_json::json;
    use std::time::Duration;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn seeded_store() -> Arc<InMemoryRuleStore> {
        let store = Arc::new(InMemoryRuleStore::new());
        store
            .create(NewRule::new(
                "ThailandOrPremium",
                Condition::or(vec![
                    Condition::leaf("country", Operator::Eq, "Thailand"),
                    Condition::leaf("tags", Operator::Contains, "premium"),
                ]),
            ))
            .await
            .unwrap();
        store
            .create(NewRule::new(
                "Adult",
                Condition::leaf("user.age", Operator::Ge, 18),
            ))
            .await
            .unwrap();
        store
    }

    fn service(store: Arc<dyn RuleStore>) -> RuleEvaluationService {
        let resolver = RuleResolver::new(store);
        let substrate = InProcessTaskSubstrate::new(
            job_handler(resolver.clone()),
            2,
            Duration::from_secs(60),
        );
        RuleEvaluationService::new(resolver, Arc::new(substrate))
    }

    async fn poll_until_done(service: &RuleEvaluationService, task_id: &str) -> TaskStatusView {
        for _ in 0..200 {
            let view = service.poll(task_id).await.unwrap();
            if !matches!(view, TaskStatusView::Pending { .. }) {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {} still pending", task_id);
    }

    #[test]
    fn test_evaluate_rules_partitions_in_input_order() {
        let resolved = vec![
            ResolvedRule::new("b", Condition::leaf("x", Operator::Eq, 1)),
            ResolvedRule::new("a", Condition::leaf("x", Operator::Eq, 2)),
            ResolvedRule::new("c", Condition::leaf("x", Operator::Lt, 5)),
        ];
        let result = evaluate_rules(&resolved, &payload(json!({"x": 1})));

        assert_eq!(result.passed_rules, vec!["b", "c"]);
        assert_eq!(result.failed_rules, vec!["a"]);
        assert_eq!(result.verdict(), Verdict::Rejected);
    }

    #[test]
    fn test_evaluate_rules_empty_is_approved() {
        let result = evaluate_rules(&[], &Payload::new());
        assert!(result.is_empty());
        assert_eq!(result.verdict(), Verdict::Approved);
    }

    #[tokio::test]
    async fn test_submit() {
        let service = service(seeded_store().await);
        let result = service
            .submit(
                &names(&["ThailandOrPremium", "Adult"]),
                &payload(json!({"country": "Singapore", "tags": ["premium"], "user": {"age": 17}})),
            )
            .await
            .unwrap();

        assert_eq!(result.passed_rules, vec!["ThailandOrPremium"]);
        assert_eq!(result.failed_rules, vec!["Adult"]);
    }

    #[tokio::test]
    async fn test_submit_missing_rule_evaluates_nothing() {
        let service = service(seeded_store().await);
        let result = service
            .submit(&names(&["Adult", "Nope"]), &Payload::new())
            .await;
        assert!(matches!(result, Err(RuleError::RuleNotFound { names }) if names == vec!["Nope"]));
    }

    #[tokio::test]
    async fn test_submit_async_matches_sync() {
        let service = service(seeded_store().await);
        let rule_names = names(&["Adult", "ThailandOrPremium"]);
        let data = payload(json!({"country": "Thailand", "user": {"age": 30}}));

        let sync_result = service.submit(&rule_names, &data).await.unwrap();
        let task_id = service.submit_async(rule_names, data).await.unwrap();

        match poll_until_done(&service, &task_id).await {
            TaskStatusView::Completed {
                result, verdict, ..
            } => {
                assert_eq!(result, sync_result);
                assert_eq!(verdict, Verdict::Approved);
            }
            other => panic!("unexpected view: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_async_missing_rule_fails_fast() {
        let mut mock = MockRuleStore::new();
        mock.expect_find_active_by_names()
            .times(1)
            .returning(|_| Ok(vec![]));

        let service = service(Arc::new(mock));
        let result = service
            .submit_async(names(&["Ghost"]), Payload::new())
            .await;
        assert!(matches!(result, Err(RuleError::RuleNotFound { .. })));
    }

    #[tokio::test]
    async fn test_rule_deactivated_after_submission_is_rejected() {
        let store = seeded_store().await;
        let resolver = RuleResolver::new(store.clone());

        store
            .update(
                "Adult",
                crate::models::RuleUpdate {
                    condition: None,
                    is_active: Some(false),
                },
            )
            .await
            .unwrap();

        let outcome = evaluate_rules_async(&resolver, &names(&["Adult"]), &Payload::new()).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome.error.unwrap().contains("Adult"));
    }

    #[tokio::test]
    async fn test_worker_wraps_unexpected_errors() {
        let mut mock = MockRuleStore::new();
        mock.expect_find_active_by_names()
            .returning(|_| Err(RuleError::Internal("connection reset".to_string())));

        let resolver = RuleResolver::new(Arc::new(mock));
        let outcome = evaluate_rules_async(&resolver, &names(&["A"]), &Payload::new()).await;

        assert_eq!(outcome.status, OutcomeStatus::Error);
        let message = outcome.error.unwrap();
        assert!(message.starts_with("An unexpected error occurred: "));
        assert!(message.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_poll_unknown_task_is_pending() {
        let service = service(seeded_store().await);
        let view = service.poll("does-not-exist").await.unwrap();
        assert_eq!(
            view,
            TaskStatusView::Pending {
                task_id: "does-not-exist".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_worker_sees_rule_changes() {
        let mut mock = MockRuleStore::new();
        let mut calls = 0;
        mock.expect_find_active_by_names().returning(move |_| {
            calls += 1;
            let condition = if calls == 1 {
                Condition::leaf("x", Operator::Eq, 1)
            } else {
                Condition::leaf("x", Operator::Eq, 2)
            };
            Ok(vec![Rule::from_new(NewRule::new("R", condition))])
        });

        let service = service(Arc::new(mock));
        let task_id = service
            .submit_async(names(&["R"]), payload(json!({"x": 1})))
            .await
            .unwrap();

        match poll_until_done(&service, &task_id).await {
            TaskStatusView::Completed { result, .. } => {
                assert_eq!(result.failed_rules, vec!["R"]);
            }
            other => panic!("unexpected view: {:?}", other),
        }
    }
}
