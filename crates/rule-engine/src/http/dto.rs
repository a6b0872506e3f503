//! 请求/响应 DTO

use crate::error::RuleError;
use crate::models::{Condition, EvaluationResult, NewRule, Payload, Rule, RuleUpdate, Verdict};
use crate::task::TaskStatusView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;
use validator::Validate;

/// 评估请求
#[derive(Debug, Deserialize, Validate)]
pub struct EvaluateRequest {
    #[validate(length(min = 1, message = "rules 至少包含一个规则名"))]
    pub rules: Vec<String>,
    pub payload: Value,
}

impl EvaluateRequest {
    /// 校验并拆分为规则名与载荷
    pub fn into_parts(self) -> Result<(Vec<String>, Payload), RuleError> {
        if let Some(index) = self.rules.iter().position(|name| name.trim().is_empty()) {
            return Err(RuleError::InvalidPayload(format!(
                "rules[{}] 不能为空字符串",
                index
            )));
        }

        match self.payload {
            Value::Object(payload) => Ok((self.rules, payload)),
            other => Err(RuleError::InvalidPayload(format!(
                "payload 必须是 JSON 对象，实际为 {}",
                json_type_name(&other)
            ))),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 评估结果响应
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResponse {
    pub result: Verdict,
    pub passed_rules: Vec<String>,
    pub failed_rules: Vec<String>,
}

impl From<EvaluationResult> for EvaluationResponse {
    fn from(result: EvaluationResult) -> Self {
        Self {
            result: result.verdict(),
            passed_rules: result.passed_rules,
            failed_rules: result.failed_rules,
        }
    }
}

/// 异步提交响应
#[derive(Debug, Serialize)]
pub struct TaskAcceptedResponse {
    pub task_id: String,
    pub status: &'static str,
    pub message: &'static str,
}

impl TaskAcceptedResponse {
    pub fn new(task_id: String) -> Self {
        Self {
            task_id,
            status: "pending",
            message: "Rule evaluation has been scheduled",
        }
    }
}

/// 任务结果查询参数
#[derive(Debug, Deserialize)]
pub struct TaskResultQuery {
    pub task_id: Option<String>,
}

/// 将轮询视图转换为响应体
pub fn task_status_body(view: TaskStatusView) -> Value {
    match view {
        TaskStatusView::Pending { task_id } => json!({
            "task_id": task_id,
            "status": "pending",
            "message": "Task is still in progress",
        }),
        TaskStatusView::Completed { result, .. } => {
            json!(EvaluationResponse::from(result))
        }
        TaskStatusView::Rejected { task_id, detail } | TaskStatusView::Failed { task_id, detail } => {
            json!({
                "task_id": task_id,
                "status": "error",
                "detail": detail,
            })
        }
    }
}

/// 创建规则请求
#[derive(Debug, Deserialize, Validate)]
pub struct CreateRuleRequest {
    #[validate(length(min = 1, max = 255, message = "规则名称长度必须在1-255个字符之间"))]
    pub name: String,
    pub condition: Value,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_by: Option<String>,
}

fn default_active() -> bool {
    true
}

impl CreateRuleRequest {
    pub fn into_new_rule(self) -> Result<NewRule, RuleError> {
        let condition = Condition::try_from(self.condition)?;
        let mut rule = NewRule::new(self.name, condition);
        rule.is_active = self.is_active;
        rule.created_by = self.created_by;
        Ok(rule)
    }
}

/// 更新规则请求
#[derive(Debug, Default, Deserialize)]
pub struct UpdateRuleRequest {
    pub condition: Option<Value>,
    pub is_active: Option<bool>,
}

impl UpdateRuleRequest {
    pub fn into_update(self) -> Result<RuleUpdate, RuleError> {
        Ok(RuleUpdate {
            condition: self.condition.map(Condition::try_from).transpose()?,
            is_active: self.is_active,
        })
    }
}

/// 规则详情
#[derive(Debug, Serialize, Deserialize)]
pub struct RuleDto {
    pub id: Uuid,
    pub name: String,
    pub condition: Value,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Rule> for RuleDto {
    fn from(rule: Rule) -> Self {
        Self {
            id: rule.id,
            condition: rule.condition.to_value(),
            name: rule.name,
            is_active: rule.is_active,
            created_by: rule.created_by,
            created_at: rule.created_at,
            updated_at: rule.updated_at,
        }
    }
}
