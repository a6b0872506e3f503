//! 规则引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    /// 条件树结构不合法，只在校验阶段出现
    #[error("规则条件无效: {0}")]
    InvalidRuleCondition(String),

    /// 请求的规则不存在或未启用
    #[error("规则未找到: {}", .names.join(", "))]
    RuleNotFound { names: Vec<String> },

    #[error("规则已存在: {0}")]
    DuplicateRule(String),

    #[error("评估请求无效: {0}")]
    InvalidPayload(String),

    /// 异步评估任务执行失败
    #[error("评估任务失败: {0}")]
    TaskFailure(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl RuleError {
    pub fn rule_not_found<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::RuleNotFound {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// 错误码（用于 API 响应与日志）
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRuleCondition(_) => "INVALID_RULE_CONDITION",
            Self::RuleNotFound { .. } => "RULE_NOT_FOUND",
            Self::DuplicateRule(_) => "DUPLICATE_RULE",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::TaskFailure(_) => "TASK_FAILURE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::JsonError(_) => "JSON_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_not_found_message_lists_names() {
        let err = RuleError::rule_not_found(["Missing", "Gone"]);
        assert_eq!(err.code(), "RULE_NOT_FOUND");
        assert!(err.to_string().contains("Missing, Gone"));
    }
}
