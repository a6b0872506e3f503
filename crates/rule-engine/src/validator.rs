//! 条件校验器
//!
//! 在规则入库前校验条件 JSON 的结构，并将其解析为内存中的条件树。
//! 校验是纯结构性的：不读取载荷，也不求值。

use crate::error::{Result, RuleError};
use crate::models::{Condition, LeafCondition};
use crate::operators::{LogicalOperator, Operator};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// 叶子条件必须且只能包含的键
const LEAF_KEYS: [&str; 3] = ["field", "operator", "value"];

/// 条件校验器
pub struct ConditionValidator;

impl ConditionValidator {
    /// 校验条件 JSON 并解析为条件树
    pub fn validate(raw: &Value) -> Result<Condition> {
        Self::validate_node(raw, "root")
    }

    /// 从 JSON 字符串校验
    pub fn validate_json(json: &str) -> Result<Condition> {
        let raw: Value = serde_json::from_str(json)
            .map_err(|e| RuleError::InvalidRuleCondition(format!("JSON 格式错误: {}", e)))?;
        Self::validate(&raw)
    }

    /// 递归校验节点
    fn validate_node(raw: &Value, path: &str) -> Result<Condition> {
        let obj = raw.as_object().ok_or_else(|| {
            RuleError::InvalidRuleCondition(format!("条件 '{}' 必须是 JSON 对象", path))
        })?;

        let has_and = obj.contains_key(LogicalOperator::And.key());
        let has_or = obj.contains_key(LogicalOperator::Or.key());

        match (has_and, has_or) {
            (true, true) => Err(RuleError::InvalidRuleCondition(format!(
                "条件 '{}' 不能同时包含 AND 和 OR",
                path
            ))),
            (true, false) => Self::validate_group(obj, LogicalOperator::And, path),
            (false, true) => Self::validate_group(obj, LogicalOperator::Or, path),
            (false, false) => Self::validate_leaf(obj, path).map(Condition::Leaf),
        }
    }

    /// 校验逻辑组
    fn validate_group(
        obj: &Map<String, Value>,
        operator: LogicalOperator,
        path: &str,
    ) -> Result<Condition> {
        let key = operator.key();

        if obj.len() != 1 {
            return Err(RuleError::InvalidRuleCondition(format!(
                "逻辑组 '{}' 只能包含 {} 一个键",
                path, key
            )));
        }

        let children = obj.get(key).and_then(Value::as_array).ok_or_else(|| {
            RuleError::InvalidRuleCondition(format!(
                "逻辑组 '{}' 的 {} 必须是子条件数组",
                path, key
            ))
        })?;

        if children.is_empty() {
            return Err(RuleError::InvalidRuleCondition(format!(
                "逻辑组 '{}' 的 {} 不能为空",
                path, key
            )));
        }

        let children = children
            .iter()
            .enumerate()
            .map(|(i, child)| Self::validate_node(child, &format!("{}.{}[{}]", path, key, i)))
            .collect::<Result<Vec<_>>>()?;

        Ok(match operator {
            LogicalOperator::And => Condition::And(children),
            LogicalOperator::Or => Condition::Or(children),
        })
    }

    /// 校验叶子条件
    fn validate_leaf(obj: &Map<String, Value>, path: &str) -> Result<LeafCondition> {
        let missing: Vec<&str> = LEAF_KEYS
            .iter()
            .copied()
            .filter(|key| !obj.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(RuleError::InvalidRuleCondition(format!(
                "条件 '{}' 缺少必需的键: {}（简单条件必须包含 {}）",
                path,
                missing.join(", "),
                LEAF_KEYS.join(", ")
            )));
        }

        let allowed: HashSet<&str> = LEAF_KEYS.into_iter().collect();
        let mut unknown: Vec<&str> = obj
            .keys()
            .map(String::as_str)
            .filter(|key| !allowed.contains(key))
            .collect();
        if !unknown.is_empty() {
            unknown.sort_unstable();
            return Err(RuleError::InvalidRuleCondition(format!(
                "条件 '{}' 包含未知的键: {}",
                path,
                unknown.join(", ")
            )));
        }

        let field = obj.get("field").and_then(Value::as_str).ok_or_else(|| {
            RuleError::InvalidRuleCondition(format!("条件 '{}' 的 field 必须是字符串", path))
        })?;

        let operator = obj
            .get("operator")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RuleError::InvalidRuleCondition(format!("条件 '{}' 的 operator 必须是字符串", path))
            })?
            .parse::<Operator>()
            .map_err(|e| RuleError::InvalidRuleCondition(format!("条件 '{}': {}", path, e)))?;

        let value = obj.get("value").cloned().unwrap_or(Value::Null);

        Ok(LeafCondition {
            field: field.to_string(),
            operator,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_condition_json() -> &'static str {
        r#"
        {
            "AND": [
                {"field": "age", "operator": ">=", "value": 18},
                {
                    "OR": [
                        {"field": "country", "operator": "==", "value": "Thailand"},
                        {"field": "country", "operator": "==", "value": "Singapore"}
                    ]
                }
            ]
        }
        "#
    }

    fn error_message(raw: Value) -> String {
        match ConditionValidator::validate(&raw) {
            Err(RuleError::InvalidRuleCondition(msg)) => msg,
            other => panic!("expected InvalidRuleCondition, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_nested_condition() {
        let condition = ConditionValidator::validate_json(sample_condition_json()).unwrap();

        match &condition {
            Condition::And(children) => {
                assert_eq!(children.len(), 2);
                assert_eq!(children[0], Condition::leaf("age", Operator::Ge, 18));
                assert!(matches!(&children[1], Condition::Or(c) if c.len() == 2));
            }
            other => panic!("expected AND group, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_all_operators() {
        for op in Operator::ALL {
            let raw = json!({"field": "a", "operator": op.token(), "value": 1});
            assert!(ConditionValidator::validate(&raw).is_ok(), "operator {}", op);
        }
    }

    #[test]
    fn test_validate_not_object() {
        assert!(error_message(json!([1, 2])).contains("必须是 JSON 对象"));
        assert!(error_message(json!("AND")).contains("必须是 JSON 对象"));
    }

    #[test]
    fn test_validate_nested_not_object() {
        let msg = error_message(json!({"OR": [{"field": "a", "operator": "==", "value": 1}, 5]}));
        assert!(msg.contains("root.OR[1]"));
    }

    #[test]
    fn test_validate_empty_group() {
        assert!(error_message(json!({"AND": []})).contains("不能为空"));
    }

    #[test]
    fn test_validate_group_not_array() {
        assert!(error_message(json!({"OR": {"field": "a"}})).contains("必须是子条件数组"));
    }

    #[test]
    fn test_validate_both_and_or() {
        let msg = error_message(json!({
            "AND": [{"field": "a", "operator": "==", "value": 1}],
            "OR": [{"field": "b", "operator": "==", "value": 2}]
        }));
        assert!(msg.contains("不能同时包含"));
    }

    #[test]
    fn test_validate_group_with_leaf_keys() {
        let msg = error_message(json!({
            "AND": [{"field": "a", "operator": "==", "value": 1}],
            "field": "b"
        }));
        assert!(msg.contains("只能包含 AND"));
    }

    #[test]
    fn test_validate_missing_leaf_keys() {
        let msg = error_message(json!({"field": "a", "operator": "=="}));
        assert!(msg.contains("value"));

        let msg = error_message(json!({}));
        assert!(msg.contains("field, operator, value"));
    }

    #[test]
    fn test_validate_unknown_operator() {
        let msg = error_message(json!({"field": "a", "operator": "eq", "value": 1}));
        assert!(msg.contains("操作符必须是以下之一"));
    }

    #[test]
    fn test_validate_unknown_leaf_key() {
        let msg = error_message(json!({
            "field": "a", "operator": "==", "value": 1, "description": "x"
        }));
        assert!(msg.contains("description"));
    }

    #[test]
    fn test_validate_non_string_field() {
        assert!(error_message(json!({"field": 3, "operator": "==", "value": 1})).contains("field"));
    }

    #[test]
    fn test_validate_null_value_is_structurally_valid() {
        let condition =
            ConditionValidator::validate(&json!({"field": "a", "operator": "==", "value": null}))
                .unwrap();
        assert_eq!(condition, Condition::leaf("a", Operator::Eq, Value::Null));
    }

    #[test]
    fn test_validate_invalid_json_text() {
        assert!(matches!(
            ConditionValidator::validate_json("{not json"),
            Err(RuleError::InvalidRuleCondition(_))
        ));
    }
}
