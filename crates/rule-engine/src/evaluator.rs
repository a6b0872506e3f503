//! 条件评估器
//!
//! 递归评估条件树，逻辑组短路求值。评估是全函数：字段缺失、类型不匹配、
//! 操作符与值不兼容等情况一律得到 `false`，不会返回错误。

use crate::models::{Condition, EvaluationContext, LeafCondition, Payload};
use crate::operators::Operator;
use serde_json::{Number, Value};
use std::cmp::Ordering;

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估条件树
    pub fn evaluate(condition: &Condition, payload: &Payload) -> bool {
        Self::evaluate_node(condition, &EvaluationContext::new(payload))
    }

    /// 在已有上下文中评估条件树
    pub fn evaluate_node(condition: &Condition, context: &EvaluationContext<'_>) -> bool {
        match condition {
            // AND: 遇到 false 立即返回
            Condition::And(children) => children
                .iter()
                .all(|child| Self::evaluate_node(child, context)),
            // OR: 遇到 true 立即返回
            Condition::Or(children) => children
                .iter()
                .any(|child| Self::evaluate_node(child, context)),
            Condition::Leaf(leaf) => Self::evaluate_leaf(leaf, context),
        }
    }

    /// 评估叶子条件
    fn evaluate_leaf(leaf: &LeafCondition, context: &EvaluationContext<'_>) -> bool {
        if leaf.field.is_empty() || leaf.value.is_null() {
            return false;
        }

        match context.get_field(&leaf.field) {
            Some(actual) => Self::apply(leaf.operator, actual, &leaf.value),
            None => false,
        }
    }

    /// 对（字段值, 期望值）应用操作符
    ///
    /// # Arguments
    /// * `operator` - 操作符
    /// * `actual` - 从载荷中解析出的字段值
    /// * `expected` - 规则中定义的期望值
    pub fn apply(operator: Operator, actual: &Value, expected: &Value) -> bool {
        match operator {
            Operator::Eq => Self::eq(actual, expected),
            Operator::Ne => !Self::eq(actual, expected),
            Operator::Gt => Self::compare(actual, expected) == Some(Ordering::Greater),
            Operator::Lt => Self::compare(actual, expected) == Some(Ordering::Less),
            Operator::Ge => matches!(
                Self::compare(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Le => matches!(
                Self::compare(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Contains => Self::contains(actual, expected),
        }
    }

    /// 相等比较
    ///
    /// 数值按数值比较（18 == 18.0），容器逐元素递归比较，其余类型严格相等。
    fn eq(actual: &Value, expected: &Value) -> bool {
        match (actual, expected) {
            (Value::Number(a), Value::Number(b)) => {
                Self::compare_numbers(a, b) == Some(Ordering::Equal)
            }
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Self::eq(x, y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| Self::eq(v, other)))
            }
            _ => actual == expected,
        }
    }

    /// 有序比较，类型不可比较时返回 None
    fn compare(actual: &Value, expected: &Value) -> Option<Ordering> {
        match (actual, expected) {
            (Value::Number(a), Value::Number(b)) => Self::compare_numbers(a, b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Array(a), Value::Array(b)) => Self::compare_sequences(a, b),
            _ => None,
        }
    }

    /// 数组按字典序比较：第一个不相等的元素决定结果
    fn compare_sequences(a: &[Value], b: &[Value]) -> Option<Ordering> {
        for (x, y) in a.iter().zip(b) {
            if !Self::eq(x, y) {
                return Self::compare(x, y);
            }
        }
        Some(a.len().cmp(&b.len()))
    }

    /// 数值比较
    ///
    /// 只要有一侧是整数就精确比较，不经过 f64 舍入；两侧都是浮点数时按浮点比较。
    fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
        match (Self::as_integer(a), Self::as_integer(b)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            (Some(x), None) => Self::compare_int_float(x, b.as_f64()?),
            (None, Some(y)) => Self::compare_int_float(y, a.as_f64()?).map(Ordering::reverse),
            (None, None) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }

    fn as_integer(n: &Number) -> Option<i128> {
        n.as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
    }

    /// 整数与浮点数的精确比较
    fn compare_int_float(int: i128, float: f64) -> Option<Ordering> {
        // 2^127，超出该范围的浮点数不可能与任何 i64/u64 相等
        const LIMIT: f64 = 170_141_183_460_469_231_731_687_303_715_884_105_728.0;

        if float.is_nan() {
            return None;
        }
        if float >= LIMIT {
            return Some(Ordering::Less);
        }
        if float < -LIMIT {
            return Some(Ordering::Greater);
        }

        let truncated = float.trunc();
        match int.cmp(&(truncated as i128)) {
            Ordering::Equal => truncated.partial_cmp(&float),
            other => Some(other),
        }
    }

    /// 包含检查
    ///
    /// - 数组：任一元素与期望值相等
    /// - 字符串：期望值为字符串且为其子串
    /// - 对象：期望值为字符串且为其键
    fn contains(actual: &Value, expected: &Value) -> bool {
        match actual {
            Value::Array(items) => items.iter().any(|item| Self::eq(item, expected)),
            Value::String(s) => expected.as_str().is_some_and(|sub| s.contains(sub)),
            Value::Object(map) => expected.as_str().is_some_and(|key| map.contains_key(key)),
            _ => false,
        }
    }
}
