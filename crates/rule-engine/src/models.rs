//! 规则引擎领域模型

use crate::operators::{LogicalOperator, Operator};
use crate::validator::ConditionValidator;
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// 评估载荷：任意 JSON 对象，只读
pub type Payload = Map<String, Value>;

/// 条件树节点
///
/// 序列化形式与存储形式一致：`{"AND": [...]}`、`{"OR": [...]}` 或
/// `{"field": ..., "operator": ..., "value": ...}`。
/// 反序列化一律经过 [`ConditionValidator`]，因此任何 `Condition` 值都是合法的。
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Leaf(LeafCondition),
}

impl Condition {
    pub fn and(children: Vec<Condition>) -> Self {
        Self::And(children)
    }

    pub fn or(children: Vec<Condition>) -> Self {
        Self::Or(children)
    }

    pub fn leaf(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::Leaf(LeafCondition::new(field, operator, value))
    }

    /// 逻辑组节点的操作符，叶子节点返回 None
    pub fn logical_operator(&self) -> Option<LogicalOperator> {
        match self {
            Self::And(_) => Some(LogicalOperator::And),
            Self::Or(_) => Some(LogicalOperator::Or),
            Self::Leaf(_) => None,
        }
    }

    /// 转换为存储用的 JSON 树
    pub fn to_value(&self) -> Value {
        match self {
            Self::And(children) | Self::Or(children) => {
                let key = self
                    .logical_operator()
                    .map(LogicalOperator::key)
                    .unwrap_or_default();
                let mut map = Map::with_capacity(1);
                map.insert(
                    key.to_string(),
                    Value::Array(children.iter().map(Self::to_value).collect()),
                );
                Value::Object(map)
            }
            Self::Leaf(leaf) => leaf.to_value(),
        }
    }
}

impl TryFrom<&Value> for Condition {
    type Error = crate::error::RuleError;

    fn try_from(raw: &Value) -> Result<Self, Self::Error> {
        ConditionValidator::validate(raw)
    }
}

impl TryFrom<Value> for Condition {
    type Error = crate::error::RuleError;

    fn try_from(raw: Value) -> Result<Self, Self::Error> {
        ConditionValidator::validate(&raw)
    }
}

impl Serialize for Condition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::And(children) | Self::Or(children) => {
                let key = self
                    .logical_operator()
                    .map(LogicalOperator::key)
                    .unwrap_or_default();
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(key, children)?;
                map.end()
            }
            Self::Leaf(leaf) => leaf.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        ConditionValidator::validate(&raw).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(children) | Self::Or(children) => {
                let op = self.logical_operator().map(LogicalOperator::key).unwrap_or_default();
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {} ", op)?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
            Self::Leaf(leaf) => write!(f, "{} {} {}", leaf.field, leaf.operator, leaf.value),
        }
    }
}

/// 叶子条件：对单个载荷字段的断言
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeafCondition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl LeafCondition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(3);
        map.insert("field".to_string(), Value::String(self.field.clone()));
        map.insert(
            "operator".to_string(),
            Value::String(self.operator.token().to_string()),
        );
        map.insert("value".to_string(), self.value.clone());
        Value::Object(map)
    }
}

/// 规则定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    pub condition: Condition,
    pub is_active: bool,
    /// 创建者（外部用户实体的引用）
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// 由创建请求生成规则实体
    pub fn from_new(new_rule: NewRule) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: new_rule.name,
            condition: new_rule.condition,
            is_active: new_rule.is_active,
            created_by: new_rule.created_by,
            created_at: now,
            updated_at: now,
        }
    }

    /// 应用更新，刷新 updated_at
    pub fn apply(&mut self, update: RuleUpdate) {
        if let Some(condition) = update.condition {
            self.condition = condition;
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
        self.updated_at = Utc::now();
    }
}

/// 创建规则请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,
    pub condition: Condition,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub created_by: Option<String>,
}

fn default_active() -> bool {
    true
}

impl NewRule {
    pub fn new(name: impl Into<String>, condition: Condition) -> Self {
        Self {
            name: name.into(),
            condition,
            is_active: true,
            created_by: None,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn created_by(mut self, user: impl Into<String>) -> Self {
        self.created_by = Some(user.into());
        self
    }
}

/// 更新规则请求，None 表示保持不变
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleUpdate {
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// 已解析的规则：名称与条件树
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRule {
    pub name: String,
    pub condition: Condition,
}

impl ResolvedRule {
    pub fn new(name: impl Into<String>, condition: Condition) -> Self {
        Self {
            name: name.into(),
            condition,
        }
    }
}

impl From<Rule> for ResolvedRule {
    fn from(rule: Rule) -> Self {
        Self {
            name: rule.name,
            condition: rule.condition,
        }
    }
}

/// 评估上下文 - 提供给评估器的载荷视图
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    data: &'a Payload,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(data: &'a Payload) -> Self {
        Self { data }
    }

    /// 获取字段值（支持点号分隔的路径，如 "user.profile.age"）
    ///
    /// 只沿对象逐段下钻；中间值不是对象或键不存在时返回 None。
    pub fn get_field(&self, path: &str) -> Option<&'a Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.data.get(first)?;

        for part in parts {
            match current {
                Value::Object(map) => {
                    current = map.get(part)?;
                }
                _ => return None,
            }
        }

        Some(current)
    }
}

/// 评估结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Approved,
    Rejected,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 多规则评估结果
///
/// 每个规则名恰好出现在两个列表之一，顺序与解析顺序一致。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub passed_rules: Vec<String>,
    pub failed_rules: Vec<String>,
}

impl EvaluationResult {
    /// 没有失败规则即为 APPROVED
    pub fn verdict(&self) -> Verdict {
        if self.failed_rules.is_empty() {
            Verdict::Approved
        } else {
            Verdict::Rejected
        }
    }

    pub fn is_approved(&self) -> bool {
        self.verdict() == Verdict::Approved
    }

    /// 参与评估的规则总数
    pub fn len(&self) -> usize {
        self.passed_rules.len() + self.failed_rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
