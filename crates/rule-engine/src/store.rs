//! 规则存储
//!
//! 定义按名称寻址的规则存储接口，并提供基于 DashMap 的线程安全内存实现。
//! 名称全局唯一，重复创建会被拒绝。

use crate::error::{Result, RuleError};
use crate::models::{NewRule, Rule, RuleUpdate};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 规则存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// 按名称查找启用的规则
    async fn find_active_by_name(&self, name: &str) -> Result<Option<Rule>>;

    /// 批量查找启用的规则，结果顺序由存储决定
    async fn find_active_by_names(&self, names: &[String]) -> Result<Vec<Rule>>;

    /// 按名称查找规则（不区分启用状态）
    async fn get_by_name(&self, name: &str) -> Result<Option<Rule>>;

    /// 创建规则，名称已存在时返回 DuplicateRule
    async fn create(&self, new_rule: NewRule) -> Result<Rule>;

    /// 更新规则的条件或启用状态
    async fn update(&self, name: &str, update: RuleUpdate) -> Result<Rule>;

    /// 列出所有规则，按名称排序
    async fn list(&self) -> Result<Vec<Rule>>;

    /// 删除规则，名称不存在时返回 RuleNotFound
    async fn delete(&self, name: &str) -> Result<()>;
}

/// 内存规则存储
#[derive(Clone, Default)]
pub struct InMemoryRuleStore {
    rules: Arc<DashMap<String, Rule>>,
}

impl InMemoryRuleStore {
    /// 创建新的规则存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取当前存储的规则数量
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// 检查存储是否为空
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 检查规则是否存在
    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn find_active_by_name(&self, name: &str) -> Result<Option<Rule>> {
        Ok(self
            .rules
            .get(name)
            .filter(|rule| rule.is_active)
            .map(|rule| rule.clone()))
    }

    async fn find_active_by_names(&self, names: &[String]) -> Result<Vec<Rule>> {
        let mut seen = std::collections::HashSet::with_capacity(names.len());
        Ok(names
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .filter_map(|name| self.rules.get(name))
            .filter(|rule| rule.is_active)
            .map(|rule| rule.clone())
            .collect())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Rule>> {
        Ok(self.rules.get(name).map(|rule| rule.clone()))
    }

    #[instrument(skip(self, new_rule), fields(rule_name = %new_rule.name))]
    async fn create(&self, new_rule: NewRule) -> Result<Rule> {
        match self.rules.entry(new_rule.name.clone()) {
            Entry::Occupied(_) => {
                warn!("重复创建规则: {}", new_rule.name);
                Err(RuleError::DuplicateRule(new_rule.name))
            }
            Entry::Vacant(slot) => {
                let rule = Rule::from_new(new_rule);
                slot.insert(rule.clone());
                info!("规则已创建: {}", rule.name);
                Ok(rule)
            }
        }
    }

    #[instrument(skip(self, update))]
    async fn update(&self, name: &str, update: RuleUpdate) -> Result<Rule> {
        let mut rule = self.rules.get_mut(name).ok_or_else(|| {
            warn!("更新不存在的规则: {}", name);
            RuleError::rule_not_found([name])
        })?;

        rule.apply(update);
        info!(is_active = rule.is_active, "规则已更新: {}", name);
        Ok(rule.clone())
    }

    async fn list(&self) -> Result<Vec<Rule>> {
        let mut rules: Vec<Rule> = self.rules.iter().map(|r| r.value().clone()).collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rules)
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<()> {
        match self.rules.remove(name) {
            Some(_) => {
                info!("规则已删除: {}", name);
                Ok(())
            }
            None => {
                warn!("删除不存在的规则: {}", name);
                Err(RuleError::rule_not_found([name]))
            }
        }
    }
}
