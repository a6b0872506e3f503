//! 规则解析器
//!
//! 将规则名列表解析为条件树。不存在与未启用的规则同样视为未找到，
//! 任一名称无法解析则整个请求失败，不返回部分结果。

use crate::error::{Result, RuleError};
use crate::models::ResolvedRule;
use crate::store::RuleStore;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// 规则解析器
#[derive(Clone)]
pub struct RuleResolver {
    store: Arc<dyn RuleStore>,
}

impl RuleResolver {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }

    /// 底层存储
    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.store
    }

    /// 解析规则名列表
    ///
    /// 结果按名称在 `names` 中首次出现的顺序排列，重复名称只解析一次。
    #[instrument(skip(self, names), fields(rule_count = names.len()))]
    pub async fn resolve(&self, names: &[String]) -> Result<Vec<ResolvedRule>> {
        let rules = self.store.find_active_by_names(names).await?;

        let found: HashSet<&str> = rules.iter().map(|rule| rule.name.as_str()).collect();

        let missing: BTreeSet<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|name| !found.contains(name))
            .collect();

        if !missing.is_empty() {
            warn!(missing = ?missing, "规则不存在或未启用");
            return Err(RuleError::rule_not_found(missing));
        }

        let mut order: HashMap<&str, usize> = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            order.entry(name.as_str()).or_insert(i);
        }

        let mut resolved: Vec<(usize, ResolvedRule)> = rules
            .into_iter()
            .filter_map(|rule| {
                let position = *order.get(rule.name.as_str())?;
                Some((position, ResolvedRule::from(rule)))
            })
            .collect();
        resolved.sort_by_key(|(position, _)| *position);
        resolved.dedup_by_key(|(position, _)| *position);

        debug!(resolved = resolved.len(), "规则解析完成");
        Ok(resolved.into_iter().map(|(_, rule)| rule).collect())
    }
}
