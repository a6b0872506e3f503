//! 应用状态定义

use crate::orchestrator::RuleEvaluationService;
use crate::store::RuleStore;
use std::sync::Arc;

/// Axum 路由共享状态
#[derive(Clone)]
pub struct AppState {
    /// 规则存储，供管理接口使用
    pub store: Arc<dyn RuleStore>,
    /// 评估服务
    pub evaluation: RuleEvaluationService,
}

impl AppState {
    pub fn new(store: Arc<dyn RuleStore>, evaluation: RuleEvaluationService) -> Self {
        Self { store, evaluation }
    }
}
