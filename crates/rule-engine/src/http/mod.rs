//! HTTP 接口
//!
//! 规则管理与评估的 REST API。

pub mod dto;
pub mod error;
pub mod handlers;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use eligibility_shared::observability::middleware as obs_middleware;

/// 构建规则相关路由
pub fn rule_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/rules",
            post(handlers::create_rule).get(handlers::list_rules),
        )
        .route("/rules/evaluate", post(handlers::evaluate))
        .route("/rules/evaluate_async", post(handlers::evaluate_async))
        .route("/rules/task_result", get(handlers::task_result))
        .route(
            "/rules/{name}",
            get(handlers::get_rule)
                .patch(handlers::update_rule)
                .delete(handlers::delete_rule),
        )
}

/// 构建完整应用路由（含可观测性中间件）
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", rule_routes())
        .route("/health", get(handlers::health_check))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, RuleError};
    use crate::orchestrator::RuleEvaluationService;
    use crate::resolver::RuleResolver;
    use crate::store::InMemoryRuleStore;
    use crate::task::{EvaluationJob, TaskOutcome, TaskState, TaskSubstrate};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    /// 固定返回指定状态的任务执行层
    struct FixedSubstrate {
        state: TaskState,
        outcome: Option<TaskOutcome>,
    }

    #[async_trait]
    impl TaskSubstrate for FixedSubstrate {
        async fn enqueue(&self, _job: EvaluationJob) -> Result<String> {
            Err(RuleError::Internal("not used".to_string()))
        }

        async fn state(&self, _task_id: &str) -> Result<TaskState> {
            Ok(self.state)
        }

        async fn result(&self, _task_id: &str) -> Result<Option<TaskOutcome>> {
            Ok(self.outcome.clone())
        }
    }

    async fn task_result(state: TaskState, outcome: Option<TaskOutcome>) -> (StatusCode, Value) {
        let store = Arc::new(InMemoryRuleStore::new());
        let evaluation = RuleEvaluationService::new(
            RuleResolver::new(store.clone()),
            Arc::new(FixedSubstrate { state, outcome }),
        );

        let response = app(AppState::new(store, evaluation))
            .oneshot(
                Request::builder()
                    .uri("/api/rules/task_result?task_id=t-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_task_result_soft_error_is_bad_request() {
        let (status, body) = task_result(
            TaskState::Success,
            Some(TaskOutcome::error("规则未找到: Adult")),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            serde_json::json!({"task_id": "t-1", "status": "error", "detail": "规则未找到: Adult"})
        );
    }

    #[tokio::test]
    async fn test_task_result_hard_failure_is_server_error() {
        let (status, body) = task_result(
            TaskState::Failure,
            Some(TaskOutcome::error("评估任务失败: task 3 panicked")),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
        assert_eq!(body["detail"], "评估任务失败: task 3 panicked");
    }

    #[tokio::test]
    async fn test_task_result_reaped_after_state_read_is_pending() {
        let (status, body) = task_result(TaskState::Success, None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["task_id"], "t-1");
    }

    #[tokio::test]
    async fn test_evaluate_async_substrate_error_is_server_error() {
        use crate::models::{Condition, NewRule};
        use crate::operators::Operator;
        use crate::store::RuleStore;

        let store = Arc::new(InMemoryRuleStore::new());
        store
            .create(NewRule::new("Adult", Condition::leaf("age", Operator::Ge, 18)))
            .await
            .unwrap();
        let evaluation = RuleEvaluationService::new(
            RuleResolver::new(store.clone()),
            Arc::new(FixedSubstrate {
                state: TaskState::Pending,
                outcome: None,
            }),
        );

        let response = app(AppState::new(store, evaluation))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/rules/evaluate_async")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"rules": ["Adult"], "payload": {"age": 20}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
