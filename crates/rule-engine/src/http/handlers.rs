//! API 处理器

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::info;
use validator::Validate;

use super::dto::{
    CreateRuleRequest, EvaluateRequest, EvaluationResponse, RuleDto, TaskAcceptedResponse,
    TaskResultQuery, UpdateRuleRequest, task_status_body,
};
use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::error::RuleError;
use crate::task::TaskStatusView;

/// 创建规则
///
/// POST /api/rules
pub async fn create_rule(
    State(state): State<AppState>,
    body: Result<Json<CreateRuleRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<RuleDto>)> {
    let Json(req) = body?;
    req.validate()?;

    let rule = state.store.create(req.into_new_rule()?).await?;
    info!(rule_name = %rule.name, "Rule created");

    Ok((StatusCode::CREATED, Json(rule.into())))
}

/// 获取规则列表
///
/// GET /api/rules
pub async fn list_rules(State(state): State<AppState>) -> ApiResult<Json<Vec<RuleDto>>> {
    let rules = state.store.list().await?;
    Ok(Json(rules.into_iter().map(RuleDto::from).collect()))
}

/// 获取规则详情
///
/// GET /api/rules/{name}
pub async fn get_rule(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<RuleDto>> {
    let rule = state
        .store
        .get_by_name(&name)
        .await?
        .ok_or_else(|| RuleError::rule_not_found([name]))?;

    Ok(Json(rule.into()))
}

/// 更新规则条件或启用状态
///
/// PATCH /api/rules/{name}
pub async fn update_rule(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<UpdateRuleRequest>, JsonRejection>,
) -> ApiResult<Json<RuleDto>> {
    let Json(req) = body?;

    let rule = state.store.update(&name, req.into_update()?).await?;
    info!(rule_name = %rule.name, is_active = rule.is_active, "Rule updated");

    Ok(Json(rule.into()))
}

/// 删除规则
///
/// DELETE /api/rules/{name}
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.store.delete(&name).await?;
    info!(rule_name = %name, "Rule deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// 同步评估
///
/// POST /api/rules/evaluate
pub async fn evaluate(
    State(state): State<AppState>,
    body: Result<Json<EvaluateRequest>, JsonRejection>,
) -> ApiResult<Json<EvaluationResponse>> {
    let Json(req) = body?;
    req.validate()?;
    let (rule_names, payload) = req.into_parts()?;

    let result = state.evaluation.submit(&rule_names, &payload).await?;
    Ok(Json(result.into()))
}

/// 异步评估
///
/// POST /api/rules/evaluate_async
pub async fn evaluate_async(
    State(state): State<AppState>,
    body: Result<Json<EvaluateRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TaskAcceptedResponse>)> {
    let Json(req) = body?;
    req.validate()?;
    let (rule_names, payload) = req.into_parts()?;

    let task_id = state.evaluation.submit_async(rule_names, payload).await?;
    Ok((StatusCode::ACCEPTED, Json(TaskAcceptedResponse::new(task_id))))
}

/// 查询异步评估结果
///
/// GET /api/rules/task_result?task_id=
pub async fn task_result(
    State(state): State<AppState>,
    query: Result<Query<TaskResultQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    let task_id = query
        .task_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("task_id parameter is required"))?;

    let view = state.evaluation.poll(&task_id).await?;
    let status = match &view {
        TaskStatusView::Pending { .. } | TaskStatusView::Completed { .. } => StatusCode::OK,
        TaskStatusView::Rejected { .. } => StatusCode::BAD_REQUEST,
        TaskStatusView::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    Ok((status, Json(task_status_body(view))).into_response())
}

/// 存活检查
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}
