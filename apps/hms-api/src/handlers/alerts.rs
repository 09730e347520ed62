//! 告警查询与处置
//!
//! - GET /tenants/{tenant_id}/alerts：按发生时间倒序
//! - GET /tenants/{tenant_id}/alerts/{alert_id}：告警 + 通知任务（含失败原因）
//! - POST /tenants/{tenant_id}/alerts/{alert_id}/ack：确认，取消升级
//! - POST /tenants/{tenant_id}/alerts/{alert_id}/resolve：解决

use crate::AppState;
use crate::utils::{
    alert_to_dto, bad_request_error, internal_error, normalize_optional, normalize_required,
    not_found_error, notify_error, task_to_dto,
};
use api_contract::{
    AcknowledgeRequest, AlertActionResponse, AlertDetailDto, AlertQuery, AlertRecordDto,
    ApiResponse, NotificationTaskDto,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domain::{AlertStatus, TenantContext};

#[derive(serde::Deserialize)]
pub struct TenantPath {
    pub tenant_id: String,
}

#[derive(serde::Deserialize)]
pub struct AlertPath {
    tenant_id: String,
    alert_id: String,
}

pub async fn list_alerts(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    Query(query): Query<AlertQuery>,
) -> Response {
    let status = match query.status.as_deref() {
        Some(value) => match AlertStatus::parse(value) {
            Some(status) => Some(status),
            None => return bad_request_error(format!("unknown status: {value}")),
        },
        None => None,
    };
    let subject_id = match normalize_optional(query.subject_id, "subjectId") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let ctx = TenantContext::system(&path.tenant_id);
    let filter = hms_storage::AlertQuery {
        status,
        subject_id,
        limit: query.limit,
    };
    match state.alerts.list_alerts(&ctx, &filter).await {
        Ok(alerts) => {
            let data: Vec<AlertRecordDto> = alerts.into_iter().map(alert_to_dto).collect();
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => internal_error(err),
    }
}

pub async fn get_alert(State(state): State<AppState>, Path(path): Path<AlertPath>) -> Response {
    let ctx = TenantContext::system(&path.tenant_id);
    let alert = match state.alerts.find_alert(&ctx, &path.alert_id).await {
        Ok(Some(alert)) => alert,
        Ok(None) => return not_found_error(),
        Err(err) => return internal_error(err),
    };
    let tasks = match state.tasks.list_tasks(&ctx, &path.alert_id).await {
        Ok(tasks) => tasks,
        Err(err) => return internal_error(err),
    };
    let detail = AlertDetailDto {
        alert: alert_to_dto(alert),
        tasks: tasks.into_iter().map(task_to_dto).collect::<Vec<NotificationTaskDto>>(),
    };
    (StatusCode::OK, Json(ApiResponse::success(detail))).into_response()
}

pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(path): Path<AlertPath>,
    Json(req): Json<AcknowledgeRequest>,
) -> Response {
    let user_id = match normalize_required(req.user_id, "userId") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let ctx = TenantContext::new(&path.tenant_id, &user_id);
    let applied = match state.notify.acknowledge(&ctx, &path.alert_id, &user_id).await {
        Ok(applied) => applied,
        Err(err) => return notify_error(err),
    };
    action_response(&state, &ctx, &path.alert_id, applied).await
}

pub async fn resolve_alert(State(state): State<AppState>, Path(path): Path<AlertPath>) -> Response {
    let ctx = TenantContext::system(&path.tenant_id);
    let applied = match state.notify.resolve(&ctx, &path.alert_id).await {
        Ok(applied) => applied,
        Err(err) => return notify_error(err),
    };
    action_response(&state, &ctx, &path.alert_id, applied).await
}

async fn action_response(
    state: &AppState,
    ctx: &TenantContext,
    alert_id: &str,
    applied: bool,
) -> Response {
    match state.alerts.find_alert(ctx, alert_id).await {
        Ok(Some(alert)) => {
            let response = AlertActionResponse {
                alert_id: alert.alert_id,
                applied,
                status: alert.status.as_str().to_string(),
            };
            (StatusCode::OK, Json(ApiResponse::success(response))).into_response()
        }
        Ok(None) => not_found_error(),
        Err(err) => internal_error(err),
    }
}
