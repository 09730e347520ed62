//! 缓存失效通知
//!
//! - POST /tenants/{tenant_id}/rules/changed：规则增删改后重新加载租户规则
//! - POST /tenants/{tenant_id}/managers/changed：负责人变更，失效该组织子树的升级链

use crate::AppState;
use crate::handlers::alerts::TenantPath;
use crate::utils::{escalation_error, normalize_optional, normalize_required};
use api_contract::{
    ApiResponse, ManagerChangedRequest, OrgInvalidationDto, RuleChangedRequest,
    RuleInvalidationDto,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::info;

pub async fn rules_changed(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    Json(req): Json<RuleChangedRequest>,
) -> Response {
    let change = match normalize_required(req.change, "change") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let rule_id = match normalize_optional(req.rule_id, "ruleId") {
        Ok(value) => value,
        Err(response) => return response,
    };
    state.pipeline.rule_cache().invalidate(&path.tenant_id);
    info!(
        target: "hms.api",
        tenant_id = %path.tenant_id,
        rule_id = ?rule_id,
        change = %change,
        "rule_cache_invalidated"
    );
    (
        StatusCode::OK,
        Json(ApiResponse::success(RuleInvalidationDto {
            tenant_id: path.tenant_id,
            rule_id,
            change,
        })),
    )
        .into_response()
}

pub async fn managers_changed(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
    Json(req): Json<ManagerChangedRequest>,
) -> Response {
    let org_id = match normalize_required(req.org_id, "orgId") {
        Ok(value) => value,
        Err(response) => return response,
    };
    match state.org_events.on_manager_change(&path.tenant_id, &org_id).await {
        Ok(invalidated_orgs) => (
            StatusCode::OK,
            Json(ApiResponse::success(OrgInvalidationDto {
                tenant_id: path.tenant_id,
                invalidated_orgs,
            })),
        )
            .into_response(),
        Err(err) => escalation_error(err),
    }
}
