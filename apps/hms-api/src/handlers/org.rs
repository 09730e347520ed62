//! 组织结构变更与闭包表运维
//!
//! - POST /org-events：ADD/MOVE/REMOVE，更新闭包索引并失效受影响子树的升级链缓存
//! - POST /tenants/{tenant_id}/org/rebuild：从邻接表重建闭包表
//! - GET /tenants/{tenant_id}/org/consistency：只读一致性校验

use crate::AppState;
use crate::handlers::alerts::TenantPath;
use crate::utils::{
    edge_to_dto, escalation_error, hierarchy_error, normalize_optional, normalize_required,
    parse_operation,
};
use api_contract::{
    ApiResponse, ConsistencyReportDto, OrgInvalidationDto, OrgMutationRequest, RebuildResultDto,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domain::OrgMutationEvent;
use std::collections::BTreeSet;
use tracing::info;

pub async fn apply_org_event(
    State(state): State<AppState>,
    Json(req): Json<OrgMutationRequest>,
) -> Response {
    let operation = match parse_operation(&req.operation) {
        Ok(operation) => operation,
        Err(response) => return response,
    };
    let tenant_id = match normalize_required(req.tenant_id, "tenantId") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let node_id = match normalize_required(req.node_id, "nodeId") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let parent_id = match normalize_optional(req.parent_id, "parentId") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let event = OrgMutationEvent {
        operation,
        node_id,
        parent_id,
        tenant_id,
    };
    match state.org_events.handle(&event).await {
        Ok(invalidated_orgs) => (
            StatusCode::OK,
            Json(ApiResponse::success(OrgInvalidationDto {
                tenant_id: event.tenant_id,
                invalidated_orgs,
            })),
        )
            .into_response(),
        Err(err) => escalation_error(err),
    }
}

pub async fn rebuild_closure(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
) -> Response {
    let summary = match state.index.rebuild(&path.tenant_id).await {
        Ok(summary) => summary,
        Err(err) => return hierarchy_error(err),
    };
    // 重建后祖先路径可能整体变化，失效整个租户的升级链缓存
    let orgs: Vec<String> = match state.index.snapshot(&path.tenant_id).await {
        Ok(snapshot) => snapshot
            .edges(&path.tenant_id)
            .into_iter()
            .map(|edge| edge.descendant_id)
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect(),
        Err(err) => return hierarchy_error(err),
    };
    state.resolver.invalidate(&path.tenant_id, &orgs);
    info!(
        target: "hms.api",
        tenant_id = %path.tenant_id,
        nodes = summary.nodes,
        edges = summary.edges,
        "org_closure_rebuilt"
    );
    (
        StatusCode::OK,
        Json(ApiResponse::success(RebuildResultDto {
            nodes: summary.nodes,
            edges: summary.edges,
        })),
    )
        .into_response()
}

pub async fn check_consistency(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
) -> Response {
    match state.index.validate_consistency(&path.tenant_id).await {
        Ok(report) => {
            let dto = ConsistencyReportDto {
                consistent: report.is_consistent(),
                missing: report.missing.into_iter().map(edge_to_dto).collect(),
                unexpected: report.unexpected.into_iter().map(edge_to_dto).collect(),
                unreachable: report.unreachable,
            };
            (StatusCode::OK, Json(ApiResponse::success(dto))).into_response()
        }
        Err(err) => hierarchy_error(err),
    }
}
