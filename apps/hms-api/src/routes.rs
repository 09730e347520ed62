//! 路由定义
//!
//! - 事件接入：/events
//! - 告警：/tenants/{tenant_id}/alerts/*
//! - 组织：/org-events、/tenants/{tenant_id}/org/*
//! - 缓存失效：/tenants/{tenant_id}/rules/changed、/tenants/{tenant_id}/managers/changed
//! - 指标：/metrics

use super::AppState;
use super::handlers::*;
use axum::{
    Router,
    routing::{get, post},
};

/// 创建 API 路由（挂载在 /api 下）
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/events", post(ingest_event))
        .route("/tenants/:tenant_id/alerts", get(list_alerts))
        .route("/tenants/:tenant_id/alerts/:alert_id", get(get_alert))
        .route(
            "/tenants/:tenant_id/alerts/:alert_id/ack",
            post(acknowledge_alert),
        )
        .route(
            "/tenants/:tenant_id/alerts/:alert_id/resolve",
            post(resolve_alert),
        )
        .route("/org-events", post(apply_org_event))
        .route("/tenants/:tenant_id/org/rebuild", post(rebuild_closure))
        .route("/tenants/:tenant_id/org/consistency", get(check_consistency))
        .route("/tenants/:tenant_id/rules/changed", post(rules_changed))
        .route("/tenants/:tenant_id/managers/changed", post(managers_changed))
        .route("/metrics", get(get_metrics))
}
