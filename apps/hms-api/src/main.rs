//! HMS 告警核心 HTTP 服务：体征事件接入、告警查询与处置、组织变更、指标快照。

mod handlers;
mod ingest;
mod routes;
mod state;
mod utils;

#[cfg(test)]
mod tests;

use axum::{
    Json, Router,
    body::Body,
    http::{HeaderValue, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use domain::ChannelKind;
use hms_config::AppConfig;
use hms_notify::{InboxChannel, MqttGateway, MqttGatewayConfig, NotificationChannel};
use hms_storage::{
    PgAlertRuleStore, PgAlertStore, PgClosureStore, PgManagerStore, PgNotificationTaskStore,
    PgOrgNodeStore, PgSubjectStore, RedisInboxStore, RedisThrottleStore, connect_pool,
    connect_redis,
};
use hms_telemetry::{init_tracing, new_request_ids};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, info};

pub use state::{AppState, Stores};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    // Postgres 为权威存储；Redis 承载节流计数器与站内信
    let pool = connect_pool(&config.database_url).await?;
    let redis = connect_redis(&config.redis_url)?;
    let stores = Stores {
        org_nodes: Arc::new(PgOrgNodeStore::new(pool.clone())),
        closure: Arc::new(PgClosureStore::new(pool.clone())),
        managers: Arc::new(PgManagerStore::new(pool.clone())),
        subjects: Arc::new(PgSubjectStore::new(pool.clone())),
        rules: Arc::new(PgAlertRuleStore::new(pool.clone())),
        alerts: Arc::new(PgAlertStore::new(pool.clone())),
        tasks: Arc::new(PgNotificationTaskStore::new(pool)),
        throttle: Arc::new(RedisThrottleStore::new(redis.clone())),
    };

    // 站内信直接写收件箱；推送/短信/邮件经 MQTT 网关桥接
    let (gateway, _gateway_loop) = MqttGateway::connect(MqttGatewayConfig {
        host: config.mqtt_host.clone(),
        port: config.mqtt_port,
        username: config.mqtt_username.clone(),
        password: config.mqtt_password.clone(),
        topic_prefix: config.mqtt_notify_topic_prefix.clone(),
    })?;
    let channels: Vec<Arc<dyn NotificationChannel>> = vec![
        Arc::new(InboxChannel::new(Arc::new(RedisInboxStore::new(redis)))),
        Arc::new(gateway.channel(ChannelKind::Push)),
        Arc::new(gateway.channel(ChannelKind::Sms)),
        Arc::new(gateway.channel(ChannelKind::Email)),
    ];

    let state = AppState::assemble(&config, stores, channels);
    let _workers = state.notify.start();
    let _monitor = state
        .monitor
        .clone()
        .spawn(AppState::monitor_interval(&config));
    let _ingest = ingest::spawn_ingest(&config, state.pipeline.clone());
    let _eviction = ingest::spawn_history_eviction(state.pipeline.clone());

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!(target: "hms.api", addr = %config.http_addr, "http_listening");
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api", routes::create_api_router())
        .with_state(state)
        // 注入 request_id/trace_id
        .layer(middleware::from_fn(request_context))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    let ids = new_request_ids();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    req.extensions_mut().insert(ids.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %ids.request_id,
        trace_id = %ids.trace_id,
        method = %method,
        path = %path
    );

    let mut response = next.run(req).instrument(span).await;
    response.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_str(&ids.request_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response.headers_mut().insert(
        "x-trace-id",
        HeaderValue::from_str(&ids.trace_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response
}
