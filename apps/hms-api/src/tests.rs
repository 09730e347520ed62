use crate::{AppState, Stores, build_router};
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use domain::{
    AlertRule, ChannelKind, Comparison, ManagerEntry, OrgNode, RuleExpression, Severity,
};
use hms_config::{AppConfig, ChannelClassConfig, OverflowPolicyKind};
use hms_notify::{InboxChannel, NotificationChannel};
use hms_storage::{
    InMemoryAlertRuleStore, InMemoryAlertStore, InMemoryClosureStore, InMemoryInboxStore,
    InMemoryManagerStore, InMemoryNotificationTaskStore, InMemoryOrgNodeStore,
    InMemorySubjectStore, InMemoryThrottleStore,
};
use hms_telemetry::now_epoch_ms;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

const TENANT: &str = "tenant-1";

fn class() -> ChannelClassConfig {
    ChannelClassConfig {
        workers: 1,
        max_attempts: 2,
        backoff_base_ms: 10,
        backoff_cap_ms: 20,
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        http_addr: "127.0.0.1:0".to_string(),
        database_url: "postgresql://unused".to_string(),
        redis_url: "redis://unused".to_string(),
        mqtt_host: "127.0.0.1".to_string(),
        mqtt_port: 1883,
        mqtt_username: None,
        mqtt_password: None,
        mqtt_event_topic_prefix: "hms/vitals".to_string(),
        mqtt_notify_topic_prefix: "hms/notify".to_string(),
        ingest_enabled: false,
        throttle_window_seconds: 60,
        event_max_future_skew_ms: 300_000,
        queue_capacity: 100,
        overflow_policy: OverflowPolicyKind::DropLowest,
        realtime: class(),
        async_class: class(),
        third_party: class(),
        escalation_role: "manager".to_string(),
        monitor_interval_seconds: 30,
        monitor_queue_depth_threshold: 1_000,
        monitor_latency_ms_threshold: 5_000,
        monitor_error_rate_threshold: 0.05,
        monitor_utilization_threshold: 0.9,
    }
}

struct TestApp {
    router: Router,
    state: AppState,
    /// 组织邻接表（由组织管理侧维护，测试中手工同步）
    nodes: Arc<InMemoryOrgNodeStore>,
}

fn node(id: &str, parent: Option<&str>) -> OrgNode {
    OrgNode {
        org_id: id.to_string(),
        parent_id: parent.map(str::to_string),
        tenant_id: TENANT.to_string(),
        status: "ACTIVE".to_string(),
        sort_order: 0,
    }
}

fn test_app() -> TestApp {
    let rules = Arc::new(InMemoryAlertRuleStore::new());
    let expression = RuleExpression::Threshold {
        op: Comparison::Gt,
        value: 120.0,
    };
    rules
        .upsert_rule(AlertRule {
            rule_id: "hr-high".to_string(),
            tenant_id: TENANT.to_string(),
            rule_type: expression.rule_type(),
            metric: "heartRate".to_string(),
            expression,
            severity: Severity::Major,
            notify_channels: vec![ChannelKind::InApp],
            enabled: true,
            created_at_ms: 0,
        })
        .expect("rule");
    let subjects = Arc::new(InMemorySubjectStore::new());
    subjects.bind(TENANT, "subject-1", "ward-1").expect("bind");
    let managers = Arc::new(InMemoryManagerStore::new());
    managers
        .assign(ManagerEntry {
            org_id: "ward-1".to_string(),
            tenant_id: TENANT.to_string(),
            user_id: "nurse-1".to_string(),
            role_type: "manager".to_string(),
        })
        .expect("assign");
    let nodes = Arc::new(InMemoryOrgNodeStore::new());
    let stores = Stores {
        org_nodes: nodes.clone(),
        closure: Arc::new(InMemoryClosureStore::new()),
        managers,
        subjects,
        rules,
        alerts: Arc::new(InMemoryAlertStore::new()),
        tasks: Arc::new(InMemoryNotificationTaskStore::new()),
        throttle: Arc::new(InMemoryThrottleStore::new()),
    };
    let channels: Vec<Arc<dyn NotificationChannel>> = vec![Arc::new(InboxChannel::new(
        Arc::new(InMemoryInboxStore::new()),
    ))];
    let state = AppState::assemble(&test_config(), stores, channels);
    TestApp {
        router: build_router(state.clone()),
        state,
        nodes,
    }
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json")
    };
    (status, json)
}

async fn org_event(app: &TestApp, operation: &str, node: &str, parent: Option<&str>) -> (StatusCode, Value) {
    call(
        &app.router,
        "POST",
        "/api/org-events",
        Some(json!({
            "operation": operation,
            "nodeId": node,
            "parentId": parent,
            "tenantId": TENANT,
        })),
    )
    .await
}

fn heart_rate_event(value: f64) -> Value {
    json!({
        "tenantId": TENANT,
        "subjectId": "subject-1",
        "deviceSn": "SN-1",
        "metric": "heartRate",
        "value": value,
        "unit": "bpm",
        "timestamp": now_epoch_ms(),
    })
}

#[tokio::test]
async fn health_reports_ok_with_request_ids() {
    let app = test_app();
    let request = Request::builder().uri("/health").body(Body::empty()).expect("request");
    let response = app.router.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert!(response.headers().contains_key("x-trace-id"));
}

#[tokio::test]
async fn event_creates_alert_that_can_be_acknowledged() {
    let app = test_app();
    let (status, _) = org_event(&app, "ADD", "hospital", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = org_event(&app, "ADD", "ward-1", Some("hospital")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app.router, "POST", "/api/events", Some(heart_rate_event(150.0))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["alertsCreated"], 1);
    let alert_id = body["data"]["alertIds"][0].as_str().expect("alert id").to_string();

    // 窗口内的重复事件被抑制
    let (_, body) = call(&app.router, "POST", "/api/events", Some(heart_rate_event(155.0))).await;
    assert_eq!(body["data"]["alertsCreated"], 0);
    assert_eq!(body["data"]["alertsSuppressed"], 1);

    let (status, body) = call(&app.router, "GET", &format!("/api/tenants/{TENANT}/alerts"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().expect("alerts").len(), 1);
    assert_eq!(body["data"][0]["orgId"], "ward-1");

    let (status, body) = call(
        &app.router,
        "GET",
        &format!("/api/tenants/{TENANT}/alerts/{alert_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["alert"]["status"], "PENDING");
    assert_eq!(body["data"]["tasks"][0]["recipientId"], "nurse-1");

    let ack_uri = format!("/api/tenants/{TENANT}/alerts/{alert_id}/ack");
    let (status, body) = call(&app.router, "POST", &ack_uri, Some(json!({ "userId": "nurse-1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["applied"], true);
    assert_eq!(body["data"]["status"], "ACKED");

    let (_, body) = call(&app.router, "POST", &ack_uri, Some(json!({ "userId": "nurse-2" }))).await;
    assert_eq!(body["data"]["applied"], false);
    assert_eq!(app.state.notify.active_alerts().await, 0);
}

#[tokio::test]
async fn invalid_event_is_rejected() {
    let app = test_app();
    let mut event = heart_rate_event(150.0);
    event["metric"] = Value::Null;
    let (status, body) = call(&app.router, "POST", "/api/events", Some(event)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID.REQUEST");
}

#[tokio::test]
async fn unknown_alert_is_not_found() {
    let app = test_app();
    let (status, body) = call(
        &app.router,
        "GET",
        &format!("/api/tenants/{TENANT}/alerts/missing"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "RESOURCE.NOT_FOUND");

    let (status, _) = call(
        &app.router,
        "GET",
        &format!("/api/tenants/{TENANT}/alerts?status=SNOOZED"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn org_events_reject_cycles_and_stay_consistent() {
    let app = test_app();
    for (id, parent) in [("A", None), ("B", Some("A")), ("C", Some("B"))] {
        app.nodes.upsert_node(node(id, parent)).expect("node");
        let (status, _) = org_event(&app, "ADD", id, parent).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = org_event(&app, "MOVE", "A", Some("C")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "HIERARCHY.CYCLE");

    let (status, body) = org_event(&app, "RENAME", "A", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID.REQUEST");

    app.nodes.upsert_node(node("C", Some("A"))).expect("reparent");
    let (status, body) = org_event(&app, "MOVE", "C", Some("A")).await;
    assert_eq!(status, StatusCode::OK);
    let invalidated = body["data"]["invalidatedOrgs"].as_array().expect("orgs");
    assert_eq!(invalidated.len(), 1);

    let (status, body) = call(
        &app.router,
        "GET",
        &format!("/api/tenants/{TENANT}/org/consistency"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["consistent"], true);

    let (status, body) = call(
        &app.router,
        "POST",
        &format!("/api/tenants/{TENANT}/org/rebuild"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["nodes"], 3);
    // A:1 + B:2 + C:2（C 已移到 A 下）
    assert_eq!(body["data"]["edges"], 5);
}

#[tokio::test]
async fn cache_invalidation_endpoints() {
    let app = test_app();
    let (status, body) = call(
        &app.router,
        "POST",
        &format!("/api/tenants/{TENANT}/rules/changed"),
        Some(json!({ "ruleId": "hr-high", "change": "UPDATED" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["ruleId"], "hr-high");
    assert!(!app.state.pipeline.rule_cache().is_cached(TENANT));

    let (status, _) = org_event(&app, "ADD", "ward-1", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(
        &app.router,
        "POST",
        &format!("/api/tenants/{TENANT}/managers/changed"),
        Some(json!({ "orgId": "ward-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["invalidatedOrgs"][0], "ward-1");
}

#[tokio::test]
async fn metrics_snapshot_counts_events() {
    let app = test_app();
    let mut event = heart_rate_event(150.0);
    event["subjectId"] = Value::Null;
    let (status, _) = call(&app.router, "POST", "/api/events", Some(event)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&app.router, "GET", "/api/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["eventsReceived"], 1);
    assert_eq!(body["data"]["eventsInvalid"], 1);
    assert_eq!(body["data"]["channels"].as_array().expect("channels").len(), 4);
}
