use async_trait::async_trait;
use domain::{
    AlertRecord, AlertRule, AlertStatus, ChannelKind, Comparison, ManagerEntry, RawVitalEvent,
    RuleExpression, Severity, TenantContext,
};
use hms_escalation::EscalationResolver;
use hms_hierarchy::OrgHierarchyIndex;
use hms_notify::{
    InboxChannel, NotificationChannelManager, NotifyConfig, OverflowPolicy,
    PriorityDispatchQueue, QueueConfig,
};
use hms_pipeline::{
    AlertDispatcher, AlertPipeline, DispatchPermit, ManagerDispatcher, PipelineConfig,
    PipelineError, PipelineStores,
};
use hms_rules::RuleCache;
use hms_storage::{
    AlertQuery, AlertStore, InMemoryAlertRuleStore, InMemoryAlertStore, InMemoryClosureStore,
    InMemoryInboxStore, InMemoryManagerStore, InMemoryNotificationTaskStore, InMemoryOrgNodeStore,
    InMemorySubjectStore, InMemoryThrottleStore, InboxStore,
};
use hms_telemetry::TelemetryMetrics;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TENANT: &str = "tenant-1";
const T0: i64 = 1_700_000_000_000;

#[derive(Default)]
struct RecordingDispatcher {
    full: bool,
    dispatched: Mutex<Vec<(String, Vec<ChannelKind>)>>,
}

impl RecordingDispatcher {
    fn dispatched(&self) -> Vec<(String, Vec<ChannelKind>)> {
        self.dispatched.lock().expect("dispatched").clone()
    }
}

#[async_trait]
impl AlertDispatcher for RecordingDispatcher {
    async fn reserve(
        &self,
        _tenant_id: &str,
        _org_id: &str,
        alerts: usize,
    ) -> Result<DispatchPermit, PipelineError> {
        if self.full {
            return Err(PipelineError::Backpressure(format!(
                "no room for {} alerts",
                alerts
            )));
        }
        Ok(DispatchPermit::unreserved())
    }

    async fn dispatch(
        &self,
        alert: &AlertRecord,
        channels: &[ChannelKind],
        _permit: &mut DispatchPermit,
    ) -> Result<(), PipelineError> {
        self.dispatched
            .lock()
            .expect("dispatched")
            .push((alert.alert_id.clone(), channels.to_vec()));
        Ok(())
    }
}

fn heart_rate_rule() -> AlertRule {
    let expression = RuleExpression::Threshold {
        op: Comparison::Gt,
        value: 120.0,
    };
    AlertRule {
        rule_id: "hr-high".to_string(),
        tenant_id: TENANT.to_string(),
        rule_type: expression.rule_type(),
        metric: "heartRate".to_string(),
        expression,
        severity: Severity::Major,
        notify_channels: vec![ChannelKind::InApp, ChannelKind::Push],
        enabled: true,
        created_at_ms: 0,
    }
}

fn heart_rate(value: f64, ts_ms: i64) -> RawVitalEvent {
    RawVitalEvent {
        event_id: None,
        source: Some("mqtt".to_string()),
        tenant_id: Some(TENANT.to_string()),
        subject_id: Some("subject-1".to_string()),
        device_sn: Some("SN-1".to_string()),
        metric: Some("heartRate".to_string()),
        value: Some(value),
        unit: Some("bpm".to_string()),
        timestamp_ms: Some(ts_ms),
        received_at_ms: ts_ms,
    }
}

struct Harness {
    pipeline: AlertPipeline,
    alerts: Arc<InMemoryAlertStore>,
    throttle: Arc<InMemoryThrottleStore>,
    metrics: Arc<TelemetryMetrics>,
}

fn harness(dispatcher: Arc<dyn AlertDispatcher>, bind_subject: bool) -> Harness {
    harness_with_rule(dispatcher, bind_subject, heart_rate_rule())
}

fn harness_with_rule(
    dispatcher: Arc<dyn AlertDispatcher>,
    bind_subject: bool,
    rule: AlertRule,
) -> Harness {
    let rules = Arc::new(InMemoryAlertRuleStore::new());
    rules.upsert_rule(rule).expect("rule");
    let subjects = Arc::new(InMemorySubjectStore::new());
    if bind_subject {
        subjects.bind(TENANT, "subject-1", "ward-1").expect("bind");
    }
    let alerts = Arc::new(InMemoryAlertStore::new());
    let throttle = Arc::new(InMemoryThrottleStore::new());
    let metrics = Arc::new(TelemetryMetrics::new());
    let pipeline = AlertPipeline::new(
        PipelineConfig {
            throttle_window: Duration::from_secs(60),
            ..PipelineConfig::default()
        },
        Arc::new(RuleCache::new(rules)),
        PipelineStores {
            subjects,
            alerts: alerts.clone(),
            throttle: throttle.clone(),
        },
        dispatcher,
        metrics.clone(),
    );
    Harness {
        pipeline,
        alerts,
        throttle,
        metrics,
    }
}

/// 接入真实通知管理器的流水线：`ward-1` 隶属 `hospital`，`ward-1` 的负责人为 `nurses`。
struct ManagedHarness {
    harness: Harness,
    manager: Arc<NotificationChannelManager>,
    inbox: Arc<InMemoryInboxStore>,
}

async fn managed_harness(queue: QueueConfig, nurses: &[&str]) -> ManagedHarness {
    let index = Arc::new(OrgHierarchyIndex::new(
        Arc::new(InMemoryClosureStore::new()),
        Arc::new(InMemoryOrgNodeStore::new()),
    ));
    index.add_node(TENANT, "hospital", None).await.expect("root");
    index
        .add_node(TENANT, "ward-1", Some("hospital"))
        .await
        .expect("ward");
    let managers = Arc::new(InMemoryManagerStore::new());
    for nurse in nurses {
        managers
            .assign(ManagerEntry {
                org_id: "ward-1".to_string(),
                tenant_id: TENANT.to_string(),
                user_id: nurse.to_string(),
                role_type: "manager".to_string(),
            })
            .expect("assign");
    }
    let resolver = Arc::new(EscalationResolver::new(index, managers));
    let inbox = Arc::new(InMemoryInboxStore::new());
    let alerts = Arc::new(InMemoryAlertStore::new());
    let metrics = Arc::new(TelemetryMetrics::new());
    let manager = Arc::new(
        NotificationChannelManager::new(
            NotifyConfig::default(),
            Arc::new(PriorityDispatchQueue::new(queue)),
            alerts.clone(),
            Arc::new(InMemoryNotificationTaskStore::new()),
            resolver,
            metrics.clone(),
        )
        .with_channel(Arc::new(InboxChannel::new(inbox.clone()))),
    );

    let rules = Arc::new(InMemoryAlertRuleStore::new());
    rules.upsert_rule(heart_rate_rule()).expect("rule");
    let subjects = Arc::new(InMemorySubjectStore::new());
    subjects.bind(TENANT, "subject-1", "ward-1").expect("bind");
    let throttle = Arc::new(InMemoryThrottleStore::new());
    let pipeline = AlertPipeline::new(
        PipelineConfig::default(),
        Arc::new(RuleCache::new(rules)),
        PipelineStores {
            subjects,
            alerts: alerts.clone(),
            throttle: throttle.clone(),
        },
        Arc::new(ManagerDispatcher::new(manager.clone())),
        metrics.clone(),
    );
    ManagedHarness {
        harness: Harness {
            pipeline,
            alerts,
            throttle,
            metrics,
        },
        manager,
        inbox,
    }
}

#[tokio::test]
async fn duplicate_alerts_are_throttled_within_window() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let h = harness(dispatcher.clone(), true);

    let first = h.pipeline.handle_raw_at(heart_rate(150.0, T0), T0).await.expect("first");
    assert_eq!(first.created.len(), 1);
    let alert = &first.created[0];
    assert_eq!(alert.status, AlertStatus::New);
    assert_eq!(alert.severity, Severity::Major);
    assert_eq!(alert.org_id, "ward-1");
    assert_eq!(alert.value, 150.0);

    let second = h
        .pipeline
        .handle_raw_at(heart_rate(150.0, T0 + 10_000), T0 + 10_000)
        .await
        .expect("second");
    assert!(second.created.is_empty());
    assert_eq!(second.suppressed, 1);

    let third = h
        .pipeline
        .handle_raw_at(heart_rate(150.0, T0 + 120_000), T0 + 120_000)
        .await
        .expect("third");
    assert_eq!(third.created.len(), 1);
    assert_eq!(third.created[0].dedup_key, alert.dedup_key);
    assert_ne!(third.created[0].alert_id, alert.alert_id);

    let ctx = TenantContext::system(TENANT);
    let stored = h.alerts.list_alerts(&ctx, &AlertQuery::default()).await.expect("list");
    assert_eq!(stored.len(), 2);
    let dispatched = dispatcher.dispatched();
    assert_eq!(dispatched.len(), 2);
    assert_eq!(dispatched[0].1, vec![ChannelKind::InApp, ChannelKind::Push]);

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.events_received, 3);
    assert_eq!(snapshot.alerts_created, 2);
    assert_eq!(snapshot.alerts_suppressed, 1);
}

#[tokio::test]
async fn normal_values_produce_no_alert() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let h = harness(dispatcher.clone(), true);
    let outcome = h.pipeline.handle_raw_at(heart_rate(80.0, T0), T0).await.expect("ok");
    assert_eq!(outcome.candidates, 0);
    assert!(outcome.created.is_empty());
    assert!(dispatcher.dispatched().is_empty());
}

#[tokio::test]
async fn invalid_event_is_rejected_and_counted() {
    let h = harness(Arc::new(RecordingDispatcher::default()), true);
    let mut raw = heart_rate(150.0, T0);
    raw.subject_id = None;
    let err = h.pipeline.handle_raw_at(raw, T0).await.expect_err("missing subject");
    assert!(matches!(err, PipelineError::Validation(_)));

    let future = heart_rate(150.0, T0 + 3_600_000);
    let err = h.pipeline.handle_raw_at(future, T0).await.expect_err("future");
    assert!(matches!(err, PipelineError::Validation(_)));

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.events_invalid, 2);
    assert_eq!(snapshot.alerts_created, 0);
}

#[tokio::test]
async fn backpressure_rejects_without_consuming_throttle_window() {
    let full = Arc::new(RecordingDispatcher {
        full: true,
        ..RecordingDispatcher::default()
    });
    let h = harness(full, true);
    let err = h
        .pipeline
        .handle_raw_at(heart_rate(150.0, T0), T0)
        .await
        .expect_err("backpressure");
    assert!(matches!(err, PipelineError::Backpressure(_)));
    assert_eq!(h.metrics.snapshot().backpressure, 1);

    let ctx = TenantContext::system(TENANT);
    let stored = h.alerts.list_alerts(&ctx, &AlertQuery::default()).await.expect("list");
    assert!(stored.is_empty());
}

#[tokio::test]
async fn unassigned_subject_creates_no_alert() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let h = harness(dispatcher.clone(), false);
    let outcome = h.pipeline.handle_raw_at(heart_rate(150.0, T0), T0).await.expect("ok");
    assert_eq!(outcome.candidates, 1);
    assert_eq!(outcome.unassigned, 1);
    assert!(outcome.created.is_empty());
    assert!(dispatcher.dispatched().is_empty());
}

#[tokio::test]
async fn rule_cache_is_loaded_on_first_event() {
    let h = harness(Arc::new(RecordingDispatcher::default()), true);
    assert!(!h.pipeline.rule_cache().is_cached(TENANT));
    let outcome = h.pipeline.handle_raw_at(heart_rate(110.0, T0), T0).await.expect("ok");
    assert_eq!(outcome.candidates, 0);
    assert!(h.pipeline.rule_cache().is_cached(TENANT));
    h.pipeline.rule_cache().invalidate(TENANT);
    assert!(!h.pipeline.rule_cache().is_cached(TENANT));
}

#[tokio::test]
async fn alert_reaches_manager_inbox() {
    let managed = managed_harness(QueueConfig::default(), &["nurse-1"]).await;
    let workers = managed.manager.start();

    let now = hms_telemetry::now_epoch_ms();
    let outcome = managed
        .harness
        .pipeline
        .handle_raw_at(heart_rate(150.0, now), now)
        .await
        .expect("ok");
    assert_eq!(outcome.created.len(), 1);
    let alert_id = outcome.created[0].alert_id.clone();

    let ctx = TenantContext::system(TENANT);
    let mut delivered = Vec::new();
    for _ in 0..100 {
        delivered = managed
            .inbox
            .list_messages(&ctx, "nurse-1", 10)
            .await
            .expect("inbox");
        if !delivered.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].alert_id, alert_id);

    let stored = managed
        .harness
        .alerts
        .find_alert(&ctx, &alert_id)
        .await
        .expect("find")
        .expect("alert");
    assert_eq!(stored.status, AlertStatus::Pending);

    managed.manager.shutdown();
    for worker in workers {
        worker.abort();
    }
}

#[tokio::test]
async fn reject_policy_backpressures_when_recipients_exceed_queue() {
    let queue = QueueConfig {
        capacity: 1,
        overflow: OverflowPolicy::Reject,
    };
    let managed = managed_harness(queue, &["nurse-1", "nurse-2", "nurse-3"]).await;
    let h = &managed.harness;

    let err = h
        .pipeline
        .handle_raw_at(heart_rate(150.0, T0), T0)
        .await
        .expect_err("three recipients cannot fit one slot");
    assert!(matches!(err, PipelineError::Backpressure(_)));

    let ctx = TenantContext::system(TENANT);
    let stored = h.alerts.list_alerts(&ctx, &AlertQuery::default()).await.expect("list");
    assert!(stored.is_empty());
    assert_eq!(h.throttle.live_counters(T0), 0);
    let queue = managed.manager.queue();
    assert!(queue.is_empty());
    assert_eq!(queue.reserved(), 0);
    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.backpressure, 1);
    assert_eq!(snapshot.alerts_created, 0);
}

#[tokio::test]
async fn reject_policy_enqueues_every_first_level_recipient() {
    let queue = QueueConfig {
        capacity: 3,
        overflow: OverflowPolicy::Reject,
    };
    let managed = managed_harness(queue, &["nurse-1", "nurse-2", "nurse-3"]).await;
    let h = &managed.harness;

    let outcome = h
        .pipeline
        .handle_raw_at(heart_rate(150.0, T0), T0)
        .await
        .expect("fits exactly");
    assert_eq!(outcome.created.len(), 1);
    let queue = managed.manager.queue();
    assert_eq!(queue.len(), 3);
    assert_eq!(queue.reserved(), 0);

    // 队列已满：去重窗口过后的下一条告警在建档前被拒绝
    let err = h
        .pipeline
        .handle_raw_at(heart_rate(150.0, T0 + 120_000), T0 + 120_000)
        .await
        .expect_err("queue full");
    assert!(matches!(err, PipelineError::Backpressure(_)));
    assert_eq!(h.metrics.snapshot().alerts_created, 1);
    assert_eq!(h.metrics.snapshot().backpressure, 1);
    managed.manager.shutdown();
}

#[tokio::test]
async fn rule_written_with_metric_alias_matches_normalized_event() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let mut rule = heart_rate_rule();
    rule.metric = "heart_rate".to_string();
    let h = harness_with_rule(dispatcher.clone(), true, rule);

    let mut raw = heart_rate(150.0, T0);
    raw.metric = Some("heart_rate".to_string());
    let outcome = h.pipeline.handle_raw_at(raw, T0).await.expect("ok");
    assert_eq!(outcome.candidates, 1);
    assert_eq!(outcome.created.len(), 1);
    assert_eq!(outcome.created[0].metric, "heartRate");
    assert_eq!(dispatcher.dispatched().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_events_create_one_alert() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let h = harness(dispatcher.clone(), true);
    let barrier = Arc::new(tokio::sync::Barrier::new(16));
    let mut handles = Vec::new();
    for _ in 0..16 {
        let pipeline = h.pipeline.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            pipeline.handle_raw_at(heart_rate(150.0, T0), T0).await
        }));
    }
    let mut created = 0;
    let mut suppressed = 0;
    for handle in handles {
        let outcome = handle.await.expect("join").expect("processed");
        created += outcome.created.len();
        suppressed += outcome.suppressed;
    }
    assert_eq!(created, 1);
    assert_eq!(suppressed, 15);

    let ctx = TenantContext::system(TENANT);
    let stored = h.alerts.list_alerts(&ctx, &AlertQuery::default()).await.expect("list");
    assert_eq!(stored.len(), 1);
    assert_eq!(dispatcher.dispatched().len(), 1);
}
