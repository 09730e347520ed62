use async_trait::async_trait;
use domain::{
    AlertRecord, AlertStatus, ChannelKind, DeliveryStatus, ManagerEntry, Severity, TenantContext,
};
use hms_escalation::EscalationResolver;
use hms_hierarchy::OrgHierarchyIndex;
use hms_notify::{
    ChannelError, ChannelMessage, ClassPolicy, NotificationChannel, NotificationChannelManager,
    NotifyConfig, PriorityDispatchQueue, QueueConfig,
};
use hms_storage::{
    AlertStore, InMemoryAlertStore, InMemoryClosureStore, InMemoryManagerStore,
    InMemoryNotificationTaskStore, InMemoryOrgNodeStore, NotificationTaskStore,
};
use hms_telemetry::{MonitorProbe, TelemetryMetrics};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TENANT: &str = "tenant-1";

/// 按脚本返回失败的测试通道。
struct ScriptedChannel {
    kind: ChannelKind,
    sent: Mutex<Vec<ChannelMessage>>,
    attempts: Mutex<usize>,
    script: Mutex<VecDeque<ChannelError>>,
    always_fail: Option<ChannelError>,
}

impl ScriptedChannel {
    fn new(kind: ChannelKind) -> Arc<Self> {
        Self::build(kind, Vec::new(), None)
    }

    fn failing(kind: ChannelKind) -> Arc<Self> {
        Self::build(
            kind,
            Vec::new(),
            Some(ChannelError::Permanent(format!("{} gateway down", kind.as_str()))),
        )
    }

    fn build(kind: ChannelKind, script: Vec<ChannelError>, always_fail: Option<ChannelError>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            sent: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
            script: Mutex::new(script.into()),
            always_fail,
        })
    }

    fn sent(&self) -> Vec<ChannelMessage> {
        self.sent.lock().expect("sent").clone()
    }

    fn attempts(&self) -> usize {
        *self.attempts.lock().expect("attempts")
    }
}

#[async_trait]
impl NotificationChannel for ScriptedChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, message: &ChannelMessage) -> Result<(), ChannelError> {
        *self.attempts.lock().expect("attempts") += 1;
        if let Some(err) = self.script.lock().expect("script").pop_front() {
            return Err(err);
        }
        if let Some(err) = &self.always_fail {
            return Err(err.clone());
        }
        self.sent.lock().expect("sent").push(message.clone());
        Ok(())
    }
}

struct Harness {
    manager: Arc<NotificationChannelManager>,
    alerts: Arc<InMemoryAlertStore>,
    tasks: Arc<InMemoryNotificationTaskStore>,
    metrics: Arc<TelemetryMetrics>,
}

fn policy() -> ClassPolicy {
    ClassPolicy {
        workers: 1,
        max_attempts: 3,
        backoff_base_ms: 10,
        backoff_cap_ms: 40,
    }
}

fn manager_entry(org: &str, user: &str) -> ManagerEntry {
    ManagerEntry {
        org_id: org.to_string(),
        tenant_id: TENANT.to_string(),
        user_id: user.to_string(),
        role_type: "manager".to_string(),
    }
}

/// 组织树 A ← B；B 的负责人 nurse-b，A 的负责人 head-a。
async fn harness(channels: Vec<Arc<ScriptedChannel>>, with_managers: bool) -> Harness {
    let index = Arc::new(OrgHierarchyIndex::new(
        Arc::new(InMemoryClosureStore::new()),
        Arc::new(InMemoryOrgNodeStore::new()),
    ));
    index.add_node(TENANT, "A", None).await.expect("A");
    index.add_node(TENANT, "B", Some("A")).await.expect("B");
    let managers = Arc::new(InMemoryManagerStore::new());
    if with_managers {
        managers.assign(manager_entry("B", "nurse-b")).expect("assign");
        managers.assign(manager_entry("A", "head-a")).expect("assign");
    }
    let resolver = Arc::new(EscalationResolver::new(index, managers));
    let alerts = Arc::new(InMemoryAlertStore::new());
    let tasks = Arc::new(InMemoryNotificationTaskStore::new());
    let metrics = Arc::new(TelemetryMetrics::new());
    let config = NotifyConfig {
        escalation_role: "manager".to_string(),
        realtime: policy(),
        async_class: policy(),
        third_party: policy(),
    };
    let mut manager = NotificationChannelManager::new(
        config,
        Arc::new(PriorityDispatchQueue::new(QueueConfig::default())),
        alerts.clone(),
        tasks.clone(),
        resolver,
        metrics.clone(),
    );
    for channel in channels {
        manager = manager.with_channel(channel);
    }
    let manager = Arc::new(manager);
    manager.start();
    Harness {
        manager,
        alerts,
        tasks,
        metrics,
    }
}

fn ctx() -> TenantContext {
    TenantContext::system(TENANT)
}

async fn create_alert(harness: &Harness, alert_id: &str, org_id: &str, severity: Severity) -> AlertRecord {
    let record = AlertRecord {
        alert_id: alert_id.to_string(),
        tenant_id: TENANT.to_string(),
        subject_id: "subject-1".to_string(),
        org_id: org_id.to_string(),
        rule_id: "rule-1".to_string(),
        metric: "heartRate".to_string(),
        value: 150.0,
        severity,
        status: AlertStatus::New,
        occurred_at_ms: 1_000,
        created_at_ms: 1_000,
        dedup_key: "dedup".to_string(),
        escalation_level: 0,
        delivery_status: DeliveryStatus::Pending,
        failures: Vec::new(),
        acked_by: None,
        acked_at_ms: None,
    };
    harness
        .alerts
        .create_alert(&ctx(), record)
        .await
        .expect("create alert")
}

async fn stored(harness: &Harness, alert_id: &str) -> AlertRecord {
    harness
        .alerts
        .find_alert(&ctx(), alert_id)
        .await
        .expect("find")
        .expect("alert exists")
}

async fn settle() {
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

fn recipients(channel: &ScriptedChannel) -> Vec<(String, u32)> {
    channel
        .sent()
        .into_iter()
        .map(|message| (message.recipient_id, message.escalation_level))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn critical_alert_escalates_after_fifteen_minutes() {
    let push = ScriptedChannel::new(ChannelKind::Push);
    let harness = harness(vec![push.clone()], true).await;
    let alert = create_alert(&harness, "alert-1", "B", Severity::Critical).await;

    let report = harness
        .manager
        .dispatch_alert(&alert, &[ChannelKind::Push])
        .await
        .expect("dispatch");
    assert_eq!(report.recipients, vec!["nurse-b".to_string()]);
    settle().await;
    assert_eq!(recipients(&push), vec![("nurse-b".to_string(), 0)]);
    let record = stored(&harness, "alert-1").await;
    assert_eq!(record.status, AlertStatus::Pending);
    assert_eq!(record.delivery_status, DeliveryStatus::Delivered);

    tokio::time::sleep(Duration::from_secs(14 * 60)).await;
    assert_eq!(stored(&harness, "alert-1").await.escalation_level, 0);

    tokio::time::sleep(Duration::from_secs(61)).await;
    settle().await;
    let record = stored(&harness, "alert-1").await;
    assert_eq!(record.escalation_level, 1);
    assert_eq!(record.status, AlertStatus::Pending);
    assert_eq!(
        recipients(&push),
        vec![("nurse-b".to_string(), 0), ("head-a".to_string(), 1)]
    );
    assert_eq!(harness.metrics.snapshot().escalations, 1);
    assert_eq!(harness.manager.current_level("alert-1").await, Some(1));
}

#[tokio::test(start_paused = true)]
async fn acknowledgement_at_ten_minutes_prevents_escalation() {
    let push = ScriptedChannel::new(ChannelKind::Push);
    let harness = harness(vec![push.clone()], true).await;
    let alert = create_alert(&harness, "alert-1", "B", Severity::Critical).await;
    harness
        .manager
        .dispatch_alert(&alert, &[ChannelKind::Push])
        .await
        .expect("dispatch");
    settle().await;

    tokio::time::sleep(Duration::from_secs(10 * 60)).await;
    let acked = harness
        .manager
        .acknowledge(&ctx(), "alert-1", "nurse-b")
        .await
        .expect("ack");
    assert!(acked);
    assert!(
        !harness
            .manager
            .acknowledge(&ctx(), "alert-1", "head-a")
            .await
            .expect("second ack")
    );

    tokio::time::sleep(Duration::from_secs(20 * 60)).await;
    settle().await;
    let record = stored(&harness, "alert-1").await;
    assert_eq!(record.status, AlertStatus::Acked);
    assert_eq!(record.escalation_level, 0);
    assert_eq!(record.acked_by.as_deref(), Some("nurse-b"));
    assert_eq!(record.delivery_status, DeliveryStatus::Acknowledged);
    assert_eq!(recipients(&push).len(), 1);
    assert_eq!(harness.manager.active_alerts().await, 0);

    let tasks = harness.tasks.list_tasks(&ctx(), "alert-1").await.expect("tasks");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].delivery_status, DeliveryStatus::Acknowledged);
}

#[tokio::test(start_paused = true)]
async fn failed_primary_channel_falls_back_to_next() {
    let push = ScriptedChannel::failing(ChannelKind::Push);
    let sms = ScriptedChannel::new(ChannelKind::Sms);
    let harness = harness(vec![push.clone(), sms.clone()], true).await;
    let alert = create_alert(&harness, "alert-1", "B", Severity::Major).await;
    harness
        .manager
        .dispatch_alert(&alert, &[ChannelKind::Push, ChannelKind::Sms])
        .await
        .expect("dispatch");
    settle().await;

    assert_eq!(push.attempts(), 1);
    assert_eq!(recipients(&sms), vec![("nurse-b".to_string(), 0)]);
    let record = stored(&harness, "alert-1").await;
    assert_eq!(record.delivery_status, DeliveryStatus::Delivered);
    assert_eq!(record.escalation_level, 0);
    assert_eq!(record.failures.len(), 1);
    assert_eq!(record.failures[0].channel, ChannelKind::Push);
    assert_eq!(harness.metrics.snapshot().fallbacks, 1);
}

#[tokio::test(start_paused = true)]
async fn whole_notify_list_failing_marks_failed_and_escalates() {
    let push = ScriptedChannel::failing(ChannelKind::Push);
    let sms = ScriptedChannel::failing(ChannelKind::Sms);
    let harness = harness(vec![push.clone(), sms.clone()], true).await;
    let alert = create_alert(&harness, "alert-1", "B", Severity::Major).await;
    harness
        .manager
        .dispatch_alert(&alert, &[ChannelKind::Push, ChannelKind::Sms])
        .await
        .expect("dispatch");
    settle().await;

    let record = stored(&harness, "alert-1").await;
    // 第 0 层全部失败后立即升级到第 1 层，第 1 层同样失败
    assert_eq!(record.escalation_level, 1);
    assert_eq!(record.delivery_status, DeliveryStatus::Failed);
    assert_eq!(record.failures.len(), 4);
    assert!(
        record
            .failures
            .iter()
            .any(|failure| failure.channel == ChannelKind::Sms && failure.reason.contains("gateway down"))
    );
    assert_eq!(push.attempts(), 2);
    assert_eq!(sms.attempts(), 2);

    // HIGH 的确认超时为 60 分钟，升级链已耗尽，到期后过期
    tokio::time::sleep(Duration::from_secs(61 * 60)).await;
    settle().await;
    let record = stored(&harness, "alert-1").await;
    assert_eq!(record.status, AlertStatus::Expired);
    assert_eq!(record.delivery_status, DeliveryStatus::Expired);
    assert_eq!(harness.metrics.snapshot().expirations, 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried_with_backoff() {
    let push = ScriptedChannel::build(
        ChannelKind::Push,
        vec![ChannelError::Transient("timeout".to_string())],
        None,
    );
    let harness = harness(vec![push.clone()], true).await;
    let alert = create_alert(&harness, "alert-1", "B", Severity::Minor).await;
    harness
        .manager
        .dispatch_alert(&alert, &[ChannelKind::Push])
        .await
        .expect("dispatch");
    settle().await;

    assert_eq!(push.attempts(), 2);
    assert_eq!(push.sent().len(), 1);
    let tasks = harness.tasks.list_tasks(&ctx(), "alert-1").await.expect("tasks");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].retry_count, 1);
    assert_eq!(tasks[0].delivery_status, DeliveryStatus::Delivered);
    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.delivery_attempts, 2);
    assert_eq!(snapshot.delivery_attempt_failures, 1);
    assert!(stored(&harness, "alert-1").await.failures.is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_chain_expires_delivered_alert() {
    let push = ScriptedChannel::new(ChannelKind::Push);
    let harness = harness(vec![push.clone()], true).await;
    // A 为根，升级链只有一层
    let alert = create_alert(&harness, "alert-1", "A", Severity::Critical).await;
    harness
        .manager
        .dispatch_alert(&alert, &[ChannelKind::Push])
        .await
        .expect("dispatch");
    settle().await;
    assert_eq!(recipients(&push), vec![("head-a".to_string(), 0)]);

    tokio::time::sleep(Duration::from_secs(15 * 60 + 1)).await;
    settle().await;
    let record = stored(&harness, "alert-1").await;
    assert_eq!(record.status, AlertStatus::Expired);
    let tasks = harness.tasks.list_tasks(&ctx(), "alert-1").await.expect("tasks");
    assert_eq!(tasks[0].delivery_status, DeliveryStatus::Expired);
    assert_eq!(harness.manager.active_alerts().await, 0);
}

#[tokio::test(start_paused = true)]
async fn resolve_cancels_pending_escalation() {
    let push = ScriptedChannel::new(ChannelKind::Push);
    let harness = harness(vec![push.clone()], true).await;
    let alert = create_alert(&harness, "alert-1", "B", Severity::Critical).await;
    harness
        .manager
        .dispatch_alert(&alert, &[ChannelKind::Push])
        .await
        .expect("dispatch");
    settle().await;

    assert!(harness.manager.resolve(&ctx(), "alert-1").await.expect("resolve"));
    assert!(!harness.manager.resolve(&ctx(), "alert-1").await.expect("again"));
    tokio::time::sleep(Duration::from_secs(30 * 60)).await;
    settle().await;
    let record = stored(&harness, "alert-1").await;
    assert_eq!(record.status, AlertStatus::Resolved);
    assert_eq!(record.escalation_level, 0);
    assert_eq!(recipients(&push).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_recipients_are_reported_as_failure() {
    let push = ScriptedChannel::new(ChannelKind::Push);
    let harness = harness(vec![push.clone()], false).await;
    let alert = create_alert(&harness, "alert-1", "B", Severity::Info).await;
    let report = harness
        .manager
        .dispatch_alert(&alert, &[ChannelKind::Push])
        .await
        .expect("dispatch");
    assert!(report.recipients.is_empty());
    assert_eq!(report.enqueued, 0);
    let record = stored(&harness, "alert-1").await;
    assert_eq!(record.delivery_status, DeliveryStatus::Failed);
    assert!(record.failures[0].reason.contains("no recipients"));
    assert_eq!(harness.manager.queue_depth().expect("depth"), 0);
    assert_eq!(harness.manager.worker_utilization().expect("utilization"), 0.0);
}
