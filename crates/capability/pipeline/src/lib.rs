//! 告警流水线：标准化 → 规则匹配 → 组织归属 → 背压检查 → 去重节流 → 建档 → 派发。

pub mod dedup;

pub use dedup::{DeduplicationThrottle, ThrottleDecision, dedup_key};

use async_trait::async_trait;
use domain::{
    AlertRecord, AlertStatus, ChannelKind, DeliveryStatus, NormalizedEvent, RawVitalEvent,
    TenantContext,
};
use hms_ingest::{IngestError, RawEventHandler};
use hms_normalize::{NormalizeConfig, NormalizeError, Normalizer};
use hms_notify::{NotificationChannelManager, NotifyError, QueueReservation};
use hms_rules::{AlertCandidate, RuleCache, RuleEngine, RuleEngineConfig, RuleError};
use hms_storage::{AlertStore, StorageError, SubjectStore, ThrottleStore};
use hms_telemetry::{TelemetryMetrics, now_epoch_ms};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Pipeline 处理错误。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] NormalizeError),
    #[error("backpressure: {0}")]
    Backpressure(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error("dispatch error: {0}")]
    Dispatch(String),
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        PipelineError::Storage(err.to_string())
    }
}

impl From<NotifyError> for PipelineError {
    fn from(err: NotifyError) -> Self {
        match err {
            NotifyError::QueueFull(capacity) => {
                PipelineError::Backpressure(format!("dispatch queue full ({capacity})"))
            }
            other => PipelineError::Dispatch(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 去重窗口
    pub throttle_window: Duration,
    pub normalize: NormalizeConfig,
    pub engine: RuleEngineConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            throttle_window: Duration::from_secs(60),
            normalize: NormalizeConfig::default(),
            engine: RuleEngineConfig::default(),
        }
    }
}

impl PipelineConfig {
    fn sanitized(mut self) -> Self {
        if self.throttle_window.is_zero() {
            self.throttle_window = Duration::from_millis(1);
        }
        if self.engine.max_samples == 0 {
            self.engine.max_samples = 1;
        }
        self
    }
}

/// 派发许可：建档前预留的首层通知队列槽位，未用完的部分随许可释放。
#[derive(Debug, Default)]
pub struct DispatchPermit {
    reservation: Option<QueueReservation>,
}

impl DispatchPermit {
    /// 不占用任何队列槽位的许可。
    pub fn unreserved() -> Self {
        Self::default()
    }

    pub fn reserved(reservation: QueueReservation) -> Self {
        Self {
            reservation: Some(reservation),
        }
    }

    pub fn reservation_mut(&mut self) -> Option<&mut QueueReservation> {
        self.reservation.as_mut()
    }
}

/// 告警派发接口（通知层的接缝）。
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    /// 为组织下即将新建的 `alerts` 条告警一次性预留派发容量。
    ///
    /// 容量不足时返回 `PipelineError::Backpressure`，此时尚未占用去重窗口也未建档。
    async fn reserve(
        &self,
        tenant_id: &str,
        org_id: &str,
        alerts: usize,
    ) -> Result<DispatchPermit, PipelineError>;

    async fn dispatch(
        &self,
        alert: &AlertRecord,
        channels: &[ChannelKind],
        permit: &mut DispatchPermit,
    ) -> Result<(), PipelineError>;
}

/// 只建档不派发（离线回放、测试）。
pub struct NoopDispatcher;

#[async_trait]
impl AlertDispatcher for NoopDispatcher {
    async fn reserve(
        &self,
        _tenant_id: &str,
        _org_id: &str,
        _alerts: usize,
    ) -> Result<DispatchPermit, PipelineError> {
        Ok(DispatchPermit::unreserved())
    }

    async fn dispatch(
        &self,
        _alert: &AlertRecord,
        _channels: &[ChannelKind],
        _permit: &mut DispatchPermit,
    ) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// 基于通知通道管理器的派发实现。
pub struct ManagerDispatcher {
    manager: Arc<NotificationChannelManager>,
}

impl ManagerDispatcher {
    pub fn new(manager: Arc<NotificationChannelManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl AlertDispatcher for ManagerDispatcher {
    async fn reserve(
        &self,
        tenant_id: &str,
        org_id: &str,
        alerts: usize,
    ) -> Result<DispatchPermit, PipelineError> {
        let reservation = self
            .manager
            .reserve_dispatch(tenant_id, org_id, alerts)
            .await?;
        Ok(DispatchPermit::reserved(reservation))
    }

    async fn dispatch(
        &self,
        alert: &AlertRecord,
        channels: &[ChannelKind],
        permit: &mut DispatchPermit,
    ) -> Result<(), PipelineError> {
        let report = match permit.reservation_mut() {
            Some(reservation) => {
                self.manager
                    .dispatch_alert_reserved(alert, channels, reservation)
                    .await?
            }
            None => self.manager.dispatch_alert(alert, channels).await?,
        };
        debug!(
            target: "hms.pipeline",
            alert_id = %report.alert_id,
            recipients = report.recipients.len(),
            enqueued = report.enqueued,
            dropped = report.dropped,
            "alert_dispatched"
        );
        Ok(())
    }
}

/// 流水线依赖的存储集合。
#[derive(Clone)]
pub struct PipelineStores {
    pub subjects: Arc<dyn SubjectStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub throttle: Arc<dyn ThrottleStore>,
}

/// 单个事件的处理结果。
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    pub event_id: String,
    pub candidates: usize,
    pub created: Vec<AlertRecord>,
    pub suppressed: usize,
    /// 对象未绑定组织而丢弃的候选数
    pub unassigned: usize,
}

#[derive(Clone)]
pub struct AlertPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    normalizer: Normalizer,
    rules: Arc<RuleCache>,
    engine: RuleEngine,
    subjects: Arc<dyn SubjectStore>,
    alerts: Arc<dyn AlertStore>,
    throttle: DeduplicationThrottle,
    dispatcher: Arc<dyn AlertDispatcher>,
    metrics: Arc<TelemetryMetrics>,
}

impl AlertPipeline {
    pub fn new(
        config: PipelineConfig,
        rules: Arc<RuleCache>,
        stores: PipelineStores,
        dispatcher: Arc<dyn AlertDispatcher>,
        metrics: Arc<TelemetryMetrics>,
    ) -> Self {
        let config = config.sanitized();
        Self {
            inner: Arc::new(PipelineInner {
                normalizer: Normalizer::new(config.normalize),
                rules,
                engine: RuleEngine::new(config.engine),
                subjects: stores.subjects,
                alerts: stores.alerts,
                throttle: DeduplicationThrottle::new(stores.throttle, config.throttle_window),
                dispatcher,
                metrics,
            }),
        }
    }

    pub fn rule_cache(&self) -> &Arc<RuleCache> {
        &self.inner.rules
    }

    pub fn metrics(&self) -> &Arc<TelemetryMetrics> {
        &self.inner.metrics
    }

    /// 清理长时间无数据对象的规则历史。
    pub fn evict_idle(&self, before_ms: i64) -> usize {
        self.inner.engine.evict_idle(before_ms)
    }

    pub async fn handle_raw(&self, raw: RawVitalEvent) -> Result<ProcessOutcome, PipelineError> {
        self.handle_raw_at(raw, now_epoch_ms()).await
    }

    /// 以给定时刻处理原始事件（时间戳校验与去重窗口都以 `now_ms` 为准）。
    pub async fn handle_raw_at(
        &self,
        raw: RawVitalEvent,
        now_ms: i64,
    ) -> Result<ProcessOutcome, PipelineError> {
        let inner = &self.inner;
        inner.metrics.record_event_received();
        let source = raw.source.clone().unwrap_or_default();
        let event = match inner.normalizer.normalize(raw, now_ms) {
            Ok(event) => event,
            Err(err) => {
                inner.metrics.record_event_invalid();
                warn!(
                    target: "hms.pipeline",
                    source = %source,
                    error = %err,
                    "event_rejected"
                );
                return Err(err.into());
            }
        };
        self.process_at(event, now_ms).await
    }

    pub async fn process(&self, event: NormalizedEvent) -> Result<ProcessOutcome, PipelineError> {
        self.process_at(event, now_epoch_ms()).await
    }

    pub async fn process_at(
        &self,
        event: NormalizedEvent,
        now_ms: i64,
    ) -> Result<ProcessOutcome, PipelineError> {
        let started = Instant::now();
        let result = self.run(&event, now_ms).await;
        let inner = &self.inner;
        inner
            .metrics
            .record_processing_latency_ms(started.elapsed().as_millis() as u64);
        if let Err(err) = &result {
            if !matches!(err, PipelineError::Backpressure(_)) {
                inner.metrics.record_pipeline_error();
            }
            warn!(
                target: "hms.pipeline",
                tenant_id = %event.tenant_id,
                event_id = %event.event_id,
                error = %err,
                "event_processing_failed"
            );
        }
        result
    }

    async fn run(
        &self,
        event: &NormalizedEvent,
        now_ms: i64,
    ) -> Result<ProcessOutcome, PipelineError> {
        let inner = &self.inner;
        let mut outcome = ProcessOutcome {
            event_id: event.event_id.clone(),
            ..ProcessOutcome::default()
        };

        let rules = inner.rules.rules_for(&event.tenant_id).await?;
        let candidates = inner.engine.evaluate(event, &rules);
        outcome.candidates = candidates.len();
        inner.metrics.record_candidates(candidates.len() as u64);
        if candidates.is_empty() {
            return Ok(outcome);
        }

        let ctx = TenantContext::system(&event.tenant_id);
        let Some(org_id) = inner
            .subjects
            .find_subject_org(&ctx, &event.subject_id)
            .await?
        else {
            outcome.unassigned = candidates.len();
            inner.metrics.record_pipeline_error();
            warn!(
                target: "hms.pipeline",
                tenant_id = %event.tenant_id,
                subject_id = %event.subject_id,
                candidates = candidates.len(),
                "subject_unassigned"
            );
            return Ok(outcome);
        };

        // 在占用去重窗口与建档之前预留派发容量，拒绝的事件可整体重放
        let mut permit = match inner
            .dispatcher
            .reserve(&event.tenant_id, &org_id, candidates.len())
            .await
        {
            Ok(permit) => permit,
            Err(err) => {
                if matches!(err, PipelineError::Backpressure(_)) {
                    inner.metrics.record_backpressure();
                }
                return Err(err);
            }
        };

        for candidate in candidates {
            let key = dedup_key(
                &candidate.tenant_id,
                &candidate.subject_id,
                &candidate.metric,
                &candidate.rule_id,
            );
            match inner.throttle.check(&ctx, &key, now_ms).await? {
                ThrottleDecision::Suppress { hits } => {
                    outcome.suppressed += 1;
                    inner.metrics.record_alert_suppressed();
                    debug!(
                        target: "hms.pipeline",
                        tenant_id = %candidate.tenant_id,
                        subject_id = %candidate.subject_id,
                        rule_id = %candidate.rule_id,
                        hits,
                        "alert_suppressed"
                    );
                }
                ThrottleDecision::Create => {
                    let record = self
                        .create_alert(&ctx, &candidate, &org_id, key, now_ms, &mut permit)
                        .await?;
                    outcome.created.push(record);
                }
            }
        }
        Ok(outcome)
    }

    async fn create_alert(
        &self,
        ctx: &TenantContext,
        candidate: &AlertCandidate,
        org_id: &str,
        dedup_key: String,
        now_ms: i64,
        permit: &mut DispatchPermit,
    ) -> Result<AlertRecord, PipelineError> {
        let inner = &self.inner;
        let record = AlertRecord {
            alert_id: Uuid::new_v4().to_string(),
            tenant_id: candidate.tenant_id.clone(),
            subject_id: candidate.subject_id.clone(),
            org_id: org_id.to_string(),
            rule_id: candidate.rule_id.clone(),
            metric: candidate.metric.clone(),
            value: candidate.value,
            severity: candidate.severity,
            status: AlertStatus::New,
            occurred_at_ms: candidate.occurred_at_ms,
            created_at_ms: now_ms,
            dedup_key,
            escalation_level: 0,
            delivery_status: DeliveryStatus::Pending,
            failures: Vec::new(),
            acked_by: None,
            acked_at_ms: None,
        };
        let record = inner.alerts.create_alert(ctx, record).await?;
        inner.metrics.record_alert_created();
        info!(
            target: "hms.pipeline",
            tenant_id = %record.tenant_id,
            alert_id = %record.alert_id,
            subject_id = %record.subject_id,
            rule_id = %record.rule_id,
            metric = %record.metric,
            severity = record.severity.as_str(),
            "alert_created"
        );
        // 告警已落库，派发失败不回滚
        if let Err(err) = inner
            .dispatcher
            .dispatch(&record, &candidate.notify_channels, permit)
            .await
        {
            inner.metrics.record_pipeline_error();
            warn!(
                target: "hms.pipeline",
                tenant_id = %record.tenant_id,
                alert_id = %record.alert_id,
                error = %err,
                "alert_dispatch_failed"
            );
        }
        Ok(record)
    }
}

#[async_trait]
impl RawEventHandler for AlertPipeline {
    async fn handle(&self, event: RawVitalEvent) -> Result<(), IngestError> {
        match self.handle_raw(event).await {
            Ok(_) => Ok(()),
            Err(PipelineError::Validation(err)) => Err(IngestError::Rejected(err.to_string())),
            Err(PipelineError::Backpressure(reason)) => Err(IngestError::Backpressure(reason)),
            Err(err) => Err(IngestError::Handler(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{AlertRule, Comparison, RuleExpression, Severity};
    use hms_storage::{
        InMemoryAlertRuleStore, InMemoryAlertStore, InMemorySubjectStore, InMemoryThrottleStore,
    };

    struct FailingDispatcher;

    #[async_trait]
    impl AlertDispatcher for FailingDispatcher {
        async fn reserve(
            &self,
            _tenant_id: &str,
            _org_id: &str,
            _alerts: usize,
        ) -> Result<DispatchPermit, PipelineError> {
            Ok(DispatchPermit::unreserved())
        }

        async fn dispatch(
            &self,
            _alert: &AlertRecord,
            _channels: &[ChannelKind],
            _permit: &mut DispatchPermit,
        ) -> Result<(), PipelineError> {
            Err(PipelineError::Dispatch("gateway down".to_string()))
        }
    }

    #[tokio::test]
    async fn dispatch_failure_keeps_alert() {
        let rules = Arc::new(InMemoryAlertRuleStore::new());
        rules
            .upsert_rule(AlertRule {
                rule_id: "r1".to_string(),
                tenant_id: "t1".to_string(),
                rule_type: domain::RuleType::Single,
                metric: "heartRate".to_string(),
                expression: RuleExpression::Threshold {
                    op: Comparison::Gt,
                    value: 120.0,
                },
                severity: Severity::Major,
                notify_channels: vec![ChannelKind::Push],
                enabled: true,
                created_at_ms: 0,
            })
            .expect("rule");
        let subjects = Arc::new(InMemorySubjectStore::new());
        subjects.bind("t1", "s1", "ward-1").expect("bind");
        let alerts = Arc::new(InMemoryAlertStore::new());
        let metrics = Arc::new(TelemetryMetrics::new());
        let pipeline = AlertPipeline::new(
            PipelineConfig::default(),
            Arc::new(RuleCache::new(rules)),
            PipelineStores {
                subjects,
                alerts: alerts.clone(),
                throttle: Arc::new(InMemoryThrottleStore::new()),
            },
            Arc::new(FailingDispatcher),
            metrics.clone(),
        );
        let event = NormalizedEvent {
            event_id: "e1".to_string(),
            tenant_id: "t1".to_string(),
            subject_id: "s1".to_string(),
            device_sn: None,
            metric: "heartRate".to_string(),
            value: 150.0,
            unit: "bpm".to_string(),
            ts_ms: 1_000,
        };
        let outcome = pipeline.process_at(event, 1_000).await.expect("process");
        assert_eq!(outcome.created.len(), 1);
        let stored = alerts
            .find_alert(&TenantContext::system("t1"), &outcome.created[0].alert_id)
            .await
            .expect("find");
        assert!(stored.is_some());
        assert_eq!(metrics.snapshot().pipeline_errors, 1);
    }
}
