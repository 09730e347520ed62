//! 追踪、请求 ID、流水线指标与监控反馈。

pub mod monitor;

pub use monitor::{
    MonitorProbe, MonitorReport, MonitorThresholds, MonitorWarning, MonitoringError,
    MonitoringFeedback, WarningKind, WarningSeverity,
};

use domain::ChannelKind;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

const CHANNELS: usize = ChannelKind::ALL.len();

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub events_received: u64,
    pub events_invalid: u64,
    pub candidates_matched: u64,
    pub alerts_created: u64,
    pub alerts_suppressed: u64,
    pub pipeline_errors: u64,
    pub processing_latency_ms_total: u64,
    pub processing_latency_ms_count: u64,
    pub queue_enqueued: u64,
    pub queue_dropped: u64,
    pub backpressure: u64,
    pub delivery_attempts: u64,
    pub delivery_attempt_failures: u64,
    pub delivered: [u64; CHANNELS],
    pub failed: [u64; CHANNELS],
    pub fallbacks: u64,
    pub escalations: u64,
    pub acknowledgements: u64,
    pub expirations: u64,
    pub monitoring_errors: u64,
}

impl MetricsSnapshot {
    pub fn delivered_for(&self, channel: ChannelKind) -> u64 {
        self.delivered[channel.index()]
    }

    pub fn failed_for(&self, channel: ChannelKind) -> u64 {
        self.failed[channel.index()]
    }

    pub fn delivered_total(&self) -> u64 {
        self.delivered.iter().sum()
    }

    pub fn failed_total(&self) -> u64 {
        self.failed.iter().sum()
    }
}

/// 告警链路指标。
///
/// 由装配层创建并以 `Arc` 共享给各组件，不使用进程级静态实例。
#[derive(Default)]
pub struct TelemetryMetrics {
    events_received: AtomicU64,
    events_invalid: AtomicU64,
    candidates_matched: AtomicU64,
    alerts_created: AtomicU64,
    alerts_suppressed: AtomicU64,
    pipeline_errors: AtomicU64,
    processing_latency_ms_total: AtomicU64,
    processing_latency_ms_count: AtomicU64,
    queue_enqueued: AtomicU64,
    queue_dropped: AtomicU64,
    backpressure: AtomicU64,
    delivery_attempts: AtomicU64,
    delivery_attempt_failures: AtomicU64,
    delivered: [AtomicU64; CHANNELS],
    failed: [AtomicU64; CHANNELS],
    fallbacks: AtomicU64,
    escalations: AtomicU64,
    acknowledgements: AtomicU64,
    expirations: AtomicU64,
    monitoring_errors: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_invalid: self.events_invalid.load(Ordering::Relaxed),
            candidates_matched: self.candidates_matched.load(Ordering::Relaxed),
            alerts_created: self.alerts_created.load(Ordering::Relaxed),
            alerts_suppressed: self.alerts_suppressed.load(Ordering::Relaxed),
            pipeline_errors: self.pipeline_errors.load(Ordering::Relaxed),
            processing_latency_ms_total: self.processing_latency_ms_total.load(Ordering::Relaxed),
            processing_latency_ms_count: self.processing_latency_ms_count.load(Ordering::Relaxed),
            queue_enqueued: self.queue_enqueued.load(Ordering::Relaxed),
            queue_dropped: self.queue_dropped.load(Ordering::Relaxed),
            backpressure: self.backpressure.load(Ordering::Relaxed),
            delivery_attempts: self.delivery_attempts.load(Ordering::Relaxed),
            delivery_attempt_failures: self.delivery_attempt_failures.load(Ordering::Relaxed),
            delivered: std::array::from_fn(|i| self.delivered[i].load(Ordering::Relaxed)),
            failed: std::array::from_fn(|i| self.failed[i].load(Ordering::Relaxed)),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            acknowledgements: self.acknowledgements.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            monitoring_errors: self.monitoring_errors.load(Ordering::Relaxed),
        }
    }

    /// 记录体征事件接收次数。
    pub fn record_event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录校验失败丢弃次数。
    pub fn record_event_invalid(&self) {
        self.events_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_candidates(&self, count: u64) {
        self.candidates_matched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_alert_created(&self) {
        self.alerts_created.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录去重节流抑制次数。
    pub fn record_alert_suppressed(&self) {
        self.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pipeline_error(&self) {
        self.pipeline_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录事件处理耗时（毫秒，接收 → 入队）。
    pub fn record_processing_latency_ms(&self, latency_ms: u64) {
        self.processing_latency_ms_total
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.processing_latency_ms_count
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self) {
        self.queue_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录队列满时丢弃的低优先级任务数。
    pub fn record_queue_dropped(&self) {
        self.queue_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录背压次数。
    pub fn record_backpressure(&self) {
        self.backpressure.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一次通道投递尝试（含重试）。
    pub fn record_delivery_attempt(&self, success: bool) {
        self.delivery_attempts.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.delivery_attempt_failures
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_delivered(&self, channel: ChannelKind) {
        self.delivered[channel.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// 记录通道重试预算耗尽。
    pub fn record_failed(&self, channel: ChannelKind) {
        self.failed[channel.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_escalation(&self) {
        self.escalations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acknowledgement(&self) {
        self.acknowledgements.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_monitoring_error(&self) {
        self.monitoring_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

pub fn now_epoch_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_millis() as i64
}
