//! 监控反馈：周期采样队列深度、处理延迟、错误率与工作池占用，对比静态阈值输出建议性告警。
//!
//! 采样失败只记录日志与计数，不向告警链路传播。

use crate::{MetricsSnapshot, TelemetryMetrics, now_epoch_ms};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// 监控错误（始终被吞掉并记录）。
#[derive(Debug, thiserror::Error)]
pub enum MonitoringError {
    #[error("probe error: {0}")]
    Probe(String),
    #[error("state error: {0}")]
    State(String),
}

/// 运行时探针：由派发队列/工作池实现。
pub trait MonitorProbe: Send + Sync {
    fn queue_depth(&self) -> Result<usize, MonitoringError>;

    /// 工作池占用率（0.0 ~ 1.0）。
    fn worker_utilization(&self) -> Result<f64, MonitoringError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorThresholds {
    pub queue_depth: usize,
    pub latency_ms: u64,
    pub error_rate: f64,
    pub utilization: f64,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            queue_depth: 1_000,
            latency_ms: 5_000,
            error_rate: 0.05,
            utilization: 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    Overload,
    SlowProcessing,
    HighErrorRate,
    Saturation,
}

impl WarningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningKind::Overload => "overload",
            WarningKind::SlowProcessing => "slow_processing",
            WarningKind::HighErrorRate => "high_error_rate",
            WarningKind::Saturation => "saturation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Warning,
    Critical,
}

impl WarningSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningSeverity::Warning => "warning",
            WarningSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorWarning {
    pub kind: WarningKind,
    pub severity: WarningSeverity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
}

/// 单次采样结果。
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorReport {
    pub sampled_at_ms: i64,
    pub snapshot: MetricsSnapshot,
    pub queue_depth: usize,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub worker_utilization: f64,
    pub warnings: Vec<MonitorWarning>,
}

#[derive(Default)]
struct MonitorState {
    previous: Option<MetricsSnapshot>,
    last_report: Option<MonitorReport>,
}

/// 监控反馈采样器。
pub struct MonitoringFeedback {
    metrics: Arc<TelemetryMetrics>,
    probe: Arc<dyn MonitorProbe>,
    thresholds: MonitorThresholds,
    state: Mutex<MonitorState>,
}

impl MonitoringFeedback {
    pub fn new(
        metrics: Arc<TelemetryMetrics>,
        probe: Arc<dyn MonitorProbe>,
        thresholds: MonitorThresholds,
    ) -> Self {
        Self {
            metrics,
            probe,
            thresholds,
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// 采样一次；延迟与错误率按相邻两次采样之间的增量计算。
    pub fn sample(&self) -> Result<MonitorReport, MonitoringError> {
        let snapshot = self.metrics.snapshot();
        let queue_depth = self.probe.queue_depth()?;
        let worker_utilization = self.probe.worker_utilization()?;

        let mut state = self
            .state
            .lock()
            .map_err(|_| MonitoringError::State("lock failed".to_string()))?;
        let previous = state.previous.unwrap_or_default();
        let avg_latency_ms = ratio(
            snapshot
                .processing_latency_ms_total
                .saturating_sub(previous.processing_latency_ms_total),
            snapshot
                .processing_latency_ms_count
                .saturating_sub(previous.processing_latency_ms_count),
        );
        let failures = snapshot
            .delivery_attempt_failures
            .saturating_sub(previous.delivery_attempt_failures)
            + snapshot
                .pipeline_errors
                .saturating_sub(previous.pipeline_errors);
        let attempts = snapshot
            .delivery_attempts
            .saturating_sub(previous.delivery_attempts)
            + snapshot
                .events_received
                .saturating_sub(previous.events_received);
        let error_rate = ratio(failures, attempts);

        let warnings = evaluate(
            &self.thresholds,
            queue_depth,
            avg_latency_ms,
            error_rate,
            worker_utilization,
        );
        let report = MonitorReport {
            sampled_at_ms: now_epoch_ms(),
            snapshot,
            queue_depth,
            avg_latency_ms,
            error_rate,
            worker_utilization,
            warnings,
        };
        state.previous = Some(snapshot);
        state.last_report = Some(report.clone());
        Ok(report)
    }

    /// 采样并输出告警日志；任何错误都在此处吞掉。
    pub fn sample_and_log(&self) -> Option<MonitorReport> {
        match self.sample() {
            Ok(report) => {
                for warning in &report.warnings {
                    warn!(
                        target: "hms.monitor",
                        kind = warning.kind.as_str(),
                        severity = warning.severity.as_str(),
                        value = warning.value,
                        threshold = warning.threshold,
                        "{}",
                        warning.message
                    );
                }
                debug!(
                    target: "hms.monitor",
                    queue_depth = report.queue_depth,
                    avg_latency_ms = report.avg_latency_ms,
                    error_rate = report.error_rate,
                    worker_utilization = report.worker_utilization,
                    "monitor_sampled"
                );
                Some(report)
            }
            Err(err) => {
                self.metrics.record_monitoring_error();
                warn!(target: "hms.monitor", error = %err, "monitor_sample_failed");
                None
            }
        }
    }

    /// 最近一次成功采样（指标快照接口按采样周期返回）。
    pub fn last_report(&self) -> Option<MonitorReport> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.last_report.clone())
    }

    pub fn spawn(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
            loop {
                ticker.tick().await;
                let _ = self.sample_and_log();
            }
        })
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}

fn evaluate(
    thresholds: &MonitorThresholds,
    queue_depth: usize,
    avg_latency_ms: f64,
    error_rate: f64,
    utilization: f64,
) -> Vec<MonitorWarning> {
    let mut warnings = Vec::new();
    let mut check = |kind: WarningKind, value: f64, threshold: f64, message: String| {
        if value > threshold {
            // 超过阈值两倍视为严重
            let severity = if value > threshold * 2.0 {
                WarningSeverity::Critical
            } else {
                WarningSeverity::Warning
            };
            warnings.push(MonitorWarning {
                kind,
                severity,
                message,
                value,
                threshold,
            });
        }
    };
    check(
        WarningKind::Overload,
        queue_depth as f64,
        thresholds.queue_depth as f64,
        format!("dispatch queue depth {} exceeds {}", queue_depth, thresholds.queue_depth),
    );
    check(
        WarningKind::SlowProcessing,
        avg_latency_ms,
        thresholds.latency_ms as f64,
        format!(
            "average processing latency {:.0}ms exceeds {}ms",
            avg_latency_ms, thresholds.latency_ms
        ),
    );
    check(
        WarningKind::HighErrorRate,
        error_rate,
        thresholds.error_rate,
        format!(
            "error rate {:.2}% exceeds {:.2}%",
            error_rate * 100.0,
            thresholds.error_rate * 100.0
        ),
    );
    check(
        WarningKind::Saturation,
        utilization,
        thresholds.utilization,
        format!(
            "worker utilization {:.0}% exceeds {:.0}%",
            utilization * 100.0,
            thresholds.utilization * 100.0
        ),
    );
    warnings
}
