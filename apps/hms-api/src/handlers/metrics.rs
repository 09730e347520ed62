//! 指标快照
//!
//! - GET /metrics：返回最近一次监控采样；尚未采样时立即采样一次

use crate::AppState;
use api_contract::{ApiResponse, ChannelStatsDto, MetricsSnapshotDto, MonitorWarningDto};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domain::ChannelKind;
use hms_telemetry::{MonitorReport, MonitorProbe, now_epoch_ms};

pub async fn get_metrics(State(state): State<AppState>) -> Response {
    let report = state
        .monitor
        .last_report()
        .or_else(|| state.monitor.sample_and_log());
    let dto = match report {
        Some(report) => report_to_dto(report),
        None => fallback_dto(&state),
    };
    (StatusCode::OK, Json(ApiResponse::success(dto))).into_response()
}

fn channel_stats(snapshot: &hms_telemetry::MetricsSnapshot) -> Vec<ChannelStatsDto> {
    ChannelKind::ALL
        .iter()
        .map(|kind| ChannelStatsDto {
            channel: kind.as_str().to_string(),
            delivered: snapshot.delivered_for(*kind),
            failed: snapshot.failed_for(*kind),
        })
        .collect()
}

fn report_to_dto(report: MonitorReport) -> MetricsSnapshotDto {
    let snapshot = report.snapshot;
    MetricsSnapshotDto {
        sampled_at_ms: report.sampled_at_ms,
        events_received: snapshot.events_received,
        events_invalid: snapshot.events_invalid,
        alerts_created: snapshot.alerts_created,
        alerts_suppressed: snapshot.alerts_suppressed,
        notifications_delivered: snapshot.delivered_total(),
        notifications_failed: snapshot.failed_total(),
        escalations: snapshot.escalations,
        acknowledgements: snapshot.acknowledgements,
        queue_dropped: snapshot.queue_dropped,
        backpressure: snapshot.backpressure,
        queue_depth: report.queue_depth,
        avg_latency_ms: report.avg_latency_ms,
        error_rate: report.error_rate,
        worker_utilization: report.worker_utilization,
        channels: channel_stats(&snapshot),
        warnings: report
            .warnings
            .into_iter()
            .map(|warning| MonitorWarningDto {
                kind: warning.kind.as_str().to_string(),
                severity: warning.severity.as_str().to_string(),
                message: warning.message,
                value: warning.value,
                threshold: warning.threshold,
            })
            .collect(),
    }
}

/// 采样失败时直接读取计数器（速率类指标置零）。
fn fallback_dto(state: &AppState) -> MetricsSnapshotDto {
    let snapshot = state.metrics.snapshot();
    MetricsSnapshotDto {
        sampled_at_ms: now_epoch_ms(),
        events_received: snapshot.events_received,
        events_invalid: snapshot.events_invalid,
        alerts_created: snapshot.alerts_created,
        alerts_suppressed: snapshot.alerts_suppressed,
        notifications_delivered: snapshot.delivered_total(),
        notifications_failed: snapshot.failed_total(),
        escalations: snapshot.escalations,
        acknowledgements: snapshot.acknowledgements,
        queue_dropped: snapshot.queue_dropped,
        backpressure: snapshot.backpressure,
        queue_depth: state.notify.queue_depth().unwrap_or(0),
        avg_latency_ms: 0.0,
        error_rate: 0.0,
        worker_utilization: 0.0,
        channels: channel_stats(&snapshot),
        warnings: Vec::new(),
    }
}
