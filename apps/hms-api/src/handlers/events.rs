//! 体征事件接入
//!
//! - POST /events：单条事件同步进入告警流水线，返回本次生成/抑制的告警

use crate::AppState;
use crate::utils::pipeline_error;
use api_contract::{ApiResponse, IngestEventRequest, IngestEventResponse};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domain::RawVitalEvent;
use hms_telemetry::now_epoch_ms;

fn to_raw(req: IngestEventRequest, received_at_ms: i64) -> RawVitalEvent {
    RawVitalEvent {
        event_id: req.event_id,
        source: Some(req.source.unwrap_or_else(|| "http".to_string())),
        tenant_id: req.tenant_id,
        subject_id: req.subject_id,
        device_sn: req.device_sn,
        metric: req.metric,
        value: req.value,
        unit: req.unit,
        timestamp_ms: req.timestamp,
        received_at_ms,
    }
}

pub async fn ingest_event(
    State(state): State<AppState>,
    Json(req): Json<IngestEventRequest>,
) -> Response {
    let raw = to_raw(req, now_epoch_ms());
    match state.pipeline.handle_raw(raw).await {
        Ok(outcome) => {
            let response = IngestEventResponse {
                event_id: outcome.event_id,
                alerts_created: outcome.created.len(),
                alerts_suppressed: outcome.suppressed,
                alert_ids: outcome
                    .created
                    .into_iter()
                    .map(|alert| alert.alert_id)
                    .collect(),
            };
            (StatusCode::OK, Json(ApiResponse::success(response))).into_response()
        }
        Err(err) => pipeline_error(err),
    }
}
