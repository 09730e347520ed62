//! HTTP 响应辅助函数和 DTO 转换
//!
//! - 错误响应：bad_request_error, not_found_error, hierarchy_error, pipeline_error, internal_error
//! - DTO 转换：alert_to_dto, task_to_dto, edge_to_dto
//!
//! 所有错误返回统一的 ApiResponse 格式，HTTP 状态码与错误码一一对应。

use api_contract::{AlertRecordDto, ApiResponse, ChannelFailureDto, ClosureEdgeDto, NotificationTaskDto};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domain::{AlertRecord, ClosureEdge, NotificationTask};
use hms_escalation::EscalationError;
use hms_hierarchy::HierarchyError;
use hms_notify::NotifyError;
use hms_pipeline::PipelineError;

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::<()>::error(code, message.into()))).into_response()
}

pub fn bad_request_error(message: impl Into<String>) -> Response {
    error_response(StatusCode::BAD_REQUEST, "INVALID.REQUEST", message)
}

pub fn not_found_error() -> Response {
    error_response(StatusCode::NOT_FOUND, "RESOURCE.NOT_FOUND", "not found")
}

pub fn internal_error(err: impl std::fmt::Display) -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL.ERROR",
        err.to_string(),
    )
}

pub fn hierarchy_error(err: HierarchyError) -> Response {
    match err {
        HierarchyError::Validation(message) => bad_request_error(message),
        HierarchyError::Cycle { .. } => {
            error_response(StatusCode::CONFLICT, "HIERARCHY.CYCLE", err.to_string())
        }
        HierarchyError::Conflict(_) => {
            error_response(StatusCode::CONFLICT, "HIERARCHY.CONFLICT", err.to_string())
        }
        other => internal_error(other),
    }
}

pub fn escalation_error(err: EscalationError) -> Response {
    match err {
        EscalationError::Hierarchy(err) => hierarchy_error(err),
        other => internal_error(other),
    }
}

pub fn notify_error(err: NotifyError) -> Response {
    match err {
        NotifyError::Escalation(err) => escalation_error(err),
        other => internal_error(other),
    }
}

pub fn pipeline_error(err: PipelineError) -> Response {
    match err {
        PipelineError::Validation(err) => bad_request_error(err.to_string()),
        PipelineError::Backpressure(reason) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "INGEST.BACKPRESSURE",
            reason,
        ),
        other => internal_error(other),
    }
}

pub fn alert_to_dto(record: AlertRecord) -> AlertRecordDto {
    AlertRecordDto {
        id: record.alert_id,
        tenant_id: record.tenant_id,
        subject_id: record.subject_id,
        org_id: record.org_id,
        rule_id: record.rule_id,
        metric: record.metric,
        value: record.value,
        severity: record.severity.as_str().to_string(),
        status: record.status.as_str().to_string(),
        occurred_at: record.occurred_at_ms,
        escalation_level: record.escalation_level,
        delivery_status: record.delivery_status.as_str().to_string(),
        failures: record
            .failures
            .into_iter()
            .map(|failure| ChannelFailureDto {
                channel: failure.channel.as_str().to_string(),
                reason: failure.reason,
            })
            .collect(),
        acked_by: record.acked_by,
        acked_at: record.acked_at_ms,
    }
}

pub fn task_to_dto(task: NotificationTask) -> NotificationTaskDto {
    NotificationTaskDto {
        task_id: task.task_id,
        alert_id: task.alert_id,
        recipient_id: task.recipient_id,
        channel: task.channel.as_str().to_string(),
        urgency: task.urgency.as_str().to_string(),
        delivery_status: task.delivery_status.as_str().to_string(),
        retry_count: task.retry_count,
        escalation_level: task.escalation_level,
        escalation_deadline: task.escalation_deadline_ms,
        last_error: task.last_error,
    }
}

pub fn edge_to_dto(edge: ClosureEdge) -> ClosureEdgeDto {
    ClosureEdgeDto {
        ancestor_id: edge.ancestor_id,
        descendant_id: edge.descendant_id,
        depth: edge.depth,
    }
}
