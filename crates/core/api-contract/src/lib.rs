//! 稳定的 DTO 与 API 响应契约。

use serde::{Deserialize, Serialize};

/// 标准 API 响应封装。
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// 失败响应的错误体。
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// 体征事件接入请求体（设备/事件源上报）。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestEventRequest {
    pub event_id: Option<String>,
    pub source: Option<String>,
    pub tenant_id: Option<String>,
    #[serde(alias = "userId")]
    pub subject_id: Option<String>,
    #[serde(alias = "deviceSN")]
    pub device_sn: Option<String>,
    pub metric: Option<String>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    #[serde(alias = "ts", alias = "tsMs", alias = "timestampMs")]
    pub timestamp: Option<i64>,
}

/// 事件接入结果。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestEventResponse {
    pub event_id: String,
    pub alerts_created: usize,
    pub alerts_suppressed: usize,
    pub alert_ids: Vec<String>,
}

/// 告警查询参数。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertQuery {
    pub status: Option<String>,
    pub subject_id: Option<String>,
    pub limit: Option<i64>,
}

/// 单通道失败原因。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelFailureDto {
    pub channel: String,
    pub reason: String,
}

/// 告警返回结构（管理端查询）。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecordDto {
    pub id: String,
    pub tenant_id: String,
    pub subject_id: String,
    pub org_id: String,
    pub rule_id: String,
    pub metric: String,
    pub value: f64,
    pub severity: String,
    pub status: String,
    pub occurred_at: i64,
    pub escalation_level: u32,
    pub delivery_status: String,
    pub failures: Vec<ChannelFailureDto>,
    pub acked_by: Option<String>,
    pub acked_at: Option<i64>,
}

/// 通知任务返回结构（含归档）。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTaskDto {
    pub task_id: String,
    pub alert_id: String,
    pub recipient_id: String,
    pub channel: String,
    pub urgency: String,
    pub delivery_status: String,
    pub retry_count: u32,
    pub escalation_level: u32,
    pub escalation_deadline: i64,
    pub last_error: Option<String>,
}

/// 告警详情（告警 + 通知任务）。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDetailDto {
    pub alert: AlertRecordDto,
    pub tasks: Vec<NotificationTaskDto>,
}

/// 确认/解决操作结果；`applied` 为 false 表示告警已不处于可操作状态。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertActionResponse {
    pub alert_id: String,
    pub applied: bool,
    pub status: String,
}

/// 告警确认请求体。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest {
    pub user_id: String,
}

/// 组织结构变更事件。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgMutationRequest {
    pub operation: String,
    pub node_id: String,
    pub parent_id: Option<String>,
    pub tenant_id: String,
}

/// 闭包表分歧边。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureEdgeDto {
    pub ancestor_id: String,
    pub descendant_id: String,
    pub depth: u32,
}

/// 一致性校验结果。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReportDto {
    pub consistent: bool,
    pub missing: Vec<ClosureEdgeDto>,
    pub unexpected: Vec<ClosureEdgeDto>,
    /// 父链成环、无法从根到达的节点
    pub unreachable: Vec<String>,
}

/// 重建结果。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildResultDto {
    pub nodes: usize,
    pub edges: usize,
}

/// 规则变更通知。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleChangedRequest {
    pub rule_id: Option<String>,
    pub change: String,
}

/// 升级链缓存失效结果。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgInvalidationDto {
    pub tenant_id: String,
    pub invalidated_orgs: Vec<String>,
}

/// 规则缓存失效结果。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleInvalidationDto {
    pub tenant_id: String,
    pub rule_id: Option<String>,
    pub change: String,
}

/// 负责人角色变更通知。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerChangedRequest {
    pub org_id: String,
}

/// 单通道投递统计。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatsDto {
    pub channel: String,
    pub delivered: u64,
    pub failed: u64,
}

/// 监控告警项。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorWarningDto {
    pub kind: String,
    pub severity: String,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
}

/// 指标快照（按监控采样周期刷新）。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshotDto {
    pub sampled_at_ms: i64,
    pub events_received: u64,
    pub events_invalid: u64,
    pub alerts_created: u64,
    pub alerts_suppressed: u64,
    pub notifications_delivered: u64,
    pub notifications_failed: u64,
    pub escalations: u64,
    pub acknowledgements: u64,
    pub queue_dropped: u64,
    pub backpressure: u64,
    pub queue_depth: usize,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub worker_utilization: f64,
    pub channels: Vec<ChannelStatsDto>,
    pub warnings: Vec<MonitorWarningDto>,
}
