use crate::notification::{ChannelKind, DeliveryStatus};
use crate::rule::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertStatus {
    New,
    Pending,
    Acked,
    Resolved,
    Expired,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::New => "NEW",
            AlertStatus::Pending => "PENDING",
            AlertStatus::Acked => "ACKED",
            AlertStatus::Resolved => "RESOLVED",
            AlertStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NEW" => Some(AlertStatus::New),
            "PENDING" => Some(AlertStatus::Pending),
            "ACKED" => Some(AlertStatus::Acked),
            "RESOLVED" => Some(AlertStatus::Resolved),
            "EXPIRED" => Some(AlertStatus::Expired),
            _ => None,
        }
    }

    /// 尚未被人工处理或过期（可确认、可升级）。
    pub fn is_open(&self) -> bool {
        matches!(self, AlertStatus::New | AlertStatus::Pending)
    }
}

/// 单个通道的失败原因（管理端展示）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFailure {
    pub channel: ChannelKind,
    pub reason: String,
}

/// 告警记录（逻辑退役，不物理删除）。
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    pub alert_id: String,
    pub tenant_id: String,
    pub subject_id: String,
    pub org_id: String,
    pub rule_id: String,
    pub metric: String,
    pub value: f64,
    pub severity: Severity,
    pub status: AlertStatus,
    pub occurred_at_ms: i64,
    pub created_at_ms: i64,
    pub dedup_key: String,
    pub escalation_level: u32,
    pub delivery_status: DeliveryStatus,
    pub failures: Vec<ChannelFailure>,
    pub acked_by: Option<String>,
    pub acked_at_ms: Option<i64>,
}
