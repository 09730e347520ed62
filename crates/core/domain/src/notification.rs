use crate::rule::Urgency;
use serde::{Deserialize, Serialize};

/// 通知通道。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelKind {
    InApp,
    Push,
    Sms,
    Email,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::InApp,
        ChannelKind::Push,
        ChannelKind::Sms,
        ChannelKind::Email,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::InApp => "inApp",
            ChannelKind::Push => "push",
            ChannelKind::Sms => "sms",
            ChannelKind::Email => "email",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inapp" | "in_app" | "message" => Some(ChannelKind::InApp),
            "push" => Some(ChannelKind::Push),
            "sms" => Some(ChannelKind::Sms),
            "email" | "mail" => Some(ChannelKind::Email),
            _ => None,
        }
    }

    /// 通道的 I/O 画像分类。
    pub fn class(&self) -> ChannelClass {
        match self {
            ChannelKind::InApp | ChannelKind::Push => ChannelClass::Realtime,
            ChannelKind::Email => ChannelClass::Async,
            ChannelKind::Sms => ChannelClass::ThirdParty,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            ChannelKind::InApp => 0,
            ChannelKind::Push => 1,
            ChannelKind::Sms => 2,
            ChannelKind::Email => 3,
        }
    }
}

/// 通道分类：决定工作池规模与重试/退避参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelClass {
    Realtime,
    Async,
    ThirdParty,
}

impl ChannelClass {
    pub const ALL: [ChannelClass; 3] = [
        ChannelClass::Realtime,
        ChannelClass::Async,
        ChannelClass::ThirdParty,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelClass::Realtime => "realtime",
            ChannelClass::Async => "async",
            ChannelClass::ThirdParty => "third_party",
        }
    }
}

/// 投递状态机。
///
/// 成功路径 `PENDING → DELIVERED → ACKNOWLEDGED`；
/// 失败路径 `PENDING/DELIVERED → FAILED/EXPIRED/CANCELLED`；`FAILED → PENDING` 为重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Acknowledged,
    Failed,
    Expired,
    Cancelled,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Acknowledged => "ACKNOWLEDGED",
            DeliveryStatus::Failed => "FAILED",
            DeliveryStatus::Expired => "EXPIRED",
            DeliveryStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(DeliveryStatus::Pending),
            "DELIVERED" => Some(DeliveryStatus::Delivered),
            "ACKNOWLEDGED" => Some(DeliveryStatus::Acknowledged),
            "FAILED" => Some(DeliveryStatus::Failed),
            "EXPIRED" => Some(DeliveryStatus::Expired),
            "CANCELLED" => Some(DeliveryStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Acknowledged | DeliveryStatus::Expired | DeliveryStatus::Cancelled
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryStatus::Pending | DeliveryStatus::Failed)
    }

    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Pending, Delivered)
                | (Delivered, Acknowledged)
                | (Pending | Delivered, Failed | Expired | Cancelled)
                | (Failed, Pending)
        )
    }
}

/// 通知任务：告警入队时创建，终态后归档。
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationTask {
    pub task_id: String,
    pub tenant_id: String,
    pub alert_id: String,
    pub recipient_id: String,
    pub channel: ChannelKind,
    pub urgency: Urgency,
    pub priority_weight: u32,
    pub delivery_status: DeliveryStatus,
    pub retry_count: u32,
    pub escalation_level: u32,
    pub escalation_deadline_ms: i64,
    pub enqueued_at_ms: i64,
    pub last_error: Option<String>,
}
