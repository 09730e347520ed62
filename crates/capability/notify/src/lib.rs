//! 告警通知：优先级派发队列、通道实现与多通道通知管理（重试、降级、升级、确认）。

pub mod channel;
pub mod manager;
pub mod queue;

pub use channel::{
    ChannelError, ChannelMessage, ChannelProfile, InboxChannel, LogChannel, MqttChannel,
    MqttGateway, MqttGatewayConfig, NotificationChannel, channel_profile, gateway_payload,
    gateway_topic,
};
pub use manager::{ClassPolicy, DispatchReport, NotificationChannelManager, NotifyConfig};
pub use queue::{
    DispatchItem, EnqueueOutcome, OverflowPolicy, PriorityDispatchQueue, QueueConfig,
    QueueReservation,
};

use hms_escalation::EscalationError;
use hms_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("dispatch queue full (capacity {0})")]
    QueueFull(usize),
    #[error("dispatch queue closed")]
    Closed,
    #[error(transparent)]
    Escalation(#[from] EscalationError),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for NotifyError {
    fn from(err: StorageError) -> Self {
        NotifyError::Storage(err.to_string())
    }
}
