//! 通知通道：站内信、MQTT 网关桥接（推送/短信/邮件）与日志通道。

use crate::NotifyError;
use async_trait::async_trait;
use domain::{ChannelClass, ChannelKind, Severity, TenantContext};
use hms_storage::{InboxMessage, InboxStore};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 发往单个接收人的通知内容。
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub task_id: String,
    pub tenant_id: String,
    pub alert_id: String,
    pub recipient_id: String,
    pub subject_id: String,
    pub org_id: String,
    pub metric: String,
    pub value: f64,
    pub severity: Severity,
    pub escalation_level: u32,
    pub created_at_ms: i64,
}

/// 通道投递错误；只有 `Transient` 会按通道分类的退避参数重试。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
}

impl ChannelError {
    pub fn reason(&self) -> &str {
        match self {
            ChannelError::Transient(reason) | ChannelError::Permanent(reason) => reason,
        }
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn send(&self, message: &ChannelMessage) -> Result<(), ChannelError>;
}

/// 通道画像：优先级权重与预计投递耗时。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelProfile {
    pub kind: ChannelKind,
    pub class: ChannelClass,
    pub priority_weight: u32,
    pub estimated_delivery_ms: u64,
}

pub fn channel_profile(kind: ChannelKind) -> ChannelProfile {
    let (priority_weight, estimated_delivery_ms) = match kind {
        ChannelKind::InApp => (100, 50),
        ChannelKind::Push => (80, 1_000),
        ChannelKind::Sms => (60, 5_000),
        ChannelKind::Email => (40, 60_000),
    };
    ChannelProfile {
        kind,
        class: kind.class(),
        priority_weight,
        estimated_delivery_ms,
    }
}

/// 仅写日志的通道（未接网关时使用）。
#[derive(Debug, Clone)]
pub struct LogChannel {
    kind: ChannelKind,
}

impl LogChannel {
    pub fn new(kind: ChannelKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, message: &ChannelMessage) -> Result<(), ChannelError> {
        info!(
            target: "hms.notify",
            channel = self.kind.as_str(),
            tenant_id = %message.tenant_id,
            alert_id = %message.alert_id,
            recipient_id = %message.recipient_id,
            severity = message.severity.as_str(),
            "notification_logged"
        );
        Ok(())
    }
}

/// 站内信通道：写入接收人收件箱。
pub struct InboxChannel {
    store: Arc<dyn InboxStore>,
}

impl InboxChannel {
    pub fn new(store: Arc<dyn InboxStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NotificationChannel for InboxChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::InApp
    }

    async fn send(&self, message: &ChannelMessage) -> Result<(), ChannelError> {
        let ctx = TenantContext::system(&message.tenant_id);
        let inbox = InboxMessage {
            alert_id: message.alert_id.clone(),
            tenant_id: message.tenant_id.clone(),
            recipient_id: message.recipient_id.clone(),
            subject_id: message.subject_id.clone(),
            metric: message.metric.clone(),
            value: message.value,
            severity: message.severity.as_str().to_string(),
            escalation_level: message.escalation_level,
            created_at_ms: message.created_at_ms,
        };
        self.store
            .push_message(&ctx, &inbox)
            .await
            .map_err(|err| ChannelError::Transient(err.to_string()))
    }
}

/// MQTT 网关配置。
#[derive(Debug, Clone)]
pub struct MqttGatewayConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 发布主题：`{topic_prefix}/{channel}/{tenantId}/{recipientId}`
    pub topic_prefix: String,
}

/// 推送/短信/邮件网关桥接：共享同一个 MQTT 连接。
#[derive(Clone)]
pub struct MqttGateway {
    client: AsyncClient,
    topic_prefix: String,
}

impl MqttGateway {
    pub fn connect(
        config: MqttGatewayConfig,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), NotifyError> {
        let client_id = format!("hms-notify-{}", uuid::Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (config.username, config.password) {
            options.set_credentials(username, password);
        }
        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = eventloop.poll().await {
                    warn!(target: "hms.notify", error = %err, "mqtt_gateway_eventloop_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });
        Ok((
            Self {
                client,
                topic_prefix: config.topic_prefix,
            },
            handle,
        ))
    }

    pub fn channel(&self, kind: ChannelKind) -> MqttChannel {
        MqttChannel {
            kind,
            gateway: self.clone(),
        }
    }
}

pub fn gateway_topic(prefix: &str, kind: ChannelKind, tenant_id: &str, recipient_id: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        prefix.trim_end_matches('/'),
        kind.as_str(),
        tenant_id,
        recipient_id
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GatewayEnvelope<'a> {
    task_id: &'a str,
    alert_id: &'a str,
    subject_id: &'a str,
    org_id: &'a str,
    metric: &'a str,
    value: f64,
    severity: &'a str,
    escalation_level: u32,
    created_at_ms: i64,
}

pub fn gateway_payload(message: &ChannelMessage) -> Result<Vec<u8>, ChannelError> {
    let envelope = GatewayEnvelope {
        task_id: &message.task_id,
        alert_id: &message.alert_id,
        subject_id: &message.subject_id,
        org_id: &message.org_id,
        metric: &message.metric,
        value: message.value,
        severity: message.severity.as_str(),
        escalation_level: message.escalation_level,
        created_at_ms: message.created_at_ms,
    };
    serde_json::to_vec(&envelope).map_err(|err| ChannelError::Permanent(err.to_string()))
}

#[derive(Clone)]
pub struct MqttChannel {
    kind: ChannelKind,
    gateway: MqttGateway,
}

#[async_trait]
impl NotificationChannel for MqttChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, message: &ChannelMessage) -> Result<(), ChannelError> {
        let topic = gateway_topic(
            &self.gateway.topic_prefix,
            self.kind,
            &message.tenant_id,
            &message.recipient_id,
        );
        let payload = gateway_payload(message)?;
        self.gateway
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|err| ChannelError::Transient(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_topic_and_payload() {
        assert_eq!(
            gateway_topic("hms/notify/", ChannelKind::Sms, "t1", "u1"),
            "hms/notify/sms/t1/u1"
        );
        let message = ChannelMessage {
            task_id: "task-1".to_string(),
            tenant_id: "t1".to_string(),
            alert_id: "a1".to_string(),
            recipient_id: "u1".to_string(),
            subject_id: "s1".to_string(),
            org_id: "o1".to_string(),
            metric: "heartRate".to_string(),
            value: 150.0,
            severity: Severity::Major,
            escalation_level: 1,
            created_at_ms: 7,
        };
        let payload: serde_json::Value =
            serde_json::from_slice(&gateway_payload(&message).expect("payload")).expect("json");
        assert_eq!(payload["alertId"], "a1");
        assert_eq!(payload["severity"], "MAJOR");
        assert_eq!(payload["escalationLevel"], 1);
    }

    #[test]
    fn profiles_follow_channel_class() {
        assert_eq!(channel_profile(ChannelKind::Push).class, ChannelClass::Realtime);
        assert!(
            channel_profile(ChannelKind::InApp).priority_weight
                > channel_profile(ChannelKind::Email).priority_weight
        );
    }
}
