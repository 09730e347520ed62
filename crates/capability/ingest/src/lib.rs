mod payload;

pub use payload::{VitalPayload, extract_scope, parse_payload};

use async_trait::async_trait;
use domain::RawVitalEvent;
use hms_telemetry::now_epoch_ms;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// 采集错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("rejected: {0}")]
    Rejected(String),
    /// 下游队列已满，调用方应稍后重试
    #[error("backpressure: {0}")]
    Backpressure(String),
    #[error("handler error: {0}")]
    Handler(String),
    #[error("source error: {0}")]
    Source(String),
}

/// RawVitalEvent 处理器（由告警流水线实现）。
#[async_trait]
pub trait RawEventHandler: Send + Sync {
    async fn handle(&self, event: RawVitalEvent) -> Result<(), IngestError>;
}

/// 采集源抽象。
#[async_trait]
pub trait Source: Send + Sync {
    async fn run(&self, handler: Arc<dyn RawEventHandler>) -> Result<(), IngestError>;
}

/// 占位源（用于接线与测试）。
#[derive(Debug, Default)]
pub struct NoopSource;

#[async_trait]
impl Source for NoopSource {
    async fn run(&self, _handler: Arc<dyn RawEventHandler>) -> Result<(), IngestError> {
        Ok(())
    }
}

/// MQTT 采集源配置。
#[derive(Debug, Clone)]
pub struct MqttSourceConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 主题格式：`{topic_prefix}/{tenantId}/{deviceSn}`
    pub topic_prefix: String,
}

/// MQTT 采集源：订阅设备上报主题，逐条交给处理器。
#[derive(Debug, Clone)]
pub struct MqttSource {
    config: MqttSourceConfig,
}

impl MqttSource {
    pub fn new(config: MqttSourceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MqttSourceConfig {
        &self.config
    }
}

#[async_trait]
impl Source for MqttSource {
    async fn run(&self, handler: Arc<dyn RawEventHandler>) -> Result<(), IngestError> {
        let client_id = format!("hms-ingest-{}", now_epoch_ms());
        let mut options =
            rumqttc::MqttOptions::new(client_id, self.config.host.clone(), self.config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) =
            (self.config.username.as_ref(), self.config.password.as_ref())
        {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = rumqttc::AsyncClient::new(options, 10);
        let topic = format!("{}/#", self.config.topic_prefix.trim_end_matches('/'));
        client
            .subscribe(topic, rumqttc::QoS::AtLeastOnce)
            .await
            .map_err(|err| IngestError::Source(err.to_string()))?;

        loop {
            match eventloop.poll().await {
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::Publish(publish))) => {
                    let Some((tenant_id, device_sn)) =
                        extract_scope(&self.config.topic_prefix, &publish.topic)
                    else {
                        warn!(target: "hms.ingest", topic = %publish.topic, "mqtt_topic_skipped");
                        continue;
                    };
                    let events = match parse_payload(
                        &tenant_id,
                        &device_sn,
                        &publish.payload,
                        now_epoch_ms(),
                    ) {
                        Ok(events) => events,
                        Err(err) => {
                            warn!(
                                target: "hms.ingest",
                                tenant_id = %tenant_id,
                                device_sn = %device_sn,
                                error = %err,
                                "mqtt_payload_rejected"
                            );
                            continue;
                        }
                    };
                    debug!(
                        target: "hms.ingest",
                        tenant_id = %tenant_id,
                        device_sn = %device_sn,
                        events = events.len(),
                        "mqtt_payload_received"
                    );
                    for event in events {
                        if let Err(err) = handler.handle(event).await {
                            warn!(
                                target: "hms.ingest",
                                tenant_id = %tenant_id,
                                device_sn = %device_sn,
                                error = %err,
                                "raw_event_handler_failed"
                            );
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => return Err(IngestError::Source(err.to_string())),
            }
        }
    }
}
