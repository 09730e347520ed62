//! 采集链路装配
//!
//! 将采集源（MQTT 或空操作源）接到告警流水线上，并周期清理规则引擎中长时间无数据对象的历史。

use hms_config::AppConfig;
use hms_ingest::{MqttSource, MqttSourceConfig, NoopSource, RawEventHandler, Source};
use hms_pipeline::AlertPipeline;
use hms_telemetry::now_epoch_ms;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 规则历史保留时长；超过该时长无新数据的对象被清理
const IDLE_SUBJECT_MS: i64 = 30 * 60 * 1000;

pub fn spawn_ingest(config: &AppConfig, pipeline: AlertPipeline) -> tokio::task::JoinHandle<()> {
    let source: Arc<dyn Source> = if config.ingest_enabled {
        let mqtt_config = MqttSourceConfig {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            username: config.mqtt_username.clone(),
            password: config.mqtt_password.clone(),
            topic_prefix: config.mqtt_event_topic_prefix.clone(),
        };
        info!(
            target: "hms.ingest",
            host = %mqtt_config.host,
            port = mqtt_config.port,
            prefix = %mqtt_config.topic_prefix,
            "ingest_source_mqtt"
        );
        Arc::new(MqttSource::new(mqtt_config))
    } else {
        info!(target: "hms.ingest", "ingest_source_noop");
        Arc::new(NoopSource)
    };

    let handler: Arc<dyn RawEventHandler> = Arc::new(pipeline);
    tokio::spawn(async move {
        if let Err(err) = source.run(handler).await {
            warn!(target: "hms.ingest", error = %err, "ingest_stopped");
        }
    })
}

pub fn spawn_history_eviction(pipeline: AlertPipeline) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let evicted = pipeline.evict_idle(now_epoch_ms() - IDLE_SUBJECT_MS);
            if evicted > 0 {
                info!(target: "hms.ingest", evicted, "rule_history_evicted");
            }
        }
    })
}
