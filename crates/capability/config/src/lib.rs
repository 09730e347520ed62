//! 应用运行配置加载。

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 派发队列满时的处理策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicyKind {
    /// 丢弃优先级最低的待派发项并记录告警日志。
    DropLowest,
    /// 拒绝入队，向接入层回传背压。
    Reject,
}

/// 单类通道工作池与重试参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelClassConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: String,
    pub database_url: String,
    pub redis_url: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_event_topic_prefix: String,
    pub mqtt_notify_topic_prefix: String,
    pub ingest_enabled: bool,
    pub throttle_window_seconds: u64,
    pub event_max_future_skew_ms: i64,
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicyKind,
    pub realtime: ChannelClassConfig,
    pub async_class: ChannelClassConfig,
    pub third_party: ChannelClassConfig,
    pub escalation_role: String,
    pub monitor_interval_seconds: u64,
    pub monitor_queue_depth_threshold: usize,
    pub monitor_latency_ms_threshold: u64,
    pub monitor_error_rate_threshold: f64,
    pub monitor_utilization_threshold: f64,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("HMS_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("HMS_DATABASE_URL".to_string()))?;
        let http_addr = env::var("HMS_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let redis_url =
            env::var("HMS_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let mqtt_host = env::var("HMS_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_u16_with_default("HMS_MQTT_PORT", 1883)?;
        let mqtt_username = read_optional("HMS_MQTT_USERNAME");
        let mqtt_password = read_optional("HMS_MQTT_PASSWORD");
        let mqtt_topic_prefix =
            env::var("HMS_MQTT_TOPIC_PREFIX").unwrap_or_else(|_| "hms".to_string());
        let mqtt_event_topic_prefix = env::var("HMS_MQTT_EVENT_TOPIC_PREFIX")
            .unwrap_or_else(|_| format!("{}/vitals", mqtt_topic_prefix.trim_end_matches('/')));
        let mqtt_notify_topic_prefix = env::var("HMS_MQTT_NOTIFY_TOPIC_PREFIX")
            .unwrap_or_else(|_| format!("{}/notify", mqtt_topic_prefix.trim_end_matches('/')));
        let ingest_enabled = read_bool_with_default("HMS_INGEST", false);
        let throttle_window_seconds = read_u64_with_default("HMS_THROTTLE_WINDOW_SECONDS", 60)?;
        let event_max_future_skew_ms =
            read_u64_with_default("HMS_EVENT_MAX_FUTURE_SKEW_MS", 5 * 60 * 1000)? as i64;
        let queue_capacity = read_u64_with_default("HMS_QUEUE_CAPACITY", 10_000)? as usize;
        let overflow_policy = read_overflow_policy("HMS_QUEUE_OVERFLOW_POLICY")?;
        let realtime = read_class_config(
            "HMS_REALTIME",
            ChannelClassConfig {
                workers: 8,
                max_attempts: 3,
                backoff_base_ms: 200,
                backoff_cap_ms: 2_000,
            },
        )?;
        let async_class = read_class_config(
            "HMS_ASYNC",
            ChannelClassConfig {
                workers: 4,
                max_attempts: 5,
                backoff_base_ms: 2_000,
                backoff_cap_ms: 60_000,
            },
        )?;
        let third_party = read_class_config(
            "HMS_THIRD_PARTY",
            ChannelClassConfig {
                workers: 2,
                max_attempts: 5,
                backoff_base_ms: 5_000,
                backoff_cap_ms: 120_000,
            },
        )?;
        let escalation_role =
            env::var("HMS_ESCALATION_ROLE").unwrap_or_else(|_| "manager".to_string());
        let monitor_interval_seconds = read_u64_with_default("HMS_MONITOR_INTERVAL_SECONDS", 30)?;
        let monitor_queue_depth_threshold =
            read_u64_with_default("HMS_MONITOR_QUEUE_DEPTH_THRESHOLD", 1_000)? as usize;
        let monitor_latency_ms_threshold =
            read_u64_with_default("HMS_MONITOR_LATENCY_MS_THRESHOLD", 5_000)?;
        let monitor_error_rate_threshold =
            read_f64_with_default("HMS_MONITOR_ERROR_RATE_THRESHOLD", 0.05)?;
        let monitor_utilization_threshold =
            read_f64_with_default("HMS_MONITOR_UTILIZATION_THRESHOLD", 0.9)?;

        Ok(Self {
            http_addr,
            database_url,
            redis_url,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_event_topic_prefix,
            mqtt_notify_topic_prefix,
            ingest_enabled,
            throttle_window_seconds,
            event_max_future_skew_ms,
            queue_capacity,
            overflow_policy,
            realtime,
            async_class,
            third_party,
            escalation_role,
            monitor_interval_seconds,
            monitor_queue_depth_threshold,
            monitor_latency_ms_threshold,
            monitor_error_rate_threshold,
            monitor_utilization_threshold,
        })
    }
}

fn read_class_config(
    prefix: &str,
    default: ChannelClassConfig,
) -> Result<ChannelClassConfig, ConfigError> {
    let workers =
        read_u64_with_default(&format!("{}_WORKERS", prefix), default.workers as u64)? as usize;
    let max_attempts = read_u64_with_default(
        &format!("{}_MAX_ATTEMPTS", prefix),
        default.max_attempts as u64,
    )? as u32;
    let backoff_base_ms =
        read_u64_with_default(&format!("{}_BACKOFF_BASE_MS", prefix), default.backoff_base_ms)?;
    let backoff_cap_ms =
        read_u64_with_default(&format!("{}_BACKOFF_CAP_MS", prefix), default.backoff_cap_ms)?;
    Ok(ChannelClassConfig {
        workers: workers.max(1),
        max_attempts: max_attempts.max(1),
        backoff_base_ms,
        backoff_cap_ms: backoff_cap_ms.max(backoff_base_ms),
    })
}

fn read_overflow_policy(key: &str) -> Result<OverflowPolicyKind, ConfigError> {
    match env::var(key) {
        Err(_) => Ok(OverflowPolicyKind::DropLowest),
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "drop_lowest" | "drop" => Ok(OverflowPolicyKind::DropLowest),
            "reject" | "backpressure" => Ok(OverflowPolicyKind::Reject),
            _ => Err(ConfigError::Invalid(key.to_string(), value)),
        },
    }
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_f64_with_default(key: &str, default: f64) -> Result<f64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<f64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
