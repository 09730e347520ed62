use crate::IngestError;
use domain::RawVitalEvent;
use serde::Deserialize;

/// 设备上报的单条体征读数。
///
/// 字段全部可选，缺失与否由标准化阶段判定。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalPayload {
    pub event_id: Option<String>,
    pub subject_id: Option<String>,
    pub device_sn: Option<String>,
    pub metric: Option<String>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    #[serde(alias = "timestampMs", alias = "ts")]
    pub timestamp: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PayloadBody {
    Batch(Vec<VitalPayload>),
    Single(VitalPayload),
}

impl VitalPayload {
    /// 租户来自可信信道（主题或路径），不取报文自带值。
    pub fn into_raw(
        self,
        tenant_id: &str,
        default_device_sn: Option<&str>,
        source: &str,
        received_at_ms: i64,
    ) -> RawVitalEvent {
        RawVitalEvent {
            event_id: self.event_id,
            source: Some(source.to_string()),
            tenant_id: Some(tenant_id.to_string()),
            subject_id: self.subject_id,
            device_sn: self
                .device_sn
                .or_else(|| default_device_sn.map(str::to_string)),
            metric: self.metric,
            value: self.value,
            unit: self.unit,
            timestamp_ms: self.timestamp,
            received_at_ms,
        }
    }
}

/// 解析 MQTT 报文：单个对象或对象数组。
pub fn parse_payload(
    tenant_id: &str,
    device_sn: &str,
    payload: &[u8],
    received_at_ms: i64,
) -> Result<Vec<RawVitalEvent>, IngestError> {
    let body: PayloadBody = serde_json::from_slice(payload)
        .map_err(|err| IngestError::InvalidPayload(err.to_string()))?;
    let items = match body {
        PayloadBody::Batch(items) => items,
        PayloadBody::Single(item) => vec![item],
    };
    Ok(items
        .into_iter()
        .map(|item| item.into_raw(tenant_id, Some(device_sn), "mqtt", received_at_ms))
        .collect())
}

/// 从 `{prefix}/{tenantId}/{deviceSn}` 中提取租户与设备序列号。
pub fn extract_scope(prefix: &str, topic: &str) -> Option<(String, String)> {
    let prefix = prefix.trim_matches('/');
    let topic = topic.trim_matches('/');
    let rest = if prefix.is_empty() {
        topic
    } else {
        topic.strip_prefix(prefix)?.strip_prefix('/')?
    };
    let mut parts = rest.split('/');
    let tenant_id = parts.next().filter(|part| !part.is_empty())?;
    let device_sn = parts.next().filter(|part| !part.is_empty())?;
    if parts.next().is_some() {
        return None;
    }
    Some((tenant_id.to_string(), device_sn.to_string()))
}
