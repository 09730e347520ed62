/// 接入层收到的原始体征事件（字段均可缺失，由 normalize 校验）。
#[derive(Debug, Clone, Default)]
pub struct RawVitalEvent {
    pub event_id: Option<String>,
    pub source: Option<String>,
    pub tenant_id: Option<String>,
    pub subject_id: Option<String>,
    pub device_sn: Option<String>,
    pub metric: Option<String>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub timestamp_ms: Option<i64>,
    pub received_at_ms: i64,
}

/// 校验并标准化后的体征事件（不可变，生命周期短）。
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub event_id: String,
    pub tenant_id: String,
    pub subject_id: String,
    pub device_sn: Option<String>,
    pub metric: String,
    pub value: f64,
    pub unit: String,
    pub ts_ms: i64,
}
