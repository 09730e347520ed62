//! 体征事件校验与标准化：必填字段、指标名归一、单位换算、数值范围、时间戳偏移。
//!
//! 校验失败的事件直接拒绝，不入队、不重试。

use domain::{NormalizedEvent, RawVitalEvent};
use uuid::Uuid;

/// 规范化错误（均为校验错误）。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("unsupported unit {unit} for {metric}")]
    UnsupportedUnit { metric: String, unit: String },
    #[error("{metric} value {value} out of range [{min}, {max}]")]
    OutOfRange {
        metric: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("timestamp {ts_ms} is ahead of server time {now_ms}")]
    FutureTimestamp { ts_ms: i64, now_ms: i64 },
}

/// 单位换算规则：`canonical = value * factor + offset`。
#[derive(Debug, Clone, Copy, PartialEq)]
struct UnitConversion {
    unit: &'static str,
    factor: f64,
    offset: f64,
}

/// 已知指标的规格。
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    pub name: &'static str,
    pub unit: &'static str,
    pub min: f64,
    pub max: f64,
    aliases: &'static [&'static str],
    conversions: &'static [UnitConversion],
    /// 数值落在 (0, 1] 时视为比例并换算为百分比
    fraction_as_percent: bool,
}

const FAHRENHEIT_FACTOR: f64 = 5.0 / 9.0;

const METRICS: &[MetricSpec] = &[
    MetricSpec {
        name: "heartRate",
        unit: "bpm",
        min: 20.0,
        max: 300.0,
        aliases: &["heart_rate", "hr", "pulse"],
        conversions: &[UnitConversion {
            unit: "bpm",
            factor: 1.0,
            offset: 0.0,
        }],
        fraction_as_percent: false,
    },
    MetricSpec {
        name: "spo2",
        unit: "%",
        min: 50.0,
        max: 100.0,
        aliases: &["spO2", "blood_oxygen", "bloodOxygen", "oxygen_saturation"],
        conversions: &[UnitConversion {
            unit: "%",
            factor: 1.0,
            offset: 0.0,
        }],
        fraction_as_percent: true,
    },
    MetricSpec {
        name: "bodyTemperature",
        unit: "°C",
        min: 30.0,
        max: 45.0,
        aliases: &["body_temperature", "temperature", "temp"],
        conversions: &[
            UnitConversion {
                unit: "°C",
                factor: 1.0,
                offset: 0.0,
            },
            UnitConversion {
                unit: "C",
                factor: 1.0,
                offset: 0.0,
            },
            UnitConversion {
                unit: "°F",
                factor: FAHRENHEIT_FACTOR,
                offset: -32.0 * FAHRENHEIT_FACTOR,
            },
            UnitConversion {
                unit: "F",
                factor: FAHRENHEIT_FACTOR,
                offset: -32.0 * FAHRENHEIT_FACTOR,
            },
        ],
        fraction_as_percent: false,
    },
    MetricSpec {
        name: "systolicBp",
        unit: "mmHg",
        min: 40.0,
        max: 300.0,
        aliases: &["systolic", "sbp", "systolic_bp"],
        conversions: &[
            UnitConversion {
                unit: "mmHg",
                factor: 1.0,
                offset: 0.0,
            },
            UnitConversion {
                unit: "kPa",
                factor: 7.500_62,
                offset: 0.0,
            },
        ],
        fraction_as_percent: false,
    },
    MetricSpec {
        name: "diastolicBp",
        unit: "mmHg",
        min: 20.0,
        max: 200.0,
        aliases: &["diastolic", "dbp", "diastolic_bp"],
        conversions: &[
            UnitConversion {
                unit: "mmHg",
                factor: 1.0,
                offset: 0.0,
            },
            UnitConversion {
                unit: "kPa",
                factor: 7.500_62,
                offset: 0.0,
            },
        ],
        fraction_as_percent: false,
    },
    MetricSpec {
        name: "respiratoryRate",
        unit: "rpm",
        min: 0.0,
        max: 80.0,
        aliases: &["respiratory_rate", "rr", "breath_rate"],
        conversions: &[UnitConversion {
            unit: "rpm",
            factor: 1.0,
            offset: 0.0,
        }],
        fraction_as_percent: false,
    },
    MetricSpec {
        name: "bloodGlucose",
        unit: "mmol/L",
        min: 0.5,
        max: 50.0,
        aliases: &["blood_glucose", "glucose"],
        conversions: &[
            UnitConversion {
                unit: "mmol/L",
                factor: 1.0,
                offset: 0.0,
            },
            UnitConversion {
                unit: "mg/dL",
                factor: 1.0 / 18.0,
                offset: 0.0,
            },
        ],
        fraction_as_percent: false,
    },
];

/// 按名称或别名（忽略大小写）查找指标规格。
pub fn find_metric(name: &str) -> Option<&'static MetricSpec> {
    let name = name.trim();
    METRICS.iter().find(|spec| {
        spec.name.eq_ignore_ascii_case(name)
            || spec
                .aliases
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(name))
    })
}

/// 指标规范名：已登记指标取规范名，未登记指标去除首尾空白后原样返回。
///
/// 事件与规则两侧共用，保证别名写法的规则能匹配标准化后的事件。
pub fn canonical_metric(name: &str) -> String {
    match find_metric(name) {
        Some(spec) => spec.name.to_string(),
        None => name.trim().to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeConfig {
    /// 允许的设备时钟超前量
    pub max_future_skew_ms: i64,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            max_future_skew_ms: 5 * 60 * 1000,
        }
    }
}

/// RawVitalEvent -> NormalizedEvent。
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizeConfig,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, NormalizeError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(NormalizeError::MissingField(field)),
    }
}

impl Normalizer {
    pub fn new(config: NormalizeConfig) -> Self {
        Self { config }
    }

    pub fn normalize(
        &self,
        event: RawVitalEvent,
        now_ms: i64,
    ) -> Result<NormalizedEvent, NormalizeError> {
        let tenant_id = required(event.tenant_id, "tenantId")?;
        let subject_id = required(event.subject_id, "subjectId")?;
        let metric = required(event.metric, "metric")?;
        let value = event.value.ok_or(NormalizeError::MissingField("value"))?;
        let ts_ms = event
            .timestamp_ms
            .ok_or(NormalizeError::MissingField("timestamp"))?;
        if !value.is_finite() {
            return Err(NormalizeError::InvalidValue(format!(
                "{} is not a finite number",
                value
            )));
        }
        if ts_ms <= 0 {
            return Err(NormalizeError::InvalidValue(format!(
                "timestamp {} must be positive",
                ts_ms
            )));
        }
        if ts_ms > now_ms + self.config.max_future_skew_ms {
            return Err(NormalizeError::FutureTimestamp { ts_ms, now_ms });
        }
        let unit = event
            .unit
            .map(|unit| unit.trim().to_string())
            .filter(|unit| !unit.is_empty());

        let (metric, value, unit) = match find_metric(&metric) {
            Some(spec) => {
                let value = convert(spec, value, unit.as_deref())?;
                if value < spec.min || value > spec.max {
                    return Err(NormalizeError::OutOfRange {
                        metric: spec.name.to_string(),
                        value,
                        min: spec.min,
                        max: spec.max,
                    });
                }
                (spec.name.to_string(), value, spec.unit.to_string())
            }
            // 未登记指标原样透传，由租户自定义规则处理
            None => (metric, value, unit.unwrap_or_default()),
        };

        let device_sn = event.device_sn.filter(|sn| !sn.trim().is_empty());
        let event_id = match event.event_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => derive_event_id(&tenant_id, &subject_id, &metric, ts_ms),
        };
        Ok(NormalizedEvent {
            event_id,
            tenant_id,
            subject_id,
            device_sn,
            metric,
            value,
            unit,
            ts_ms,
        })
    }
}

fn convert(spec: &MetricSpec, value: f64, unit: Option<&str>) -> Result<f64, NormalizeError> {
    let Some(unit) = unit else {
        if spec.fraction_as_percent && value > 0.0 && value <= 1.0 {
            return Ok(value * 100.0);
        }
        return Ok(value);
    };
    if spec.fraction_as_percent && (unit.eq_ignore_ascii_case("ratio") || unit == "1") {
        return Ok(value * 100.0);
    }
    let conversion = spec
        .conversions
        .iter()
        .find(|item| item.unit.eq_ignore_ascii_case(unit))
        .ok_or_else(|| NormalizeError::UnsupportedUnit {
            metric: spec.name.to_string(),
            unit: unit.to_string(),
        })?;
    let converted = value * conversion.factor + conversion.offset;
    if spec.fraction_as_percent && converted > 0.0 && converted <= 1.0 {
        return Ok(converted * 100.0);
    }
    Ok(converted)
}

/// 缺失 eventId 时按（租户, 对象, 指标, 时间戳）生成稳定 ID，重复投递得到同一 ID。
pub fn derive_event_id(tenant_id: &str, subject_id: &str, metric: &str, ts_ms: i64) -> String {
    let name = format!("event:{}:{}:{}:{}", tenant_id, subject_id, metric, ts_ms);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}
