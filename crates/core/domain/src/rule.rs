use crate::notification::ChannelKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 规则类型，按评估成本升序排列。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleType {
    Single,
    Composite,
    Complex,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Single => "SINGLE",
            RuleType::Composite => "COMPOSITE",
            RuleType::Complex => "COMPLEX",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SINGLE" => Some(RuleType::Single),
            "COMPOSITE" => Some(RuleType::Composite),
            "COMPLEX" => Some(RuleType::Complex),
            _ => None,
        }
    }
}

/// 告警严重级别（升序）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Minor,
    Major,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Minor => "MINOR",
            Severity::Major => "MAJOR",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INFO" => Some(Severity::Info),
            "MINOR" => Some(Severity::Minor),
            "MAJOR" => Some(Severity::Major),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn urgency(&self) -> Urgency {
        match self {
            Severity::Info => Urgency::Low,
            Severity::Minor => Urgency::Medium,
            Severity::Major => Urgency::High,
            Severity::Critical => Urgency::Critical,
        }
    }
}

/// 紧急程度：决定派发优先级与确认超时。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "LOW",
            Urgency::Medium => "MEDIUM",
            Urgency::High => "HIGH",
            Urgency::Critical => "CRITICAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(Urgency::Low),
            "MEDIUM" => Some(Urgency::Medium),
            "HIGH" => Some(Urgency::High),
            "CRITICAL" => Some(Urgency::Critical),
            _ => None,
        }
    }

    /// 未确认时触发升级的超时。
    pub fn escalation_timeout(&self) -> Duration {
        match self {
            Urgency::Critical => Duration::from_secs(15 * 60),
            Urgency::High => Duration::from_secs(60 * 60),
            Urgency::Medium => Duration::from_secs(4 * 60 * 60),
            Urgency::Low => Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Comparison {
    pub fn matches(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Gte => value >= threshold,
            Comparison::Lt => value < threshold,
            Comparison::Lte => value <= threshold,
            Comparison::Eq => (value - threshold).abs() < f64::EPSILON,
            Comparison::Ne => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricCondition {
    pub metric: String,
    pub op: Comparison,
    pub value: f64,
}

/// 规则表达式（以 JSON 存储在规则配置中）。
///
/// - `threshold`：SINGLE，单指标阈值
/// - `allOf` / `anyOf`：COMPOSITE，时间窗口内多指标布尔组合
/// - `sustained`：COMPLEX，窗口内满足条件的样本数达到下限
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RuleExpression {
    Threshold {
        op: Comparison,
        value: f64,
    },
    #[serde(rename_all = "camelCase")]
    AllOf {
        conditions: Vec<MetricCondition>,
        window_ms: i64,
    },
    #[serde(rename_all = "camelCase")]
    AnyOf {
        conditions: Vec<MetricCondition>,
        window_ms: i64,
    },
    #[serde(rename_all = "camelCase")]
    Sustained {
        op: Comparison,
        value: f64,
        min_occurrences: u32,
        window_ms: i64,
    },
}

impl RuleExpression {
    /// 表达式对应的规则类型。
    pub fn rule_type(&self) -> RuleType {
        match self {
            RuleExpression::Threshold { .. } => RuleType::Single,
            RuleExpression::AllOf { .. } | RuleExpression::AnyOf { .. } => RuleType::Composite,
            RuleExpression::Sustained { .. } => RuleType::Complex,
        }
    }
}

/// 告警规则（由规则管理维护，规则引擎只读）。
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    pub rule_id: String,
    pub tenant_id: String,
    pub rule_type: RuleType,
    pub metric: String,
    pub expression: RuleExpression,
    pub severity: Severity,
    pub notify_channels: Vec<ChannelKind>,
    pub enabled: bool,
    pub created_at_ms: i64,
}
