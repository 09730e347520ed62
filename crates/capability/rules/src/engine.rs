//! 规则匹配引擎。
//!
//! 每个事件都会评估全部规则；同一（对象, 指标）只保留严重级别最高的命中，
//! 级别相同时取规则插入顺序靠前者。

use domain::{
    AlertRule, ChannelKind, Comparison, MetricCondition, NormalizedEvent, RuleExpression,
    RuleType, Severity,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleEngineConfig {
    /// 每个（对象, 指标）保留的历史跨度
    pub history_window_ms: i64,
    /// 每个（对象, 指标）保留的样本上限
    pub max_samples: usize,
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            history_window_ms: 30 * 60 * 1000,
            max_samples: 256,
        }
    }
}

/// 规则命中产生的候选告警（尚未去重、未绑定组织）。
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    pub tenant_id: String,
    pub subject_id: String,
    pub rule_id: String,
    pub rule_type: RuleType,
    pub metric: String,
    pub value: f64,
    pub severity: Severity,
    pub notify_channels: Vec<ChannelKind>,
    pub occurred_at_ms: i64,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    ts_ms: i64,
    value: f64,
}

type SubjectKey = (String, String);

#[derive(Default)]
struct SubjectHistory {
    metrics: HashMap<String, VecDeque<Sample>>,
}

impl SubjectHistory {
    fn record(&mut self, metric: &str, sample: Sample, config: &RuleEngineConfig) {
        let samples = self.metrics.entry(metric.to_string()).or_default();
        // 乱序到达的样本按时间戳插入
        let position = samples
            .iter()
            .rposition(|item| item.ts_ms <= sample.ts_ms)
            .map(|index| index + 1)
            .unwrap_or(0);
        samples.insert(position, sample);
        let newest = samples.back().map(|item| item.ts_ms).unwrap_or(sample.ts_ms);
        while let Some(front) = samples.front() {
            if front.ts_ms < newest - config.history_window_ms || samples.len() > config.max_samples
            {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// `[at - window, at]` 内最新的样本值。
    fn latest(&self, metric: &str, at_ms: i64, window_ms: i64) -> Option<f64> {
        self.metrics.get(metric)?.iter().rev().find_map(|sample| {
            (sample.ts_ms <= at_ms && sample.ts_ms >= at_ms - window_ms).then_some(sample.value)
        })
    }

    fn count_matching(&self, metric: &str, at_ms: i64, window_ms: i64, op: Comparison, value: f64) -> u32 {
        self.metrics
            .get(metric)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|sample| sample.ts_ms <= at_ms && sample.ts_ms >= at_ms - window_ms)
                    .filter(|sample| op.matches(sample.value, value))
                    .count() as u32
            })
            .unwrap_or(0)
    }
}

pub struct RuleEngine {
    config: RuleEngineConfig,
    history: Mutex<HashMap<SubjectKey, SubjectHistory>>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(RuleEngineConfig::default())
    }
}

impl RuleEngine {
    pub fn new(config: RuleEngineConfig) -> Self {
        Self {
            config,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// 记录事件并评估规则，返回每个指标至多一个候选告警。
    pub fn evaluate(&self, event: &NormalizedEvent, rules: &[AlertRule]) -> Vec<AlertCandidate> {
        let mut history = match self.history.lock() {
            Ok(history) => history,
            Err(poisoned) => poisoned.into_inner(),
        };
        let subject = history
            .entry((event.tenant_id.clone(), event.subject_id.clone()))
            .or_default();
        subject.record(
            &event.metric,
            Sample {
                ts_ms: event.ts_ms,
                value: event.value,
            },
            &self.config,
        );

        // (插入序号, 候选)
        let mut winners: Vec<(usize, AlertCandidate)> = Vec::new();
        for rule_type in [RuleType::Single, RuleType::Composite, RuleType::Complex] {
            for (order, rule) in rules.iter().enumerate() {
                if rule.tenant_id != event.tenant_id || rule.rule_type != rule_type {
                    continue;
                }
                let Some(value) = evaluate_rule(rule, event, subject) else {
                    continue;
                };
                let candidate = AlertCandidate {
                    tenant_id: event.tenant_id.clone(),
                    subject_id: event.subject_id.clone(),
                    rule_id: rule.rule_id.clone(),
                    rule_type: rule.rule_type,
                    metric: rule.metric.clone(),
                    value,
                    severity: rule.severity,
                    notify_channels: rule.notify_channels.clone(),
                    occurred_at_ms: event.ts_ms,
                };
                match winners
                    .iter_mut()
                    .find(|(_, existing)| existing.metric == candidate.metric)
                {
                    Some(slot) => {
                        let (existing_order, existing) = &*slot;
                        let better = candidate.severity > existing.severity
                            || (candidate.severity == existing.severity && order < *existing_order);
                        if better {
                            *slot = (order, candidate);
                        }
                    }
                    None => winners.push((order, candidate)),
                }
            }
        }
        winners.into_iter().map(|(_, candidate)| candidate).collect()
    }

    /// 当前持有历史样本的对象数。
    pub fn tracked_subjects(&self) -> usize {
        self.history.lock().map(|history| history.len()).unwrap_or(0)
    }

    /// 清理最新样本早于 `before_ms` 的对象。
    pub fn evict_idle(&self, before_ms: i64) -> usize {
        let mut history = match self.history.lock() {
            Ok(history) => history,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = history.len();
        history.retain(|_, subject| {
            subject
                .metrics
                .values()
                .filter_map(|samples| samples.back())
                .any(|sample| sample.ts_ms >= before_ms)
        });
        before - history.len()
    }
}

/// 命中时返回告警取值。
fn evaluate_rule(rule: &AlertRule, event: &NormalizedEvent, subject: &SubjectHistory) -> Option<f64> {
    match &rule.expression {
        RuleExpression::Threshold { op, value } => {
            (rule.metric == event.metric && op.matches(event.value, *value)).then_some(event.value)
        }
        RuleExpression::AllOf {
            conditions,
            window_ms,
        } => {
            if !involves(rule, conditions, &event.metric) || conditions.is_empty() {
                return None;
            }
            let all = conditions.iter().all(|condition| {
                condition_holds(condition, subject, event.ts_ms, *window_ms)
            });
            all.then(|| composite_value(rule, event, subject, *window_ms))
        }
        RuleExpression::AnyOf {
            conditions,
            window_ms,
        } => {
            if !involves(rule, conditions, &event.metric) {
                return None;
            }
            let any = conditions.iter().any(|condition| {
                condition_holds(condition, subject, event.ts_ms, *window_ms)
            });
            any.then(|| composite_value(rule, event, subject, *window_ms))
        }
        RuleExpression::Sustained {
            op,
            value,
            min_occurrences,
            window_ms,
        } => {
            if rule.metric != event.metric || !op.matches(event.value, *value) {
                return None;
            }
            let count = subject.count_matching(&rule.metric, event.ts_ms, *window_ms, *op, *value);
            (count >= (*min_occurrences).max(1)).then_some(event.value)
        }
    }
}

/// 组合规则只由其涉及的指标的事件触发。
fn involves(rule: &AlertRule, conditions: &[MetricCondition], metric: &str) -> bool {
    rule.metric == metric || conditions.iter().any(|condition| condition.metric == metric)
}

fn condition_holds(
    condition: &MetricCondition,
    subject: &SubjectHistory,
    at_ms: i64,
    window_ms: i64,
) -> bool {
    subject
        .latest(&condition.metric, at_ms, window_ms)
        .map(|latest| condition.op.matches(latest, condition.value))
        .unwrap_or(false)
}

fn composite_value(
    rule: &AlertRule,
    event: &NormalizedEvent,
    subject: &SubjectHistory,
    window_ms: i64,
) -> f64 {
    if rule.metric == event.metric {
        return event.value;
    }
    subject
        .latest(&rule.metric, event.ts_ms, window_ms)
        .unwrap_or(event.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RuleEngineConfig {
        RuleEngineConfig {
            history_window_ms: 1_000,
            max_samples: 3,
        }
    }

    #[test]
    fn history_keeps_order_and_bounds() {
        let mut history = SubjectHistory::default();
        for (ts, value) in [(100, 1.0), (300, 3.0), (200, 2.0), (400, 4.0)] {
            history.record("hr", Sample { ts_ms: ts, value }, &config());
        }
        let samples: Vec<i64> = history.metrics["hr"].iter().map(|s| s.ts_ms).collect();
        assert_eq!(samples, vec![200, 300, 400]);

        history.record("hr", Sample { ts_ms: 5_000, value: 5.0 }, &config());
        assert_eq!(history.metrics["hr"].len(), 1);
        assert_eq!(history.latest("hr", 5_000, 10), Some(5.0));
        assert_eq!(history.latest("hr", 6_000, 10), None);
    }
}
