use domain::{
    AlertRule, ChannelKind, Comparison, MetricCondition, NormalizedEvent, RuleExpression,
    RuleType, Severity,
};
use hms_rules::RuleEngine;

fn event(subject: &str, metric: &str, value: f64, ts_ms: i64) -> NormalizedEvent {
    NormalizedEvent {
        event_id: format!("{}-{}-{}", subject, metric, ts_ms),
        tenant_id: "t1".to_string(),
        subject_id: subject.to_string(),
        device_sn: None,
        metric: metric.to_string(),
        value,
        unit: String::new(),
        ts_ms,
    }
}

fn rule(id: &str, metric: &str, expression: RuleExpression, severity: Severity) -> AlertRule {
    AlertRule {
        rule_id: id.to_string(),
        tenant_id: "t1".to_string(),
        rule_type: expression.rule_type(),
        metric: metric.to_string(),
        expression,
        severity,
        notify_channels: vec![ChannelKind::InApp],
        enabled: true,
        created_at_ms: 0,
    }
}

fn threshold(op: Comparison, value: f64) -> RuleExpression {
    RuleExpression::Threshold { op, value }
}

#[test]
fn single_threshold_matches_only_its_metric() {
    let engine = RuleEngine::default();
    let rules = vec![rule("r1", "heartRate", threshold(Comparison::Gt, 120.0), Severity::Major)];
    let hits = engine.evaluate(&event("s1", "heartRate", 150.0, 1_000), &rules);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].rule_id, "r1");
    assert_eq!(hits[0].severity, Severity::Major);
    assert_eq!(hits[0].value, 150.0);
    assert!(engine.evaluate(&event("s1", "heartRate", 100.0, 2_000), &rules).is_empty());
    assert!(engine.evaluate(&event("s1", "spo2", 150.0, 3_000), &rules).is_empty());
}

#[test]
fn highest_severity_wins_and_ties_follow_insertion_order() {
    let engine = RuleEngine::default();
    let rules = vec![
        rule("minor", "heartRate", threshold(Comparison::Gt, 100.0), Severity::Minor),
        rule("major-a", "heartRate", threshold(Comparison::Gt, 110.0), Severity::Major),
        rule("major-b", "heartRate", threshold(Comparison::Gt, 90.0), Severity::Major),
    ];
    let hits = engine.evaluate(&event("s1", "heartRate", 150.0, 1_000), &rules);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].rule_id, "major-a");
}

#[test]
fn composite_uses_recent_values_within_window() {
    let engine = RuleEngine::default();
    let expression = RuleExpression::AllOf {
        conditions: vec![
            MetricCondition {
                metric: "heartRate".to_string(),
                op: Comparison::Gt,
                value: 110.0,
            },
            MetricCondition {
                metric: "spo2".to_string(),
                op: Comparison::Lt,
                value: 92.0,
            },
        ],
        window_ms: 60_000,
    };
    let rules = vec![rule("combo", "spo2", expression, Severity::Critical)];
    assert_eq!(rules[0].rule_type, RuleType::Composite);

    assert!(engine.evaluate(&event("s1", "heartRate", 130.0, 0), &rules).is_empty());
    let hits = engine.evaluate(&event("s1", "spo2", 89.0, 30_000), &rules);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].metric, "spo2");
    assert_eq!(hits[0].value, 89.0);

    // 心率样本已超出窗口
    assert!(engine.evaluate(&event("s1", "spo2", 88.0, 120_000), &rules).is_empty());
    // 其他对象的历史互不影响
    assert!(engine.evaluate(&event("s2", "spo2", 80.0, 30_000), &rules).is_empty());
}

#[test]
fn sustained_requires_min_occurrences_in_window() {
    let engine = RuleEngine::default();
    let expression = RuleExpression::Sustained {
        op: Comparison::Gt,
        value: 38.0,
        min_occurrences: 3,
        window_ms: 10 * 60_000,
    };
    let rules = vec![rule("fever", "bodyTemperature", expression, Severity::Major)];
    assert!(engine.evaluate(&event("s1", "bodyTemperature", 38.5, 0), &rules).is_empty());
    assert!(engine.evaluate(&event("s1", "bodyTemperature", 37.0, 60_000), &rules).is_empty());
    assert!(engine.evaluate(&event("s1", "bodyTemperature", 38.6, 120_000), &rules).is_empty());
    let hits = engine.evaluate(&event("s1", "bodyTemperature", 38.9, 180_000), &rules);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].rule_type, RuleType::Complex);

    // 首个高温样本滑出窗口后不再满足
    assert!(
        engine
            .evaluate(&event("s1", "bodyTemperature", 38.7, 11 * 60_000), &rules)
            .len()
            == 1
    );
    assert!(
        engine
            .evaluate(&event("s1", "bodyTemperature", 39.0, 25 * 60_000), &rules)
            .is_empty()
    );
    assert_eq!(engine.tracked_subjects(), 1);
    assert_eq!(engine.evict_idle(30 * 60_000), 1);
}
