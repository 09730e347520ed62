use domain::{
    AlertRule, ChannelKind, Comparison, MetricCondition, RuleExpression, RuleType, Severity,
};
use hms_rules::RuleCache;
use hms_storage::InMemoryAlertRuleStore;
use std::sync::Arc;

fn rule(id: &str, rule_type: RuleType, created_at_ms: i64) -> AlertRule {
    AlertRule {
        rule_id: id.to_string(),
        tenant_id: "t1".to_string(),
        rule_type,
        metric: "heartRate".to_string(),
        expression: RuleExpression::Threshold {
            op: Comparison::Gt,
            value: 120.0,
        },
        severity: Severity::Major,
        notify_channels: vec![ChannelKind::Push],
        enabled: true,
        created_at_ms,
    }
}

#[tokio::test]
async fn caches_until_invalidated() {
    let store = Arc::new(InMemoryAlertRuleStore::new());
    store.upsert_rule(rule("r1", RuleType::Single, 1)).expect("upsert");
    let cache = RuleCache::new(store.clone());

    let first = cache.rules_for("t1").await.expect("load");
    assert_eq!(first.len(), 1);
    assert!(cache.is_cached("t1"));

    store.upsert_rule(rule("r2", RuleType::Single, 2)).expect("upsert");
    assert_eq!(cache.rules_for("t1").await.expect("cached").len(), 1);

    cache.invalidate("t1");
    assert!(!cache.is_cached("t1"));
    let reloaded = cache.rules_for("t1").await.expect("reload");
    let ids: Vec<&str> = reloaded.iter().map(|rule| rule.rule_id.as_str()).collect();
    assert_eq!(ids, vec!["r1", "r2"]);
}

#[tokio::test]
async fn inconsistent_rule_type_is_skipped() {
    let store = Arc::new(InMemoryAlertRuleStore::new());
    store.upsert_rule(rule("ok", RuleType::Single, 1)).expect("upsert");
    store.upsert_rule(rule("bad", RuleType::Complex, 2)).expect("upsert");
    let cache = RuleCache::new(store);
    let rules = cache.rules_for("t1").await.expect("load");
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].rule_id, "ok");
    assert!(cache.rules_for("t2").await.expect("empty").is_empty());
}

#[tokio::test]
async fn rule_metrics_are_canonicalised_on_load() {
    let store = Arc::new(InMemoryAlertRuleStore::new());
    let mut single = rule("alias", RuleType::Single, 1);
    single.metric = "heart_rate".to_string();
    store.upsert_rule(single).expect("upsert");
    let composite = AlertRule {
        rule_id: "combo".to_string(),
        rule_type: RuleType::Composite,
        metric: "HR".to_string(),
        expression: RuleExpression::AllOf {
            conditions: vec![
                MetricCondition {
                    metric: "pulse".to_string(),
                    op: Comparison::Gt,
                    value: 120.0,
                },
                MetricCondition {
                    metric: "blood_oxygen".to_string(),
                    op: Comparison::Lt,
                    value: 90.0,
                },
            ],
            window_ms: 60_000,
        },
        ..rule("combo", RuleType::Composite, 2)
    };
    store.upsert_rule(composite).expect("upsert");

    let cache = RuleCache::new(store);
    let rules = cache.rules_for("t1").await.expect("load");
    assert_eq!(rules[0].metric, "heartRate");
    assert_eq!(rules[1].metric, "heartRate");
    match &rules[1].expression {
        RuleExpression::AllOf { conditions, .. } => {
            let metrics: Vec<&str> = conditions.iter().map(|c| c.metric.as_str()).collect();
            assert_eq!(metrics, vec!["heartRate", "spo2"]);
        }
        other => panic!("unexpected expression {other:?}"),
    }
}
