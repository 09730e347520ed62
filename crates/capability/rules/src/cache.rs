use crate::RuleError;
use domain::{AlertRule, RuleExpression, TenantContext};
use hms_normalize::canonical_metric;
use hms_storage::AlertRuleStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// 规则中的指标名统一为事件标准化后的规范名，别名与大小写差异不影响匹配。
fn canonicalize(mut rule: AlertRule) -> AlertRule {
    rule.metric = canonical_metric(&rule.metric);
    if let RuleExpression::AllOf { conditions, .. } | RuleExpression::AnyOf { conditions, .. } =
        &mut rule.expression
    {
        for condition in conditions.iter_mut() {
            condition.metric = canonical_metric(&condition.metric);
        }
    }
    rule
}

#[derive(Default)]
struct TenantSlot {
    version: u64,
    rules: Option<Arc<Vec<AlertRule>>>,
}

/// 租户级规则缓存（旁路加载，规则变更时整租户失效）。
pub struct RuleCache {
    store: Arc<dyn AlertRuleStore>,
    tenants: Mutex<HashMap<String, TenantSlot>>,
}

impl RuleCache {
    pub fn new(store: Arc<dyn AlertRuleStore>) -> Self {
        Self {
            store,
            tenants: Mutex::new(HashMap::new()),
        }
    }

    fn with_tenants<R>(&self, f: impl FnOnce(&mut HashMap<String, TenantSlot>) -> R) -> R {
        let mut tenants = match self.tenants.lock() {
            Ok(tenants) => tenants,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut tenants)
    }

    /// 租户已启用的规则，保持存储返回的插入顺序。
    pub async fn rules_for(&self, tenant_id: &str) -> Result<Arc<Vec<AlertRule>>, RuleError> {
        let (cached, version) = self.with_tenants(|tenants| {
            let slot = tenants.entry(tenant_id.to_string()).or_default();
            (slot.rules.clone(), slot.version)
        });
        if let Some(rules) = cached {
            return Ok(rules);
        }

        let ctx = TenantContext::system(tenant_id);
        let loaded = self.store.list_enabled_rules(&ctx).await?;
        let total = loaded.len();
        let rules: Vec<AlertRule> = loaded
            .into_iter()
            .filter(|rule| {
                let consistent = rule.enabled && rule.rule_type == rule.expression.rule_type();
                if !consistent {
                    warn!(
                        target: "hms.rules",
                        tenant_id = %tenant_id,
                        rule_id = %rule.rule_id,
                        rule_type = rule.rule_type.as_str(),
                        "rule_skipped"
                    );
                }
                consistent
            })
            .map(canonicalize)
            .collect();
        let rules = Arc::new(rules);
        self.with_tenants(|tenants| {
            let slot = tenants.entry(tenant_id.to_string()).or_default();
            if slot.version == version {
                slot.rules = Some(rules.clone());
            }
        });
        info!(
            target: "hms.rules",
            tenant_id = %tenant_id,
            loaded = rules.len(),
            skipped = total - rules.len(),
            "rules_loaded"
        );
        Ok(rules)
    }

    /// 规则新增、修改、删除、启停后调用。
    pub fn invalidate(&self, tenant_id: &str) {
        self.with_tenants(|tenants| {
            let slot = tenants.entry(tenant_id.to_string()).or_default();
            slot.version += 1;
            slot.rules = None;
        });
        info!(target: "hms.rules", tenant_id = %tenant_id, "rules_invalidated");
    }

    pub fn is_cached(&self, tenant_id: &str) -> bool {
        self.with_tenants(|tenants| {
            tenants
                .get(tenant_id)
                .map(|slot| slot.rules.is_some())
                .unwrap_or(false)
        })
    }
}
