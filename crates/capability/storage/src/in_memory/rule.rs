//! 告警规则内存实现

use crate::error::StorageError;
use crate::traits::AlertRuleStore;
use crate::validation::ensure_tenant;
use domain::{AlertRule, TenantContext};
use std::sync::RwLock;

/// 告警规则内存存储
#[derive(Default)]
pub struct InMemoryAlertRuleStore {
    rules: RwLock<Vec<AlertRule>>,
}

impl InMemoryAlertRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_rule(&self, rule: AlertRule) -> Result<(), StorageError> {
        let mut rules = self
            .rules
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        match rules
            .iter_mut()
            .find(|item| item.tenant_id == rule.tenant_id && item.rule_id == rule.rule_id)
        {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
        Ok(())
    }

    pub fn delete_rule(&self, tenant_id: &str, rule_id: &str) -> Result<bool, StorageError> {
        let mut rules = self
            .rules
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let before = rules.len();
        rules.retain(|item| !(item.tenant_id == tenant_id && item.rule_id == rule_id));
        Ok(rules.len() != before)
    }
}

#[async_trait::async_trait]
impl AlertRuleStore for InMemoryAlertRuleStore {
    async fn list_enabled_rules(
        &self,
        ctx: &TenantContext,
    ) -> Result<Vec<AlertRule>, StorageError> {
        ensure_tenant(ctx)?;
        let rules = self
            .rules
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<AlertRule> = rules
            .iter()
            .filter(|item| item.tenant_id == ctx.tenant_id && item.enabled)
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        Ok(items)
    }
}
