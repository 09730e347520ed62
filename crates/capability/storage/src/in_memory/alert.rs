//! 告警记录内存实现

use crate::error::StorageError;
use crate::models::AlertQuery;
use crate::traits::AlertStore;
use crate::validation::{ensure_same_tenant, ensure_tenant};
use domain::{AlertRecord, AlertStatus, ChannelFailure, DeliveryStatus, TenantContext};
use std::sync::RwLock;

/// 告警内存存储
///
/// 所有状态迁移在写锁内比较并交换，与 Postgres 条件更新语义一致。
#[derive(Default)]
pub struct InMemoryAlertStore {
    alerts: RwLock<Vec<AlertRecord>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, ctx: &TenantContext, alert_id: &str, apply: F) -> Result<bool, StorageError>
    where
        F: FnOnce(&mut AlertRecord) -> bool,
    {
        ensure_tenant(ctx)?;
        let mut alerts = self
            .alerts
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(alert) = alerts
            .iter_mut()
            .find(|item| item.tenant_id == ctx.tenant_id && item.alert_id == alert_id)
        else {
            return Ok(false);
        };
        Ok(apply(alert))
    }
}

#[async_trait::async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn create_alert(
        &self,
        ctx: &TenantContext,
        record: AlertRecord,
    ) -> Result<AlertRecord, StorageError> {
        ensure_same_tenant(ctx, &record.tenant_id)?;
        let mut alerts = self
            .alerts
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        if alerts
            .iter()
            .any(|item| item.tenant_id == record.tenant_id && item.alert_id == record.alert_id)
        {
            return Err(StorageError::new("alert already exists"));
        }
        alerts.push(record.clone());
        Ok(record)
    }

    async fn find_alert(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
    ) -> Result<Option<AlertRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let alerts = self
            .alerts
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(alerts
            .iter()
            .find(|item| item.tenant_id == ctx.tenant_id && item.alert_id == alert_id)
            .cloned())
    }

    async fn list_alerts(
        &self,
        ctx: &TenantContext,
        query: &AlertQuery,
    ) -> Result<Vec<AlertRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let alerts = self
            .alerts
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<AlertRecord> = alerts
            .iter()
            .filter(|item| item.tenant_id == ctx.tenant_id)
            .filter(|item| query.status.is_none_or(|status| item.status == status))
            .filter(|item| {
                query
                    .subject_id
                    .as_deref()
                    .is_none_or(|subject| item.subject_id == subject)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.occurred_at_ms.cmp(&a.occurred_at_ms));
        items.truncate(query.effective_limit() as usize);
        Ok(items)
    }

    async fn transition_status(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
        from: &[AlertStatus],
        to: AlertStatus,
    ) -> Result<bool, StorageError> {
        self.update(ctx, alert_id, |alert| {
            if !from.contains(&alert.status) {
                return false;
            }
            alert.status = to;
            true
        })
    }

    async fn acknowledge(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
        user_id: &str,
        acked_at_ms: i64,
    ) -> Result<bool, StorageError> {
        self.update(ctx, alert_id, |alert| {
            if !alert.status.is_open() {
                return false;
            }
            alert.status = AlertStatus::Acked;
            alert.acked_by = Some(user_id.to_string());
            alert.acked_at_ms = Some(acked_at_ms);
            true
        })
    }

    async fn escalate(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
        expected_level: u32,
    ) -> Result<bool, StorageError> {
        self.update(ctx, alert_id, |alert| {
            if !alert.status.is_open() || alert.escalation_level != expected_level {
                return false;
            }
            alert.escalation_level = expected_level + 1;
            alert.status = AlertStatus::Pending;
            true
        })
    }

    async fn update_delivery(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
        delivery_status: DeliveryStatus,
        failures: &[ChannelFailure],
    ) -> Result<bool, StorageError> {
        self.update(ctx, alert_id, |alert| {
            alert.delivery_status = delivery_status;
            alert.failures = failures.to_vec();
            true
        })
    }
}
