//! Postgres 通知任务归档实现

use crate::error::StorageError;
use crate::traits::NotificationTaskStore;
use crate::validation::{ensure_same_tenant, ensure_tenant};
use domain::{ChannelKind, DeliveryStatus, NotificationTask, TenantContext, Urgency};
use sqlx::{PgPool, Row};

pub struct PgNotificationTaskStore {
    pub pool: PgPool,
}

impl PgNotificationTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl NotificationTaskStore for PgNotificationTaskStore {
    async fn save_task(
        &self,
        ctx: &TenantContext,
        task: &NotificationTask,
    ) -> Result<(), StorageError> {
        ensure_same_tenant(ctx, &task.tenant_id)?;
        sqlx::query(
            "insert into notification_tasks \
             (task_id, tenant_id, alert_id, recipient_id, channel, urgency, priority_weight, \
             delivery_status, retry_count, escalation_level, escalation_deadline_ms, \
             enqueued_at_ms, last_error, archived) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             on conflict (task_id) do update set \
             delivery_status = excluded.delivery_status, retry_count = excluded.retry_count, \
             escalation_deadline_ms = excluded.escalation_deadline_ms, \
             last_error = excluded.last_error, archived = excluded.archived",
        )
        .bind(&task.task_id)
        .bind(&task.tenant_id)
        .bind(&task.alert_id)
        .bind(&task.recipient_id)
        .bind(task.channel.as_str())
        .bind(task.urgency.as_str())
        .bind(task.priority_weight as i32)
        .bind(task.delivery_status.as_str())
        .bind(task.retry_count as i32)
        .bind(task.escalation_level as i32)
        .bind(task.escalation_deadline_ms)
        .bind(task.enqueued_at_ms)
        .bind(&task.last_error)
        .bind(task.delivery_status.is_terminal())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_tasks(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
    ) -> Result<Vec<NotificationTask>, StorageError> {
        ensure_tenant(ctx)?;
        let rows = sqlx::query(
            "select task_id, tenant_id, alert_id, recipient_id, channel, urgency, \
             priority_weight, delivery_status, retry_count, escalation_level, \
             escalation_deadline_ms, enqueued_at_ms, last_error \
             from notification_tasks where tenant_id = $1 and alert_id = $2 \
             order by enqueued_at_ms, task_id",
        )
        .bind(&ctx.tenant_id)
        .bind(alert_id)
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let channel: String = row.try_get("channel")?;
            let urgency: String = row.try_get("urgency")?;
            let status: String = row.try_get("delivery_status")?;
            let priority_weight: i32 = row.try_get("priority_weight")?;
            let retry_count: i32 = row.try_get("retry_count")?;
            let escalation_level: i32 = row.try_get("escalation_level")?;
            items.push(NotificationTask {
                task_id: row.try_get("task_id")?,
                tenant_id: row.try_get("tenant_id")?,
                alert_id: row.try_get("alert_id")?,
                recipient_id: row.try_get("recipient_id")?,
                channel: ChannelKind::parse(&channel)
                    .ok_or_else(|| StorageError::new(format!("invalid channel: {}", channel)))?,
                urgency: Urgency::parse(&urgency)
                    .ok_or_else(|| StorageError::new(format!("invalid urgency: {}", urgency)))?,
                priority_weight: priority_weight.max(0) as u32,
                delivery_status: DeliveryStatus::parse(&status)
                    .ok_or_else(|| StorageError::new(format!("invalid status: {}", status)))?,
                retry_count: retry_count.max(0) as u32,
                escalation_level: escalation_level.max(0) as u32,
                escalation_deadline_ms: row.try_get("escalation_deadline_ms")?,
                enqueued_at_ms: row.try_get("enqueued_at_ms")?,
                last_error: row.try_get("last_error")?,
            });
        }
        Ok(items)
    }
}
