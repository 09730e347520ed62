//! Postgres 告警记录实现

use crate::error::StorageError;
use crate::models::AlertQuery;
use crate::traits::AlertStore;
use crate::validation::{ensure_same_tenant, ensure_tenant};
use domain::{
    AlertRecord, AlertStatus, ChannelFailure, ChannelKind, DeliveryStatus, Severity,
    TenantContext,
};
use sqlx::{PgPool, Row};

const ALERT_COLUMNS: &str = "alert_id, tenant_id, subject_id, org_id, rule_id, metric, value, \
     severity, status, (extract(epoch from occurred_at) * 1000)::bigint as occurred_at_ms, \
     (extract(epoch from created_at) * 1000)::bigint as created_at_ms, dedup_key, \
     escalation_level, delivery_status, failures::text as failures, acked_by, \
     (extract(epoch from acked_at) * 1000)::bigint as acked_at_ms";

#[derive(serde::Serialize, serde::Deserialize)]
struct FailurePayload {
    channel: String,
    reason: String,
}

fn encode_failures(failures: &[ChannelFailure]) -> Result<String, StorageError> {
    let payload: Vec<FailurePayload> = failures
        .iter()
        .map(|failure| FailurePayload {
            channel: failure.channel.as_str().to_string(),
            reason: failure.reason.clone(),
        })
        .collect();
    Ok(serde_json::to_string(&payload)?)
}

fn decode_failures(data: &str) -> Result<Vec<ChannelFailure>, StorageError> {
    let payload: Vec<FailurePayload> = serde_json::from_str(data)?;
    Ok(payload
        .into_iter()
        .filter_map(|item| {
            ChannelKind::parse(&item.channel).map(|channel| ChannelFailure {
                channel,
                reason: item.reason,
            })
        })
        .collect())
}

fn parse_alert(row: &sqlx::postgres::PgRow) -> Result<AlertRecord, StorageError> {
    let severity: String = row.try_get("severity")?;
    let status: String = row.try_get("status")?;
    let delivery_status: String = row.try_get("delivery_status")?;
    let failures: String = row.try_get("failures")?;
    let escalation_level: i32 = row.try_get("escalation_level")?;
    Ok(AlertRecord {
        alert_id: row.try_get("alert_id")?,
        tenant_id: row.try_get("tenant_id")?,
        subject_id: row.try_get("subject_id")?,
        org_id: row.try_get("org_id")?,
        rule_id: row.try_get("rule_id")?,
        metric: row.try_get("metric")?,
        value: row.try_get("value")?,
        severity: Severity::parse(&severity)
            .ok_or_else(|| StorageError::new(format!("invalid severity: {}", severity)))?,
        status: AlertStatus::parse(&status)
            .ok_or_else(|| StorageError::new(format!("invalid status: {}", status)))?,
        occurred_at_ms: row.try_get("occurred_at_ms")?,
        created_at_ms: row.try_get("created_at_ms")?,
        dedup_key: row.try_get("dedup_key")?,
        escalation_level: escalation_level.max(0) as u32,
        delivery_status: DeliveryStatus::parse(&delivery_status).ok_or_else(|| {
            StorageError::new(format!("invalid delivery_status: {}", delivery_status))
        })?,
        failures: decode_failures(&failures)?,
        acked_by: row.try_get("acked_by")?,
        acked_at_ms: row.try_get("acked_at_ms")?,
    })
}

pub struct PgAlertStore {
    pub pool: PgPool,
}

impl PgAlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AlertStore for PgAlertStore {
    async fn create_alert(
        &self,
        ctx: &TenantContext,
        record: AlertRecord,
    ) -> Result<AlertRecord, StorageError> {
        ensure_same_tenant(ctx, &record.tenant_id)?;
        sqlx::query(
            "insert into alerts \
             (alert_id, tenant_id, subject_id, org_id, rule_id, metric, value, severity, status, \
             occurred_at, created_at, dedup_key, escalation_level, delivery_status, failures) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, to_timestamp($10 / 1000.0), \
             to_timestamp($11 / 1000.0), $12, $13, $14, $15::jsonb)",
        )
        .bind(&record.alert_id)
        .bind(&record.tenant_id)
        .bind(&record.subject_id)
        .bind(&record.org_id)
        .bind(&record.rule_id)
        .bind(&record.metric)
        .bind(record.value)
        .bind(record.severity.as_str())
        .bind(record.status.as_str())
        .bind(record.occurred_at_ms as f64)
        .bind(record.created_at_ms as f64)
        .bind(&record.dedup_key)
        .bind(record.escalation_level as i32)
        .bind(record.delivery_status.as_str())
        .bind(encode_failures(&record.failures)?)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn find_alert(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
    ) -> Result<Option<AlertRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let sql = format!(
            "select {} from alerts where tenant_id = $1 and alert_id = $2",
            ALERT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&ctx.tenant_id)
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(parse_alert(&row)?))
    }

    async fn list_alerts(
        &self,
        ctx: &TenantContext,
        query: &AlertQuery,
    ) -> Result<Vec<AlertRecord>, StorageError> {
        ensure_tenant(ctx)?;
        let sql = format!(
            "select {} from alerts \
             where tenant_id = $1 \
             and ($2::text is null or status = $2) \
             and ($3::text is null or subject_id = $3) \
             order by occurred_at desc \
             limit $4",
            ALERT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(&ctx.tenant_id)
            .bind(query.status.map(|status| status.as_str()))
            .bind(query.subject_id.as_deref())
            .bind(query.effective_limit())
            .fetch_all(&self.pool)
            .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(parse_alert(&row)?);
        }
        Ok(items)
    }

    async fn transition_status(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
        from: &[AlertStatus],
        to: AlertStatus,
    ) -> Result<bool, StorageError> {
        ensure_tenant(ctx)?;
        let from: Vec<String> = from.iter().map(|status| status.as_str().to_string()).collect();
        let result = sqlx::query(
            "update alerts set status = $1 \
             where tenant_id = $2 and alert_id = $3 and status = any($4)",
        )
        .bind(to.as_str())
        .bind(&ctx.tenant_id)
        .bind(alert_id)
        .bind(&from)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn acknowledge(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
        user_id: &str,
        acked_at_ms: i64,
    ) -> Result<bool, StorageError> {
        ensure_tenant(ctx)?;
        let result = sqlx::query(
            "update alerts set status = 'ACKED', acked_by = $1, acked_at = to_timestamp($2 / 1000.0) \
             where tenant_id = $3 and alert_id = $4 and status in ('NEW', 'PENDING')",
        )
        .bind(user_id)
        .bind(acked_at_ms as f64)
        .bind(&ctx.tenant_id)
        .bind(alert_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn escalate(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
        expected_level: u32,
    ) -> Result<bool, StorageError> {
        ensure_tenant(ctx)?;
        let result = sqlx::query(
            "update alerts set escalation_level = escalation_level + 1, status = 'PENDING' \
             where tenant_id = $1 and alert_id = $2 and escalation_level = $3 \
             and status in ('NEW', 'PENDING')",
        )
        .bind(&ctx.tenant_id)
        .bind(alert_id)
        .bind(expected_level as i32)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_delivery(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
        delivery_status: DeliveryStatus,
        failures: &[ChannelFailure],
    ) -> Result<bool, StorageError> {
        ensure_tenant(ctx)?;
        let result = sqlx::query(
            "update alerts set delivery_status = $1, failures = $2::jsonb \
             where tenant_id = $3 and alert_id = $4",
        )
        .bind(delivery_status.as_str())
        .bind(encode_failures(failures)?)
        .bind(&ctx.tenant_id)
        .bind(alert_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
