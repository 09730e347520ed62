//! Postgres 告警规则实现

use crate::error::StorageError;
use crate::traits::AlertRuleStore;
use crate::validation::ensure_tenant;
use domain::{AlertRule, ChannelKind, RuleExpression, RuleType, Severity, TenantContext};
use sqlx::{PgPool, Row};
use tracing::warn;

pub struct PgAlertRuleStore {
    pub pool: PgPool,
}

impl PgAlertRuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_rule(row: &sqlx::postgres::PgRow) -> Result<AlertRule, StorageError> {
    let rule_id: String = row.try_get("rule_id")?;
    let rule_type: String = row.try_get("rule_type")?;
    let severity: String = row.try_get("severity")?;
    let expression: String = row.try_get("expression")?;
    let channels: Vec<String> = row.try_get("notify_channels")?;
    let rule_type = RuleType::parse(&rule_type)
        .ok_or_else(|| StorageError::new(format!("invalid rule_type: {}", rule_type)))?;
    let severity = Severity::parse(&severity)
        .ok_or_else(|| StorageError::new(format!("invalid severity: {}", severity)))?;
    let expression: RuleExpression = serde_json::from_str(&expression)?;
    let mut notify_channels = Vec::with_capacity(channels.len());
    for channel in channels {
        let kind = ChannelKind::parse(&channel)
            .ok_or_else(|| StorageError::new(format!("invalid channel: {}", channel)))?;
        notify_channels.push(kind);
    }
    Ok(AlertRule {
        rule_id,
        tenant_id: row.try_get("tenant_id")?,
        rule_type,
        metric: row.try_get("metric")?,
        expression,
        severity,
        notify_channels,
        enabled: row.try_get("enabled")?,
        created_at_ms: row.try_get("created_at_ms")?,
    })
}

#[async_trait::async_trait]
impl AlertRuleStore for PgAlertRuleStore {
    async fn list_enabled_rules(
        &self,
        ctx: &TenantContext,
    ) -> Result<Vec<AlertRule>, StorageError> {
        ensure_tenant(ctx)?;
        let rows = sqlx::query(
            "select rule_id, tenant_id, rule_type, metric, expression::text as expression, \
             severity, notify_channels, enabled, \
             (extract(epoch from created_at) * 1000)::bigint as created_at_ms \
             from alert_rules where tenant_id = $1 and enabled = true \
             order by created_at, rule_id",
        )
        .bind(&ctx.tenant_id)
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            // 单条配置损坏不影响租户其余规则
            match parse_rule(&row) {
                Ok(rule) => items.push(rule),
                Err(err) => {
                    let rule_id: String = row.try_get("rule_id").unwrap_or_default();
                    warn!(
                        target: "hms.storage",
                        tenant_id = %ctx.tenant_id,
                        rule_id = %rule_id,
                        error = %err,
                        "rule_row_skipped"
                    );
                }
            }
        }
        Ok(items)
    }
}
