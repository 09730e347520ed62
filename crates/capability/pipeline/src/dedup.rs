//! 告警去重节流：同一（租户, 对象, 指标, 规则）在窗口内只生成一条告警。

use domain::TenantContext;
use hms_storage::{StorageError, ThrottleStore};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// 稳定去重键（基于名称的 UUIDv5）。
pub fn dedup_key(tenant_id: &str, subject_id: &str, metric: &str, rule_id: &str) -> String {
    let name = format!("dedup:{}:{}:{}:{}", tenant_id, subject_id, metric, rule_id);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// 窗口外的首次命中：生成告警并开启新窗口
    Create,
    /// 窗口内的重复命中，`hits` 为窗口内累计次数
    Suppress { hits: u64 },
}

pub struct DeduplicationThrottle {
    store: Arc<dyn ThrottleStore>,
    window: Duration,
}

impl DeduplicationThrottle {
    pub fn new(store: Arc<dyn ThrottleStore>, window: Duration) -> Self {
        Self { store, window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// 原子地检查并自增计数器。
    pub async fn check(
        &self,
        ctx: &TenantContext,
        key: &str,
        now_ms: i64,
    ) -> Result<ThrottleDecision, StorageError> {
        let hits = self
            .store
            .check_and_increment(ctx, key, self.window.as_millis() as u64, now_ms)
            .await?;
        if hits <= 1 {
            Ok(ThrottleDecision::Create)
        } else {
            Ok(ThrottleDecision::Suppress { hits })
        }
    }
}
