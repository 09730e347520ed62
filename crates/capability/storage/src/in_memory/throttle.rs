//! 去重节流计数器内存实现

use crate::error::StorageError;
use crate::traits::ThrottleStore;
use crate::validation::ensure_tenant;
use domain::TenantContext;
use std::collections::HashMap;
use std::sync::Mutex;

struct Counter {
    count: u64,
    expires_at_ms: i64,
}

/// 节流计数器内存存储
///
/// 检查与自增在同一把互斥锁内完成，过期计数在访问时回收。
#[derive(Default)]
pub struct InMemoryThrottleStore {
    counters: Mutex<HashMap<String, Counter>>,
}

impl InMemoryThrottleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前仍在窗口内的计数器数量。
    pub fn live_counters(&self, now_ms: i64) -> usize {
        self.counters
            .lock()
            .map(|counters| {
                counters
                    .values()
                    .filter(|counter| counter.expires_at_ms > now_ms)
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl ThrottleStore for InMemoryThrottleStore {
    async fn check_and_increment(
        &self,
        ctx: &TenantContext,
        key: &str,
        window_ms: u64,
        now_ms: i64,
    ) -> Result<u64, StorageError> {
        ensure_tenant(ctx)?;
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| StorageError::new("lock failed"))?;
        counters.retain(|_, counter| counter.expires_at_ms > now_ms);
        let counter = counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at_ms: now_ms + window_ms as i64,
        });
        counter.count += 1;
        Ok(counter.count)
    }
}
