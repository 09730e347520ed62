//! 告警规则：按租户缓存已启用规则，并按 SINGLE → COMPOSITE → COMPLEX 顺序匹配事件。

pub mod cache;
pub mod engine;

pub use cache::RuleCache;
pub use engine::{AlertCandidate, RuleEngine, RuleEngineConfig};

use hms_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for RuleError {
    fn from(err: StorageError) -> Self {
        RuleError::Storage(err.to_string())
    }
}
