//! 升级链解析：沿祖先路径（由近及远）解析各层负责人，按组织缓存并支持子树范围失效。

pub mod handler;
pub mod resolver;

pub use handler::OrgEventHandler;
pub use resolver::{CacheStats, EscalationChain, EscalationLevel, EscalationResolver};

use hms_hierarchy::HierarchyError;
use hms_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum EscalationError {
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for EscalationError {
    fn from(err: StorageError) -> Self {
        EscalationError::Storage(err.to_string())
    }
}
