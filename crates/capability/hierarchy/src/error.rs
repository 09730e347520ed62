use hms_storage::StorageError;

/// 组织层级索引错误。
#[derive(Debug, thiserror::Error)]
pub enum HierarchyError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("node already indexed: {0}")]
    Conflict(String),
    #[error("cycle: cannot move {node} under {parent}")]
    Cycle { node: String, parent: String },
    #[error("structural inconsistency: {0}")]
    Inconsistent(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for HierarchyError {
    fn from(err: StorageError) -> Self {
        HierarchyError::Storage(err.to_string())
    }
}
