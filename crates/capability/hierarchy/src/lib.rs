//! 组织层级闭包表索引。
//!
//! 为每个租户维护组织树的传递闭包（祖先, 后代, 深度），
//! 祖先路径/后代集合/祖先判断均为一次哈希查找。

pub mod error;
pub mod index;
pub mod locks;
pub mod snapshot;

pub use error::HierarchyError;
pub use index::{ConsistencyReport, OrgHierarchyIndex, RebuildSummary, RemoveReport};
pub use snapshot::{AdjacencyClosure, ClosureDelta, ClosureSnapshot, closure_from_adjacency};
