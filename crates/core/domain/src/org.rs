use serde::{Deserialize, Serialize};

/// 组织节点（由组织管理维护，核心只读）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgNode {
    pub org_id: String,
    pub parent_id: Option<String>,
    pub tenant_id: String,
    pub status: String,
    pub sort_order: i32,
}

/// 闭包表的一条边（ancestor → descendant，depth 为路径长度）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClosureEdge {
    pub ancestor_id: String,
    pub descendant_id: String,
    pub depth: u32,
    pub tenant_id: String,
}

impl ClosureEdge {
    pub fn new(
        tenant_id: impl Into<String>,
        ancestor_id: impl Into<String>,
        descendant_id: impl Into<String>,
        depth: u32,
    ) -> Self {
        Self {
            ancestor_id: ancestor_id.into(),
            descendant_id: descendant_id.into(),
            depth,
            tenant_id: tenant_id.into(),
        }
    }
}

/// 组织负责人条目（组织 + 角色分配派生）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerEntry {
    pub org_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub role_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrgOperation {
    Add,
    Move,
    Remove,
}

/// 组织结构变更事件（来自组织管理）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgMutationEvent {
    pub operation: OrgOperation,
    pub node_id: String,
    pub parent_id: Option<String>,
    pub tenant_id: String,
}
