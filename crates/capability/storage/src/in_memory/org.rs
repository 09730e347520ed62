//! 组织结构内存实现

use crate::error::StorageError;
use crate::traits::{ClosureStore, ManagerStore, OrgNodeStore, SubjectStore};
use crate::validation::{ensure_same_tenant, ensure_tenant};
use domain::{ClosureEdge, ManagerEntry, OrgNode, TenantContext};
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// 组织邻接表内存存储
#[derive(Default)]
pub struct InMemoryOrgNodeStore {
    nodes: RwLock<Vec<OrgNode>>,
}

impl InMemoryOrgNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入或替换节点（测试与本地运行时充当组织管理）。
    pub fn upsert_node(&self, node: OrgNode) -> Result<(), StorageError> {
        let mut nodes = self
            .nodes
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        match nodes
            .iter_mut()
            .find(|item| item.tenant_id == node.tenant_id && item.org_id == node.org_id)
        {
            Some(existing) => *existing = node,
            None => nodes.push(node),
        }
        Ok(())
    }

    pub fn remove_node(&self, tenant_id: &str, org_id: &str) -> Result<bool, StorageError> {
        let mut nodes = self
            .nodes
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let before = nodes.len();
        nodes.retain(|item| !(item.tenant_id == tenant_id && item.org_id == org_id));
        Ok(nodes.len() != before)
    }
}

#[async_trait::async_trait]
impl OrgNodeStore for InMemoryOrgNodeStore {
    async fn list_nodes(&self, ctx: &TenantContext) -> Result<Vec<OrgNode>, StorageError> {
        ensure_tenant(ctx)?;
        let nodes = self
            .nodes
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<OrgNode> = nodes
            .iter()
            .filter(|item| item.tenant_id == ctx.tenant_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.org_id.cmp(&b.org_id))
        });
        Ok(items)
    }
}

/// 闭包表内存存储
///
/// `fail_writes` 用于模拟事务失败。
#[derive(Default)]
pub struct InMemoryClosureStore {
    edges: RwLock<HashMap<String, BTreeSet<ClosureEdge>>>,
    fail_writes: AtomicBool,
}

impl InMemoryClosureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::new("closure write failed"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClosureStore for InMemoryClosureStore {
    async fn load_edges(&self, ctx: &TenantContext) -> Result<Vec<ClosureEdge>, StorageError> {
        ensure_tenant(ctx)?;
        let edges = self
            .edges
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(edges
            .get(&ctx.tenant_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn apply_delta(
        &self,
        ctx: &TenantContext,
        removed: &[ClosureEdge],
        added: &[ClosureEdge],
    ) -> Result<(), StorageError> {
        ensure_tenant(ctx)?;
        for edge in removed.iter().chain(added.iter()) {
            ensure_same_tenant(ctx, &edge.tenant_id)?;
        }
        self.check_writable()?;
        let mut edges = self
            .edges
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let tenant_edges = edges.entry(ctx.tenant_id.clone()).or_default();
        for edge in removed {
            tenant_edges.retain(|item| {
                !(item.ancestor_id == edge.ancestor_id && item.descendant_id == edge.descendant_id)
            });
        }
        for edge in added {
            tenant_edges.insert(edge.clone());
        }
        Ok(())
    }

    async fn replace_tenant(
        &self,
        ctx: &TenantContext,
        edges: &[ClosureEdge],
    ) -> Result<(), StorageError> {
        ensure_tenant(ctx)?;
        for edge in edges {
            ensure_same_tenant(ctx, &edge.tenant_id)?;
        }
        self.check_writable()?;
        let mut all = self
            .edges
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        all.insert(ctx.tenant_id.clone(), edges.iter().cloned().collect());
        Ok(())
    }
}

/// 组织负责人内存存储
#[derive(Default)]
pub struct InMemoryManagerStore {
    entries: RwLock<Vec<ManagerEntry>>,
}

impl InMemoryManagerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&self, entry: ManagerEntry) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let exists = entries.iter().any(|item| {
            item.tenant_id == entry.tenant_id
                && item.org_id == entry.org_id
                && item.user_id == entry.user_id
                && item.role_type == entry.role_type
        });
        if !exists {
            entries.push(entry);
        }
        Ok(())
    }

    pub fn revoke(
        &self,
        tenant_id: &str,
        org_id: &str,
        user_id: &str,
    ) -> Result<bool, StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let before = entries.len();
        entries.retain(|item| {
            !(item.tenant_id == tenant_id && item.org_id == org_id && item.user_id == user_id)
        });
        Ok(entries.len() != before)
    }
}

#[async_trait::async_trait]
impl ManagerStore for InMemoryManagerStore {
    async fn list_managers(
        &self,
        ctx: &TenantContext,
        org_id: &str,
        role_type: &str,
    ) -> Result<Vec<ManagerEntry>, StorageError> {
        ensure_tenant(ctx)?;
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(entries
            .iter()
            .filter(|item| {
                item.tenant_id == ctx.tenant_id
                    && item.org_id == org_id
                    && item.role_type == role_type
            })
            .cloned()
            .collect())
    }
}

/// 被监护人归属内存存储
#[derive(Default)]
pub struct InMemorySubjectStore {
    subjects: RwLock<HashMap<(String, String), String>>,
}

impl InMemorySubjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(
        &self,
        tenant_id: &str,
        subject_id: &str,
        org_id: &str,
    ) -> Result<(), StorageError> {
        let mut subjects = self
            .subjects
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        subjects.insert(
            (tenant_id.to_string(), subject_id.to_string()),
            org_id.to_string(),
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl SubjectStore for InMemorySubjectStore {
    async fn find_subject_org(
        &self,
        ctx: &TenantContext,
        subject_id: &str,
    ) -> Result<Option<String>, StorageError> {
        ensure_tenant(ctx)?;
        let subjects = self
            .subjects
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(subjects
            .get(&(ctx.tenant_id.clone(), subject_id.to_string()))
            .cloned())
    }
}
