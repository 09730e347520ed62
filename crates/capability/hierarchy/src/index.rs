//! 组织层级闭包表索引（按租户隔离）。
//!
//! - 读：克隆当前快照的 `Arc` 后查询，不持有任何异步锁
//! - 变更：租户闸门读锁 + 子树锁 → 计算增量 → 事务写入 `ClosureStore` → 应用到最新快照
//! - 重建：租户闸门写锁（与所有变更互斥），BFS 结果整租户替换后原子切换快照

use crate::error::HierarchyError;
use crate::locks::SubtreeLocks;
use crate::snapshot::{ClosureDelta, ClosureSnapshot, closure_from_adjacency};
use domain::{ClosureEdge, OrgMutationEvent, OrgOperation, TenantContext};
use hms_storage::{ClosureStore, OrgNodeStore};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

#[derive(Default)]
struct TenantIndex {
    gate: tokio::sync::RwLock<()>,
    snapshot: RwLock<Arc<ClosureSnapshot>>,
    locks: SubtreeLocks,
    loaded: AtomicBool,
    needs_rebuild: AtomicBool,
}

impl TenantIndex {
    fn current(&self) -> Arc<ClosureSnapshot> {
        match self.snapshot.read() {
            Ok(snapshot) => snapshot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, next: ClosureSnapshot) {
        let mut guard = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(next);
    }

    /// 在最新快照上应用增量（不相交子树的增量可交换）。
    fn apply(&self, delta: &ClosureDelta) {
        let mut guard = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = (**guard).clone();
        next.apply(delta);
        *guard = Arc::new(next);
    }
}

/// removeNode 的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveReport {
    pub removed_edges: usize,
    pub orphaned: Vec<String>,
}

/// validateConsistency 的结果：与邻接表 BFS 结果相比缺失/多余的边。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub missing: Vec<ClosureEdge>,
    pub unexpected: Vec<ClosureEdge>,
    pub unreachable: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.unreachable.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildSummary {
    pub nodes: usize,
    pub edges: usize,
}

pub struct OrgHierarchyIndex {
    closure: Arc<dyn ClosureStore>,
    nodes: Arc<dyn OrgNodeStore>,
    tenants: RwLock<HashMap<String, Arc<TenantIndex>>>,
}

impl OrgHierarchyIndex {
    pub fn new(closure: Arc<dyn ClosureStore>, nodes: Arc<dyn OrgNodeStore>) -> Self {
        Self {
            closure,
            nodes,
            tenants: RwLock::new(HashMap::new()),
        }
    }

    fn tenant(&self, tenant_id: &str) -> Arc<TenantIndex> {
        if let Ok(tenants) = self.tenants.read() {
            if let Some(tenant) = tenants.get(tenant_id) {
                return tenant.clone();
            }
        }
        let mut tenants = match self.tenants.write() {
            Ok(tenants) => tenants,
            Err(poisoned) => poisoned.into_inner(),
        };
        tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(TenantIndex::default()))
            .clone()
    }

    /// 从闭包表存储预热；存储为空而邻接表非空时执行重建。
    pub async fn load(&self, tenant_id: &str) -> Result<usize, HierarchyError> {
        let tenant = self.tenant(tenant_id);
        let _gate = tenant.gate.write().await;
        self.load_locked(tenant_id, &tenant).await
    }

    async fn load_locked(
        &self,
        tenant_id: &str,
        tenant: &TenantIndex,
    ) -> Result<usize, HierarchyError> {
        let ctx = TenantContext::system(tenant_id);
        let edges = self.closure.load_edges(&ctx).await?;
        if edges.is_empty() {
            let nodes = self.nodes.list_nodes(&ctx).await?;
            if !nodes.is_empty() {
                let summary = self.rebuild_locked(tenant_id, tenant).await?;
                return Ok(summary.nodes);
            }
        }
        let snapshot = ClosureSnapshot::from_edges(edges.iter());
        let count = snapshot.node_count();
        tenant.replace(snapshot);
        tenant.loaded.store(true, Ordering::Release);
        info!(target: "hms.hierarchy", tenant_id = %tenant_id, nodes = count, "closure_loaded");
        Ok(count)
    }

    async fn ensure_loaded(
        &self,
        tenant_id: &str,
        tenant: &TenantIndex,
    ) -> Result<(), HierarchyError> {
        if tenant.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let _gate = tenant.gate.write().await;
        if tenant.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        self.load_locked(tenant_id, tenant).await?;
        Ok(())
    }

    /// 当前快照（尚未加载时先从存储加载）。
    pub async fn snapshot(&self, tenant_id: &str) -> Result<Arc<ClosureSnapshot>, HierarchyError> {
        let tenant = self.tenant(tenant_id);
        self.ensure_loaded(tenant_id, &tenant).await?;
        Ok(tenant.current())
    }

    async fn mutate<F>(
        &self,
        tenant_id: &str,
        roots: Vec<String>,
        plan: F,
    ) -> Result<ClosureDelta, HierarchyError>
    where
        F: FnOnce(&ClosureSnapshot) -> Result<ClosureDelta, HierarchyError>,
    {
        if tenant_id.trim().is_empty() {
            return Err(HierarchyError::Validation("tenant_id required".to_string()));
        }
        let tenant = self.tenant(tenant_id);
        self.ensure_loaded(tenant_id, &tenant).await?;
        let _gate = tenant.gate.read().await;
        let _guard = tenant.locks.acquire(roots, || tenant.current()).await;
        let delta = plan(&tenant.current())?;
        if delta.is_empty() {
            return Ok(delta);
        }
        let ctx = TenantContext::system(tenant_id);
        self.closure
            .apply_delta(&ctx, &delta.removed, &delta.added)
            .await?;
        tenant.apply(&delta);
        Ok(delta)
    }

    /// addNode：`parent_id` 为空时作为根节点。
    pub async fn add_node(
        &self,
        tenant_id: &str,
        node_id: &str,
        parent_id: Option<&str>,
    ) -> Result<(), HierarchyError> {
        let root = parent_id.unwrap_or(node_id).to_string();
        let delta = self
            .mutate(tenant_id, vec![root], |snapshot| {
                snapshot.plan_add(tenant_id, node_id, parent_id)
            })
            .await?;
        info!(
            target: "hms.hierarchy",
            tenant_id = %tenant_id,
            node_id = %node_id,
            parent_id = ?parent_id,
            edges = delta.added.len(),
            "org_node_added"
        );
        Ok(())
    }

    pub async fn move_node(
        &self,
        tenant_id: &str,
        node_id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<(), HierarchyError> {
        let mut roots = vec![node_id.to_string()];
        if let Some(parent) = new_parent_id {
            roots.push(parent.to_string());
        }
        let delta = self
            .mutate(tenant_id, roots, |snapshot| {
                snapshot.plan_move(tenant_id, node_id, new_parent_id)
            })
            .await?;
        info!(
            target: "hms.hierarchy",
            tenant_id = %tenant_id,
            node_id = %node_id,
            new_parent_id = ?new_parent_id,
            removed = delta.removed.len(),
            added = delta.added.len(),
            "org_node_moved"
        );
        Ok(())
    }

    /// removeNode：被孤立的后代只报告不修复。
    pub async fn remove_node(
        &self,
        tenant_id: &str,
        node_id: &str,
    ) -> Result<RemoveReport, HierarchyError> {
        let mut orphaned = Vec::new();
        let delta = self
            .mutate(tenant_id, vec![node_id.to_string()], |snapshot| {
                let (delta, orphans) = snapshot.plan_remove(tenant_id, node_id);
                orphaned = orphans;
                Ok(delta)
            })
            .await?;
        if !orphaned.is_empty() {
            warn!(
                target: "hms.hierarchy",
                tenant_id = %tenant_id,
                node_id = %node_id,
                orphaned = ?orphaned,
                "org_descendants_orphaned"
            );
        }
        info!(
            target: "hms.hierarchy",
            tenant_id = %tenant_id,
            node_id = %node_id,
            removed = delta.removed.len(),
            "org_node_removed"
        );
        Ok(RemoveReport {
            removed_edges: delta.removed.len(),
            orphaned,
        })
    }

    /// 组织变更事件分发。
    pub async fn apply_event(&self, event: &OrgMutationEvent) -> Result<(), HierarchyError> {
        let parent = event.parent_id.as_deref().filter(|value| !value.is_empty());
        match event.operation {
            OrgOperation::Add => self.add_node(&event.tenant_id, &event.node_id, parent).await,
            OrgOperation::Move => {
                self.move_node(&event.tenant_id, &event.node_id, parent)
                    .await
            }
            OrgOperation::Remove => self
                .remove_node(&event.tenant_id, &event.node_id)
                .await
                .map(|_| ()),
        }
    }

    /// 严格后代（按深度由浅到深）。
    pub async fn find_descendants(
        &self,
        tenant_id: &str,
        node_id: &str,
    ) -> Result<Vec<String>, HierarchyError> {
        let snapshot = self.snapshot(tenant_id).await?;
        Ok(snapshot
            .descendants(node_id)
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    /// 节点自身加全部后代。
    pub async fn find_subtree(
        &self,
        tenant_id: &str,
        node_id: &str,
    ) -> Result<Vec<String>, HierarchyError> {
        let snapshot = self.snapshot(tenant_id).await?;
        Ok(snapshot
            .subtree(node_id)
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    /// 严格祖先路径，根在前。
    pub async fn find_ancestor_path(
        &self,
        tenant_id: &str,
        node_id: &str,
    ) -> Result<Vec<String>, HierarchyError> {
        let snapshot = self.snapshot(tenant_id).await?;
        Ok(snapshot
            .ancestors(node_id)
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    /// 严格祖先判断（节点不是自身的祖先）。
    pub async fn is_ancestor(
        &self,
        tenant_id: &str,
        ancestor_id: &str,
        node_id: &str,
    ) -> Result<bool, HierarchyError> {
        let snapshot = self.snapshot(tenant_id).await?;
        Ok(snapshot
            .depth(ancestor_id, node_id)
            .is_some_and(|depth| depth > 0))
    }

    pub async fn depth(
        &self,
        tenant_id: &str,
        ancestor_id: &str,
        node_id: &str,
    ) -> Result<Option<u32>, HierarchyError> {
        let snapshot = self.snapshot(tenant_id).await?;
        Ok(snapshot.depth(ancestor_id, node_id))
    }

    /// 从邻接表重建整个租户的闭包表；与本租户的所有变更互斥，读请求继续使用旧快照。
    pub async fn rebuild(&self, tenant_id: &str) -> Result<RebuildSummary, HierarchyError> {
        if tenant_id.trim().is_empty() {
            return Err(HierarchyError::Validation("tenant_id required".to_string()));
        }
        let tenant = self.tenant(tenant_id);
        let _gate = tenant.gate.write().await;
        self.rebuild_locked(tenant_id, &tenant).await
    }

    async fn rebuild_locked(
        &self,
        tenant_id: &str,
        tenant: &TenantIndex,
    ) -> Result<RebuildSummary, HierarchyError> {
        let ctx = TenantContext::system(tenant_id);
        let nodes = self.nodes.list_nodes(&ctx).await?;
        let closure = closure_from_adjacency(tenant_id, &nodes);
        if !closure.unreachable.is_empty() {
            warn!(
                target: "hms.hierarchy",
                tenant_id = %tenant_id,
                nodes = ?closure.unreachable,
                "org_adjacency_cycle"
            );
        }
        self.closure.replace_tenant(&ctx, &closure.edges).await?;
        let snapshot = ClosureSnapshot::from_edges(closure.edges.iter());
        let summary = RebuildSummary {
            nodes: snapshot.node_count(),
            edges: closure.edges.len(),
        };
        tenant.replace(snapshot);
        tenant.loaded.store(true, Ordering::Release);
        tenant.needs_rebuild.store(false, Ordering::Release);
        info!(
            target: "hms.hierarchy",
            tenant_id = %tenant_id,
            nodes = summary.nodes,
            edges = summary.edges,
            "closure_rebuilt"
        );
        Ok(summary)
    }

    /// 比较已持久化的闭包边与邻接表 BFS 结果，不修改任何状态（仅标记待重建）。
    pub async fn validate_consistency(
        &self,
        tenant_id: &str,
    ) -> Result<ConsistencyReport, HierarchyError> {
        let ctx = TenantContext::system(tenant_id);
        let nodes = self.nodes.list_nodes(&ctx).await?;
        let expected = closure_from_adjacency(tenant_id, &nodes);
        let actual: BTreeSet<ClosureEdge> =
            self.closure.load_edges(&ctx).await?.into_iter().collect();
        let expected_set: BTreeSet<ClosureEdge> = expected.edges.into_iter().collect();
        let report = ConsistencyReport {
            missing: expected_set.difference(&actual).cloned().collect(),
            unexpected: actual.difference(&expected_set).cloned().collect(),
            unreachable: expected.unreachable,
        };
        if !report.is_consistent() {
            let err = HierarchyError::Inconsistent(format!(
                "{} missing, {} unexpected, {} unreachable",
                report.missing.len(),
                report.unexpected.len(),
                report.unreachable.len()
            ));
            self.tenant(tenant_id)
                .needs_rebuild
                .store(true, Ordering::Release);
            warn!(target: "hms.hierarchy", tenant_id = %tenant_id, error = %err, "closure_inconsistent");
        }
        Ok(report)
    }

    /// 最近一次一致性校验是否发现偏差且尚未重建。
    pub fn needs_rebuild(&self, tenant_id: &str) -> bool {
        self.tenant(tenant_id).needs_rebuild.load(Ordering::Acquire)
    }
}
