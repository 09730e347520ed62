//! 闭包表快照：按祖先、按后代双向索引的边集合。
//!
//! 快照本身不可变地对外共享（`Arc`），变更先计算增量 [`ClosureDelta`]，
//! 持久化成功后再应用到新快照上。

use crate::error::HierarchyError;
use domain::{ClosureEdge, OrgNode};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosureSnapshot {
    by_ancestor: HashMap<String, HashMap<String, u32>>,
    by_descendant: HashMap<String, HashMap<String, u32>>,
}

/// 一次变更需要删除与插入的边。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosureDelta {
    pub removed: Vec<ClosureEdge>,
    pub added: Vec<ClosureEdge>,
}

impl ClosureDelta {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// 从邻接表 BFS 得到的结果。
#[derive(Debug, Clone, Default)]
pub struct AdjacencyClosure {
    pub edges: Vec<ClosureEdge>,
    /// 无法从任何根到达的节点（父链成环）
    pub unreachable: Vec<String>,
}

impl ClosureSnapshot {
    pub fn from_edges<'a>(edges: impl IntoIterator<Item = &'a ClosureEdge>) -> Self {
        let mut snapshot = Self::default();
        for edge in edges {
            snapshot.insert(&edge.ancestor_id, &edge.descendant_id, edge.depth);
        }
        snapshot
    }

    fn insert(&mut self, ancestor: &str, descendant: &str, depth: u32) {
        self.by_ancestor
            .entry(ancestor.to_string())
            .or_default()
            .insert(descendant.to_string(), depth);
        self.by_descendant
            .entry(descendant.to_string())
            .or_default()
            .insert(ancestor.to_string(), depth);
    }

    fn remove(&mut self, ancestor: &str, descendant: &str) {
        if let Some(items) = self.by_ancestor.get_mut(ancestor) {
            items.remove(descendant);
            if items.is_empty() {
                self.by_ancestor.remove(ancestor);
            }
        }
        if let Some(items) = self.by_descendant.get_mut(descendant) {
            items.remove(ancestor);
            if items.is_empty() {
                self.by_descendant.remove(descendant);
            }
        }
    }

    pub fn apply(&mut self, delta: &ClosureDelta) {
        for edge in &delta.removed {
            self.remove(&edge.ancestor_id, &edge.descendant_id);
        }
        for edge in &delta.added {
            self.insert(&edge.ancestor_id, &edge.descendant_id, edge.depth);
        }
    }

    /// 节点是否已有闭包行（自边或任意边）。
    pub fn contains(&self, node: &str) -> bool {
        self.by_descendant.contains_key(node) || self.by_ancestor.contains_key(node)
    }

    pub fn depth(&self, ancestor: &str, descendant: &str) -> Option<u32> {
        self.by_ancestor
            .get(ancestor)
            .and_then(|items| items.get(descendant))
            .copied()
    }

    pub fn is_ancestor_or_self(&self, ancestor: &str, descendant: &str) -> bool {
        ancestor == descendant || self.depth(ancestor, descendant).is_some()
    }

    /// 严格祖先，按深度从远到近（根在前）。
    pub fn ancestors(&self, node: &str) -> Vec<(String, u32)> {
        let mut items: Vec<(String, u32)> = self
            .by_descendant
            .get(node)
            .map(|items| {
                items
                    .iter()
                    .filter(|(_, depth)| **depth > 0)
                    .map(|(id, depth)| (id.clone(), *depth))
                    .collect()
            })
            .unwrap_or_default();
        items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        items
    }

    /// 严格后代，按深度由浅到深。
    pub fn descendants(&self, node: &str) -> Vec<(String, u32)> {
        let mut items: Vec<(String, u32)> = self
            .by_ancestor
            .get(node)
            .map(|items| {
                items
                    .iter()
                    .filter(|(_, depth)| **depth > 0)
                    .map(|(id, depth)| (id.clone(), *depth))
                    .collect()
            })
            .unwrap_or_default();
        items.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        items
    }

    /// 节点自身加全部后代（自身在前）。
    pub fn subtree(&self, node: &str) -> Vec<(String, u32)> {
        if !self.contains(node) {
            return Vec::new();
        }
        let mut items = vec![(node.to_string(), 0)];
        items.extend(self.descendants(node));
        items
    }

    pub fn node_count(&self) -> usize {
        self.by_descendant.len()
    }

    pub fn edges(&self, tenant_id: &str) -> BTreeSet<ClosureEdge> {
        self.by_ancestor
            .iter()
            .flat_map(|(ancestor, items)| {
                items.iter().map(move |(descendant, depth)| {
                    ClosureEdge::new(tenant_id, ancestor.clone(), descendant.clone(), *depth)
                })
            })
            .collect()
    }

    /// addNode：父节点的每个祖先（含自身）到新节点一条边，外加自边。
    pub fn plan_add(
        &self,
        tenant_id: &str,
        node: &str,
        parent: Option<&str>,
    ) -> Result<ClosureDelta, HierarchyError> {
        if node.trim().is_empty() {
            return Err(HierarchyError::Validation("node_id required".to_string()));
        }
        if self.contains(node) {
            return Err(HierarchyError::Conflict(node.to_string()));
        }
        let mut added = vec![ClosureEdge::new(tenant_id, node, node, 0)];
        if let Some(parent) = parent {
            if !self.contains(parent) {
                return Err(HierarchyError::Validation(format!(
                    "unknown parent: {}",
                    parent
                )));
            }
            added.push(ClosureEdge::new(tenant_id, parent, node, 1));
            for (ancestor, depth) in self.ancestors(parent) {
                added.push(ClosureEdge::new(tenant_id, ancestor, node, depth + 1));
            }
        }
        Ok(ClosureDelta {
            removed: Vec::new(),
            added,
        })
    }

    /// moveNode：切断子树与外部祖先的边，再接到新父节点的祖先链上。
    ///
    /// `new_parent` 为 `None` 时节点成为根。
    pub fn plan_move(
        &self,
        tenant_id: &str,
        node: &str,
        new_parent: Option<&str>,
    ) -> Result<ClosureDelta, HierarchyError> {
        if !self.contains(node) {
            return Err(HierarchyError::Validation(format!("unknown node: {}", node)));
        }
        let subtree = self.subtree(node);
        if let Some(parent) = new_parent {
            if parent == node || self.depth(node, parent).is_some() {
                return Err(HierarchyError::Cycle {
                    node: node.to_string(),
                    parent: parent.to_string(),
                });
            }
            if !self.contains(parent) {
                return Err(HierarchyError::Validation(format!(
                    "unknown parent: {}",
                    parent
                )));
            }
        }
        let members: HashSet<&str> = subtree.iter().map(|(id, _)| id.as_str()).collect();
        let mut removed = Vec::new();
        for (member, _) in &subtree {
            if let Some(ancestors) = self.by_descendant.get(member) {
                for (ancestor, depth) in ancestors {
                    if !members.contains(ancestor.as_str()) {
                        removed.push(ClosureEdge::new(
                            tenant_id,
                            ancestor.clone(),
                            member.clone(),
                            *depth,
                        ));
                    }
                }
            }
        }
        let mut added = Vec::new();
        if let Some(parent) = new_parent {
            let mut chain = vec![(parent.to_string(), 0)];
            chain.extend(self.ancestors(parent));
            for (ancestor, ancestor_depth) in &chain {
                for (member, member_depth) in &subtree {
                    added.push(ClosureEdge::new(
                        tenant_id,
                        ancestor.clone(),
                        member.clone(),
                        ancestor_depth + 1 + member_depth,
                    ));
                }
            }
        }
        removed.sort();
        added.sort();
        Ok(ClosureDelta { removed, added })
    }

    /// removeNode：删除节点作为祖先或后代的全部边；返回增量与被孤立的后代。
    pub fn plan_remove(&self, tenant_id: &str, node: &str) -> (ClosureDelta, Vec<String>) {
        let mut removed = Vec::new();
        if let Some(descendants) = self.by_ancestor.get(node) {
            for (descendant, depth) in descendants {
                removed.push(ClosureEdge::new(tenant_id, node, descendant.clone(), *depth));
            }
        }
        if let Some(ancestors) = self.by_descendant.get(node) {
            for (ancestor, depth) in ancestors {
                if ancestor != node {
                    removed.push(ClosureEdge::new(tenant_id, ancestor.clone(), node, *depth));
                }
            }
        }
        removed.sort();
        let orphans = self
            .descendants(node)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        (
            ClosureDelta {
                removed,
                added: Vec::new(),
            },
            orphans,
        )
    }
}

/// 从邻接表（parent_id）按 BFS 计算完整闭包。
///
/// 父节点不在节点集合中的节点按根处理。
pub fn closure_from_adjacency(tenant_id: &str, nodes: &[OrgNode]) -> AdjacencyClosure {
    let known: HashSet<&str> = nodes.iter().map(|node| node.org_id.as_str()).collect();
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut queue: VecDeque<(&str, Vec<(&str, u32)>)> = VecDeque::new();
    for node in nodes {
        match node.parent_id.as_deref() {
            Some(parent) if known.contains(parent) => {
                children.entry(parent).or_default().push(node.org_id.as_str());
            }
            _ => queue.push_back((node.org_id.as_str(), Vec::new())),
        }
    }
    let mut edges = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    while let Some((node, ancestors)) = queue.pop_front() {
        if !visited.insert(node) {
            continue;
        }
        edges.push(ClosureEdge::new(tenant_id, node, node, 0));
        for (ancestor, depth) in &ancestors {
            edges.push(ClosureEdge::new(tenant_id, *ancestor, node, *depth));
        }
        if let Some(kids) = children.get(node) {
            for child in kids {
                let mut chain: Vec<(&str, u32)> = ancestors
                    .iter()
                    .map(|(ancestor, depth)| (*ancestor, depth + 1))
                    .collect();
                chain.push((node, 1));
                queue.push_back((*child, chain));
            }
        }
    }
    let mut unreachable: Vec<String> = nodes
        .iter()
        .filter(|node| !visited.contains(node.org_id.as_str()))
        .map(|node| node.org_id.clone())
        .collect();
    unreachable.sort();
    edges.sort();
    AdjacencyClosure { edges, unreachable }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: &str = "tenant-1";

    fn chain() -> ClosureSnapshot {
        let mut snapshot = ClosureSnapshot::default();
        for (node, parent) in [("A", None), ("B", Some("A")), ("C", Some("B"))] {
            let delta = snapshot.plan_add(T, node, parent).expect("add");
            snapshot.apply(&delta);
        }
        snapshot
    }

    #[test]
    fn add_builds_exact_closure() {
        let snapshot = chain();
        assert_eq!(snapshot.depth("A", "A"), Some(0));
        assert_eq!(snapshot.depth("A", "B"), Some(1));
        assert_eq!(snapshot.depth("A", "C"), Some(2));
        assert_eq!(snapshot.depth("B", "C"), Some(1));
        assert_eq!(snapshot.depth("C", "A"), None);
        assert_eq!(snapshot.edges(T).len(), 6);
    }

    #[test]
    fn add_rejects_existing_and_unknown_parent() {
        let snapshot = chain();
        assert!(matches!(
            snapshot.plan_add(T, "B", Some("A")),
            Err(HierarchyError::Conflict(_))
        ));
        assert!(matches!(
            snapshot.plan_add(T, "D", Some("X")),
            Err(HierarchyError::Validation(_))
        ));
    }

    #[test]
    fn move_rewires_subtree() {
        let mut snapshot = chain();
        let delta = snapshot.plan_move(T, "B", None).expect("detach");
        assert_eq!(delta.removed.len(), 2);
        snapshot.apply(&delta);
        assert_eq!(snapshot.depth("B", "C"), Some(1));
        assert_eq!(snapshot.depth("A", "C"), None);

        let delta = snapshot.plan_move(T, "B", Some("A")).expect("reattach");
        snapshot.apply(&delta);
        assert_eq!(snapshot.depth("A", "C"), Some(2));
    }

    #[test]
    fn move_under_descendant_is_cycle() {
        let snapshot = chain();
        assert!(matches!(
            snapshot.plan_move(T, "A", Some("C")),
            Err(HierarchyError::Cycle { .. })
        ));
        assert!(matches!(
            snapshot.plan_move(T, "B", Some("B")),
            Err(HierarchyError::Cycle { .. })
        ));
    }

    #[test]
    fn remove_reports_orphans() {
        let mut snapshot = chain();
        let (delta, orphans) = snapshot.plan_remove(T, "B");
        assert_eq!(orphans, vec!["C".to_string()]);
        snapshot.apply(&delta);
        assert!(!snapshot.contains("B"));
        assert_eq!(snapshot.depth("A", "C"), Some(2));
    }

    #[test]
    fn adjacency_bfs_matches_incremental_build() {
        let nodes: Vec<OrgNode> = [("A", None), ("B", Some("A")), ("C", Some("B"))]
            .into_iter()
            .map(|(id, parent)| OrgNode {
                org_id: id.to_string(),
                parent_id: parent.map(str::to_string),
                tenant_id: T.to_string(),
                status: "active".to_string(),
                sort_order: 0,
            })
            .collect();
        let closure = closure_from_adjacency(T, &nodes);
        assert!(closure.unreachable.is_empty());
        let expected: Vec<ClosureEdge> = chain().edges(T).into_iter().collect();
        assert_eq!(closure.edges, expected);
    }

    #[test]
    fn adjacency_cycle_is_reported() {
        let nodes: Vec<OrgNode> = [("X", "Y"), ("Y", "X")]
            .into_iter()
            .map(|(id, parent)| OrgNode {
                org_id: id.to_string(),
                parent_id: Some(parent.to_string()),
                tenant_id: T.to_string(),
                status: "active".to_string(),
                sort_order: 0,
            })
            .collect();
        let closure = closure_from_adjacency(T, &nodes);
        assert!(closure.edges.is_empty());
        assert_eq!(closure.unreachable, vec!["X".to_string(), "Y".to_string()]);
    }
}
