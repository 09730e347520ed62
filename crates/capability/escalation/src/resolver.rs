use crate::EscalationError;
use domain::{ManagerEntry, TenantContext};
use hms_hierarchy::OrgHierarchyIndex;
use hms_storage::ManagerStore;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// 升级链中的一层（某个祖先组织及其负责人）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationLevel {
    pub org_id: String,
    /// 与触发组织的距离（触发组织自身为 0）
    pub distance: u32,
    pub recipients: Vec<String>,
}

/// 由近及远的升级链；没有负责人的层级被跳过，跨层重复的用户只保留最近一次。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscalationChain {
    pub org_id: String,
    pub levels: Vec<EscalationLevel>,
}

impl EscalationChain {
    pub fn level(&self, index: usize) -> Option<&EscalationLevel> {
        self.levels.get(index)
    }

    /// 去重后的完整联系人列表（由近及远）。
    pub fn contacts(&self) -> Vec<String> {
        self.levels
            .iter()
            .flat_map(|level| level.recipients.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

/// 单个组织的缓存槽；`version` 只增不减，失效时递增并清空内容。
#[derive(Default)]
struct CacheSlot {
    version: u64,
    managers: HashMap<String, Arc<Vec<ManagerEntry>>>,
    chains: HashMap<String, Arc<EscalationChain>>,
}

type SlotKey = (String, String);

pub struct EscalationResolver {
    index: Arc<OrgHierarchyIndex>,
    managers: Arc<dyn ManagerStore>,
    slots: Mutex<HashMap<SlotKey, CacheSlot>>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl EscalationResolver {
    pub fn new(index: Arc<OrgHierarchyIndex>, managers: Arc<dyn ManagerStore>) -> Self {
        Self {
            index,
            managers,
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn index(&self) -> &Arc<OrgHierarchyIndex> {
        &self.index
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    fn with_slots<R>(&self, f: impl FnOnce(&mut HashMap<SlotKey, CacheSlot>) -> R) -> R {
        let mut slots = match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut slots)
    }

    fn version(&self, tenant_id: &str, org_id: &str) -> u64 {
        self.with_slots(|slots| {
            slots
                .get(&(tenant_id.to_string(), org_id.to_string()))
                .map(|slot| slot.version)
                .unwrap_or(0)
        })
    }

    /// 组织自身在指定角色下的负责人（初始接收人）。
    pub async fn managers_of(
        &self,
        tenant_id: &str,
        org_id: &str,
        role_type: &str,
    ) -> Result<Arc<Vec<ManagerEntry>>, EscalationError> {
        let key = (tenant_id.to_string(), org_id.to_string());
        let cached = self.with_slots(|slots| {
            slots
                .get(&key)
                .and_then(|slot| slot.managers.get(role_type).cloned())
        });
        if let Some(entries) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entries);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let version = self.version(tenant_id, org_id);
        let ctx = TenantContext::system(tenant_id);
        let entries = Arc::new(self.managers.list_managers(&ctx, org_id, role_type).await?);
        self.with_slots(|slots| {
            let slot = slots.entry(key).or_default();
            // 加载期间被失效则丢弃结果
            if slot.version == version {
                slot.managers
                    .insert(role_type.to_string(), entries.clone());
            }
        });
        Ok(entries)
    }

    /// 解析升级链：触发组织自身在前，随后沿祖先路径由近及远，止于租户根。
    pub async fn resolve_chain(
        &self,
        tenant_id: &str,
        org_id: &str,
        role_type: &str,
    ) -> Result<Arc<EscalationChain>, EscalationError> {
        let key = (tenant_id.to_string(), org_id.to_string());
        let cached = self.with_slots(|slots| {
            slots
                .get(&key)
                .and_then(|slot| slot.chains.get(role_type).cloned())
        });
        if let Some(chain) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(chain);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let version = self.version(tenant_id, org_id);

        let mut path = self.index.find_ancestor_path(tenant_id, org_id).await?;
        path.reverse();
        let mut levels = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let orgs = std::iter::once(org_id.to_string()).chain(path);
        for (distance, level_org) in orgs.enumerate() {
            let entries = self.managers_of(tenant_id, &level_org, role_type).await?;
            let recipients: Vec<String> = entries
                .iter()
                .filter(|entry| seen.insert(entry.user_id.clone()))
                .map(|entry| entry.user_id.clone())
                .collect();
            if recipients.is_empty() {
                continue;
            }
            levels.push(EscalationLevel {
                org_id: level_org,
                distance: distance as u32,
                recipients,
            });
        }
        let chain = Arc::new(EscalationChain {
            org_id: org_id.to_string(),
            levels,
        });
        let stored = self.with_slots(|slots| {
            let slot = slots.entry(key).or_default();
            if slot.version == version {
                slot.chains.insert(role_type.to_string(), chain.clone());
                true
            } else {
                false
            }
        });
        debug!(
            target: "hms.escalation",
            tenant_id = %tenant_id,
            org_id = %org_id,
            levels = chain.levels.len(),
            cached = stored,
            "escalation_chain_resolved"
        );
        Ok(chain)
    }

    /// 失效给定组织集合的缓存（调用方负责传入受影响的整棵子树）。
    pub fn invalidate(&self, tenant_id: &str, org_ids: &[String]) {
        self.with_slots(|slots| {
            for org_id in org_ids {
                let slot = slots
                    .entry((tenant_id.to_string(), org_id.clone()))
                    .or_default();
                slot.version += 1;
                slot.managers.clear();
                slot.chains.clear();
            }
        });
        self.invalidations
            .fetch_add(org_ids.len() as u64, Ordering::Relaxed);
        debug!(
            target: "hms.escalation",
            tenant_id = %tenant_id,
            orgs = org_ids.len(),
            "escalation_cache_invalidated"
        );
    }

    /// 失效节点及其全部后代。
    pub async fn invalidate_subtree(
        &self,
        tenant_id: &str,
        org_id: &str,
    ) -> Result<Vec<String>, EscalationError> {
        let mut subtree = self.index.find_subtree(tenant_id, org_id).await?;
        if subtree.is_empty() {
            subtree.push(org_id.to_string());
        }
        self.invalidate(tenant_id, &subtree);
        Ok(subtree)
    }

    /// 负责人角色分配变更。
    pub async fn on_manager_change(
        &self,
        tenant_id: &str,
        org_id: &str,
    ) -> Result<Vec<String>, EscalationError> {
        self.invalidate_subtree(tenant_id, org_id).await
    }

    /// 缓存中仍持有内容的组织数。
    pub fn cached_orgs(&self, tenant_id: &str) -> usize {
        self.with_slots(|slots| {
            slots
                .iter()
                .filter(|((tenant, _), slot)| {
                    tenant.as_str() == tenant_id
                        && (!slot.managers.is_empty() || !slot.chains.is_empty())
                })
                .count()
        })
    }
}
