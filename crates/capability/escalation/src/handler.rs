//! 组织变更事件处理：更新闭包索引并按子树范围失效升级链缓存。

use crate::{EscalationError, EscalationResolver};
use domain::{OrgMutationEvent, OrgOperation};
use hms_hierarchy::OrgHierarchyIndex;
use std::sync::Arc;
use tracing::info;

pub struct OrgEventHandler {
    index: Arc<OrgHierarchyIndex>,
    resolver: Arc<EscalationResolver>,
}

impl OrgEventHandler {
    pub fn new(index: Arc<OrgHierarchyIndex>, resolver: Arc<EscalationResolver>) -> Self {
        Self { index, resolver }
    }

    /// 受影响子树在变更前从索引读取；变更前后各失效一次，
    /// 使变更窗口内开始的加载也无法写回缓存。
    pub async fn handle(&self, event: &OrgMutationEvent) -> Result<Vec<String>, EscalationError> {
        let mut affected = self
            .index
            .find_subtree(&event.tenant_id, &event.node_id)
            .await?;
        if affected.is_empty() {
            affected.push(event.node_id.clone());
        }
        if event.operation != OrgOperation::Add {
            self.resolver.invalidate(&event.tenant_id, &affected);
        }
        self.index.apply_event(event).await?;
        self.resolver.invalidate(&event.tenant_id, &affected);
        info!(
            target: "hms.escalation",
            tenant_id = %event.tenant_id,
            node_id = %event.node_id,
            operation = ?event.operation,
            invalidated = affected.len(),
            "org_event_applied"
        );
        Ok(affected)
    }

    pub async fn on_manager_change(
        &self,
        tenant_id: &str,
        org_id: &str,
    ) -> Result<Vec<String>, EscalationError> {
        let affected = self.resolver.on_manager_change(tenant_id, org_id).await?;
        info!(
            target: "hms.escalation",
            tenant_id = %tenant_id,
            org_id = %org_id,
            invalidated = affected.len(),
            "manager_change_applied"
        );
        Ok(affected)
    }
}
