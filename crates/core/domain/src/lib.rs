pub mod alert;
pub mod data;
pub mod notification;
pub mod org;
pub mod rule;

pub use alert::{AlertRecord, AlertStatus, ChannelFailure};
pub use data::{NormalizedEvent, RawVitalEvent};
pub use notification::{ChannelClass, ChannelKind, DeliveryStatus, NotificationTask};
pub use org::{ClosureEdge, ManagerEntry, OrgMutationEvent, OrgNode, OrgOperation};
pub use rule::{
    AlertRule, Comparison, MetricCondition, RuleExpression, RuleType, Severity, Urgency,
};

/// 租户上下文：所有模块共享的执行上下文。
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    pub actor_id: String,
}

impl TenantContext {
    /// 构造显式身份的租户上下文。
    pub fn new(tenant_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor_id: actor_id.into(),
        }
    }

    /// 系统内部任务使用的上下文（流水线、计时器、监听器）。
    pub fn system(tenant_id: impl Into<String>) -> Self {
        Self::new(tenant_id, "system")
    }
}

impl Default for TenantContext {
    /// 空上下文（仅用于测试或占位）。
    fn default() -> Self {
        Self {
            tenant_id: "".to_string(),
            actor_id: "".to_string(),
        }
    }
}
