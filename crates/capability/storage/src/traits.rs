//! 存储接口 Trait 定义
//!
//! - OrgNodeStore：组织邻接表（只读，重建闭包的数据源）
//! - ClosureStore：组织闭包表（增量与整租户替换均在事务内完成）
//! - ManagerStore：组织负责人
//! - SubjectStore：被监护人 → 所属组织
//! - AlertRuleStore：告警规则
//! - AlertStore：告警记录（状态迁移使用比较并交换）
//! - NotificationTaskStore：通知任务归档
//! - ThrottleStore：去重节流计数器
//! - InboxStore：站内信收件箱
//!
//! 设计原则：
//! - 所有接口显式接收 TenantContext
//! - 所有接口返回 StorageError
//! - 使用 async_trait 支持动态分发

use crate::error::StorageError;
use crate::models::{AlertQuery, InboxMessage};
use async_trait::async_trait;
use domain::{
    AlertRecord, AlertRule, AlertStatus, ChannelFailure, ClosureEdge, DeliveryStatus,
    ManagerEntry, NotificationTask, OrgNode, TenantContext,
};

/// 组织邻接表存储接口
#[async_trait]
pub trait OrgNodeStore: Send + Sync {
    /// 列出租户下全部组织节点
    async fn list_nodes(&self, ctx: &TenantContext) -> Result<Vec<OrgNode>, StorageError>;
}

/// 组织闭包表存储接口
#[async_trait]
pub trait ClosureStore: Send + Sync {
    /// 读取租户全部闭包边
    async fn load_edges(&self, ctx: &TenantContext) -> Result<Vec<ClosureEdge>, StorageError>;

    /// 在同一事务内删除 `removed` 并插入 `added`
    async fn apply_delta(
        &self,
        ctx: &TenantContext,
        removed: &[ClosureEdge],
        added: &[ClosureEdge],
    ) -> Result<(), StorageError>;

    /// 在同一事务内替换租户全部闭包边（重建）
    async fn replace_tenant(
        &self,
        ctx: &TenantContext,
        edges: &[ClosureEdge],
    ) -> Result<(), StorageError>;
}

/// 组织负责人存储接口
#[async_trait]
pub trait ManagerStore: Send + Sync {
    /// 列出组织在指定角色下的负责人（按分配顺序）
    async fn list_managers(
        &self,
        ctx: &TenantContext,
        org_id: &str,
        role_type: &str,
    ) -> Result<Vec<ManagerEntry>, StorageError>;
}

/// 被监护人归属存储接口
#[async_trait]
pub trait SubjectStore: Send + Sync {
    async fn find_subject_org(
        &self,
        ctx: &TenantContext,
        subject_id: &str,
    ) -> Result<Option<String>, StorageError>;
}

/// 告警规则存储接口
#[async_trait]
pub trait AlertRuleStore: Send + Sync {
    /// 列出租户已启用的规则（按创建时间、规则 ID 升序）
    async fn list_enabled_rules(&self, ctx: &TenantContext)
    -> Result<Vec<AlertRule>, StorageError>;
}

/// 告警记录存储接口
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn create_alert(
        &self,
        ctx: &TenantContext,
        record: AlertRecord,
    ) -> Result<AlertRecord, StorageError>;

    async fn find_alert(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
    ) -> Result<Option<AlertRecord>, StorageError>;

    /// 按发生时间倒序列出告警
    async fn list_alerts(
        &self,
        ctx: &TenantContext,
        query: &AlertQuery,
    ) -> Result<Vec<AlertRecord>, StorageError>;

    /// 比较并交换：当前状态属于 `from` 时迁移到 `to`，返回是否成功
    async fn transition_status(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
        from: &[AlertStatus],
        to: AlertStatus,
    ) -> Result<bool, StorageError>;

    /// 确认告警：仅在告警仍开放（NEW/PENDING）时成功
    async fn acknowledge(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
        user_id: &str,
        acked_at_ms: i64,
    ) -> Result<bool, StorageError>;

    /// 升级：仅在告警仍开放且升级层级等于 `expected_level` 时成功
    async fn escalate(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
        expected_level: u32,
    ) -> Result<bool, StorageError>;

    /// 更新告警整体投递状态与各通道失败原因
    async fn update_delivery(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
        delivery_status: DeliveryStatus,
        failures: &[ChannelFailure],
    ) -> Result<bool, StorageError>;
}

/// 通知任务存储接口
#[async_trait]
pub trait NotificationTaskStore: Send + Sync {
    /// 按 task_id 写入或覆盖任务快照
    async fn save_task(
        &self,
        ctx: &TenantContext,
        task: &NotificationTask,
    ) -> Result<(), StorageError>;

    async fn list_tasks(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
    ) -> Result<Vec<NotificationTask>, StorageError>;
}

/// 去重节流计数器接口
#[async_trait]
pub trait ThrottleStore: Send + Sync {
    /// 原子地自增 `key` 的计数并返回自增后的值。
    ///
    /// 计数为 1 时开启长度为 `window_ms` 的新窗口；窗口内的后续自增不延长窗口。
    async fn check_and_increment(
        &self,
        ctx: &TenantContext,
        key: &str,
        window_ms: u64,
        now_ms: i64,
    ) -> Result<u64, StorageError>;
}

/// 站内信收件箱接口
#[async_trait]
pub trait InboxStore: Send + Sync {
    async fn push_message(
        &self,
        ctx: &TenantContext,
        message: &InboxMessage,
    ) -> Result<(), StorageError>;

    /// 最新消息在前
    async fn list_messages(
        &self,
        ctx: &TenantContext,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<InboxMessage>, StorageError>;
}
