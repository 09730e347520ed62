//! 通知任务与站内信内存实现

use crate::error::StorageError;
use crate::models::InboxMessage;
use crate::traits::{InboxStore, NotificationTaskStore};
use crate::validation::{ensure_same_tenant, ensure_tenant};
use domain::{NotificationTask, TenantContext};
use std::collections::HashMap;
use std::sync::RwLock;

/// 通知任务内存存储
#[derive(Default)]
pub struct InMemoryNotificationTaskStore {
    tasks: RwLock<Vec<NotificationTask>>,
}

impl InMemoryNotificationTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl NotificationTaskStore for InMemoryNotificationTaskStore {
    async fn save_task(
        &self,
        ctx: &TenantContext,
        task: &NotificationTask,
    ) -> Result<(), StorageError> {
        ensure_same_tenant(ctx, &task.tenant_id)?;
        let mut tasks = self
            .tasks
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        match tasks.iter_mut().find(|item| item.task_id == task.task_id) {
            Some(existing) => *existing = task.clone(),
            None => tasks.push(task.clone()),
        }
        Ok(())
    }

    async fn list_tasks(
        &self,
        ctx: &TenantContext,
        alert_id: &str,
    ) -> Result<Vec<NotificationTask>, StorageError> {
        ensure_tenant(ctx)?;
        let tasks = self
            .tasks
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(tasks
            .iter()
            .filter(|item| item.tenant_id == ctx.tenant_id && item.alert_id == alert_id)
            .cloned()
            .collect())
    }
}

/// 站内信内存存储
#[derive(Default)]
pub struct InMemoryInboxStore {
    inboxes: RwLock<HashMap<(String, String), Vec<InboxMessage>>>,
}

impl InMemoryInboxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl InboxStore for InMemoryInboxStore {
    async fn push_message(
        &self,
        ctx: &TenantContext,
        message: &InboxMessage,
    ) -> Result<(), StorageError> {
        ensure_same_tenant(ctx, &message.tenant_id)?;
        let mut inboxes = self
            .inboxes
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        inboxes
            .entry((ctx.tenant_id.clone(), message.recipient_id.clone()))
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn list_messages(
        &self,
        ctx: &TenantContext,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<InboxMessage>, StorageError> {
        ensure_tenant(ctx)?;
        let inboxes = self
            .inboxes
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(inboxes
            .get(&(ctx.tenant_id.clone(), user_id.to_string()))
            .map(|items| items.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
