//! Redis 共享缓存实现：去重节流计数器与站内信收件箱

use crate::error::StorageError;
use crate::models::InboxMessage;
use crate::traits::{InboxStore, ThrottleStore};
use crate::validation::{ensure_same_tenant, ensure_tenant};
use domain::TenantContext;
use redis::AsyncCommands;

/// 首次自增时设置窗口 TTL；窗口内后续自增不刷新 TTL。
const THROTTLE_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

const INBOX_MAX_LEN: isize = 200;

fn throttle_key(tenant_id: &str, key: &str) -> String {
    format!("tenant:{}:throttle:{}", tenant_id, key)
}

fn inbox_key(tenant_id: &str, user_id: &str) -> String {
    format!("tenant:{}:user:{}:inbox", tenant_id, user_id)
}

/// Redis 节流计数器
pub struct RedisThrottleStore {
    client: redis::Client,
    script: redis::Script,
}

impl RedisThrottleStore {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            script: redis::Script::new(THROTTLE_SCRIPT),
        }
    }

    pub fn connect(redis_url: &str) -> Result<Self, StorageError> {
        let client =
            redis::Client::open(redis_url).map_err(|err| StorageError::new(err.to_string()))?;
        Ok(Self::new(client))
    }
}

#[async_trait::async_trait]
impl ThrottleStore for RedisThrottleStore {
    async fn check_and_increment(
        &self,
        ctx: &TenantContext,
        key: &str,
        window_ms: u64,
        _now_ms: i64,
    ) -> Result<u64, StorageError> {
        ensure_tenant(ctx)?;
        let mut connection = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|err| StorageError::new(err.to_string()))?;
        let count: u64 = self
            .script
            .key(throttle_key(&ctx.tenant_id, key))
            .arg(window_ms.max(1))
            .invoke_async(&mut connection)
            .await
            .map_err(|err| StorageError::new(err.to_string()))?;
        Ok(count)
    }
}

/// Redis 站内信收件箱（每个用户一个列表，新消息 LPUSH 到表头）
pub struct RedisInboxStore {
    client: redis::Client,
}

impl RedisInboxStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub fn connect(redis_url: &str) -> Result<Self, StorageError> {
        let client =
            redis::Client::open(redis_url).map_err(|err| StorageError::new(err.to_string()))?;
        Ok(Self::new(client))
    }
}

#[async_trait::async_trait]
impl InboxStore for RedisInboxStore {
    async fn push_message(
        &self,
        ctx: &TenantContext,
        message: &InboxMessage,
    ) -> Result<(), StorageError> {
        ensure_same_tenant(ctx, &message.tenant_id)?;
        let mut connection = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|err| StorageError::new(err.to_string()))?;
        let data = serde_json::to_string(message)?;
        let key = inbox_key(&ctx.tenant_id, &message.recipient_id);
        redis::pipe()
            .atomic()
            .lpush(&key, data)
            .ignore()
            .ltrim(&key, 0, INBOX_MAX_LEN - 1)
            .ignore()
            .query_async::<_, ()>(&mut connection)
            .await
            .map_err(|err| StorageError::new(err.to_string()))?;
        Ok(())
    }

    async fn list_messages(
        &self,
        ctx: &TenantContext,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<InboxMessage>, StorageError> {
        ensure_tenant(ctx)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut connection = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|err| StorageError::new(err.to_string()))?;
        let items: Vec<String> = connection
            .lrange(inbox_key(&ctx.tenant_id, user_id), 0, limit as isize - 1)
            .await
            .map_err(|err| StorageError::new(err.to_string()))?;
        let mut messages = Vec::with_capacity(items.len());
        for item in items {
            messages.push(serde_json::from_str(&item)?);
        }
        Ok(messages)
    }
}
