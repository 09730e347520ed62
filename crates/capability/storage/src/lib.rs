//! # HMS Storage 模块
//!
//! 统一的数据存储抽象层，支持多种存储后端实现。
//!
//! ## 架构设计
//!
//! 1. **接口抽象层** (`traits.rs`)：所有资源存储的异步 Trait 接口
//! 2. **数据模型层** (`models.rs`)：存储层专用的查询/载荷结构
//! 3. **错误处理层** (`error.rs`)：统一的存储错误类型
//! 4. **验证辅助层** (`validation.rs`)：多租户验证
//! 5. **连接管理层** (`connection.rs`)：Postgres 连接池、Redis 客户端
//! 6. **实现层**：
//!    - `in_memory/`：内存存储实现（测试与单节点本地运行）
//!    - `postgres/`：PostgreSQL 存储实现（权威关系存储）
//!    - `redis`：共享缓存（节流计数器、站内信）
//!
//! ## 多租户安全
//!
//! 所有存储操作都强制通过 `TenantContext` 进行租户隔离：
//!
//! - **租户 ID 验证**：所有查询自动添加 `tenant_id` 过滤条件
//! - **写入校验**：记录的 `tenant_id` 必须与上下文一致
//!
//! ## 原子性约定
//!
//! - 闭包表增量（`ClosureStore::apply_delta`）与重建（`replace_tenant`）在单个事务内提交
//! - 告警状态迁移为比较并交换，返回 `bool` 表示本次调用是否“先到”
//! - 节流计数器的检查与自增是单个原子操作（Redis Lua / 互斥锁）

pub mod connection;
pub mod error;
pub mod in_memory;
pub mod models;
pub mod postgres;
pub mod redis;
pub mod traits;
pub mod validation;

pub use connection::*;
pub use error::*;
pub use models::*;
pub use crate::redis::{RedisInboxStore, RedisThrottleStore};
pub use traits::*;
pub use validation::*;

pub use in_memory::{
    InMemoryAlertRuleStore, InMemoryAlertStore, InMemoryClosureStore, InMemoryInboxStore,
    InMemoryManagerStore, InMemoryNotificationTaskStore, InMemoryOrgNodeStore,
    InMemorySubjectStore, InMemoryThrottleStore,
};

pub use postgres::{
    PgAlertRuleStore, PgAlertStore, PgClosureStore, PgManagerStore, PgNotificationTaskStore,
    PgOrgNodeStore, PgSubjectStore,
};
