//! # PostgreSQL 存储实现模块
//!
//! 所有存储接口的 PostgreSQL 实现，用于生产环境。
//!
//! ## 设计原则
//!
//! 1. **参数化查询**：所有 SQL 使用参数绑定
//! 2. **多租户隔离**：所有查询都包含 `tenant_id` 过滤条件
//! 3. **显式事务**：闭包表增量与整租户替换在同一事务内提交
//! 4. **条件更新**：告警状态迁移使用 `where status = any($n)`，以影响行数判定先到者
//!
//! ## 数据库模式要求
//!
//! 表结构见仓库根目录 `migrations/0001_init.sql`：
//! - `org_nodes`：组织邻接表（org_id, tenant_id, parent_id, status, sort_order）
//! - `org_closure`：闭包表（tenant_id, ancestor_id, descendant_id, depth）
//! - `org_managers`：组织负责人（tenant_id, org_id, user_id, role_type）
//! - `subjects`：被监护人（tenant_id, subject_id, org_id）
//! - `alert_rules`：告警规则（expression 为 jsonb，notify_channels 为 text[]）
//! - `alerts`：告警记录（failures 为 jsonb）
//! - `notification_tasks`：通知任务归档
//!
//! ## 索引
//! - `org_closure (tenant_id, ancestor_id)` 与 `(tenant_id, descendant_id)`
//! - `alerts (tenant_id, occurred_at desc)`
//! - `notification_tasks (tenant_id, alert_id)`

pub mod alert;
pub mod notification;
pub mod org;
pub mod rule;

pub use alert::*;
pub use notification::*;
pub use org::*;
pub use rule::*;
