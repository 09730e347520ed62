//! 内存存储实现模块
//!
//! 用于测试和单节点本地运行。
//!
//! 包含以下实现：
//! - OrgNodeStore / ClosureStore / ManagerStore / SubjectStore: org.rs
//! - AlertRuleStore: InMemoryAlertRuleStore
//! - AlertStore: InMemoryAlertStore
//! - NotificationTaskStore / InboxStore: notification.rs
//! - ThrottleStore: InMemoryThrottleStore（单把互斥锁保证原子性）

pub mod alert;
pub mod notification;
pub mod org;
pub mod rule;
pub mod throttle;

pub use alert::*;
pub use notification::*;
pub use org::*;
pub use rule::*;
pub use throttle::*;
