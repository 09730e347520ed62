//! 数据模型
//!
//! 存储层专用的查询/载荷结构；核心实体定义在 `domain`。
//! - 告警查询：AlertQuery
//! - 站内信：InboxMessage

use domain::AlertStatus;
use serde::{Deserialize, Serialize};

/// 告警列表查询条件。
#[derive(Debug, Clone, Default)]
pub struct AlertQuery {
    pub status: Option<AlertStatus>,
    pub subject_id: Option<String>,
    pub limit: Option<i64>,
}

impl AlertQuery {
    /// 默认返回最近 100 条。
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 1000)
    }
}

/// 站内信收件箱中的一条消息。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxMessage {
    pub alert_id: String,
    pub tenant_id: String,
    pub recipient_id: String,
    pub subject_id: String,
    pub metric: String,
    pub value: f64,
    pub severity: String,
    pub escalation_level: u32,
    pub created_at_ms: i64,
}
