//! 输入验证辅助函数
//!
//! - normalize_required：去除首尾空格并检查非空
//! - normalize_optional：提供时同样要求非空
//! - parse_operation：组织变更操作（ADD/MOVE/REMOVE）

use crate::utils::response::bad_request_error;
use axum::response::Response;
use domain::OrgOperation;

pub fn normalize_required(value: String, field: &str) -> Result<String, Response> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(bad_request_error(format!("{field} required")));
    }
    Ok(trimmed.to_string())
}

pub fn normalize_optional(value: Option<String>, field: &str) -> Result<Option<String>, Response> {
    match value {
        Some(value) => normalize_required(value, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_operation(value: &str) -> Result<OrgOperation, Response> {
    match value.trim().to_ascii_uppercase().as_str() {
        "ADD" => Ok(OrgOperation::Add),
        "MOVE" => Ok(OrgOperation::Move),
        "REMOVE" => Ok(OrgOperation::Remove),
        other => Err(bad_request_error(format!("unknown operation: {other}"))),
    }
}
