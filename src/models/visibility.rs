//! Coercion of the caller-supplied `public` flag.

use crate::services::error::{ServiceError, ServiceResult};
use serde_json::Value;

/// Resolve a requested visibility.
///
/// | input                 | result           |
/// |-----------------------|------------------|
/// | absent or `null`      | `true`           |
/// | `true` / `false`      | itself           |
/// | `"true"` / `"false"`  | parsed boolean   |
/// | anything else         | validation error |
///
/// Absent means "public", not "leave unchanged".
pub fn parse_public(requested: Option<&Value>) -> ServiceResult<bool> {
    match requested {
        None | Some(Value::Null) => Ok(true),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(Value::String(text)) if text == "true" => Ok(true),
        Some(Value::String(text)) if text == "false" => Ok(false),
        Some(_) => Err(ServiceError::Validation("Invalid \"public\" value.".into())),
    }
}
