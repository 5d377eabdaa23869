//! Uniform reply envelope for administrative operations.
//!
//! Admin surfaces (rate-rule edits, explicit relive calls) return a
//! `{code, message, data}` envelope rather than raw results, so callers get
//! a stable shape regardless of which subsystem handled the request.

use serde::{Deserialize, Serialize};

/// Code for a successful admin operation.
pub const CODE_OK: i32 = 200;

/// Code for a rejected admin operation (validation failure).
pub const CODE_INVALID: i32 = 400;

/// Uniform result envelope returned by admin operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiReply<T> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiReply<T> {
    /// Successful reply carrying a payload.
    pub fn ok(data: T) -> Self {
        Self {
            code: CODE_OK,
            message: "ok".to_string(),
            data: Some(data),
        }
    }

    /// Failed reply with a code and message, no payload.
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Whether the operation succeeded.
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}
