//! # warden-core
//!
//! Shared types for the warden authorization runtime.
//!
//! This crate provides:
//! - The workspace error taxonomy ([`CoreError`])
//! - Node and application identity ([`NodeId`], [`AppId`])
//! - The uniform admin reply envelope ([`ApiReply`])
//! - Epoch-millisecond clock helpers used by the rate limiter

pub mod error;
pub mod id;
pub mod reply;
pub mod time;

pub use error::{CoreError, Result};
pub use id::{AppId, NodeId};
pub use reply::{ApiReply, CODE_INVALID, CODE_OK};
pub use time::now_millis;
