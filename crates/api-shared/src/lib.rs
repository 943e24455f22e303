//! # API Shared
//!
//! Shared utilities and definitions for the care plan APIs.
//!
//! Contains:
//! - `HealthService` and its response type
//! - Caller resolution from the `x-user-id` header (usable by any HTTP surface)
//!
//! Used by `api-rest` and the workspace's main binary.

pub mod auth;
pub mod health;

pub use auth::{resolve_caller, AuthError, USER_ID_HEADER};
pub use health::{HealthRes, HealthService};
