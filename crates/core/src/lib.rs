//! # Care Plan Core
//!
//! Core business logic for the care plan lifecycle engine.
//!
//! This crate contains the workflow and its guards:
//! - the care plan state machine and interpreter review routing
//! - tenant scoping and role authorization for every operation
//! - patient access tokens with an expiry and a failure limiter
//! - check-ins, alerts and TCM billing eligibility
//! - an append-only, per-tenant audit trail
//!
//! **No API concerns**: HTTP servers, header parsing and CLI handling belong in `api-rest`,
//! `api-shared` and `careplan-cli`.
//!
//! Everything is reached through [`engine::CareEngine`], which owns one in-memory store and hands
//! the same context to every service in [`repositories`].

pub mod access_token;
pub mod audit;
pub mod billing;
pub mod care_plan;
pub mod check_in;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod constants;
pub mod content;
pub mod engine;
pub mod error;
pub mod patient;
pub mod repositories;
pub mod review_policy;
pub mod scope;
pub mod status;
pub mod store;
pub mod tenant;

#[cfg(test)]
mod test_support;

pub use engine::CareEngine;
pub use error::{CarePlanError, CarePlanResult};
