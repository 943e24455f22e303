//! Engine services.
//!
//! One service per area. Every service holds an [`crate::engine::EngineContext`] and reaches tenant
//! data only through [`crate::scope::TenantScope`].

pub mod billing;
pub mod care_plans;
pub mod check_ins;
pub mod directory;
pub mod portal;
pub mod reporting;
