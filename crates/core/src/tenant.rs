//! Tenants, staff users and their roles.

use careplan_ids::{TenantId, UserId};
use careplan_types::{EmailAddress, LanguageCode, NonEmptyText};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::CarePlanError;

/// Tenant policy for human review of machine translations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpreterReviewMode {
    Disabled,
    #[default]
    Optional,
    Required,
}

impl InterpreterReviewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterpreterReviewMode::Disabled => "disabled",
            InterpreterReviewMode::Optional => "optional",
            InterpreterReviewMode::Required => "required",
        }
    }
}

impl fmt::Display for InterpreterReviewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterpreterReviewMode {
    type Err = CarePlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "disabled" => Ok(InterpreterReviewMode::Disabled),
            "optional" => Ok(InterpreterReviewMode::Optional),
            "required" => Ok(InterpreterReviewMode::Required),
            other => Err(CarePlanError::Validation(format!(
                "interpreter review mode must be disabled, optional or required, got '{other}'"
            ))),
        }
    }
}

/// A clinic sharing the platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: NonEmptyText,
    pub is_demo: bool,
    pub interpreter_review_mode: InterpreterReviewMode,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    Clinician,
    Interpreter,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::Clinician => "clinician",
            Role::Interpreter => "interpreter",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CarePlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "super_admin" => Ok(Role::SuperAdmin),
            "admin" => Ok(Role::Admin),
            "clinician" => Ok(Role::Clinician),
            "interpreter" => Ok(Role::Interpreter),
            other => Err(CarePlanError::Validation(format!("unknown role '{other}'"))),
        }
    }
}

/// A staff member. Patients are not users; they authenticate with an access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub name: NonEmptyText,
    pub email: EmailAddress,
    pub role: Role,
    /// `None` only for super admins.
    pub tenant_id: Option<TenantId>,
    /// Languages an interpreter may review. Empty for other roles.
    pub languages: BTreeSet<LanguageCode>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Checks the tenant-membership invariant for `role`.
    pub(crate) fn check_membership(
        role: Role,
        tenant_id: Option<TenantId>,
    ) -> Result<(), CarePlanError> {
        match (role, tenant_id) {
            (Role::SuperAdmin, None) => Ok(()),
            (Role::SuperAdmin, Some(_)) => Err(CarePlanError::Validation(
                "super admins do not belong to a tenant".into(),
            )),
            (_, Some(_)) => Ok(()),
            (role, None) => Err(CarePlanError::Validation(format!(
                "a {role} must belong to exactly one tenant"
            ))),
        }
    }
}
