//! Typed identifiers for care plan entities.
//!
//! Every entity in the engine is keyed by a UUID, but a bare `Uuid` makes it far too easy to pass
//! a patient id where a care plan id is expected. Each entity therefore gets its own newtype.
//!
//! ## Canonical form
//! Identifiers use one *canonical* textual representation: **32 lowercase hexadecimal characters**
//! (no hyphens), the same value produced by `Uuid::new_v4().simple().to_string()`.
//!
//! - Externally supplied identifiers (REST paths, CLI arguments) must already be canonical.
//!   Use `parse` to validate them.
//! - Non-canonical values (uppercase, hyphenated, wrong length, non-hex) are rejected rather than
//!   normalised, so one entity never has two spellings in logs or audit payloads.

use std::fmt;
use std::str::FromStr;

pub use ::uuid::Uuid;

/// Error type for identifier parsing.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdError {
    #[error("{kind} must be 32 lowercase hex characters without hyphens, got: '{input}'")]
    NotCanonical { kind: &'static str, input: String },
}

/// Result type for identifier operations.
pub type IdResult<T> = Result<T, IdError>;

/// Returns true if `input` is in canonical identifier form.
///
/// Purely syntactic: exactly 32 bytes, each one of `0-9` or `a-f`.
pub fn is_canonical(input: &str) -> bool {
    input.len() == 32
        && input
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn parse_canonical(kind: &'static str, input: &str) -> IdResult<Uuid> {
    if !is_canonical(input) {
        return Err(IdError::NotCanonical {
            kind,
            input: input.to_owned(),
        });
    }
    Uuid::parse_str(input).map_err(|_| IdError::NotCanonical {
        kind,
        input: input.to_owned(),
    })
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            /// Allocates a fresh random (v4) identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Validates an externally supplied identifier, which must already be canonical.
            pub fn parse(input: &str) -> IdResult<Self> {
                parse_canonical($kind, input).map(Self)
            }

            pub fn uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.simple())
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        #[cfg(feature = "serde")]
        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        #[cfg(feature = "serde")]
        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

entity_id!(
    /// Identifier of a tenant (a clinic sharing the platform).
    TenantId,
    "tenant id"
);
entity_id!(
    /// Identifier of a staff user.
    UserId,
    "user id"
);
entity_id!(
    /// Identifier of a patient within one tenant.
    PatientId,
    "patient id"
);
entity_id!(
    /// Identifier of a care plan, the workflow aggregate root.
    CarePlanId,
    "care plan id"
);
entity_id!(
    /// Identifier of a scheduled check-in.
    CheckInId,
    "check-in id"
);
entity_id!(
    /// Identifier of an audit log entry.
    AuditEntryId,
    "audit entry id"
);
