//! Constants used throughout the care plan core crate.

/// Number of random bytes in a patient access token (256 bits).
pub const ACCESS_TOKEN_BYTES: usize = 32;

/// Default lifetime of a patient access token.
pub const DEFAULT_TOKEN_TTL_DAYS: u32 = 30;

/// Calendar days after sending within which first contact earns CPT 99496.
pub const CPT_99496_MAX_DAYS: i64 = 7;

/// Calendar days after sending within which first contact earns CPT 99495.
pub const CPT_99495_MAX_DAYS: i64 = 14;

/// Languages that never need interpreter review (the source language of every plan).
pub const DEFAULT_REVIEW_EXEMPT_LANGUAGES: &[&str] = &["en"];

/// Upper bound for configured day counts (token lifetime, check-in offsets), about ten years.
pub const MAX_CONFIGURED_DAYS: u32 = 3650;

/// Upper bound for the configured token failure window and lockout.
pub const MAX_CONFIGURED_MINUTES: u32 = 7 * 24 * 60;

/// Days after sending at which the initial check-ins are scheduled.
pub const DEFAULT_CHECK_IN_OFFSETS_DAYS: &[u32] = &[2];

/// Base URL of the patient portal; the access token is appended as the last path segment.
pub const DEFAULT_PORTAL_BASE_URL: &str = "http://localhost:3000/portal";

/// Failed token validations from one source before it is locked out.
pub const DEFAULT_TOKEN_FAILURE_LIMIT: u32 = 5;

/// Window over which failed token validations are counted.
pub const DEFAULT_TOKEN_FAILURE_WINDOW_MINUTES: u32 = 15;

/// How long a locked-out source is refused.
pub const DEFAULT_TOKEN_LOCKOUT_MINUTES: u32 = 15;

/// Prefix of every environment variable the binaries read at startup.
pub const ENV_PREFIX: &str = "CAREPLAN_";
