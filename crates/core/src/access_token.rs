//! Patient access tokens.
//!
//! A token is the patient's only credential. Each sent plan holds exactly one current token;
//! issuing a new one (on resend) makes the previous value unusable immediately.
//!
//! Unknown, expired and superseded tokens all fail with [`CarePlanError::TokenInvalid`] so a
//! caller cannot tell which tokens once existed. Sources that keep presenting bad tokens are
//! locked out by [`TokenFailureLimiter`] before storage is consulted.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use careplan_ids::CarePlanId;
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::care_plan::CarePlan;
use crate::clock::Clock;
use crate::config::{CoreConfig, TokenLockoutPolicy};
use crate::constants::ACCESS_TOKEN_BYTES;
use crate::store::{lock, MemoryStore, TenantPartition};
use crate::{CarePlanError, CarePlanResult};

/// A freshly minted token and when it stops working.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl IssuedToken {
    /// Make this the plan's current token, returning the one it replaces.
    pub(crate) fn bind(&self, plan: &mut CarePlan) -> Option<String> {
        plan.access_token_expiry = Some(self.expires_at);
        plan.access_token.replace(self.token.clone())
    }
}

/// 256 bits from the OS RNG, base64url without padding (43 characters).
pub fn generate_token() -> String {
    let mut bytes = [0u8; ACCESS_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

// ============================================================================
// FAILURE LIMITER
// ============================================================================

#[derive(Debug, Default)]
struct SourceState {
    failures: Vec<DateTime<Utc>>,
    locked_until: Option<DateTime<Utc>>,
}

impl SourceState {
    fn is_active(&self, now: DateTime<Utc>, window_start: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
            || self.failures.iter().any(|at| *at > window_start)
    }
}

/// Counts failed validations per source (normally a client address).
///
/// After `max_failures` failures inside `window`, the source is refused for `lockout`.
/// A successful validation clears the source's history.
#[derive(Debug)]
pub struct TokenFailureLimiter {
    policy: TokenLockoutPolicy,
    sources: HashMap<String, SourceState>,
}

impl TokenFailureLimiter {
    pub fn new(policy: TokenLockoutPolicy) -> Self {
        Self {
            policy,
            sources: HashMap::new(),
        }
    }

    pub fn is_locked(&self, source: &str, now: DateTime<Utc>) -> bool {
        self.sources
            .get(source)
            .and_then(|s| s.locked_until)
            .is_some_and(|until| now < until)
    }

    /// Record a failure. Returns true if this failure started a lockout.
    ///
    /// Sources with no lockout in force and no failure inside the window are forgotten here, so
    /// the map only holds sources that could still be locked out.
    pub fn record_failure(&mut self, source: &str, now: DateTime<Utc>) -> bool {
        let window_start = now - self.policy.window;
        self.sources.retain(|_, s| s.is_active(now, window_start));
        let state = self.sources.entry(source.to_string()).or_default();

        if state.locked_until.is_some_and(|until| now >= until) {
            state.locked_until = None;
            state.failures.clear();
        }
        state.failures.retain(|at| *at > window_start);
        state.failures.push(now);

        if state.locked_until.is_none() && state.failures.len() as u32 >= self.policy.max_failures
        {
            state.locked_until = Some(now + self.policy.lockout);
            state.failures.clear();
            return true;
        }
        false
    }

    pub fn clear(&mut self, source: &str) {
        self.sources.remove(source);
    }

    /// Number of sources currently tracked.
    pub fn tracked_sources(&self) -> usize {
        self.sources.len()
    }
}

// ============================================================================
// ACCESS TOKEN MANAGER
// ============================================================================

/// Issues and validates patient access tokens.
#[derive(Debug)]
pub struct AccessTokenManager {
    cfg: Arc<CoreConfig>,
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    limiter: Mutex<TokenFailureLimiter>,
}

impl AccessTokenManager {
    pub fn new(cfg: Arc<CoreConfig>, store: Arc<MemoryStore>, clock: Arc<dyn Clock>) -> Self {
        let limiter = TokenFailureLimiter::new(cfg.token_lockout());
        Self {
            cfg,
            store,
            clock,
            limiter: Mutex::new(limiter),
        }
    }

    /// Mint a token valid from `now`. Nothing is indexed until the caller commits it with
    /// [`IssuedToken::bind`] and [`MemoryStore::index_delivery`].
    pub(crate) fn mint(&self, now: DateTime<Utc>) -> IssuedToken {
        IssuedToken {
            token: generate_token(),
            expires_at: now + self.cfg.token_ttl(),
        }
    }

    /// Return the plan `token` currently unlocks.
    ///
    /// # Errors
    ///
    /// [`CarePlanError::TokenInvalid`] if the token is unknown, superseded or expired.
    pub fn validate(&self, token: &str) -> CarePlanResult<CarePlan> {
        self.with_valid_plan(token, |partition, plan_id| Ok(partition.plan(plan_id)?.clone()))
    }

    /// [`AccessTokenManager::validate`] behind the failure limiter for `source`.
    pub fn validate_guarded(&self, source: &str, token: &str) -> CarePlanResult<CarePlan> {
        self.guarded(source, || self.validate(token))
    }

    /// Run `f` under the partition lock of the plan `token` unlocks.
    ///
    /// The token is re-checked under the lock, so a concurrent resend cannot slip between the
    /// check and `f`.
    pub(crate) fn with_valid_plan<T>(
        &self,
        token: &str,
        f: impl FnOnce(&mut TenantPartition, CarePlanId) -> CarePlanResult<T>,
    ) -> CarePlanResult<T> {
        let plan_id = self
            .store
            .token_plan(token)?
            .ok_or(CarePlanError::TokenInvalid)?;
        let tenant_id = match self.store.plan_tenant(plan_id) {
            Ok(tenant_id) => tenant_id,
            Err(CarePlanError::NotFound(_)) => return Err(CarePlanError::TokenInvalid),
            Err(other) => return Err(other),
        };
        let handle = self.store.partition(tenant_id)?;
        let mut partition = lock(&handle)?;

        let now = self.clock.now();
        let accepted = partition
            .plans
            .get(&plan_id)
            .is_some_and(|plan| plan.accepts_token(token, now));
        if !accepted {
            return Err(CarePlanError::TokenInvalid);
        }
        f(&mut partition, plan_id)
    }

    /// Apply the failure limiter around `attempt`.
    ///
    /// A locked-out source fails with [`CarePlanError::TokenInvalid`] without running `attempt`.
    pub(crate) fn guarded<T>(
        &self,
        source: &str,
        attempt: impl FnOnce() -> CarePlanResult<T>,
    ) -> CarePlanResult<T> {
        let now = self.clock.now();
        if self.limiter()?.is_locked(source, now) {
            tracing::warn!(source, "access token attempt refused: source locked out");
            return Err(CarePlanError::TokenInvalid);
        }

        let result = attempt();
        match &result {
            Err(CarePlanError::TokenInvalid) => {
                if self.limiter()?.record_failure(source, now) {
                    tracing::warn!(source, "source locked out after repeated invalid access tokens");
                }
            }
            Ok(_) => self.limiter()?.clear(source),
            Err(_) => {}
        }
        result
    }

    fn limiter(&self) -> CarePlanResult<std::sync::MutexGuard<'_, TokenFailureLimiter>> {
        self.limiter.lock().map_err(|_| CarePlanError::LockPoisoned)
    }
}
