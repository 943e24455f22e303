//! Engine assembly from process environment.
//!
//! Everything here runs once, before the server accepts requests. Handlers never read the
//! environment.
//!
//! # Environment Variables
//! - `CAREPLAN_CONFIG_FILE`: optional YAML overlay for the core settings
//! - `CAREPLAN_*`: core settings, see `careplan_core::config::ConfigSettings::apply_env`
//! - `CAREPLAN_TEXT_PROCESSOR_URL`: text processing service (processing fails without it)
//! - `CAREPLAN_NOTIFIER_URL`: notification webhook (dispatches are only logged without it)
//! - `CAREPLAN_UPSTREAM_TIMEOUT_SECS`: per-request timeout for both (default 30)
//! - `CAREPLAN_BOOTSTRAP_ADMIN_EMAIL` / `CAREPLAN_BOOTSTRAP_ADMIN_NAME`: first super admin

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use careplan_core::collaborators::{
    HttpNotifier, HttpTextProcessor, LogNotifier, Notifier, TextProcessor,
    UnconfiguredTextProcessor,
};
use careplan_core::config::{ConfigSettings, CoreConfig};
use careplan_core::tenant::User;
use careplan_core::CareEngine;

pub const CONFIG_FILE_VAR: &str = "CAREPLAN_CONFIG_FILE";
pub const TEXT_PROCESSOR_URL_VAR: &str = "CAREPLAN_TEXT_PROCESSOR_URL";
pub const NOTIFIER_URL_VAR: &str = "CAREPLAN_NOTIFIER_URL";
pub const UPSTREAM_TIMEOUT_VAR: &str = "CAREPLAN_UPSTREAM_TIMEOUT_SECS";
pub const BOOTSTRAP_EMAIL_VAR: &str = "CAREPLAN_BOOTSTRAP_ADMIN_EMAIL";
pub const BOOTSTRAP_NAME_VAR: &str = "CAREPLAN_BOOTSTRAP_ADMIN_NAME";

const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

pub struct Startup {
    pub engine: Arc<CareEngine>,
    /// Present when a bootstrap email was configured.
    pub super_admin: Option<User>,
}

/// Build the engine from `lookup` (normally `std::env::var`).
///
/// # Errors
///
/// Returns an error if the YAML file cannot be read, any setting is invalid, an HTTP client
/// cannot be built, or the bootstrap super admin cannot be created.
pub fn build_engine(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Startup> {
    let value = |key: &str| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let settings = match value(CONFIG_FILE_VAR) {
        Some(path) => ConfigSettings::from_file(Path::new(&path))?,
        None => ConfigSettings::default(),
    };
    let cfg = Arc::new(CoreConfig::new(settings.apply_env(&lookup)?)?);

    let timeout = match value(UPSTREAM_TIMEOUT_VAR) {
        Some(secs) => Duration::from_secs(secs.parse().map_err(|_| {
            anyhow::anyhow!("{UPSTREAM_TIMEOUT_VAR} must be a whole number of seconds, got '{secs}'")
        })?),
        None => Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
    };

    let text_processor: Arc<dyn TextProcessor> = match value(TEXT_PROCESSOR_URL_VAR) {
        Some(url) => Arc::new(HttpTextProcessor::new(&url, timeout)?),
        None => {
            tracing::warn!("{TEXT_PROCESSOR_URL_VAR} not set; processing will fail");
            Arc::new(UnconfiguredTextProcessor)
        }
    };
    let notifier: Arc<dyn Notifier> = match value(NOTIFIER_URL_VAR) {
        Some(url) => Arc::new(HttpNotifier::new(&url, timeout)?),
        None => {
            tracing::warn!("{NOTIFIER_URL_VAR} not set; notifications are logged only");
            Arc::new(LogNotifier)
        }
    };

    let engine = Arc::new(CareEngine::with_system_clock(cfg, text_processor, notifier));

    let super_admin = match value(BOOTSTRAP_EMAIL_VAR) {
        Some(email) => {
            let name = value(BOOTSTRAP_NAME_VAR).unwrap_or_else(|| "Administrator".into());
            let admin = engine.directory.bootstrap_super_admin(&name, &email)?;
            tracing::info!(user_id = %admin.id, email = %admin.email, "bootstrap super admin created");
            Some(admin)
        }
        None => None,
    };

    Ok(Startup {
        engine,
        super_admin,
    })
}
