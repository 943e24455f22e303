//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into services as an
//! `Arc<CoreConfig>`. Nothing in the core reads process-wide environment variables during request
//! handling: binaries call [`ConfigSettings::apply_env`] with a lookup function at startup.
//!
//! Resolution order:
//! 1. built-in defaults ([`ConfigSettings::default`]),
//! 2. an optional YAML file ([`ConfigSettings::from_file`]),
//! 3. `CAREPLAN_*` environment values,
//! 4. validation in [`CoreConfig::new`].

use crate::constants::{
    DEFAULT_CHECK_IN_OFFSETS_DAYS, DEFAULT_PORTAL_BASE_URL, DEFAULT_REVIEW_EXEMPT_LANGUAGES,
    DEFAULT_TOKEN_FAILURE_LIMIT, DEFAULT_TOKEN_FAILURE_WINDOW_MINUTES,
    DEFAULT_TOKEN_LOCKOUT_MINUTES, DEFAULT_TOKEN_TTL_DAYS, ENV_PREFIX, MAX_CONFIGURED_DAYS,
    MAX_CONFIGURED_MINUTES,
};
use crate::{CarePlanError, CarePlanResult};
use careplan_types::LanguageCode;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Rule deciding when a sent care plan may be marked completed.
///
/// The product trigger for `sent -> completed` is not settled, so it is a deployment choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CompletionPolicy {
    /// Staff complete plans by hand; no automatic sweep.
    #[default]
    Manual,
    /// Allowed once this many calendar days have passed since the plan was sent.
    AfterDays(u32),
    /// Allowed once the patient has answered any check-in.
    AfterFirstResponse,
}

impl fmt::Display for CompletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionPolicy::Manual => f.write_str("manual"),
            CompletionPolicy::AfterDays(days) => write!(f, "after_days:{days}"),
            CompletionPolicy::AfterFirstResponse => f.write_str("after_first_response"),
        }
    }
}

impl FromStr for CompletionPolicy {
    type Err = CarePlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value {
            "manual" => return Ok(CompletionPolicy::Manual),
            "after_first_response" => return Ok(CompletionPolicy::AfterFirstResponse),
            _ => {}
        }

        let days = value
            .strip_prefix("after_days:")
            .and_then(|d| d.trim().parse::<u32>().ok())
            .ok_or_else(|| {
                CarePlanError::Config(format!(
                    "completion policy must be 'manual', 'after_first_response' or 'after_days:<n>', got '{value}'"
                ))
            })?;
        Ok(CompletionPolicy::AfterDays(days))
    }
}

/// Lockout applied to sources that repeatedly present bad access tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenLockoutPolicy {
    pub max_failures: u32,
    pub window: Duration,
    pub lockout: Duration,
}

/// Raw, unvalidated settings as read from YAML or the environment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigSettings {
    pub token_ttl_days: u32,
    pub review_exempt_languages: Vec<String>,
    pub completion_policy: String,
    pub check_in_offsets_days: Vec<u32>,
    pub portal_base_url: String,
    pub token_failure_limit: u32,
    pub token_failure_window_minutes: u32,
    pub token_lockout_minutes: u32,
}

impl Default for ConfigSettings {
    fn default() -> Self {
        Self {
            token_ttl_days: DEFAULT_TOKEN_TTL_DAYS,
            review_exempt_languages: DEFAULT_REVIEW_EXEMPT_LANGUAGES
                .iter()
                .map(|l| l.to_string())
                .collect(),
            completion_policy: CompletionPolicy::Manual.to_string(),
            check_in_offsets_days: DEFAULT_CHECK_IN_OFFSETS_DAYS.to_vec(),
            portal_base_url: DEFAULT_PORTAL_BASE_URL.to_string(),
            token_failure_limit: DEFAULT_TOKEN_FAILURE_LIMIT,
            token_failure_window_minutes: DEFAULT_TOKEN_FAILURE_WINDOW_MINUTES,
            token_lockout_minutes: DEFAULT_TOKEN_LOCKOUT_MINUTES,
        }
    }
}

impl ConfigSettings {
    /// Parse settings from YAML text. Keys not present keep their defaults; unknown keys are
    /// rejected so a typo does not silently fall back to a default.
    pub fn from_yaml(yaml_text: &str) -> CarePlanResult<Self> {
        serde_yaml::from_str(yaml_text).map_err(CarePlanError::ConfigYaml)
    }

    pub fn from_file(path: &Path) -> CarePlanResult<Self> {
        let text = std::fs::read_to_string(path).map_err(CarePlanError::ConfigRead)?;
        Self::from_yaml(&text)
    }

    /// Overlay `CAREPLAN_*` values obtained from `lookup`.
    ///
    /// Empty or whitespace-only values are treated as unset. List values are comma separated.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> CarePlanResult<Self> {
        let get = |key: &str| {
            lookup(&format!("{ENV_PREFIX}{key}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("TOKEN_TTL_DAYS") {
            self.token_ttl_days = parse_number("TOKEN_TTL_DAYS", &v)?;
        }
        if let Some(v) = get("REVIEW_EXEMPT_LANGUAGES") {
            self.review_exempt_languages = split_list(&v);
        }
        if let Some(v) = get("COMPLETION_POLICY") {
            self.completion_policy = v;
        }
        if let Some(v) = get("CHECK_IN_OFFSETS_DAYS") {
            self.check_in_offsets_days = split_list(&v)
                .iter()
                .map(|d| parse_number("CHECK_IN_OFFSETS_DAYS", d))
                .collect::<CarePlanResult<_>>()?;
        }
        if let Some(v) = get("PORTAL_BASE_URL") {
            self.portal_base_url = v;
        }
        if let Some(v) = get("TOKEN_FAILURE_LIMIT") {
            self.token_failure_limit = parse_number("TOKEN_FAILURE_LIMIT", &v)?;
        }
        if let Some(v) = get("TOKEN_FAILURE_WINDOW_MINUTES") {
            self.token_failure_window_minutes = parse_number("TOKEN_FAILURE_WINDOW_MINUTES", &v)?;
        }
        if let Some(v) = get("TOKEN_LOCKOUT_MINUTES") {
            self.token_lockout_minutes = parse_number("TOKEN_LOCKOUT_MINUTES", &v)?;
        }

        Ok(self)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_number(key: &str, value: &str) -> CarePlanResult<u32> {
    value.parse::<u32>().map_err(|_| {
        CarePlanError::Config(format!(
            "{ENV_PREFIX}{key} must be a non-negative integer, got '{value}'"
        ))
    })
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    token_ttl: Duration,
    review_exempt_languages: BTreeSet<LanguageCode>,
    completion_policy: CompletionPolicy,
    check_in_offsets: Vec<Duration>,
    portal_base_url: String,
    token_lockout: TokenLockoutPolicy,
}

impl CoreConfig {
    /// Validate `settings` and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CarePlanError::Config`] if:
    /// - the token lifetime or any lockout threshold is zero,
    /// - a review-exempt language is not a valid language code,
    /// - the completion policy cannot be parsed,
    /// - check-in offsets are not strictly increasing,
    /// - the portal base URL is empty.
    pub fn new(settings: ConfigSettings) -> CarePlanResult<Self> {
        if !(1..=MAX_CONFIGURED_DAYS).contains(&settings.token_ttl_days) {
            return Err(CarePlanError::Config(format!(
                "token_ttl_days must be between 1 and {MAX_CONFIGURED_DAYS}"
            )));
        }
        if settings.token_failure_limit == 0
            || settings.token_failure_window_minutes == 0
            || settings.token_lockout_minutes == 0
        {
            return Err(CarePlanError::Config(
                "token failure limit, window and lockout must all be non-zero".into(),
            ));
        }
        if settings.token_failure_window_minutes > MAX_CONFIGURED_MINUTES
            || settings.token_lockout_minutes > MAX_CONFIGURED_MINUTES
        {
            return Err(CarePlanError::Config(format!(
                "token failure window and lockout cannot exceed {MAX_CONFIGURED_MINUTES} minutes"
            )));
        }

        let review_exempt_languages = settings
            .review_exempt_languages
            .iter()
            .map(|l| {
                LanguageCode::new(l).map_err(|e| CarePlanError::Config(e.to_string()))
            })
            .collect::<CarePlanResult<BTreeSet<_>>>()?;

        let completion_policy = settings.completion_policy.parse::<CompletionPolicy>()?;

        if settings
            .check_in_offsets_days
            .windows(2)
            .any(|pair| pair[0] >= pair[1])
        {
            return Err(CarePlanError::Config(
                "check_in_offsets_days must be strictly increasing".into(),
            ));
        }
        if settings
            .check_in_offsets_days
            .iter()
            .any(|d| *d > MAX_CONFIGURED_DAYS)
        {
            return Err(CarePlanError::Config(format!(
                "check_in_offsets_days cannot exceed {MAX_CONFIGURED_DAYS}"
            )));
        }

        let portal_base_url = settings.portal_base_url.trim().trim_end_matches('/');
        if portal_base_url.is_empty() {
            return Err(CarePlanError::Config(
                "portal_base_url cannot be empty".into(),
            ));
        }

        Ok(Self {
            token_ttl: Duration::days(i64::from(settings.token_ttl_days)),
            review_exempt_languages,
            completion_policy,
            check_in_offsets: settings
                .check_in_offsets_days
                .iter()
                .map(|d| Duration::days(i64::from(*d)))
                .collect(),
            portal_base_url: portal_base_url.to_string(),
            token_lockout: TokenLockoutPolicy {
                max_failures: settings.token_failure_limit,
                window: Duration::minutes(i64::from(settings.token_failure_window_minutes)),
                lockout: Duration::minutes(i64::from(settings.token_lockout_minutes)),
            },
        })
    }

    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    pub fn review_exempt_languages(&self) -> &BTreeSet<LanguageCode> {
        &self.review_exempt_languages
    }

    pub fn completion_policy(&self) -> CompletionPolicy {
        self.completion_policy
    }

    pub fn check_in_offsets(&self) -> &[Duration] {
        &self.check_in_offsets
    }

    pub fn token_lockout(&self) -> TokenLockoutPolicy {
        self.token_lockout
    }

    /// Patient-facing link for an access token.
    pub fn portal_link(&self, token: &str) -> String {
        format!("{}/{}", self.portal_base_url, token)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        // Defaults are constants that satisfy every rule in `new`.
        Self {
            token_ttl: Duration::days(i64::from(DEFAULT_TOKEN_TTL_DAYS)),
            review_exempt_languages: [LanguageCode::english()].into_iter().collect(),
            completion_policy: CompletionPolicy::Manual,
            check_in_offsets: DEFAULT_CHECK_IN_OFFSETS_DAYS
                .iter()
                .map(|d| Duration::days(i64::from(*d)))
                .collect(),
            portal_base_url: DEFAULT_PORTAL_BASE_URL.to_string(),
            token_lockout: TokenLockoutPolicy {
                max_failures: DEFAULT_TOKEN_FAILURE_LIMIT,
                window: Duration::minutes(i64::from(DEFAULT_TOKEN_FAILURE_WINDOW_MINUTES)),
                lockout: Duration::minutes(i64::from(DEFAULT_TOKEN_LOCKOUT_MINUTES)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let cfg = CoreConfig::new(ConfigSettings::default()).expect("defaults are valid");
        assert_eq!(cfg.token_ttl(), Duration::days(30));
        assert_eq!(cfg.completion_policy(), CompletionPolicy::Manual);
        assert!(cfg.review_exempt_languages().contains(&LanguageCode::english()));
        assert_eq!(cfg.check_in_offsets(), &[Duration::days(2)]);
    }

    #[test]
    fn completion_policy_parses_all_forms() {
        assert_eq!("manual".parse::<CompletionPolicy>().unwrap(), CompletionPolicy::Manual);
        assert_eq!(
            "after_days:30".parse::<CompletionPolicy>().unwrap(),
            CompletionPolicy::AfterDays(30)
        );
        assert_eq!(
            "after_first_response".parse::<CompletionPolicy>().unwrap(),
            CompletionPolicy::AfterFirstResponse
        );
        assert!("after_days:soon".parse::<CompletionPolicy>().is_err());
        assert!("whenever".parse::<CompletionPolicy>().is_err());
    }

    #[test]
    fn env_values_override_defaults() {
        let env: HashMap<&str, &str> = [
            ("CAREPLAN_TOKEN_TTL_DAYS", "14"),
            ("CAREPLAN_REVIEW_EXEMPT_LANGUAGES", "en, en-gb"),
            ("CAREPLAN_COMPLETION_POLICY", "after_days:30"),
            ("CAREPLAN_CHECK_IN_OFFSETS_DAYS", "2,5,10"),
            ("CAREPLAN_PORTAL_BASE_URL", "   "),
        ]
        .into_iter()
        .collect();

        let settings = ConfigSettings::default()
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        let cfg = CoreConfig::new(settings).unwrap();

        assert_eq!(cfg.token_ttl(), Duration::days(14));
        assert_eq!(cfg.review_exempt_languages().len(), 2);
        assert_eq!(cfg.completion_policy(), CompletionPolicy::AfterDays(30));
        assert_eq!(cfg.check_in_offsets().len(), 3);
        // Blank values are ignored, so the default portal URL survives.
        assert_eq!(cfg.portal_link("abc"), format!("{DEFAULT_PORTAL_BASE_URL}/abc"));
    }

    #[test]
    fn env_rejects_non_numeric_values() {
        let err = ConfigSettings::default()
            .apply_env(|k| (k == "CAREPLAN_TOKEN_TTL_DAYS").then(|| "thirty".to_string()))
            .unwrap_err();
        assert!(matches!(err, CarePlanError::Config(msg) if msg.contains("TOKEN_TTL_DAYS")));
    }

    #[test]
    fn new_rejects_invalid_settings() {
        let zero_ttl = ConfigSettings {
            token_ttl_days: 0,
            ..ConfigSettings::default()
        };
        assert!(CoreConfig::new(zero_ttl).is_err());

        let unordered = ConfigSettings {
            check_in_offsets_days: vec![5, 2],
            ..ConfigSettings::default()
        };
        assert!(CoreConfig::new(unordered).is_err());

        let endless_ttl = ConfigSettings {
            token_ttl_days: u32::MAX,
            ..ConfigSettings::default()
        };
        assert!(CoreConfig::new(endless_ttl).is_err());

        let distant_check_in = ConfigSettings {
            check_in_offsets_days: vec![2, MAX_CONFIGURED_DAYS + 1],
            ..ConfigSettings::default()
        };
        assert!(CoreConfig::new(distant_check_in).is_err());

        let endless_lockout = ConfigSettings {
            token_lockout_minutes: u32::MAX,
            ..ConfigSettings::default()
        };
        assert!(CoreConfig::new(endless_lockout).is_err());

        let longest = ConfigSettings {
            token_ttl_days: MAX_CONFIGURED_DAYS,
            check_in_offsets_days: vec![MAX_CONFIGURED_DAYS],
            ..ConfigSettings::default()
        };
        assert!(CoreConfig::new(longest).is_ok());

        let bad_language = ConfigSettings {
            review_exempt_languages: vec!["english".into()],
            ..ConfigSettings::default()
        };
        assert!(CoreConfig::new(bad_language).is_err());
    }

    #[test]
    fn yaml_file_overlays_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "completion_policy: after_first_response\nportal_base_url: https://care.example.org/p/"
        )
        .unwrap();

        let settings = ConfigSettings::from_file(file.path()).unwrap();
        assert_eq!(settings.token_ttl_days, DEFAULT_TOKEN_TTL_DAYS);

        let cfg = CoreConfig::new(settings).unwrap();
        assert_eq!(cfg.completion_policy(), CompletionPolicy::AfterFirstResponse);
        assert_eq!(cfg.portal_link("tok"), "https://care.example.org/p/tok");
    }

    #[test]
    fn yaml_rejects_unknown_keys() {
        let err = ConfigSettings::from_yaml("token_ttl: 3\n").unwrap_err();
        assert!(matches!(err, CarePlanError::ConfigYaml(_)));
    }
}
