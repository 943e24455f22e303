//! External collaborators: text processing and patient notification.
//!
//! The engine only sees the two traits. HTTP implementations use a blocking `reqwest` client; the
//! REST server runs engine calls on the blocking pool, so no async runtime is entered here.

use careplan_ids::{CarePlanId, PatientId};
use careplan_types::{EmailAddress, LanguageCode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::content::ProcessedContent;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("request to {service} failed: {message}")]
    Request {
        service: &'static str,
        message: String,
    },
    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("{service} returned an unreadable response: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },
}

/// Simplifies and translates source text.
pub trait TextProcessor: Send + Sync {
    fn process(
        &self,
        source_content: &str,
        target_language: &LanguageCode,
    ) -> Result<ProcessedContent, UpstreamError>;
}

/// What the notifier needs to reach a patient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PatientNotification {
    pub care_plan_id: CarePlanId,
    pub patient_id: PatientId,
    pub first_name: String,
    pub email: EmailAddress,
    pub phone: Option<String>,
    pub language: LanguageCode,
    pub plan_title: String,
    pub portal_link: String,
    pub token_expires_at: DateTime<Utc>,
}

impl PatientNotification {
    /// The portal link with its access token masked, safe to log.
    pub fn redacted_portal_link(&self) -> String {
        match self.portal_link.rsplit_once('/') {
            Some((base, _token)) => format!("{base}/<redacted>"),
            None => "<redacted>".to_string(),
        }
    }
}

/// Delivers the portal link to a patient.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &PatientNotification) -> Result<(), UpstreamError>;
}

// ============================================================================
// HTTP IMPLEMENTATIONS
// ============================================================================

const TEXT_PROCESSOR: &str = "text processor";
const NOTIFIER: &str = "notifier";

fn http_client(service: &'static str, timeout: Duration) -> Result<reqwest::blocking::Client, UpstreamError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| UpstreamError::Request {
            service,
            message: e.to_string(),
        })
}

fn request_error(service: &'static str, timeout: Duration, e: reqwest::Error) -> UpstreamError {
    let message = if e.is_timeout() {
        format!("timed out after {}s", timeout.as_secs())
    } else if e.is_connect() {
        "connection refused".to_string()
    } else {
        e.to_string()
    };
    UpstreamError::Request { service, message }
}

#[derive(Serialize)]
struct ProcessRequest<'a> {
    source_content: &'a str,
    target_language: &'a str,
}

/// Posts `{source_content, target_language}` to a processing service that answers with
/// [`ProcessedContent`] JSON.
#[derive(Debug)]
pub struct HttpTextProcessor {
    url: String,
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl HttpTextProcessor {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client: http_client(TEXT_PROCESSOR, timeout)?,
            timeout,
        })
    }
}

impl TextProcessor for HttpTextProcessor {
    fn process(
        &self,
        source_content: &str,
        target_language: &LanguageCode,
    ) -> Result<ProcessedContent, UpstreamError> {
        let body = ProcessRequest {
            source_content,
            target_language: target_language.as_str(),
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(|e| request_error(TEXT_PROCESSOR, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                service: TEXT_PROCESSOR,
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        response
            .json::<ProcessedContent>()
            .map_err(|e| UpstreamError::InvalidResponse {
                service: TEXT_PROCESSOR,
                message: e.to_string(),
            })
    }
}

/// Posts each [`PatientNotification`] as JSON to a delivery webhook.
#[derive(Debug)]
pub struct HttpNotifier {
    url: String,
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl HttpNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client: http_client(NOTIFIER, timeout)?,
            timeout,
        })
    }
}

impl Notifier for HttpNotifier {
    fn notify(&self, notification: &PatientNotification) -> Result<(), UpstreamError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .map_err(|e| request_error(NOTIFIER, self.timeout, e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(UpstreamError::Status {
                service: NOTIFIER,
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            })
        }
    }
}

// ============================================================================
// LOCAL IMPLEMENTATIONS
// ============================================================================

/// Stand-in used when no processing service URL is configured. Every call fails, leaving plans
/// in `draft`.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredTextProcessor;

impl TextProcessor for UnconfiguredTextProcessor {
    fn process(&self, _: &str, _: &LanguageCode) -> Result<ProcessedContent, UpstreamError> {
        Err(UpstreamError::NotConfigured(TEXT_PROCESSOR))
    }
}

/// Records dispatches in the log instead of delivering them.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &PatientNotification) -> Result<(), UpstreamError> {
        tracing::info!(
            care_plan_id = %notification.care_plan_id,
            patient_id = %notification.patient_id,
            language = %notification.language,
            sms = notification.phone.is_some(),
            token_expires_at = %notification.token_expires_at,
            "patient notification (log only): {}",
            notification.redacted_portal_link()
        );
        Ok(())
    }
}
