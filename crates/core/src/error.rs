use careplan_ids::{CheckInId, IdError};
use careplan_types::TextError;

use crate::collaborators::UpstreamError;
use crate::status::InvalidTransition;

#[derive(Debug, thiserror::Error)]
pub enum CarePlanError {
    /// Wrong source state, or the review policy does not allow the requested route.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    /// Role, tenant or interpreter language mismatch.
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("validation error: {0}")]
    Validation(String),
    /// Expired and unknown tokens deliberately share this variant.
    #[error("access token is invalid or expired")]
    TokenInvalid,
    #[error("check-in {0} already has a response")]
    AlreadyResponded(CheckInId),
    #[error("{0} not found")]
    NotFound(String),
    #[error("upstream failure: {0}")]
    UpstreamFailure(#[from] UpstreamError),

    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to read configuration file: {0}")]
    ConfigRead(std::io::Error),
    #[error("failed to parse configuration YAML: {0}")]
    ConfigYaml(serde_yaml::Error),
    #[error("failed to serialize audit details: {0}")]
    AuditSerialization(serde_json::Error),
    #[error("storage lock poisoned")]
    LockPoisoned,
}

impl From<InvalidTransition> for CarePlanError {
    fn from(err: InvalidTransition) -> Self {
        CarePlanError::InvalidTransition(err.to_string())
    }
}

impl From<TextError> for CarePlanError {
    fn from(err: TextError) -> Self {
        CarePlanError::Validation(err.to_string())
    }
}

impl From<IdError> for CarePlanError {
    fn from(err: IdError) -> Self {
        CarePlanError::Validation(err.to_string())
    }
}

pub type CarePlanResult<T> = std::result::Result<T, CarePlanError>;
