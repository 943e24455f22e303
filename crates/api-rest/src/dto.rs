//! Request bodies of the REST surface.
//!
//! These mirror the engine's input types so they can carry OpenAPI schemas; each converts into the
//! engine type before the call.

use careplan_core::check_in::CheckInResponse;
use careplan_core::content::EditedContent;
use careplan_core::patient::PatientDetails;
use careplan_core::repositories::care_plans::{InterpreterApproval, NewCarePlan};
use careplan_core::repositories::check_ins::NewCheckIn;
use careplan_core::repositories::directory::{NewTenant, NewUser};
use careplan_core::review_policy::ApprovalRequest;
use careplan_core::tenant::{InterpreterReviewMode, Role};
use careplan_core::CarePlanResult;
use careplan_ids::{PatientId, TenantId};
use careplan_types::{EmailAddress, LanguageCode, NonEmptyText};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTenantReq {
    pub name: String,
    #[serde(default)]
    pub is_demo: bool,
    #[serde(default)]
    #[schema(value_type = String, example = "optional")]
    pub interpreter_review_mode: InterpreterReviewMode,
}

impl From<CreateTenantReq> for NewTenant {
    fn from(req: CreateTenantReq) -> Self {
        NewTenant {
            name: req.name,
            is_demo: req.is_demo,
            interpreter_review_mode: req.interpreter_review_mode,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReviewModeReq {
    #[schema(value_type = String, example = "required")]
    pub mode: InterpreterReviewMode,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUserReq {
    pub name: String,
    pub email: String,
    #[schema(value_type = String, example = "clinician")]
    pub role: Role,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub tenant_id: Option<TenantId>,
    #[serde(default)]
    pub languages: Vec<String>,
}

impl From<CreateUserReq> for NewUser {
    fn from(req: CreateUserReq) -> Self {
        NewUser {
            name: req.name,
            email: req.email,
            role: req.role,
            tenant_id: req.tenant_id,
            languages: req.languages,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCarePlanReq {
    pub title: String,
    pub source_content: String,
}

impl From<CreateCarePlanReq> for NewCarePlan {
    fn from(req: CreateCarePlanReq) -> Self {
        NewCarePlan {
            title: req.title,
            source_content: req.source_content,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProcessReq {
    #[schema(example = "es")]
    pub target_language: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ApproveReq {
    #[serde(default)]
    pub skip_interpreter_review: Option<bool>,
    #[serde(default)]
    pub override_justification: Option<String>,
}

impl From<ApproveReq> for ApprovalRequest {
    fn from(req: ApproveReq) -> Self {
        ApprovalRequest {
            skip_interpreter_review: req.skip_interpreter_review,
            override_justification: req.override_justification,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InterpreterApproveReq {
    /// Corrected `simplified` and `translated` sections.
    #[schema(value_type = Object)]
    pub edited: EditedContent,
    #[serde(default)]
    pub notes: Option<String>,
}

impl From<InterpreterApproveReq> for InterpreterApproval {
    fn from(req: InterpreterApproveReq) -> Self {
        InterpreterApproval {
            edited: req.edited,
            notes: req.notes,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RequestChangesReq {
    pub notes: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendReq {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub preferred_language: Option<String>,
}

impl SendReq {
    /// Validate into engine patient details.
    pub fn into_details(self) -> CarePlanResult<PatientDetails> {
        Ok(PatientDetails {
            first_name: NonEmptyText::new(&self.first_name)?,
            last_name: NonEmptyText::new(&self.last_name)?,
            email: EmailAddress::parse(&self.email)?,
            phone: self
                .phone
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            preferred_language: self
                .preferred_language
                .filter(|l| !l.trim().is_empty())
                .map(LanguageCode::new)
                .transpose()?,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ScheduleCheckInReq {
    #[schema(value_type = String)]
    pub patient_id: PatientId,
    pub attempt_number: u32,
    #[schema(value_type = String, format = DateTime)]
    pub scheduled_for: DateTime<Utc>,
}

impl From<ScheduleCheckInReq> for NewCheckIn {
    fn from(req: ScheduleCheckInReq) -> Self {
        NewCheckIn {
            patient_id: req.patient_id,
            attempt_number: req.attempt_number,
            scheduled_for: req.scheduled_for,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckInAnswerReq {
    #[schema(value_type = String, example = "green")]
    pub response: CheckInResponse,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListCarePlansQuery {
    /// Only plans in this status.
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DueCheckInsQuery {
    /// Cut-off instant (RFC 3339); defaults to now.
    #[param(value_type = Option<String>)]
    pub before: Option<DateTime<Utc>>,
}
