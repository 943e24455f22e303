//! The care plan aggregate.

use careplan_ids::{CarePlanId, PatientId, TenantId, UserId};
use careplan_types::LanguageCode;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::content::{PlanSections, ProcessedContent};
use crate::status::CarePlanStatus;

/// A discharge document moving through the workflow.
///
/// Fields are public for reading; every mutation goes through the services in
/// [`crate::repositories`], which commit the new state together with its audit entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CarePlan {
    pub id: CarePlanId,
    pub tenant_id: TenantId,
    pub clinician_id: UserId,
    pub patient_id: Option<PatientId>,
    pub status: CarePlanStatus,
    pub title: String,
    pub source_content: String,
    pub target_language: Option<LanguageCode>,
    pub simplified_content: Option<PlanSections>,
    pub translated_content: Option<PlanSections>,
    pub back_translated_content: Option<PlanSections>,
    pub interpreter_reviewed_by: Option<UserId>,
    pub interpreter_reviewed_at: Option<DateTime<Utc>>,
    pub interpreter_notes: Option<String>,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub access_token: Option<String>,
    pub access_token_expiry: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every commit; used to detect concurrent changes around slow collaborator calls.
    pub version: u64,
}

impl CarePlan {
    pub(crate) fn new_draft(
        tenant_id: TenantId,
        clinician_id: UserId,
        title: String,
        source_content: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CarePlanId::new(),
            tenant_id,
            clinician_id,
            patient_id: None,
            status: CarePlanStatus::Draft,
            title,
            source_content,
            target_language: None,
            simplified_content: None,
            translated_content: None,
            back_translated_content: None,
            interpreter_reviewed_by: None,
            interpreter_reviewed_at: None,
            interpreter_notes: None,
            approved_by: None,
            approved_at: None,
            access_token: None,
            access_token_expiry: None,
            sent_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub(crate) fn apply_processed(&mut self, language: LanguageCode, content: ProcessedContent) {
        self.target_language = Some(language);
        self.simplified_content = Some(content.simplified);
        self.translated_content = Some(content.translated);
        self.back_translated_content = Some(content.back_translation);
    }

    /// An interpreter sent the plan back: it is in `pending_review` carrying their notes.
    pub fn changes_requested(&self) -> bool {
        self.status == CarePlanStatus::PendingReview
            && self
                .interpreter_notes
                .as_deref()
                .is_some_and(|n| !n.trim().is_empty())
    }

    /// True if `token` is this plan's current, unexpired access token.
    pub fn accepts_token(&self, token: &str, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.access_token_expiry) {
            (Some(current), Some(expiry)) => current == token && now < expiry,
            _ => false,
        }
    }
}
