//! Patient portal read path.
//!
//! The portal is authenticated by the access token alone. What it returns is limited to what the
//! patient needs: back-translations and interpreter notes never leave the staff side.

use careplan_ids::{CarePlanId, CheckInId};
use careplan_types::LanguageCode;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::content::{Appointment, Medication, PlanSections};
use crate::engine::EngineContext;
use crate::CarePlanResult;

/// An unanswered check-in the patient can respond to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PortalCheckIn {
    pub id: CheckInId,
    pub attempt_number: u32,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PortalView {
    pub care_plan_id: CarePlanId,
    pub title: String,
    pub patient_first_name: Option<String>,
    pub language: Option<LanguageCode>,
    pub simplified: Option<PlanSections>,
    pub translated: Option<PlanSections>,
    pub medications: Vec<Medication>,
    pub appointments: Vec<Appointment>,
    pub open_check_ins: Vec<PortalCheckIn>,
    pub access_expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub struct PortalService {
    ctx: EngineContext,
}

impl PortalService {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Render the plan behind `token` for its patient.
    ///
    /// Medications and appointments come from the translated sections when present, falling back
    /// to the simplified ones. `source` feeds the token failure limiter.
    ///
    /// # Errors
    ///
    /// [`crate::CarePlanError::TokenInvalid`] for unknown, expired or replaced tokens, and while
    /// `source` is locked out.
    pub fn view(&self, source: &str, token: &str) -> CarePlanResult<PortalView> {
        let tokens = &self.ctx.tokens;
        tokens.guarded(source, || {
            tokens.with_valid_plan(token, |partition, plan_id| {
                let plan = partition.plan(plan_id)?;
                let patient_first_name = plan
                    .patient_id
                    .and_then(|id| partition.patients.get(&id))
                    .map(|p| p.first_name.to_string());
                let primary = plan
                    .translated_content
                    .as_ref()
                    .or(plan.simplified_content.as_ref());
                let open_check_ins = partition
                    .check_ins_for(plan_id)
                    .into_iter()
                    .filter(|c| c.response.is_none())
                    .map(|c| PortalCheckIn {
                        id: c.id,
                        attempt_number: c.attempt_number,
                        scheduled_for: c.scheduled_for,
                    })
                    .collect();

                tracing::debug!(care_plan_id = %plan_id, "portal view served");
                Ok(PortalView {
                    care_plan_id: plan_id,
                    title: plan.title.clone(),
                    patient_first_name,
                    language: plan.target_language.clone(),
                    simplified: plan.simplified_content.clone(),
                    translated: plan.translated_content.clone(),
                    medications: primary.map(|s| s.medications.clone()).unwrap_or_default(),
                    appointments: primary.map(|s| s.appointments.clone()).unwrap_or_default(),
                    open_check_ins,
                    access_expires_at: plan.access_token_expiry,
                })
            })
        })
    }
}
