//! Care plan workflow service.
//!
//! Each operation is one unit of work on the owning tenant's partition: lock, load, authorize,
//! apply [`CarePlanStatus::transition`], commit the plan together with exactly one audit entry.
//! Collaborators are never called while the partition lock is held. `process` re-checks the plan
//! version after the text processor returns; `send` and `resend` notify after the commit and
//! record a `notification_failed` entry if delivery fails.

use careplan_ids::{CarePlanId, CheckInId, PatientId, TenantId};
use careplan_types::{LanguageCode, NonEmptyText};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::access_token::IssuedToken;
use crate::audit::{self, AuditAction, AuditEvent, AuditLogEntry};
use crate::billing::calendar_days_between;
use crate::care_plan::CarePlan;
use crate::check_in::CheckIn;
use crate::collaborators::{Notifier, PatientNotification, TextProcessor};
use crate::config::CompletionPolicy;
use crate::content::EditedContent;
use crate::engine::EngineContext;
use crate::patient::{self, Patient, PatientDetails};
use crate::review_policy::{ApprovalRequest, ReviewPolicy, ReviewRoute};
use crate::scope::{Action, Actor, TenantFilter, TenantScope};
use crate::status::{CarePlanStatus, Transition};
use crate::store::{lock, PartitionHandle, TenantPartition};
use crate::{CarePlanError, CarePlanResult};

#[derive(Clone, Debug, Deserialize)]
pub struct NewCarePlan {
    pub title: String,
    pub source_content: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InterpreterApproval {
    pub edited: EditedContent,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Result of `send` or `resend`.
///
/// `sent` is true whenever the plan reached `sent`; delivery is reported separately because a
/// failed notification does not undo the transition.
#[derive(Clone, Debug, Serialize)]
pub struct SendOutcome {
    pub care_plan: CarePlan,
    pub patient: Patient,
    pub patient_created: bool,
    pub portal_link: String,
    pub token_expires_at: DateTime<Utc>,
    pub sent: bool,
    pub notified: bool,
    pub notification_error: Option<String>,
}

#[derive(Serialize)]
struct ApprovedDetails<'a> {
    approver: &'a str,
    from: CarePlanStatus,
    route: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    justification: Option<&'a str>,
}

#[derive(Serialize)]
struct SentDetails<'a> {
    patient_id: PatientId,
    patient_created: bool,
    language: &'a LanguageCode,
    token_expires_at: DateTime<Utc>,
    check_ins_scheduled: usize,
}

/// Why `policy` does not yet allow `plan` to complete, or `None` if it does.
fn completion_blocker(
    policy: CompletionPolicy,
    partition: &TenantPartition,
    plan: &CarePlan,
    now: DateTime<Utc>,
) -> Option<String> {
    match policy {
        CompletionPolicy::Manual => None,
        CompletionPolicy::AfterDays(days) => {
            match audit::sent_at(partition.audit.entries(), plan.id).or(plan.sent_at) {
                Some(sent_at) if calendar_days_between(sent_at, now) >= i64::from(days) => None,
                _ => Some(format!(
                    "completion policy requires {days} days since the care plan was sent"
                )),
            }
        }
        CompletionPolicy::AfterFirstResponse => {
            let responded = partition
                .check_ins
                .values()
                .any(|c| c.care_plan_id == plan.id && c.response.is_some());
            (!responded).then(|| {
                "completion policy requires a patient check-in response".to_string()
            })
        }
    }
}

pub struct CarePlanService {
    ctx: EngineContext,
    text_processor: Arc<dyn TextProcessor>,
    notifier: Arc<dyn Notifier>,
    review_policy: ReviewPolicy,
}

impl CarePlanService {
    pub fn new(
        ctx: EngineContext,
        text_processor: Arc<dyn TextProcessor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let review_policy = ReviewPolicy::new(ctx.cfg.review_exempt_languages().clone());
        Self {
            ctx,
            text_processor,
            notifier,
            review_policy,
        }
    }

    // ========================================================================
    // TRANSITIONS
    // ========================================================================

    /// Create a plan in `draft` for the calling clinician's tenant.
    pub fn create_draft(&self, actor: &Actor, new: NewCarePlan) -> CarePlanResult<CarePlan> {
        let tenant_id = match TenantScope::tenant_filter(actor, Action::CreateDraft)? {
            TenantFilter::Only(tenant_id) => tenant_id,
            TenantFilter::All => {
                return Err(CarePlanError::Forbidden(
                    "care plans are created inside a tenant".into(),
                ))
            }
        };
        let title = NonEmptyText::new(&new.title)
            .map_err(|_| CarePlanError::Validation("title cannot be empty".into()))?;
        if new.source_content.trim().is_empty() {
            return Err(CarePlanError::Validation(
                "source content cannot be empty".into(),
            ));
        }

        let handle =
            TenantScope::tenant_partition(&self.ctx.store, actor, Action::CreateDraft, tenant_id)?;
        let mut partition = lock(&handle)?;
        let now = self.ctx.clock.now();
        let plan = CarePlan::new_draft(
            tenant_id,
            actor.user_id,
            title.into_inner(),
            new.source_content,
            now,
        );
        let event = AuditEvent::new(
            AuditAction::CarePlanCreated,
            Some(plan.id),
            Some(actor.user_id),
            json!({ "title": plan.title }),
        )?;
        self.ctx.store.index_plan(plan.id, tenant_id)?;
        let plan = partition.commit_plan(plan, event, now);
        tracing::info!(care_plan_id = %plan.id, tenant_id = %tenant_id, "care plan created");
        Ok(plan)
    }

    /// Simplify and translate a draft, moving it to `pending_review`.
    ///
    /// # Errors
    ///
    /// - [`CarePlanError::UpstreamFailure`] if the text processor fails; the plan stays in
    ///   `draft` and nothing is written.
    /// - [`CarePlanError::InvalidTransition`] if the plan is not a draft, or changed while the
    ///   text processor was running.
    pub fn process(
        &self,
        actor: &Actor,
        plan_id: CarePlanId,
        target_language: &LanguageCode,
    ) -> CarePlanResult<CarePlan> {
        let handle = TenantScope::plan_partition(&self.ctx.store, actor, Action::Process, plan_id)?;
        let (version, source_content) = {
            let partition = lock(&handle)?;
            let plan = partition.plan(plan_id)?;
            TenantScope::authorize_plan(actor, Action::Process, plan)?;
            plan.status.transition(Transition::Process)?;
            (plan.version, plan.source_content.clone())
        };

        let content = self
            .text_processor
            .process(&source_content, target_language)
            .map_err(|err| {
                tracing::warn!(care_plan_id = %plan_id, error = %err, "text processing failed, plan left in draft");
                err
            })?;

        let mut partition = lock(&handle)?;
        let mut plan = partition.plan(plan_id)?.clone();
        if plan.version != version {
            return Err(CarePlanError::InvalidTransition(format!(
                "care plan {plan_id} changed while it was being processed"
            )));
        }
        plan.status = plan.status.transition(Transition::Process)?;
        plan.apply_processed(target_language.clone(), content);

        let event = AuditEvent::new(
            AuditAction::CarePlanProcessed,
            Some(plan_id),
            Some(actor.user_id),
            json!({ "target_language": target_language }),
        )?;
        let plan = partition.commit_plan(plan, event, self.ctx.clock.now());
        tracing::info!(care_plan_id = %plan_id, language = %target_language, "care plan processed");
        Ok(plan)
    }

    /// Clinician approval.
    ///
    /// From `interpreter_approved` this is the final approval. From `pending_review` the tenant's
    /// interpreter review mode and the request decide between `approved` and
    /// `interpreter_review` (see [`ReviewPolicy`]).
    pub fn approve(
        &self,
        actor: &Actor,
        plan_id: CarePlanId,
        request: &ApprovalRequest,
    ) -> CarePlanResult<CarePlan> {
        let handle = TenantScope::plan_partition(&self.ctx.store, actor, Action::Approve, plan_id)?;
        let mut partition = lock(&handle)?;
        let mut plan = partition.plan(plan_id)?.clone();
        TenantScope::authorize_plan(actor, Action::Approve, &plan)?;

        let from = plan.status;
        let now = self.ctx.clock.now();
        let event = if from == CarePlanStatus::PendingReview {
            let language = plan.target_language.clone().ok_or_else(|| {
                CarePlanError::Validation("care plan has no target language".into())
            })?;
            let decision = self.review_policy.route(
                partition.tenant.interpreter_review_mode,
                &language,
                request,
            )?;
            match decision.route {
                ReviewRoute::Approve => {
                    plan.status = from.transition(Transition::Approve)?;
                    plan.approved_by = Some(actor.user_id);
                    plan.approved_at = Some(now);
                    AuditEvent::new(
                        AuditAction::CarePlanApproved,
                        Some(plan_id),
                        Some(actor.user_id),
                        ApprovedDetails {
                            approver: &actor.name,
                            from,
                            route: decision.reason,
                            justification: decision.justification.as_deref(),
                        },
                    )?
                }
                ReviewRoute::InterpreterReview => {
                    plan.status = from.transition(Transition::RouteToInterpreter)?;
                    AuditEvent::new(
                        AuditAction::CarePlanSentToInterpreter,
                        Some(plan_id),
                        Some(actor.user_id),
                        json!({ "target_language": language, "reason": decision.reason }),
                    )?
                }
            }
        } else {
            plan.status = from.transition(Transition::Approve)?;
            plan.approved_by = Some(actor.user_id);
            plan.approved_at = Some(now);
            AuditEvent::new(
                AuditAction::CarePlanApproved,
                Some(plan_id),
                Some(actor.user_id),
                ApprovedDetails {
                    approver: &actor.name,
                    from,
                    route: "interpreter approved",
                    justification: None,
                },
            )?
        };

        let plan = partition.commit_plan(plan, event, now);
        tracing::info!(care_plan_id = %plan_id, from = %from, to = %plan.status, "care plan approval recorded");
        Ok(plan)
    }

    /// Interpreter sign-off with corrected content.
    pub fn interpreter_approve(
        &self,
        actor: &Actor,
        plan_id: CarePlanId,
        approval: InterpreterApproval,
    ) -> CarePlanResult<CarePlan> {
        let handle = TenantScope::plan_partition(
            &self.ctx.store,
            actor,
            Action::InterpreterReview,
            plan_id,
        )?;
        let mut partition = lock(&handle)?;
        let mut plan = partition.plan(plan_id)?.clone();
        TenantScope::authorize_plan(actor, Action::InterpreterReview, &plan)?;
        plan.status = plan.status.transition(Transition::InterpreterApprove)?;
        if approval.edited.translated.is_empty() {
            return Err(CarePlanError::Validation(
                "translated content cannot be empty".into(),
            ));
        }

        let now = self.ctx.clock.now();
        let notes = approval
            .notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        plan.simplified_content = Some(approval.edited.simplified);
        plan.translated_content = Some(approval.edited.translated);
        plan.interpreter_reviewed_by = Some(actor.user_id);
        plan.interpreter_reviewed_at = Some(now);
        plan.interpreter_notes = notes.clone();

        let event = AuditEvent::new(
            AuditAction::InterpreterApproved,
            Some(plan_id),
            Some(actor.user_id),
            json!({
                "reviewer": actor.name,
                "target_language": plan.target_language,
                "notes": notes,
            }),
        )?;
        let plan = partition.commit_plan(plan, event, now);
        tracing::info!(care_plan_id = %plan_id, "interpreter approved care plan");
        Ok(plan)
    }

    /// Interpreter sends the plan back to the clinician with a reason.
    pub fn interpreter_request_changes(
        &self,
        actor: &Actor,
        plan_id: CarePlanId,
        reason: &str,
    ) -> CarePlanResult<CarePlan> {
        let handle = TenantScope::plan_partition(
            &self.ctx.store,
            actor,
            Action::InterpreterReview,
            plan_id,
        )?;
        let mut partition = lock(&handle)?;
        let mut plan = partition.plan(plan_id)?.clone();
        TenantScope::authorize_plan(actor, Action::InterpreterReview, &plan)?;
        plan.status = plan.status.transition(Transition::RequestChanges)?;
        let reason = NonEmptyText::new(reason).map_err(|_| {
            CarePlanError::Validation("a reason is required when requesting changes".into())
        })?;

        let now = self.ctx.clock.now();
        plan.interpreter_reviewed_by = Some(actor.user_id);
        plan.interpreter_reviewed_at = Some(now);
        plan.interpreter_notes = Some(reason.to_string());

        let event = AuditEvent::new(
            AuditAction::InterpreterRequestedChanges,
            Some(plan_id),
            Some(actor.user_id),
            json!({ "reviewer": actor.name, "reason": reason }),
        )?;
        let plan = partition.commit_plan(plan, event, now);
        tracing::info!(care_plan_id = %plan_id, "interpreter requested changes");
        Ok(plan)
    }

    /// Deliver an approved plan to a patient.
    ///
    /// Patient match-or-create, token issue, the move to `sent` and the initial check-ins are
    /// committed together. The notifier runs afterwards; its failure is reported in the outcome
    /// and audited but never rolls the plan back.
    pub fn send(
        &self,
        actor: &Actor,
        plan_id: CarePlanId,
        details: PatientDetails,
    ) -> CarePlanResult<SendOutcome> {
        let handle = TenantScope::plan_partition(&self.ctx.store, actor, Action::Send, plan_id)?;
        let (plan, patient, patient_created, issued) = {
            let mut partition = lock(&handle)?;
            let mut plan = partition.plan(plan_id)?.clone();
            TenantScope::authorize_plan(actor, Action::Send, &plan)?;
            plan.status = plan.status.transition(Transition::Send)?;

            let now = self.ctx.clock.now();
            let tenant_id = partition.tenant.id;
            let language = plan
                .target_language
                .clone()
                .unwrap_or_else(LanguageCode::english);
            let (patient, patient_created) =
                patient::match_or_create(&partition.patients, tenant_id, details, &language, now);

            let issued = self.ctx.tokens.mint(now);
            let previous_token = issued.bind(&mut plan);
            plan.patient_id = Some(patient.id);
            plan.sent_at = Some(now);

            let check_ins = self.initial_check_ins(tenant_id, plan_id, patient.id, now);
            let event = AuditEvent::new(
                AuditAction::CarePlanSent,
                Some(plan_id),
                Some(actor.user_id),
                SentDetails {
                    patient_id: patient.id,
                    patient_created,
                    language: &language,
                    token_expires_at: issued.expires_at,
                    check_ins_scheduled: check_ins.len(),
                },
            )?;
            let check_in_ids: Vec<CheckInId> = check_ins.iter().map(|c| c.id).collect();

            self.ctx.store.index_delivery(
                plan_id,
                tenant_id,
                previous_token.as_deref(),
                &issued.token,
                &check_in_ids,
            )?;
            partition.patients.insert(patient.id, patient.clone());
            for check_in in check_ins {
                partition.check_ins.insert(check_in.id, check_in);
            }
            let plan = partition.commit_plan(plan, event, now);
            tracing::info!(care_plan_id = %plan_id, patient_id = %patient.id, "care plan sent");
            (plan, patient, patient_created, issued)
        };

        self.dispatch(&handle, actor, plan, patient, patient_created, issued)
    }

    /// Issue a fresh access link for a sent plan and notify the patient again.
    ///
    /// The previous token stops working immediately.
    pub fn resend(&self, actor: &Actor, plan_id: CarePlanId) -> CarePlanResult<SendOutcome> {
        let handle = TenantScope::plan_partition(&self.ctx.store, actor, Action::Send, plan_id)?;
        let (plan, patient, issued) = {
            let mut partition = lock(&handle)?;
            let mut plan = partition.plan(plan_id)?.clone();
            TenantScope::authorize_plan(actor, Action::Send, &plan)?;
            if plan.status != CarePlanStatus::Sent {
                return Err(CarePlanError::InvalidTransition(format!(
                    "cannot resend a care plan in status '{}'",
                    plan.status
                )));
            }
            let patient = plan
                .patient_id
                .and_then(|id| partition.patients.get(&id).cloned())
                .ok_or_else(|| CarePlanError::NotFound(format!("patient of care plan {plan_id}")))?;

            let now = self.ctx.clock.now();
            let issued = self.ctx.tokens.mint(now);
            let previous_token = issued.bind(&mut plan);
            let event = AuditEvent::new(
                AuditAction::AccessLinkReissued,
                Some(plan_id),
                Some(actor.user_id),
                json!({ "token_expires_at": issued.expires_at }),
            )?;
            self.ctx.store.index_delivery(
                plan_id,
                partition.tenant.id,
                previous_token.as_deref(),
                &issued.token,
                &[],
            )?;
            let plan = partition.commit_plan(plan, event, now);
            tracing::info!(care_plan_id = %plan_id, "access link reissued");
            (plan, patient, issued)
        };

        self.dispatch(&handle, actor, plan, patient, false, issued)
    }

    /// Move a sent plan to `completed` if the completion policy allows it.
    pub fn mark_completed(&self, actor: &Actor, plan_id: CarePlanId) -> CarePlanResult<CarePlan> {
        let handle =
            TenantScope::plan_partition(&self.ctx.store, actor, Action::MarkCompleted, plan_id)?;
        let mut partition = lock(&handle)?;
        let mut plan = partition.plan(plan_id)?.clone();
        TenantScope::authorize_plan(actor, Action::MarkCompleted, &plan)?;
        let next = plan.status.transition(Transition::Complete)?;

        let now = self.ctx.clock.now();
        let policy = self.ctx.cfg.completion_policy();
        if let Some(reason) = completion_blocker(policy, &partition, &plan, now) {
            return Err(CarePlanError::InvalidTransition(reason));
        }

        plan.status = next;
        plan.completed_at = Some(now);
        let event = AuditEvent::new(
            AuditAction::CarePlanCompleted,
            Some(plan_id),
            Some(actor.user_id),
            json!({ "policy": policy.to_string(), "automatic": false }),
        )?;
        let plan = partition.commit_plan(plan, event, now);
        tracing::info!(care_plan_id = %plan_id, "care plan completed");
        Ok(plan)
    }

    /// Complete every sent plan the completion policy allows. Does nothing under `manual`.
    ///
    /// Admins sweep their own tenant; super admins sweep all tenants.
    pub fn complete_due(&self, actor: &Actor) -> CarePlanResult<Vec<CarePlanId>> {
        let partitions =
            TenantScope::visible_partitions(&self.ctx.store, actor, Action::ManageTenant)?;
        let policy = self.ctx.cfg.completion_policy();
        if policy == CompletionPolicy::Manual {
            return Ok(Vec::new());
        }

        let now = self.ctx.clock.now();
        let mut completed = Vec::new();
        for handle in partitions {
            let mut partition = lock(&handle)?;
            let mut due: Vec<CarePlan> = partition
                .plans
                .values()
                .filter(|p| {
                    p.status == CarePlanStatus::Sent
                        && completion_blocker(policy, &partition, p, now).is_none()
                })
                .cloned()
                .collect();
            due.sort_by_key(|p| p.created_at);

            for mut plan in due {
                plan.status = plan.status.transition(Transition::Complete)?;
                plan.completed_at = Some(now);
                let event = AuditEvent::new(
                    AuditAction::CarePlanCompleted,
                    Some(plan.id),
                    Some(actor.user_id),
                    json!({ "policy": policy.to_string(), "automatic": true }),
                )?;
                let plan = partition.commit_plan(plan, event, now);
                completed.push(plan.id);
            }
        }
        if !completed.is_empty() {
            tracing::info!(count = completed.len(), policy = %policy, "completed due care plans");
        }
        Ok(completed)
    }

    /// Remove a plan the patient has never seen.
    ///
    /// # Errors
    ///
    /// [`CarePlanError::InvalidTransition`] for `sent` and `completed` plans.
    pub fn delete(&self, actor: &Actor, plan_id: CarePlanId) -> CarePlanResult<()> {
        let handle = TenantScope::plan_partition(&self.ctx.store, actor, Action::Delete, plan_id)?;
        let mut partition = lock(&handle)?;
        let plan = partition.plan(plan_id)?.clone();
        TenantScope::authorize_plan(actor, Action::Delete, &plan)?;
        plan.status.check_deletable()?;

        let event = AuditEvent::new(
            AuditAction::CarePlanDeleted,
            Some(plan_id),
            Some(actor.user_id),
            json!({ "title": plan.title, "status": plan.status }),
        )?;
        self.ctx
            .store
            .unindex_plan(plan_id, plan.access_token.as_deref())?;
        partition.plans.remove(&plan_id);
        partition.append_audit(event, self.ctx.clock.now());
        tracing::info!(care_plan_id = %plan_id, status = %plan.status, "care plan deleted");
        Ok(())
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn get(&self, actor: &Actor, plan_id: CarePlanId) -> CarePlanResult<CarePlan> {
        let handle = TenantScope::plan_partition(&self.ctx.store, actor, Action::ViewPlan, plan_id)?;
        let partition = lock(&handle)?;
        let plan = partition.plan(plan_id)?;
        TenantScope::authorize_plan(actor, Action::ViewPlan, plan)?;
        Ok(plan.clone())
    }

    /// Plans the actor may see, oldest first, optionally filtered by status.
    pub fn list(
        &self,
        actor: &Actor,
        status: Option<CarePlanStatus>,
    ) -> CarePlanResult<Vec<CarePlan>> {
        let mut plans = Vec::new();
        for handle in TenantScope::visible_partitions(&self.ctx.store, actor, Action::ViewPlan)? {
            let partition = lock(&handle)?;
            plans.extend(
                partition
                    .plans
                    .values()
                    .filter(|p| status.map_or(true, |s| p.status == s))
                    .filter(|p| TenantScope::can_view(actor, p))
                    .cloned(),
            );
        }
        plans.sort_by_key(|p| p.created_at);
        Ok(plans)
    }

    /// The plan's audit entries in commit order.
    pub fn audit_trail(
        &self,
        actor: &Actor,
        plan_id: CarePlanId,
    ) -> CarePlanResult<Vec<AuditLogEntry>> {
        let handle = TenantScope::plan_partition(&self.ctx.store, actor, Action::ViewPlan, plan_id)?;
        let partition = lock(&handle)?;
        TenantScope::authorize_plan(actor, Action::ViewPlan, partition.plan(plan_id)?)?;
        Ok(partition.plan_audit(plan_id))
    }

    /// A tenant's whole log, including tenant-level events and deleted plans.
    pub fn tenant_audit(
        &self,
        actor: &Actor,
        tenant_id: TenantId,
    ) -> CarePlanResult<Vec<AuditLogEntry>> {
        let handle =
            TenantScope::tenant_partition(&self.ctx.store, actor, Action::ManageTenant, tenant_id)?;
        let partition = lock(&handle)?;
        Ok(partition.audit.entries().to_vec())
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn initial_check_ins(
        &self,
        tenant_id: TenantId,
        plan_id: CarePlanId,
        patient_id: PatientId,
        sent_at: DateTime<Utc>,
    ) -> Vec<CheckIn> {
        self.ctx
            .cfg
            .check_in_offsets()
            .iter()
            .zip(1u32..)
            .map(|(offset, attempt)| {
                CheckIn::scheduled(tenant_id, plan_id, patient_id, attempt, sent_at + *offset)
            })
            .collect()
    }

    fn dispatch(
        &self,
        handle: &PartitionHandle,
        actor: &Actor,
        plan: CarePlan,
        patient: Patient,
        patient_created: bool,
        issued: IssuedToken,
    ) -> CarePlanResult<SendOutcome> {
        let portal_link = self.ctx.cfg.portal_link(&issued.token);
        let notification = PatientNotification {
            care_plan_id: plan.id,
            patient_id: patient.id,
            first_name: patient.first_name.to_string(),
            email: patient.email.clone(),
            phone: patient.phone.clone(),
            language: patient.preferred_language.clone(),
            plan_title: plan.title.clone(),
            portal_link: portal_link.clone(),
            token_expires_at: issued.expires_at,
        };

        let notification_error = match self.notifier.notify(&notification) {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(care_plan_id = %plan.id, error = %err, "patient notification failed");
                let event = AuditEvent::new(
                    AuditAction::NotificationFailed,
                    Some(plan.id),
                    Some(actor.user_id),
                    json!({ "error": err.to_string() }),
                )?;
                lock(handle)?.append_audit(event, self.ctx.clock.now());
                Some(err.to_string())
            }
        };

        Ok(SendOutcome {
            care_plan: plan,
            patient,
            patient_created,
            portal_link,
            token_expires_at: issued.expires_at,
            sent: true,
            notified: notification_error.is_none(),
            notification_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::config::{ConfigSettings, CoreConfig};
    use crate::content::PlanSections;
    use crate::tenant::{InterpreterReviewMode, Role};
    use crate::test_support::{patient_details, sample_content, token_of, Harness};
    use chrono::Duration;
    use std::sync::atomic::Ordering;
    use std::sync::Barrier;

    fn spanish() -> LanguageCode {
        LanguageCode::new("es").unwrap()
    }

    fn skip(justification: &str) -> ApprovalRequest {
        ApprovalRequest {
            skip_interpreter_review: Some(true),
            override_justification: Some(justification.into()),
        }
    }

    fn actions(entries: &[AuditLogEntry]) -> Vec<AuditAction> {
        entries.iter().map(|e| e.action).collect()
    }

    fn edited() -> InterpreterApproval {
        let content = sample_content(&spanish());
        InterpreterApproval {
            edited: EditedContent {
                simplified: content.simplified,
                translated: content.translated,
            },
            notes: Some("  corrected dosage wording ".into()),
        }
    }

    #[test]
    fn create_draft_requires_source_and_clinician() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let plans = &h.engine.care_plans;

        let err = plans
            .create_draft(
                &h.clinician,
                NewCarePlan {
                    title: "Discharge".into(),
                    source_content: "   ".into(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, CarePlanError::Validation(_)));

        let err = plans
            .create_draft(
                &h.admin,
                NewCarePlan {
                    title: "Discharge".into(),
                    source_content: "text".into(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, CarePlanError::Forbidden(_)));

        let draft = h.draft();
        assert_eq!(draft.status, CarePlanStatus::Draft);
        assert_eq!(draft.tenant_id, h.tenant_id);
        assert_eq!(draft.clinician_id, h.clinician.user_id);
    }

    #[test]
    fn process_moves_draft_to_pending_review() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let plan = h.processed("es");
        assert_eq!(plan.status, CarePlanStatus::PendingReview);
        assert_eq!(plan.target_language, Some(spanish()));
        assert!(plan.back_translated_content.is_some());

        let trail = h.engine.care_plans.audit_trail(&h.clinician, plan.id).unwrap();
        assert_eq!(
            actions(&trail),
            vec![AuditAction::CarePlanCreated, AuditAction::CarePlanProcessed]
        );
    }

    #[test]
    fn process_failure_leaves_draft_untouched() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let draft = h.draft();
        h.processor.fail.store(true, Ordering::SeqCst);

        let err = h
            .engine
            .care_plans
            .process(&h.clinician, draft.id, &spanish())
            .unwrap_err();
        assert!(matches!(err, CarePlanError::UpstreamFailure(_)));

        let after = h.engine.care_plans.get(&h.clinician, draft.id).unwrap();
        assert_eq!(after, draft);
        assert_eq!(h.engine.care_plans.audit_trail(&h.clinician, draft.id).unwrap().len(), 1);
    }

    #[test]
    fn reprocessing_is_rejected() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let plan = h.processed("es");
        let err = h
            .engine
            .care_plans
            .process(&h.clinician, plan.id, &spanish())
            .unwrap_err();
        assert!(matches!(err, CarePlanError::InvalidTransition(_)));
    }

    #[test]
    fn concurrent_change_during_processing_is_detected() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let draft = h.draft();

        let engine = h.engine.clone();
        let clinician = h.clinician.clone();
        h.processor.before_next_return(move || {
            engine
                .care_plans
                .process(&clinician, draft.id, &LanguageCode::new("fr").unwrap())
                .unwrap();
        });

        let err = h
            .engine
            .care_plans
            .process(&h.clinician, draft.id, &spanish())
            .unwrap_err();
        assert!(matches!(err, CarePlanError::InvalidTransition(_)));

        let plan = h.engine.care_plans.get(&h.clinician, draft.id).unwrap();
        assert_eq!(plan.target_language, Some(LanguageCode::new("fr").unwrap()));
    }

    #[test]
    fn english_plans_are_approved_directly_in_every_mode() {
        for mode in [
            InterpreterReviewMode::Disabled,
            InterpreterReviewMode::Optional,
            InterpreterReviewMode::Required,
        ] {
            let h = Harness::new(mode);
            let plan = h.approved();
            assert_eq!(plan.status, CarePlanStatus::Approved, "{mode}");
            assert_eq!(plan.approved_by, Some(h.clinician.user_id));
            assert!(plan.approved_at.is_some());
        }
    }

    #[test]
    fn required_mode_routes_to_interpreter_and_rejects_skip() {
        let h = Harness::new(InterpreterReviewMode::Required);
        let plan = h.processed("es");

        let err = h
            .engine
            .care_plans
            .approve(&h.clinician, plan.id, &skip("patient is bilingual"))
            .unwrap_err();
        assert!(matches!(err, CarePlanError::InvalidTransition(_)));

        let routed = h
            .engine
            .care_plans
            .approve(&h.clinician, plan.id, &ApprovalRequest::default())
            .unwrap();
        assert_eq!(routed.status, CarePlanStatus::InterpreterReview);
        assert_eq!(routed.approved_by, None);
    }

    #[test]
    fn optional_mode_skip_records_justification() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let plan = h.processed("es");

        let err = h
            .engine
            .care_plans
            .approve(&h.clinician, plan.id, &skip(" "))
            .unwrap_err();
        assert!(matches!(err, CarePlanError::Validation(_)));

        let approved = h
            .engine
            .care_plans
            .approve(&h.clinician, plan.id, &skip("Family member is a certified interpreter"))
            .unwrap();
        assert_eq!(approved.status, CarePlanStatus::Approved);

        let trail = h.engine.care_plans.audit_trail(&h.clinician, plan.id).unwrap();
        let entry = trail.last().unwrap();
        assert_eq!(entry.action, AuditAction::CarePlanApproved);
        assert_eq!(
            entry.details["justification"],
            "Family member is a certified interpreter"
        );
    }

    #[test]
    fn skip_justification_is_audited_exactly_as_written() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let plan = h.processed("es");
        let justification = "  Spanish-speaking clinician\n";

        h.engine
            .care_plans
            .approve(&h.clinician, plan.id, &skip(justification))
            .unwrap();

        let trail = h.engine.care_plans.audit_trail(&h.clinician, plan.id).unwrap();
        let entry = trail.last().unwrap();
        assert_eq!(entry.action, AuditAction::CarePlanApproved);
        assert_eq!(entry.details["justification"].as_str(), Some(justification));
    }

    #[test]
    fn disabled_mode_approves_translations_directly() {
        let h = Harness::new(InterpreterReviewMode::Disabled);
        let plan = h.processed("es");
        let approved = h
            .engine
            .care_plans
            .approve(&h.clinician, plan.id, &ApprovalRequest::default())
            .unwrap();
        assert_eq!(approved.status, CarePlanStatus::Approved);
    }

    #[test]
    fn interpreter_round_trip() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let plans = &h.engine.care_plans;
        let plan = h.processed("es");
        plans
            .approve(&h.clinician, plan.id, &ApprovalRequest::default())
            .unwrap();

        let err = plans
            .interpreter_request_changes(&h.interpreter, plan.id, "  ")
            .unwrap_err();
        assert!(matches!(err, CarePlanError::Validation(_)));

        let sent_back = plans
            .interpreter_request_changes(&h.interpreter, plan.id, "Dose is ambiguous")
            .unwrap();
        assert_eq!(sent_back.status, CarePlanStatus::PendingReview);
        assert!(sent_back.changes_requested());

        plans
            .approve(&h.clinician, plan.id, &ApprovalRequest::default())
            .unwrap();
        let reviewed = plans
            .interpreter_approve(&h.interpreter, plan.id, edited())
            .unwrap();
        assert_eq!(reviewed.status, CarePlanStatus::InterpreterApproved);
        assert_eq!(reviewed.interpreter_reviewed_by, Some(h.interpreter.user_id));
        assert_eq!(
            reviewed.interpreter_notes.as_deref(),
            Some("corrected dosage wording")
        );

        let approved = plans
            .approve(&h.clinician, plan.id, &ApprovalRequest::default())
            .unwrap();
        assert_eq!(approved.status, CarePlanStatus::Approved);

        let trail = plans.audit_trail(&h.clinician, plan.id).unwrap();
        assert_eq!(
            actions(&trail),
            vec![
                AuditAction::CarePlanCreated,
                AuditAction::CarePlanProcessed,
                AuditAction::CarePlanSentToInterpreter,
                AuditAction::InterpreterRequestedChanges,
                AuditAction::CarePlanSentToInterpreter,
                AuditAction::InterpreterApproved,
                AuditAction::CarePlanApproved,
            ]
        );
    }

    #[test]
    fn interpreter_needs_the_plan_language() {
        let h = Harness::new(InterpreterReviewMode::Required);
        let plan = h.processed("vi");
        h.engine
            .care_plans
            .approve(&h.clinician, plan.id, &ApprovalRequest::default())
            .unwrap();

        let err = h
            .engine
            .care_plans
            .interpreter_approve(&h.interpreter, plan.id, edited())
            .unwrap_err();
        assert!(matches!(err, CarePlanError::Forbidden(_)));
        assert!(h
            .engine
            .care_plans
            .list(&h.interpreter, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn interpreter_approve_rejects_empty_translation() {
        let h = Harness::new(InterpreterReviewMode::Required);
        let plan = h.processed("es");
        h.engine
            .care_plans
            .approve(&h.clinician, plan.id, &ApprovalRequest::default())
            .unwrap();
        let mut approval = edited();
        approval.edited.translated = PlanSections::default();
        let err = h
            .engine
            .care_plans
            .interpreter_approve(&h.interpreter, plan.id, approval)
            .unwrap_err();
        assert!(matches!(err, CarePlanError::Validation(_)));
    }

    #[test]
    fn concurrent_approvals_have_one_winner() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let plan = h.processed("en");
        let barrier = Barrier::new(2);

        let results: Vec<CarePlanResult<CarePlan>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        h.engine
                            .care_plans
                            .approve(&h.clinician, plan.id, &ApprovalRequest::default())
                    })
                })
                .collect();
            handles.into_iter().map(|t| t.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(CarePlanError::InvalidTransition(_)))));

        let approvals = h
            .engine
            .care_plans
            .audit_trail(&h.clinician, plan.id)
            .unwrap()
            .into_iter()
            .filter(|e| e.action == AuditAction::CarePlanApproved)
            .count();
        assert_eq!(approvals, 1);
    }

    #[test]
    fn unlisted_transitions_are_rejected() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let plans = &h.engine.care_plans;
        let draft = h.draft();

        assert!(matches!(
            plans.approve(&h.clinician, draft.id, &ApprovalRequest::default()),
            Err(CarePlanError::InvalidTransition(_))
        ));
        assert!(matches!(
            plans.send(&h.clinician, draft.id, patient_details("a@example.org")),
            Err(CarePlanError::InvalidTransition(_))
        ));
        assert!(matches!(
            plans.mark_completed(&h.clinician, draft.id),
            Err(CarePlanError::InvalidTransition(_))
        ));
        assert!(matches!(
            plans.resend(&h.clinician, draft.id),
            Err(CarePlanError::InvalidTransition(_))
        ));
    }

    #[test]
    fn roles_and_tenants_are_enforced() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let plan = h.processed("en");

        assert!(matches!(
            h.engine
                .care_plans
                .approve(&h.admin, plan.id, &ApprovalRequest::default()),
            Err(CarePlanError::Forbidden(_))
        ));

        let other = h.other_tenant();
        let outsider = h.actor_in(other, Role::Clinician, "doc@lakeside.example.org", &[]);
        assert!(matches!(
            h.engine
                .care_plans
                .approve(&outsider, plan.id, &ApprovalRequest::default()),
            Err(CarePlanError::NotFound(_))
        ));
        assert!(matches!(
            h.engine.care_plans.get(&outsider, plan.id),
            Err(CarePlanError::NotFound(_))
        ));
        assert!(matches!(
            h.engine.care_plans.get(&outsider, CarePlanId::new()),
            Err(CarePlanError::NotFound(_))
        ));
        assert!(h.engine.care_plans.list(&outsider, None).unwrap().is_empty());
        assert_eq!(h.engine.care_plans.list(&h.root, None).unwrap().len(), 1);
    }

    #[test]
    fn send_creates_patient_token_and_check_ins() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let outcome = h.sent();

        assert!(outcome.sent && outcome.notified);
        assert!(outcome.patient_created);
        let plan = &outcome.care_plan;
        assert_eq!(plan.status, CarePlanStatus::Sent);
        assert_eq!(plan.patient_id, Some(outcome.patient.id));
        assert_eq!(plan.sent_at, Some(h.clock.now()));
        assert_eq!(
            plan.access_token_expiry,
            Some(h.clock.now() + Duration::days(30))
        );
        assert!(outcome.portal_link.ends_with(&token_of(&outcome)));

        let check_ins = h
            .engine
            .check_ins
            .check_ins(&h.clinician, plan.id)
            .unwrap();
        assert_eq!(check_ins.len(), 1);
        assert_eq!(check_ins[0].attempt_number, 1);
        assert_eq!(check_ins[0].scheduled_for, h.clock.now() + Duration::days(2));

        let sent = h.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].email.as_str(), "ana.lopez@example.org");

        let sent_entries = h
            .engine
            .care_plans
            .audit_trail(&h.clinician, plan.id)
            .unwrap()
            .into_iter()
            .filter(|e| e.action == AuditAction::CarePlanSent)
            .count();
        assert_eq!(sent_entries, 1);
    }

    #[test]
    fn failed_send_leaves_plan_and_partition_untouched() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let plan = h.approved();
        let audit_before = h.tenant_audit().len();
        h.engine.context().store.poison_token_index();

        let err = h
            .engine
            .care_plans
            .send(&h.clinician, plan.id, patient_details("ana.lopez@example.org"))
            .unwrap_err();
        assert!(matches!(err, CarePlanError::LockPoisoned));

        assert_eq!(h.engine.care_plans.get(&h.clinician, plan.id).unwrap(), plan);
        assert!(h
            .engine
            .check_ins
            .check_ins(&h.clinician, plan.id)
            .unwrap()
            .is_empty());
        assert_eq!(h.tenant_audit().len(), audit_before);
        let handle = h.engine.context().store.partition(h.tenant_id).unwrap();
        assert!(lock(&handle).unwrap().patients.is_empty());
        assert!(h.notifier.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn second_plan_for_same_email_reuses_patient() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let first = h.sent();
        let plan = h.approved();
        let second = h
            .engine
            .care_plans
            .send(&h.clinician, plan.id, patient_details("ANA.LOPEZ@example.org"))
            .unwrap();
        assert!(!second.patient_created);
        assert_eq!(second.patient.id, first.patient.id);
    }

    #[test]
    fn notification_failure_keeps_plan_sent() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        h.notifier.fail.store(true, Ordering::SeqCst);
        let outcome = h.sent();

        assert!(outcome.sent);
        assert!(!outcome.notified);
        assert!(outcome.notification_error.is_some());
        assert_eq!(outcome.care_plan.status, CarePlanStatus::Sent);

        let trail = h
            .engine
            .care_plans
            .audit_trail(&h.clinician, outcome.care_plan.id)
            .unwrap();
        let tail: Vec<AuditAction> = actions(&trail).into_iter().rev().take(2).collect();
        assert_eq!(
            tail,
            vec![AuditAction::NotificationFailed, AuditAction::CarePlanSent]
        );
    }

    #[test]
    fn resend_replaces_token() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let outcome = h.sent();
        let old_token = token_of(&outcome);

        let resent = h
            .engine
            .care_plans
            .resend(&h.clinician, outcome.care_plan.id)
            .unwrap();
        let new_token = token_of(&resent);
        assert_ne!(old_token, new_token);
        assert!(matches!(
            h.engine.context().tokens().validate(&old_token),
            Err(CarePlanError::TokenInvalid)
        ));
        assert_eq!(
            h.engine.context().tokens().validate(&new_token).unwrap().id,
            outcome.care_plan.id
        );
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn delete_rules() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let plans = &h.engine.care_plans;

        let draft = h.draft();
        plans.delete(&h.admin, draft.id).unwrap();
        assert!(matches!(
            plans.get(&h.clinician, draft.id),
            Err(CarePlanError::NotFound(_))
        ));
        let deleted = h
            .tenant_audit()
            .into_iter()
            .filter(|e| e.action == AuditAction::CarePlanDeleted)
            .collect::<Vec<_>>();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].care_plan_id, Some(draft.id));

        let outcome = h.sent();
        let err = plans.delete(&h.clinician, outcome.care_plan.id).unwrap_err();
        assert!(matches!(err, CarePlanError::InvalidTransition(_)));

        let completed = plans.mark_completed(&h.clinician, outcome.care_plan.id).unwrap();
        assert!(matches!(
            plans.delete(&h.root, completed.id),
            Err(CarePlanError::InvalidTransition(_))
        ));
    }

    /// A plan of the harness tenant brought to `status` without contacting a patient.
    fn plan_in(h: &Harness, status: CarePlanStatus) -> CarePlan {
        let plans = &h.engine.care_plans;
        match status {
            CarePlanStatus::Draft => h.draft(),
            CarePlanStatus::PendingReview => h.processed("es"),
            CarePlanStatus::Approved => h.approved(),
            CarePlanStatus::InterpreterReview => {
                let plan = h.processed("es");
                plans
                    .approve(&h.clinician, plan.id, &ApprovalRequest::default())
                    .unwrap()
            }
            CarePlanStatus::InterpreterApproved => {
                let plan = plan_in(h, CarePlanStatus::InterpreterReview);
                plans
                    .interpreter_approve(&h.interpreter, plan.id, edited())
                    .unwrap()
            }
            other => panic!("{other} plans have been sent"),
        }
    }

    #[test]
    fn uncontacted_plans_can_be_deleted_from_every_status() {
        for status in [
            CarePlanStatus::Draft,
            CarePlanStatus::PendingReview,
            CarePlanStatus::InterpreterReview,
            CarePlanStatus::InterpreterApproved,
            CarePlanStatus::Approved,
        ] {
            let h = Harness::new(InterpreterReviewMode::Optional);
            let plan = plan_in(&h, status);
            assert_eq!(plan.status, status);

            h.engine.care_plans.delete(&h.clinician, plan.id).unwrap();

            assert!(
                matches!(
                    h.engine.care_plans.get(&h.clinician, plan.id),
                    Err(CarePlanError::NotFound(_))
                ),
                "{status}"
            );
            assert!(
                matches!(
                    h.engine.context().store.plan_tenant(plan.id),
                    Err(CarePlanError::NotFound(_))
                ),
                "{status}"
            );
            assert!(h.engine.care_plans.list(&h.root, None).unwrap().is_empty());

            let deleted: Vec<AuditLogEntry> = h
                .tenant_audit()
                .into_iter()
                .filter(|e| e.action == AuditAction::CarePlanDeleted)
                .collect();
            assert_eq!(deleted.len(), 1, "{status}");
            assert_eq!(deleted[0].care_plan_id, Some(plan.id));
            assert_eq!(deleted[0].details["status"], status.as_str());
        }
    }

    #[test]
    fn after_days_policy_gates_completion() {
        let cfg = CoreConfig::new(ConfigSettings {
            completion_policy: "after_days:30".into(),
            ..Default::default()
        })
        .unwrap();
        let h = Harness::with_config(InterpreterReviewMode::Optional, cfg);
        let outcome = h.sent();
        let plans = &h.engine.care_plans;

        assert!(matches!(
            plans.mark_completed(&h.clinician, outcome.care_plan.id),
            Err(CarePlanError::InvalidTransition(_))
        ));
        assert!(plans.complete_due(&h.admin).unwrap().is_empty());

        h.clock.advance(Duration::days(30));
        assert_eq!(
            plans.complete_due(&h.admin).unwrap(),
            vec![outcome.care_plan.id]
        );
        let plan = plans.get(&h.clinician, outcome.care_plan.id).unwrap();
        assert_eq!(plan.status, CarePlanStatus::Completed);
        assert_eq!(plan.completed_at, Some(h.clock.now()));
    }

    #[test]
    fn after_first_response_policy_gates_completion() {
        let cfg = CoreConfig::new(ConfigSettings {
            completion_policy: "after_first_response".into(),
            ..Default::default()
        })
        .unwrap();
        let h = Harness::with_config(InterpreterReviewMode::Optional, cfg);
        let outcome = h.sent();
        let plan_id = outcome.care_plan.id;

        assert!(matches!(
            h.engine.care_plans.mark_completed(&h.clinician, plan_id),
            Err(CarePlanError::InvalidTransition(_))
        ));

        let check_in = h.engine.check_ins.check_ins(&h.clinician, plan_id).unwrap()[0].clone();
        h.engine
            .check_ins
            .record_response(
                "203.0.113.5",
                &token_of(&outcome),
                check_in.id,
                crate::check_in::CheckInResponse::Green,
                None,
            )
            .unwrap();
        let completed = h.engine.care_plans.mark_completed(&h.clinician, plan_id).unwrap();
        assert_eq!(completed.status, CarePlanStatus::Completed);
    }

    #[test]
    fn manual_policy_never_sweeps() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        h.sent();
        h.clock.advance(Duration::days(365));
        assert!(h.engine.care_plans.complete_due(&h.root).unwrap().is_empty());
        assert!(matches!(
            h.engine.care_plans.complete_due(&h.clinician),
            Err(CarePlanError::Forbidden(_))
        ));
    }
}
