//! Check-in scheduling, patient responses and alerts.
//!
//! Staff operations go through [`TenantScope`]. `record_response` is the one patient-facing write:
//! it is authenticated by the plan's access token alone, behind the token failure limiter.

use careplan_ids::{CarePlanId, CheckInId, PatientId};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::audit::{AuditAction, AuditEvent};
use crate::check_in::{CheckIn, CheckInResponse};
use crate::engine::EngineContext;
use crate::scope::{Action, Actor, TenantScope};
use crate::store::lock;
use crate::{CarePlanError, CarePlanResult};

#[derive(Clone, Debug, Deserialize)]
pub struct NewCheckIn {
    pub patient_id: PatientId,
    pub attempt_number: u32,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct CheckInService {
    ctx: EngineContext,
}

impl CheckInService {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Schedule the next check-in on a sent or completed plan.
    ///
    /// # Errors
    ///
    /// - [`CarePlanError::InvalidTransition`] if the plan has not been sent.
    /// - [`CarePlanError::Validation`] if `patient_id` is not the plan's patient or
    ///   `attempt_number` is not one more than the current highest attempt.
    pub fn schedule(
        &self,
        actor: &Actor,
        plan_id: CarePlanId,
        new: NewCheckIn,
    ) -> CarePlanResult<CheckIn> {
        let handle =
            TenantScope::plan_partition(&self.ctx.store, actor, Action::ScheduleCheckIn, plan_id)?;
        let mut partition = lock(&handle)?;
        let plan = partition.plan(plan_id)?;
        TenantScope::authorize_plan(actor, Action::ScheduleCheckIn, plan)?;

        if !plan.status.has_reached_patient() {
            return Err(CarePlanError::InvalidTransition(format!(
                "cannot schedule a check-in on a care plan in status '{}'",
                plan.status
            )));
        }
        if plan.patient_id != Some(new.patient_id) {
            return Err(CarePlanError::Validation(format!(
                "patient {} is not the patient of care plan {plan_id}",
                new.patient_id
            )));
        }
        let expected = partition
            .check_ins
            .values()
            .filter(|c| c.care_plan_id == plan_id)
            .map(|c| c.attempt_number)
            .max()
            .unwrap_or(0)
            + 1;
        if new.attempt_number != expected {
            return Err(CarePlanError::Validation(format!(
                "attempt number must be {expected}, got {}",
                new.attempt_number
            )));
        }

        let check_in = CheckIn::scheduled(
            partition.tenant.id,
            plan_id,
            new.patient_id,
            new.attempt_number,
            new.scheduled_for,
        );
        let event = AuditEvent::new(
            AuditAction::CheckInScheduled,
            Some(plan_id),
            Some(actor.user_id),
            json!({
                "check_in_id": check_in.id,
                "attempt_number": check_in.attempt_number,
                "scheduled_for": check_in.scheduled_for,
            }),
        )?;
        self.ctx
            .store
            .index_check_in(check_in.id, partition.tenant.id)?;
        let check_in = partition.commit_check_in(check_in, event, self.ctx.clock.now());
        tracing::info!(check_in_id = %check_in.id, care_plan_id = %plan_id, attempt = check_in.attempt_number, "check-in scheduled");
        Ok(check_in)
    }

    /// Record the patient's answer.
    ///
    /// `source` identifies the caller for the failure limiter (normally the client address).
    ///
    /// # Errors
    ///
    /// - [`CarePlanError::TokenInvalid`] if the token is not valid for a plan owning this
    ///   check-in, or the source is locked out.
    /// - [`CarePlanError::AlreadyResponded`] if the check-in already has an answer.
    pub fn record_response(
        &self,
        source: &str,
        token: &str,
        check_in_id: CheckInId,
        response: CheckInResponse,
        notes: Option<String>,
    ) -> CarePlanResult<CheckIn> {
        let tokens = &self.ctx.tokens;
        let now = self.ctx.clock.now();
        tokens.guarded(source, || {
            tokens.with_valid_plan(token, |partition, plan_id| {
                let mut check_in = partition
                    .check_ins
                    .get(&check_in_id)
                    .filter(|c| c.care_plan_id == plan_id)
                    .cloned()
                    .ok_or(CarePlanError::TokenInvalid)?;
                if check_in.response.is_some() {
                    return Err(CarePlanError::AlreadyResponded(check_in_id));
                }

                check_in.response = Some(response);
                check_in.responded_at = Some(now);
                check_in.notes = notes
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty());
                check_in.alert_created = response.raises_alert();

                let event = AuditEvent::new(
                    AuditAction::CheckInResponded,
                    Some(plan_id),
                    None,
                    json!({
                        "check_in_id": check_in_id,
                        "response": response,
                        "alert_created": check_in.alert_created,
                    }),
                )?;
                let check_in = partition.commit_check_in(check_in, event, now);
                if check_in.alert_created {
                    tracing::warn!(check_in_id = %check_in_id, care_plan_id = %plan_id, response = %response, "check-in alert raised");
                } else {
                    tracing::info!(check_in_id = %check_in_id, care_plan_id = %plan_id, "check-in answered");
                }
                Ok(check_in)
            })
        })
    }

    /// Mark a check-in's alert resolved.
    ///
    /// Resolving an already resolved alert returns the record unchanged and writes nothing.
    ///
    /// # Errors
    ///
    /// [`CarePlanError::Validation`] if the check-in never raised an alert.
    pub fn resolve_alert(&self, actor: &Actor, check_in_id: CheckInId) -> CarePlanResult<CheckIn> {
        let handle = TenantScope::check_in_partition(
            &self.ctx.store,
            actor,
            Action::ResolveAlert,
            check_in_id,
        )?;
        let mut partition = lock(&handle)?;
        let mut check_in = partition.check_in(check_in_id)?.clone();
        if !check_in.alert_created {
            return Err(CarePlanError::Validation(format!(
                "check-in {check_in_id} has no alert"
            )));
        }
        if check_in.alert_resolved {
            return Ok(check_in);
        }

        let now = self.ctx.clock.now();
        check_in.alert_resolved = true;
        check_in.alert_resolved_at = Some(now);
        check_in.alert_resolved_by = Some(actor.user_id);
        let event = AuditEvent::new(
            AuditAction::AlertResolved,
            Some(check_in.care_plan_id),
            Some(actor.user_id),
            json!({ "check_in_id": check_in_id, "response": check_in.response }),
        )?;
        let check_in = partition.commit_check_in(check_in, event, now);
        tracing::info!(check_in_id = %check_in_id, "alert resolved");
        Ok(check_in)
    }

    /// A plan's check-ins ordered by attempt number.
    pub fn check_ins(&self, actor: &Actor, plan_id: CarePlanId) -> CarePlanResult<Vec<CheckIn>> {
        let handle = TenantScope::plan_partition(&self.ctx.store, actor, Action::ViewPlan, plan_id)?;
        let partition = lock(&handle)?;
        TenantScope::authorize_plan(actor, Action::ViewPlan, partition.plan(plan_id)?)?;
        Ok(partition.check_ins_for(plan_id))
    }

    /// Unresolved alerts in the actor's tenant, most recent answer first.
    pub fn open_alerts(&self, actor: &Actor) -> CarePlanResult<Vec<CheckIn>> {
        let mut alerts = Vec::new();
        for handle in TenantScope::visible_partitions(&self.ctx.store, actor, Action::ResolveAlert)? {
            let partition = lock(&handle)?;
            alerts.extend(
                partition
                    .check_ins
                    .values()
                    .filter(|c| c.has_open_alert())
                    .cloned(),
            );
        }
        alerts.sort_by(|a, b| b.responded_at.cmp(&a.responded_at));
        Ok(alerts)
    }

    /// Unanswered check-ins scheduled at or before `now`, oldest first.
    pub fn due_check_ins(&self, actor: &Actor, now: DateTime<Utc>) -> CarePlanResult<Vec<CheckIn>> {
        let mut due = Vec::new();
        for handle in
            TenantScope::visible_partitions(&self.ctx.store, actor, Action::ScheduleCheckIn)?
        {
            let partition = lock(&handle)?;
            due.extend(
                partition
                    .check_ins
                    .values()
                    .filter(|c| c.is_due(now))
                    .filter(|c| {
                        partition
                            .plans
                            .get(&c.care_plan_id)
                            .is_some_and(|p| p.status.has_reached_patient())
                    })
                    .cloned(),
            );
        }
        due.sort_by_key(|c| (c.scheduled_for, c.attempt_number));
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::test_support::{token_of, Harness};
    use crate::tenant::{InterpreterReviewMode, Role};
    use chrono::Duration;

    const SOURCE: &str = "198.51.100.20";

    #[test]
    fn schedule_requires_next_attempt_and_plan_patient() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let outcome = h.sent();
        let plan_id = outcome.care_plan.id;
        let at = h.clock.now() + Duration::days(5);

        let gap = h
            .engine
            .check_ins
            .schedule(
                &h.clinician,
                plan_id,
                NewCheckIn {
                    patient_id: outcome.patient.id,
                    attempt_number: 3,
                    scheduled_for: at,
                },
            )
            .unwrap_err();
        assert!(matches!(gap, CarePlanError::Validation(_)));

        let stranger = h
            .engine
            .check_ins
            .schedule(
                &h.clinician,
                plan_id,
                NewCheckIn {
                    patient_id: PatientId::new(),
                    attempt_number: 2,
                    scheduled_for: at,
                },
            )
            .unwrap_err();
        assert!(matches!(stranger, CarePlanError::Validation(_)));

        let second = h
            .engine
            .check_ins
            .schedule(
                &h.admin,
                plan_id,
                NewCheckIn {
                    patient_id: outcome.patient.id,
                    attempt_number: 2,
                    scheduled_for: at,
                },
            )
            .unwrap();
        assert_eq!(second.attempt_number, 2);
        assert_eq!(
            h.engine
                .check_ins
                .check_ins(&h.clinician, plan_id)
                .unwrap()
                .iter()
                .map(|c| c.attempt_number)
                .collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn schedule_rejects_unsent_plans_and_interpreters() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let plan = h.approved();
        let err = h
            .engine
            .check_ins
            .schedule(
                &h.clinician,
                plan.id,
                NewCheckIn {
                    patient_id: PatientId::new(),
                    attempt_number: 1,
                    scheduled_for: h.clock.now(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, CarePlanError::InvalidTransition(_)));

        let outcome = h.sent();
        let err = h
            .engine
            .check_ins
            .schedule(
                &h.interpreter,
                outcome.care_plan.id,
                NewCheckIn {
                    patient_id: outcome.patient.id,
                    attempt_number: 2,
                    scheduled_for: h.clock.now(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, CarePlanError::Forbidden(_)));
    }

    #[test]
    fn response_is_written_once_and_audited() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let outcome = h.sent();
        let token = token_of(&outcome);
        let check_in = h
            .engine
            .check_ins
            .check_ins(&h.clinician, outcome.care_plan.id)
            .unwrap()
            .remove(0);

        let answered = h
            .engine
            .check_ins
            .record_response(SOURCE, &token, check_in.id, CheckInResponse::Green, Some(" fine ".into()))
            .unwrap();
        assert_eq!(answered.response, Some(CheckInResponse::Green));
        assert_eq!(answered.notes.as_deref(), Some("fine"));
        assert!(!answered.alert_created);

        let err = h
            .engine
            .check_ins
            .record_response(SOURCE, &token, check_in.id, CheckInResponse::Red, None)
            .unwrap_err();
        assert!(matches!(err, CarePlanError::AlreadyResponded(id) if id == check_in.id));

        let stored = h
            .engine
            .check_ins
            .check_ins(&h.clinician, outcome.care_plan.id)
            .unwrap()
            .remove(0);
        assert_eq!(stored.response, Some(CheckInResponse::Green));

        let trail = h
            .engine
            .care_plans
            .audit_trail(&h.clinician, outcome.care_plan.id)
            .unwrap();
        let responded: Vec<_> = trail
            .iter()
            .filter(|e| e.action == AuditAction::CheckInResponded)
            .collect();
        assert_eq!(responded.len(), 1);
        assert_eq!(responded[0].actor_id, None);
    }

    #[test]
    fn check_in_of_another_plan_is_token_invalid() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let first = h.sent();
        let second = h.sent();
        let foreign = h
            .engine
            .check_ins
            .check_ins(&h.clinician, second.care_plan.id)
            .unwrap()
            .remove(0);

        let err = h
            .engine
            .check_ins
            .record_response(SOURCE, &token_of(&first), foreign.id, CheckInResponse::Green, None)
            .unwrap_err();
        assert!(matches!(err, CarePlanError::TokenInvalid));
    }

    #[test]
    fn expired_token_cannot_respond() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let outcome = h.sent();
        let check_in = h
            .engine
            .check_ins
            .check_ins(&h.clinician, outcome.care_plan.id)
            .unwrap()
            .remove(0);
        h.clock.advance(Duration::days(31));

        let err = h
            .engine
            .check_ins
            .record_response(SOURCE, &token_of(&outcome), check_in.id, CheckInResponse::Green, None)
            .unwrap_err();
        assert!(matches!(err, CarePlanError::TokenInvalid));
    }

    #[test]
    fn alerts_resolve_once() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let outcome = h.sent();
        let check_in = h
            .engine
            .check_ins
            .check_ins(&h.clinician, outcome.care_plan.id)
            .unwrap()
            .remove(0);

        let err = h
            .engine
            .check_ins
            .resolve_alert(&h.clinician, check_in.id)
            .unwrap_err();
        assert!(matches!(err, CarePlanError::Validation(_)));

        h.engine
            .check_ins
            .record_response(SOURCE, &token_of(&outcome), check_in.id, CheckInResponse::Yellow, None)
            .unwrap();
        assert_eq!(h.engine.check_ins.open_alerts(&h.admin).unwrap().len(), 1);

        let resolved = h
            .engine
            .check_ins
            .resolve_alert(&h.clinician, check_in.id)
            .unwrap();
        assert!(resolved.alert_resolved);
        assert_eq!(resolved.alert_resolved_by, Some(h.clinician.user_id));
        let resolved_at = resolved.alert_resolved_at;

        h.clock.advance(Duration::hours(3));
        let again = h.engine.check_ins.resolve_alert(&h.admin, check_in.id).unwrap();
        assert_eq!(again.alert_resolved_at, resolved_at);
        assert_eq!(again.alert_resolved_by, Some(h.clinician.user_id));
        assert!(h.engine.check_ins.open_alerts(&h.admin).unwrap().is_empty());

        let resolutions = h
            .engine
            .care_plans
            .audit_trail(&h.clinician, outcome.care_plan.id)
            .unwrap()
            .into_iter()
            .filter(|e| e.action == AuditAction::AlertResolved)
            .count();
        assert_eq!(resolutions, 1);
    }

    #[test]
    fn alerts_are_tenant_scoped() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        let outcome = h.sent();
        let check_in = h
            .engine
            .check_ins
            .check_ins(&h.clinician, outcome.care_plan.id)
            .unwrap()
            .remove(0);
        h.engine
            .check_ins
            .record_response(SOURCE, &token_of(&outcome), check_in.id, CheckInResponse::Red, None)
            .unwrap();

        let other = h.other_tenant();
        let outsider = h.actor_in(other, Role::Admin, "admin@lakeside.example.org", &[]);
        assert!(h.engine.check_ins.open_alerts(&outsider).unwrap().is_empty());
        assert!(matches!(
            h.engine.check_ins.resolve_alert(&outsider, check_in.id),
            Err(CarePlanError::NotFound(_))
        ));
    }

    #[test]
    fn due_check_ins_are_unanswered_and_past_schedule() {
        let h = Harness::new(InterpreterReviewMode::Optional);
        h.sent();
        assert!(h
            .engine
            .check_ins
            .due_check_ins(&h.clinician, h.clock.now())
            .unwrap()
            .is_empty());

        let later = h.clock.now() + Duration::days(2);
        assert_eq!(
            h.engine
                .check_ins
                .due_check_ins(&h.clinician, later)
                .unwrap()
                .len(),
            1
        );
    }
}
