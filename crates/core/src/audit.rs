//! Append-only audit trail.
//!
//! Each tenant partition owns one ordered log. Entries are only ever pushed; nothing in the crate
//! exposes a way to edit or remove one. The billing calculator reads the `care_plan_sent` entry
//! from here rather than trusting a mutable field on the plan.

use careplan_ids::{AuditEntryId, CarePlanId, TenantId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::{CarePlanError, CarePlanResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    TenantProvisioned,
    UserProvisioned,
    InterpreterReviewModeChanged,
    CarePlanCreated,
    CarePlanProcessed,
    CarePlanSentToInterpreter,
    CarePlanApproved,
    InterpreterApproved,
    InterpreterRequestedChanges,
    CarePlanSent,
    NotificationFailed,
    AccessLinkReissued,
    CarePlanCompleted,
    CarePlanDeleted,
    CheckInScheduled,
    CheckInResponded,
    AlertResolved,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::TenantProvisioned => "tenant_provisioned",
            AuditAction::UserProvisioned => "user_provisioned",
            AuditAction::InterpreterReviewModeChanged => "interpreter_review_mode_changed",
            AuditAction::CarePlanCreated => "care_plan_created",
            AuditAction::CarePlanProcessed => "care_plan_processed",
            AuditAction::CarePlanSentToInterpreter => "care_plan_sent_to_interpreter",
            AuditAction::CarePlanApproved => "care_plan_approved",
            AuditAction::InterpreterApproved => "interpreter_approved",
            AuditAction::InterpreterRequestedChanges => "interpreter_requested_changes",
            AuditAction::CarePlanSent => "care_plan_sent",
            AuditAction::NotificationFailed => "notification_failed",
            AuditAction::AccessLinkReissued => "access_link_reissued",
            AuditAction::CarePlanCompleted => "care_plan_completed",
            AuditAction::CarePlanDeleted => "care_plan_deleted",
            AuditAction::CheckInScheduled => "check_in_scheduled",
            AuditAction::CheckInResponded => "check_in_responded",
            AuditAction::AlertResolved => "alert_resolved",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuditLogEntry {
    pub id: AuditEntryId,
    /// Position in the tenant's log, starting at 1.
    pub sequence: u64,
    pub tenant_id: TenantId,
    /// `None` for tenant-level events.
    pub care_plan_id: Option<CarePlanId>,
    /// `None` for patient-originated events.
    pub actor_id: Option<UserId>,
    pub action: AuditAction,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// An entry that has been prepared but not yet written.
///
/// Services build the event before committing so a serialization failure aborts the whole
/// unit of work instead of leaving a state change without its audit record.
#[derive(Clone, Debug)]
pub struct AuditEvent {
    care_plan_id: Option<CarePlanId>,
    actor_id: Option<UserId>,
    action: AuditAction,
    details: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        action: AuditAction,
        care_plan_id: Option<CarePlanId>,
        actor_id: Option<UserId>,
        details: impl Serialize,
    ) -> CarePlanResult<Self> {
        let details = serde_json::to_value(details).map_err(CarePlanError::AuditSerialization)?;
        Ok(Self {
            care_plan_id,
            actor_id,
            action,
            details,
        })
    }

    pub fn action(&self) -> AuditAction {
        self.action
    }
}

/// One tenant's ordered log.
#[derive(Clone, Debug, Default)]
pub struct AuditTrail {
    entries: Vec<AuditLogEntry>,
}

impl AuditTrail {
    pub(crate) fn append(
        &mut self,
        tenant_id: TenantId,
        event: AuditEvent,
        now: DateTime<Utc>,
    ) -> &AuditLogEntry {
        // Keep created_at monotonic even if the clock steps backwards.
        let created_at = self
            .entries
            .last()
            .map_or(now, |last| last.created_at.max(now));

        let sequence = self.entries.len() as u64 + 1;
        self.entries.push(AuditLogEntry {
            id: AuditEntryId::new(),
            sequence,
            tenant_id,
            care_plan_id: event.care_plan_id,
            actor_id: event.actor_id,
            action: event.action,
            details: event.details,
            created_at,
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[AuditLogEntry] {
        &self.entries
    }

    pub fn for_plan(&self, plan_id: CarePlanId) -> Vec<AuditLogEntry> {
        self.entries
            .iter()
            .filter(|e| e.care_plan_id == Some(plan_id))
            .cloned()
            .collect()
    }
}

/// Timestamp of the first `care_plan_sent` entry among `entries`.
pub fn sent_at(entries: &[AuditLogEntry], plan_id: CarePlanId) -> Option<DateTime<Utc>> {
    entries
        .iter()
        .filter(|e| e.care_plan_id == Some(plan_id) && e.action == AuditAction::CarePlanSent)
        .map(|e| e.created_at)
        .min()
}
