//! Billing eligibility lookups.

use careplan_ids::CarePlanId;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audit;
use crate::billing::{self, calendar_days_between, BillingEligibility};
use crate::care_plan::CarePlan;
use crate::engine::EngineContext;
use crate::scope::{Action, Actor, TenantScope};
use crate::status::CarePlanStatus;
use crate::store::{lock, TenantPartition};
use crate::CarePlanResult;

/// Inputs and outcome of the TCM calculation for one plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BillingReport {
    pub care_plan_id: CarePlanId,
    pub status: CarePlanStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub first_response_at: Option<DateTime<Utc>>,
    pub days_to_first_response: Option<i64>,
    pub eligibility: BillingEligibility,
}

/// Build the report for `plan` from its partition's audit log and check-ins.
pub(crate) fn report_for(partition: &TenantPartition, plan: &CarePlan) -> BillingReport {
    let sent_at = audit::sent_at(partition.audit().entries(), plan.id);
    let check_ins = partition.check_ins_for(plan.id);
    let first_response_at = billing::first_response_at(&check_ins);
    BillingReport {
        care_plan_id: plan.id,
        status: plan.status,
        sent_at,
        first_response_at,
        days_to_first_response: sent_at
            .zip(first_response_at)
            .map(|(sent, responded)| calendar_days_between(sent, responded)),
        eligibility: billing::calculate(plan.status, sent_at, &check_ins),
    }
}

#[derive(Clone, Debug)]
pub struct BillingService {
    ctx: EngineContext,
}

impl BillingService {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Current CPT eligibility of one plan.
    ///
    /// # Errors
    ///
    /// [`crate::CarePlanError::Forbidden`] for interpreters and callers from another tenant.
    pub fn eligibility(&self, actor: &Actor, plan_id: CarePlanId) -> CarePlanResult<BillingReport> {
        let handle =
            TenantScope::plan_partition(&self.ctx.store, actor, Action::ViewReports, plan_id)?;
        let partition = lock(&handle)?;
        let plan = partition.plan(plan_id)?;
        TenantScope::authorize_plan(actor, Action::ViewReports, plan)?;
        Ok(report_for(&partition, plan))
    }
}
