//! Read-only reporting: status counts, response rates, CPT counts and CSV export.
//!
//! Reports cover the caller's tenant; super admins see every tenant.

use std::collections::BTreeMap;

use careplan_ids::TenantId;
use careplan_types::LanguageCode;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::billing::BillingEligibility;
use crate::engine::EngineContext;
use crate::repositories::billing::{report_for, BillingReport};
use crate::scope::{Action, Actor, TenantScope};
use crate::status::CarePlanStatus;
use crate::store::lock;
use crate::CarePlanResult;

pub const CSV_HEADER: &str =
    "care_plan_id,tenant_id,status,target_language,sent_at,first_response_at,eligibility";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total_plans: usize,
    pub status_counts: BTreeMap<CarePlanStatus, usize>,
    /// Plans in `sent` or `completed`.
    pub plans_reached: usize,
    /// Reached plans with at least one answered check-in.
    pub plans_responded: usize,
    /// `plans_responded / plans_reached`, 0 when nothing has been sent.
    pub response_rate: f64,
    pub open_alerts: usize,
    pub eligibility_counts: BTreeMap<BillingEligibility, usize>,
}

/// One exported row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlanReportRow {
    pub tenant_id: TenantId,
    pub target_language: Option<LanguageCode>,
    #[serde(flatten)]
    pub billing: BillingReport,
}

impl PlanReportRow {
    fn to_csv_line(&self) -> String {
        let timestamp = |t: Option<DateTime<Utc>>| {
            t.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default()
        };
        [
            self.billing.care_plan_id.to_string(),
            self.tenant_id.to_string(),
            self.billing.status.to_string(),
            self.target_language
                .as_ref()
                .map(|l| l.to_string())
                .unwrap_or_default(),
            timestamp(self.billing.sent_at),
            timestamp(self.billing.first_response_at),
            self.billing.eligibility.to_string(),
        ]
        .join(",")
    }
}

#[derive(Clone, Debug)]
pub struct ReportingService {
    ctx: EngineContext,
}

impl ReportingService {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Every plan visible to the actor with its billing inputs, oldest first.
    pub fn rows(&self, actor: &Actor) -> CarePlanResult<Vec<PlanReportRow>> {
        let mut rows = Vec::new();
        for handle in TenantScope::visible_partitions(&self.ctx.store, actor, Action::ViewReports)? {
            let partition = lock(&handle)?;
            let mut plans: Vec<_> = partition.plans.values().collect();
            plans.sort_by_key(|p| (p.created_at, p.id));
            rows.extend(plans.into_iter().map(|plan| PlanReportRow {
                tenant_id: plan.tenant_id,
                target_language: plan.target_language.clone(),
                billing: report_for(&partition, plan),
            }));
        }
        Ok(rows)
    }

    pub fn summary(&self, actor: &Actor) -> CarePlanResult<ReportSummary> {
        let rows = self.rows(actor)?;

        let mut status_counts: BTreeMap<CarePlanStatus, usize> = BTreeMap::new();
        let mut eligibility_counts: BTreeMap<BillingEligibility, usize> =
            BillingEligibility::ALL.iter().map(|e| (*e, 0)).collect();
        for row in &rows {
            *status_counts.entry(row.billing.status).or_default() += 1;
            *eligibility_counts.entry(row.billing.eligibility).or_default() += 1;
        }

        let plans_reached = rows
            .iter()
            .filter(|r| r.billing.status.has_reached_patient())
            .count();
        let plans_responded = rows
            .iter()
            .filter(|r| r.billing.status.has_reached_patient())
            .filter(|r| r.billing.first_response_at.is_some())
            .count();
        let response_rate = if plans_reached == 0 {
            0.0
        } else {
            plans_responded as f64 / plans_reached as f64
        };

        let mut open_alerts = 0;
        for handle in TenantScope::visible_partitions(&self.ctx.store, actor, Action::ViewReports)? {
            open_alerts += lock(&handle)?
                .check_ins
                .values()
                .filter(|c| c.has_open_alert())
                .count();
        }

        Ok(ReportSummary {
            total_plans: rows.len(),
            status_counts,
            plans_reached,
            plans_responded,
            response_rate,
            open_alerts,
            eligibility_counts,
        })
    }

    /// CSV export of [`ReportingService::rows`], header first. Timestamps are RFC 3339 UTC.
    pub fn export_csv(&self, actor: &Actor) -> CarePlanResult<String> {
        let rows = self.rows(actor)?;
        let mut output = String::with_capacity(CSV_HEADER.len() + rows.len() * 128);
        output.push_str(CSV_HEADER);
        output.push('\n');
        for row in &rows {
            output.push_str(&row.to_csv_line());
            output.push('\n');
        }
        tracing::info!(actor = %actor.user_id, rows = rows.len(), "report exported");
        Ok(output)
    }
}
