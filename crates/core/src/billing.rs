//! TCM billing eligibility.
//!
//! Transitional Care Management pays by how quickly the patient was contacted after discharge
//! material was delivered. "Delivered" is the timestamp of the `care_plan_sent` audit entry and
//! "contacted" is the earliest answered check-in. Days are counted as UTC calendar dates, so a plan
//! sent at 23:00 and answered at 01:00 the next morning is one day, not zero.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

use crate::check_in::CheckIn;
use crate::constants::{CPT_99495_MAX_DAYS, CPT_99496_MAX_DAYS};
use crate::status::CarePlanStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BillingEligibility {
    /// The plan has not reached the patient.
    NotSent,
    /// Sent, but no check-in has been answered yet.
    PendingContact,
    /// First contact within 7 calendar days.
    Cpt99496,
    /// First contact within 8 to 14 calendar days.
    Cpt99495,
    /// First contact after 14 calendar days.
    NotEligible,
}

impl BillingEligibility {
    pub const ALL: [BillingEligibility; 5] = [
        BillingEligibility::NotSent,
        BillingEligibility::PendingContact,
        BillingEligibility::Cpt99496,
        BillingEligibility::Cpt99495,
        BillingEligibility::NotEligible,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingEligibility::NotSent => "not_sent",
            BillingEligibility::PendingContact => "pending_contact",
            BillingEligibility::Cpt99496 => "99496",
            BillingEligibility::Cpt99495 => "99495",
            BillingEligibility::NotEligible => "not_eligible",
        }
    }

    pub fn is_billable(&self) -> bool {
        matches!(self, BillingEligibility::Cpt99496 | BillingEligibility::Cpt99495)
    }
}

impl fmt::Display for BillingEligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BillingEligibility {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Earliest `responded_at` among answered check-ins.
pub fn first_response_at(check_ins: &[CheckIn]) -> Option<DateTime<Utc>> {
    check_ins
        .iter()
        .filter(|c| c.response.is_some())
        .filter_map(|c| c.responded_at)
        .min()
}

/// Whole UTC calendar days from `from` to `to`.
pub fn calendar_days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to.date_naive() - from.date_naive()).num_days()
}

/// Classify a plan for TCM billing.
///
/// # Arguments
///
/// * `status` - current plan status
/// * `sent_at` - timestamp of the plan's `care_plan_sent` audit entry, if any
/// * `check_ins` - the plan's check-ins
pub fn calculate(
    status: CarePlanStatus,
    sent_at: Option<DateTime<Utc>>,
    check_ins: &[CheckIn],
) -> BillingEligibility {
    classify(status, sent_at, first_response_at(check_ins))
}

/// [`calculate`] once the first response has been found.
pub fn classify(
    status: CarePlanStatus,
    sent_at: Option<DateTime<Utc>>,
    first_response: Option<DateTime<Utc>>,
) -> BillingEligibility {
    if !status.has_reached_patient() {
        return BillingEligibility::NotSent;
    }
    let Some(sent_at) = sent_at else {
        return BillingEligibility::NotSent;
    };
    let Some(responded_at) = first_response else {
        return BillingEligibility::PendingContact;
    };

    match calendar_days_between(sent_at, responded_at) {
        d if d <= CPT_99496_MAX_DAYS => BillingEligibility::Cpt99496,
        d if d <= CPT_99495_MAX_DAYS => BillingEligibility::Cpt99495,
        _ => BillingEligibility::NotEligible,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check_in::CheckInResponse;
    use careplan_ids::{CarePlanId, PatientId, TenantId};
    use chrono::{Duration, TimeZone};

    fn sent() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 15, 30, 0).unwrap()
    }

    fn answered(at: DateTime<Utc>, attempt: u32) -> CheckIn {
        let mut check_in = CheckIn::scheduled(
            TenantId::new(),
            CarePlanId::new(),
            PatientId::new(),
            attempt,
            sent() + Duration::days(2),
        );
        check_in.response = Some(CheckInResponse::Green);
        check_in.responded_at = Some(at);
        check_in
    }

    fn unanswered(attempt: u32) -> CheckIn {
        CheckIn::scheduled(
            TenantId::new(),
            CarePlanId::new(),
            PatientId::new(),
            attempt,
            sent() + Duration::days(2),
        )
    }

    #[test]
    fn day_seven_is_99496() {
        let check_ins = [answered(sent() + Duration::days(7), 1)];
        assert_eq!(
            calculate(CarePlanStatus::Sent, Some(sent()), &check_ins),
            BillingEligibility::Cpt99496
        );
    }

    #[test]
    fn day_ten_is_99495() {
        let check_ins = [answered(sent() + Duration::days(10), 1)];
        assert_eq!(
            calculate(CarePlanStatus::Completed, Some(sent()), &check_ins),
            BillingEligibility::Cpt99495
        );
    }

    #[test]
    fn day_fourteen_is_still_99495_and_fifteen_is_not() {
        let fourteen = [answered(sent() + Duration::days(14), 1)];
        let fifteen = [answered(sent() + Duration::days(15), 1)];
        assert_eq!(
            calculate(CarePlanStatus::Sent, Some(sent()), &fourteen),
            BillingEligibility::Cpt99495
        );
        assert_eq!(
            calculate(CarePlanStatus::Sent, Some(sent()), &fifteen),
            BillingEligibility::NotEligible
        );
    }

    #[test]
    fn day_twenty_is_not_eligible() {
        let check_ins = [answered(sent() + Duration::days(20), 1)];
        assert_eq!(
            calculate(CarePlanStatus::Sent, Some(sent()), &check_ins),
            BillingEligibility::NotEligible
        );
    }

    #[test]
    fn no_response_is_pending_contact() {
        assert_eq!(
            calculate(CarePlanStatus::Sent, Some(sent()), &[unanswered(1)]),
            BillingEligibility::PendingContact
        );
        assert_eq!(
            calculate(CarePlanStatus::Sent, Some(sent()), &[]),
            BillingEligibility::PendingContact
        );
    }

    #[test]
    fn unsent_plans_are_not_sent() {
        let check_ins = [answered(sent() + Duration::days(1), 1)];
        for status in [
            CarePlanStatus::Draft,
            CarePlanStatus::PendingReview,
            CarePlanStatus::InterpreterReview,
            CarePlanStatus::InterpreterApproved,
            CarePlanStatus::Approved,
        ] {
            assert_eq!(
                calculate(status, Some(sent()), &check_ins),
                BillingEligibility::NotSent
            );
        }
        // Sent status without a sent audit entry is treated the same way.
        assert_eq!(
            calculate(CarePlanStatus::Sent, None, &check_ins),
            BillingEligibility::NotSent
        );
    }

    #[test]
    fn earliest_response_wins_and_calendar_dates_are_used() {
        // 15:30 on day 0 to 00:10 on day 8 is under 7.5 x 24h but 8 calendar days.
        let late_night = Utc.with_ymd_and_hms(2026, 4, 9, 0, 10, 0).unwrap();
        assert_eq!(
            calculate(CarePlanStatus::Sent, Some(sent()), &[answered(late_night, 1)]),
            BillingEligibility::Cpt99495
        );

        let check_ins = [
            answered(sent() + Duration::days(12), 2),
            answered(sent() + Duration::days(3), 1),
        ];
        assert_eq!(
            calculate(CarePlanStatus::Sent, Some(sent()), &check_ins),
            BillingEligibility::Cpt99496
        );
    }

    #[test]
    fn serializes_as_codes() {
        assert_eq!(
            serde_json::to_string(&BillingEligibility::Cpt99496).unwrap(),
            "\"99496\""
        );
        assert_eq!(
            serde_json::to_string(&BillingEligibility::PendingContact).unwrap(),
            "\"pending_contact\""
        );
    }
}
