//! Patient check-ins and the alerts derived from them.

use careplan_ids::{CarePlanId, CheckInId, PatientId, TenantId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CarePlanError;

/// Traffic-light answer to "how are you doing?".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInResponse {
    Green,
    Yellow,
    Red,
}

impl CheckInResponse {
    /// Yellow and red answers need staff follow-up.
    pub fn raises_alert(self) -> bool {
        matches!(self, CheckInResponse::Yellow | CheckInResponse::Red)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckInResponse::Green => "green",
            CheckInResponse::Yellow => "yellow",
            CheckInResponse::Red => "red",
        }
    }
}

impl fmt::Display for CheckInResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckInResponse {
    type Err = CarePlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "green" => Ok(CheckInResponse::Green),
            "yellow" => Ok(CheckInResponse::Yellow),
            "red" => Ok(CheckInResponse::Red),
            other => Err(CarePlanError::Validation(format!(
                "check-in response must be green, yellow or red, got '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckIn {
    pub id: CheckInId,
    pub tenant_id: TenantId,
    pub care_plan_id: CarePlanId,
    pub patient_id: PatientId,
    /// 1-based and gap-free per care plan.
    pub attempt_number: u32,
    pub scheduled_for: DateTime<Utc>,
    pub response: Option<CheckInResponse>,
    pub responded_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub alert_created: bool,
    pub alert_resolved: bool,
    pub alert_resolved_at: Option<DateTime<Utc>>,
    pub alert_resolved_by: Option<UserId>,
}

impl CheckIn {
    pub(crate) fn scheduled(
        tenant_id: TenantId,
        care_plan_id: CarePlanId,
        patient_id: PatientId,
        attempt_number: u32,
        scheduled_for: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CheckInId::new(),
            tenant_id,
            care_plan_id,
            patient_id,
            attempt_number,
            scheduled_for,
            response: None,
            responded_at: None,
            notes: None,
            alert_created: false,
            alert_resolved: false,
            alert_resolved_at: None,
            alert_resolved_by: None,
        }
    }

    pub fn has_open_alert(&self) -> bool {
        self.alert_created && !self.alert_resolved
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.response.is_none() && self.scheduled_for <= now
    }
}
