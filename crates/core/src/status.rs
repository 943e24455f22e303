//! Care plan workflow states and the transition table.
//!
//! ```text
//! draft -> pending_review -> approved ---------------------------> sent -> completed
//!                  |  ^                                        ^
//!                  v  | (request changes)                      |
//!            interpreter_review -> interpreter_approved --------+
//! ```
//!
//! [`CarePlanStatus::transition`] is the only place that knows which moves exist. Guards that
//! depend on who is asking or on tenant policy live in the services; this table only answers
//! "is this move possible from here".

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CarePlanError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarePlanStatus {
    Draft,
    PendingReview,
    InterpreterReview,
    InterpreterApproved,
    Approved,
    Sent,
    Completed,
}

/// A requested workflow move.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transition {
    Process,
    /// Move to `approved`, either directly from review or as the final approval after an
    /// interpreter signed off.
    Approve,
    RouteToInterpreter,
    InterpreterApprove,
    RequestChanges,
    Send,
    Complete,
}

impl Transition {
    pub const ALL: [Transition; 7] = [
        Transition::Process,
        Transition::Approve,
        Transition::RouteToInterpreter,
        Transition::InterpreterApprove,
        Transition::RequestChanges,
        Transition::Send,
        Transition::Complete,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Transition::Process => "process",
            Transition::Approve => "approve",
            Transition::RouteToInterpreter => "route to interpreter review",
            Transition::InterpreterApprove => "interpreter-approve",
            Transition::RequestChanges => "request changes on",
            Transition::Send => "send",
            Transition::Complete => "complete",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} a care plan in status '{from}'")]
pub struct InvalidTransition {
    pub from: CarePlanStatus,
    pub action: &'static str,
}

impl CarePlanStatus {
    pub const ALL: [CarePlanStatus; 7] = [
        CarePlanStatus::Draft,
        CarePlanStatus::PendingReview,
        CarePlanStatus::InterpreterReview,
        CarePlanStatus::InterpreterApproved,
        CarePlanStatus::Approved,
        CarePlanStatus::Sent,
        CarePlanStatus::Completed,
    ];

    /// Apply `transition`, returning the new status or the rejected move.
    pub fn transition(self, transition: Transition) -> Result<CarePlanStatus, InvalidTransition> {
        use CarePlanStatus::*;

        match (self, transition) {
            (Draft, Transition::Process) => Ok(PendingReview),
            (PendingReview, Transition::Approve) => Ok(Approved),
            (PendingReview, Transition::RouteToInterpreter) => Ok(InterpreterReview),
            (InterpreterReview, Transition::InterpreterApprove) => Ok(InterpreterApproved),
            (InterpreterReview, Transition::RequestChanges) => Ok(PendingReview),
            (InterpreterApproved, Transition::Approve) => Ok(Approved),
            (Approved, Transition::Send) => Ok(Sent),
            (Sent, Transition::Complete) => Ok(Completed),
            (from, transition) => Err(InvalidTransition {
                from,
                action: transition.name(),
            }),
        }
    }

    /// Plans the patient has never seen may be deleted.
    pub fn is_deletable(self) -> bool {
        !self.has_reached_patient()
    }

    /// `sent` or `completed`: the patient has been contacted and the record is permanent.
    pub fn has_reached_patient(self) -> bool {
        matches!(self, CarePlanStatus::Sent | CarePlanStatus::Completed)
    }

    pub fn check_deletable(self) -> Result<(), InvalidTransition> {
        if self.is_deletable() {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self,
                action: "delete",
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CarePlanStatus::Draft => "draft",
            CarePlanStatus::PendingReview => "pending_review",
            CarePlanStatus::InterpreterReview => "interpreter_review",
            CarePlanStatus::InterpreterApproved => "interpreter_approved",
            CarePlanStatus::Approved => "approved",
            CarePlanStatus::Sent => "sent",
            CarePlanStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for CarePlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CarePlanStatus {
    type Err = CarePlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CarePlanStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| CarePlanError::Validation(format!("unknown care plan status '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CarePlanStatus::*;

    const ALLOWED: &[(CarePlanStatus, Transition, CarePlanStatus)] = &[
        (Draft, Transition::Process, PendingReview),
        (PendingReview, Transition::Approve, Approved),
        (PendingReview, Transition::RouteToInterpreter, InterpreterReview),
        (InterpreterReview, Transition::InterpreterApprove, InterpreterApproved),
        (InterpreterReview, Transition::RequestChanges, PendingReview),
        (InterpreterApproved, Transition::Approve, Approved),
        (Approved, Transition::Send, Sent),
        (Sent, Transition::Complete, Completed),
    ];

    #[test]
    fn enumerated_transitions_succeed() {
        for (from, transition, to) in ALLOWED {
            assert_eq!(from.transition(*transition), Ok(*to), "{from} via {transition:?}");
        }
    }

    #[test]
    fn every_other_pair_is_invalid() {
        for from in CarePlanStatus::ALL {
            for transition in Transition::ALL {
                if ALLOWED.iter().any(|(f, t, _)| *f == from && *t == transition) {
                    continue;
                }
                let err = from.transition(transition).expect_err("must be rejected");
                assert_eq!(err.from, from);
                assert_eq!(err.action, transition.name());
            }
        }
    }

    #[test]
    fn only_contacted_plans_are_permanent() {
        for status in CarePlanStatus::ALL {
            let permanent = matches!(status, Sent | Completed);
            assert_eq!(status.is_deletable(), !permanent, "{status}");
            assert_eq!(status.check_deletable().is_err(), permanent);
        }
    }

    #[test]
    fn status_text_round_trips() {
        for status in CarePlanStatus::ALL {
            assert_eq!(status.as_str().parse::<CarePlanStatus>().unwrap(), status);
        }
        assert_eq!(
            serde_json::to_string(&InterpreterApproved).unwrap(),
            "\"interpreter_approved\""
        );
    }
}
