//! Interpreter review routing.
//!
//! When a clinician approves a plan in `pending_review`, the plan either goes straight to
//! `approved` or to `interpreter_review`. The decision is a lookup in [`ROUTING_TABLE`] keyed by
//! the tenant's [`InterpreterReviewMode`] and whether the clinician asked to skip review, so the
//! policy can be read (and tested) without following the transition code.

use careplan_types::LanguageCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::tenant::InterpreterReviewMode;
use crate::{CarePlanError, CarePlanResult};

/// Options supplied with an approval.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    #[serde(default)]
    pub skip_interpreter_review: Option<bool>,
    #[serde(default)]
    pub override_justification: Option<String>,
}

impl ApprovalRequest {
    fn wants_skip(&self) -> bool {
        self.skip_interpreter_review.unwrap_or(false)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewRoute {
    Approve,
    InterpreterReview,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteDecision {
    pub route: ReviewRoute,
    /// Present only when an optional review was skipped; recorded verbatim in the audit trail.
    pub justification: Option<String>,
    /// Why this route was taken, for the audit payload.
    pub reason: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Route(ReviewRoute),
    /// Skip allowed only with a non-empty justification.
    SkipWithJustification,
    /// Skip requested where the tenant forbids it.
    RejectSkip,
}

struct Rule {
    mode: InterpreterReviewMode,
    skip_requested: bool,
    outcome: Outcome,
}

const ROUTING_TABLE: &[Rule] = &[
    Rule {
        mode: InterpreterReviewMode::Disabled,
        skip_requested: false,
        outcome: Outcome::Route(ReviewRoute::Approve),
    },
    Rule {
        mode: InterpreterReviewMode::Disabled,
        skip_requested: true,
        outcome: Outcome::Route(ReviewRoute::Approve),
    },
    Rule {
        mode: InterpreterReviewMode::Optional,
        skip_requested: false,
        outcome: Outcome::Route(ReviewRoute::InterpreterReview),
    },
    Rule {
        mode: InterpreterReviewMode::Optional,
        skip_requested: true,
        outcome: Outcome::SkipWithJustification,
    },
    Rule {
        mode: InterpreterReviewMode::Required,
        skip_requested: false,
        outcome: Outcome::Route(ReviewRoute::InterpreterReview),
    },
    Rule {
        mode: InterpreterReviewMode::Required,
        skip_requested: true,
        outcome: Outcome::RejectSkip,
    },
];

/// Routing policy with the deployment's review-exempt languages.
#[derive(Clone, Debug)]
pub struct ReviewPolicy {
    exempt_languages: BTreeSet<LanguageCode>,
}

impl ReviewPolicy {
    pub fn new(exempt_languages: BTreeSet<LanguageCode>) -> Self {
        Self { exempt_languages }
    }

    /// Decide where an approval from `pending_review` goes.
    ///
    /// # Errors
    ///
    /// - [`CarePlanError::InvalidTransition`] if skipping is requested under `required`.
    /// - [`CarePlanError::Validation`] if skipping under `optional` without a justification.
    pub fn route(
        &self,
        mode: InterpreterReviewMode,
        target_language: &LanguageCode,
        request: &ApprovalRequest,
    ) -> CarePlanResult<RouteDecision> {
        if self.exempt_languages.contains(target_language) {
            return Ok(RouteDecision {
                route: ReviewRoute::Approve,
                justification: None,
                reason: "no translation to verify",
            });
        }

        let skip_requested = request.wants_skip();
        let rule = ROUTING_TABLE
            .iter()
            .find(|r| r.mode == mode && r.skip_requested == skip_requested)
            .ok_or_else(|| {
                CarePlanError::Config(format!("no review routing rule for mode {mode}"))
            })?;

        match rule.outcome {
            Outcome::Route(route) => Ok(RouteDecision {
                route,
                justification: None,
                reason: match route {
                    ReviewRoute::Approve => "interpreter review disabled",
                    ReviewRoute::InterpreterReview => "interpreter review requested",
                },
            }),
            Outcome::SkipWithJustification => {
                let justification = request
                    .override_justification
                    .as_ref()
                    .filter(|j| !j.trim().is_empty())
                    .cloned()
                    .ok_or_else(|| {
                        CarePlanError::Validation(
                            "skipping interpreter review requires an override justification"
                                .into(),
                        )
                    })?;
                Ok(RouteDecision {
                    route: ReviewRoute::Approve,
                    justification: Some(justification),
                    reason: "interpreter review skipped by override",
                })
            }
            Outcome::RejectSkip => Err(CarePlanError::InvalidTransition(format!(
                "interpreter review is required for '{target_language}' and cannot be skipped"
            ))),
        }
    }
}
