//! Shared fixtures for the service tests.

use careplan_ids::TenantId;
use careplan_types::{EmailAddress, LanguageCode, NonEmptyText};
use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::audit::AuditLogEntry;
use crate::care_plan::CarePlan;
use crate::clock::{Clock, ManualClock};
use crate::collaborators::{Notifier, PatientNotification, TextProcessor, UpstreamError};
use crate::config::CoreConfig;
use crate::content::{Appointment, Medication, PlanSections, ProcessedContent};
use crate::engine::CareEngine;
use crate::patient::PatientDetails;
use crate::repositories::care_plans::{NewCarePlan, SendOutcome};
use crate::repositories::directory::{NewTenant, NewUser};
use crate::review_policy::ApprovalRequest;
use crate::scope::Actor;
use crate::tenant::{InterpreterReviewMode, Role};

type Hook = Box<dyn FnOnce() + Send>;

pub(crate) fn sample_content(language: &LanguageCode) -> ProcessedContent {
    let sections = |diagnosis: &str, instruction: &str| PlanSections {
        diagnosis: diagnosis.to_string(),
        instructions: vec![instruction.to_string()],
        warnings: vec![],
        medications: vec![Medication {
            name: "Amoxicillin".into(),
            dose: Some("500 mg".into()),
            frequency: Some("3 times a day".into()),
            notes: None,
        }],
        appointments: vec![Appointment {
            description: "Follow-up".into(),
            when: Some("in 1 week".into()),
            location: None,
        }],
    };
    ProcessedContent {
        simplified: sections("Pneumonia", "Rest and drink fluids"),
        translated: sections(
            &format!("Pneumonia [{language}]"),
            &format!("Rest and drink fluids [{language}]"),
        ),
        back_translation: sections("Lung infection", "Rest and drink liquids"),
    }
}

#[derive(Default)]
pub(crate) struct StubTextProcessor {
    pub(crate) fail: AtomicBool,
    pub(crate) calls: AtomicUsize,
    hook: Mutex<Option<Hook>>,
}

impl StubTextProcessor {
    /// Run `hook` during the next call, before it returns.
    pub(crate) fn before_next_return(&self, hook: impl FnOnce() + Send + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }
}

impl TextProcessor for StubTextProcessor {
    fn process(
        &self,
        _source_content: &str,
        target_language: &LanguageCode,
    ) -> Result<ProcessedContent, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hook = self.hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(UpstreamError::Request {
                service: "text processor",
                message: "stub failure".into(),
            });
        }
        Ok(sample_content(target_language))
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub(crate) fail: AtomicBool,
    pub(crate) sent: Mutex<Vec<PatientNotification>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &PatientNotification) -> Result<(), UpstreamError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(UpstreamError::Status {
                service: "notifier",
                status: 503,
                body: "unavailable".into(),
            });
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// One tenant with an admin, a clinician and a Spanish/French interpreter.
pub(crate) struct Harness {
    pub(crate) engine: Arc<CareEngine>,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) processor: Arc<StubTextProcessor>,
    pub(crate) notifier: Arc<RecordingNotifier>,
    pub(crate) tenant_id: TenantId,
    pub(crate) root: Actor,
    pub(crate) admin: Actor,
    pub(crate) clinician: Actor,
    pub(crate) interpreter: Actor,
}

impl Harness {
    pub(crate) fn new(mode: InterpreterReviewMode) -> Self {
        Self::with_config(mode, CoreConfig::default())
    }

    pub(crate) fn with_config(mode: InterpreterReviewMode, cfg: CoreConfig) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        ));
        let processor = Arc::new(StubTextProcessor::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = Arc::new(CareEngine::new(
            Arc::new(cfg),
            clock.clone() as Arc<dyn Clock>,
            processor.clone(),
            notifier.clone(),
        ));

        let root_user = engine
            .directory
            .bootstrap_super_admin("Root", "root@example.org")
            .unwrap();
        let root = Actor::from(&root_user);
        let tenant = engine
            .directory
            .provision_tenant(
                &root,
                NewTenant {
                    name: "Riverside Clinic".into(),
                    is_demo: false,
                    interpreter_review_mode: mode,
                },
            )
            .unwrap();

        let mut harness = Self {
            engine,
            clock,
            processor,
            notifier,
            tenant_id: tenant.id,
            admin: root.clone(),
            clinician: root.clone(),
            interpreter: root.clone(),
            root,
        };
        harness.admin = harness.actor_in(tenant.id, Role::Admin, "admin@riverside.example.org", &[]);
        harness.clinician =
            harness.actor_in(tenant.id, Role::Clinician, "clinician@riverside.example.org", &[]);
        harness.interpreter = harness.actor_in(
            tenant.id,
            Role::Interpreter,
            "interpreter@riverside.example.org",
            &["es", "fr"],
        );
        harness
    }

    pub(crate) fn actor_in(
        &self,
        tenant_id: TenantId,
        role: Role,
        email: &str,
        languages: &[&str],
    ) -> Actor {
        let user = self
            .engine
            .directory
            .add_user(
                &self.root,
                NewUser {
                    name: format!("{role} {email}"),
                    email: email.to_string(),
                    role,
                    tenant_id: Some(tenant_id),
                    languages: languages.iter().map(|l| l.to_string()).collect(),
                },
            )
            .unwrap();
        Actor::from(&user)
    }

    /// Provision a second tenant and return its id.
    pub(crate) fn other_tenant(&self) -> TenantId {
        self.engine
            .directory
            .provision_tenant(
                &self.root,
                NewTenant {
                    name: "Lakeside Clinic".into(),
                    is_demo: true,
                    interpreter_review_mode: InterpreterReviewMode::Optional,
                },
            )
            .unwrap()
            .id
    }

    pub(crate) fn tenant_audit(&self) -> Vec<AuditLogEntry> {
        self.engine
            .care_plans
            .tenant_audit(&self.root, self.tenant_id)
            .unwrap()
    }

    pub(crate) fn draft(&self) -> CarePlan {
        self.engine
            .care_plans
            .create_draft(
                &self.clinician,
                NewCarePlan {
                    title: "Discharge after pneumonia".into(),
                    source_content: "Patient admitted with community-acquired pneumonia.".into(),
                },
            )
            .unwrap()
    }

    pub(crate) fn processed(&self, language: &str) -> CarePlan {
        let draft = self.draft();
        self.engine
            .care_plans
            .process(
                &self.clinician,
                draft.id,
                &LanguageCode::new(language).unwrap(),
            )
            .unwrap()
    }

    pub(crate) fn approved(&self) -> CarePlan {
        let plan = self.processed("en");
        self.engine
            .care_plans
            .approve(&self.clinician, plan.id, &ApprovalRequest::default())
            .unwrap()
    }

    pub(crate) fn sent(&self) -> SendOutcome {
        let plan = self.approved();
        self.engine
            .care_plans
            .send(&self.clinician, plan.id, patient_details("ana.lopez@example.org"))
            .unwrap()
    }
}

pub(crate) fn patient_details(email: &str) -> PatientDetails {
    PatientDetails {
        first_name: NonEmptyText::new("Ana").unwrap(),
        last_name: NonEmptyText::new("Lopez").unwrap(),
        email: EmailAddress::parse(email).unwrap(),
        phone: None,
        preferred_language: None,
    }
}

/// The token embedded in a send outcome.
pub(crate) fn token_of(outcome: &SendOutcome) -> String {
    outcome.care_plan.access_token.clone().unwrap()
}
