//! Tenant scope and authorization.
//!
//! Every service reaches tenant data through this module. The checks are, in order:
//! 1. the static permission table: may this role perform this action at all,
//! 2. the tenant check: caller tenant must equal entity tenant (super admins exempt); plans and
//!    check-ins of another tenant look missing rather than forbidden,
//! 3. for interpreters, the plan's target language must be one they are qualified in.

use careplan_ids::{CarePlanId, CheckInId, TenantId, UserId};
use careplan_types::LanguageCode;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::care_plan::CarePlan;
use crate::store::{MemoryStore, PartitionHandle};
use crate::tenant::{Role, User};
use crate::{CarePlanError, CarePlanResult};

/// The authenticated staff member on whose behalf an operation runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub user_id: UserId,
    pub name: String,
    pub role: Role,
    pub tenant_id: Option<TenantId>,
    pub languages: BTreeSet<LanguageCode>,
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            name: user.name.to_string(),
            role: user.role,
            tenant_id: user.tenant_id,
            languages: user.languages.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    CreateDraft,
    Process,
    Approve,
    InterpreterReview,
    Send,
    MarkCompleted,
    Delete,
    ViewPlan,
    ScheduleCheckIn,
    ResolveAlert,
    ViewReports,
    ManageTenant,
    ProvisionTenant,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::CreateDraft => "create care plans",
            Action::Process => "process care plans",
            Action::Approve => "approve care plans",
            Action::InterpreterReview => "review translations",
            Action::Send => "send care plans",
            Action::MarkCompleted => "complete care plans",
            Action::Delete => "delete care plans",
            Action::ViewPlan => "view care plans",
            Action::ScheduleCheckIn => "schedule check-ins",
            Action::ResolveAlert => "resolve alerts",
            Action::ViewReports => "view reports",
            Action::ManageTenant => "manage tenant settings",
            Action::ProvisionTenant => "provision tenants",
        }
    }
}

const ALL_ROLES: &[Role] = &[Role::SuperAdmin, Role::Admin, Role::Clinician, Role::Interpreter];

/// Which roles may perform each action, independent of tenant.
const PERMISSIONS: &[(Action, &[Role])] = &[
    (Action::CreateDraft, &[Role::Clinician]),
    (Action::Process, &[Role::Clinician]),
    (Action::Approve, &[Role::Clinician]),
    (Action::InterpreterReview, &[Role::Interpreter]),
    (Action::Send, &[Role::Clinician]),
    (Action::MarkCompleted, &[Role::Admin, Role::Clinician, Role::SuperAdmin]),
    (Action::Delete, &[Role::Admin, Role::Clinician, Role::SuperAdmin]),
    (Action::ViewPlan, ALL_ROLES),
    (Action::ScheduleCheckIn, &[Role::Admin, Role::Clinician]),
    (Action::ResolveAlert, &[Role::Admin, Role::Clinician]),
    (Action::ViewReports, &[Role::Admin, Role::Clinician, Role::SuperAdmin]),
    (Action::ManageTenant, &[Role::Admin, Role::SuperAdmin]),
    (Action::ProvisionTenant, &[Role::SuperAdmin]),
];

/// Which tenants an actor may read across.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TenantFilter {
    All,
    Only(TenantId),
}

/// Zero-sized namespace for the authorization checks.
pub struct TenantScope;

impl TenantScope {
    pub fn permits(role: Role, action: Action) -> bool {
        PERMISSIONS
            .iter()
            .find(|(a, _)| *a == action)
            .is_some_and(|(_, roles)| roles.contains(&role))
    }

    /// Role check only, for actions that do not target a tenant (provisioning).
    pub fn authorize_role(actor: &Actor, action: Action) -> CarePlanResult<()> {
        if Self::permits(actor.role, action) {
            Ok(())
        } else {
            Err(CarePlanError::Forbidden(format!(
                "role {} may not {}",
                actor.role,
                action.name()
            )))
        }
    }

    /// Role check plus tenant check against `tenant_id`.
    pub fn authorize(actor: &Actor, action: Action, tenant_id: TenantId) -> CarePlanResult<()> {
        Self::authorize_role(actor, action)?;
        match (actor.role, actor.tenant_id) {
            (Role::SuperAdmin, _) => Ok(()),
            (_, Some(own)) if own == tenant_id => Ok(()),
            _ => Err(CarePlanError::Forbidden(
                "care plan belongs to another tenant".into(),
            )),
        }
    }

    /// Full check against a loaded plan, including interpreter language qualification.
    pub fn authorize_plan(actor: &Actor, action: Action, plan: &CarePlan) -> CarePlanResult<()> {
        Self::authorize(actor, action, plan.tenant_id)?;
        if actor.role != Role::Interpreter {
            return Ok(());
        }
        match &plan.target_language {
            Some(language) if actor.languages.contains(language) => Ok(()),
            Some(language) => Err(CarePlanError::Forbidden(format!(
                "interpreter is not qualified for language '{language}'"
            ))),
            None => Err(CarePlanError::Forbidden(
                "care plan has no translation to review".into(),
            )),
        }
    }

    /// Non-failing variant of [`TenantScope::authorize_plan`] used to filter listings.
    pub fn can_view(actor: &Actor, plan: &CarePlan) -> bool {
        Self::authorize_plan(actor, Action::ViewPlan, plan).is_ok()
    }

    pub fn tenant_filter(actor: &Actor, action: Action) -> CarePlanResult<TenantFilter> {
        Self::authorize_role(actor, action)?;
        match (actor.role, actor.tenant_id) {
            (Role::SuperAdmin, _) => Ok(TenantFilter::All),
            (_, Some(tenant_id)) => Ok(TenantFilter::Only(tenant_id)),
            (_, None) => Err(CarePlanError::Forbidden("user has no tenant".into())),
        }
    }

    /// Locate the partition owning `plan_id` after checking role and tenant.
    ///
    /// A plan in another tenant is reported exactly like a missing one.
    pub(crate) fn plan_partition(
        store: &MemoryStore,
        actor: &Actor,
        action: Action,
        plan_id: CarePlanId,
    ) -> CarePlanResult<PartitionHandle> {
        Self::authorize_role(actor, action)?;
        let tenant_id = store.plan_tenant(plan_id)?;
        if !Self::owns(actor, tenant_id) {
            return Err(CarePlanError::NotFound(format!("care plan {plan_id}")));
        }
        store.partition(tenant_id)
    }

    pub(crate) fn check_in_partition(
        store: &MemoryStore,
        actor: &Actor,
        action: Action,
        check_in_id: CheckInId,
    ) -> CarePlanResult<PartitionHandle> {
        Self::authorize_role(actor, action)?;
        let tenant_id = store.check_in_tenant(check_in_id)?;
        if !Self::owns(actor, tenant_id) {
            return Err(CarePlanError::NotFound(format!("check-in {check_in_id}")));
        }
        store.partition(tenant_id)
    }

    fn owns(actor: &Actor, tenant_id: TenantId) -> bool {
        actor.role == Role::SuperAdmin || actor.tenant_id == Some(tenant_id)
    }

    pub(crate) fn tenant_partition(
        store: &MemoryStore,
        actor: &Actor,
        action: Action,
        tenant_id: TenantId,
    ) -> CarePlanResult<PartitionHandle> {
        Self::authorize(actor, action, tenant_id)?;
        store.partition(tenant_id)
    }

    /// All partitions the actor may read for `action`.
    pub(crate) fn visible_partitions(
        store: &MemoryStore,
        actor: &Actor,
        action: Action,
    ) -> CarePlanResult<Vec<PartitionHandle>> {
        match Self::tenant_filter(actor, action)? {
            TenantFilter::All => store.all_partitions(),
            TenantFilter::Only(tenant_id) => Ok(vec![store.partition(tenant_id)?]),
        }
    }
}
