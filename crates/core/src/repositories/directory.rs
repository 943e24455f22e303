//! Tenant and staff provisioning.
//!
//! Tenant-level changes (new tenant, new user, review mode change) are audited in the tenant's own
//! log with no care plan id. Super admins belong to no tenant, so creating one is logged via
//! `tracing` only.

use careplan_ids::{TenantId, UserId};
use careplan_types::{EmailAddress, LanguageCode, NonEmptyText};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;

use crate::audit::{AuditAction, AuditEvent};
use crate::engine::EngineContext;
use crate::scope::{Action, Actor, TenantFilter, TenantScope};
use crate::store::lock;
use crate::tenant::{InterpreterReviewMode, Role, Tenant, User};
use crate::{CarePlanError, CarePlanResult};

#[derive(Clone, Debug, Deserialize)]
pub struct NewTenant {
    pub name: String,
    #[serde(default)]
    pub is_demo: bool,
    #[serde(default)]
    pub interpreter_review_mode: InterpreterReviewMode,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    /// Only meaningful for interpreters.
    #[serde(default)]
    pub languages: Vec<String>,
}

#[derive(Serialize)]
struct UserProvisionedDetails<'a> {
    user_id: UserId,
    role: Role,
    languages: &'a BTreeSet<LanguageCode>,
}

#[derive(Clone, Debug)]
pub struct DirectoryService {
    ctx: EngineContext,
}

impl DirectoryService {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Create the first super admin of a fresh deployment.
    ///
    /// # Errors
    ///
    /// [`CarePlanError::Validation`] if a super admin already exists or the input is invalid.
    pub fn bootstrap_super_admin(&self, name: &str, email: &str) -> CarePlanResult<User> {
        let user = User {
            id: UserId::new(),
            name: NonEmptyText::new(name)?,
            email: EmailAddress::parse(email)?,
            role: Role::SuperAdmin,
            tenant_id: None,
            languages: BTreeSet::new(),
            created_at: self.ctx.clock.now(),
        };
        self.ctx.store.insert_first_super_admin(user.clone())?;
        tracing::info!(user_id = %user.id, "super admin bootstrapped");
        Ok(user)
    }

    pub fn provision_tenant(&self, actor: &Actor, new: NewTenant) -> CarePlanResult<Tenant> {
        TenantScope::authorize_role(actor, Action::ProvisionTenant)?;
        let now = self.ctx.clock.now();
        let tenant = Tenant {
            id: TenantId::new(),
            name: NonEmptyText::new(&new.name)?,
            is_demo: new.is_demo,
            interpreter_review_mode: new.interpreter_review_mode,
            created_at: now,
        };
        let event = AuditEvent::new(
            AuditAction::TenantProvisioned,
            None,
            Some(actor.user_id),
            json!({
                "name": tenant.name,
                "is_demo": tenant.is_demo,
                "interpreter_review_mode": tenant.interpreter_review_mode,
            }),
        )?;
        self.ctx.store.create_partition(tenant.clone(), event, now)?;
        tracing::info!(tenant_id = %tenant.id, "tenant provisioned");
        Ok(tenant)
    }

    /// Add a staff member.
    ///
    /// Super admins may add any role to any tenant. Tenant admins may add admins, clinicians and
    /// interpreters to their own tenant.
    ///
    /// # Errors
    ///
    /// - [`CarePlanError::Forbidden`] if the actor may not manage the target tenant or role.
    /// - [`CarePlanError::Validation`] if the membership invariant is broken, the email is taken,
    ///   or an interpreter has no valid languages.
    pub fn add_user(&self, actor: &Actor, new: NewUser) -> CarePlanResult<User> {
        if new.role == Role::SuperAdmin && actor.role != Role::SuperAdmin {
            return Err(CarePlanError::Forbidden(
                "only super admins may create super admins".into(),
            ));
        }
        User::check_membership(new.role, new.tenant_id)?;

        let languages = if new.role == Role::Interpreter {
            let languages = new
                .languages
                .iter()
                .map(LanguageCode::new)
                .collect::<Result<BTreeSet<_>, _>>()?;
            if languages.is_empty() {
                return Err(CarePlanError::Validation(
                    "interpreters need at least one qualified language".into(),
                ));
            }
            languages
        } else {
            BTreeSet::new()
        };

        let user = User {
            id: UserId::new(),
            name: NonEmptyText::new(&new.name)?,
            email: EmailAddress::parse(&new.email)?,
            role: new.role,
            tenant_id: new.tenant_id,
            languages,
            created_at: self.ctx.clock.now(),
        };

        let Some(tenant_id) = user.tenant_id else {
            TenantScope::authorize_role(actor, Action::ProvisionTenant)?;
            self.ctx.store.insert_user(user.clone())?;
            tracing::info!(user_id = %user.id, "super admin added");
            return Ok(user);
        };

        let handle =
            TenantScope::tenant_partition(&self.ctx.store, actor, Action::ManageTenant, tenant_id)?;
        let mut partition = lock(&handle)?;
        let event = AuditEvent::new(
            AuditAction::UserProvisioned,
            None,
            Some(actor.user_id),
            UserProvisionedDetails {
                user_id: user.id,
                role: user.role,
                languages: &user.languages,
            },
        )?;
        self.ctx.store.insert_user(user.clone())?;
        partition.append_audit(event, user.created_at);
        tracing::info!(user_id = %user.id, tenant_id = %tenant_id, role = %user.role, "user added");
        Ok(user)
    }

    pub fn set_interpreter_review_mode(
        &self,
        actor: &Actor,
        tenant_id: TenantId,
        mode: InterpreterReviewMode,
    ) -> CarePlanResult<Tenant> {
        let handle =
            TenantScope::tenant_partition(&self.ctx.store, actor, Action::ManageTenant, tenant_id)?;
        let mut partition = lock(&handle)?;
        let previous = partition.tenant.interpreter_review_mode;
        if previous == mode {
            return Ok(partition.tenant.clone());
        }
        let event = AuditEvent::new(
            AuditAction::InterpreterReviewModeChanged,
            None,
            Some(actor.user_id),
            json!({ "from": previous, "to": mode }),
        )?;
        partition.tenant.interpreter_review_mode = mode;
        partition.append_audit(event, self.ctx.clock.now());
        tracing::info!(tenant_id = %tenant_id, from = %previous, to = %mode, "interpreter review mode changed");
        Ok(partition.tenant.clone())
    }

    /// Resolve an authenticated user id to an [`Actor`].
    ///
    /// # Errors
    ///
    /// [`CarePlanError::Forbidden`] if no such user exists.
    pub fn resolve(&self, user_id: UserId) -> CarePlanResult<Actor> {
        self.ctx
            .store
            .user(user_id)?
            .map(|user| Actor::from(&user))
            .ok_or_else(|| CarePlanError::Forbidden(format!("unknown user {user_id}")))
    }

    pub fn tenant(&self, actor: &Actor, tenant_id: TenantId) -> CarePlanResult<Tenant> {
        let handle =
            TenantScope::tenant_partition(&self.ctx.store, actor, Action::ViewPlan, tenant_id)?;
        let partition = lock(&handle)?;
        Ok(partition.tenant.clone())
    }

    pub fn tenants(&self, actor: &Actor) -> CarePlanResult<Vec<Tenant>> {
        TenantScope::visible_partitions(&self.ctx.store, actor, Action::ViewPlan)?
            .iter()
            .map(|handle| -> CarePlanResult<Tenant> { Ok(lock(handle)?.tenant.clone()) })
            .collect()
    }

    /// Staff visible to an admin of their tenant, or to a super admin across all tenants.
    pub fn users(&self, actor: &Actor) -> CarePlanResult<Vec<User>> {
        let filter = TenantScope::tenant_filter(actor, Action::ManageTenant)?;
        Ok(self
            .ctx
            .store
            .users()?
            .into_iter()
            .filter(|u| match filter {
                TenantFilter::All => true,
                TenantFilter::Only(tenant_id) => u.tenant_id == Some(tenant_id),
            })
            .collect())
    }
}
