//! In-memory, tenant-partitioned storage.
//!
//! ## Unit of work
//! Every tenant owns one [`TenantPartition`] behind its own mutex. A state-changing operation
//! holds that mutex across read, validate and write, so the precondition it checked is still true
//! when it commits. Tenants never contend with each other: the partition map lock is held only long
//! enough to clone an `Arc`.
//!
//! ## Lock order
//! partition mutex, then the global indexes. Index readers never hold an index lock while taking a
//! partition mutex.

use careplan_ids::{CarePlanId, CheckInId, PatientId, TenantId, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::audit::{AuditEvent, AuditLogEntry, AuditTrail};
use crate::care_plan::CarePlan;
use crate::check_in::CheckIn;
use crate::patient::Patient;
use crate::tenant::{Role, Tenant, User};
use crate::{CarePlanError, CarePlanResult};

/// Everything belonging to one tenant.
#[derive(Debug)]
pub struct TenantPartition {
    pub(crate) tenant: Tenant,
    pub(crate) plans: HashMap<CarePlanId, CarePlan>,
    pub(crate) patients: HashMap<PatientId, Patient>,
    pub(crate) check_ins: HashMap<CheckInId, CheckIn>,
    pub(crate) audit: AuditTrail,
}

impl TenantPartition {
    fn new(tenant: Tenant) -> Self {
        Self {
            tenant,
            plans: HashMap::new(),
            patients: HashMap::new(),
            check_ins: HashMap::new(),
            audit: AuditTrail::default(),
        }
    }

    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub(crate) fn plan(&self, plan_id: CarePlanId) -> CarePlanResult<&CarePlan> {
        self.plans
            .get(&plan_id)
            .ok_or_else(|| CarePlanError::NotFound(format!("care plan {plan_id}")))
    }

    pub(crate) fn check_in(&self, check_in_id: CheckInId) -> CarePlanResult<&CheckIn> {
        self.check_ins
            .get(&check_in_id)
            .ok_or_else(|| CarePlanError::NotFound(format!("check-in {check_in_id}")))
    }

    /// Check-ins of one plan ordered by attempt number.
    pub(crate) fn check_ins_for(&self, plan_id: CarePlanId) -> Vec<CheckIn> {
        let mut check_ins: Vec<CheckIn> = self
            .check_ins
            .values()
            .filter(|c| c.care_plan_id == plan_id)
            .cloned()
            .collect();
        check_ins.sort_by_key(|c| c.attempt_number);
        check_ins
    }

    pub(crate) fn plan_audit(&self, plan_id: CarePlanId) -> Vec<AuditLogEntry> {
        self.audit.for_plan(plan_id)
    }

    /// Write `plan` and its audit entry together. Infallible: all validation happens before.
    pub(crate) fn commit_plan(
        &mut self,
        mut plan: CarePlan,
        event: AuditEvent,
        now: DateTime<Utc>,
    ) -> CarePlan {
        plan.version += 1;
        plan.updated_at = now;
        self.plans.insert(plan.id, plan.clone());
        self.audit.append(self.tenant.id, event, now);
        plan
    }

    pub(crate) fn commit_check_in(
        &mut self,
        check_in: CheckIn,
        event: AuditEvent,
        now: DateTime<Utc>,
    ) -> CheckIn {
        self.check_ins.insert(check_in.id, check_in.clone());
        self.audit.append(self.tenant.id, event, now);
        check_in
    }

    pub(crate) fn append_audit(&mut self, event: AuditEvent, now: DateTime<Utc>) {
        self.audit.append(self.tenant.id, event, now);
    }
}

/// Reference persistence for the engine.
#[derive(Debug, Default)]
pub struct MemoryStore {
    partitions: RwLock<HashMap<TenantId, Arc<Mutex<TenantPartition>>>>,
    users: RwLock<HashMap<UserId, User>>,
    plan_index: RwLock<HashMap<CarePlanId, TenantId>>,
    check_in_index: RwLock<HashMap<CheckInId, TenantId>>,
    token_index: RwLock<HashMap<String, CarePlanId>>,
}

pub(crate) type PartitionHandle = Arc<Mutex<TenantPartition>>;

pub(crate) fn lock(partition: &Mutex<TenantPartition>) -> CarePlanResult<MutexGuard<'_, TenantPartition>> {
    partition.lock().map_err(|_| CarePlanError::LockPoisoned)
}

fn read<T>(lock: &RwLock<T>) -> CarePlanResult<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| CarePlanError::LockPoisoned)
}

fn write<T>(lock: &RwLock<T>) -> CarePlanResult<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| CarePlanError::LockPoisoned)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn create_partition(
        &self,
        tenant: Tenant,
        event: AuditEvent,
        now: DateTime<Utc>,
    ) -> CarePlanResult<()> {
        let mut partitions = write(&self.partitions)?;
        if partitions.contains_key(&tenant.id) {
            return Err(CarePlanError::Validation(format!(
                "tenant {} already exists",
                tenant.id
            )));
        }
        let mut partition = TenantPartition::new(tenant);
        partition.append_audit(event, now);
        partitions.insert(partition.tenant.id, Arc::new(Mutex::new(partition)));
        Ok(())
    }

    pub(crate) fn partition(&self, tenant_id: TenantId) -> CarePlanResult<PartitionHandle> {
        read(&self.partitions)?
            .get(&tenant_id)
            .cloned()
            .ok_or_else(|| CarePlanError::NotFound(format!("tenant {tenant_id}")))
    }

    /// Partitions in tenant id order, so sweeps and exports are deterministic.
    pub(crate) fn all_partitions(&self) -> CarePlanResult<Vec<PartitionHandle>> {
        let partitions = read(&self.partitions)?;
        let mut ids: Vec<&TenantId> = partitions.keys().collect();
        ids.sort();
        Ok(ids.into_iter().map(|id| partitions[id].clone()).collect())
    }

    pub(crate) fn user(&self, user_id: UserId) -> CarePlanResult<Option<User>> {
        Ok(read(&self.users)?.get(&user_id).cloned())
    }

    /// Users ordered by creation time.
    pub(crate) fn users(&self) -> CarePlanResult<Vec<User>> {
        let mut users: Vec<User> = read(&self.users)?.values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    pub(crate) fn insert_user(&self, user: User) -> CarePlanResult<()> {
        let mut users = write(&self.users)?;
        if users.values().any(|u| u.email == user.email) {
            return Err(CarePlanError::Validation(format!(
                "a user with email {} already exists",
                user.email
            )));
        }
        users.insert(user.id, user);
        Ok(())
    }

    /// Insert `user` as the first super admin, checked and written under one lock.
    pub(crate) fn insert_first_super_admin(&self, user: User) -> CarePlanResult<()> {
        let mut users = write(&self.users)?;
        if users.values().any(|u| u.role == Role::SuperAdmin) {
            return Err(CarePlanError::Validation(
                "a super admin already exists".into(),
            ));
        }
        if users.values().any(|u| u.email == user.email) {
            return Err(CarePlanError::Validation(format!(
                "a user with email {} already exists",
                user.email
            )));
        }
        users.insert(user.id, user);
        Ok(())
    }

    pub(crate) fn plan_tenant(&self, plan_id: CarePlanId) -> CarePlanResult<TenantId> {
        read(&self.plan_index)?
            .get(&plan_id)
            .copied()
            .ok_or_else(|| CarePlanError::NotFound(format!("care plan {plan_id}")))
    }

    pub(crate) fn check_in_tenant(&self, check_in_id: CheckInId) -> CarePlanResult<TenantId> {
        read(&self.check_in_index)?
            .get(&check_in_id)
            .copied()
            .ok_or_else(|| CarePlanError::NotFound(format!("check-in {check_in_id}")))
    }

    pub(crate) fn token_plan(&self, token: &str) -> CarePlanResult<Option<CarePlanId>> {
        Ok(read(&self.token_index)?.get(token).copied())
    }

    pub(crate) fn index_plan(&self, plan_id: CarePlanId, tenant_id: TenantId) -> CarePlanResult<()> {
        write(&self.plan_index)?.insert(plan_id, tenant_id);
        Ok(())
    }

    /// Drop a deleted plan and its token from the indexes. Both write locks are taken before
    /// either index changes.
    pub(crate) fn unindex_plan(&self, plan_id: CarePlanId, token: Option<&str>) -> CarePlanResult<()> {
        let mut plans = write(&self.plan_index)?;
        let mut tokens = write(&self.token_index)?;
        plans.remove(&plan_id);
        if let Some(token) = token {
            tokens.remove(token);
        }
        Ok(())
    }

    pub(crate) fn index_check_in(
        &self,
        check_in_id: CheckInId,
        tenant_id: TenantId,
    ) -> CarePlanResult<()> {
        write(&self.check_in_index)?.insert(check_in_id, tenant_id);
        Ok(())
    }

    /// Index a delivery: `new_token` replaces `old_token` for `plan_id`, and the new check-ins
    /// point at `tenant_id`. Both write locks are taken before either index changes.
    pub(crate) fn index_delivery(
        &self,
        plan_id: CarePlanId,
        tenant_id: TenantId,
        old_token: Option<&str>,
        new_token: &str,
        check_in_ids: &[CheckInId],
    ) -> CarePlanResult<()> {
        let mut tokens = write(&self.token_index)?;
        let mut check_ins = write(&self.check_in_index)?;
        if let Some(old) = old_token {
            tokens.remove(old);
        }
        tokens.insert(new_token.to_string(), plan_id);
        for check_in_id in check_in_ids {
            check_ins.insert(*check_in_id, tenant_id);
        }
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Leave the token index poisoned, as if a writer had panicked.
    pub(crate) fn poison_token_index(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.token_index.write();
            panic!("token index writer panicked");
        }));
    }
}
