//! Engine assembly.
//!
//! [`CareEngine`] wires one store, one clock and one configuration into every service. Binaries
//! build it once at startup and share it behind an `Arc`.

use std::sync::Arc;

use crate::access_token::AccessTokenManager;
use crate::clock::{Clock, SystemClock};
use crate::collaborators::{Notifier, TextProcessor};
use crate::config::CoreConfig;
use crate::repositories::billing::BillingService;
use crate::repositories::care_plans::CarePlanService;
use crate::repositories::check_ins::CheckInService;
use crate::repositories::directory::DirectoryService;
use crate::repositories::portal::PortalService;
use crate::repositories::reporting::ReportingService;
use crate::store::MemoryStore;

/// Shared handles every service needs.
#[derive(Clone, Debug)]
pub struct EngineContext {
    pub(crate) cfg: Arc<CoreConfig>,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) tokens: Arc<AccessTokenManager>,
}

impl EngineContext {
    pub fn new(cfg: Arc<CoreConfig>, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let tokens = Arc::new(AccessTokenManager::new(
            cfg.clone(),
            store.clone(),
            clock.clone(),
        ));
        Self {
            cfg,
            store,
            clock,
            tokens,
        }
    }

    pub fn cfg(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn tokens(&self) -> &AccessTokenManager {
        &self.tokens
    }
}

/// Every service of the lifecycle engine over one shared store.
pub struct CareEngine {
    pub directory: DirectoryService,
    pub care_plans: CarePlanService,
    pub check_ins: CheckInService,
    pub billing: BillingService,
    pub portal: PortalService,
    pub reporting: ReportingService,
    ctx: EngineContext,
}

impl CareEngine {
    /// Builds the engine.
    ///
    /// # Arguments
    ///
    /// * `cfg` - resolved core configuration
    /// * `clock` - time source for expiry, billing and completion rules
    /// * `text_processor` - simplification and translation collaborator
    /// * `notifier` - patient delivery collaborator
    pub fn new(
        cfg: Arc<CoreConfig>,
        clock: Arc<dyn Clock>,
        text_processor: Arc<dyn TextProcessor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let ctx = EngineContext::new(cfg, clock);
        Self {
            directory: DirectoryService::new(ctx.clone()),
            care_plans: CarePlanService::new(ctx.clone(), text_processor, notifier),
            check_ins: CheckInService::new(ctx.clone()),
            billing: BillingService::new(ctx.clone()),
            portal: PortalService::new(ctx.clone()),
            reporting: ReportingService::new(ctx.clone()),
            ctx,
        }
    }

    /// [`CareEngine::new`] on wall-clock time.
    pub fn with_system_clock(
        cfg: Arc<CoreConfig>,
        text_processor: Arc<dyn TextProcessor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::new(cfg, Arc::new(SystemClock), text_processor, notifier)
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }
}
