use serde::Serialize;
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Simple health service shared by every API surface.
#[derive(Clone, Default)]
pub struct HealthService;

impl HealthService {
    pub fn new() -> Self {
        Self
    }

    /// Static health check; does not touch the engine.
    pub fn check_health() -> HealthRes {
        HealthRes {
            ok: true,
            message: "Care plan engine is alive".into(),
        }
    }
}
