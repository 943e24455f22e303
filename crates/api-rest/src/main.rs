//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the care plan REST API on its own.
//!
//! ## Intended use
//! Useful for development and debugging when you want the REST server with Swagger UI but none of
//! the workspace binary's wiring. Configuration is read from the environment (and `.env`); see
//! `api_rest::startup` for the variables.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the care plan REST API server
///
/// # Environment Variables
/// - `CAREPLAN_REST_ADDR`: Server address (default: "0.0.0.0:3000")
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the engine configuration is invalid,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?)
                .add_directive("careplan_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("CAREPLAN_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    tracing::info!("-- Starting care plan REST API on {}", addr);

    let startup = tokio::task::spawn_blocking(|| {
        api_rest::startup::build_engine(|key| std::env::var(key).ok())
    })
    .await??;
    api_rest::serve(&addr, startup.engine).await
}
