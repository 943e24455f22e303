use std::sync::Arc;
use std::time::Duration;

use careplan_core::config::CompletionPolicy;
use careplan_core::scope::Actor;
use careplan_core::CareEngine;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_SWEEP_SECS: u64 = 3600;
const MAX_SWEEP_SECS: u64 = 7 * 24 * 3600;

/// Main entry point for the care plan application
///
/// Runs concurrently:
/// - the REST server (configurable via CAREPLAN_REST_ADDR)
/// - a completion sweep that applies the completion policy to sent plans, when the policy is not
///   `manual` and a bootstrap super admin exists to run it as
///
/// # Environment Variables
/// - `CAREPLAN_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `CAREPLAN_COMPLETION_SWEEP_SECS`: seconds between sweeps (default: 3600)
/// - everything read by `api_rest::startup::build_engine`
///
/// # Returns
/// * `Ok(())` - If the servers start and run successfully
/// * `Err(anyhow::Error)` - If startup or the REST server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("careplan=info".parse()?)
                .add_directive("careplan_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("CAREPLAN_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let sweep_every = sweep_interval(std::env::var("CAREPLAN_COMPLETION_SWEEP_SECS").ok())?;

    let startup = tokio::task::spawn_blocking(|| {
        api_rest::startup::build_engine(|key| std::env::var(key).ok())
    })
    .await??;
    let engine = startup.engine;

    tracing::info!("++ Starting care plan REST server on {}", rest_addr);
    tracing::info!(
        "++ Completion policy: {}",
        engine.context().cfg().completion_policy()
    );

    let sweeper = match (
        engine.context().cfg().completion_policy(),
        startup.super_admin,
    ) {
        (CompletionPolicy::Manual, _) => None,
        (_, None) => {
            tracing::warn!("completion policy set but no bootstrap super admin; sweep disabled");
            None
        }
        (_, Some(admin)) => Some(tokio::spawn(completion_sweep(
            engine.clone(),
            Actor::from(&admin),
            sweep_every,
        ))),
    };

    let rest_server = tokio::spawn(async move { api_rest::serve(&rest_addr, engine).await });

    let rest_result = rest_server.await?;
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    rest_result
}

/// Parse `CAREPLAN_COMPLETION_SWEEP_SECS`: between one second and one week.
fn sweep_interval(value: Option<String>) -> anyhow::Result<Duration> {
    let secs = match value {
        Some(secs) => secs.trim().parse::<u64>()?,
        None => DEFAULT_SWEEP_SECS,
    };
    if !(1..=MAX_SWEEP_SECS).contains(&secs) {
        anyhow::bail!("CAREPLAN_COMPLETION_SWEEP_SECS must be between 1 and {MAX_SWEEP_SECS}");
    }
    Ok(Duration::from_secs(secs))
}

/// Periodically complete every sent plan the completion policy allows.
async fn completion_sweep(engine: Arc<CareEngine>, actor: Actor, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let engine = engine.clone();
        let actor = actor.clone();
        match tokio::task::spawn_blocking(move || engine.care_plans.complete_due(&actor)).await {
            Ok(Ok(done)) if !done.is_empty() => {
                tracing::info!(count = done.len(), "completion sweep closed care plans");
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "completion sweep failed"),
            Err(e) => tracing::error!(error = %e, "completion sweep task panicked"),
        }
    }
}
