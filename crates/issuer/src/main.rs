use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use license_issuer::{server, IssuerConfig, IssuerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "license_issuer=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting license issuer");

    dotenvy::dotenv().ok();
    let config = IssuerConfig::from_env()?;

    info!(
        "Validation: {}",
        if config.enable_external_network { "external authority" } else { "local key" }
    );
    info!("Listening on: {}:{}", config.host, config.port);

    let sweep_interval = config.sweep_interval;
    let state = Arc::new(IssuerState::new(config).await?);

    // Picks up licenses left behind by an interrupted attempt.
    let sweeper = state.reconciler.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            for (key, result) in sweeper.sweep().await {
                match result {
                    Ok(report) => info!("✓ Swept license {}: {}", key, report.outcome),
                    Err(e) => warn!("✗ Failed to sweep license {}: {}", key, e),
                }
            }
        }
    });

    server::run(state).await?;
    Ok(())
}
