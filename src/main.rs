use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use sqlx::migrate::Migrator;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use carbon_ledger::chain::{CreditLedger, EvmLedger};
use carbon_ledger::config::Config;
use carbon_ledger::estimator::RemoteEstimator;
use carbon_ledger::{create_app, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Setup logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Database pool
    let pool = db::create_pool(&config).await?;

    // Run migrations
    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    // Ledger client; bad chain config fails startup rather than lingering
    // as a null handle.
    let ledger = EvmLedger::from_config(&config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize ledger: {}", e))?;
    match ledger.operator_address() {
        Some(operator) => tracing::info!(
            "Ledger initialized: contract {}, operator {}",
            ledger.contract_address(),
            operator
        ),
        None => tracing::warn!(
            "Ledger initialized read-only (no PRIVATE_KEY); minting disabled"
        ),
    }

    let estimator = RemoteEstimator::new(config.estimator_url.clone());
    tracing::info!("Remote estimator configured at {}", config.estimator_url);

    let app_state = AppState {
        db: pool,
        ledger: Arc::new(ledger),
        estimator,
    };
    let app = create_app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
