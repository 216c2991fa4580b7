mod api;
mod collector;
mod config;
mod db;
mod error;
mod estimator;
mod evaluator;
mod pricing;
mod providers;
mod selector;
mod state;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::ProviderLatency;
use crate::api::routes::{router, ApiState};
use crate::collector::{CollectionOrchestrator, CollectorSettings, Scheduler};
use crate::config::{Config, CHANNEL_CAPACITY};
use crate::db::writer::DbWriter;
use crate::error::Result;
use crate::estimator::ProbabilityEstimator;
use crate::evaluator::PickEvaluator;
use crate::providers::teams::TeamDirectory;
use crate::state::GameStore;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", cfg.db_path)).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- In-memory state, hydrated from the last committed cycle ---
    let store = GameStore::new();
    db::models::load_into(&pool, &store).await?;

    // --- Providers ---
    let teams = Arc::new(match &cfg.team_aliases_path {
        Some(path) => TeamDirectory::load(path)?,
        None => TeamDirectory::with_defaults(),
    });
    let client = providers::http_client(&cfg)?;
    let provider_set = providers::build(&cfg, client, Arc::clone(&teams));
    if cfg.odds_api_key.is_none() {
        warn!("ODDS_API_KEY not set; odds steps will fail with auth errors until it is configured");
    }

    // --- Persistence handoff ---
    let health = Arc::new(HealthState::new());
    let (persist_tx, persist_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let writer = DbWriter::new(pool.clone(), persist_rx, Arc::clone(&health));
    let writer_task = tokio::spawn(async move { writer.run().await });

    // --- Collection ---
    let orchestrator = CollectionOrchestrator::new(
        provider_set,
        Arc::clone(&store),
        Arc::new(ProviderLatency::new()),
        health,
        Some(persist_tx),
        CollectorSettings::from_config(&cfg),
    );
    let scheduler = Scheduler::start(
        Arc::clone(&orchestrator),
        cfg.sports.clone(),
        Duration::from_secs(cfg.collect_interval_secs),
        Duration::from_secs(cfg.odds_refresh_secs),
    );

    // --- HTTP API server ---
    let evaluator = PickEvaluator::new(
        store,
        ProbabilityEstimator::new(teams),
        cfg.kelly_cap,
        cfg.kelly_multiplier,
    );
    let api_state = ApiState {
        orchestrator: Arc::clone(&orchestrator),
        evaluator: Arc::new(evaluator),
        scheduler: scheduler.handle(),
        sports: cfg.sports.clone(),
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down collection");
    scheduler.shutdown().await;
    // The writer exits once the last sender, held by the orchestrator, is gone.
    drop(orchestrator);
    if let Err(e) = writer_task.await {
        warn!("DB writer task ended abnormally: {e}");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
