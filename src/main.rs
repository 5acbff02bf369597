mod api;
mod collector;
mod config;
mod dataset;
mod error;
mod merger;
mod orchestrator;
mod predictor;
mod state;
mod types;
mod weighting;

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::collector::ProcessCollector;
use crate::config::Config;
use crate::error::Result;
use crate::merger::DatasetMerger;
use crate::orchestrator::{Orchestrator, Settings, Strategies};
use crate::predictor::{AdvancedPredictor, SimplePredictor};
use crate::weighting::{GeminiScorer, HeuristicScorer, RelevanceScorer};

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
    tokio::fs::create_dir_all(cfg.raw_dir()).await?;
    tokio::fs::create_dir_all(cfg.processed_dir()).await?;
    info!("Data directories ready under {}", cfg.data_dir.display());

    // --- Strategies ---
    let ai = match &cfg.scorer_api_key {
        Some(key) => {
            info!("AI weighting enabled (model {})", cfg.scorer_model);
            let scorer = GeminiScorer::new(
                key.clone(),
                cfg.scorer_api_url.clone(),
                cfg.scorer_model.clone(),
                cfg.scorer_batch_size,
            );
            Some(Arc::new(scorer) as Arc<dyn RelevanceScorer>)
        }
        None => {
            warn!("GOOGLE_API_KEY not set; runs requesting AI weighting will be rejected");
            None
        }
    };
    let strategies = Strategies {
        heuristic: Arc::new(HeuristicScorer),
        ai,
        simple: Arc::new(SimplePredictor),
        advanced: Arc::new(AdvancedPredictor),
    };

    // --- Collaborators ---
    let collector = ProcessCollector::new(&cfg.collector_cmd, cfg.collector_headless);
    info!(
        "Collector command: {} (headless={})",
        cfg.collector_cmd.join(" "),
        cfg.collector_headless
    );

    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(collector),
        Arc::new(DatasetMerger),
        strategies,
        Settings::from_config(&cfg),
        Arc::clone(&health),
        Arc::clone(&latency),
    ));

    // HTTP API server
    let app = router(ApiState {
        orchestrator,
        health,
        latency,
    });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
