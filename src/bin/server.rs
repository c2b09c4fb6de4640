//! `devtrace-server` — process entry point.
//!
//! Wires the Store, Broadcaster, Baseline Cache, Watcher Supervisor,
//! Correlator, Architecture Tracker, Ingest and Query facades together
//! and serves the HTTP surface, `spec.md` §6. Mirrors the teacher's
//! `src/bin` pattern of a thin binary delegating everything to the
//! library crate.

use std::sync::Arc;

use clap::Parser;
use devtrace::architecture::ArchitectureTracker;
use devtrace::baseline::BaselineCache;
use devtrace::broadcaster::Broadcaster;
use devtrace::config::Config;
use devtrace::correlator::Correlator;
use devtrace::http::{self, AppState};
use devtrace::ingest::Ingest;
use devtrace::llm::{LlmClient, NoopLlmClient, OpenAiLlmClient};
use devtrace::query::Query;
use devtrace::store::Store;
use devtrace::supervisor::Supervisor;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "devtrace-server", about = "Localhost development-activity recorder")]
struct Args {
    /// Override PORT from the environment.
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Override DB_PATH from the environment.
    #[arg(long, env = "DB_PATH")]
    db_path: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "devtrace-server exited with a fatal error");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db_path) = args.db_path {
        config.db_path = db_path.into();
    }
    let config = Arc::new(config);

    let store = Arc::new(Store::open(&config.db_path)?);
    let broadcaster = Arc::new(Broadcaster::new());
    let baseline = Arc::new(BaselineCache::new());

    let llm: Arc<dyn LlmClient> = match &config.openai_api_key {
        Some(key) => {
            tracing::info!("LLM correlation enabled (OpenAI)");
            Arc::new(OpenAiLlmClient::new(
                key.clone(),
                config.openai_matching_model.clone(),
                config.openai_model.clone(),
                config.llm_timeout_secs,
            ))
        }
        None => {
            tracing::warn!("OPENAI_API_KEY not set, correlation and architecture impact analysis are disabled");
            Arc::new(NoopLlmClient)
        }
    };

    let architecture = Arc::new(ArchitectureTracker::new(store.clone(), broadcaster.clone(), llm.clone()));

    let supervisor = Arc::new(Supervisor::new(
        store.clone(),
        broadcaster.clone(),
        baseline.clone(),
        architecture.clone(),
        config.clone(),
    ));

    let correlator = Arc::new(Correlator::new(
        store.clone(),
        llm.clone(),
        config.worker_concurrency,
        config.correlation_window_secs,
    ));

    let ingest = Arc::new(Ingest::new(store.clone(), broadcaster.clone(), correlator.clone()));
    let query = Arc::new(Query::new(store.clone(), supervisor.clone()));

    supervisor.start_active_projects().await?;

    let state = AppState {
        store,
        broadcaster,
        supervisor,
        ingest,
        query,
        architecture,
        correlator,
        config: config.clone(),
    };

    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "devtrace listening");
    axum::serve(listener, router).await?;

    Ok(())
}
