use anyhow::{Context, Result};
use clap::Parser;
use contentgenie::ai::AiClient;
use contentgenie::channels::ChannelRegistry;
use contentgenie::dispatch::DispatchPolicy;
use contentgenie::fanout::Orchestrator;
use contentgenie::server::{build_router, AppState};
use contentgenie::{config, db};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/contentgenie.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let registry = Arc::new(ChannelRegistry::from_config(&cfg.services));
    let policy = DispatchPolicy::from_config(&cfg.dispatch);
    let orchestrator = Orchestrator::new(pool.clone(), registry, policy);

    let ai = Arc::new(AiClient::from_config(&cfg.ai));
    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState {
        pool,
        orchestrator,
        generator: ai.clone(),
        transcriber: ai,
        shutdown: shutdown.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&cfg.app.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.app.bind_addr))?;
    info!(addr = %cfg.app.bind_addr, "starting publish orchestrator");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down; in-flight publishes will finish");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
