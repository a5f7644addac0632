//! gitdeploy — the daemon binary. Loads configuration, starts the engine,
//! and serves the admin/webhook HTTP API until interrupted.
//!
//! Webhook provider secrets are read from the environment rather than the
//! config file:
//!   GITDEPLOY_GITHUB_SECRET    — GitHub `X-Hub-Signature-256` HMAC secret
//!   GITDEPLOY_GITEA_SECRET     — Gitea `X-Gitea-Signature` HMAC secret
//!   GITDEPLOY_BITBUCKET_SECRET — optional Bitbucket query-param secret

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gitdeploy_config::Config;
use gitdeploy_server::{AppState, WebhookSecrets};
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "gitdeploy", version, about = "Git-webhook deploy orchestrator")]
struct Cli {
    /// Path to gitdeploy.toml. Defaults to searching upward from the
    /// current directory for a file with that name.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = match &cli.config {
        Some(p) => p.clone(),
        None => gitdeploy_config::find_config(&std::env::current_dir()?)
            .unwrap_or_else(gitdeploy_config::config_path),
    };
    gitdeploy_config::load_config(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

fn webhook_secrets_from_env() -> WebhookSecrets {
    WebhookSecrets {
        github: std::env::var("GITDEPLOY_GITHUB_SECRET").unwrap_or_default(),
        gitea: std::env::var("GITDEPLOY_GITEA_SECRET").unwrap_or_default(),
        bitbucket: std::env::var("GITDEPLOY_BITBUCKET_SECRET").ok(),
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gitdeploy=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let secrets = webhook_secrets_from_env();

    let (engine, _engine_join) = gitdeploy_engine::spawn(config.clone());
    let intake_tx = engine.intake_tx.clone();
    let addr = config.addr.clone();

    let state = AppState::new(Arc::new(engine), Arc::new(config));
    let app = gitdeploy_server::build_router(state, secrets, intake_tx);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!(%addr, "gitdeploy.listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("gitdeploy.shut_down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("gitdeploy.shutting_down");
}
