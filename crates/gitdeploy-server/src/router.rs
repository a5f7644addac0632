//! Full application router: the admin API, the local report callback, and
//! the three webhook provider adapters mounted under `/api/webhooks`.

use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{jobs, local_report, logs, promote, repos};
use crate::state::AppState;

/// Shared secrets for the inbound provider adapters. Not part of
/// `gitdeploy_config::Config`: the core engine has no notion of these,
/// they exist purely to authenticate the intake HTTP surface.
#[derive(Clone, Default)]
pub struct WebhookSecrets {
    pub github: String,
    pub gitea: String,
    pub bitbucket: Option<String>,
}

/// Body size above which a webhook POST is rejected outright, before JSON
/// parsing. Generous relative to any realistic push payload.
const MAX_WEBHOOK_BODY_BYTES: usize = 2 * 1024 * 1024;

pub fn build_router(state: AppState, secrets: WebhookSecrets, intake_tx: tokio::sync::mpsc::Sender<gitdeploy_types::GitRef>) -> Router {
    let admin = Router::new()
        .route("/api/admin/repos", get(repos::list_repos))
        .route("/api/admin/jobs", get(jobs::list_jobs).post(jobs::request_kill))
        .route("/api/admin/logs/:id", get(logs::get_log))
        .route("/api/admin/promote", post(promote::promote))
        .route("/api/local/jobs/:id", post(local_report::post_report))
        .with_state(state);

    let webhooks = Router::new()
        .nest(
            "/api/webhooks/github",
            gitdeploy_webhook::github_router(secrets.github, intake_tx.clone()),
        )
        .nest(
            "/api/webhooks/gitea",
            gitdeploy_webhook::gitea_router(secrets.gitea, intake_tx.clone()),
        )
        .nest(
            "/api/webhooks/bitbucket",
            gitdeploy_webhook::bitbucket_router(secrets.bitbucket, intake_tx),
        );

    admin
        .merge(webhooks)
        .layer(RequestBodyLimitLayer::new(MAX_WEBHOOK_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
}
