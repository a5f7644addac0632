//! # gitdeploy-server
//!
//! The admin HTTP API (`/api/admin/*`, `/api/local/jobs/*`) plus the mount
//! point for the inbound webhook adapters from `gitdeploy-webhook`. Talks
//! to the engine exclusively through [`gitdeploy_engine::EngineHandle`].

pub mod error;
pub mod handlers;
pub mod pytest;
pub mod router;
pub mod state;

pub use router::{build_router, WebhookSecrets};
pub use state::AppState;
