use std::sync::Arc;

use gitdeploy_config::Config;
use gitdeploy_engine::EngineHandle;

/// Shared across every handler. Cloning is cheap: both fields are `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<EngineHandle>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(engine: Arc<EngineHandle>, config: Arc<Config>) -> Self {
        Self { engine, config }
    }
}
