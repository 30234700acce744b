//! Shared application state

use std::sync::Arc;

use myna_config::Settings;
use myna_pipeline::{ContextGraph, ModelExecutor, UnitDict};

/// Read-shared resources handed to every session
#[derive(Clone)]
pub struct AppState {
    /// The model executor, shared across all sessions
    pub executor: Arc<dyn ModelExecutor>,
    /// Unit dictionary
    pub dict: Arc<UnitDict>,
    /// Compiled context graph, if biasing is configured
    pub context_graph: Option<Arc<ContextGraph>>,
    /// Settings snapshot taken at startup
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(
        executor: Arc<dyn ModelExecutor>,
        dict: Arc<UnitDict>,
        context_graph: Option<Arc<ContextGraph>>,
        settings: Settings,
    ) -> Self {
        Self {
            executor,
            dict,
            context_graph,
            settings: Arc::new(settings),
        }
    }
}
