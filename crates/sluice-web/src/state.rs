//! Shared handler state.

use std::sync::Arc;

use sluice_core::LogStore;
use sluice_feeds::TailService;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LogStore>,
    pub tails: Arc<TailService>,
}

impl AppState {
    pub fn new(store: Arc<dyn LogStore>, tails: Arc<TailService>) -> Self {
        Self { store, tails }
    }
}
