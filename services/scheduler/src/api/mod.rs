//! HTTP admin surface.
//!
//! Serves the queue endpoints for listing, submitting, and uninstalling
//! runs, plus a health probe. Offer and status traffic never touches this
//! layer; it only reads the registry and drives admissions/uninstalls.

mod error;
mod health;
mod queue;

use std::sync::Arc;

use axum::{
    routing::{delete, get},
    Router,
};

use crate::generator::GeneratorMap;
use crate::manager::RunManager;
use crate::router::OfferRouter;
use crate::spec_store::SpecStore;
use crate::storage::Persister;

pub use error::ApiError;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<RunManager>,
    pub spec_store: Arc<SpecStore>,
    pub generators: Arc<GeneratorMap>,
    pub default_spec_type: Option<String>,
    pub persister: Arc<dyn Persister>,
    pub router: Arc<OfferRouter>,
}

/// Builds the admin router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(health::get_health))
        .route("/v1/queue", get(queue::list_runs).post(queue::submit_run))
        .route("/v1/queue/{run_name}", delete(queue::uninstall_run))
        .with_state(state)
}
