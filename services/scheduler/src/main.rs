//! Flotilla scheduler entry point.
//!
//! Wires storage, recovery, the offer pipeline, and the admin API
//! together, then serves until the supervisor or the resource manager
//! takes us down.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flotilla_scheduler::api::{self, AppState};
use flotilla_scheduler::config::Config;
use flotilla_scheduler::driver::MockDriver;
use flotilla_scheduler::exit::{hard_exit, ExitCode};
use flotilla_scheduler::framework::FrameworkHandler;
use flotilla_scheduler::generator::{GeneratorMap, JsonGenerator, JSON_SPEC_TYPE};
use flotilla_scheduler::manager::RunManager;
use flotilla_scheduler::processor::OfferProcessor;
use flotilla_scheduler::queue::OfferQueue;
use flotilla_scheduler::reconcile::{ImplicitReconciler, ReconcilerConfig};
use flotilla_scheduler::registry::RunRegistry;
use flotilla_scheduler::router::OfferRouter;
use flotilla_scheduler::spec_store::SpecStore;
use flotilla_scheduler::storage::{Persister, SqlitePersister};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting flotilla scheduler");

    let config = Config::from_env()?;
    info!(
        framework = %config.framework_name,
        api_listen_addr = %config.api_listen_addr,
        uninstall = config.uninstall,
        "Configuration loaded"
    );

    // Opening the store asserts ownership of the framework's state; a
    // second scheduler instance pointed at the same data must not start.
    let db_path = format!("{}/scheduler.db", config.data_dir);
    let persister: Arc<dyn Persister> = match SqlitePersister::open(&db_path) {
        Ok(persister) => Arc::new(persister),
        Err(e) => {
            error!(path = %db_path, error = %e, "Failed to open state storage");
            hard_exit(ExitCode::LockUnavailable);
        }
    };

    let mut generators: GeneratorMap = GeneratorMap::new();
    generators.insert(
        JSON_SPEC_TYPE.to_string(),
        Arc::new(JsonGenerator::new(persister.clone())),
    );
    let generators = Arc::new(generators);
    if let Some(default_type) = &config.default_spec_type {
        if !generators.contains_key(default_type) {
            error!(
                default_type = %default_type,
                "Default spec type has no matching generator"
            );
            hard_exit(ExitCode::InitializationFailure);
        }
    }

    let registry = Arc::new(RunRegistry::new());
    let manager = Arc::new(RunManager::new(registry));
    let spec_store = Arc::new(SpecStore::new(persister.clone()));

    // Resume whatever was admitted before the last restart. Runs that were
    // mid-uninstall come back in uninstall mode and finish their cleanup.
    let recovered = match spec_store.recover(&generators).await {
        Ok(runs) => runs,
        Err(e) => {
            error!(error = %e, "Failed to recover stored runs");
            hard_exit(ExitCode::InitializationFailure);
        }
    };
    for run in recovered {
        if let Err(e) = manager.put(run).await {
            error!(error = %e, "Failed to re-admit recovered run");
            hard_exit(ExitCode::InitializationFailure);
        }
    }

    // The resource-manager transport is provided by the deployment; the
    // mock driver records calls and lets the scheduler run standalone.
    let driver = Arc::new(MockDriver::new());
    warn!("No resource-manager transport configured, using recording driver");

    let router = Arc::new(OfferRouter::new(
        manager.clone(),
        config.uninstall,
        Box::new(|run_name| {
            info!(run = %run_name, "Run uninstall complete");
        }),
    ));
    let queue = Arc::new(OfferQueue::new(config.offer_queue_capacity));
    let processor = Arc::new(OfferProcessor::new(
        driver.clone(),
        router.clone(),
        queue.clone(),
    ));
    let reconciler = Arc::new(ImplicitReconciler::new(
        driver.clone(),
        ReconcilerConfig::default(),
    ));
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handler = Arc::new(FrameworkHandler::new(
        driver,
        processor,
        router.clone(),
        persister.clone(),
        reconciler,
        shutdown_rx,
    ));
    if let Some(framework_id) = handler.stored_framework_id() {
        info!(framework_id = %framework_id, "Previously registered");
    }

    let state = AppState {
        manager,
        spec_store,
        generators,
        default_spec_type: config.default_spec_type.clone(),
        persister,
        router,
    };
    let app = api::create_router(state);

    let listener = match tokio::net::TcpListener::bind(&config.api_listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.api_listen_addr, error = %e, "Failed to bind API server");
            hard_exit(ExitCode::ApiServerError);
        }
    };
    info!(addr = %config.api_listen_addr, "API server listening");
    handler.set_api_ready();

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "API server failed");
        hard_exit(ExitCode::ApiServerError);
    }

    Ok(())
}
