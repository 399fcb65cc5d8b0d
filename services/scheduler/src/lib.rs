//! Flotilla scheduler core.
//!
//! The scheduler registers with a cluster resource manager and hosts many
//! service runs concurrently. Offers arrive on a single callback, pass
//! through a bounded queue into a single consumer, and are fanned out to
//! every hosted run in a fixed order. Whatever reserved resources nobody
//! claims are reclaimed, and runs can be torn down through a multi-phase
//! uninstall that survives process restarts.

pub mod accept;
pub mod api;
pub mod config;
pub mod driver;
pub mod exit;
pub mod framework;
pub mod generator;
pub mod kill;
pub mod manager;
pub mod processor;
pub mod queue;
pub mod reconcile;
pub mod registry;
pub mod router;
pub mod run;
pub mod spec_store;
pub mod state;
pub mod storage;
pub mod uninstall;
