//! Offer data model and pure offer-evaluation helpers.
//!
//! This crate is I/O-free. It defines the envelope types received from the
//! cluster resource manager (offers, resource records, operations), the
//! reservation inventory that sorts reserved resources by owning service,
//! and the resource cleaner that plans the release of unexpected
//! reservations.

pub mod cleaner;
pub mod ids;
pub mod inventory;
pub mod offer;
pub mod operation;
pub mod util;

pub use cleaner::ResourceCleaner;
pub use ids::{AgentId, FrameworkId, OfferId, PersistenceId, ResourceId, TaskId};
pub use inventory::{OfferResources, ReservationInventory};
pub use offer::{Offer, Reservation, Resource, TaskInfo, Volume};
pub use operation::{Operation, Recommendation};
