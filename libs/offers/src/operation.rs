//! Operations and recommendations.

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, OfferId};
use crate::offer::{Offer, Resource, TaskInfo};

/// An operation to perform against an accepted offer.
///
/// Within one accept call the resource lifecycle ordering must hold:
/// RESERVE -> CREATE -> DESTROY -> UNRESERVE, with launches grouped with
/// their enclosing reserve/create block. The scheduler preserves whatever
/// order recommendations arrive in; producers are responsible for emitting
/// them lifecycle-ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Reserve { resources: Vec<Resource> },
    Create { volume: Resource },
    Destroy { volume: Resource },
    Unreserve { resource: Resource },
    Launch { tasks: Vec<TaskInfo> },
    LaunchGroup { tasks: Vec<TaskInfo> },
}

impl Operation {
    /// Short name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Reserve { .. } => "RESERVE",
            Operation::Create { .. } => "CREATE",
            Operation::Destroy { .. } => "DESTROY",
            Operation::Unreserve { .. } => "UNRESERVE",
            Operation::Launch { .. } => "LAUNCH",
            Operation::LaunchGroup { .. } => "LAUNCH_GROUP",
        }
    }
}

/// A scheduler decision: perform `operation` against the identified offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub offer_id: OfferId,
    pub agent_id: AgentId,
    pub operation: Operation,
}

impl Recommendation {
    pub fn new(offer: &Offer, operation: Operation) -> Self {
        Self {
            offer_id: offer.id.clone(),
            agent_id: offer.agent_id.clone(),
            operation,
        }
    }

    /// A DESTROY recommendation releasing the provided persistent volume.
    pub fn destroy(offer: &Offer, volume: Resource) -> Self {
        Self::new(offer, Operation::Destroy { volume })
    }

    /// An UNRESERVE recommendation releasing the provided reservation.
    pub fn unreserve(offer: &Offer, resource: Resource) -> Self {
        Self::new(offer, Operation::Unreserve { resource })
    }
}
