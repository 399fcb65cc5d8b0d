//! Offer envelopes and resource records.

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, OfferId, PersistenceId, ResourceId, TaskId};

/// A time-bounded bundle of resources presented by the resource manager.
///
/// An offer is presented to at most one accept-or-decline call; the
/// scheduler treats the id purely as identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub agent_id: AgentId,
    pub resources: Vec<Resource>,
}

impl Offer {
    pub fn new(id: impl Into<OfferId>, agent_id: impl Into<AgentId>) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            resources: Vec::new(),
        }
    }

    /// Builder-style helper for assembling offers in tests and synthetic
    /// per-service offers in the cleanup protocol.
    #[must_use]
    pub fn with_resources(mut self, resources: Vec<Resource>) -> Self {
        self.resources = resources;
        self
    }

    /// Returns a copy of this offer's envelope carrying only the provided
    /// resources. Used to show a service exactly the records that belong
    /// to it.
    #[must_use]
    pub fn subset(&self, resources: Vec<Resource>) -> Offer {
        Offer {
            id: self.id.clone(),
            agent_id: self.agent_id.clone(),
            resources,
        }
    }
}

/// A single resource record on an offer.
///
/// A record is either plain/unreserved (`reservation` absent), a reserved
/// scalar, or a reserved persistent volume (`volume` present). A reserved
/// record always carries a resource id; a volume additionally carries a
/// persistence id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource kind as named by the resource manager ("cpus", "mem",
    /// "ports", "disk", ...).
    pub name: String,
    /// Scalar quantity. Ranges (ports) are flattened to their span size;
    /// the scheduler never arithmetics on offered values.
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation: Option<Reservation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Volume>,
}

/// Reservation metadata attached to a reserved resource record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub role: String,
    pub principal: String,
    /// Name of the owning run, stamped into the reservation labels at
    /// reserve time. Absent on malformed records left by older schedulers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    pub resource_id: ResourceId,
}

/// Persistent-volume metadata attached to a reserved disk record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub persistence_id: PersistenceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_root: Option<String>,
}

impl Resource {
    /// An unreserved scalar record.
    pub fn unreserved(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            reservation: None,
            volume: None,
        }
    }

    /// A reserved scalar record owned by the named service.
    pub fn reserved(
        name: impl Into<String>,
        value: f64,
        role: impl Into<String>,
        principal: impl Into<String>,
        service_name: Option<String>,
        resource_id: impl Into<ResourceId>,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            reservation: Some(Reservation {
                role: role.into(),
                principal: principal.into(),
                service_name,
                resource_id: resource_id.into(),
            }),
            volume: None,
        }
    }

    /// A reserved persistent volume.
    #[allow(clippy::too_many_arguments)]
    pub fn persistent_volume(
        value: f64,
        role: impl Into<String>,
        principal: impl Into<String>,
        service_name: Option<String>,
        resource_id: impl Into<ResourceId>,
        persistence_id: impl Into<PersistenceId>,
        mount_root: Option<String>,
    ) -> Self {
        Self {
            name: "disk".to_string(),
            value,
            reservation: Some(Reservation {
                role: role.into(),
                principal: principal.into(),
                service_name,
                resource_id: resource_id.into(),
            }),
            volume: Some(Volume {
                persistence_id: persistence_id.into(),
                mount_root,
            }),
        }
    }

    /// Returns the reservation id, or `None` for unreserved records.
    #[must_use]
    pub fn resource_id(&self) -> Option<&ResourceId> {
        self.reservation.as_ref().map(|r| &r.resource_id)
    }

    /// Returns the persistence id, or `None` for non-volume records.
    #[must_use]
    pub fn persistence_id(&self) -> Option<&PersistenceId> {
        self.volume.as_ref().map(|v| &v.persistence_id)
    }

    /// Returns the owning run's name, or `None` for unreserved or
    /// malformed records.
    #[must_use]
    pub fn service_name(&self) -> Option<&str> {
        self.reservation
            .as_ref()
            .and_then(|r| r.service_name.as_deref())
    }

    /// True for reserved records (with or without a service label).
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.reservation.is_some()
    }
}

/// Description of a task to launch, as carried by LAUNCH operations.
///
/// The scheduler does not build these itself; runs hand them over inside
/// recommendations and the scheduler only forwards them to the resource
/// manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub name: String,
    pub agent_id: AgentId,
    pub resources: Vec<Resource>,
}
