//! Typed identifiers for resource-manager entities.
//!
//! All of these arrive from the resource manager as opaque strings; the
//! newtypes exist so that an offer id can never be passed where an agent id
//! is expected. Task ids additionally embed the owning run's name, which
//! the scheduler extracts when routing status updates.

use serde::{Deserialize, Serialize};

/// Separator used when composing task ids from run and task names.
pub const TASK_ID_DELIMITER: &str = "__";

/// Defines a string-backed identifier newtype.
///
/// Generates `new()`, `as_str()`, `Display`, `FromStr`, serde support, and
/// the usual ordering/hashing traits. Identifiers are opaque: no structure
/// is assumed beyond non-emptiness.
macro_rules! define_str_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps the provided raw identifier value.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the raw identifier value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_string()))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

define_str_id!(
    /// Identifier of a single offer. Unique per `resource_offers` call.
    OfferId
);
define_str_id!(
    /// Identifier of the agent (host) an offer originates from.
    AgentId
);
define_str_id!(
    /// Identifier attached to a reserved resource.
    ResourceId
);
define_str_id!(
    /// Identifier attached to a persistent volume.
    PersistenceId
);
define_str_id!(
    /// Identifier of a launched task.
    TaskId
);
define_str_id!(
    /// Framework identifier assigned by the resource manager on registration.
    FrameworkId
);

impl TaskId {
    /// Composes a task id of the form `<run>__<task>__<suffix>`.
    pub fn for_run(run_name: &str, task_name: &str, suffix: &str) -> Self {
        Self(format!(
            "{run_name}{TASK_ID_DELIMITER}{task_name}{TASK_ID_DELIMITER}{suffix}"
        ))
    }

    /// Extracts the owning run's name from a task id.
    ///
    /// Runs label their tasks with their own name on submission; a task id
    /// that does not follow the `<run>__<task>...` layout yields `None`
    /// rather than an error, since malformed ids routinely show up in
    /// status reconciliation for long-dead tasks.
    #[must_use]
    pub fn run_name(&self) -> Option<&str> {
        let (run, rest) = self.0.split_once(TASK_ID_DELIMITER)?;
        if run.is_empty() || rest.is_empty() {
            return None;
        }
        Some(run)
    }
}
