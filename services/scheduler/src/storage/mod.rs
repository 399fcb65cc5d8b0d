//! Path-keyed persistent storage.
//!
//! All scheduler state lives in a single namespaced key-value store:
//!
//! ```text
//! Specs/<specId>/Type               spec type label (UTF-8)
//! Specs/<specId>/Data               raw submission bytes
//! Services/<run>/Properties/...     per-run properties (spec-id, flags)
//! Services/<run>/FrameworkID        framework id, framework namespace only
//! Services/<run>/Tasks/<taskName>   task records
//! ```
//!
//! The SQLite implementation is the production store; the in-memory one
//! backs tests.

mod memory;
mod sqlite;

use std::collections::BTreeMap;

use thiserror::Error;

pub use memory::MemoryPersister;
pub use sqlite::SqlitePersister;

/// Path separator inside the store.
pub const PATH_SEPARATOR: char = '/';

/// Joins path segments with the store separator.
#[must_use]
pub fn join_path(segments: &[&str]) -> String {
    segments.join("/")
}

/// Errors from persister operations.
#[derive(Debug, Error)]
pub enum PersisterError {
    #[error("storage not found: {0}")]
    NotFound(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Byte-record storage keyed by slash-separated paths.
///
/// There is no transaction spanning multiple calls; callers that need
/// atomicity across several records use the batched `get_many`/`set_many`
/// forms, which execute as one storage round trip.
pub trait Persister: Send + Sync {
    /// Reads one record. `Ok(None)` when the path has no record.
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>, PersisterError>;

    /// Writes one record, replacing any existing value.
    fn set(&self, path: &str, value: &[u8]) -> Result<(), PersisterError>;

    /// Reads several records in one round trip. Missing paths are simply
    /// absent from the result map.
    fn get_many(&self, paths: &[String]) -> Result<BTreeMap<String, Vec<u8>>, PersisterError>;

    /// Writes several records in one round trip.
    fn set_many(&self, entries: &BTreeMap<String, Vec<u8>>) -> Result<(), PersisterError>;

    /// Deletes one record. Deleting a missing record is a no-op.
    fn delete(&self, path: &str) -> Result<(), PersisterError>;

    /// Deletes every record at or beneath `prefix`.
    fn delete_prefix(&self, prefix: &str) -> Result<(), PersisterError>;

    /// Returns the distinct child names directly beneath `prefix`, sorted.
    ///
    /// For a store containing `Services/a/x` and `Services/b/y`,
    /// `children("Services")` returns `["a", "b"]`.
    fn children(&self, prefix: &str) -> Result<Vec<String>, PersisterError>;
}

/// Extracts the set of direct child names from full paths under a prefix.
fn child_names<'a, I>(prefix: &str, paths: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let lead = format!("{prefix}{PATH_SEPARATOR}");
    let mut names: Vec<String> = Vec::new();
    for path in paths {
        if let Some(rest) = path.strip_prefix(&lead) {
            let name = rest.split(PATH_SEPARATOR).next().unwrap_or(rest);
            if !name.is_empty() && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    names
}
