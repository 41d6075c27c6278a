//! Error taxonomy for orchestrator-facing operations.
//!
//! Lower layers (media backends, engines, notifiers, configuration) return
//! `anyhow::Result`. Callers of the orchestrator get this enum so they can
//! branch on not-found versus connection failures.

use crate::{AlertId, SourceId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown source id on remove, start, stop or query.
    #[error("source not found: {0}")]
    SourceNotFound(SourceId),

    /// Unknown alert id on acknowledge.
    #[error("alert not found: {0}")]
    AlertNotFound(AlertId),

    /// The source could not be opened or its test read failed.
    #[error("failed to connect source {source_id}: {message}")]
    Connection { source_id: SourceId, message: String },

    /// Starting another source would exceed the configured limit.
    #[error("source capacity reached ({limit} running)")]
    Capacity { limit: usize },

    /// A blocking worker could not be spawned or joined.
    #[error("source worker failed: {0}")]
    Worker(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::SourceNotFound(_) | Error::AlertNotFound(_))
    }
}
