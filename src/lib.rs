//! Feedwarden
//!
//! Supervises many independently connecting, independently failing camera
//! sources, paces how often expensive content analysis runs against each of
//! them, and turns analysis results into deduplicated, rate-limited alerts.
//!
//! # Architecture
//!
//! Data flows leaf-first:
//!
//! 1. **Ingest**: a `StreamConnection` owns one media handle. Blocking reads run
//!    on a dedicated `FrameReader` thread per source, never on the scheduler.
//! 2. **Frame**: the newest frame lands in a single-slot `FrameBuffer` for pull
//!    consumers (live view, snapshots).
//! 3. **Analysis**: an `AnalysisTrigger` forwards every Nth frame to the
//!    external `AnalysisEngine`, with at most one analysis in flight per source.
//! 4. **Alert**: detections become candidate alerts, pass the per-source
//!    `AlertGate` cooldown, and are fanned out by the `AlertHub`.
//!
//! A `SourceSupervisor` composes the above for one source; the `Orchestrator`
//! owns the registry of supervisors and the alert log.
//!
//! # Module Structure
//!
//! - `source`: per-source record and status
//! - `frame`: immutable frame snapshots and the latest-frame slot
//! - `ingest`: media backends, connection lifecycle, dedicated read threads
//! - `analysis`: engine contract, cadence trigger, stub engines
//! - `alert`: alert model, cooldown gate, log and fan-out, notifiers
//! - `supervisor`, `orchestrator`: per-source actor and registry
//! - `config`: validated startup configuration

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod alert;
pub mod analysis;
pub mod config;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod orchestrator;
pub mod source;
pub mod supervisor;

pub use alert::{
    AlertCallback, AlertGate, AlertHub, AlertRecord, AlertSignature, AlertType, Admission,
    LogNotifier, Notifier, SubscriptionId,
};
pub use analysis::{
    AnalysisEngine, AnalysisTrigger, BoundingBox, CadenceDecision, CandidateAlert,
    DetectionEvent, DetectionOrigin, EngineRegistry, NullEngine, StubEngine,
};
pub use config::FeedwardenConfig;
pub use error::{Error, Result};
pub use frame::{Frame, FrameBuffer};
pub use ingest::{
    FrameReader, MediaBackend, MediaHandle, RtspBackend, StreamConnection, StreamTuning,
};
pub use orchestrator::Orchestrator;
pub use source::{SourceRecord, SourceState, SourceStatus};
pub use supervisor::{SourceStats, SourceSupervisor};

// -------------------- Identifiers --------------------

/// Opaque source identity. Allocated on `Orchestrator::add_source`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque alert identity, allocated when the gate admits an alert.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(String);

impl AlertId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AlertId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        let a = SourceId::generate();
        let b = SourceId::generate();
        assert_ne!(a, b);
        assert_ne!(AlertId::generate(), AlertId::generate());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = SourceId::from("cam-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"cam-1\"");
        assert_eq!(id.to_string(), "cam-1");
    }
}
