//! Per-source record and status.
//!
//! The record is mutated by the source's `StreamConnection` (status, error) and
//! its ingestion loop (last-frame time). The orchestrator only reads snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::SourceId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Snapshot of a source's identity and connection state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: SourceId,
    pub name: String,
    pub address: String,
    pub status: SourceStatus,
    pub error_message: Option<String>,
    pub last_frame_at: Option<DateTime<Utc>>,
}

impl SourceRecord {
    pub fn new(id: SourceId, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            address: address.into(),
            status: SourceStatus::Disconnected,
            error_message: None,
            last_frame_at: None,
        }
    }
}

/// Shared, lock-guarded handle to one source's record.
#[derive(Clone, Debug)]
pub struct SourceState {
    inner: Arc<Mutex<SourceRecord>>,
}

impl SourceState {
    pub fn new(record: SourceRecord) -> Self {
        Self {
            inner: Arc::new(Mutex::new(record)),
        }
    }

    pub fn snapshot(&self) -> SourceRecord {
        self.lock().clone()
    }

    pub fn id(&self) -> SourceId {
        self.lock().id.clone()
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn status(&self) -> SourceStatus {
        self.lock().status
    }

    pub(crate) fn set_connecting(&self) {
        self.lock().status = SourceStatus::Connecting;
    }

    pub(crate) fn set_connected(&self, at: DateTime<Utc>) {
        let mut record = self.lock();
        record.status = SourceStatus::Connected;
        record.error_message = None;
        record.last_frame_at = Some(at);
    }

    pub(crate) fn set_error(&self, message: impl Into<String>) {
        let mut record = self.lock();
        record.status = SourceStatus::Error;
        record.error_message = Some(message.into());
    }

    pub(crate) fn set_disconnected(&self) {
        self.lock().status = SourceStatus::Disconnected;
    }

    pub(crate) fn stamp_frame(&self, at: DateTime<Utc>) {
        self.lock().last_frame_at = Some(at);
    }

    // A panic while holding the record must not wedge reporting for the source.
    fn lock(&self) -> MutexGuard<'_, SourceRecord> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_disconnected() {
        let state = SourceState::new(SourceRecord::new(
            SourceId::from("cam"),
            "Cam1",
            "stub://cam",
        ));
        let record = state.snapshot();
        assert_eq!(record.status, SourceStatus::Disconnected);
        assert!(record.error_message.is_none());
        assert!(record.last_frame_at.is_none());
    }

    #[test]
    fn connected_clears_previous_error() {
        let state = SourceState::new(SourceRecord::new(SourceId::from("cam"), "Cam1", "x"));
        state.set_error("boom");
        assert_eq!(state.status(), SourceStatus::Error);

        let now = Utc::now();
        state.set_connecting();
        state.set_connected(now);
        let record = state.snapshot();
        assert_eq!(record.status, SourceStatus::Connected);
        assert!(record.error_message.is_none());
        assert_eq!(record.last_frame_at, Some(now));
    }
}
