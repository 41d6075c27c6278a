//! Lifecycle of one source's media handle.
//!
//! State machine:
//!
//! ```text
//! Disconnected --connect--> Connecting --test read ok--> Connected
//!                           Connecting --failure-------> Error
//! any ----------disconnect----------------------------> Disconnected
//! ```
//!
//! All methods block. Callers on the async side go through `spawn_blocking`
//! or the source's `FrameReader` thread.

use std::sync::Arc;

use super::{MediaBackend, MediaHandle, StreamTuning};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::source::SourceState;

pub struct StreamConnection {
    state: SourceState,
    backend: Arc<dyn MediaBackend>,
    tuning: StreamTuning,
    handle: Option<Box<dyn MediaHandle>>,
    /// Bumped on every `connect`; lets a stale reader thread recognise that its
    /// handle was replaced.
    session: u64,
}

impl StreamConnection {
    pub fn new(state: SourceState, backend: Arc<dyn MediaBackend>, tuning: StreamTuning) -> Self {
        Self {
            state,
            backend,
            tuning,
            handle: None,
            session: 0,
        }
    }

    pub fn state(&self) -> &SourceState {
        &self.state
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// Open the source and prove it with one test read.
    ///
    /// Any previous handle is released first. On success the test frame is
    /// returned so the caller can seed its frame buffer.
    pub fn connect(&mut self) -> Result<Frame> {
        self.handle = None;
        self.session += 1;

        let record = self.state.snapshot();
        self.state.set_connecting();
        log::info!(
            "StreamConnection: connecting {} ({}) via {}",
            record.name,
            record.address,
            self.backend.name()
        );

        let mut handle = match self.backend.open(&record.address, &self.tuning) {
            Ok(handle) => handle,
            Err(e) => return Err(self.fail(format!("{:#}", e))),
        };

        match handle.read_frame() {
            Ok(Some(frame)) => {
                self.state.set_connected(frame.captured_at);
                self.handle = Some(handle);
                log::info!("StreamConnection: {} connected", record.name);
                Ok(frame)
            }
            Ok(None) => Err(self.fail("failed to read test frame from stream".to_string())),
            Err(e) => Err(self.fail(format!("test read failed: {:#}", e))),
        }
    }

    /// Blocking read. Never fails: misses and I/O errors come back as `None`.
    pub fn read(&mut self) -> Option<Frame> {
        let handle = self.handle.as_mut()?;
        match handle.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!(
                    "StreamConnection: read from {} failed: {:#}",
                    self.state.name(),
                    e
                );
                None
            }
        }
    }

    /// Release the handle and mark the source disconnected. Safe from any state.
    pub fn disconnect(&mut self) {
        let had_handle = self.handle.take().is_some();
        self.state.set_disconnected();
        if had_handle {
            log::info!("StreamConnection: {} disconnected", self.state.name());
        }
    }

    fn fail(&mut self, message: String) -> Error {
        // The half-opened handle (if any) was dropped by the caller's scope.
        self.handle = None;
        let record = self.state.snapshot();
        log::error!(
            "StreamConnection: failed to connect {} ({}): {}",
            record.name,
            record.address,
            message
        );
        self.state.set_error(message.clone());
        Error::Connection {
            source_id: record.id,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::RtspBackend;
    use crate::source::{SourceRecord, SourceStatus};
    use crate::SourceId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn connection(address: &str) -> StreamConnection {
        let state = SourceState::new(SourceRecord::new(SourceId::from("cam"), "Cam1", address));
        let tuning = StreamTuning {
            width: 16,
            height: 8,
            ..StreamTuning::default()
        };
        StreamConnection::new(state, Arc::new(RtspBackend::new()), tuning)
    }

    /// Records the status observed at every step the backend is involved in.
    struct ObservingBackend {
        state: SourceState,
        seen: Arc<Mutex<Vec<SourceStatus>>>,
        dropped: Arc<AtomicUsize>,
        test_frame: bool,
    }

    struct ObservingHandle {
        state: SourceState,
        seen: Arc<Mutex<Vec<SourceStatus>>>,
        dropped: Arc<AtomicUsize>,
        test_frame: bool,
    }

    impl MediaBackend for ObservingBackend {
        fn name(&self) -> &'static str {
            "observing"
        }

        fn open(&self, _address: &str, _tuning: &StreamTuning) -> anyhow::Result<Box<dyn MediaHandle>> {
            self.seen.lock().unwrap().push(self.state.status());
            Ok(Box::new(ObservingHandle {
                state: self.state.clone(),
                seen: self.seen.clone(),
                dropped: self.dropped.clone(),
                test_frame: self.test_frame,
            }))
        }
    }

    impl MediaHandle for ObservingHandle {
        fn read_frame(&mut self) -> anyhow::Result<Option<Frame>> {
            self.seen.lock().unwrap().push(self.state.status());
            Ok(self.test_frame.then(|| Frame::new(vec![1, 2, 3], 1, 1)))
        }
    }

    impl Drop for ObservingHandle {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn observed(test_frame: bool) -> (StreamConnection, Arc<Mutex<Vec<SourceStatus>>>, Arc<AtomicUsize>) {
        let state = SourceState::new(SourceRecord::new(SourceId::from("cam"), "Cam1", "mock://"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dropped = Arc::new(AtomicUsize::new(0));
        let backend = ObservingBackend {
            state: state.clone(),
            seen: seen.clone(),
            dropped: dropped.clone(),
            test_frame,
        };
        let conn = StreamConnection::new(state, Arc::new(backend), StreamTuning::default());
        (conn, seen, dropped)
    }

    #[test]
    fn connect_goes_through_connecting_before_connected() {
        let (mut conn, seen, _) = observed(true);
        conn.connect().expect("connect");

        // Both the open and the test read happened while Connecting.
        assert_eq!(
            *seen.lock().unwrap(),
            vec![SourceStatus::Connecting, SourceStatus::Connecting]
        );
        let record = conn.state().snapshot();
        assert_eq!(record.status, SourceStatus::Connected);
        assert!(record.last_frame_at.is_some());
    }

    #[test]
    fn failed_test_read_sets_error_and_releases_handle() {
        let (mut conn, _, dropped) = observed(false);
        let err = conn.connect().unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));

        let record = conn.state().snapshot();
        assert_eq!(record.status, SourceStatus::Error);
        assert_eq!(
            record.error_message.as_deref(),
            Some("failed to read test frame from stream")
        );
        assert!(!conn.is_connected());
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn open_failure_sets_error_with_message() {
        let mut conn = connection("stub://cam?offline");
        assert!(conn.connect().is_err());
        let record = conn.state().snapshot();
        assert_eq!(record.status, SourceStatus::Error);
        assert!(record.error_message.unwrap().contains("offline"));
    }

    #[test]
    fn reconnect_releases_previous_handle_and_bumps_session() {
        let (mut conn, _, dropped) = observed(true);
        conn.connect().expect("first connect");
        let first = conn.session();
        conn.connect().expect("second connect");
        assert!(conn.session() > first);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let (mut conn, _, dropped) = observed(true);
        conn.connect().expect("connect");
        conn.disconnect();
        conn.disconnect();
        assert_eq!(conn.state().status(), SourceStatus::Disconnected);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn read_without_handle_is_a_miss() {
        let mut conn = connection("stub://cam");
        assert!(conn.read().is_none());
        conn.connect().expect("connect");
        assert!(conn.read().is_some());
    }
}
