//! Dedicated read thread for one running source.
//!
//! The ingestion loop never touches the media handle itself. It posts a read
//! request carrying a oneshot reply channel and awaits the reply, so a slow or
//! hung read only ever stalls this thread.
//!
//! The thread is abandon-able: once the loop is cancelled its request sender
//! and any pending reply receiver are dropped. The thread finishes the read in
//! progress, notices nobody is listening, and exits. On exit it releases the
//! handle unless a newer `connect` already replaced it.

use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tokio::sync::oneshot;

use super::StreamConnection;
use crate::error::{Error, Result};
use crate::frame::Frame;

type ReadReply = oneshot::Sender<Option<Frame>>;

pub struct FrameReader {
    requests: mpsc::Sender<ReadReply>,
}

impl FrameReader {
    /// Spawn the read thread for the connection's current session.
    pub fn spawn(connection: Arc<Mutex<StreamConnection>>) -> Result<Self> {
        let (session, name) = {
            let conn = connection.lock().unwrap_or_else(PoisonError::into_inner);
            (conn.session(), conn.state().name())
        };
        let (requests, rx) = mpsc::channel::<ReadReply>();
        thread::Builder::new()
            .name(format!("read-{}", name))
            .spawn(move || read_loop(connection, rx, session))
            .map_err(|e| Error::Worker(format!("spawn read thread for {}: {}", name, e)))?;
        Ok(Self { requests })
    }

    /// Read one frame on the dedicated thread.
    ///
    /// Returns `None` on a miss or when the thread is gone.
    pub async fn read(&self) -> Option<Frame> {
        let (reply, response) = oneshot::channel();
        self.requests.send(reply).ok()?;
        response.await.ok().flatten()
    }
}

fn read_loop(connection: Arc<Mutex<StreamConnection>>, rx: mpsc::Receiver<ReadReply>, session: u64) {
    while let Ok(reply) = rx.recv() {
        let frame = {
            let mut conn = connection.lock().unwrap_or_else(PoisonError::into_inner);
            if conn.session() != session {
                break;
            }
            conn.read()
        };
        if reply.send(frame).is_err() {
            // Requester was cancelled mid-read; the result is discarded.
            break;
        }
    }

    let mut conn = connection.lock().unwrap_or_else(PoisonError::into_inner);
    if conn.session() == session && conn.is_connected() {
        log::debug!(
            "FrameReader: releasing {} after loop exit",
            conn.state().name()
        );
        conn.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{RtspBackend, StreamTuning};
    use crate::source::{SourceRecord, SourceState, SourceStatus};
    use crate::SourceId;
    use std::time::{Duration, Instant};

    fn connected(address: &str) -> Arc<Mutex<StreamConnection>> {
        let state = SourceState::new(SourceRecord::new(SourceId::from("cam"), "cam", address));
        let tuning = StreamTuning {
            width: 8,
            height: 8,
            ..StreamTuning::default()
        };
        let mut conn = StreamConnection::new(state, Arc::new(RtspBackend::new()), tuning);
        conn.connect().expect("connect");
        Arc::new(Mutex::new(conn))
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[tokio::test]
    async fn reads_frames_off_the_scheduler() {
        let conn = connected("stub://cam");
        let reader = FrameReader::spawn(conn.clone()).expect("spawn");
        let frame = reader.read().await.expect("frame");
        assert_eq!(frame.width, 8);
    }

    #[tokio::test]
    async fn dropping_reader_releases_handle() {
        let conn = connected("stub://cam");
        let reader = FrameReader::spawn(conn.clone()).expect("spawn");
        assert!(reader.read().await.is_some());
        drop(reader);

        assert!(wait_for(|| !conn.lock().unwrap().is_connected()));
        assert_eq!(
            conn.lock().unwrap().state().status(),
            SourceStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn stale_reader_leaves_newer_session_alone() {
        let conn = connected("stub://cam");
        let reader = FrameReader::spawn(conn.clone()).expect("spawn");
        conn.lock().unwrap().connect().expect("reconnect");
        drop(reader);

        // Give the stale thread time to exit; the new session must survive.
        thread::sleep(Duration::from_millis(50));
        assert!(conn.lock().unwrap().is_connected());
    }
}
