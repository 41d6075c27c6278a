//! Frame ingestion.
//!
//! This module provides:
//! - `MediaBackend` / `MediaHandle`: the seam to whatever decodes a stream
//! - `RtspBackend`: RTSP cameras (feature `rtsp-gstreamer`) and synthetic
//!   `stub://` sources for tests and demos
//! - `StreamConnection`: connect / read / disconnect lifecycle of one source
//! - `FrameReader`: dedicated OS thread that performs blocking reads
//!
//! The ingestion layer MUST NOT:
//! - Perform blocking reads on the async scheduler
//! - Let an I/O failure escape a read (a failed read is "no frame")
//! - Log raw frame content

use anyhow::Result;
use std::time::Duration;

use crate::frame::Frame;

pub mod connection;
pub mod reader;
pub mod rtsp;

pub use connection::StreamConnection;
pub use reader::FrameReader;
pub use rtsp::RtspBackend;

/// Latency-oriented tuning applied when a handle is opened.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamTuning {
    /// Frames the decoder may queue before dropping old ones.
    pub buffer_frames: u32,
    /// Frame rate cap requested from the source.
    pub max_fps: u32,
    /// Output width after scaling.
    pub width: u32,
    /// Output height after scaling.
    pub height: u32,
    /// Preferred codec hint (e.g. "H264"); empty lets the decoder choose.
    pub codec: String,
    /// Upper bound on a single blocking read.
    pub read_timeout: Duration,
}

impl Default for StreamTuning {
    fn default() -> Self {
        Self {
            buffer_frames: 1,
            max_fps: 15,
            width: 640,
            height: 480,
            codec: "H264".to_string(),
            read_timeout: Duration::from_secs(2),
        }
    }
}

/// Opens media handles for source addresses.
pub trait MediaBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Open a handle for `address` with the given tuning.
    ///
    /// Opening does not have to prove the stream works; the connection performs
    /// a test read right after.
    fn open(&self, address: &str, tuning: &StreamTuning) -> Result<Box<dyn MediaHandle>>;
}

/// One open media stream. Dropping the handle releases it.
pub trait MediaHandle: Send {
    /// Blocking read of the next frame.
    ///
    /// `Ok(None)` means the stream produced nothing this time; `Err` is an I/O
    /// or decode failure. Both are treated as a miss by the caller.
    fn read_frame(&mut self) -> Result<Option<Frame>>;
}
