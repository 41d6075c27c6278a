//! Frame snapshots and the latest-frame slot.
//!
//! - `Frame`: immutable decoded image plus capture timestamp. Pixel bytes sit
//!   behind an `Arc<[u8]>`, so every clone is an independent, read-only
//!   snapshot; nobody can mutate a frame after it is produced.
//! - `FrameBuffer`: single-slot cache, written by the ingestion loop and read
//!   by pull consumers. Latest wins; there is no history and no queue.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ----------------------------------------------------------------------------
// Frame: immutable snapshot
// ----------------------------------------------------------------------------

/// Decoded frame (packed RGB, `width * height * 3` bytes for real sources).
#[derive(Clone)]
pub struct Frame {
    data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Wrap freshly decoded pixels, stamped with the current time.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self::with_timestamp(data, width, height, Utc::now())
    }

    pub fn with_timestamp(
        data: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            captured_at,
        }
    }

    /// Read-only pixel view.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// SHA-256 of the pixel bytes. Used for cheap change detection.
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(&self.data).into()
    }

    /// Encode as JPEG for snapshot consumers.
    #[cfg(feature = "snapshot-jpeg")]
    pub fn encode_jpeg(&self, quality: u8) -> anyhow::Result<Vec<u8>> {
        use anyhow::Context;
        use image::codecs::jpeg::JpegEncoder;

        let expected = (self.width as usize) * (self.height as usize) * 3;
        if self.data.len() != expected {
            anyhow::bail!(
                "frame is {} bytes, expected {} for {}x{} RGB",
                self.data.len(),
                expected,
                self.width,
                self.height
            );
        }
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode(
                &self.data,
                self.width,
                self.height,
                image::ExtendedColorType::Rgb8,
            )
            .context("encode frame as jpeg")?;
        Ok(out)
    }
}

// Pixels are never printed.
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// FrameBuffer: single-slot latest-frame cache
// ----------------------------------------------------------------------------

/// Thread-safe "latest frame" slot for one source.
///
/// `put` swaps the whole frame under the lock, so `get` always returns a frame
/// produced by exactly one `put`.
#[derive(Default)]
pub struct FrameBuffer {
    slot: Mutex<Option<Frame>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame.
    pub fn put(&self, frame: Frame) {
        *self.lock() = Some(frame);
    }

    /// Snapshot of the current frame, or `None` if nothing was ever stored.
    pub fn get(&self) -> Option<Frame> {
        self.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Frame>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
