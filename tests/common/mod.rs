//! Scripted media backend and analysis engine shared by integration tests.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use feedwarden::{
    AnalysisEngine, DetectionEvent, FeedwardenConfig, Frame, MediaBackend, MediaHandle, SourceId,
    StreamTuning,
};

/// Counters shared between a backend and every handle it opened.
#[derive(Default)]
pub struct Probe {
    pub opens: AtomicUsize,
    pub drops: AtomicUsize,
    pub reads: AtomicUsize,
}

impl Probe {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }

    pub fn live_handles(&self) -> usize {
        self.opens() - self.drops()
    }
}

/// Backend whose handles yield one test frame, then `frames` more (forever
/// when `None`), then nothing.
pub struct ScriptedBackend {
    pub probe: Arc<Probe>,
    frames: Option<usize>,
    read_delay: Duration,
    offline: bool,
}

impl ScriptedBackend {
    pub fn endless() -> Self {
        Self {
            probe: Arc::new(Probe::default()),
            frames: None,
            read_delay: Duration::ZERO,
            offline: false,
        }
    }

    pub fn finite(frames: usize) -> Self {
        Self {
            frames: Some(frames),
            ..Self::endless()
        }
    }

    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::endless()
        }
    }

    /// Every read after the test frame blocks for `delay`.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }
}

impl MediaBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open(&self, address: &str, _tuning: &StreamTuning) -> Result<Box<dyn MediaHandle>> {
        if self.offline {
            return Err(anyhow!("{} refused connection", address));
        }
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedHandle {
            probe: self.probe.clone(),
            remaining: self.frames,
            read_delay: self.read_delay,
            seq: 0,
        }))
    }
}

struct ScriptedHandle {
    probe: Arc<Probe>,
    remaining: Option<usize>,
    read_delay: Duration,
    seq: u8,
}

impl MediaHandle for ScriptedHandle {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        let is_test_read = self.seq == 0;
        if !is_test_read {
            if !self.read_delay.is_zero() {
                std::thread::sleep(self.read_delay);
            }
            match self.remaining.as_mut() {
                Some(0) => return Ok(None),
                Some(n) => *n -= 1,
                None => {}
            }
        }
        self.seq = self.seq.wrapping_add(1);
        Ok(Some(Frame::new(vec![self.seq; 12], 2, 2)))
    }
}

impl Drop for ScriptedHandle {
    fn drop(&mut self) {
        self.probe.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Engine returning the same detections on every call, optionally slowly.
pub struct ScriptedEngine {
    detections: Vec<DetectionEvent>,
    delay: Duration,
    fail: bool,
    ready: AtomicBool,
    pub warm_ups: AtomicUsize,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub frames: Mutex<Vec<Frame>>,
}

impl ScriptedEngine {
    pub fn detecting(detections: Vec<DetectionEvent>) -> Self {
        Self {
            detections,
            delay: Duration::ZERO,
            fail: false,
            ready: AtomicBool::new(true),
            warm_ups: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            frames: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::detecting(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Reports not ready until `warm_up` runs.
    pub fn cold(self) -> Self {
        self.ready.store(false, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn warm_up(&self) -> Result<()> {
        self.warm_ups.fetch_add(1, Ordering::SeqCst);
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn analyze(&self, frame: &Frame, _source_id: &SourceId) -> Result<Vec<DetectionEvent>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.frames.lock().unwrap().push(frame.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("inference backend crashed"));
        }
        let detected_at = chrono::Utc::now();
        Ok(self
            .detections
            .iter()
            .cloned()
            .map(|event| DetectionEvent {
                timestamp: detected_at,
                ..event
            })
            .collect())
    }
}

/// Defaults tuned for fast tests: tight loop, short backoff, cadence 3.
pub fn test_config() -> FeedwardenConfig {
    let mut config = FeedwardenConfig::default();
    config.analysis.frame_skip = 0;
    config.supervisor.loop_fps = 200;
    config.supervisor.read_backoff = Duration::from_millis(10);
    config
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
