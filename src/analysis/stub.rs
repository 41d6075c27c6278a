use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::engine::AnalysisEngine;
use super::result::DetectionEvent;
use crate::frame::Frame;
use crate::SourceId;

const MOTION_CONFIDENCE: f32 = 0.85;

/// Stub engine for testing and demos. Reports motion when a source's frame
/// digest differs from the previous one it analysed.
pub struct StubEngine {
    last_digest: Mutex<HashMap<SourceId, [u8; 32]>>,
    ready: AtomicBool,
}

impl StubEngine {
    pub fn new() -> Self {
        Self {
            last_digest: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(false),
        }
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalysisEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn warm_up(&self) -> Result<()> {
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn analyze(&self, frame: &Frame, source_id: &SourceId) -> Result<Vec<DetectionEvent>> {
        let digest = frame.digest();
        let previous = self
            .last_digest
            .lock()
            .map_err(|_| anyhow::anyhow!("stub engine lock poisoned"))?
            .insert(source_id.clone(), digest);

        let motion = matches!(previous, Some(prev) if prev != digest);
        if !motion {
            return Ok(Vec::new());
        }
        Ok(vec![DetectionEvent::object(
            "Detected motion",
            MOTION_CONFIDENCE,
        )])
    }
}

/// Engine that never detects anything. Runs ingestion without analysis load.
#[derive(Default)]
pub struct NullEngine;

#[async_trait]
impl AnalysisEngine for NullEngine {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn analyze(&self, _frame: &Frame, _source_id: &SourceId) -> Result<Vec<DetectionEvent>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_engine_detects_motion_per_source() -> Result<()> {
        let engine = StubEngine::new();
        assert!(!engine.is_ready());
        engine.warm_up().await?;
        assert!(engine.is_ready());

        let a = SourceId::from("a");
        let b = SourceId::from("b");
        let frame1 = Frame::new(b"frame1".to_vec(), 2, 1);
        let frame2 = Frame::new(b"frame2".to_vec(), 2, 1);

        // First frame: nothing to compare against.
        assert!(engine.analyze(&frame1, &a).await?.is_empty());
        // Changed content is motion.
        let events = engine.analyze(&frame2, &a).await?;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].description, "Detected motion");
        // Same content again: no motion.
        assert!(engine.analyze(&frame2, &a).await?.is_empty());
        // Sources are tracked independently.
        assert!(engine.analyze(&frame2, &b).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn null_engine_never_detects() -> Result<()> {
        let engine = NullEngine;
        let frame = Frame::new(vec![1], 1, 1);
        assert!(engine.analyze(&frame, &SourceId::from("a")).await?.is_empty());
        Ok(())
    }
}
