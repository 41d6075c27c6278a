use anyhow::Result;
use async_trait::async_trait;

use super::result::DetectionEvent;
use crate::frame::Frame;
use crate::SourceId;

/// External content-analysis engine.
///
/// # Contract
///
/// - `analyze` may be called concurrently for different sources.
/// - Failures are returned, not thrown: the caller logs them and treats the
///   invocation as producing no detections.
/// - The frame is a read-only snapshot; engines must not assume they are the
///   only holder.
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// True once models are loaded. Cadence hits are skipped until then.
    fn is_ready(&self) -> bool {
        true
    }

    /// Load models ahead of the first cadence hit.
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    /// Analyse one frame from `source_id`.
    async fn analyze(&self, frame: &Frame, source_id: &SourceId) -> Result<Vec<DetectionEvent>>;
}
