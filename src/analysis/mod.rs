//! Content analysis seam.
//!
//! The engine itself (object detection, prompt matching) is external and
//! consumed through `AnalysisEngine`. This module owns:
//! - the detection model the engine returns
//! - the cadence logic deciding which frames are analysed
//! - conversion of detections into candidate alerts
//! - stub engines and a name-keyed registry for selecting one from config

mod engine;
mod registry;
mod result;
mod stub;
mod trigger;

pub use engine::AnalysisEngine;
pub use registry::EngineRegistry;
pub use result::{BoundingBox, DetectionEvent, DetectionOrigin};
pub use stub::{NullEngine, StubEngine};
pub use trigger::{
    candidate_alerts, AnalysisSlot, AnalysisTrigger, CadenceDecision, CandidateAlert,
    MIN_CADENCE,
};
