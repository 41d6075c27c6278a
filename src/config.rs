use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::ingest::StreamTuning;

const DEFAULT_ENGINE: &str = "stub";
const DEFAULT_FRAME_SKIP: u32 = 5;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.7;
const DEFAULT_ALERT_COOLDOWN_SECS: u64 = 60;
const DEFAULT_ALERT_QUEUE_DEPTH: usize = 256;
const DEFAULT_LOOP_FPS: u32 = 30;
const DEFAULT_READ_BACKOFF_MS: u64 = 100;
const DEFAULT_MAX_RUNNING_SOURCES: usize = 4;

#[derive(Debug, Deserialize, Default)]
struct FeedwardenConfigFile {
    sources: Option<Vec<SourceConfigFile>>,
    stream: Option<StreamConfigFile>,
    analysis: Option<AnalysisConfigFile>,
    alerts: Option<AlertConfigFile>,
    supervisor: Option<SupervisorConfigFile>,
}

#[derive(Debug, Deserialize)]
struct SourceConfigFile {
    name: Option<String>,
    address: String,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    buffer_frames: Option<u32>,
    max_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    codec: Option<String>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AnalysisConfigFile {
    engine: Option<String>,
    frame_skip: Option<u32>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    cooldown_secs: Option<u64>,
    queue_depth: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct SupervisorConfigFile {
    loop_fps: Option<u32>,
    read_backoff_ms: Option<u64>,
    max_running_sources: Option<usize>,
}

/// Startup configuration, assembled and validated once.
#[derive(Debug, Clone)]
pub struct FeedwardenConfig {
    pub sources: Vec<SourceSettings>,
    pub stream: StreamTuning,
    pub analysis: AnalysisSettings,
    pub alerts: AlertSettings,
    pub supervisor: SupervisorSettings,
}

/// A statically configured source, bootstrapped by `start_all`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    /// Registry name of the engine to run.
    pub engine: String,
    /// Cadence is `max(frame_skip + 1, 3)` ingested frames.
    pub frame_skip: u32,
    /// Detections below this confidence never become alerts.
    pub min_confidence: f32,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub cooldown: Duration,
    /// Capacity of the channel between supervisors and the fan-out task.
    pub queue_depth: usize,
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Upper bound on ingestion loop iterations per second.
    pub loop_fps: u32,
    /// Pause after a read that produced no frame.
    pub read_backoff: Duration,
    pub max_running_sources: usize,
}

impl Default for FeedwardenConfig {
    fn default() -> Self {
        Self::from_file(FeedwardenConfigFile::default())
    }
}

impl FeedwardenConfig {
    /// Load from the file named by `FEEDWARDEN_CONFIG` (if set), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FEEDWARDEN_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => FeedwardenConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FeedwardenConfigFile) -> Self {
        let sources = file
            .sources
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, source)| SourceSettings {
                name: source
                    .name
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or_else(|| default_source_name(index)),
                address: source.address,
            })
            .collect();

        let defaults = StreamTuning::default();
        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamTuning {
            buffer_frames: stream_file.buffer_frames.unwrap_or(defaults.buffer_frames),
            max_fps: stream_file.max_fps.unwrap_or(defaults.max_fps),
            width: stream_file.width.unwrap_or(defaults.width),
            height: stream_file.height.unwrap_or(defaults.height),
            codec: stream_file.codec.unwrap_or(defaults.codec),
            read_timeout: stream_file
                .read_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.read_timeout),
        };

        let analysis_file = file.analysis.unwrap_or_default();
        let analysis = AnalysisSettings {
            engine: analysis_file
                .engine
                .unwrap_or_else(|| DEFAULT_ENGINE.to_string()),
            frame_skip: analysis_file.frame_skip.unwrap_or(DEFAULT_FRAME_SKIP),
            min_confidence: analysis_file
                .min_confidence
                .unwrap_or(DEFAULT_MIN_CONFIDENCE),
        };

        let alert_file = file.alerts.unwrap_or_default();
        let alerts = AlertSettings {
            cooldown: Duration::from_secs(
                alert_file
                    .cooldown_secs
                    .unwrap_or(DEFAULT_ALERT_COOLDOWN_SECS),
            ),
            queue_depth: alert_file.queue_depth.unwrap_or(DEFAULT_ALERT_QUEUE_DEPTH),
        };

        let supervisor_file = file.supervisor.unwrap_or_default();
        let supervisor = SupervisorSettings {
            loop_fps: supervisor_file.loop_fps.unwrap_or(DEFAULT_LOOP_FPS),
            read_backoff: Duration::from_millis(
                supervisor_file
                    .read_backoff_ms
                    .unwrap_or(DEFAULT_READ_BACKOFF_MS),
            ),
            max_running_sources: supervisor_file
                .max_running_sources
                .unwrap_or(DEFAULT_MAX_RUNNING_SOURCES),
        };

        Self {
            sources,
            stream,
            analysis,
            alerts,
            supervisor,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(sources) = std::env::var("FEEDWARDEN_SOURCES") {
            let parsed = split_csv(&sources);
            if !parsed.is_empty() {
                self.sources = parsed
                    .into_iter()
                    .enumerate()
                    .map(|(index, address)| SourceSettings {
                        name: default_source_name(index),
                        address,
                    })
                    .collect();
            }
        }
        if let Ok(engine) = std::env::var("FEEDWARDEN_ENGINE") {
            if !engine.trim().is_empty() {
                self.analysis.engine = engine.trim().to_string();
            }
        }
        if let Some(skip) = parse_env::<u32>("FEEDWARDEN_FRAME_SKIP", "an integer")? {
            self.analysis.frame_skip = skip;
        }
        if let Some(confidence) = parse_env::<f32>("FEEDWARDEN_MIN_CONFIDENCE", "a number")? {
            self.analysis.min_confidence = confidence;
        }
        if let Some(secs) =
            parse_env::<u64>("FEEDWARDEN_ALERT_COOLDOWN_SECS", "an integer number of seconds")?
        {
            self.alerts.cooldown = Duration::from_secs(secs);
        }
        if let Some(fps) = parse_env::<u32>("FEEDWARDEN_STREAM_FPS", "an integer")? {
            self.stream.max_fps = fps;
        }
        if let Some(fps) = parse_env::<u32>("FEEDWARDEN_LOOP_FPS", "an integer")? {
            self.supervisor.loop_fps = fps;
        }
        if let Some(max) = parse_env::<usize>("FEEDWARDEN_MAX_SOURCES", "an integer")? {
            self.supervisor.max_running_sources = max;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.analysis.min_confidence) {
            return Err(anyhow!("min_confidence must be within [0, 1]"));
        }
        if self.analysis.engine.trim().is_empty() {
            return Err(anyhow!("analysis engine name must not be empty"));
        }
        if self.stream.max_fps == 0 {
            return Err(anyhow!("stream max_fps must be greater than zero"));
        }
        if self.stream.width == 0 || self.stream.height == 0 {
            return Err(anyhow!("stream width and height must be greater than zero"));
        }
        if self.stream.buffer_frames == 0 {
            return Err(anyhow!("stream buffer_frames must be greater than zero"));
        }
        if self.supervisor.loop_fps == 0 {
            return Err(anyhow!("supervisor loop_fps must be greater than zero"));
        }
        if self.supervisor.max_running_sources == 0 {
            return Err(anyhow!("max_running_sources must be greater than zero"));
        }
        if self.supervisor.max_running_sources > Semaphore::MAX_PERMITS {
            return Err(anyhow!(
                "max_running_sources must be at most {}",
                Semaphore::MAX_PERMITS
            ));
        }
        if self.alerts.queue_depth == 0 {
            return Err(anyhow!("alert queue_depth must be greater than zero"));
        }
        if let Some(source) = self
            .sources
            .iter()
            .find(|source| source.address.trim().is_empty())
        {
            return Err(anyhow!("source '{}' has an empty address", source.name));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<FeedwardenConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_env<T: std::str::FromStr>(key: &str, expected: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {}", key, expected)),
        _ => Ok(None),
    }
}

fn default_source_name(index: usize) -> String {
    format!("Camera {}", index + 1)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
