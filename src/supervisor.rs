//! Per-source actor.
//!
//! A `SourceSupervisor` owns one `StreamConnection`, one `FrameBuffer`, one
//! `AlertGate` and, while running, one ingestion task plus its `FrameReader`
//! thread. Each ingestion iteration:
//!
//! 1. reads a frame on the reader thread (a miss backs off, status untouched)
//! 2. replaces the buffered frame and stamps the record
//! 3. feeds the `AnalysisTrigger`; a cadence hit with nothing in flight spawns
//!    one analysis task
//!
//! Finished analyses pass their candidates through the gate and send admitted
//! alerts to the orchestrator's fan-out channel. Results from a run that has
//! since been stopped are discarded.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::alert::{Admission, AlertGate, AlertRecord};
use crate::analysis::{
    candidate_alerts, AnalysisEngine, AnalysisSlot, AnalysisTrigger, CadenceDecision,
    CandidateAlert,
};
use crate::config::{AnalysisSettings, FeedwardenConfig, SupervisorSettings};
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameBuffer};
use crate::ingest::{FrameReader, MediaBackend, StreamConnection};
use crate::source::{SourceRecord, SourceState};
use crate::SourceId;

/// Counters for one source, accumulated across runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub frames_ingested: u64,
    pub read_misses: u64,
    pub analyses_started: u64,
    pub analyses_skipped_busy: u64,
    pub alerts_admitted: u64,
    pub alerts_suppressed: u64,
}

#[derive(Default)]
struct Counters {
    frames_ingested: AtomicU64,
    read_misses: AtomicU64,
    analyses_started: AtomicU64,
    analyses_skipped_busy: AtomicU64,
    alerts_admitted: AtomicU64,
    alerts_suppressed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SourceStats {
        SourceStats {
            frames_ingested: self.frames_ingested.load(Ordering::Relaxed),
            read_misses: self.read_misses.load(Ordering::Relaxed),
            analyses_started: self.analyses_started.load(Ordering::Relaxed),
            analyses_skipped_busy: self.analyses_skipped_busy.load(Ordering::Relaxed),
            alerts_admitted: self.alerts_admitted.load(Ordering::Relaxed),
            alerts_suppressed: self.alerts_suppressed.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the supervisor, its ingestion task and its analyses.
struct Shared {
    state: SourceState,
    frames: FrameBuffer,
    gate: AlertGate,
    engine: Arc<dyn AnalysisEngine>,
    analysis: AnalysisSettings,
    /// Bumped on every stop; analyses tagged with an older epoch are discarded.
    epoch: AtomicU64,
    /// Set while an analysis of this source runs, whichever run started it.
    in_flight: Arc<AtomicBool>,
    counters: Counters,
    alerts: mpsc::Sender<AlertRecord>,
}

struct Run {
    task: JoinHandle<()>,
    _permit: OwnedSemaphorePermit,
}

pub struct SourceSupervisor {
    shared: Arc<Shared>,
    connection: Arc<Mutex<StreamConnection>>,
    settings: SupervisorSettings,
    capacity: Arc<Semaphore>,
    run: tokio::sync::Mutex<Option<Run>>,
}

impl SourceSupervisor {
    /// Create a stopped supervisor.
    ///
    /// `capacity` is shared by every supervisor of one orchestrator; a running
    /// source holds one permit.
    pub fn new(
        record: SourceRecord,
        backend: Arc<dyn MediaBackend>,
        engine: Arc<dyn AnalysisEngine>,
        config: &FeedwardenConfig,
        capacity: Arc<Semaphore>,
        alerts: mpsc::Sender<AlertRecord>,
    ) -> Self {
        let state = SourceState::new(record);
        let connection = StreamConnection::new(state.clone(), backend, config.stream.clone());
        Self {
            shared: Arc::new(Shared {
                state,
                frames: FrameBuffer::new(),
                gate: AlertGate::new(config.alerts.cooldown),
                engine,
                analysis: config.analysis.clone(),
                epoch: AtomicU64::new(0),
                in_flight: Arc::new(AtomicBool::new(false)),
                counters: Counters::default(),
                alerts,
            }),
            connection: Arc::new(Mutex::new(connection)),
            settings: config.supervisor.clone(),
            capacity,
            run: tokio::sync::Mutex::new(None),
        }
    }

    pub fn id(&self) -> SourceId {
        self.shared.state.id()
    }

    pub fn record(&self) -> SourceRecord {
        self.shared.state.snapshot()
    }

    /// Copy of the newest ingested frame, if any.
    pub fn frame(&self) -> Option<Frame> {
        self.shared.frames.get()
    }

    pub fn stats(&self) -> SourceStats {
        self.shared.counters.snapshot()
    }

    pub async fn is_running(&self) -> bool {
        self.run
            .lock()
            .await
            .as_ref()
            .is_some_and(|run| !run.task.is_finished())
    }

    /// Connect and spawn the ingestion loop.
    ///
    /// Returns `Ok` without doing anything if the loop is already running. On
    /// connection failure the source stays in `Error`.
    pub async fn start(&self) -> Result<()> {
        let mut run = self.run.lock().await;
        if run.as_ref().is_some_and(|run| !run.task.is_finished()) {
            log::debug!("SourceSupervisor: {} already running", self.shared.state.name());
            return Ok(());
        }

        let permit = self
            .capacity
            .clone()
            .try_acquire_owned()
            .map_err(|_| Error::Capacity {
                limit: self.settings.max_running_sources,
            })?;

        let connection = self.connection.clone();
        let (test_frame, reader) = tokio::task::spawn_blocking(move || -> Result<(Frame, FrameReader)> {
            let frame = lock(&connection).connect()?;
            match FrameReader::spawn(connection.clone()) {
                Ok(reader) => Ok((frame, reader)),
                Err(e) => {
                    lock(&connection).disconnect();
                    Err(e)
                }
            }
        })
        .await
        .map_err(|e| Error::Worker(format!("connect task failed: {}", e)))??;

        self.shared.state.stamp_frame(test_frame.captured_at);
        self.shared.frames.put(test_frame);

        let epoch = self.shared.epoch.load(Ordering::Acquire);
        let task = tokio::spawn(ingest_loop(
            self.shared.clone(),
            reader,
            self.settings.clone(),
            epoch,
        ));
        *run = Some(Run {
            task,
            _permit: permit,
        });
        log::info!(
            "SourceSupervisor: {} started (cadence every {} frames)",
            self.shared.state.name(),
            AnalysisTrigger::new(self.shared.analysis.frame_skip).cadence()
        );
        Ok(())
    }

    /// Cancel the loop, orphan in-flight analyses and release the connection.
    ///
    /// Safe to call on a stopped source. Completes promptly even while a
    /// blocking read is pending: the handle is then released by the reader
    /// thread once that read returns.
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);

        let was_running = match run.take() {
            Some(Run { task, _permit }) => {
                task.abort();
                if let Err(e) = task.await {
                    if e.is_panic() {
                        log::error!(
                            "SourceSupervisor: ingestion loop for {} panicked",
                            self.shared.state.name()
                        );
                    }
                }
                true
            }
            None => false,
        };

        self.release_connection();
        if was_running {
            log::info!("SourceSupervisor: {} stopped", self.shared.state.name());
        }
    }

    fn release_connection(&self) {
        match self.connection.try_lock() {
            Ok(mut conn) => conn.disconnect(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().disconnect(),
            Err(TryLockError::WouldBlock) => {
                // The reader thread is mid-read; it disconnects on exit.
                self.shared.state.set_disconnected();
                log::debug!(
                    "SourceSupervisor: {} release deferred to read thread",
                    self.shared.state.name()
                );
            }
        }
    }

    /// Gate candidates at `now` and forward admitted alerts. Returns the
    /// number admitted.
    pub(crate) async fn emit_candidates(
        &self,
        candidates: Vec<CandidateAlert>,
        now: DateTime<Utc>,
    ) -> usize {
        let epoch = self.shared.epoch.load(Ordering::Acquire);
        self.shared.emit(candidates, now, epoch).await
    }
}

impl Drop for SourceSupervisor {
    fn drop(&mut self) {
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(run) = self.run.get_mut().take() {
            run.task.abort();
            self.release_connection();
        }
    }
}

impl Shared {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }

    /// Gate and forward candidates produced during run `epoch`. Stops early
    /// once that run has been stopped.
    ///
    /// A channel slot is reserved before the gate is consulted, so nothing
    /// awaits between the epoch check, the gate decision and the send.
    async fn emit(&self, candidates: Vec<CandidateAlert>, now: DateTime<Utc>, epoch: u64) -> usize {
        let mut admitted = 0;
        for candidate in candidates {
            let Ok(permit) = self.alerts.reserve().await else {
                log::warn!("SourceSupervisor: alert channel closed, dropping alert");
                return admitted;
            };
            if !self.is_current(epoch) {
                log::debug!(
                    "SourceSupervisor: {} stopped, dropping remaining candidates",
                    self.state.name()
                );
                return admitted;
            }
            match self.gate.admit(&candidate.signature(), now) {
                Admission::Admitted => {
                    Counters::bump(&self.counters.alerts_admitted);
                    permit.send(AlertRecord::from_candidate(candidate));
                    admitted += 1;
                }
                Admission::Suppressed { remaining } => {
                    Counters::bump(&self.counters.alerts_suppressed);
                    log::debug!(
                        "SourceSupervisor: suppressed '{}' from {} ({:?} cooldown left)",
                        candidate.message,
                        candidate.source_name,
                        remaining
                    );
                }
            }
        }
        admitted
    }
}

async fn ingest_loop(shared: Arc<Shared>, reader: FrameReader, settings: SupervisorSettings, epoch: u64) {
    let mut trigger = AnalysisTrigger::with_in_flight(shared.analysis.frame_skip, shared.in_flight.clone());
    let period = Duration::from_secs_f64(1.0 / f64::from(settings.loop_fps.max(1)));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(frame) = reader.read().await else {
            Counters::bump(&shared.counters.read_misses);
            log::warn!(
                "SourceSupervisor: no frame from {}, retrying in {:?}",
                shared.state.name(),
                settings.read_backoff
            );
            tokio::time::sleep(settings.read_backoff).await;
            continue;
        };

        shared.state.stamp_frame(frame.captured_at);
        shared.frames.put(frame.clone());
        Counters::bump(&shared.counters.frames_ingested);

        match trigger.on_frame() {
            CadenceDecision::Wait => {}
            CadenceDecision::Busy => {
                Counters::bump(&shared.counters.analyses_skipped_busy);
                log::debug!(
                    "SourceSupervisor: {} analysis still running, skipping frame {}",
                    shared.state.name(),
                    trigger.frames_seen()
                );
            }
            CadenceDecision::Fire(slot) => {
                if !shared.engine.is_ready() {
                    log::debug!(
                        "SourceSupervisor: engine {} not ready, skipping frame {}",
                        shared.engine.name(),
                        trigger.frames_seen()
                    );
                    continue;
                }
                Counters::bump(&shared.counters.analyses_started);
                tokio::spawn(run_analysis(shared.clone(), frame, slot, epoch));
            }
        }
    }
}

async fn run_analysis(shared: Arc<Shared>, frame: Frame, slot: AnalysisSlot, epoch: u64) {
    let _slot = slot;
    let source_id = shared.state.id();
    let events = match shared.engine.analyze(&frame, &source_id).await {
        Ok(events) => events,
        Err(e) => {
            log::error!(
                "SourceSupervisor: analysis of {} with {} failed: {:#}",
                source_id,
                shared.engine.name(),
                e
            );
            Vec::new()
        }
    };

    if !shared.is_current(epoch) {
        log::debug!("SourceSupervisor: discarding analysis of {} from a stopped run", source_id);
        return;
    }

    let candidates = candidate_alerts(
        &source_id,
        &shared.state.name(),
        events,
        shared.analysis.min_confidence,
    );
    if !candidates.is_empty() {
        shared.emit(candidates, Utc::now(), epoch).await;
    }
}

fn lock(connection: &Mutex<StreamConnection>) -> MutexGuard<'_, StreamConnection> {
    connection.lock().unwrap_or_else(PoisonError::into_inner)
}
