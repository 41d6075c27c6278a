//! Registry of source supervisors and owner of the alert pipeline.
//!
//! The orchestrator hands every supervisor the sending half of one bounded
//! channel. A single fan-out task (see `alert::hub`) drains it into the alert
//! log and the subscribers, so supervisors never touch shared alert state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::alert::{spawn_fanout, AlertHub, AlertRecord, Notifier, SubscriptionId};
use crate::analysis::AnalysisEngine;
use crate::config::FeedwardenConfig;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::ingest::MediaBackend;
use crate::source::SourceRecord;
use crate::supervisor::{SourceStats, SourceSupervisor};
use crate::{AlertId, SourceId};

/// Longest `shutdown` waits for analyses still holding an alert sender.
const FANOUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Orchestrator {
    config: FeedwardenConfig,
    backend: Arc<dyn MediaBackend>,
    engine: Arc<dyn AnalysisEngine>,
    capacity: Arc<Semaphore>,
    sources: RwLock<HashMap<SourceId, Arc<SourceSupervisor>>>,
    hub: Arc<AlertHub>,
    /// Taken on shutdown so the fan-out task can drain and exit.
    alerts_tx: Mutex<Option<mpsc::Sender<AlertRecord>>>,
    fanout: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    bootstrapped: AtomicBool,
}

impl Orchestrator {
    /// Build an orchestrator and spawn its fan-out task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: FeedwardenConfig,
        backend: Arc<dyn MediaBackend>,
        engine: Arc<dyn AnalysisEngine>,
    ) -> Self {
        let hub = Arc::new(AlertHub::new());
        let (alerts_tx, alerts_rx) = mpsc::channel(config.alerts.queue_depth.max(1));
        let fanout = spawn_fanout(hub.clone(), alerts_rx);
        Self {
            capacity: Arc::new(Semaphore::new(
                config
                    .supervisor
                    .max_running_sources
                    .min(Semaphore::MAX_PERMITS),
            )),
            config,
            backend,
            engine,
            sources: RwLock::new(HashMap::new()),
            hub,
            alerts_tx: Mutex::new(Some(alerts_tx)),
            fanout: tokio::sync::Mutex::new(Some(fanout)),
            bootstrapped: AtomicBool::new(false),
        }
    }

    /// Register a stopped source and return its id.
    pub async fn add_source(&self, name: &str, address: &str) -> Result<SourceId> {
        let alerts = self
            .alerts_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::Worker("orchestrator is shut down".to_string()))?;

        let id = SourceId::generate();
        let supervisor = SourceSupervisor::new(
            SourceRecord::new(id.clone(), name, address),
            self.backend.clone(),
            self.engine.clone(),
            &self.config,
            self.capacity.clone(),
            alerts,
        );
        self.sources
            .write()
            .await
            .insert(id.clone(), Arc::new(supervisor));
        log::info!("Orchestrator: added source {} ({}) as {}", name, address, id);
        Ok(id)
    }

    /// Stop, disconnect and deregister a source.
    pub async fn remove_source(&self, id: &SourceId) -> Result<()> {
        let supervisor = self
            .sources
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::SourceNotFound(id.clone()))?;
        supervisor.stop().await;
        log::info!("Orchestrator: removed source {}", id);
        Ok(())
    }

    /// Start a source. Idempotent while it is running.
    pub async fn start_source(&self, id: &SourceId) -> Result<()> {
        let supervisor = self.supervisor(id).await?;
        supervisor.start().await
    }

    /// Stop a source. A stopped source is left as is.
    pub async fn stop_source(&self, id: &SourceId) -> Result<()> {
        let supervisor = self.supervisor(id).await?;
        supervisor.stop().await;
        Ok(())
    }

    /// Warm the engine, then register and start the configured sources.
    ///
    /// Configured sources are added once per orchestrator; later calls only
    /// restart what is registered. Per-source failures are logged and do not
    /// stop the others.
    pub async fn start_all(&self) -> Result<()> {
        if let Err(e) = self.engine.warm_up().await {
            log::error!(
                "Orchestrator: engine {} failed to warm up: {:#}",
                self.engine.name(),
                e
            );
        }

        if !self.bootstrapped.swap(true, Ordering::AcqRel) {
            for source in &self.config.sources {
                self.add_source(&source.name, &source.address).await?;
            }
        }

        let supervisors: Vec<_> = self.sources.read().await.values().cloned().collect();
        let mut starts = JoinSet::new();
        for supervisor in supervisors {
            starts.spawn(async move {
                let id = supervisor.id();
                (id, supervisor.start().await)
            });
        }
        let mut started = 0;
        while let Some(joined) = starts.join_next().await {
            match joined {
                Ok((_, Ok(()))) => started += 1,
                Ok((id, Err(e))) => log::error!("Orchestrator: failed to start {}: {}", id, e),
                Err(e) => log::error!("Orchestrator: start task failed: {}", e),
            }
        }
        log::info!("Orchestrator: {} source(s) running", started);
        Ok(())
    }

    /// Stop every registered source, each independently.
    pub async fn stop_all(&self) {
        let supervisors: Vec<_> = self.sources.read().await.values().cloned().collect();
        let mut stops = JoinSet::new();
        for supervisor in supervisors {
            stops.spawn(async move { supervisor.stop().await });
        }
        while let Some(joined) = stops.join_next().await {
            if let Err(e) = joined {
                log::error!("Orchestrator: source teardown failed: {}", e);
            }
        }
        log::info!("Orchestrator: all sources stopped");
    }

    /// Stop everything, close the alert channel and let the fan-out drain.
    pub async fn shutdown(&self) {
        self.stop_all().await;
        // Supervisors hold their own senders; drop them with the registry.
        self.sources.write().await.clear();
        self.alerts_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut fanout) = self.fanout.lock().await.take() {
            match tokio::time::timeout(FANOUT_DRAIN_TIMEOUT, &mut fanout).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("Orchestrator: alert fan-out task failed: {}", e),
                Err(_) => {
                    log::warn!("Orchestrator: alert fan-out did not drain, aborting");
                    fanout.abort();
                }
            }
        }
        log::info!("Orchestrator: shut down");
    }

    // -------------------- Alerts --------------------

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&AlertRecord) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hub.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }

    pub fn add_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.hub.add_notifier(notifier);
    }

    pub fn recent_alerts(&self, limit: usize) -> Vec<AlertRecord> {
        self.hub.recent(limit)
    }

    pub fn alert_count(&self) -> usize {
        self.hub.len()
    }

    pub fn acknowledge_alert(&self, id: &AlertId) -> Result<()> {
        if self.hub.acknowledge(id) {
            Ok(())
        } else {
            Err(Error::AlertNotFound(id.clone()))
        }
    }

    // -------------------- Queries --------------------

    /// Records of every registered source, ordered by name.
    pub async fn sources(&self) -> Vec<SourceRecord> {
        let mut records: Vec<_> = self
            .sources
            .read()
            .await
            .values()
            .map(|supervisor| supervisor.record())
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub async fn source(&self, id: &SourceId) -> Result<SourceRecord> {
        Ok(self.supervisor(id).await?.record())
    }

    /// Newest frame of a source; `Ok(None)` if it has not produced one yet.
    pub async fn frame(&self, id: &SourceId) -> Result<Option<Frame>> {
        Ok(self.supervisor(id).await?.frame())
    }

    pub async fn stats(&self, id: &SourceId) -> Result<SourceStats> {
        Ok(self.supervisor(id).await?.stats())
    }

    pub async fn is_running(&self, id: &SourceId) -> Result<bool> {
        Ok(self.supervisor(id).await?.is_running().await)
    }

    async fn supervisor(&self, id: &SourceId) -> Result<Arc<SourceSupervisor>> {
        self.sources
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::SourceNotFound(id.clone()))
    }
}
