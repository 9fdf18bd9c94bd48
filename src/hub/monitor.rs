//! Change monitor: turns producer polls and filesystem changes into hub events.
//!
//! Agent status is polled on a fixed interval and broadcast only when its
//! signature changes. Bead counts, run activity and ralph progress are
//! refreshed when a watched producer directory changes; artifact and inbox
//! changes are forwarded as-is.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::payloads::{
    ActivityPayload, AgentErrorPayload, AgentOutputPayload, AgentStatusPayload, BeadUpdatePayload,
    ChangeMetadata, RalphProgressPayload, WatchPayload,
};
use super::{BroadcastHub, ClientId};
use crate::producers::cached::{BEADS_KEY, PROGRESS_KEY, RUNS_KEY};
use crate::producers::{
    AgentInfo, AgentLister, AgentStatus, BeadCounts, BeadLister, CachedProducers,
    ProgressProvider, RunLister,
};
use crate::protocol::EventKind;
use crate::watch::{DebounceConfig, WatchDebouncer, WatchEvent, WatchEventKind, WatchSource, WatchTarget};

/// Default agent status poll period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub debounce: DebounceConfig,
    /// Artifact roots, inbox subdirectories and producer backing directories.
    pub targets: Vec<WatchTarget>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            debounce: DebounceConfig::default(),
            targets: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Signatures {
    agents: Option<[u8; 32]>,
    activity: Option<String>,
    last_agent_status: Option<AgentStatusPayload>,
}

struct Running {
    cancel: CancellationToken,
    watcher: WatchDebouncer,
    poll_task: JoinHandle<()>,
    forward_task: JoinHandle<()>,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.poll_task.abort();
        self.forward_task.abort();
    }
}

struct MonitorInner {
    hub: BroadcastHub,
    producers: CachedProducers,
    config: MonitorConfig,
    signatures: Mutex<Signatures>,
    running: Mutex<Option<Running>>,
}

#[derive(Clone)]
pub struct ChangeMonitor {
    inner: Arc<MonitorInner>,
}

#[derive(Serialize)]
struct AgentSignatureRow<'a> {
    name: &'a str,
    status: AgentStatus,
    bead: Option<&'a str>,
    running_time_label: &'a str,
    context_percent: Option<u8>,
}

/// Digest of the agent fields the dashboard renders.
pub fn agent_signature(agents: &[AgentInfo]) -> [u8; 32] {
    let rows: Vec<AgentSignatureRow<'_>> = agents
        .iter()
        .map(|a| AgentSignatureRow {
            name: &a.name,
            status: a.status,
            bead: a.bead.as_deref(),
            running_time_label: &a.running_time_label,
            context_percent: a.context_percent,
        })
        .collect();
    let mut hasher = Sha256::new();
    // Serializing borrowed strings and enums cannot fail.
    if let Ok(bytes) = serde_json::to_vec(&rows) {
        hasher.update(&bytes);
    }
    hasher.finalize().into()
}

impl ChangeMonitor {
    pub fn new(hub: BroadcastHub, producers: CachedProducers, config: MonitorConfig) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                hub,
                producers,
                config,
                signatures: Mutex::new(Signatures::default()),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.inner.hub
    }

    pub fn producers(&self) -> &CachedProducers {
        &self.inner.producers
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.inner.running).is_some()
    }

    /// Start watchers and the poll task. Returns false if already running.
    pub fn start_monitoring(&self) -> bool {
        let mut running = lock(&self.inner.running);
        if running.is_some() {
            return false;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = WatchDebouncer::start_targets(
            self.inner.config.targets.clone(),
            self.inner.config.debounce,
            tx,
        );
        let cancel = CancellationToken::new();
        let weak = Arc::downgrade(&self.inner);
        let poll_task = tokio::spawn(poll_loop(
            weak.clone(),
            self.inner.config.poll_interval,
            cancel.clone(),
        ));
        let forward_task = tokio::spawn(forward_loop(weak, rx, cancel.clone()));

        info!(
            event = "monitor_started",
            poll_ms = self.inner.config.poll_interval.as_millis() as u64,
            watched = watcher.watched().len()
        );
        *running = Some(Running {
            cancel,
            watcher,
            poll_task,
            forward_task,
        });
        true
    }

    /// Stop the poll task and close every watcher. Safe when never started.
    pub async fn stop_monitoring(&self) {
        let taken = lock(&self.inner.running).take();
        let Some(mut running) = taken else {
            return;
        };
        running.cancel.cancel();
        running.watcher.stop().await;
        running.poll_task.abort();
        running.forward_task.abort();
        info!(event = "monitor_stopped");
    }

    /// Stop monitoring, disconnect every client and forget what was sent, so
    /// a fresh start re-broadcasts current state unconditionally.
    pub async fn cleanup(&self) {
        self.stop_monitoring().await;
        self.inner.hub.shutdown();
        *lock(&self.inner.signatures) = Signatures::default();
    }

    /// Broadcast `agent_status` if the agent list changed since the last
    /// broadcast. Returns whether anything was sent.
    pub async fn poll_agent_status(&self) -> bool {
        let agents = match self.inner.producers.list_agents().await {
            Ok(agents) => agents,
            Err(e) => {
                warn!(event = "poll_agent_status_failed", error = %e);
                return false;
            }
        };

        let signature = agent_signature(&agents);
        let payload = {
            let mut sigs = lock(&self.inner.signatures);
            if sigs.agents == Some(signature) {
                return false;
            }
            sigs.agents = Some(signature);
            let payload = AgentStatusPayload::new(agents);
            sigs.last_agent_status = Some(payload.clone());
            payload
        };
        let delivered = self.inner.hub.broadcast(EventKind::AgentStatus, &payload);
        debug!(event = "agent_status_broadcast", agents = payload.total_count, delivered);
        true
    }

    /// Send the most recent `agent_status` to one client, e.g. right after it
    /// connects. Returns false if nothing has been broadcast yet.
    pub fn send_latest_agent_status(&self, id: ClientId) -> bool {
        let latest = lock(&self.inner.signatures).last_agent_status.clone();
        match latest {
            Some(payload) => self.inner.hub.send_to(id, EventKind::AgentStatus, &payload),
            None => false,
        }
    }

    pub async fn broadcast_bead_update(&self, metadata: Option<ChangeMetadata>) -> bool {
        match self.inner.producers.list_beads().await {
            Ok(beads) => {
                let payload = BeadUpdatePayload::new(BeadCounts::from_beads(&beads), metadata);
                self.inner.hub.broadcast(EventKind::BeadUpdate, &payload);
                true
            }
            Err(e) => {
                warn!(event = "bead_update_failed", error = %e);
                false
            }
        }
    }

    /// Broadcast `activity` for the newest finished run, once per run.
    pub async fn broadcast_latest_activity(&self, metadata: Option<ChangeMetadata>) -> bool {
        let runs = match self.inner.producers.list_runs().await {
            Ok(runs) => runs,
            Err(e) => {
                warn!(event = "activity_failed", error = %e);
                return false;
            }
        };
        let Some(latest) = runs.first() else {
            return false;
        };
        let Some(payload) = ActivityPayload::from_run(latest, metadata) else {
            return false;
        };

        let signature = format!(
            "{}|{}|{}",
            latest.bead,
            latest.started_at,
            latest.exit_code.unwrap_or_default()
        );
        {
            let mut sigs = lock(&self.inner.signatures);
            if sigs.activity.as_deref() == Some(signature.as_str()) {
                return false;
            }
            sigs.activity = Some(signature);
        }
        self.inner.hub.broadcast(EventKind::Activity, &payload);
        true
    }

    pub async fn broadcast_ralph_progress(&self, metadata: Option<ChangeMetadata>) -> bool {
        match self.inner.producers.task_progress().await {
            Ok(progress) => {
                let payload = RalphProgressPayload::new(progress, metadata);
                self.inner.hub.broadcast(EventKind::RalphProgress, &payload);
                true
            }
            Err(e) => {
                warn!(event = "ralph_progress_failed", error = %e);
                false
            }
        }
    }

    /// Refresh everything derived from producer files after a change.
    ///
    /// The cache key backing `source` is invalidated first so the refresh
    /// reads the new state rather than a still-fresh cached value.
    pub async fn on_filesystem_change(&self, source: WatchSource, kind: WatchEventKind, file: String) {
        let keys: &[&str] = match source {
            WatchSource::Beads => &[BEADS_KEY],
            WatchSource::Runs => &[RUNS_KEY],
            WatchSource::Progress => &[PROGRESS_KEY],
            WatchSource::Artifact | WatchSource::Inbox => &[BEADS_KEY, RUNS_KEY, PROGRESS_KEY],
        };
        for key in keys {
            self.inner.producers.invalidate(key);
        }
        debug!(event = "filesystem_change", source = %source, kind = %kind, file = %file);

        let metadata = ChangeMetadata {
            source,
            event_kind: kind,
            file,
        };
        tokio::join!(
            self.broadcast_bead_update(Some(metadata.clone())),
            self.broadcast_latest_activity(Some(metadata.clone())),
            self.broadcast_ralph_progress(Some(metadata)),
        );
    }

    /// Route one debounced watcher event.
    pub async fn handle_watch_event(&self, event: WatchEvent) {
        match event.source {
            WatchSource::Artifact => {
                self.inner
                    .hub
                    .broadcast(EventKind::ArtifactUpdate, &WatchPayload::from(&event));
            }
            WatchSource::Inbox => {
                self.inner
                    .hub
                    .broadcast(EventKind::InboxUpdate, &WatchPayload::from(&event));
            }
            WatchSource::Beads | WatchSource::Runs | WatchSource::Progress => {
                self.on_filesystem_change(event.source, event.kind, event.file)
                    .await;
            }
        }
    }

    pub fn broadcast_agent_output(&self, agent: &str, output: &str) -> usize {
        self.inner
            .hub
            .broadcast(EventKind::AgentOutput, &AgentOutputPayload::new(agent, output))
    }

    pub fn broadcast_agent_error(&self, agent: &str, error: &str) -> usize {
        self.inner
            .hub
            .broadcast(EventKind::AgentError, &AgentErrorPayload::new(agent, error))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn poll_loop(weak: Weak<MonitorInner>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let Some(inner) = weak.upgrade() else { break };
        let monitor = ChangeMonitor { inner };
        monitor.inner.producers.cache().prune_expired();
        monitor.poll_agent_status().await;
    }
}

async fn forward_loop(
    weak: Weak<MonitorInner>,
    mut rx: mpsc::UnboundedReceiver<WatchEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => event,
        };
        let Some(event) = event else { break };
        let Some(inner) = weak.upgrade() else { break };
        ChangeMonitor { inner }.handle_watch_event(event).await;
    }
}
