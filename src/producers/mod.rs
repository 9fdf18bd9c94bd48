//! Data producers: the external collaborators the dashboard reads from.
//!
//! | Trait              | Backing implementation                         |
//! |--------------------|------------------------------------------------|
//! | `AgentLister`      | `tmux::TmuxAgentLister` (tmux sessions)        |
//! | `PaneCapture`      | `tmux::TmuxAgentLister` (`capture-pane`)       |
//! | `BeadLister`       | `beads::BdBeadLister` (`bd list --json`)       |
//! | `RunLister`        | `runs::RunLogLister` (JSONL append log)        |
//! | `ProgressProvider` | `progress::RalphProgressProvider` (state+PRD)  |
//!
//! `cached::CachedProducers` wraps a [`Producers`] bundle with the shared
//! TTL cache so route handlers, the poll loop and filesystem-triggered
//! refreshes coalesce onto one subprocess call per key.

pub mod beads;
pub mod cached;
pub mod command;
pub mod progress;
pub mod runs;
pub mod tmux;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ProducerError;

pub use cached::CachedProducers;

// ── Agents ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    Idle,
    Exited,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Exited => write!(f, "exited"),
        }
    }
}

/// One agent session as shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub name: String,
    pub status: AgentStatus,
    pub bead: Option<String>,
    pub running_time_label: String,
    pub context_percent: Option<u8>,
}

#[async_trait]
pub trait AgentLister: Send + Sync {
    async fn list_agents(&self) -> Result<Vec<AgentInfo>, ProducerError>;
}

/// Reads the recent terminal output of one agent session.
#[async_trait]
pub trait PaneCapture: Send + Sync {
    /// The last `lines` lines of `agent`'s pane.
    async fn capture(&self, agent: &str, lines: usize) -> Result<String, ProducerError>;
}

// ── Beads ────────────────────────────────────────────────────────────

/// A task tracked by the `bd` CLI. Unknown fields are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bead {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub status: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Bead totals per dashboard column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeadCounts {
    pub todo: usize,
    pub active: usize,
    pub done: usize,
    pub failed: usize,
}

impl BeadCounts {
    /// Bucket beads by status. Statuses outside the four columns are not counted.
    pub fn from_beads(beads: &[Bead]) -> Self {
        let mut counts = BeadCounts::default();
        for bead in beads {
            match bead.status.to_ascii_lowercase().as_str() {
                "open" | "todo" | "ready" | "pending" => counts.todo += 1,
                "in_progress" | "in-progress" | "active" | "running" => counts.active += 1,
                "closed" | "done" | "completed" => counts.done += 1,
                "failed" | "error" => counts.failed += 1,
                _ => {}
            }
        }
        counts
    }
}

#[async_trait]
pub trait BeadLister: Send + Sync {
    async fn list_beads(&self) -> Result<Vec<Bead>, ProducerError>;
}

// ── Runs ─────────────────────────────────────────────────────────────

/// One finished (or still running) agent run from the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub bead: String,
    pub started_at: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[async_trait]
pub trait RunLister: Send + Sync {
    /// Runs ordered newest first.
    async fn list_runs(&self) -> Result<Vec<RunRecord>, ProducerError>;
}

// ── Task progress ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrdProgress {
    pub done: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrdTask {
    pub id: String,
    pub title: String,
    pub done: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub active_task: Option<String>,
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub prd_progress: PrdProgress,
    pub tasks: Vec<PrdTask>,
}

#[async_trait]
pub trait ProgressProvider: Send + Sync {
    async fn task_progress(&self) -> Result<TaskProgress, ProducerError>;
}

/// The four producers the dashboard reads from.
#[derive(Clone)]
pub struct Producers {
    pub agents: Arc<dyn AgentLister>,
    pub beads: Arc<dyn BeadLister>,
    pub runs: Arc<dyn RunLister>,
    pub progress: Arc<dyn ProgressProvider>,
}

impl Producers {
    /// Build the process- and filesystem-backed producers from config.
    pub fn from_config(config: &crate::opsboard_config::ProducersConfig) -> Self {
        let timeout = config.command_timeout();
        Self {
            agents: Arc::new(tmux::TmuxAgentLister::new(
                &config.tmux_cmd,
                &config.agent_session_prefix,
                timeout,
            )),
            beads: Arc::new(beads::BdBeadLister::new(
                &config.bd_cmd,
                config.project_dir.clone(),
                timeout,
            )),
            runs: Arc::new(runs::RunLogLister::new(config.runs_log.clone())),
            progress: Arc::new(progress::RalphProgressProvider::new(
                config.progress_state.clone(),
                config.prd_file.clone(),
            )),
        }
    }
}
