//! JSON payloads carried by each event kind.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::producers::{AgentInfo, AgentStatus, BeadCounts, PrdProgress, PrdTask, RunRecord, TaskProgress};
use crate::watch::{WatchEvent, WatchEventKind, WatchSource};

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// What triggered a filesystem-driven refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMetadata {
    pub source: WatchSource,
    pub event_kind: WatchEventKind,
    pub file: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectedPayload {
    pub timestamp: String,
}

impl ConnectedPayload {
    pub fn new() -> Self {
        Self { timestamp: now() }
    }
}

impl Default for ConnectedPayload {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusPayload {
    pub timestamp: String,
    pub agents: Vec<AgentInfo>,
    pub running_count: usize,
    pub total_count: usize,
}

impl AgentStatusPayload {
    pub fn new(agents: Vec<AgentInfo>) -> Self {
        let running_count = agents
            .iter()
            .filter(|a| a.status == AgentStatus::Running)
            .count();
        Self {
            timestamp: now(),
            total_count: agents.len(),
            running_count,
            agents,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BeadUpdatePayload {
    pub timestamp: String,
    #[serde(flatten)]
    pub counts: BeadCounts,
    #[serde(flatten)]
    pub metadata: Option<ChangeMetadata>,
}

impl BeadUpdatePayload {
    pub fn new(counts: BeadCounts, metadata: Option<ChangeMetadata>) -> Self {
        Self {
            timestamp: now(),
            counts,
            metadata,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    AgentComplete,
    AgentFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityPayload {
    pub timestamp: String,
    /// Wall-clock start of the run, `HH:MM:SS` local time.
    pub time: String,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub message: String,
    #[serde(flatten)]
    pub metadata: Option<ChangeMetadata>,
}

impl ActivityPayload {
    /// `None` while the run has not exited yet.
    pub fn from_run(run: &RunRecord, metadata: Option<ChangeMetadata>) -> Option<Self> {
        let code = run.exit_code?;
        let (activity_type, message) = if code == 0 {
            (ActivityType::AgentComplete, format!("{} completed", run.bead))
        } else {
            (
                ActivityType::AgentFailed,
                format!("{} failed (exit {})", run.bead, code),
            )
        };
        Some(Self {
            timestamp: now(),
            time: clock_time(&run.started_at),
            activity_type,
            message,
            metadata,
        })
    }
}

fn clock_time(started_at: &str) -> String {
    DateTime::parse_from_rfc3339(started_at)
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|_| started_at.to_string())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RalphProgressPayload {
    pub timestamp: String,
    pub current_task: Option<String>,
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub prd_progress: PrdProgress,
    pub tasks: Vec<PrdTask>,
    #[serde(flatten)]
    pub metadata: Option<ChangeMetadata>,
}

impl RalphProgressPayload {
    pub fn new(progress: TaskProgress, metadata: Option<ChangeMetadata>) -> Self {
        Self {
            timestamp: now(),
            current_task: progress.active_task,
            current_iteration: progress.current_iteration,
            max_iterations: progress.max_iterations,
            prd_progress: progress.prd_progress,
            tasks: progress.tasks,
            metadata,
        }
    }
}

/// Payload of `artifact_update` and `inbox_update`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchPayload {
    pub source: WatchSource,
    pub root: String,
    pub event_type: WatchEventKind,
    pub file: String,
    /// Milliseconds since the Unix epoch.
    pub ts: i64,
}

impl From<&WatchEvent> for WatchPayload {
    fn from(event: &WatchEvent) -> Self {
        Self {
            source: event.source,
            root: event.root.clone(),
            event_type: event.kind,
            file: event.file.clone(),
            ts: event.timestamp.timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentOutputPayload {
    pub timestamp: String,
    pub agent: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentErrorPayload {
    pub timestamp: String,
    pub agent: String,
    pub error: String,
}

impl AgentOutputPayload {
    pub fn new(agent: &str, output: &str) -> Self {
        Self {
            timestamp: now(),
            agent: agent.to_string(),
            output: output.to_string(),
        }
    }
}

impl AgentErrorPayload {
    pub fn new(agent: &str, error: &str) -> Self {
        Self {
            timestamp: now(),
            agent: agent.to_string(),
            error: error.to_string(),
        }
    }
}
