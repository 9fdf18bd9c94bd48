//! Server-sent-events wire protocol shared by the hub and the client.
//!
//! Every message is a text frame `event: <kind>\ndata: <json>\n\n`.
//! Keep-alives are comment-only frames (`:heartbeat\n\n`) which conforming
//! clients ignore.

use serde::{Deserialize, Serialize};

/// Keep-alive frame written by the hub on its heartbeat interval.
pub const HEARTBEAT_FRAME: &str = ":heartbeat\n\n";

/// The closed set of event kinds carried on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    AgentStatus,
    BeadUpdate,
    RalphProgress,
    Activity,
    Heartbeat,
    ArtifactUpdate,
    InboxUpdate,
    AgentOutput,
    AgentError,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::Connected,
        EventKind::AgentStatus,
        EventKind::BeadUpdate,
        EventKind::RalphProgress,
        EventKind::Activity,
        EventKind::Heartbeat,
        EventKind::ArtifactUpdate,
        EventKind::InboxUpdate,
        EventKind::AgentOutput,
        EventKind::AgentError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::AgentStatus => "agent_status",
            EventKind::BeadUpdate => "bead_update",
            EventKind::RalphProgress => "ralph_progress",
            EventKind::Activity => "activity",
            EventKind::Heartbeat => "heartbeat",
            EventKind::ArtifactUpdate => "artifact_update",
            EventKind::InboxUpdate => "inbox_update",
            EventKind::AgentOutput => "agent_output",
            EventKind::AgentError => "agent_error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown event kind '{}'. Valid values: {}",
                    s,
                    EventKind::ALL
                        .iter()
                        .map(|k| k.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

/// Format one event frame. `json` must already be serialized and is
/// expected to be single-line (serde_json's compact output is).
pub fn format_event_frame(kind: EventKind, json: &str) -> String {
    format!("event: {}\ndata: {}\n\n", kind.as_str(), json)
}

/// Serialize `payload` and format it as an event frame.
pub fn encode_event<T: Serialize + ?Sized>(kind: EventKind, payload: &T) -> serde_json::Result<String> {
    let json = serde_json::to_string(payload)?;
    Ok(format_event_frame(kind, &json))
}

/// One complete event parsed off the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SseMessage {
    /// Raw `event:` field; `message` when the frame had none.
    pub event: String,
    pub data: String,
}

impl SseMessage {
    /// The typed kind, or `None` when the event name is not on the allow-list.
    pub fn kind(&self) -> Option<EventKind> {
        self.event.parse().ok()
    }
}

/// Incremental parser for a `text/event-stream` body.
///
/// Bytes arrive in arbitrary chunks; `push` buffers partial lines and
/// returns every message completed by the new chunk. Comment lines
/// (starting with `:`) and frames without data are dropped.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<SseMessage> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches('\n').trim_end_matches('\r');

            if line.is_empty() {
                if let Some(msg) = self.take_message() {
                    out.push(msg);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        out
    }

    fn take_message(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseMessage {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}
