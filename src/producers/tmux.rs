use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::command::run_command;
use super::{AgentInfo, AgentLister, AgentStatus, PaneCapture};
use crate::errors::ProducerError;

/// Sessions with no pane activity for this long are reported idle.
const IDLE_AFTER_SECS: i64 = 300;

/// tmux format string: one tab-separated line per session.
///
/// `@bead` and `@context_pct` are user options the agent runner sets on its
/// sessions; they expand to empty strings when unset.
const SESSION_FORMAT: &str =
    "#{session_name}\t#{session_created}\t#{session_activity}\t#{pane_dead}\t#{@bead}\t#{@context_pct}";

/// Lists agent sessions from a tmux server.
pub struct TmuxAgentLister {
    tmux_cmd: String,
    session_prefix: String,
    timeout: Duration,
}

impl TmuxAgentLister {
    pub fn new(tmux_cmd: &str, session_prefix: &str, timeout: Duration) -> Self {
        Self {
            tmux_cmd: tmux_cmd.to_string(),
            session_prefix: session_prefix.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl AgentLister for TmuxAgentLister {
    async fn list_agents(&self) -> Result<Vec<AgentInfo>, ProducerError> {
        let output = match run_command(
            &self.tmux_cmd,
            &["list-sessions", "-F", SESSION_FORMAT],
            None,
            self.timeout,
        )
        .await
        {
            Ok(out) => out,
            // No tmux server simply means no agents.
            Err(ProducerError::CommandFailed { stderr, .. })
                if stderr.contains("no server running") || stderr.contains("error connecting") =>
            {
                debug!(event = "tmux_no_server");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let now = chrono::Utc::now().timestamp();
        Ok(parse_sessions(&output, &self.session_prefix, now))
    }
}

#[async_trait]
impl PaneCapture for TmuxAgentLister {
    async fn capture(&self, agent: &str, lines: usize) -> Result<String, ProducerError> {
        // `=name` makes tmux match the session exactly instead of by prefix.
        let target = format!("={}", agent);
        let start = format!("-{}", lines);
        let output = run_command(
            &self.tmux_cmd,
            &["capture-pane", "-p", "-J", "-t", &target, "-S", &start],
            None,
            self.timeout,
        )
        .await?;
        Ok(trim_capture(&output))
    }
}

/// Drop the blank padding tmux appends below the last written line.
pub fn trim_capture(output: &str) -> String {
    output.trim_end_matches(['\n', ' ']).to_string()
}

/// Parse `list-sessions` output, keeping sessions whose name starts with `prefix`.
pub fn parse_sessions(output: &str, prefix: &str, now_epoch: i64) -> Vec<AgentInfo> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            let name = *fields.first()?;
            if name.is_empty() || !name.starts_with(prefix) {
                return None;
            }
            let created = fields.get(1).and_then(|s| s.parse::<i64>().ok());
            let activity = fields.get(2).and_then(|s| s.parse::<i64>().ok());
            let pane_dead = fields.get(3).is_some_and(|s| *s == "1");
            let bead = fields
                .get(4)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .or_else(|| bead_from_session_name(name, prefix));
            let context_percent = fields
                .get(5)
                .and_then(|s| s.trim_end_matches('%').parse::<u8>().ok())
                .map(|p| p.min(100));

            let status = if pane_dead {
                AgentStatus::Exited
            } else if activity.is_some_and(|a| now_epoch - a > IDLE_AFTER_SECS) {
                AgentStatus::Idle
            } else {
                AgentStatus::Running
            };

            let running_time_label = created
                .map(|c| running_time_label(now_epoch.saturating_sub(c)))
                .unwrap_or_default();

            Some(AgentInfo {
                name: name.to_string(),
                status,
                bead,
                running_time_label,
                context_percent,
            })
        })
        .collect()
}

/// `agent-bd-42` with prefix `agent-` → `bd-42`.
fn bead_from_session_name(name: &str, prefix: &str) -> Option<String> {
    let rest = name.strip_prefix(prefix)?;
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

/// Compact elapsed-time label: `45s`, `12m`, `1h 5m`, `2d 3h`.
pub fn running_time_label(elapsed_secs: i64) -> String {
    let secs = elapsed_secs.max(0);
    let (days, hours, mins) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60);
    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_800_000_000;

    #[test]
    fn test_parse_sessions_filters_by_prefix() {
        let output = format!(
            "agent-bd-1\t{}\t{}\t0\t\t42\nscratch\t{}\t{}\t0\t\t\n",
            NOW - 600,
            NOW - 5,
            NOW - 100,
            NOW - 100
        );
        let agents = parse_sessions(&output, "agent-", NOW);
        assert_eq!(agents.len(), 1);
        let a = &agents[0];
        assert_eq!(a.name, "agent-bd-1");
        assert_eq!(a.status, AgentStatus::Running);
        assert_eq!(a.bead.as_deref(), Some("bd-1"));
        assert_eq!(a.running_time_label, "10m");
        assert_eq!(a.context_percent, Some(42));
    }

    #[test]
    fn test_parse_sessions_prefers_bead_user_option() {
        let output = format!("agent-alpha\t{}\t{}\t0\tbd-77\t\n", NOW - 30, NOW - 1);
        let agents = parse_sessions(&output, "agent-", NOW);
        assert_eq!(agents[0].bead.as_deref(), Some("bd-77"));
        assert_eq!(agents[0].context_percent, None);
        assert_eq!(agents[0].running_time_label, "30s");
    }

    #[test]
    fn test_parse_sessions_idle_and_exited() {
        let output = format!(
            "agent-a\t{}\t{}\t0\t\t\nagent-b\t{}\t{}\t1\t\t\n",
            NOW - 4000,
            NOW - 1000,
            NOW - 4000,
            NOW - 1
        );
        let agents = parse_sessions(&output, "agent-", NOW);
        assert_eq!(agents[0].status, AgentStatus::Idle);
        assert_eq!(agents[1].status, AgentStatus::Exited);
        assert_eq!(agents[0].running_time_label, "1h 6m");
    }

    #[test]
    fn test_parse_sessions_tolerates_short_lines() {
        let agents = parse_sessions("agent-x\n\n", "agent-", NOW);
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].running_time_label, "");
        assert_eq!(agents[0].bead.as_deref(), Some("x"));
    }

    #[test]
    fn test_context_percent_clamped_and_accepts_suffix() {
        let output = format!("agent-a\t{}\t{}\t0\t\t87%\n", NOW, NOW);
        assert_eq!(parse_sessions(&output, "agent-", NOW)[0].context_percent, Some(87));
        let output = format!("agent-a\t{}\t{}\t0\t\t250\n", NOW, NOW);
        assert_eq!(parse_sessions(&output, "agent-", NOW)[0].context_percent, Some(100));
    }

    #[test]
    fn test_trim_capture_drops_trailing_blank_lines() {
        assert_eq!(trim_capture("$ cargo test\nok\n\n\n   \n"), "$ cargo test\nok");
        assert_eq!(trim_capture(""), "");
    }

    #[test]
    fn test_running_time_label() {
        assert_eq!(running_time_label(0), "0s");
        assert_eq!(running_time_label(59), "59s");
        assert_eq!(running_time_label(60), "1m");
        assert_eq!(running_time_label(3_660), "1h 1m");
        assert_eq!(running_time_label(90_000), "1d 1h");
        assert_eq!(running_time_label(-5), "0s");
    }
}
