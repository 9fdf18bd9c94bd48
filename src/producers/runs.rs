use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{RunLister, RunRecord};
use crate::errors::ProducerError;

/// Reads the agent runner's JSONL run log (one record appended per run).
pub struct RunLogLister {
    path: PathBuf,
}

impl RunLogLister {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl RunLister for RunLogLister {
    async fn list_runs(&self) -> Result<Vec<RunRecord>, ProducerError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ProducerError::ReadFailed {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        Ok(parse_run_log(&content))
    }
}

/// Parse a run log, newest first.
///
/// The log is append-only and best-effort, so a torn or malformed line is
/// skipped rather than failing the whole read.
pub fn parse_run_log(content: &str) -> Vec<RunRecord> {
    let mut runs: Vec<RunRecord> = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match serde_json::from_str(line) {
            Ok(run) => Some(run),
            Err(e) => {
                debug!(event = "run_log_skip_line", line = idx + 1, error = %e);
                None
            }
        })
        .collect();
    runs.reverse();
    runs
}
