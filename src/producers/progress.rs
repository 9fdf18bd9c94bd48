use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use super::{PrdProgress, PrdTask, ProgressProvider, TaskProgress};
use crate::errors::ProducerError;

// Compile regexes once using LazyLock
static CHECKBOX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*]\s+\[([ xX])\]\s+(.+?)\s*$").unwrap());

static TASK_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\**([A-Za-z][A-Za-z0-9_]*-\d+)\**[:.)]?\s+(.*)$").unwrap());

/// Loop state written by the ralph runner between iterations.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RalphState {
    #[serde(default, alias = "currentTask")]
    active_task: Option<String>,
    #[serde(default)]
    current_iteration: u32,
    #[serde(default)]
    max_iterations: u32,
}

/// Reads ralph loop state (JSON) and PRD checklist (markdown).
pub struct RalphProgressProvider {
    state_file: PathBuf,
    prd_file: PathBuf,
}

impl RalphProgressProvider {
    pub fn new(state_file: PathBuf, prd_file: PathBuf) -> Self {
        Self {
            state_file,
            prd_file,
        }
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, ProducerError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ProducerError::ReadFailed {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[async_trait]
impl ProgressProvider for RalphProgressProvider {
    async fn task_progress(&self) -> Result<TaskProgress, ProducerError> {
        let state = match read_optional(&self.state_file).await? {
            Some(json) if !json.trim().is_empty() => {
                serde_json::from_str::<RalphState>(&json).map_err(|source| {
                    ProducerError::ParseFailed {
                        what: self.state_file.display().to_string(),
                        source,
                    }
                })?
            }
            _ => RalphState::default(),
        };

        let tasks = read_optional(&self.prd_file)
            .await?
            .map(|md| parse_prd_tasks(&md))
            .unwrap_or_default();
        let done = tasks.iter().filter(|t| t.done).count();

        Ok(TaskProgress {
            active_task: state.active_task,
            current_iteration: state.current_iteration,
            max_iterations: state.max_iterations,
            prd_progress: PrdProgress {
                done,
                total: tasks.len(),
            },
            tasks,
        })
    }
}

/// Extract checklist items (`- [ ]` / `- [x]`) from a PRD document.
///
/// A leading `ID-123:` token becomes the task id; otherwise ids are
/// `task-<n>` by position.
pub fn parse_prd_tasks(markdown: &str) -> Vec<PrdTask> {
    markdown
        .lines()
        .filter_map(|line| CHECKBOX_REGEX.captures(line))
        .enumerate()
        .map(|(idx, caps)| {
            let done = !caps[1].trim().is_empty();
            let text = caps[2].to_string();
            let (id, title) = match TASK_ID_REGEX.captures(&text) {
                Some(id_caps) => (id_caps[1].to_string(), id_caps[2].trim().to_string()),
                None => (format!("task-{}", idx + 1), text),
            };
            PrdTask { id, title, done }
        })
        .collect()
}
