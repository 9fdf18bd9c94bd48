use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use super::command::run_command;
use super::{Bead, BeadLister};
use crate::errors::ProducerError;

/// Lists beads via `bd list --json` in the project directory.
pub struct BdBeadLister {
    bd_cmd: String,
    project_dir: PathBuf,
    timeout: Duration,
}

impl BdBeadLister {
    pub fn new(bd_cmd: &str, project_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            bd_cmd: bd_cmd.to_string(),
            project_dir,
            timeout,
        }
    }
}

#[async_trait]
impl BeadLister for BdBeadLister {
    async fn list_beads(&self) -> Result<Vec<Bead>, ProducerError> {
        let output = run_command(
            &self.bd_cmd,
            &["list", "--json"],
            Some(&self.project_dir),
            self.timeout,
        )
        .await?;
        parse_bead_list(&output)
    }
}

/// `bd` prints `[]`, an array of beads, or nothing at all for an empty tracker.
pub fn parse_bead_list(output: &str) -> Result<Vec<Bead>, ProducerError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed).map_err(|source| ProducerError::ParseFailed {
        what: "bd list output".to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bead_list() {
        let out = r#"[
            {"id":"bd-1","title":"Add cache","status":"open","priority":1},
            {"id":"bd-2","title":"Wire SSE","status":"in_progress"}
        ]"#;
        let beads = parse_bead_list(out).unwrap();
        assert_eq!(beads.len(), 2);
        assert_eq!(beads[1].status, "in_progress");
        assert_eq!(beads[0].extra["priority"], 1);
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_bead_list("").unwrap().is_empty());
        assert!(parse_bead_list("  \n").unwrap().is_empty());
        assert!(parse_bead_list("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_garbage_is_parse_error() {
        let err = parse_bead_list("Error: not a beads repo").unwrap_err();
        assert!(matches!(err, ProducerError::ParseFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bd_lister_surfaces_unparseable_output() {
        // `echo list --json` stands in for a bd binary that prints prose.
        let dir = tempfile::tempdir().unwrap();
        let lister = BdBeadLister::new("echo", dir.path().to_path_buf(), Duration::from_secs(5));
        let err = lister.list_beads().await.unwrap_err();
        assert!(matches!(err, ProducerError::ParseFailed { .. }));
    }

    #[tokio::test]
    async fn test_bd_lister_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let lister = BdBeadLister::new(
            "opsboard-missing-bd",
            dir.path().to_path_buf(),
            Duration::from_secs(5),
        );
        let err = lister.list_beads().await.unwrap_err();
        assert!(matches!(err, ProducerError::SpawnFailed { .. }));
    }
}
