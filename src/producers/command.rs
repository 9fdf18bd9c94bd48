//! Subprocess helper shared by the CLI-backed producers.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::errors::ProducerError;

/// Run `program args...` and return its stdout.
///
/// Non-zero exit is an error carrying trimmed stderr. The child is killed if
/// it outlives `timeout`.
pub async fn run_command(
    program: &str,
    args: &[&str],
    dir: Option<&Path>,
    timeout: Duration,
) -> Result<String, ProducerError> {
    let display = if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|source| ProducerError::SpawnFailed {
        cmd: display.clone(),
        source,
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| ProducerError::SpawnFailed {
            cmd: display.clone(),
            source,
        })?,
        Err(_) => {
            return Err(ProducerError::TimedOut {
                cmd: display,
                after_ms: timeout.as_millis() as u64,
            });
        }
    };

    if !output.status.success() {
        return Err(ProducerError::CommandFailed {
            cmd: display,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_captures_stdout() {
        let out = run_command("echo", &["hello"], None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_command_nonzero_exit_is_error() {
        let err = run_command("sh", &["-c", "echo oops >&2; exit 3"], None, Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            ProducerError::CommandFailed { stderr, .. } => assert_eq!(stderr, "oops"),
            other => panic!("Expected CommandFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_command_missing_binary_is_spawn_failure() {
        let err = run_command("opsboard-no-such-binary", &[], None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ProducerError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_run_command_times_out() {
        let err = run_command("sleep", &["5"], None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ProducerError::TimedOut { after_ms: 50, .. }));
    }

    #[tokio::test]
    async fn test_run_command_uses_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_command("pwd", &[], Some(dir.path()), Duration::from_secs(5))
            .await
            .unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(Path::new(out.trim()).canonicalize().unwrap(), expected);
    }
}
