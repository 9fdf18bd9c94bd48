//! Integration tests for the opsboard binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create an opsboard Command
fn opsboard() -> Command {
    let mut cmd = cargo_bin_cmd!("opsboard");
    cmd.env_remove("OPSBOARD_PORT")
        .env_remove("OPSBOARD_HOST")
        .env_remove("OPSBOARD_LOG")
        .env_remove("OPSBOARD_BD_CMD");
    cmd
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn write_config(dir: &TempDir, content: &str) {
    fs::create_dir_all(dir.path().join(".opsboard")).unwrap();
    fs::write(dir.path().join(".opsboard/opsboard.toml"), content).unwrap();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_opsboard_help() {
        opsboard()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("watch"))
            .stdout(predicate::str::contains("config"));
    }

    #[test]
    fn test_opsboard_version() {
        opsboard()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_serve_help_lists_flags() {
        opsboard()
            .args(["serve", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--port"))
            .stdout(predicate::str::contains("--host"))
            .stdout(predicate::str::contains("--open"))
            .stdout(predicate::str::contains("--dev"));
    }

    #[test]
    fn test_watch_rejects_unknown_kind() {
        opsboard()
            .args(["watch", "--kind", "bogus"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown event kind 'bogus'"));
    }

    #[test]
    fn test_missing_subcommand_fails() {
        opsboard().assert().failure();
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();

        opsboard()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No opsboard.toml found"))
            .stdout(predicate::str::contains("port = 3141"));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = create_temp_project();

        opsboard()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created opsboard.toml"));

        let path = dir.path().join(".opsboard/opsboard.toml");
        assert!(path.exists());
        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("[server]"));
        assert!(content.contains("[producers]"));
    }

    #[test]
    fn test_config_init_does_not_overwrite() {
        let dir = create_temp_project();
        write_config(&dir, "[server]\nport = 9999\n");

        opsboard()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        let content = fs::read_to_string(dir.path().join(".opsboard/opsboard.toml")).unwrap();
        assert!(content.contains("9999"));
    }

    #[test]
    fn test_config_validate_no_config() {
        let dir = create_temp_project();

        opsboard()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using defaults (valid)"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        write_config(
            &dir,
            r#"
[client]
base_delay_ms = 5000
max_delay_ms = 1000
"#,
        );

        opsboard()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings"))
            .stdout(predicate::str::contains("max_delay_ms"));
    }

    #[test]
    fn test_config_validate_clean_file() {
        let dir = create_temp_project();
        write_config(&dir, "[server]\nport = 8080\n");

        opsboard()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_show_file_and_env_override() {
        let dir = create_temp_project();
        write_config(
            &dir,
            r#"
[server]
port = 8080

[[watch.artifact_roots]]
alias = "docs"
path = "docs"
"#,
        );

        opsboard()
            .current_dir(dir.path())
            .env("OPSBOARD_HOST", "0.0.0.0")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Config file:"))
            .stdout(predicate::str::contains("port = 8080"))
            .stdout(predicate::str::contains("host = \"0.0.0.0\""))
            .stdout(predicate::str::contains("docs"));
    }

    #[test]
    fn test_invalid_env_port_fails() {
        let dir = create_temp_project();

        opsboard()
            .current_dir(dir.path())
            .env("OPSBOARD_PORT", "not-a-port")
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("OPSBOARD_PORT"));
    }

    #[test]
    fn test_serve_with_broken_config_fails() {
        let dir = create_temp_project();
        write_config(&dir, "[server\nport = ");

        opsboard()
            .current_dir(dir.path())
            .arg("serve")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to load configuration"));
    }
}

// =============================================================================
// Global Flag Tests
// =============================================================================

mod global_flags {
    use super::*;

    #[test]
    fn test_project_dir_flag() {
        let dir = create_temp_project();

        opsboard()
            .args(["--project-dir", dir.path().to_str().unwrap(), "config", "init"])
            .assert()
            .success();

        assert!(dir.path().join(".opsboard/opsboard.toml").exists());
    }

    #[test]
    fn test_verbose_flag_accepted() {
        let dir = create_temp_project();

        opsboard()
            .current_dir(dir.path())
            .args(["--verbose", "config", "show"])
            .assert()
            .success();
    }
}
