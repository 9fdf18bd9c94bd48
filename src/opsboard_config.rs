//! Configuration for opsboard, read from `.opsboard/opsboard.toml`.
//!
//! Layers, lowest to highest precedence:
//! 1. built-in defaults
//! 2. the user file (`$XDG_CONFIG_HOME/opsboard/opsboard.toml`), used only
//!    when the project has no file of its own
//! 3. the project file `.opsboard/opsboard.toml`
//! 4. environment (`OPSBOARD_PORT`, `OPSBOARD_HOST`, `OPSBOARD_LOG`,
//!    `OPSBOARD_BD_CMD`)
//! 5. CLI flags
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! heartbeat_secs = 30
//! client_buffer = 64
//!
//! [monitor]
//! poll_interval_ms = 5000
//!
//! [cache]
//! max_entries = 100
//! ttl_ms = 2000
//!
//! [watch]
//! debounce_ms = 300
//! max_depth = 4
//! inbox_dir = "inbox"
//! watch_producers = true
//!
//! [[watch.artifact_roots]]
//! alias = "docs"
//! path = "docs"
//!
//! [producers]
//! tmux_cmd = "tmux"
//! agent_session_prefix = "agent-"
//! bd_cmd = "bd"
//! runs_log = ".opsboard/runs.jsonl"
//! progress_state = ".ralph/state.json"
//! prd_file = "PRD.md"
//! command_timeout_ms = 10000
//!
//! [client]
//! url = "http://127.0.0.1:3141/api/events"
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! # file = ".opsboard/logs/opsboard.log"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::ReconnectConfig;
use crate::errors::ConfigError;
use crate::hub::monitor::MonitorConfig;
use crate::watch::{DebounceConfig, RootDescriptor, WatchSource, WatchTarget, dashboard_targets};

pub const CONFIG_DIR: &str = ".opsboard";
pub const CONFIG_FILE: &str = "opsboard.toml";

/// Environment variables layered over the file.
pub const ENV_PORT: &str = "OPSBOARD_PORT";
pub const ENV_HOST: &str = "OPSBOARD_HOST";
pub const ENV_LOG: &str = "OPSBOARD_LOG";
pub const ENV_BD_CMD: &str = "OPSBOARD_BD_CMD";

// ── [server] ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds between keep-alive comments on idle streams.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Frames buffered per client before it counts as too slow and is dropped.
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
    /// Allowed CORS origins. Empty means same-origin only.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_client_buffer() -> usize {
    64
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            heartbeat_secs: default_heartbeat_secs(),
            client_buffer: default_client_buffer(),
            cors_origins: Vec::new(),
        }
    }
}

// ── [monitor] ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    5000
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

// ── [cache] ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_max_entries() -> usize {
    crate::cache::DEFAULT_MAX_ENTRIES
}

fn default_ttl_ms() -> u64 {
    crate::cache::DEFAULT_TTL.as_millis() as u64
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_ms: default_ttl_ms(),
        }
    }
}

// ── [watch] ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSection {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Inbox directory; its `pending`, `processed` and `archived`
    /// subdirectories are watched.
    #[serde(default)]
    pub inbox_dir: Option<PathBuf>,
    /// Also watch the files the producers read and refresh on change.
    #[serde(default = "default_watch_producers")]
    pub watch_producers: bool,
    #[serde(default)]
    pub artifact_roots: Vec<RootDescriptor>,
}

fn default_debounce_ms() -> u64 {
    crate::watch::DEFAULT_DEBOUNCE.as_millis() as u64
}

fn default_max_depth() -> usize {
    crate::watch::DEFAULT_MAX_DEPTH
}

fn default_watch_producers() -> bool {
    true
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_depth: default_max_depth(),
            inbox_dir: None,
            watch_producers: default_watch_producers(),
            artifact_roots: Vec::new(),
        }
    }
}

// ── [producers] ──────────────────────────────────────────────────────

/// Where the producers read from. Relative paths are resolved against the
/// project directory when the config is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducersConfig {
    #[serde(default = "default_tmux_cmd")]
    pub tmux_cmd: String,
    #[serde(default = "default_agent_session_prefix")]
    pub agent_session_prefix: String,
    #[serde(default = "default_bd_cmd")]
    pub bd_cmd: String,
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,
    #[serde(default = "default_runs_log")]
    pub runs_log: PathBuf,
    #[serde(default = "default_progress_state")]
    pub progress_state: PathBuf,
    #[serde(default = "default_prd_file")]
    pub prd_file: PathBuf,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

fn default_tmux_cmd() -> String {
    "tmux".to_string()
}

fn default_agent_session_prefix() -> String {
    "agent-".to_string()
}

fn default_bd_cmd() -> String {
    "bd".to_string()
}

fn default_project_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_runs_log() -> PathBuf {
    PathBuf::from(".opsboard/runs.jsonl")
}

fn default_progress_state() -> PathBuf {
    PathBuf::from(".ralph/state.json")
}

fn default_prd_file() -> PathBuf {
    PathBuf::from("PRD.md")
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

impl Default for ProducersConfig {
    fn default() -> Self {
        Self {
            tmux_cmd: default_tmux_cmd(),
            agent_session_prefix: default_agent_session_prefix(),
            bd_cmd: default_bd_cmd(),
            project_dir: default_project_dir(),
            runs_log: default_runs_log(),
            progress_state: default_progress_state(),
            prd_file: default_prd_file(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl ProducersConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Resolve relative paths against `base`.
    fn resolve(&mut self, base: &Path) {
        self.project_dir = resolve_path(base, &self.project_dir);
        let project = self.project_dir.clone();
        self.runs_log = resolve_path(&project, &self.runs_log);
        self.progress_state = resolve_path(&project, &self.progress_state);
        self.prd_file = resolve_path(&project, &self.prd_file);
    }
}

fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else if path == Path::new(".") {
        base.to_path_buf()
    } else {
        base.join(path)
    }
}

// ── [client] ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_client_url")]
    pub url: String,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_client_url() -> String {
    format!("http://{}:{}/api/events", default_host(), default_port())
}

fn default_base_delay_ms() -> u64 {
    crate::client::backoff::DEFAULT_BASE_DELAY.as_millis() as u64
}

fn default_max_delay_ms() -> u64 {
    crate::client::backoff::DEFAULT_MAX_DELAY.as_millis() as u64
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            url: default_client_url(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

// ── [logging] ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// An `EnvFilter` directive, e.g. `info` or `opsboard=debug,tower_http=warn`.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Also write logs to this file, rotated daily.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

// ── File ─────────────────────────────────────────────────────────────

/// The complete opsboard.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpsboardToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub watch: WatchSection,
    #[serde(default)]
    pub producers: ProducersConfig,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl OpsboardToml {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: CONFIG_FILE.to_string(),
            source,
        })
    }

    /// Load `<config_dir>/opsboard.toml`, or defaults if it does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Layer environment overrides using `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_PORT.to_string(),
                value: port.clone(),
                reason: "expected a port number (0-65535)".to_string(),
            })?;
        }
        if let Some(host) = lookup(ENV_HOST).filter(|h| !h.trim().is_empty()) {
            self.server.host = host;
        }
        if let Some(level) = lookup(ENV_LOG).filter(|l| !l.trim().is_empty()) {
            self.logging.level = level;
        }
        if let Some(bd) = lookup(ENV_BD_CMD).filter(|b| !b.trim().is_empty()) {
            self.producers.bd_cmd = bd;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.heartbeat_secs == 0 {
            warnings.push("server.heartbeat_secs is 0; heartbeats will be sent continuously".to_string());
        }
        if self.server.client_buffer == 0 {
            warnings.push("server.client_buffer is 0; a buffer of 1 will be used".to_string());
        }
        if self.monitor.poll_interval_ms < 250 {
            warnings.push(format!(
                "monitor.poll_interval_ms = {} is very low; tmux will be queried constantly",
                self.monitor.poll_interval_ms
            ));
        }
        if self.cache.max_entries == 0 {
            warnings.push("cache.max_entries is 0; nothing will be cached".to_string());
        }
        if self.cache.ttl_ms > self.monitor.poll_interval_ms {
            warnings.push(format!(
                "cache.ttl_ms ({}) exceeds monitor.poll_interval_ms ({}); polls may see stale agent data",
                self.cache.ttl_ms, self.monitor.poll_interval_ms
            ));
        }
        if self.client.base_delay_ms == 0 {
            warnings.push("client.base_delay_ms is 0; reconnects will not back off".to_string());
        }
        if self.client.max_delay_ms < self.client.base_delay_ms {
            warnings.push(format!(
                "client.max_delay_ms ({}) is below client.base_delay_ms ({}); reconnect delays will reach base_delay_ms",
                self.client.max_delay_ms, self.client.base_delay_ms
            ));
        }
        if let Err(e) = tracing_subscriber::EnvFilter::try_new(&self.logging.level) {
            warnings.push(format!("Invalid logging.level '{}': {}", self.logging.level, e));
        }

        let mut aliases = std::collections::HashSet::new();
        for root in &self.watch.artifact_roots {
            if root.alias.trim().is_empty() {
                warnings.push(format!(
                    "Artifact root {} has an empty alias",
                    root.path.display()
                ));
            } else if !aliases.insert(root.alias.as_str()) {
                warnings.push(format!("Duplicate artifact root alias '{}'", root.alias));
            }
        }

        warnings
    }
}

/// User-level config file, if the platform has a config directory.
pub fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("opsboard").join(CONFIG_FILE))
}

// ── Effective config ─────────────────────────────────────────────────

/// Effective configuration: file + environment, with paths resolved.
#[derive(Debug, Clone)]
pub struct OpsboardConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    /// The file that was loaded, if any.
    pub source_file: Option<PathBuf>,
    pub toml: OpsboardToml,
}

impl OpsboardConfig {
    /// Load config for `project_dir`, layering the process environment.
    pub fn new(project_dir: &Path) -> Result<Self, ConfigError> {
        Self::with_env(project_dir, |key| std::env::var(key).ok())
    }

    pub fn with_env<F>(project_dir: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let project_dir = project_dir
            .canonicalize()
            .unwrap_or_else(|_| project_dir.to_path_buf());
        let config_dir = project_dir.join(CONFIG_DIR);
        let project_file = config_dir.join(CONFIG_FILE);

        let (mut toml, source_file) = if project_file.exists() {
            (OpsboardToml::load(&project_file)?, Some(project_file))
        } else {
            match user_config_file().filter(|p| p.exists()) {
                Some(user_file) => (OpsboardToml::load(&user_file)?, Some(user_file)),
                None => (OpsboardToml::default(), None),
            }
        };
        toml.apply_env(lookup)?;
        toml.producers.resolve(&project_dir);
        if let Some(inbox) = toml.watch.inbox_dir.take() {
            toml.watch.inbox_dir = Some(resolve_path(&project_dir, &inbox));
        }
        for root in &mut toml.watch.artifact_roots {
            root.path = resolve_path(&project_dir, &root.path);
        }
        if let Some(file) = toml.logging.file.take() {
            toml.logging.file = Some(resolve_path(&project_dir, &file));
        }

        Ok(Self {
            project_dir,
            config_dir,
            source_file,
            toml,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Apply `serve` flags on top of file and environment.
    pub fn with_server_overrides(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.toml.server.host = host;
        }
        if let Some(port) = port {
            self.toml.server.port = port;
        }
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.toml.server.host, self.toml.server.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.toml.server.heartbeat_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.toml.cache.ttl_ms)
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            base_delay: Duration::from_millis(self.toml.client.base_delay_ms),
            max_delay: Duration::from_millis(self.toml.client.max_delay_ms),
        }
    }

    /// Watch targets: artifact roots, inbox subdirectories and (optionally)
    /// the producers' backing files.
    pub fn watch_targets(&self) -> Vec<WatchTarget> {
        let watch = &self.toml.watch;
        let mut targets = dashboard_targets(&watch.artifact_roots, watch.inbox_dir.as_deref());
        if watch.watch_producers {
            let producers = &self.toml.producers;
            targets.push(WatchTarget::new(
                WatchSource::Beads,
                "beads",
                producers.project_dir.join(".beads"),
            ));
            targets.extend(WatchTarget::file(WatchSource::Runs, "runs", &producers.runs_log));
            targets.extend(WatchTarget::file(
                WatchSource::Progress,
                "progress",
                &producers.progress_state,
            ));
            targets.extend(WatchTarget::file(WatchSource::Progress, "prd", &producers.prd_file));
        }
        targets
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(self.toml.monitor.poll_interval_ms),
            debounce: DebounceConfig {
                delay: Duration::from_millis(self.toml.watch.debounce_ms),
                max_depth: self.toml.watch.max_depth,
            },
            targets: self.watch_targets(),
        }
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let toml = OpsboardToml::default();
        assert_eq!(toml.server.port, 3141);
        assert_eq!(toml.server.heartbeat_secs, 30);
        assert_eq!(toml.cache.max_entries, 100);
        assert_eq!(toml.cache.ttl_ms, 2000);
        assert_eq!(toml.watch.debounce_ms, 300);
        assert_eq!(toml.watch.max_depth, 4);
        assert_eq!(toml.producers.bd_cmd, "bd");
        assert_eq!(toml.logging.format, LogFormat::Pretty);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let toml = OpsboardToml::parse(
            r#"
[server]
port = 8080

[[watch.artifact_roots]]
alias = "docs"
path = "docs"

[logging]
format = "json"
"#,
        )
        .unwrap();
        assert_eq!(toml.server.port, 8080);
        assert_eq!(toml.server.host, "127.0.0.1");
        assert_eq!(toml.watch.artifact_roots[0].alias, "docs");
        assert_eq!(toml.logging.format, LogFormat::Json);
        assert_eq!(toml.monitor.poll_interval_ms, 5000);
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let err = OpsboardToml::parse("[server]\nport = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut toml = OpsboardToml::default();
        toml.apply_env(env(&[
            (ENV_PORT, "9000"),
            (ENV_HOST, "0.0.0.0"),
            (ENV_LOG, "debug"),
            (ENV_BD_CMD, "/opt/bd"),
        ]))
        .unwrap();
        assert_eq!(toml.server.port, 9000);
        assert_eq!(toml.server.host, "0.0.0.0");
        assert_eq!(toml.logging.level, "debug");
        assert_eq!(toml.producers.bd_cmd, "/opt/bd");
    }

    #[test]
    fn test_invalid_env_port() {
        let mut toml = OpsboardToml::default();
        let err = toml.apply_env(env(&[(ENV_PORT, "eighty")])).unwrap_err();
        assert!(err.to_string().contains(ENV_PORT));
    }

    #[test]
    fn test_validate_warnings() {
        let mut toml = OpsboardToml::default();
        toml.client.max_delay_ms = 10;
        toml.logging.level = "opsboard=loud".to_string();
        toml.watch.artifact_roots = vec![
            RootDescriptor {
                alias: "docs".to_string(),
                path: PathBuf::from("a"),
            },
            RootDescriptor {
                alias: "docs".to_string(),
                path: PathBuf::from("b"),
            },
        ];
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 3, "{:?}", warnings);
        assert!(warnings.iter().any(|w| w.contains("max_delay_ms")));
        assert!(warnings.iter().any(|w| w.contains("logging.level")));
        assert!(warnings.iter().any(|w| w.contains("Duplicate")));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_DIR).join(CONFIG_FILE);
        let mut toml = OpsboardToml::default();
        toml.server.port = 4242;
        toml.save(&path).unwrap();

        let loaded = OpsboardToml::load(&path).unwrap();
        assert_eq!(loaded.server.port, 4242);
    }

    #[test]
    fn test_effective_config_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_DIR).join(CONFIG_FILE),
            r#"
[watch]
inbox_dir = "inbox"

[[watch.artifact_roots]]
alias = "docs"
path = "docs"
"#,
        )
        .unwrap();

        let config = OpsboardConfig::with_env(dir.path(), env(&[(ENV_PORT, "5000")])).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.project_dir, root);
        assert_eq!(config.toml.server.port, 5000);
        assert_eq!(config.toml.producers.project_dir, root);
        assert_eq!(config.toml.producers.runs_log, root.join(".opsboard/runs.jsonl"));
        assert_eq!(config.toml.watch.inbox_dir, Some(root.join("inbox")));
        assert_eq!(config.toml.watch.artifact_roots[0].path, root.join("docs"));
        assert!(config.source_file.is_some());
    }

    #[test]
    fn test_watch_targets_cover_dashboard_and_producers() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OpsboardConfig::with_env(dir.path(), env(&[])).unwrap();
        config.toml.watch.inbox_dir = Some(dir.path().join("inbox"));

        let targets = config.watch_targets();
        let sources: Vec<WatchSource> = targets.iter().map(|t| t.source).collect();
        assert_eq!(sources.iter().filter(|s| **s == WatchSource::Inbox).count(), 3);
        assert!(sources.contains(&WatchSource::Beads));
        assert!(sources.contains(&WatchSource::Runs));
        let runs = targets.iter().find(|t| t.source == WatchSource::Runs).unwrap();
        assert_eq!(runs.only_file.as_deref(), Some("runs.jsonl"));

        config.toml.watch.watch_producers = false;
        assert_eq!(config.watch_targets().len(), 3);
    }

    #[test]
    fn test_server_overrides_take_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let config = OpsboardConfig::with_env(dir.path(), env(&[(ENV_PORT, "5000")]))
            .unwrap()
            .with_server_overrides(Some("0.0.0.0".to_string()), Some(6000));
        assert_eq!(config.bind_address(), "0.0.0.0:6000");
    }
}
