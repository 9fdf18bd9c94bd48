//! Dashboard server command: `opsboard serve`.

use anyhow::{Context, Result};

use opsboard::opsboard_config::OpsboardConfig;
use opsboard::server::{ServeOptions, start_server};

pub async fn cmd_serve(
    project_dir: &std::path::Path,
    verbose: bool,
    host: Option<String>,
    port: Option<u16>,
    open: bool,
    dev: bool,
) -> Result<()> {
    let config = OpsboardConfig::new(project_dir)
        .context("Failed to load configuration")?
        .with_server_overrides(host, port);
    let _log_guard = opsboard::logging::init(&config.toml.logging, verbose)?;

    for warning in config.validate() {
        tracing::warn!(event = "config_warning", warning = %warning);
    }

    start_server(
        &config,
        ServeOptions {
            dev_mode: dev,
            open_browser: open,
        },
    )
    .await
}
