//! Stream follower: `opsboard watch`.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use opsboard::client::{HttpTransport, ReconnectionManager};
use opsboard::opsboard_config::OpsboardConfig;
use opsboard::protocol::EventKind;

/// Kinds printed when no `--kind` filter is given. Heartbeats are comments
/// on the wire and never reach subscribers.
fn default_kinds() -> Vec<EventKind> {
    EventKind::ALL
        .into_iter()
        .filter(|k| *k != EventKind::Heartbeat)
        .collect()
}

fn format_event(kind: EventKind, payload: &Value, json: bool) -> String {
    if json {
        serde_json::json!({ "event": kind.as_str(), "data": payload }).to_string()
    } else {
        format!(
            "[{}] {:<15} {}",
            chrono::Local::now().format("%H:%M:%S"),
            kind.as_str(),
            payload
        )
    }
}

pub async fn cmd_watch(
    project_dir: &std::path::Path,
    verbose: bool,
    url: Option<String>,
    kinds: &[EventKind],
    json: bool,
) -> Result<()> {
    let config = OpsboardConfig::new(project_dir).context("Failed to load configuration")?;
    let _log_guard = opsboard::logging::init(&config.toml.logging, verbose)?;

    let url = url.unwrap_or_else(|| config.toml.client.url.clone());
    let kinds = if kinds.is_empty() {
        default_kinds()
    } else {
        kinds.to_vec()
    };

    let transport = Arc::new(HttpTransport::new(url.clone()));
    let client = ReconnectionManager::connect(transport, config.reconnect_config());
    for kind in kinds {
        client.on(kind, move |payload| println!("{}", format_event(kind, payload, json)));
    }

    // Connection state goes to stderr so stdout stays pipeable.
    let mut states = client.subscribe_state();
    let state_task = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            eprintln!("[{}] {}", url, state);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    client.destroy().await;
    state_task.abort();
    Ok(())
}
