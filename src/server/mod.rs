//! HTTP front end: the event stream plus thin JSON reads over the cached
//! producers.

pub mod api;
pub mod sse;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use crate::hub::{BroadcastHub, ChangeMonitor};
use crate::opsboard_config::OpsboardConfig;
use crate::producers::tmux::TmuxAgentLister;
use crate::producers::{CachedProducers, Producers};

pub use api::{AppState, SharedState};

/// Options for `opsboard serve` that are not part of the config file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServeOptions {
    /// Allow any CORS origin (local front-end dev server).
    pub dev_mode: bool,
    /// Open the dashboard in a browser once bound.
    pub open_browser: bool,
}

/// Wire hub, producers and monitor together from config.
pub fn build_state(config: &OpsboardConfig) -> SharedState {
    let toml = &config.toml;
    let hub = BroadcastHub::new(config.heartbeat_interval());
    let producers = CachedProducers::new(
        Producers::from_config(&toml.producers),
        toml.cache.max_entries,
        config.cache_ttl(),
    );
    let monitor = ChangeMonitor::new(hub.clone(), producers.clone(), config.monitor_config());
    let capture = Arc::new(TmuxAgentLister::new(
        &toml.producers.tmux_cmd,
        &toml.producers.agent_session_prefix,
        toml.producers.command_timeout(),
    ));
    Arc::new(AppState {
        hub,
        monitor,
        producers,
        capture,
        client_buffer: toml.server.client_buffer,
    })
}

/// Build the full application router.
pub fn build_router(state: SharedState) -> Router {
    api::api_router().with_state(state)
}

/// CORS policy: everything in dev mode, the configured origins otherwise,
/// and same-origin only when none are configured.
pub fn cors_layer(origins: &[String], dev_mode: bool) -> Option<CorsLayer> {
    if dev_mode {
        return Some(CorsLayer::permissive());
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(event = "cors_origin_invalid", origin = %origin);
                None
            }
        })
        .collect();
    if allowed.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods([Method::GET, Method::POST]),
    )
}

/// Run the dashboard server until Ctrl+C / SIGTERM.
pub async fn start_server(config: &OpsboardConfig, options: ServeOptions) -> Result<()> {
    let state = build_state(config);
    let monitor = state.monitor.clone();

    let mut app = build_router(state);
    if let Some(cors) = cors_layer(&config.toml.server.cors_origins, options.dev_mode) {
        app = app.layer(cors);
    }

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;

    monitor.start_monitoring();
    info!(event = "server_started", addr = %local_addr, project = %config.project_dir.display());
    println!("opsboard running at http://{}", local_addr);
    println!("Event stream: http://{}/api/events", local_addr);

    if options.open_browser && !options.dev_mode {
        let url = format!("http://{}", local_addr);
        tokio::spawn(async move {
            if let Err(e) = open::that(&url) {
                warn!(event = "browser_open_failed", url = %url, error = %e);
            }
        });
    }

    // Open SSE responses only end once the hub closes them.
    let shutdown_monitor = monitor.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_monitor.cleanup().await;
        })
        .await
        .context("Server error")?;

    monitor.cleanup().await;
    info!(event = "server_stopped");
    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(event = "signal_handler_failed", signal = "ctrl_c", error = %e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(event = "signal_handler_failed", signal = "terminate", error = %e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    println!("\nShutting down...");
}
