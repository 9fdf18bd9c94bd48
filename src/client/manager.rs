use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::{Backoff, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
use super::subscribers::{SubscriberRegistry, SubscriptionId};
use super::transport::EventTransport;
use crate::protocol::{EventKind, SseMessage};

/// Connection lifecycle as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// `retry_count` reconnect attempts scheduled since the last open.
    Disconnected { retry_count: u32 },
    Closed,
}

impl ConnectionState {
    /// Connection indicator label.
    pub fn indicator(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "connected",
            ConnectionState::Disconnected { .. } => "disconnected",
            ConnectionState::Closed => "closed",
        }
    }

    /// Banner text shown while reconnecting.
    pub fn banner(&self) -> Option<String> {
        match self {
            ConnectionState::Disconnected { retry_count } if *retry_count > 0 => {
                Some(format!("reconnecting (attempt {})", retry_count))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.banner() {
            Some(banner) => f.write_str(&banner),
            None => f.write_str(self.indicator()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

/// Keeps one event stream connected and fans its events out to local
/// subscribers.
///
/// A background task owns the connection. It reconnects with jittered
/// exponential backoff after every error or close until [`destroy`] is
/// called (or the manager is dropped).
///
/// [`destroy`]: ReconnectionManager::destroy
pub struct ReconnectionManager {
    subscribers: SubscriberRegistry,
    state: Arc<watch::Sender<ConnectionState>>,
    visible: Arc<Notify>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectionManager {
    /// Start connecting in the background.
    pub fn connect(transport: Arc<dyn EventTransport>, config: ReconnectConfig) -> Self {
        Self::with_rng(transport, config, StdRng::from_entropy())
    }

    /// Like [`connect`](Self::connect) with a caller-supplied jitter source.
    pub fn with_rng(
        transport: Arc<dyn EventTransport>,
        config: ReconnectConfig,
        rng: StdRng,
    ) -> Self {
        let subscribers = SubscriberRegistry::new();
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let state = Arc::new(state);
        let visible = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let driver = Driver {
            transport,
            subscribers: subscribers.clone(),
            state: state.clone(),
            visible: visible.clone(),
            cancel: cancel.clone(),
            backoff: Backoff::new(config.base_delay, config.max_delay),
            rng,
        };
        let task = tokio::spawn(driver.run());

        Self {
            subscribers,
            state,
            visible,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribers.on(kind, callback)
    }

    pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.subscribers.off(kind, id)
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The view became visible again: if a reconnect is pending, skip the
    /// remaining wait and reconnect now with a fresh backoff.
    pub fn notify_visible(&self) {
        if matches!(*self.state.borrow(), ConnectionState::Disconnected { .. }) {
            self.visible.notify_waiters();
        }
    }

    /// Cancel any pending reconnect, close the connection and drop every
    /// subscriber.
    pub async fn destroy(&self) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(event = "client_task_failed", error = %e);
            }
        }
        self.subscribers.clear();
        self.state.send_replace(ConnectionState::Closed);
    }
}

impl Drop for ReconnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Driver {
    transport: Arc<dyn EventTransport>,
    subscribers: SubscriberRegistry,
    state: Arc<watch::Sender<ConnectionState>>,
    visible: Arc<Notify>,
    cancel: CancellationToken,
    backoff: Backoff,
    rng: StdRng,
}

impl Driver {
    async fn run(mut self) {
        let mut attempts: u32 = 0;
        loop {
            self.state.send_replace(ConnectionState::Connecting);
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.transport.connect() => result,
            };

            match connected {
                Ok(mut stream) => {
                    self.backoff.reset();
                    attempts = 0;
                    self.state.send_replace(ConnectionState::Open);
                    info!(event = "stream_open");

                    loop {
                        let item = tokio::select! {
                            _ = self.cancel.cancelled() => {
                                self.state.send_replace(ConnectionState::Closed);
                                return;
                            }
                            item = stream.next() => item,
                        };
                        match item {
                            Some(Ok(message)) => self.dispatch(message),
                            Some(Err(e)) => {
                                warn!(event = "stream_error", error = %e);
                                break;
                            }
                            None => {
                                info!(event = "stream_closed");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(event = "connect_failed", attempt = attempts + 1, error = %e);
                }
            }

            // Register for the visibility wake before publishing Disconnected,
            // so a notify_visible that sees the new state is never lost.
            let visible = self.visible.clone();
            let woken = visible.notified();
            tokio::pin!(woken);
            woken.as_mut().enable();

            attempts = attempts.saturating_add(1);
            self.state
                .send_replace(ConnectionState::Disconnected { retry_count: attempts });
            let delay = self.backoff.next_delay(&mut self.rng);
            debug!(event = "reconnect_scheduled", attempt = attempts, delay_ms = delay.as_millis() as u64);

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                _ = &mut woken => {
                    self.backoff.reset();
                    debug!(event = "reconnect_on_visible");
                }
            }
        }
        self.state.send_replace(ConnectionState::Closed);
    }

    fn dispatch(&self, message: SseMessage) {
        let Some(kind) = message.kind() else {
            debug!(event = "unknown_event_kind", name = %message.event);
            return;
        };
        let payload =
            serde_json::from_str(&message.data).unwrap_or(Value::String(message.data));
        self.subscribers.dispatch(kind, &payload);
    }
}
