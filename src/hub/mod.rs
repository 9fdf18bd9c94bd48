//! Broadcast hub: fans typed events out to every connected stream client.
//!
//! The registry is a mutex-guarded list of client sinks. `broadcast` copies
//! the list under the lock and writes after releasing it, so clients can be
//! added or removed (including by a failing write) while a broadcast runs.
//! A client registered during a broadcast does not receive that event, and
//! one removed before its turn is skipped.

pub mod monitor;
pub mod payloads;
pub mod sink;

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{EventKind, HEARTBEAT_FRAME, encode_event};

pub use monitor::ChangeMonitor;
pub use sink::{ChannelSink, ClientSink};

/// How often idle streams receive a keep-alive comment.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Identifies one registered client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone)]
struct Registered {
    id: ClientId,
    sink: Arc<dyn ClientSink>,
}

struct HubInner {
    // Lock order: clients, then heartbeat.
    clients: Mutex<Vec<Registered>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    heartbeat_interval: Duration,
}

/// Shared handle to the hub. Cloning is cheap; all clones see the same clients.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

impl BroadcastHub {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            inner: Arc::new(HubInner {
                clients: Mutex::new(Vec::new()),
                heartbeat: Mutex::new(None),
                heartbeat_interval: heartbeat_interval.max(Duration::from_millis(1)),
            }),
        }
    }

    /// Register a client. The first registration starts the heartbeat task,
    /// so this must be called from within a tokio runtime.
    pub fn add_client(&self, sink: Arc<dyn ClientSink>) -> ClientId {
        let id = ClientId::new();
        let mut clients = self.lock_clients();
        clients.push(Registered { id, sink });
        if clients.len() == 1 {
            self.start_heartbeat();
        }
        debug!(event = "client_added", client = %id, clients = clients.len());
        id
    }

    /// Unregister a client. Returns false if it was not registered.
    /// Removing the last client stops the heartbeat.
    pub fn remove_client(&self, id: ClientId) -> bool {
        let mut clients = self.lock_clients();
        let before = clients.len();
        clients.retain(|c| c.id != id);
        let removed = clients.len() != before;
        if removed {
            if clients.is_empty() {
                self.stop_heartbeat();
            }
            debug!(event = "client_removed", client = %id, clients = clients.len());
        }
        removed
    }

    pub fn client_count(&self) -> usize {
        self.lock_clients().len()
    }

    /// Serialize `payload` and write one frame to every registered client.
    ///
    /// Returns the number of clients the frame was delivered to. Clients
    /// whose write fails are removed; the failure never reaches the caller.
    pub fn broadcast<T: Serialize + ?Sized>(&self, kind: EventKind, payload: &T) -> usize {
        let frame = match encode_event(kind, payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event = "broadcast_encode_failed", kind = %kind, error = %e);
                return 0;
            }
        };
        self.write_all(&frame)
    }

    /// Write one frame to a single client. Returns false if the client is
    /// unknown or the write failed (in which case it is removed).
    pub fn send_to<T: Serialize + ?Sized>(&self, id: ClientId, kind: EventKind, payload: &T) -> bool {
        let frame = match encode_event(kind, payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event = "send_encode_failed", kind = %kind, error = %e);
                return false;
            }
        };
        let target = self.lock_clients().iter().find(|c| c.id == id).cloned();
        match target {
            Some(client) => self.deliver(&client, &frame),
            None => false,
        }
    }

    /// Write the keep-alive comment to every registered client.
    pub fn send_heartbeat(&self) -> usize {
        self.write_all(HEARTBEAT_FRAME)
    }

    /// Stop the heartbeat, close every client stream and empty the registry.
    pub fn shutdown(&self) {
        let drained: Vec<Registered> = {
            let mut clients = self.lock_clients();
            self.stop_heartbeat();
            clients.drain(..).collect()
        };
        for client in &drained {
            client.sink.close();
        }
        info!(event = "hub_shutdown", closed = drained.len());
    }

    /// True while a heartbeat task is scheduled.
    pub fn heartbeat_active(&self) -> bool {
        self.inner
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn write_all(&self, frame: &str) -> usize {
        let snapshot: Vec<Registered> = self.lock_clients().clone();
        snapshot
            .iter()
            .filter(|client| self.is_registered(client.id) && self.deliver(client, frame))
            .count()
    }

    fn is_registered(&self, id: ClientId) -> bool {
        self.lock_clients().iter().any(|c| c.id == id)
    }

    fn deliver(&self, client: &Registered, frame: &str) -> bool {
        match client.sink.write(frame) {
            Ok(()) => true,
            Err(e) => {
                debug!(event = "client_write_failed", client = %client.id, error = %e);
                self.remove_client(client.id);
                false
            }
        }
    }

    fn lock_clients(&self) -> std::sync::MutexGuard<'_, Vec<Registered>> {
        self.inner
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn start_heartbeat(&self) {
        let mut slot = self
            .inner
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        let weak: Weak<HubInner> = Arc::downgrade(&self.inner);
        let period = self.inner.heartbeat_interval;
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately; the first heartbeat is
            // due one full period after the first client connects.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                BroadcastHub { inner }.send_heartbeat();
            }
        }));
    }

    fn stop_heartbeat(&self) {
        if let Some(handle) = self
            .inner
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
