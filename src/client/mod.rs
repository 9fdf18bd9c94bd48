//! Streaming client: one auto-reconnecting event stream, fanned out to
//! local callbacks.
//!
//! ```no_run
//! # async fn demo() {
//! use std::sync::Arc;
//! use opsboard::client::{HttpTransport, ReconnectConfig, ReconnectionManager};
//! use opsboard::protocol::EventKind;
//!
//! let transport = Arc::new(HttpTransport::new("http://127.0.0.1:3141/api/events"));
//! let client = ReconnectionManager::connect(transport, ReconnectConfig::default());
//! client.on(EventKind::AgentStatus, |payload| println!("{}", payload));
//! # client.destroy().await;
//! # }
//! ```

pub mod backoff;
pub mod manager;
pub mod subscribers;
pub mod transport;

pub use backoff::Backoff;
pub use manager::{ConnectionState, ReconnectConfig, ReconnectionManager};
pub use subscribers::{SubscriberRegistry, SubscriptionId};
pub use transport::{EventStream, EventTransport, HttpTransport};
