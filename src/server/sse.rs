//! `GET /api/events`: one long-lived server-sent-events response per client.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::api::SharedState;
use crate::hub::payloads::ConnectedPayload;
use crate::hub::{BroadcastHub, ChannelSink, ClientId};
use crate::protocol::EventKind;

/// Unregisters the client when the response body is dropped, which is how
/// a disconnect surfaces on the server side.
struct ClientGuard {
    hub: BroadcastHub,
    id: ClientId,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        if self.hub.remove_client(self.id) {
            debug!(event = "client_disconnected", client = %self.id);
        }
    }
}

pub async fn events_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let (sink, rx) = ChannelSink::new(state.client_buffer);
    let id = state.hub.add_client(Arc::new(sink));
    state
        .hub
        .send_to(id, EventKind::Connected, &ConnectedPayload::new());
    state.monitor.send_latest_agent_status(id);

    let guard = ClientGuard {
        hub: state.hub.clone(),
        id,
    };
    let stream = ReceiverStream::new(rx).map(move |frame| {
        let _ = &guard;
        Ok::<_, Infallible>(frame)
    });

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}
