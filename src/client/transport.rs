use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};

use crate::errors::TransportError;
use crate::protocol::{SseMessage, SseParser};

/// Parsed messages from one open connection. The stream ends when the
/// connection closes; dropping it closes the connection.
pub type EventStream = BoxStream<'static, Result<SseMessage, TransportError>>;

/// Opens event stream connections.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Resolves once the server has accepted the stream.
    async fn connect(&self) -> Result<EventStream, TransportError>;
}

/// `text/event-stream` over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn connect(&self) -> Result<EventStream, TransportError> {
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        let mut decoder = FrameDecoder::default();
        let messages = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder.feed(&bytes).into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(TransportError::Http(e))],
            })
            .flat_map(stream::iter);
        Ok(messages.boxed())
    }
}

/// Feeds raw body bytes to the SSE parser one complete line at a time, so a
/// multi-byte character split across chunks is never decoded in halves.
#[derive(Default)]
pub(crate) struct FrameDecoder {
    parser: SseParser,
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.pending.extend_from_slice(chunk);
        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        self.parser.push(&String::from_utf8_lossy(&complete))
    }
}
