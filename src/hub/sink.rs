use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::errors::SinkError;

/// The write side of one connected client.
///
/// Writes must not block: the hub writes to every client in turn, so a slow
/// client reports `SinkError::Full` and is dropped instead of stalling the
/// rest.
pub trait ClientSink: Send + Sync {
    fn write(&self, frame: &str) -> Result<(), SinkError>;

    /// End the stream. Later writes fail with `SinkError::Closed`.
    fn close(&self);
}

/// A sink backed by a bounded channel whose receiver feeds an HTTP body.
pub struct ChannelSink {
    tx: Mutex<Option<mpsc::Sender<String>>>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

impl ClientSink for ChannelSink {
    fn write(&self, frame: &str) -> Result<(), SinkError> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(SinkError::Closed)?;
        tx.try_send(frame.to_string()).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_frames_in_order() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.write("a").unwrap();
        sink.write("b").unwrap();
        assert_eq!(rx.recv().await.unwrap(), "a");
        assert_eq!(rx.recv().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_channel_sink_full_buffer() {
        let (sink, _rx) = ChannelSink::new(1);
        sink.write("a").unwrap();
        assert_eq!(sink.write("b"), Err(SinkError::Full));
    }

    #[tokio::test]
    async fn test_channel_sink_receiver_dropped() {
        let (sink, rx) = ChannelSink::new(4);
        drop(rx);
        assert_eq!(sink.write("a"), Err(SinkError::Closed));
    }

    #[tokio::test]
    async fn test_close_ends_the_stream() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.write("last").unwrap();
        sink.close();
        assert_eq!(sink.write("late"), Err(SinkError::Closed));
        assert_eq!(rx.recv().await.unwrap(), "last");
        assert!(rx.recv().await.is_none());
    }
}
