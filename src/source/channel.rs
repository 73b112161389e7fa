use std::time::Duration;

use tokio::sync::mpsc;

use super::{MessageSource, SourceError};
use crate::message::RawMessage;

/// Create a bounded in-process queue: a cloneable sender and the source
/// that drains it.
pub fn channel(capacity: usize) -> (ChannelSender, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelSender { tx }, ChannelSource { rx })
}

/// Producer handle for a [`ChannelSource`].
#[derive(Clone, Debug)]
pub struct ChannelSender {
    tx: mpsc::Sender<RawMessage>,
}

impl ChannelSender {
    /// Enqueue a message, waiting for queue space.
    pub async fn send(&self, msg: RawMessage) -> Result<(), SourceError> {
        self.tx.send(msg).await.map_err(|_| SourceError::Closed)
    }

    /// Enqueue without waiting. A full queue is reported as unavailable.
    pub fn try_send(&self, msg: RawMessage) -> Result<(), SourceError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SourceError::Unavailable("queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => SourceError::Closed,
        })
    }

    /// Free slots remaining in the queue.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// In-process queue source.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<RawMessage>,
}

impl MessageSource for ChannelSource {
    fn name(&self) -> &str {
        "channel"
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<RawMessage>, SourceError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(msg)) => Ok(Some(msg)),
            Ok(None) => Err(SourceError::Closed),
            Err(_elapsed) => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_in_order() {
        let (tx, mut rx) = channel(4);
        tx.send(RawMessage::new("first", "")).await.expect("send");
        tx.send(RawMessage::new("second", "")).await.expect("send");

        let first = rx.receive(Duration::from_millis(10)).await.expect("ok");
        assert_eq!(first.map(|m| m.payload), Some(b"first".to_vec()));
        let second = rx.receive(Duration::from_millis(10)).await.expect("ok");
        assert_eq!(second.map(|m| m.payload), Some(b"second".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out_with_no_message() {
        let (_tx, mut rx) = channel(4);
        let got = rx.receive(Duration::from_secs(5)).await.expect("ok");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_dropped_senders_report_closed() {
        let (tx, mut rx) = channel(4);
        drop(tx);
        let err = rx
            .receive(Duration::from_millis(10))
            .await
            .expect_err("closed");
        assert!(matches!(err, SourceError::Closed));
    }

    #[tokio::test]
    async fn test_try_send_full_queue() {
        let (tx, _rx) = channel(1);
        tx.try_send(RawMessage::new("a", "")).expect("first fits");
        let err = tx.try_send(RawMessage::new("b", "")).expect_err("full");
        assert!(matches!(err, SourceError::Unavailable(_)));
    }
}
