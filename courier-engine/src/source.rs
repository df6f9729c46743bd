//! Inbound message sources.
//!
//! The pub/sub transport is an external collaborator; this module is the
//! seam it plugs into. A [`MessageSource`] yields [`InboundMessage`]s that
//! must be acked or nacked exactly once; dropping a message unresolved
//! counts as a nack, so a panicking handler never loses a message.
//!
//! [`InProcessQueue`] is the bundled implementation: a bounded in-process
//! queue with redelivery on nack, matching the at-least-once contract the
//! processing pipeline assumes from a real broker.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const DEFAULT_MAX_ATTEMPTS: u32 = 5;

struct Delivery {
    payload: Vec<u8>,
    attempt: u32,
}

/// One message pulled from a source, carrying its ack state.
///
/// Call [`ack`](Self::ack) after the message has been fully handled or
/// [`nack`](Self::nack) to request redelivery. An unresolved drop nacks.
pub struct InboundMessage {
    payload: Vec<u8>,
    attempt: u32,
    max_attempts: u32,
    requeue: Option<mpsc::Sender<Delivery>>,
}

impl InboundMessage {
    /// Returns the raw message payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the 1-based delivery attempt.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Acknowledges the message; it will not be redelivered.
    pub fn ack(mut self) {
        self.requeue = None;
    }

    /// Rejects the message, requesting redelivery.
    pub fn nack(mut self) {
        self.requeue_now();
    }

    fn requeue_now(&mut self) {
        let Some(tx) = self.requeue.take() else {
            return;
        };
        if self.attempt >= self.max_attempts {
            warn!(
                attempt = self.attempt,
                "dropping message after exhausting redelivery attempts"
            );
            return;
        }
        let delivery = Delivery {
            payload: std::mem::take(&mut self.payload),
            attempt: self.attempt + 1,
        };
        if tx.try_send(delivery).is_err() {
            warn!("queue full or closed, dropping nacked message");
        }
    }
}

impl Drop for InboundMessage {
    fn drop(&mut self) {
        self.requeue_now();
    }
}

/// A stream of inbound messages with ack/nack semantics.
///
/// `recv` returns `None` when the source is permanently closed.
#[async_trait]
pub trait MessageSource: Send {
    /// Pulls the next message, waiting until one is available.
    async fn recv(&mut self) -> Option<InboundMessage>;
}

/// Publishing half of the in-process queue.
#[derive(Clone)]
pub struct QueuePublisher {
    tx: mpsc::Sender<Delivery>,
}

impl QueuePublisher {
    /// Enqueues one message payload, waiting for queue capacity.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue has been closed.
    pub async fn publish(&self, payload: Vec<u8>) -> Result<(), PublishError> {
        self.tx
            .send(Delivery {
                payload,
                attempt: 1,
            })
            .await
            .map_err(|_| PublishError::Closed)
    }
}

/// Publish failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// The consuming side of the queue is gone.
    #[error("message queue is closed")]
    Closed,
}

/// Bounded in-process [`MessageSource`] with nack-triggered redelivery.
pub struct InProcessQueue {
    rx: mpsc::Receiver<Delivery>,
    tx: mpsc::Sender<Delivery>,
    max_attempts: u32,
}

impl InProcessQueue {
    /// Creates a queue with the given capacity, returning the publisher and
    /// the source halves.
    #[must_use]
    pub fn new(capacity: usize) -> (QueuePublisher, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        let publisher = QueuePublisher { tx: tx.clone() };
        let queue = Self {
            rx,
            tx,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        };
        (publisher, queue)
    }

    /// Overrides the redelivery cap.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

#[async_trait]
impl MessageSource for InProcessQueue {
    async fn recv(&mut self) -> Option<InboundMessage> {
        let delivery = self.rx.recv().await?;
        debug!(attempt = delivery.attempt, "message pulled from queue");
        Some(InboundMessage {
            payload: delivery.payload,
            attempt: delivery.attempt,
            max_attempts: self.max_attempts,
            requeue: Some(self.tx.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_ack() {
        let (publisher, mut queue) = InProcessQueue::new(8);
        publisher.publish(b"hello".to_vec()).await.unwrap();

        let message = queue.recv().await.unwrap();
        assert_eq!(message.payload(), b"hello");
        assert_eq!(message.attempt(), 1);
        message.ack();

        // Acked messages are not redelivered.
        publisher.publish(b"next".to_vec()).await.unwrap();
        let next = queue.recv().await.unwrap();
        assert_eq!(next.payload(), b"next");
    }

    #[tokio::test]
    async fn test_nack_redelivers_with_incremented_attempt() {
        let (publisher, mut queue) = InProcessQueue::new(8);
        publisher.publish(b"m".to_vec()).await.unwrap();

        queue.recv().await.unwrap().nack();

        let redelivered = queue.recv().await.unwrap();
        assert_eq!(redelivered.payload(), b"m");
        assert_eq!(redelivered.attempt(), 2);
        redelivered.ack();
    }

    #[tokio::test]
    async fn test_drop_without_ack_redelivers() {
        let (publisher, mut queue) = InProcessQueue::new(8);
        publisher.publish(b"m".to_vec()).await.unwrap();

        {
            let _message = queue.recv().await.unwrap();
            // Dropped unresolved, e.g. by a panicking handler.
        }

        let redelivered = queue.recv().await.unwrap();
        assert_eq!(redelivered.attempt(), 2);
    }

    #[tokio::test]
    async fn test_redelivery_cap() {
        let (publisher, queue) = InProcessQueue::new(8);
        let mut queue = queue.with_max_attempts(2);
        publisher.publish(b"m".to_vec()).await.unwrap();

        queue.recv().await.unwrap().nack();
        queue.recv().await.unwrap().nack();

        // Third delivery never arrives.
        let timeout =
            tokio::time::timeout(std::time::Duration::from_millis(50), queue.recv()).await;
        assert!(timeout.is_err());
    }
}
