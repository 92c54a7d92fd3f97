use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use crate::error::{Result, SwarmError};

/// Push-many/pull-one queue of encoded announcements.
///
/// Every pushed message is delivered to at most one puller. Pullers queue
/// on a fair lock, so whichever idle worker has waited longest gets the
/// next message. There is no routing: load balancing is a side effect of
/// who is pulling.
#[derive(Debug, Clone)]
pub struct BroadcastQueue {
    tx: mpsc::Sender<Bytes>,
    rx: Arc<Mutex<mpsc::Receiver<Bytes>>>,
    closed: Arc<AtomicBool>,
    capacity: usize,
}

impl BroadcastQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            closed: Arc::new(AtomicBool::new(false)),
            capacity,
        }
    }

    /// Enqueue without waiting. Fails when the queue is full or closed.
    pub fn push(&self, message: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(SwarmError::QueueClosed);
        }
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SwarmError::QueueFull(self.capacity),
            mpsc::error::TrySendError::Closed(_) => SwarmError::QueueClosed,
        })
    }

    /// Take the next message, waiting at most `timeout`.
    pub async fn pull(&self, timeout: Duration) -> Option<Bytes> {
        if self.is_closed() {
            return None;
        }
        let rx = self.rx.clone();
        tokio::time::timeout(timeout, async move { rx.lock().await.recv().await })
            .await
            .ok()
            .flatten()
    }

    /// Messages pushed but not yet pulled.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting and delivering messages. Unpulled messages are dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn each_message_is_pulled_once() {
        let queue = BroadcastQueue::new(8);
        queue.push(Bytes::from_static(b"a")).unwrap();
        queue.push(Bytes::from_static(b"b")).unwrap();
        assert_eq!(queue.len(), 2);

        let other = queue.clone();
        let first = queue.pull(WAIT).await.unwrap();
        let second = other.pull(WAIT).await.unwrap();
        assert_ne!(first, second);
        assert!(queue.pull(WAIT).await.is_none());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn push_fails_when_full() {
        let queue = BroadcastQueue::new(1);
        queue.push(Bytes::from_static(b"a")).unwrap();
        assert!(matches!(
            queue.push(Bytes::from_static(b"b")),
            Err(SwarmError::QueueFull(1))
        ));
    }

    #[tokio::test]
    async fn pull_times_out_on_empty_queue() {
        let queue = BroadcastQueue::new(1);
        let start = tokio::time::Instant::now();
        assert!(queue.pull(WAIT).await.is_none());
        assert!(start.elapsed() >= WAIT);
    }

    #[tokio::test]
    async fn closed_queue_rejects_push_and_pull() {
        let queue = BroadcastQueue::new(4);
        queue.push(Bytes::from_static(b"a")).unwrap();
        queue.close();
        assert!(matches!(
            queue.push(Bytes::from_static(b"b")),
            Err(SwarmError::QueueClosed)
        ));
        assert!(queue.pull(WAIT).await.is_none());
    }

    #[tokio::test]
    async fn waiting_puller_receives_later_push() {
        let queue = BroadcastQueue::new(4);
        let puller = queue.clone();
        let handle = tokio::spawn(async move { puller.pull(Duration::from_secs(2)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(Bytes::from_static(b"late")).unwrap();
        assert_eq!(handle.await.unwrap(), Some(Bytes::from_static(b"late")));
    }
}
