//! Typed event classes broadcast by the node.
//!
//! Each class gets its own broadcast channel; every subscriber owns a
//! bounded queue and lagging subscribers lose the oldest events rather than
//! stalling the publisher.

use rbtp_primitives::{Log, SealedBlock, TransactionSignedEcRecovered};
use std::{fmt, sync::Arc};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// The canonical head moved to a new block.
#[derive(Debug, Clone)]
pub struct ChainHeadEvent {
    /// The new head block.
    pub block: Arc<SealedBlock>,
}

/// A block was displaced from (or arrived outside) the canonical chain.
#[derive(Debug, Clone)]
pub struct ChainSideEvent {
    /// The side-chain block.
    pub block: Arc<SealedBlock>,
}

/// Logs that were un-mined by a reorg.
#[derive(Debug, Clone)]
pub struct RemovedLogsEvent {
    /// The retracted logs.
    pub logs: Vec<Log>,
}

/// Logs newly added to the canonical chain.
#[derive(Debug, Clone)]
pub struct LogsEvent {
    /// The new logs.
    pub logs: Vec<Log>,
}

/// Transactions admitted to or promoted inside the pool, nonce ordered per
/// sender.
#[derive(Debug, Clone)]
pub struct NewTxsEvent {
    /// The admitted transactions.
    pub transactions: Vec<Arc<TransactionSignedEcRecovered>>,
}

/// A broadcast channel for one event class.
///
/// Sending never blocks; events published with no subscribers are dropped.
pub struct EventSender<T> {
    sender: broadcast::Sender<T>,
}

impl<T> fmt::Debug for EventSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender").field("receivers", &self.sender.receiver_count()).finish()
    }
}

impl<T: Clone + Send + 'static> EventSender<T> {
    /// Creates the channel with the given per-subscriber queue depth.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all current subscribers.
    pub fn notify(&self, event: T) {
        // an error only means there are no subscribers right now
        let _ = self.sender.send(event);
    }

    /// Opens a new subscription.
    pub fn subscribe(&self) -> EventStream<T> {
        EventStream { inner: BroadcastStream::new(self.sender.subscribe()) }
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone + Send + 'static> Default for EventSender<T> {
    fn default() -> Self {
        // matches the default event queue depth used across subsystems
        Self::new(256)
    }
}

/// A subscription to one event class, skipping over lagged gaps.
#[derive(Debug)]
pub struct EventStream<T> {
    inner: BroadcastStream<T>,
}

impl<T: Clone + Send + 'static> EventStream<T> {
    /// Receives the next event, skipping gaps left by lagging.
    pub async fn recv(&mut self) -> Option<T> {
        use tokio_stream::StreamExt;
        loop {
            match self.inner.next().await {
                Some(Ok(event)) => return Some(event),
                // lagged: the oldest events were dropped, keep draining
                Some(Err(_)) => continue,
                None => return None,
            }
        }
    }

    /// Receives without waiting; `None` when no event is queued.
    pub fn try_recv(&mut self) -> Option<T> {
        use futures::FutureExt;
        self.recv().now_or_never().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let sender = EventSender::<u64>::new(8);
        let mut a = sender.subscribe();
        let mut b = sender.subscribe();
        sender.notify(7);
        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.recv().await, Some(7));
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_to_fresh_events() {
        let sender = EventSender::<u64>::new(2);
        let mut sub = sender.subscribe();
        for i in 0..10 {
            sender.notify(i);
        }
        // the two newest events survive the lag
        assert_eq!(sub.recv().await, Some(8));
        assert_eq!(sub.recv().await, Some(9));
    }

    #[test]
    fn notify_without_subscribers_is_a_noop() {
        EventSender::<u64>::new(2).notify(1);
    }
}
