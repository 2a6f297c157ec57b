//! Keyed queue registry.
//!
//! Maps a connection key (numeric client id or provider name) to the
//! sending half of an unbounded FIFO of raw frames. The creator keeps
//! the receiving half; routing loops look up senders. Lookups and
//! mutations go through one async mutex so a message is never routed
//! into a queue that is concurrently being removed.
//!
//! Queues are deliberately unbounded: the system has no backpressure
//! mechanism beyond the transport's own flow control, and bounding
//! would change observable blocking behavior. A slow consumer
//! accumulates memory.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

use crate::error::{Result, TunnelError};

/// Sending half of a registered queue; enqueue never blocks.
pub type QueueSender = UnboundedSender<Vec<u8>>;
/// Receiving half, held by the loop that consumes the queue.
pub type QueueReceiver = UnboundedReceiver<Vec<u8>>;

struct MapInner<K> {
    queues: HashMap<K, QueueSender>,
    // Process-lifetime monotonic; ids are never reused even after removal.
    next_id: u32,
}

/// Concurrency-safe map of connection keys to message queues.
pub struct QueueMap<K> {
    inner: Mutex<MapInner<K>>,
}

impl<K> Default for QueueMap<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> QueueMap<K> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MapInner {
                queues: HashMap::new(),
                next_id: 0,
            }),
        }
    }
}

impl<K: Eq + Hash + std::fmt::Display> QueueMap<K> {
    /// Insert a new queue under an explicit key and return its
    /// receiving half. A key that is already live is rejected:
    /// silently replacing it would orphan the previous queue and
    /// whoever is waiting on it.
    pub async fn insert_named(&self, key: K) -> Result<QueueReceiver> {
        let mut inner = self.inner.lock().await;
        if inner.queues.contains_key(&key) {
            return Err(TunnelError::DuplicateKey(key.to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.queues.insert(key, tx);
        Ok(rx)
    }

    /// Clone the sending half for a key, if the queue is live.
    pub async fn sender<Q>(&self, key: &Q) -> Option<QueueSender>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.lock().await.queues.get(key).cloned()
    }

    /// Remove a key. Idempotent. Dropping the stored sender wakes any
    /// pending `recv()` on the other half with `None`.
    pub async fn remove<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.lock().await.queues.remove(key);
    }

    /// Number of live queues.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.queues.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl QueueMap<u32> {
    /// Allocate the next client id and insert a queue under it.
    /// Ids start at 1 and are never reused while the process runs.
    pub async fn insert_next(&self) -> (u32, QueueReceiver) {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.queues.insert(id, tx);
        (id, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn incrementing_ids_are_unique_under_concurrency() {
        let map = Arc::new(QueueMap::<u32>::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let map = map.clone();
            handles.push(tokio::spawn(async move {
                let (id, _rx) = map.insert_next().await;
                id
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()));
        }
        assert_eq!(map.len().await, 50);
    }

    #[tokio::test]
    async fn ids_start_at_one_and_are_not_reused() {
        let map = QueueMap::<u32>::new();
        let (first, _rx1) = map.insert_next().await;
        assert_eq!(first, 1);
        map.remove(&first).await;
        let (second, _rx2) = map.insert_next().await;
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn remove_then_sender_is_absent() {
        let map = QueueMap::<String>::new();
        let _rx = map.insert_named("prov".to_string()).await.unwrap();
        assert!(map.sender("prov").await.is_some());

        map.remove("prov").await;
        assert!(map.sender("prov").await.is_none());
        // Idempotent.
        map.remove("prov").await;
    }

    #[tokio::test]
    async fn sender_on_never_created_key_is_absent() {
        let map = QueueMap::<u32>::new();
        assert!(map.sender(&99).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let map = QueueMap::<String>::new();
        let _rx = map.insert_named("p1".to_string()).await.unwrap();
        assert!(matches!(
            map.insert_named("p1".to_string()).await,
            Err(TunnelError::DuplicateKey(_))
        ));
        assert_eq!(map.len().await, 1);
    }

    #[tokio::test]
    async fn removal_wakes_pending_receiver() {
        let map = Arc::new(QueueMap::<u32>::new());
        let (id, mut rx) = map.insert_next().await;

        let map2 = map.clone();
        tokio::spawn(async move {
            map2.remove(&id).await;
        });

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn fifo_order_preserved() {
        let map = QueueMap::<u32>::new();
        let (id, mut rx) = map.insert_next().await;
        let tx = map.sender(&id).await.unwrap();
        for i in 0..10u8 {
            tx.send(vec![i]).unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(rx.recv().await.unwrap(), vec![i]);
        }
    }
}
