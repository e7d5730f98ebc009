//! Idempotency cache for replayed requests.
//!
//! The seller consults this cache strictly before any side-effecting
//! handler runs: on a hit the handler is bypassed and the recorded
//! response bytes are returned verbatim, so a replay within the retention
//! window is byte-identical to the first response.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use common::MessageId;

#[derive(Debug, Clone)]
struct CachedResponse {
    bytes: Bytes,
    recorded_at: Instant,
}

/// Bounded mapping from message ID to the first response.
///
/// Entries expire after the retention window (default 30 minutes) and are
/// removed by the periodic sweep.
#[derive(Debug)]
pub struct IdempotencyCache {
    entries: DashMap<MessageId, CachedResponse>,
    retention: Duration,
}

impl IdempotencyCache {
    /// Creates a cache with the given retention window.
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
        }
    }

    /// Returns the recorded response for a message ID, if it has been
    /// seen and has not expired.
    pub fn lookup(&self, message_id: &MessageId) -> Option<Bytes> {
        let entry = self.entries.get(message_id)?;
        if entry.recorded_at.elapsed() > self.retention {
            return None;
        }
        Some(entry.bytes.clone())
    }

    /// Records the response for a message ID.
    ///
    /// The first recording wins; replays must not overwrite it.
    pub fn record(&self, message_id: MessageId, response: Bytes) {
        self.entries.entry(message_id).or_insert(CachedResponse {
            bytes: response,
            recorded_at: Instant::now(),
        });
    }

    /// Removes entries older than the retention window.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.recorded_at.elapsed() <= self.retention);
        before - self.entries.len()
    }

    /// Returns the number of cached responses.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no responses are cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawns a background sweep on the given interval, stopping on the
    /// shutdown signal.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = cache.len(), "swept idempotency cache");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(30 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str) -> Bytes {
        Bytes::copy_from_slice(body.as_bytes())
    }

    #[test]
    fn test_miss_for_unseen_message() {
        let cache = IdempotencyCache::default();
        assert!(cache.lookup(&MessageId::new()).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_replay_returns_identical_bytes() {
        let cache = IdempotencyCache::default();
        let message_id = MessageId::new();
        let recorded = response("{\"type\":\"SUCCESS\"}");

        cache.record(message_id, recorded.clone());

        let first = cache.lookup(&message_id).unwrap();
        let second = cache.lookup(&message_id).unwrap();
        assert_eq!(first, recorded);
        assert_eq!(second, recorded);
    }

    #[test]
    fn test_first_recording_wins() {
        let cache = IdempotencyCache::default();
        let message_id = MessageId::new();

        cache.record(message_id, response("first"));
        cache.record(message_id, response("second"));

        assert_eq!(cache.lookup(&message_id).unwrap(), response("first"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = IdempotencyCache::new(Duration::from_millis(10));
        let message_id = MessageId::new();
        cache.record(message_id, response("stale"));

        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.lookup(&message_id).is_none());
    }

    #[test]
    fn test_sweep_removes_only_expired_entries() {
        let cache = IdempotencyCache::new(Duration::from_millis(30));
        let old = MessageId::new();
        cache.record(old, response("old"));

        std::thread::sleep(Duration::from_millis(40));
        let fresh = MessageId::new();
        cache.record(fresh, response("fresh"));

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup(&fresh).is_some());
    }

    #[tokio::test]
    async fn test_sweeper_task_cleans_and_stops() {
        let cache = Arc::new(IdempotencyCache::new(Duration::from_millis(10)));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        cache.record(MessageId::new(), response("doomed"));
        let sweeper = cache.spawn_sweeper(Duration::from_millis(20), shutdown_rx);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.is_empty());

        shutdown_tx.send(()).unwrap();
        sweeper.await.unwrap();
    }
}
