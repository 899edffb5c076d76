//! Idempotency cache (§3 `CommandPacket` invariant, §4.2).
//!
//! Keyed by request id with a 5-minute TTL and an LRU cap (~1000 entries
//! per the source system, both configurable). A duplicate receipt within
//! the window returns the stored response without re-dispatch.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::transport::protocol::PacketResponse;

struct Entry {
    response: PacketResponse,
    inserted_at: Instant,
}

struct Inner {
    entries: HashMap<String, Entry>,
    /// Insertion order for LRU eviction once `capacity` is exceeded.
    order: VecDeque<String>,
}

pub struct IdempotencyCache {
    inner: Mutex<Inner>,
    ttl: Duration,
    capacity: usize,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl,
            capacity,
        }
    }

    /// Returns the cached response if `request_id` was seen within the TTL.
    pub async fn get(&self, request_id: &str) -> Option<PacketResponse> {
        let mut inner = self.inner.lock().await;
        let expired = match inner.entries.get(request_id) {
            Some(e) => e.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            inner.entries.remove(request_id);
            return None;
        }
        inner.entries.get(request_id).map(|e| e.response.clone())
    }

    /// Store a response for `request_id`, evicting the oldest entry if the
    /// cache is at capacity.
    pub async fn put(&self, request_id: String, response: PacketResponse) {
        let mut inner = self.inner.lock().await;
        if !inner.entries.contains_key(&request_id) {
            inner.order.push_back(request_id.clone());
        }
        inner.entries.insert(
            request_id,
            Entry {
                response,
                inserted_at: Instant::now(),
            },
        );

        while inner.entries.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::protocol::PacketStatus;

    fn resp(id: &str) -> PacketResponse {
        PacketResponse {
            request_id: id.to_string(),
            status: PacketStatus::Ok,
            output: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn duplicate_within_ttl_returns_cached_response() {
        let cache = IdempotencyCache::new(Duration::from_secs(300), 1000);
        cache.put("r1".to_string(), resp("r1")).await;
        let hit = cache.get("r1").await;
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let cache = IdempotencyCache::new(Duration::from_millis(10), 1000);
        cache.put("r1".to_string(), resp("r1")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("r1").await.is_none());
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_entry() {
        let cache = IdempotencyCache::new(Duration::from_secs(300), 2);
        cache.put("r1".to_string(), resp("r1")).await;
        cache.put("r2".to_string(), resp("r2")).await;
        cache.put("r3".to_string(), resp("r3")).await;

        assert!(cache.get("r1").await.is_none());
        assert!(cache.get("r2").await.is_some());
        assert!(cache.get("r3").await.is_some());
    }
}
