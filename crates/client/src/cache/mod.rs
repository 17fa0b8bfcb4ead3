//! TTL-aware response cache.
//!
//! Stores responses with their ORIGINAL TTLs and an absolute expiry;
//! reads hand back a copy aged by the elapsed time. Keys are the
//! question triple, optionally widened by the transport name when the
//! client runs with independent per-transport caching.

use crate::message::{decay_ttl, min_ttl};
use compact_str::CompactString;
use hickory_proto::op::{Message, Query};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Smallest cache the client will run with.
pub const MIN_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    name: CompactString,
    record_type: u16,
    class: u16,
    transport: Option<CompactString>,
}

impl CacheKey {
    fn new(question: &Query, transport: Option<&str>) -> Self {
        Self {
            name: CompactString::from(question.name().to_ascii().to_lowercase()),
            record_type: u16::from(question.query_type()),
            class: u16::from(question.query_class()),
            transport: transport.map(CompactString::from),
        }
    }
}

struct StoredResponse {
    message: Message,
    expires_at: Option<Instant>,
}

pub struct ResponseCache {
    entries: Mutex<LruCache<CacheKey, StoredResponse>>,
    disable_expire: bool,
}

impl ResponseCache {
    pub fn new(capacity: usize, disable_expire: bool) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(MIN_CAPACITY)).expect("non-zero capacity");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            disable_expire,
        }
    }

    /// Stores a response under its question. `ttl` is the unified TTL
    /// the engine computed; entries with a zero TTL are not cached.
    pub fn store(&self, question: &Query, transport: Option<&str>, message: Message, ttl: u32) {
        if ttl == 0 {
            return;
        }
        let expires_at =
            (!self.disable_expire).then(|| Instant::now() + Duration::from_secs(u64::from(ttl)));
        let key = CacheKey::new(question, transport);
        self.entries.lock().unwrap().put(
            key,
            StoredResponse {
                message,
                expires_at,
            },
        );
    }

    /// Returns an aged copy of the cached response and its remaining
    /// TTL. Expired entries are evicted on the spot. The stored entry
    /// itself is never mutated, so repeated reads stay consistent.
    pub fn load(&self, question: &Query, transport: Option<&str>) -> Option<(Message, u32)> {
        let key = CacheKey::new(question, transport);
        let mut entries = self.entries.lock().unwrap();
        let (mut copy, expires_at) = {
            let entry = entries.get(&key)?;
            (entry.message.clone(), entry.expires_at)
        };
        let Some(expires_at) = expires_at else {
            return Some((copy, 0));
        };
        let now = Instant::now();
        if now >= expires_at {
            entries.pop(&key);
            return None;
        }
        let now_ttl = expires_at.duration_since(now).as_secs() as u32;
        let original_ttl = min_ttl(&copy);
        if original_ttl > 0 {
            decay_ttl(&mut copy, original_ttl.saturating_sub(now_ttl));
        }
        Some((copy, now_ttl))
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
