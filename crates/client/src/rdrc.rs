//! Rejected-DNS-response cache: a negative memo of upstream answers a
//! response checker has already thrown out, keyed by
//! (transport, qname, qtype).

use async_trait::async_trait;
use compact_str::CompactString;
use dashmap::DashMap;
use manifold_dns_domain::DnsError;
use std::time::{Duration, Instant};

/// Pluggable store behind the engine's response-check bookkeeping.
///
/// `load_rdrc` sits on the query hot path and must be fast; how long
/// an entry stays rejected is the store's own policy.
#[async_trait]
pub trait RdrcStore: Send + Sync {
    fn load_rdrc(&self, transport_name: &str, qname: &str, qtype: u16) -> bool;

    async fn save_rdrc(
        &self,
        transport_name: &str,
        qname: &str,
        qtype: u16,
    ) -> Result<(), DnsError>;
}

type RdrcKey = (CompactString, CompactString, u16);

/// In-memory store with per-entry expiry. Suitable as a default
/// factory and for tests; a persistent implementation can replace it
/// without touching the engine.
pub struct MemoryRdrcStore {
    entries: DashMap<RdrcKey, Instant>,
    timeout: Duration,
}

impl MemoryRdrcStore {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key(transport_name: &str, qname: &str, qtype: u16) -> RdrcKey {
        (
            CompactString::from(transport_name),
            CompactString::from(qname),
            qtype,
        )
    }
}

impl Default for MemoryRdrcStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl RdrcStore for MemoryRdrcStore {
    fn load_rdrc(&self, transport_name: &str, qname: &str, qtype: u16) -> bool {
        let key = Self::key(transport_name, qname, qtype);
        {
            let Some(expires_at) = self.entries.get(&key) else {
                return false;
            };
            if *expires_at > Instant::now() {
                return true;
            }
        }
        self.entries.remove(&key);
        false
    }

    async fn save_rdrc(
        &self,
        transport_name: &str,
        qname: &str,
        qtype: u16,
    ) -> Result<(), DnsError> {
        self.entries.insert(
            Self::key(transport_name, qname, qtype),
            Instant::now() + self.timeout,
        );
        Ok(())
    }
}
