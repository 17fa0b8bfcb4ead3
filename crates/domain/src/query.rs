use crate::strategy::DomainStrategy;
use ipnetwork::IpNetwork;

/// Per-call options for `exchange` and `lookup`.
///
/// These are explicit values rather than ambient context: every knob
/// that changes how one query is handled travels with the call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Address-family policy for this query.
    pub strategy: DomainStrategy,
    /// Skip the response cache for this call, both load and store.
    pub disable_cache: bool,
    /// Overwrite every non-OPT record TTL in the response, and use
    /// this value for the cache expiry.
    pub rewrite_ttl: Option<u32>,
    /// EDNS0 client-subnet prefix injected into the outbound query.
    pub client_subnet: Option<IpNetwork>,
}

impl QueryOptions {
    pub fn with_strategy(strategy: DomainStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }
}
