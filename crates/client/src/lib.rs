//! Multi-transport DNS client.
//!
//! A stub-resolver client engine ([`Client`]) that dispatches queries
//! over UDP, TCP, TLS (DoT), HTTPS (DoH), QUIC (DoQ) or HTTP/3 (DoH3)
//! upstreams, with a TTL-aware response cache, per-query address-family
//! strategies, EDNS0 client-subnet injection and a pluggable
//! rejected-response memory ([`RdrcStore`]).
//!
//! Transports are selected by server URL scheme via
//! [`create_transport`]; see [`ServerEndpoint`] for the syntax.

pub mod cache;
pub mod client;
pub mod context;
pub mod message;
pub mod rdrc;
pub mod transport;

pub use client::{Client, ClientOptions};
pub use context::QueryContext;
pub use manifold_dns_domain::{
    DnsError, DomainStrategy, QueryOptions, ServerEndpoint, UpstreamAddr, DEFAULT_TTL,
};
pub use rdrc::{MemoryRdrcStore, RdrcStore};
pub use transport::{create_transport, DnsTransport, TransportOptions};
