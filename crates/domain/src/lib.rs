pub mod endpoint;
pub mod errors;
pub mod query;
pub mod strategy;

pub use endpoint::{ServerEndpoint, UpstreamAddr};
pub use errors::DnsError;
pub use query::QueryOptions;
pub use strategy::DomainStrategy;

/// TTL stamped on responses synthesised from bare address lists.
pub const DEFAULT_TTL: u32 = 600;

/// Upper bound applied to a single exchange unless configured otherwise.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
