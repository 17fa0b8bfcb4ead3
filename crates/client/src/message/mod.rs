//! Helpers over the `hickory-proto` message model: address
//! extraction, EDNS0 client-subnet editing, TTL arithmetic and the
//! UDP truncation policy.

pub mod addresses;
pub mod subnet;
pub mod truncate;
pub mod ttl;

pub use addresses::message_to_addresses;
pub use subnet::{client_subnet, set_client_subnet};
pub use truncate::{truncate_message, truncate_to};
pub use ttl::{decay_ttl, filter_https_hints, min_ttl, unify_ttl};

use manifold_dns_domain::DnsError;

pub(crate) fn codec_error(error: hickory_proto::error::ProtoError) -> DnsError {
    DnsError::InvalidMessage(error.to_string())
}
