use thiserror::Error;

/// Error type shared across the whole client.
///
/// Kept `Clone` so a connection's last error can be handed to every
/// waiter that was multiplexed onto it; source errors that are not
/// cloneable are carried as strings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    #[error("invalid server address: {0}")]
    InvalidServerAddress(String),

    #[error("no raw query support by current transport")]
    NoRawSupport,

    /// Internal sentinel for a cache miss. Never surfaced to callers.
    #[error("not cached")]
    NotCached,

    #[error("response rejected")]
    ResponseRejected,

    #[error("response rejected (cached)")]
    ResponseRejectedCached,

    #[error("DNS query loopback in transport[{0}]")]
    QueryLoopback(String),

    /// Upstream answered with a non-Success, non-NXDOMAIN rcode.
    #[error("unexpected rcode: {}", rcode_name(.0))]
    UnexpectedRcode(u16),

    /// NXDOMAIN where an error value is required, e.g. the system
    /// resolver reporting not-found.
    #[error("rcode: name error")]
    RcodeNameError,

    #[error("query timeout")]
    QueryTimeout,

    #[error("query cancelled")]
    Cancelled,

    /// Pack or unpack failure in the wire codec.
    #[error("invalid DNS message: {0}")]
    InvalidMessage(String),

    #[error("transport[{transport}] dial failed: {reason}")]
    Dial { transport: String, reason: String },

    #[error("transport[{transport}] read failed: {reason}")]
    Read { transport: String, reason: String },

    #[error("transport[{transport}] write failed: {reason}")]
    Write { transport: String, reason: String },

    #[error("transport[{transport}] TLS handshake failed: {reason}")]
    TlsHandshake { transport: String, reason: String },

    #[error("transport[{transport}] HTTP request failed: {reason}")]
    Http { transport: String, reason: String },

    #[error("transport[{transport}] unexpected HTTP status: {status}")]
    UnexpectedStatus { transport: String, status: u16 },

    #[error("transport[{transport}] connection closed")]
    ConnectionClosed { transport: String },
}

impl DnsError {
    /// True for the rejection pair produced by response checkers.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DnsError::ResponseRejected | DnsError::ResponseRejectedCached
        )
    }
}

fn rcode_name(code: &u16) -> String {
    let name = match *code {
        0 => "NOERROR",
        1 => "FORMERR",
        2 => "SERVFAIL",
        3 => "NXDOMAIN",
        4 => "NOTIMP",
        5 => "REFUSED",
        _ => return code.to_string(),
    };
    format!("{} ({})", name, code)
}
