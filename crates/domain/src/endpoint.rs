use crate::errors::DnsError;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_PLAIN_PORT: u16 = 53;
pub const DEFAULT_TLS_PORT: u16 = 853;
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// An upstream server address that may or may not already be an IP.
///
/// Unresolved hostnames are resolved at dial time by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpstreamAddr {
    Resolved(SocketAddr),
    Unresolved { hostname: Arc<str>, port: u16 },
}

impl UpstreamAddr {
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            UpstreamAddr::Resolved(addr) => Some(*addr),
            UpstreamAddr::Unresolved { .. } => None,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            UpstreamAddr::Resolved(addr) => addr.port(),
            UpstreamAddr::Unresolved { port, .. } => *port,
        }
    }

    /// Host part as written: the IP for resolved addresses, the
    /// hostname otherwise. Used for SNI.
    pub fn host(&self) -> String {
        match self {
            UpstreamAddr::Resolved(addr) => addr.ip().to_string(),
            UpstreamAddr::Unresolved { hostname, .. } => hostname.to_string(),
        }
    }
}

impl fmt::Display for UpstreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamAddr::Resolved(addr) => write!(f, "{}", addr),
            UpstreamAddr::Unresolved { hostname, port } => write!(f, "{}:{}", hostname, port),
        }
    }
}

/// A parsed server string. The scheme selects the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServerEndpoint {
    Udp { addr: UpstreamAddr },
    Tcp { addr: UpstreamAddr },
    Tls { addr: UpstreamAddr, hostname: Arc<str> },
    Https { url: Arc<str>, hostname: Arc<str> },
    Quic { addr: UpstreamAddr, hostname: Arc<str> },
    H3 { url: Arc<str>, hostname: Arc<str> },
    /// System resolver; lookup-only.
    Local,
    /// Debug endpoint answering every query with a fixed rcode.
    Rcode { code: u16 },
}

impl ServerEndpoint {
    pub fn scheme(&self) -> &'static str {
        match self {
            ServerEndpoint::Udp { .. } => "udp",
            ServerEndpoint::Tcp { .. } => "tcp",
            ServerEndpoint::Tls { .. } => "tls",
            ServerEndpoint::Https { .. } => "https",
            ServerEndpoint::Quic { .. } => "quic",
            ServerEndpoint::H3 { .. } => "h3",
            ServerEndpoint::Local => "local",
            ServerEndpoint::Rcode { .. } => "rcode",
        }
    }
}

fn parse_host_port(s: &str) -> Option<(&str, u16)> {
    if s.starts_with('[') {
        let end = s.find(']')?;
        let host = &s[1..end];
        let port = s[end + 1..].strip_prefix(':')?.parse::<u16>().ok()?;
        Some((host, port))
    } else {
        let (host, port_str) = s.rsplit_once(':')?;
        let port = port_str.parse::<u16>().ok()?;
        Some((host, port))
    }
}

/// Accepts `ip`, `ip:port`, `[ipv6]`, `[ipv6]:port`, `host` and
/// `host:port`, falling back to `default_port` when none is given.
fn parse_upstream_addr(s: &str, default_port: u16) -> Result<UpstreamAddr, DnsError> {
    if s.is_empty() {
        return Err(DnsError::InvalidServerAddress(s.to_string()));
    }
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(UpstreamAddr::Resolved(addr));
    }
    if let Ok(ip) = s.parse::<IpAddr>() {
        return Ok(UpstreamAddr::Resolved(SocketAddr::new(ip, default_port)));
    }
    if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        if let Ok(ip) = inner.parse::<IpAddr>() {
            return Ok(UpstreamAddr::Resolved(SocketAddr::new(ip, default_port)));
        }
    }
    if let Some((host, port)) = parse_host_port(s) {
        return Ok(UpstreamAddr::Unresolved {
            hostname: host.into(),
            port,
        });
    }
    if s.contains('/') || s.contains(':') {
        return Err(DnsError::InvalidServerAddress(s.to_string()));
    }
    Ok(UpstreamAddr::Unresolved {
        hostname: s.into(),
        port: default_port,
    })
}

/// Host part of a URL authority, with userinfo and port stripped.
fn url_hostname(url: &str) -> Result<Arc<str>, DnsError> {
    let rest = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .ok_or_else(|| DnsError::InvalidServerAddress(url.to_string()))?;
    let authority = rest.split('/').next().unwrap_or(rest);
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = if host_port.starts_with('[') {
        let end = host_port
            .find(']')
            .ok_or_else(|| DnsError::InvalidServerAddress(url.to_string()))?;
        &host_port[1..end]
    } else {
        host_port.split(':').next().unwrap_or(host_port)
    };
    if host.is_empty() {
        return Err(DnsError::InvalidServerAddress(url.to_string()));
    }
    Ok(host.into())
}

fn rcode_from_name(name: &str) -> Option<u16> {
    match name {
        "success" => Some(0),
        "format_error" => Some(1),
        "server_failure" => Some(2),
        "name_error" => Some(3),
        "not_implemented" => Some(4),
        "refused" => Some(5),
        _ => None,
    }
}

fn rcode_to_name(code: u16) -> &'static str {
    match code {
        0 => "success",
        1 => "format_error",
        2 => "server_failure",
        3 => "name_error",
        4 => "not_implemented",
        _ => "refused",
    }
}

impl FromStr for ServerEndpoint {
    type Err = DnsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "local" || s == "local://" {
            return Ok(ServerEndpoint::Local);
        }
        if let Some(name) = s.strip_prefix("rcode://") {
            let code = rcode_from_name(name)
                .ok_or_else(|| DnsError::InvalidServerAddress(format!("unknown rcode: {}", name)))?;
            return Ok(ServerEndpoint::Rcode { code });
        }
        if let Some(rest) = s.strip_prefix("udp://") {
            let addr = parse_upstream_addr(rest, DEFAULT_PLAIN_PORT)?;
            return Ok(ServerEndpoint::Udp { addr });
        }
        if let Some(rest) = s.strip_prefix("tcp://") {
            let addr = parse_upstream_addr(rest, DEFAULT_PLAIN_PORT)?;
            return Ok(ServerEndpoint::Tcp { addr });
        }
        if let Some(rest) = s.strip_prefix("tls://") {
            let addr = parse_upstream_addr(rest, DEFAULT_TLS_PORT)?;
            let hostname: Arc<str> = addr.host().into();
            return Ok(ServerEndpoint::Tls { addr, hostname });
        }
        if let Some(rest) = s.strip_prefix("quic://") {
            let addr = parse_upstream_addr(rest, DEFAULT_TLS_PORT)?;
            let hostname: Arc<str> = addr.host().into();
            return Ok(ServerEndpoint::Quic { addr, hostname });
        }
        if s.starts_with("https://") {
            let hostname = url_hostname(s)?;
            return Ok(ServerEndpoint::Https {
                url: s.into(),
                hostname,
            });
        }
        if s.starts_with("h3://") {
            // Reached over HTTPS; only the QUIC/ALPN layer differs.
            let url = s.replacen("h3://", "https://", 1);
            let hostname = url_hostname(&url)?;
            return Ok(ServerEndpoint::H3 {
                url: url.into(),
                hostname,
            });
        }
        if s.contains("://") {
            return Err(DnsError::InvalidServerAddress(s.to_string()));
        }
        // Bare host or address means plain UDP on port 53.
        let addr = parse_upstream_addr(s, DEFAULT_PLAIN_PORT)?;
        Ok(ServerEndpoint::Udp { addr })
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEndpoint::Udp { addr } => write!(f, "udp://{}", addr),
            ServerEndpoint::Tcp { addr } => write!(f, "tcp://{}", addr),
            ServerEndpoint::Tls { hostname, addr } => {
                write!(f, "tls://{}:{}", hostname, addr.port())
            }
            ServerEndpoint::Https { url, .. } => write!(f, "{}", url),
            ServerEndpoint::Quic { hostname, addr } => {
                write!(f, "quic://{}:{}", hostname, addr.port())
            }
            ServerEndpoint::H3 { url, .. } => {
                write!(f, "{}", url.replacen("https://", "h3://", 1))
            }
            ServerEndpoint::Local => f.write_str("local"),
            ServerEndpoint::Rcode { code } => write!(f, "rcode://{}", rcode_to_name(*code)),
        }
    }
}
