//! Wire transports and the upstream abstraction the engine drives.

pub mod adapter;
pub(crate) mod framing;
pub mod h3;
pub mod https;
pub mod local;
pub mod quic;
pub mod rcode;
pub mod tcp;
pub mod tls;
pub mod udp;

use crate::context::QueryContext;
use crate::message::set_client_subnet;
use async_trait::async_trait;
use hickory_proto::op::Message;
use ipnetwork::IpNetwork;
use manifold_dns_domain::{DnsError, DomainStrategy, ServerEndpoint, UpstreamAddr};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

pub(crate) const MIME_TYPE: &str = "application/dns-message";

/// A named upstream server.
///
/// `raw()` advertises which half of the contract the transport
/// implements: raw transports exchange whole messages, non-raw ones
/// (the system resolver) only look up address lists. The default
/// method bodies fail with `NoRawSupport` so an implementation only
/// overrides its half.
#[async_trait]
pub trait DnsTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Idempotent post-construction init.
    fn start(&self) -> Result<(), DnsError> {
        Ok(())
    }

    /// Drops any pooled connections; the next query redials.
    fn reset(&self) {}

    fn close(&self) -> Result<(), DnsError> {
        self.reset();
        Ok(())
    }

    fn raw(&self) -> bool;

    async fn exchange(&self, ctx: &QueryContext, message: &Message) -> Result<Message, DnsError> {
        let _ = (ctx, message);
        Err(DnsError::NoRawSupport)
    }

    async fn lookup(
        &self,
        ctx: &QueryContext,
        domain: &str,
        strategy: DomainStrategy,
    ) -> Result<Vec<IpAddr>, DnsError> {
        let _ = (ctx, domain, strategy);
        Err(DnsError::NoRawSupport)
    }
}

/// Construction parameters for [`create_transport`].
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Name the transport reports; used in logs, errors, loopback
    /// detection and independent-cache keys.
    pub name: String,
    /// Server string, `ServerEndpoint` syntax.
    pub address: String,
    /// Subnet attached to every outbound query of this transport
    /// (without overriding one the caller already set).
    pub client_subnet: Option<IpNetwork>,
}

impl TransportOptions {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            client_subnet: None,
        }
    }
}

/// Parses the server address and constructs the matching transport.
pub fn create_transport(options: TransportOptions) -> Result<Arc<dyn DnsTransport>, DnsError> {
    let endpoint: ServerEndpoint = options.address.parse()?;
    let name = options.name.clone();
    let transport: Arc<dyn DnsTransport> = match endpoint {
        ServerEndpoint::Udp { addr } => Arc::new(udp::UdpTransport::new(name, addr)),
        ServerEndpoint::Tcp { addr } => Arc::new(tcp::TcpTransport::new(name, addr)),
        ServerEndpoint::Tls { addr, hostname } => {
            Arc::new(tls::TlsTransport::new(name, addr, hostname))
        }
        ServerEndpoint::Https { url, .. } => Arc::new(https::HttpsTransport::new(name, url)),
        ServerEndpoint::Quic { addr, hostname } => {
            Arc::new(quic::QuicTransport::new(name, addr, hostname))
        }
        ServerEndpoint::H3 { url, hostname } => Arc::new(h3::H3Transport::new(name, url, hostname)),
        ServerEndpoint::Local => Arc::new(local::LocalTransport::new(name)),
        ServerEndpoint::Rcode { code } => Arc::new(rcode::RcodeTransport::new(name, code)),
    };
    match options.client_subnet {
        Some(prefix) => Ok(Arc::new(Edns0SubnetTransport::new(transport, prefix))),
        None => Ok(transport),
    }
}

/// Decorator stamping a configured client subnet onto every exchange.
/// A subnet option already present in the query wins.
pub struct Edns0SubnetTransport {
    inner: Arc<dyn DnsTransport>,
    prefix: IpNetwork,
}

impl Edns0SubnetTransport {
    pub fn new(inner: Arc<dyn DnsTransport>, prefix: IpNetwork) -> Self {
        Self { inner, prefix }
    }
}

#[async_trait]
impl DnsTransport for Edns0SubnetTransport {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn start(&self) -> Result<(), DnsError> {
        self.inner.start()
    }

    fn reset(&self) {
        self.inner.reset()
    }

    fn close(&self) -> Result<(), DnsError> {
        self.inner.close()
    }

    fn raw(&self) -> bool {
        self.inner.raw()
    }

    async fn exchange(&self, ctx: &QueryContext, message: &Message) -> Result<Message, DnsError> {
        let message = set_client_subnet(message, &self.prefix, false);
        self.inner.exchange(ctx, &message).await
    }

    async fn lookup(
        &self,
        ctx: &QueryContext,
        domain: &str,
        strategy: DomainStrategy,
    ) -> Result<Vec<IpAddr>, DnsError> {
        self.inner.lookup(ctx, domain, strategy).await
    }
}

/// Resolves an upstream address at dial time.
pub(crate) async fn resolve_addr(
    transport: &str,
    addr: &UpstreamAddr,
) -> Result<SocketAddr, DnsError> {
    match addr {
        UpstreamAddr::Resolved(addr) => Ok(*addr),
        UpstreamAddr::Unresolved { hostname, port } => {
            let target = format!("{}:{}", hostname, port);
            let mut addrs = tokio::net::lookup_host(&target).await.map_err(|e| {
                DnsError::Dial {
                    transport: transport.to_string(),
                    reason: format!("resolving {}: {}", target, e),
                }
            })?;
            addrs.next().ok_or_else(|| DnsError::Dial {
                transport: transport.to_string(),
                reason: format!("no address found for {}", target),
            })
        }
    }
}
