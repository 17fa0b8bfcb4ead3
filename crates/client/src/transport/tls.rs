//! DNS over TLS (RFC 7858): TCP framing behind a rustls session,
//! SNI taken from the server address host.

use super::adapter::{MessageSink, MessageSource, StreamAdapter, StreamDialer};
use super::framing::{FrameSink, FrameSource};
use super::{resolve_addr, DnsTransport};
use crate::context::QueryContext;
use async_trait::async_trait;
use hickory_proto::op::Message;
use manifold_dns_domain::{DnsError, UpstreamAddr};
use rustls::pki_types::ServerName;
use std::sync::{Arc, LazyLock};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

static SHARED_TLS_CONFIG: LazyLock<Arc<rustls::ClientConfig>> = LazyLock::new(|| {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Arc::new(config)
});

pub struct TlsTransport {
    name: Arc<str>,
    adapter: StreamAdapter,
}

impl TlsTransport {
    pub fn new(name: impl Into<Arc<str>>, addr: UpstreamAddr, hostname: Arc<str>) -> Self {
        let name: Arc<str> = name.into();
        let dialer = TlsDialer {
            transport: name.clone(),
            addr,
            hostname,
        };
        Self {
            adapter: StreamAdapter::new(name.clone(), Box::new(dialer), true),
            name,
        }
    }
}

#[async_trait]
impl DnsTransport for TlsTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&self) {
        self.adapter.reset();
    }

    fn close(&self) -> Result<(), DnsError> {
        self.adapter.close();
        Ok(())
    }

    fn raw(&self) -> bool {
        true
    }

    async fn exchange(&self, _ctx: &QueryContext, message: &Message) -> Result<Message, DnsError> {
        self.adapter.exchange(message).await
    }
}

struct TlsDialer {
    transport: Arc<str>,
    addr: UpstreamAddr,
    hostname: Arc<str>,
}

#[async_trait]
impl StreamDialer for TlsDialer {
    async fn dial(&self) -> Result<(Box<dyn MessageSource>, Box<dyn MessageSink>), DnsError> {
        let server_name = ServerName::try_from(self.hostname.to_string()).map_err(|e| {
            DnsError::TlsHandshake {
                transport: self.transport.to_string(),
                reason: format!("invalid server name '{}': {}", self.hostname, e),
            }
        })?;
        let addr = resolve_addr(&self.transport, &self.addr).await?;
        let tcp_stream = TcpStream::connect(addr).await.map_err(|e| DnsError::Dial {
            transport: self.transport.to_string(),
            reason: format!("{}: {}", addr, e),
        })?;

        let connector = TlsConnector::from(SHARED_TLS_CONFIG.clone());
        let tls_stream = connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| DnsError::TlsHandshake {
                transport: self.transport.to_string(),
                reason: e.to_string(),
            })?;
        debug!(transport = %self.transport, server = %addr, sni = %self.hostname, "TLS session established");

        let (read_half, write_half) = tokio::io::split(tls_stream);
        Ok((
            Box::new(FrameSource::new(self.transport.clone(), read_half)),
            Box::new(FrameSink::new(self.transport.clone(), write_half)),
        ))
    }
}
