//! DNS over HTTP/3 (RFC 8484 over RFC 9114).
//!
//! Same POST contract as DoH, carried on a quinn connection driven by
//! the `h3` client. The request handle is kept for reuse; a failed
//! request tears it down and retries once on a fresh connection.

use super::{resolve_addr, DnsTransport, MIME_TYPE};
use crate::context::QueryContext;
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use hickory_proto::op::Message;
use manifold_dns_domain::{DnsError, UpstreamAddr};
use std::sync::{Arc, LazyLock, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

type H3SendRequest = h3::client::SendRequest<h3_quinn::OpenStreams, Bytes>;

static H3_CLIENT_CONFIG: LazyLock<quinn::ClientConfig> = LazyLock::new(|| {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let mut tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    tls_config.alpn_protocols = vec![b"h3".to_vec()];
    let quic_config = quinn::crypto::rustls::QuicClientConfig::try_from(Arc::new(tls_config))
        .expect("valid QUIC TLS config for H3");
    quinn::ClientConfig::new(Arc::new(quic_config))
});

pub struct H3Transport {
    name: Arc<str>,
    url: Arc<str>,
    hostname: Arc<str>,
    port: u16,
    acquire: AsyncMutex<()>,
    endpoint: Mutex<Option<quinn::Endpoint>>,
    send_request: Mutex<Option<H3SendRequest>>,
}

impl H3Transport {
    pub fn new(name: impl Into<Arc<str>>, url: Arc<str>, hostname: Arc<str>) -> Self {
        let port = authority_port(&url);
        Self {
            name: name.into(),
            url,
            hostname,
            port,
            acquire: AsyncMutex::new(()),
            endpoint: Mutex::new(None),
            send_request: Mutex::new(None),
        }
    }

    async fn connect_new(&self) -> Result<H3SendRequest, DnsError> {
        let upstream = UpstreamAddr::Unresolved {
            hostname: self.hostname.clone(),
            port: self.port,
        };
        let addr = resolve_addr(&self.name, &upstream).await?;
        let endpoint = {
            let mut slot = self.endpoint.lock().unwrap();
            match &*slot {
                Some(endpoint) => endpoint.clone(),
                None => {
                    let bind_addr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
                    let mut endpoint = quinn::Endpoint::client(bind_addr.parse().unwrap())
                        .map_err(|e| DnsError::Dial {
                            transport: self.name.to_string(),
                            reason: format!("creating QUIC endpoint: {}", e),
                        })?;
                    endpoint.set_default_client_config(H3_CLIENT_CONFIG.clone());
                    *slot = Some(endpoint.clone());
                    endpoint
                }
            }
        };

        let connecting = endpoint
            .connect(addr, &self.hostname)
            .map_err(|e| DnsError::Dial {
                transport: self.name.to_string(),
                reason: format!("{}: {}", addr, e),
            })?;
        let quinn_conn = connecting.await.map_err(|e| DnsError::Dial {
            transport: self.name.to_string(),
            reason: format!("{}: {}", addr, e),
        })?;
        debug!(transport = %self.name, server = %addr, "HTTP/3 connection established");

        let h3_conn = h3_quinn::Connection::new(quinn_conn);
        let (mut driver, send_request) =
            h3::client::new(h3_conn).await.map_err(|e| DnsError::Dial {
                transport: self.name.to_string(),
                reason: format!("HTTP/3 setup: {}", e),
            })?;
        tokio::spawn(async move {
            let _ = std::future::poll_fn(|cx| driver.poll_close(cx)).await;
        });
        Ok(send_request)
    }

    async fn acquire_send_request(&self) -> Result<H3SendRequest, DnsError> {
        if let Some(send_request) = self.send_request.lock().unwrap().clone() {
            return Ok(send_request);
        }
        let _latch = self.acquire.lock().await;
        if let Some(send_request) = self.send_request.lock().unwrap().clone() {
            return Ok(send_request);
        }
        let send_request = self.connect_new().await?;
        *self.send_request.lock().unwrap() = Some(send_request.clone());
        Ok(send_request)
    }

    async fn execute(
        &self,
        send_request: &mut H3SendRequest,
        packed: &[u8],
    ) -> Result<Bytes, DnsError> {
        let request = http::Request::builder()
            .method("POST")
            .uri(&*self.url)
            .header("content-type", MIME_TYPE)
            .header("accept", MIME_TYPE)
            .body(())
            .map_err(|e| DnsError::Http {
                transport: self.name.to_string(),
                reason: format!("building request: {}", e),
            })?;

        let mut stream = send_request
            .send_request(request)
            .await
            .map_err(|e| self.http_error(e.to_string()))?;
        stream
            .send_data(Bytes::copy_from_slice(packed))
            .await
            .map_err(|e| self.http_error(e.to_string()))?;
        stream
            .finish()
            .await
            .map_err(|e| self.http_error(e.to_string()))?;

        let response = stream
            .recv_response()
            .await
            .map_err(|e| self.http_error(e.to_string()))?;
        if response.status() != http::StatusCode::OK {
            return Err(DnsError::UnexpectedStatus {
                transport: self.name.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut body = BytesMut::new();
        while let Some(mut chunk) = stream
            .recv_data()
            .await
            .map_err(|e| self.http_error(e.to_string()))?
        {
            body.extend_from_slice(chunk.chunk());
            chunk.advance(chunk.remaining());
        }
        Ok(body.freeze())
    }

    fn http_error(&self, reason: String) -> DnsError {
        DnsError::Http {
            transport: self.name.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl DnsTransport for H3Transport {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&self) {
        self.send_request.lock().unwrap().take();
    }

    fn raw(&self) -> bool {
        true
    }

    async fn exchange(&self, _ctx: &QueryContext, message: &Message) -> Result<Message, DnsError> {
        let mut outbound = message.clone();
        outbound.set_id(0);
        let packed = outbound
            .to_vec()
            .map_err(|e| DnsError::InvalidMessage(e.to_string()))?;

        let mut send_request = self.acquire_send_request().await?;
        let body = match self.execute(&mut send_request, &packed).await {
            Ok(body) => body,
            Err(DnsError::UnexpectedStatus { transport, status }) => {
                return Err(DnsError::UnexpectedStatus { transport, status });
            }
            Err(error) => {
                // Stale request handle; one retry on a fresh connection.
                debug!(transport = %self.name, %error, "HTTP/3 connection stale, reconnecting");
                self.reset();
                let mut fresh = self.acquire_send_request().await?;
                self.execute(&mut fresh, &packed).await?
            }
        };

        let mut parsed = Message::from_vec(&body).map_err(|e| DnsError::Read {
            transport: self.name.to_string(),
            reason: e.to_string(),
        })?;
        parsed.set_id(message.id());
        Ok(parsed)
    }
}

fn authority_port(url: &str) -> u16 {
    let Some((_, rest)) = url.split_once("://") else {
        return 443;
    };
    let authority = rest.split('/').next().unwrap_or(rest);
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    if host_port.starts_with('[') {
        return host_port
            .find(']')
            .and_then(|end| host_port[end + 1..].strip_prefix(':'))
            .and_then(|p| p.parse().ok())
            .unwrap_or(443);
    }
    host_port
        .rsplit_once(':')
        .and_then(|(_, p)| p.parse().ok())
        .unwrap_or(443)
}
