//! DNS over QUIC (RFC 9250).
//!
//! One QUIC connection is kept per transport; every query runs on its
//! own bidirectional stream with the TCP length-prefix framing and
//! the message ID forced to 0 on the wire. A handful of benign
//! connection deaths (idle timeout, stateless reset, clean closes)
//! trigger one transparent retry over a fresh connection.

use super::framing::{encode_message, MIN_MESSAGE_SIZE};
use super::{resolve_addr, DnsTransport};
use crate::context::QueryContext;
use async_trait::async_trait;
use hickory_proto::op::Message;
use manifold_dns_domain::{DnsError, UpstreamAddr};
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

static QUIC_CLIENT_CONFIG: LazyLock<quinn::ClientConfig> = LazyLock::new(|| {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let mut tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    tls_config.alpn_protocols = vec![b"doq".to_vec()];
    let quic_config = quinn::crypto::rustls::QuicClientConfig::try_from(Arc::new(tls_config))
        .expect("valid QUIC TLS config");
    quinn::ClientConfig::new(Arc::new(quic_config))
});

pub struct QuicTransport {
    name: Arc<str>,
    addr: UpstreamAddr,
    hostname: Arc<str>,
    acquire: AsyncMutex<()>,
    endpoint: Mutex<Option<quinn::Endpoint>>,
    conn: Mutex<Option<quinn::Connection>>,
}

impl QuicTransport {
    pub fn new(name: impl Into<Arc<str>>, addr: UpstreamAddr, hostname: Arc<str>) -> Self {
        Self {
            name: name.into(),
            addr,
            hostname,
            acquire: AsyncMutex::new(()),
            endpoint: Mutex::new(None),
            conn: Mutex::new(None),
        }
    }

    fn live_connection(&self) -> Option<quinn::Connection> {
        let slot = self.conn.lock().unwrap();
        slot.as_ref()
            .filter(|conn| conn.close_reason().is_none())
            .cloned()
    }

    fn drop_connection(&self) {
        if let Some(conn) = self.conn.lock().unwrap().take() {
            conn.close(quinn::VarInt::from_u32(0), b"");
        }
    }

    fn endpoint(&self, addr: SocketAddr) -> Result<quinn::Endpoint, DnsError> {
        let mut slot = self.endpoint.lock().unwrap();
        if let Some(endpoint) = &*slot {
            return Ok(endpoint.clone());
        }
        let bind_addr: SocketAddr = if addr.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let mut endpoint = quinn::Endpoint::client(bind_addr).map_err(|e| DnsError::Dial {
            transport: self.name.to_string(),
            reason: format!("creating QUIC endpoint: {}", e),
        })?;
        endpoint.set_default_client_config(QUIC_CLIENT_CONFIG.clone());
        *slot = Some(endpoint.clone());
        Ok(endpoint)
    }

    async fn open_connection(&self) -> Result<quinn::Connection, DnsError> {
        if let Some(conn) = self.live_connection() {
            return Ok(conn);
        }
        let _latch = self.acquire.lock().await;
        if let Some(conn) = self.live_connection() {
            return Ok(conn);
        }
        let addr = resolve_addr(&self.name, &self.addr).await?;
        let connecting = self
            .endpoint(addr)?
            .connect(addr, &self.hostname)
            .map_err(|e| DnsError::Dial {
                transport: self.name.to_string(),
                reason: format!("{}: {}", addr, e),
            })?;
        let connection = connecting.await.map_err(|e| DnsError::Dial {
            transport: self.name.to_string(),
            reason: format!("{}: {}", addr, e),
        })?;
        debug!(transport = %self.name, server = %addr, "QUIC connection established");
        *self.conn.lock().unwrap() = Some(connection.clone());
        Ok(connection)
    }

    async fn exchange_on(
        &self,
        conn: &quinn::Connection,
        message: &Message,
    ) -> Result<Message, (DnsError, bool)> {
        let mut outbound = message.clone();
        outbound.set_id(0);
        let packed = encode_message(&self.name, &outbound).map_err(|e| (e, false))?;

        let (mut send, mut recv) = conn.open_bi().await.map_err(|e| {
            let retryable = connection_retryable(&e);
            (self.read_error(e.to_string()), retryable)
        })?;

        let mut framed = Vec::with_capacity(2 + packed.len());
        framed.extend_from_slice(&(packed.len() as u16).to_be_bytes());
        framed.extend_from_slice(&packed);
        send.write_all(&framed).await.map_err(|e| {
            let retryable = write_retryable(&e);
            (
                DnsError::Write {
                    transport: self.name.to_string(),
                    reason: e.to_string(),
                },
                retryable,
            )
        })?;
        let _ = send.finish();

        let mut len_buf = [0u8; 2];
        recv.read_exact(&mut len_buf)
            .await
            .map_err(|e| (self.read_error(e.to_string()), read_retryable(&e)))?;
        let len = usize::from(u16::from_be_bytes(len_buf));
        if len < MIN_MESSAGE_SIZE {
            return Err((
                self.read_error(format!("short DNS message: {} bytes", len)),
                false,
            ));
        }
        let mut payload = vec![0u8; len];
        recv.read_exact(&mut payload)
            .await
            .map_err(|e| (self.read_error(e.to_string()), read_retryable(&e)))?;

        let mut response =
            Message::from_vec(&payload).map_err(|e| (self.read_error(e.to_string()), false))?;
        response.set_id(message.id());
        Ok(response)
    }

    fn read_error(&self, reason: String) -> DnsError {
        DnsError::Read {
            transport: self.name.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl DnsTransport for QuicTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&self) {
        self.drop_connection();
    }

    fn raw(&self) -> bool {
        true
    }

    async fn exchange(&self, _ctx: &QueryContext, message: &Message) -> Result<Message, DnsError> {
        let mut last_error = None;
        for _ in 0..2 {
            let conn = self.open_connection().await?;
            match self.exchange_on(&conn, message).await {
                Ok(response) => return Ok(response),
                Err((error, retryable)) => {
                    if !retryable {
                        return Err(error);
                    }
                    debug!(transport = %self.name, %error, "retrying over a fresh QUIC connection");
                    self.drop_connection();
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.expect("at least one exchange attempt"))
    }
}

/// Connection deaths worth one retry, per the DoQ deployments this
/// mirrors: clean application close, idle timeout, stateless reset
/// and a transport-level NO_ERROR close.
fn connection_retryable(error: &quinn::ConnectionError) -> bool {
    match error {
        quinn::ConnectionError::ApplicationClosed(close) => {
            close.error_code == quinn::VarInt::from_u32(0)
        }
        quinn::ConnectionError::TimedOut | quinn::ConnectionError::Reset => true,
        quinn::ConnectionError::TransportError(e) => {
            e.code == quinn::TransportErrorCode::NO_ERROR
        }
        _ => false,
    }
}

fn write_retryable(error: &quinn::WriteError) -> bool {
    match error {
        quinn::WriteError::ConnectionLost(e) => connection_retryable(e),
        quinn::WriteError::ZeroRttRejected => true,
        _ => false,
    }
}

fn read_retryable(error: &quinn::ReadExactError) -> bool {
    match error {
        quinn::ReadExactError::ReadError(quinn::ReadError::ConnectionLost(e)) => {
            connection_retryable(e)
        }
        quinn::ReadExactError::ReadError(quinn::ReadError::ZeroRttRejected) => true,
        _ => false,
    }
}
