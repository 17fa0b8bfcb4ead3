//! Plain DNS over UDP (RFC 1035 §4.2.1): connected datagram socket,
//! no framing. The receive buffer starts at the classic 512 bytes and
//! grows to whatever EDNS0 payload size outbound queries advertise.
//! Truncated responses are discarded and retried over TCP against the
//! same server.

use super::adapter::{MessageSink, MessageSource, StreamAdapter, StreamDialer};
use super::tcp::TcpTransport;
use super::{resolve_addr, DnsTransport};
use crate::context::QueryContext;
use async_trait::async_trait;
use hickory_proto::op::Message;
use manifold_dns_domain::{DnsError, UpstreamAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::debug;

const DEFAULT_UDP_SIZE: usize = 512;

pub struct UdpTransport {
    name: Arc<str>,
    adapter: StreamAdapter,
    udp_size: Arc<AtomicUsize>,
    tcp: TcpTransport,
}

impl UdpTransport {
    pub fn new(name: impl Into<Arc<str>>, addr: UpstreamAddr) -> Self {
        let name: Arc<str> = name.into();
        let udp_size = Arc::new(AtomicUsize::new(DEFAULT_UDP_SIZE));
        let dialer = UdpDialer {
            transport: name.clone(),
            addr: addr.clone(),
            udp_size: udp_size.clone(),
        };
        Self {
            // Abandoned datagram queries leave the shared socket
            // usable; only stream transports tear the connection down.
            adapter: StreamAdapter::new(name.clone(), Box::new(dialer), false),
            udp_size,
            tcp: TcpTransport::new(name.clone(), addr),
            name,
        }
    }
}

#[async_trait]
impl DnsTransport for UdpTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&self) {
        self.adapter.reset();
        self.tcp.reset();
    }

    fn close(&self) -> Result<(), DnsError> {
        self.adapter.close();
        self.tcp.close()
    }

    fn raw(&self) -> bool {
        true
    }

    async fn exchange(&self, ctx: &QueryContext, message: &Message) -> Result<Message, DnsError> {
        if let Some(edns) = message.extensions() {
            let advertised = usize::from(edns.max_payload());
            if advertised > self.udp_size.load(Ordering::Relaxed) {
                self.udp_size.store(advertised, Ordering::Relaxed);
            }
        }
        let response = self.adapter.exchange(message).await?;
        if response.truncated() {
            debug!(transport = %self.name, "response truncated, retrying over TCP");
            return self.tcp.exchange(ctx, message).await;
        }
        Ok(response)
    }
}

struct UdpDialer {
    transport: Arc<str>,
    addr: UpstreamAddr,
    udp_size: Arc<AtomicUsize>,
}

#[async_trait]
impl StreamDialer for UdpDialer {
    async fn dial(&self) -> Result<(Box<dyn MessageSource>, Box<dyn MessageSink>), DnsError> {
        let addr = resolve_addr(&self.transport, &self.addr).await?;
        let bind_addr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await.map_err(|e| DnsError::Dial {
            transport: self.transport.to_string(),
            reason: format!("binding datagram socket: {}", e),
        })?;
        socket.connect(addr).await.map_err(|e| DnsError::Dial {
            transport: self.transport.to_string(),
            reason: format!("{}: {}", addr, e),
        })?;
        let socket = Arc::new(socket);
        Ok((
            Box::new(UdpSource {
                transport: self.transport.clone(),
                socket: socket.clone(),
                udp_size: self.udp_size.clone(),
            }),
            Box::new(UdpSink {
                transport: self.transport.clone(),
                socket,
            }),
        ))
    }
}

struct UdpSource {
    transport: Arc<str>,
    socket: Arc<UdpSocket>,
    udp_size: Arc<AtomicUsize>,
}

#[async_trait]
impl MessageSource for UdpSource {
    async fn read_message(&mut self) -> Result<Message, DnsError> {
        let mut buffer = vec![0u8; self.udp_size.load(Ordering::Relaxed)];
        let received = self
            .socket
            .recv(&mut buffer)
            .await
            .map_err(|e| DnsError::Read {
                transport: self.transport.to_string(),
                reason: e.to_string(),
            })?;
        Message::from_vec(&buffer[..received]).map_err(|e| DnsError::Read {
            transport: self.transport.to_string(),
            reason: e.to_string(),
        })
    }
}

struct UdpSink {
    transport: Arc<str>,
    socket: Arc<UdpSocket>,
}

#[async_trait]
impl MessageSink for UdpSink {
    async fn write_message(&mut self, message: &Message) -> Result<(), DnsError> {
        let packed = message.to_vec().map_err(|e| DnsError::Write {
            transport: self.transport.to_string(),
            reason: e.to_string(),
        })?;
        self.socket
            .send(&packed)
            .await
            .map_err(|e| DnsError::Write {
                transport: self.transport.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
