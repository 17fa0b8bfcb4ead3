//! DNS over TCP (RFC 1035 §4.2.2): one persistent connection,
//! 2-byte length-prefixed messages, queries multiplexed by ID.

use super::adapter::{MessageSink, MessageSource, StreamAdapter, StreamDialer};
use super::framing::{FrameSink, FrameSource};
use super::{resolve_addr, DnsTransport};
use crate::context::QueryContext;
use async_trait::async_trait;
use hickory_proto::op::Message;
use manifold_dns_domain::{DnsError, UpstreamAddr};
use std::sync::Arc;
use tokio::net::TcpStream;

pub struct TcpTransport {
    name: Arc<str>,
    adapter: StreamAdapter,
}

impl TcpTransport {
    pub fn new(name: impl Into<Arc<str>>, addr: UpstreamAddr) -> Self {
        let name: Arc<str> = name.into();
        let dialer = TcpDialer {
            transport: name.clone(),
            addr,
        };
        Self {
            adapter: StreamAdapter::new(name.clone(), Box::new(dialer), true),
            name,
        }
    }
}

#[async_trait]
impl DnsTransport for TcpTransport {
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

struct TcpDialer {
    transport: Arc<str>,
    addr: UpstreamAddr,
}

#[async_trait]
impl StreamDialer for TcpDialer {
    async fn dial(&self) -> Result<(Box<dyn MessageSource>, Box<dyn MessageSink>), DnsError> {
        let addr = resolve_addr(&self.transport, &self.addr).await?;
        let stream = TcpStream::connect(addr).await.map_err(|e| DnsError::Dial {
            transport: self.transport.to_string(),
            reason: format!("{}: {}", addr, e),
        })?;
        let (read_half, write_half) = stream.into_split();
        Ok((
            Box::new(FrameSource::new(self.transport.clone(), read_half)),
            Box::new(FrameSink::new(self.transport.clone(), write_half)),
        ))
    }
}
