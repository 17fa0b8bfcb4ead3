//! 2-byte length-prefixed DNS framing shared by TCP, TLS and DoQ.

use super::adapter::{MessageSink, MessageSource};
use async_trait::async_trait;
use hickory_proto::op::Message;
use manifold_dns_domain::DnsError;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub(crate) const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;
/// Anything shorter than a DNS header cannot be a message.
pub(crate) const MIN_MESSAGE_SIZE: usize = 12;

pub(crate) async fn read_frame<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf).await?;
    let len = usize::from(u16::from_be_bytes(len_buf));
    if len < MIN_MESSAGE_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("short DNS message: {} bytes", len),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

pub(crate) async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    debug_assert!(payload.len() <= MAX_MESSAGE_SIZE);
    let len = payload.len() as u16;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Packs a message for a length-prefixed stream.
pub(crate) fn encode_message(transport: &str, message: &Message) -> Result<Vec<u8>, DnsError> {
    let packed = message.to_vec().map_err(|e| DnsError::Write {
        transport: transport.to_string(),
        reason: e.to_string(),
    })?;
    if packed.len() > MAX_MESSAGE_SIZE {
        return Err(DnsError::Write {
            transport: transport.to_string(),
            reason: format!("message too large: {} bytes", packed.len()),
        });
    }
    Ok(packed)
}

pub(crate) struct FrameSource<R> {
    transport: Arc<str>,
    reader: R,
}

impl<R> FrameSource<R> {
    pub(crate) fn new(transport: Arc<str>, reader: R) -> Self {
        Self { transport, reader }
    }
}

#[async_trait]
impl<R> MessageSource for FrameSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn read_message(&mut self) -> Result<Message, DnsError> {
        let payload = read_frame(&mut self.reader)
            .await
            .map_err(|e| DnsError::Read {
                transport: self.transport.to_string(),
                reason: e.to_string(),
            })?;
        Message::from_vec(&payload).map_err(|e| DnsError::Read {
            transport: self.transport.to_string(),
            reason: e.to_string(),
        })
    }
}

pub(crate) struct FrameSink<W> {
    transport: Arc<str>,
    writer: W,
}

impl<W> FrameSink<W> {
    pub(crate) fn new(transport: Arc<str>, writer: W) -> Self {
        Self { transport, writer }
    }
}

#[async_trait]
impl<W> MessageSink for FrameSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn write_message(&mut self, message: &Message) -> Result<(), DnsError> {
        let payload = encode_message(&self.transport, message)?;
        write_frame(&mut self.writer, &payload)
            .await
            .map_err(|e| DnsError::Write {
                transport: self.transport.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_round_trip() {
        let payload = vec![0u8; 64];
        let mut wire = Vec::new();
        write_frame(&mut wire, &payload).await.unwrap();
        assert_eq!(&wire[..2], &[0, 64]);

        let mut reader = wire.as_slice();
        assert_eq!(read_frame(&mut reader).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn short_frames_are_rejected() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &[0u8; 4]).await.unwrap();
        let mut reader = wire.as_slice();
        assert!(read_frame(&mut reader).await.is_err());
    }
}
