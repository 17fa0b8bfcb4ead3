//! Request/response multiplexer shared by the stream transports.
//!
//! One persistent connection per transport; concurrent exchanges are
//! correlated by a rewritten 16-bit transaction ID and woken through
//! one-shot channels by a background receive loop. The connection is
//! replaced on the next exchange after it dies or is reset.

use async_trait::async_trait;
use hickory_proto::op::Message;
use manifold_dns_domain::DnsError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

const DIAL_ATTEMPTS: usize = 2;

#[async_trait]
pub(crate) trait MessageSource: Send + 'static {
    async fn read_message(&mut self) -> Result<Message, DnsError>;
}

#[async_trait]
pub(crate) trait MessageSink: Send + 'static {
    async fn write_message(&mut self, message: &Message) -> Result<(), DnsError>;
}

/// Dials one upstream connection, split into its two directions.
#[async_trait]
pub(crate) trait StreamDialer: Send + Sync + 'static {
    async fn dial(&self) -> Result<(Box<dyn MessageSource>, Box<dyn MessageSink>), DnsError>;
}

pub(crate) struct StreamAdapter {
    transport: Arc<str>,
    dialer: Box<dyn StreamDialer>,
    /// Whether a caller abandoning its exchange mid-flight takes the
    /// shared connection down with it. True for stream transports
    /// (in-flight queries share the socket); false for UDP.
    cancel_on_abandon: bool,
    shutdown: CancellationToken,
    acquire: AsyncMutex<()>,
    conn: Mutex<Option<Arc<DnsConnection>>>,
}

impl StreamAdapter {
    pub(crate) fn new(
        transport: Arc<str>,
        dialer: Box<dyn StreamDialer>,
        cancel_on_abandon: bool,
    ) -> Self {
        Self {
            transport,
            dialer,
            cancel_on_abandon,
            shutdown: CancellationToken::new(),
            acquire: AsyncMutex::new(()),
            conn: Mutex::new(None),
        }
    }

    pub(crate) async fn exchange(&self, message: &Message) -> Result<Message, DnsError> {
        let mut last_error = None;
        let mut connection = None;
        for _ in 0..DIAL_ATTEMPTS {
            match self.open().await {
                Ok(conn) => {
                    connection = Some(conn);
                    break;
                }
                Err(error) => last_error = Some(error),
            }
        }
        let Some(conn) = connection else {
            return Err(last_error.expect("at least one dial attempt"));
        };
        self.exchange_on(&conn, message).await
    }

    /// Drops the current connection; in-flight exchanges fail and the
    /// next exchange redials.
    pub(crate) fn reset(&self) {
        if let Some(conn) = self.conn.lock().unwrap().take() {
            conn.cancel(None);
        }
    }

    pub(crate) fn close(&self) {
        self.reset();
        self.shutdown.cancel();
    }

    async fn open(&self) -> Result<Arc<DnsConnection>, DnsError> {
        if let Some(conn) = self.live_connection() {
            return Ok(conn);
        }
        let _latch = self.acquire.lock().await;
        // Another caller may have dialled while we waited.
        if let Some(conn) = self.live_connection() {
            return Ok(conn);
        }
        if self.shutdown.is_cancelled() {
            return Err(DnsError::ConnectionClosed {
                transport: self.transport.to_string(),
            });
        }
        let (source, sink) = self.dialer.dial().await?;
        debug!(transport = %self.transport, "connection established");
        let conn = Arc::new(DnsConnection {
            transport: self.transport.clone(),
            writer: AsyncMutex::new(sink),
            pending: Mutex::new(PendingTable::default()),
            done: self.shutdown.child_token(),
            last_error: Mutex::new(None),
        });
        tokio::spawn(Self::recv_loop(source, conn.clone()));
        *self.conn.lock().unwrap() = Some(conn.clone());
        Ok(conn)
    }

    fn live_connection(&self) -> Option<Arc<DnsConnection>> {
        let slot = self.conn.lock().unwrap();
        slot.as_ref().filter(|conn| !conn.is_done()).cloned()
    }

    async fn exchange_on(
        &self,
        conn: &Arc<DnsConnection>,
        message: &Message,
    ) -> Result<Message, DnsError> {
        let original_id = message.id();
        let (waiter, response) = oneshot::channel();
        let assigned_id = conn.register(waiter);
        let mut guard = RegistrationGuard {
            conn: conn.clone(),
            id: assigned_id,
            cancel_on_abandon: self.cancel_on_abandon,
            disarmed: false,
        };

        let mut outbound = message.clone();
        outbound.set_id(assigned_id);
        {
            let mut writer = conn.writer.lock().await;
            if let Err(error) = writer.write_message(&outbound).await {
                conn.cancel(Some(error.clone()));
                guard.disarm();
                return Err(error);
            }
        }
        trace!(transport = %self.transport, id = assigned_id, "query written");

        tokio::select! {
            delivered = response => {
                guard.disarm();
                match delivered {
                    Ok(mut message) => {
                        message.set_id(original_id);
                        Ok(message)
                    }
                    Err(_) => Err(conn.error()),
                }
            }
            _ = conn.done.cancelled() => {
                guard.disarm();
                Err(conn.error())
            }
        }
    }

    async fn recv_loop(mut source: Box<dyn MessageSource>, conn: Arc<DnsConnection>) {
        loop {
            tokio::select! {
                _ = conn.done.cancelled() => return,
                result = source.read_message() => match result {
                    Ok(message) => conn.deliver(message),
                    Err(error) => {
                        debug!(transport = %conn.transport, %error, "receive loop terminated");
                        conn.cancel(Some(error));
                        return;
                    }
                }
            }
        }
    }
}

pub(crate) struct DnsConnection {
    transport: Arc<str>,
    writer: AsyncMutex<Box<dyn MessageSink>>,
    pending: Mutex<PendingTable>,
    done: CancellationToken,
    last_error: Mutex<Option<DnsError>>,
}

impl DnsConnection {
    fn register(&self, waiter: oneshot::Sender<Message>) -> u16 {
        self.pending.lock().unwrap().register(waiter)
    }

    fn unregister(&self, id: u16) {
        self.pending.lock().unwrap().waiters.remove(&id);
    }

    /// Hands an inbound message to its waiter, if one is still
    /// registered; unmatched responses are dropped silently.
    fn deliver(&self, message: Message) {
        let waiter = self.pending.lock().unwrap().waiters.remove(&message.id());
        if let Some(waiter) = waiter {
            let _ = waiter.send(message);
        }
    }

    fn cancel(&self, error: Option<DnsError>) {
        if let Some(error) = error {
            let mut slot = self.last_error.lock().unwrap();
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.done.cancel();
    }

    fn error(&self) -> DnsError {
        self.last_error
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| DnsError::ConnectionClosed {
                transport: self.transport.to_string(),
            })
    }

    fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }
}

#[derive(Default)]
struct PendingTable {
    next_id: u16,
    waiters: HashMap<u16, oneshot::Sender<Message>>,
}

impl PendingTable {
    fn register(&mut self, waiter: oneshot::Sender<Message>) -> u16 {
        self.next_id = self.next_id.wrapping_add(1);
        let id = self.next_id;
        self.waiters.insert(id, waiter);
        id
    }
}

/// Removes this exchange's waiter on every exit path; when the
/// exchange future is dropped mid-flight (caller timeout or
/// cancellation) it also takes the connection down, unless the
/// transport opted out.
struct RegistrationGuard {
    conn: Arc<DnsConnection>,
    id: u16,
    cancel_on_abandon: bool,
    disarmed: bool,
}

impl RegistrationGuard {
    fn disarm(&mut self) {
        self.disarmed = true;
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.conn.unregister(self.id);
        if !self.disarmed && self.cancel_on_abandon {
            self.conn.cancel(None);
        }
    }
}
