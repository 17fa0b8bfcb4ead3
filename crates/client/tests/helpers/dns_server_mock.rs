//! In-process DNS servers speaking real wire format, for exercising
//! the transports without a network.

use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::Record;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::oneshot;

fn build_response(query: &Message, answers: &[Record], truncated: bool) -> Message {
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_op_code(query.op_code())
        .set_message_type(MessageType::Response)
        .set_recursion_desired(query.recursion_desired())
        .set_recursion_available(true)
        .set_response_code(ResponseCode::NoError);
    for question in query.queries() {
        response.add_query(question.clone());
    }
    if truncated {
        response.set_truncated(true);
    } else {
        for record in answers {
            response.add_answer(record.clone());
        }
    }
    response
}

pub struct MockUdpServer {
    addr: SocketAddr,
    queries: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockUdpServer {
    pub async fn start(answers: Vec<Record>, truncated: bool) -> std::io::Result<Self> {
        Self::bind("127.0.0.1:0".parse().unwrap(), answers, truncated).await
    }

    /// Binds to a specific address; used to pair a UDP and a TCP
    /// server on the same port for truncation-fallback tests.
    pub async fn bind(
        addr: SocketAddr,
        answers: Vec<Record>,
        truncated: bool,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        let queries = Arc::new(AtomicUsize::new(0));
        let counter = queries.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    received = socket.recv_from(&mut buf) => {
                        let Ok((len, peer)) = received else { break };
                        let Ok(query) = Message::from_vec(&buf[..len]) else { continue };
                        counter.fetch_add(1, Ordering::SeqCst);
                        let response = build_response(&query, &answers, truncated);
                        if let Ok(packed) = response.to_vec() {
                            let _ = socket.send_to(&packed, peer).await;
                        }
                    }
                }
            }
        });

        Ok(Self {
            addr: local_addr,
            queries,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl Drop for MockUdpServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum TcpMode {
    /// Answer each query as it arrives.
    Immediate,
    /// Collect two queries, answer them in reverse order.
    ReversePairs,
    /// Answer one query, then close the connection.
    CloseAfterFirst,
}

pub struct MockTcpServer {
    addr: SocketAddr,
    queries: Arc<AtomicUsize>,
}

impl MockTcpServer {
    pub async fn start(answers: Vec<Record>, mode: TcpMode) -> std::io::Result<Self> {
        Self::bind("127.0.0.1:0".parse().unwrap(), answers, mode).await
    }

    pub async fn bind(
        addr: SocketAddr,
        answers: Vec<Record>,
        mode: TcpMode,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let queries = Arc::new(AtomicUsize::new(0));
        let counter = queries.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let answers = answers.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let _ = Self::serve_connection(stream, answers, mode, counter).await;
                });
            }
        });

        Ok(Self {
            addr: local_addr,
            queries,
        })
    }

    async fn serve_connection(
        mut stream: TcpStream,
        answers: Vec<Record>,
        mode: TcpMode,
        counter: Arc<AtomicUsize>,
    ) -> std::io::Result<()> {
        let mut pending = Vec::new();
        loop {
            let mut len_buf = [0u8; 2];
            stream.read_exact(&mut len_buf).await?;
            let len = usize::from(u16::from_be_bytes(len_buf));
            let mut payload = vec![0u8; len];
            stream.read_exact(&mut payload).await?;
            let Ok(query) = Message::from_vec(&payload) else {
                continue;
            };
            counter.fetch_add(1, Ordering::SeqCst);

            match mode {
                TcpMode::Immediate | TcpMode::CloseAfterFirst => {
                    let response = build_response(&query, &answers, false);
                    Self::write_response(&mut stream, &response).await?;
                    if mode == TcpMode::CloseAfterFirst {
                        return Ok(());
                    }
                }
                TcpMode::ReversePairs => {
                    pending.push(query);
                    if pending.len() == 2 {
                        for query in pending.drain(..).rev() {
                            let response = build_response(&query, &answers, false);
                            Self::write_response(&mut stream, &response).await?;
                        }
                    }
                }
            }
        }
    }

    async fn write_response(stream: &mut TcpStream, response: &Message) -> std::io::Result<()> {
        let packed = response
            .to_vec()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        stream.write_all(&(packed.len() as u16).to_be_bytes()).await?;
        stream.write_all(&packed).await?;
        stream.flush().await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}
