//! Multiplexed connection.
//!
//! One duplex byte stream carries every request of a namespace. Requests are
//! framed with a correlation id; a reader task matches response frames to
//! waiting requests and forwards push frames to a dispatcher task, which runs
//! the push handler on one payload at a time, in arrival order.
//!
//! Any framing error, unknown frame kind or push handler failure faults the
//! connection: it closes and every pending request fails with
//! [`ClientError::ConnectionClosed`].

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use stackless_core::NamespaceInfo;
use stackless_protocol::frame::{
    encode_outbound, FrameKind, InboundHeader, INBOUND_HEADER_LEN, UNCORRELATED_ID,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::error::{ClientError, ClientResult};

/// A duplex byte stream usable as a connection.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed [`ByteStream`].
pub type BoxedStream = Box<dyn ByteStream>;

/// Opens the byte stream for a namespace.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects and authenticates for `namespace`.
    async fn connect(&self, namespace: &NamespaceInfo) -> ClientResult<BoxedStream>;
}

/// Receives push payloads in arrival order.
#[async_trait]
pub trait PushHandler: Send + Sync {
    /// Handles one push payload. An error faults the connection.
    async fn handle_push(&self, payload: Bytes) -> ClientResult<()>;
}

/// Connects over TCP and presents the user key as the first frame.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: SocketAddr,
    max_frame_len: u32,
}

impl TcpConnector {
    /// Creates a connector for `address`.
    pub fn new(address: SocketAddr, max_frame_len: u32) -> Self {
        Self {
            address,
            max_frame_len,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, namespace: &NamespaceInfo) -> ClientResult<BoxedStream> {
        let mut stream = TcpStream::connect(self.address).await?;
        stream.set_nodelay(true)?;
        let hello = encode_outbound(
            UNCORRELATED_ID,
            namespace.user_key.as_bytes(),
            self.max_frame_len,
        )?;
        stream.write_all(&hello).await?;
        stream.flush().await?;
        debug!(address = %self.address, namespace = %namespace.name, "connected");
        Ok(Box::new(stream))
    }
}

/// Hands out pre-built streams, typically in-memory pipes.
#[derive(Default)]
pub struct LoopbackConnector {
    streams: Mutex<VecDeque<BoxedStream>>,
}

impl LoopbackConnector {
    /// Creates a connector with no streams.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a stream for the next connect.
    pub fn push(&self, stream: impl ByteStream) {
        self.streams.lock().push_back(Box::new(stream));
    }

    /// Number of streams not yet handed out.
    pub fn remaining(&self) -> usize {
        self.streams.lock().len()
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, namespace: &NamespaceInfo) -> ClientResult<BoxedStream> {
        self.streams.lock().pop_front().ok_or_else(|| {
            ClientError::transport(format!("no loopback stream for {}", namespace.name))
        })
    }
}

type Waiter = oneshot::Sender<ClientResult<Bytes>>;

struct PendingState {
    open: bool,
    close_reason: Option<String>,
    waiters: HashMap<u32, Waiter>,
}

struct Shared {
    state: Mutex<PendingState>,
    next_id: AtomicU32,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn allocate_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != UNCORRELATED_ID {
                return id;
            }
        }
    }

    fn complete(&self, id: u32, payload: Bytes) {
        let waiter = self.state.lock().waiters.remove(&id);
        match waiter {
            Some(waiter) => {
                // The requester may have timed out in the meantime.
                let _ = waiter.send(Ok(payload));
            }
            None => warn!(id, "dropping response with no pending request"),
        }
    }

    fn forget(&self, id: u32) {
        self.state.lock().waiters.remove(&id);
    }

    fn close_reason(&self) -> String {
        self.state
            .lock()
            .close_reason
            .clone()
            .unwrap_or_else(|| "connection closed".to_string())
    }

    /// Closes the connection once; later calls keep the first reason.
    fn close(&self, reason: String) {
        let waiters = {
            let mut state = self.state.lock();
            if !state.open {
                return;
            }
            state.open = false;
            state.close_reason = Some(reason.clone());
            std::mem::take(&mut state.waiters)
        };
        debug!(reason = %reason, pending = waiters.len(), "closing connection");
        for (_, waiter) in waiters {
            let _ = waiter.send(Err(ClientError::ConnectionClosed {
                reason: reason.clone(),
            }));
        }
        let _ = self.shutdown.send(true);
    }

    fn fault(&self, reason: String) {
        error!(reason = %reason, "connection fault");
        self.close(reason);
    }
}

/// One multiplexed connection.
pub struct Connection {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<WriteHalf<BoxedStream>>,
    max_frame_len: u32,
    request_timeout: Option<Duration>,
    reader: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl Connection {
    /// Starts the reader and dispatcher tasks over `stream`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn open(
        stream: BoxedStream,
        handler: Arc<dyn PushHandler>,
        max_frame_len: u32,
        request_timeout: Option<Duration>,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            state: Mutex::new(PendingState {
                open: true,
                close_reason: None,
                waiters: HashMap::new(),
            }),
            next_id: AtomicU32::new(1),
            shutdown,
        });

        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(
            read_half,
            shared.clone(),
            push_tx,
            shutdown_rx,
            max_frame_len,
        ));
        let dispatcher = tokio::spawn(dispatch_loop(push_rx, shared.clone(), handler));

        Self {
            shared,
            writer: tokio::sync::Mutex::new(write_half),
            max_frame_len,
            request_timeout,
            reader,
            dispatcher,
        }
    }

    /// Whether the connection still accepts requests.
    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    /// Number of requests waiting for a response.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().waiters.len()
    }

    /// Sends `payload` and waits for the matching response.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] if the connection is closed (nothing is
    /// sent), [`ClientError::ConnectionClosed`] if it closes while waiting,
    /// [`ClientError::Timeout`] when the configured timeout elapses.
    pub async fn send(&self, payload: &[u8]) -> ClientResult<Bytes> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.shared.state.lock();
            if !state.open {
                return Err(ClientError::NotConnected);
            }
            let id = self.shared.allocate_id();
            state.waiters.insert(id, tx);
            id
        };

        let frame = match encode_outbound(id, payload, self.max_frame_len) {
            Ok(frame) => frame,
            Err(err) => {
                self.shared.forget(id);
                return Err(err.into());
            }
        };

        {
            let mut writer = self.writer.lock().await;
            let written = match writer.write_all(&frame).await {
                Ok(()) => writer.flush().await,
                Err(err) => Err(err),
            };
            if let Err(err) = written {
                self.shared.forget(id);
                self.shared.fault(format!("write failed: {err}"));
                return Err(err.into());
            }
        }
        trace!(id, len = payload.len(), "request sent");

        let outcome = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.shared.forget(id);
                    return Err(ClientError::Timeout);
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(result) => result,
            Err(_) => Err(ClientError::ConnectionClosed {
                reason: self.shared.close_reason(),
            }),
        }
    }

    /// Closes the connection, failing every pending request with `reason`.
    pub async fn close(&self, reason: impl Into<String>) {
        self.shared.close(reason.into());
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.shutdown().await {
            trace!(error = %err, "shutdown after close");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.close("connection dropped".to_string());
        self.reader.abort();
        self.dispatcher.abort();
    }
}

async fn read_frame(
    reader: &mut ReadHalf<BoxedStream>,
    max_frame_len: u32,
) -> ClientResult<(InboundHeader, Bytes)> {
    let mut header = [0u8; INBOUND_HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let header = InboundHeader::parse(header, max_frame_len)?;
    let mut payload = vec![0u8; header.len as usize];
    reader.read_exact(&mut payload).await?;
    Ok((header, Bytes::from(payload)))
}

async fn read_loop(
    mut reader: ReadHalf<BoxedStream>,
    shared: Arc<Shared>,
    pushes: mpsc::UnboundedSender<Bytes>,
    mut shutdown: watch::Receiver<bool>,
    max_frame_len: u32,
) {
    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut reader, max_frame_len) => frame,
            _ = shutdown.changed() => return,
        };
        match frame {
            Ok((header, payload)) => match header.kind {
                FrameKind::Response => shared.complete(header.id, payload),
                FrameKind::Push => {
                    if pushes.send(payload).is_err() {
                        return;
                    }
                }
            },
            Err(ClientError::Transport(reason)) => {
                shared.close(format!("connection lost: {reason}"));
                return;
            }
            Err(err) => {
                shared.fault(err.to_string());
                return;
            }
        }
    }
}

async fn dispatch_loop(
    mut pushes: mpsc::UnboundedReceiver<Bytes>,
    shared: Arc<Shared>,
    handler: Arc<dyn PushHandler>,
) {
    while let Some(payload) = pushes.recv().await {
        if let Err(err) = handler.handle_push(payload).await {
            shared.fault(format!("push handler failed: {err}"));
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackless_protocol::frame::{encode_inbound, OutboundHeader, OUTBOUND_HEADER_LEN};
    use tokio::io::DuplexStream;

    const MAX: u32 = 1 << 20;

    #[derive(Default)]
    struct CollectingHandler {
        seen: Mutex<Vec<Bytes>>,
        fail: bool,
    }

    #[async_trait]
    impl PushHandler for CollectingHandler {
        async fn handle_push(&self, payload: Bytes) -> ClientResult<()> {
            self.seen.lock().push(payload);
            if self.fail {
                return Err(ClientError::protocol("handler gave up"));
            }
            Ok(())
        }
    }

    fn open(handler: Arc<CollectingHandler>) -> (Connection, DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        (Connection::open(Box::new(client), handler, MAX, None), server)
    }

    async fn read_request(server: &mut DuplexStream) -> (u32, Vec<u8>) {
        let mut header = [0u8; OUTBOUND_HEADER_LEN];
        server.read_exact(&mut header).await.unwrap();
        let header = OutboundHeader::parse(header, MAX).unwrap();
        let mut payload = vec![0u8; header.len as usize];
        server.read_exact(&mut payload).await.unwrap();
        (header.id, payload)
    }

    async fn respond(server: &mut DuplexStream, id: u32, payload: &[u8]) {
        let frame = encode_inbound(id, FrameKind::Response, payload, MAX).unwrap();
        server.write_all(&frame).await.unwrap();
    }

    #[tokio::test]
    async fn out_of_order_responses_reach_their_requests() {
        let (conn, mut server) = open(Arc::default());
        let conn = Arc::new(conn);

        let a = tokio::spawn({
            let conn = conn.clone();
            async move { conn.send(b"first").await }
        });
        let (id_a, body_a) = read_request(&mut server).await;
        let b = tokio::spawn({
            let conn = conn.clone();
            async move { conn.send(b"second").await }
        });
        let (id_b, body_b) = read_request(&mut server).await;

        assert_eq!(body_a, b"first");
        assert_eq!(body_b, b"second");
        assert_eq!(id_a, 1);
        assert_eq!(id_b, 2);

        respond(&mut server, id_b, b"for-second").await;
        respond(&mut server, id_a, b"for-first").await;

        assert_eq!(&a.await.unwrap().unwrap()[..], b"for-first");
        assert_eq!(&b.await.unwrap().unwrap()[..], b"for-second");
        assert_eq!(conn.pending(), 0);
    }

    #[tokio::test]
    async fn unmatched_responses_are_dropped() {
        let (conn, mut server) = open(Arc::default());
        let conn = Arc::new(conn);
        respond(&mut server, 99, b"stray").await;

        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.send(b"ping").await }
        });
        let (id, _) = read_request(&mut server).await;
        respond(&mut server, id, b"pong").await;

        assert_eq!(&call.await.unwrap().unwrap()[..], b"pong");
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn pushes_reach_the_handler_in_order() {
        let handler = Arc::new(CollectingHandler::default());
        let (conn, mut server) = open(handler.clone());
        for body in [&b"one"[..], b"two", b"three"] {
            let frame = encode_inbound(UNCORRELATED_ID, FrameKind::Push, body, MAX).unwrap();
            server.write_all(&frame).await.unwrap();
        }

        let call = conn.send(b"sync");
        let serve = async {
            let (id, _) = read_request(&mut server).await;
            respond(&mut server, id, b"done").await;
        };
        let (reply, ()) = tokio::join!(call, serve);
        reply.unwrap();

        for _ in 0..50 {
            if handler.seen.lock().len() == 3 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let seen: Vec<Bytes> = handler.seen.lock().clone();
        assert_eq!(seen, vec![Bytes::from("one"), Bytes::from("two"), Bytes::from("three")]);
    }

    #[tokio::test]
    async fn closing_rejects_pending_and_blocks_new_sends() {
        let (conn, mut server) = open(Arc::default());
        let conn = Arc::new(conn);

        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.send(b"never answered").await }
        });
        read_request(&mut server).await;
        conn.close("shutting down").await;

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed { ref reason } if reason == "shutting down"));
        assert!(matches!(conn.send(b"late").await, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn peer_hangup_rejects_pending() {
        let (conn, mut server) = open(Arc::default());
        let conn = Arc::new(conn);
        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.send(b"hello").await }
        });
        read_request(&mut server).await;
        drop(server);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed { .. }));
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn unknown_frame_kind_faults_the_connection() {
        for kind in [0u8, 7] {
            let (conn, mut server) = open(Arc::default());
            let conn = Arc::new(conn);
            let call = tokio::spawn({
                let conn = conn.clone();
                async move { conn.send(b"hello").await }
            });
            read_request(&mut server).await;

            let mut bogus = vec![0u8; INBOUND_HEADER_LEN];
            bogus[8] = kind;
            server.write_all(&bogus).await.unwrap();

            let err = call.await.unwrap().unwrap_err();
            assert!(
                matches!(err, ClientError::ConnectionClosed { ref reason } if reason.contains(&format!("frame kind {kind}"))),
                "kind {kind}: {err:?}"
            );
            assert!(!conn.is_open());
        }
    }

    #[tokio::test]
    async fn failing_push_handler_faults_the_connection() {
        let handler = Arc::new(CollectingHandler {
            fail: true,
            ..CollectingHandler::default()
        });
        let (conn, mut server) = open(handler);
        let conn = Arc::new(conn);
        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.send(b"hello").await }
        });
        read_request(&mut server).await;

        let frame = encode_inbound(UNCORRELATED_ID, FrameKind::Push, b"bad", MAX).unwrap();
        server.write_all(&frame).await.unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed { ref reason } if reason.contains("push handler")));
    }

    #[tokio::test]
    async fn timeout_frees_the_slot() {
        let (client, mut server) = tokio::io::duplex(4096);
        let conn = Connection::open(
            Box::new(client),
            Arc::new(CollectingHandler::default()),
            MAX,
            Some(Duration::from_millis(20)),
        );
        let (reply, _) = tokio::join!(conn.send(b"slow"), read_request(&mut server));
        assert!(matches!(reply, Err(ClientError::Timeout)));
        assert_eq!(conn.pending(), 0);
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn loopback_connector_hands_out_streams_once() {
        let connector = LoopbackConnector::new();
        let (client, _server) = tokio::io::duplex(64);
        connector.push(client);
        let info = NamespaceInfo {
            name: "shop".into(),
            key: stackless_core::NamespaceKey::new(1, 1).unwrap(),
            user_key: "k".into(),
        };
        assert!(connector.connect(&info).await.is_ok());
        assert_eq!(connector.remaining(), 0);
        assert!(matches!(
            connector.connect(&info).await,
            Err(ClientError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn tcp_connector_presents_the_user_key() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let info = NamespaceInfo {
            name: "shop".into(),
            key: stackless_core::NamespaceKey::new(1, 1).unwrap(),
            user_key: "secret".into(),
        };
        let connector = TcpConnector::new(address, MAX);
        let (stream, accepted) = tokio::join!(connector.connect(&info), listener.accept());
        stream.unwrap();
        let (mut socket, _) = accepted.unwrap();

        let mut header = [0u8; OUTBOUND_HEADER_LEN];
        socket.read_exact(&mut header).await.unwrap();
        let header = OutboundHeader::parse(header, MAX).unwrap();
        assert_eq!(header.id, UNCORRELATED_ID);
        let mut key = vec![0u8; header.len as usize];
        socket.read_exact(&mut key).await.unwrap();
        assert_eq!(key, b"secret");
    }
}
