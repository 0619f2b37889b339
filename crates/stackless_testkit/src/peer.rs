//! Scripted server peer.
//!
//! The peer sits on the server end of an in-memory pipe and speaks the
//! connection framing: it reads request frames and writes response, push
//! and raw frames. Helpers panic on I/O or decode failures, which is what a
//! test wants.

use stackless_protocol::frame::{
    encode_inbound, FrameKind, OutboundHeader, DEFAULT_MAX_FRAME_LEN, OUTBOUND_HEADER_LEN,
    UNCORRELATED_ID,
};
use stackless_protocol::{PushFrame, RequestEnvelope, ResponseEnvelope};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Buffer size of each direction of a loopback pipe.
pub const LOOPBACK_BUFFER: usize = 1 << 20;

/// Creates a connected pipe: the client end and a peer driving the server end.
pub fn loopback_pair() -> (DuplexStream, ServerPeer) {
    let (client, server) = tokio::io::duplex(LOOPBACK_BUFFER);
    (client, ServerPeer::new(server))
}

/// Server end of a loopback connection.
pub struct ServerPeer {
    stream: DuplexStream,
    max_frame_len: u32,
}

impl ServerPeer {
    /// Wraps the server end of a pipe.
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Reads one raw request frame.
    pub async fn read_frame(&mut self) -> (u32, Vec<u8>) {
        let mut header = [0u8; OUTBOUND_HEADER_LEN];
        self.stream
            .read_exact(&mut header)
            .await
            .expect("Failed to read request header");
        let header =
            OutboundHeader::parse(header, self.max_frame_len).expect("Invalid request header");
        let mut payload = vec![0u8; header.len as usize];
        self.stream
            .read_exact(&mut payload)
            .await
            .expect("Failed to read request payload");
        (header.id, payload)
    }

    /// Reads and decodes one request.
    pub async fn read_request(&mut self) -> (u32, RequestEnvelope) {
        let (id, payload) = self.read_frame().await;
        let request = RequestEnvelope::decode(&payload).expect("Failed to decode request");
        (id, request)
    }

    /// Answers request `id`.
    pub async fn respond(&mut self, id: u32, response: &ResponseEnvelope) {
        let payload = response.encode().expect("Failed to encode response");
        self.write_frame(id, FrameKind::Response, &payload).await;
    }

    /// Reads the next request and answers it with `reply(request)`.
    ///
    /// Returns the request for further assertions.
    pub async fn serve_one(
        &mut self,
        reply: impl FnOnce(&RequestEnvelope) -> ResponseEnvelope,
    ) -> RequestEnvelope {
        let (id, request) = self.read_request().await;
        let response = reply(&request);
        self.respond(id, &response).await;
        request
    }

    /// Sends an unsolicited push frame.
    pub async fn push(&mut self, frame: &PushFrame) {
        let payload = frame.encode().expect("Failed to encode push frame");
        self.write_frame(UNCORRELATED_ID, FrameKind::Push, &payload).await;
    }

    /// Writes one inbound frame.
    pub async fn write_frame(&mut self, id: u32, kind: FrameKind, payload: &[u8]) {
        let frame =
            encode_inbound(id, kind, payload, self.max_frame_len).expect("Failed to frame payload");
        self.write_raw(&frame).await;
    }

    /// Writes bytes as-is, for malformed-frame tests.
    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.stream
            .write_all(bytes)
            .await
            .expect("Failed to write to client");
        self.stream.flush().await.expect("Failed to flush");
    }

    /// Waits until the client closes its end. Returns false if more bytes
    /// arrived instead.
    pub async fn wait_closed(&mut self) -> bool {
        let mut byte = [0u8; 1];
        matches!(self.stream.read(&mut byte).await, Ok(0) | Err(_))
    }
}
