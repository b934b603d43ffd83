//! In-memory fake server for driving a `Client` in tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use cqlwire_client::protocol::primitives::{
    read_short, read_string, write_int, write_short, write_short_bytes, write_string,
    write_string_list,
};
use cqlwire_client::protocol::{build_frame, opcode, Frame, FrameBuffer, Header};
use cqlwire_client::{Client, Compression, ConnectionConfig, EventListener};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const RESULT_VOID: i32 = 0x0001;
pub const RESULT_SET_KEYSPACE: i32 = 0x0003;
pub const RESULT_PREPARED: i32 = 0x0004;

/// Server end of a duplex pipe, speaking frames.
pub struct FakeServer {
    io: DuplexStream,
    frames: FrameBuffer,
    queued: VecDeque<Frame>,
    protocol_version: u8,
}

impl FakeServer {
    pub fn new(io: DuplexStream, protocol_version: u8) -> Self {
        Self {
            io,
            frames: FrameBuffer::new(),
            queued: VecDeque::new(),
            protocol_version,
        }
    }

    /// Next request frame; panics if none arrives within two seconds.
    pub async fn next_frame(&mut self) -> Frame {
        match self.try_next_frame(Duration::from_secs(2)).await {
            Some(frame) => frame,
            None => panic!("no frame from client"),
        }
    }

    /// Next request frame, or `None` on EOF or after `wait`.
    pub async fn try_next_frame(&mut self, wait: Duration) -> Option<Frame> {
        let mut buf = [0u8; 8192];
        loop {
            if let Some(frame) = self.queued.pop_front() {
                return Some(frame);
            }
            let n = match tokio::time::timeout(wait, self.io.read(&mut buf)).await {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return None,
                Ok(Ok(n)) => n,
            };
            self.queued.extend(self.frames.push(&buf[..n]).unwrap());
        }
    }

    /// True once the client has closed its write side.
    pub async fn closed_by_client(&mut self) -> bool {
        let mut buf = [0u8; 64];
        matches!(
            tokio::time::timeout(Duration::from_secs(2), self.io.read(&mut buf)).await,
            Ok(Ok(0))
        )
    }

    pub async fn send(&mut self, stream: i8, op: u8, body: &[u8]) {
        self.send_with_flags(stream, op, 0, body).await;
    }

    pub async fn send_with_flags(&mut self, stream: i8, op: u8, flags: u8, body: &[u8]) {
        let header = Header::new(
            0x80 | self.protocol_version,
            flags,
            stream,
            op,
            body.len() as u32,
        );
        self.io.write_all(&build_frame(&header, body)).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.io.write_all(bytes).await.unwrap();
    }

    /// Consume STARTUP and answer READY.
    pub async fn accept_handshake(&mut self) -> Frame {
        let startup = self.next_frame().await;
        assert_eq!(startup.opcode(), opcode::STARTUP);
        assert_eq!(startup.stream(), 0);
        self.send(0, opcode::READY, &[]).await;
        startup
    }

    pub async fn reply_void(&mut self, stream: i8) {
        self.send(stream, opcode::RESULT, &void_body()).await;
    }

    pub async fn reply_keyspace(&mut self, stream: i8, keyspace: &str) {
        self.send(stream, opcode::RESULT, &keyspace_body(keyspace)).await;
    }

    pub async fn reply_error(&mut self, stream: i8, code: i32, message: &str) {
        let mut body = BytesMut::new();
        write_int(&mut body, code);
        write_string(&mut body, message);
        self.send(stream, opcode::ERROR, &body).await;
    }

    pub async fn reply_authenticate(&mut self, authenticator: &str) {
        let mut body = BytesMut::new();
        write_string(&mut body, authenticator);
        self.send(0, opcode::AUTHENTICATE, &body).await;
    }

    pub async fn push_schema_event(&mut self, keyspace: &str) {
        let mut body = BytesMut::new();
        write_string(&mut body, "SCHEMA_CHANGE");
        write_string(&mut body, "CREATED");
        write_string(&mut body, keyspace);
        write_string(&mut body, "");
        self.send(-1, opcode::EVENT, &body).await;
    }
}

/// Client wired to a fake server over a duplex pipe. Nothing is read yet.
pub fn client_pair(config: ConnectionConfig, listener: Option<EventListener>) -> (Client, FakeServer) {
    client_pair_with_pipe(config, listener, 256 * 1024)
}

/// [`client_pair`] over a pipe buffering at most `pipe_size` bytes.
pub fn client_pair_with_pipe(
    config: ConnectionConfig,
    listener: Option<EventListener>,
    pipe_size: usize,
) -> (Client, FakeServer) {
    let (client_io, server_io) = duplex(pipe_size);
    let version = config.protocol_version;
    let client = Client::from_stream(client_io, config, listener).unwrap();
    (client, FakeServer::new(server_io, version))
}

/// Client past the handshake.
pub async fn ready_pair(
    config: ConnectionConfig,
    listener: Option<EventListener>,
) -> (Client, FakeServer) {
    let (client, mut server) = client_pair(config, listener);
    server.accept_handshake().await;
    client.wait_ready(Duration::from_secs(2)).await.unwrap();
    (client, server)
}

pub fn config_with_timeout(timeout: Duration) -> ConnectionConfig {
    ConnectionConfig {
        request_timeout_ms: timeout.as_millis() as u64,
        ..Default::default()
    }
}

pub fn lz4_config() -> ConnectionConfig {
    ConnectionConfig {
        compression: Compression::Lz4,
        ..Default::default()
    }
}

pub fn void_body() -> BytesMut {
    let mut body = BytesMut::new();
    write_int(&mut body, RESULT_VOID);
    body
}

pub fn keyspace_body(keyspace: &str) -> BytesMut {
    let mut body = BytesMut::new();
    write_int(&mut body, RESULT_SET_KEYSPACE);
    write_string(&mut body, keyspace);
    body
}

pub fn prepared_body(id: &[u8], metadata: &[u8]) -> BytesMut {
    let mut body = BytesMut::new();
    write_int(&mut body, RESULT_PREPARED);
    write_short_bytes(&mut body, id);
    body.extend_from_slice(metadata);
    body
}

pub fn supported_body(options: &[(&str, &[&str])]) -> BytesMut {
    let mut body = BytesMut::new();
    write_short(&mut body, options.len() as u16);
    for (key, values) in options {
        write_string(&mut body, key);
        write_string_list(&mut body, values);
    }
    body
}

/// Decode a `[string map]` body such as STARTUP or CREDENTIALS.
pub fn string_map(body: &[u8]) -> HashMap<String, String> {
    let mut buf = Bytes::copy_from_slice(body);
    let count = read_short(&mut buf).unwrap();
    (0..count)
        .map(|_| {
            let key = read_string(&mut buf).unwrap();
            let value = read_string(&mut buf).unwrap();
            (key, value)
        })
        .collect()
}

/// Query text of an uncompressed QUERY or PREPARE body (`[long string]` first).
pub fn query_text(body: &[u8]) -> String {
    let len = i32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
    String::from_utf8(body[4..4 + len].to_vec()).unwrap()
}
