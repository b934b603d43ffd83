//! Connection task: handshake, request correlation and event routing.
//!
//! A single task owns everything mutable about a connection: the socket
//! read half, the [`WriterHandle`], the stream pool, the pending table and
//! the decoder. Clients talk to it over an unbounded command channel and
//! observe its lifecycle through a `watch` channel.
//!
//! ```text
//! Client ──► Command ──► connection task ──► writer task ──► socket
//!   ▲                      │     ▲
//!   └── oneshot reply ◄────┘     └──── socket read half
//! ```

pub mod pending;
pub mod stream_pool;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::ConnectionConfig;
use crate::error::{DriverError, Result};
use crate::events::EventListener;
use crate::protocol::{
    self, flags, startup, Compression, Decoder, Message, Request, Response, EVENT_STREAM,
    PASSWORD_AUTHENTICATOR,
};
use crate::writer::{spawn_writer_task, WritePermit, WriteSlots, WriterHandle};

use pending::{PendingRequest, PendingTable, RequestToken};
use stream_pool::{StreamId, StreamIdPool, HANDSHAKE_STREAM};

/// Socket read buffer size.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Observable lifecycle of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Startup,
    Ready,
    Terminated(TerminationReason),
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, ConnectionState::Terminated(_))
    }
}

/// Why the connection task stopped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TerminationReason {
    #[error("connection closed by server")]
    Closed,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("bad response: {0}")]
    BadResponse(String),
    #[error("unknown auth mechanism: {0}")]
    UnknownAuthMechanism(String),
    #[error("all client handles dropped")]
    Shutdown,
}

impl TerminationReason {
    /// Error reported to callers whose request was cut off by this reason.
    pub fn to_error(&self) -> DriverError {
        match self {
            TerminationReason::Closed | TerminationReason::Shutdown => DriverError::ConnectionClosed,
            TerminationReason::Io(msg) => {
                DriverError::Io(std::io::Error::new(std::io::ErrorKind::Other, msg.clone()))
            }
            TerminationReason::Decode(msg) => DriverError::Decode(msg.clone()),
            TerminationReason::BadResponse(msg) => DriverError::BadResponse(msg.clone()),
            TerminationReason::UnknownAuthMechanism(name) => {
                DriverError::UnknownAuthMechanism(name.clone())
            }
        }
    }
}

impl From<DriverError> for TerminationReason {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::ConnectionClosed => TerminationReason::Closed,
            DriverError::Decode(msg) => TerminationReason::Decode(msg),
            DriverError::BadResponse(msg) => TerminationReason::BadResponse(msg),
            DriverError::UnknownAuthMechanism(name) => TerminationReason::UnknownAuthMechanism(name),
            other => TerminationReason::Io(other.to_string()),
        }
    }
}

/// Snapshot of the connection task's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub available_streams: usize,
    pub pending_requests: usize,
}

/// Messages from clients to the connection task.
#[derive(Debug)]
pub(crate) enum Command {
    /// Send a request in the writer slot reserved by `permit`. `ack` gets
    /// the allocated stream or the rejection; `reply` gets the response.
    Submit {
        request: Request,
        token: RequestToken,
        permit: WritePermit,
        ack: oneshot::Sender<Result<StreamId>>,
        reply: oneshot::Sender<Response>,
    },
    /// A caller gave up on its request.
    Release { stream: StreamId, token: RequestToken },
    Stats {
        reply: oneshot::Sender<ConnectionStats>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Startup,
    Ready,
}

/// Handles returned by [`spawn`].
pub(crate) struct ConnectionHandles {
    pub commands: mpsc::UnboundedSender<Command>,
    pub state: watch::Receiver<ConnectionState>,
    pub slots: WriteSlots,
}

/// Start the writer task and the connection task over `stream`.
///
/// The STARTUP message is sent as soon as the task runs.
pub(crate) fn spawn<S>(
    stream: S,
    config: &ConnectionConfig,
    listener: Option<EventListener>,
) -> ConnectionHandles
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, write_half) = tokio::io::split(stream);
    let (writer, writer_task) = spawn_writer_task(write_half, config.writer_config());
    let slots = writer.slots();

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Startup);

    let connection = Connection {
        reader,
        writer,
        writer_task,
        commands: command_rx,
        state: state_tx,
        phase: Phase::Startup,
        protocol_version: config.protocol_version,
        compression: config.compression,
        tracing: config.tracing,
        cql_version: config.cql_version.clone(),
        credentials: config.credentials(),
        credentials_sent: false,
        decoder: Decoder::with_max_body(
            config.protocol_version,
            config.compression,
            config.max_frame_size,
        ),
        pool: StreamIdPool::new(),
        pending: PendingTable::new(),
        listener,
    };

    tokio::spawn(connection.run());

    ConnectionHandles {
        commands: command_tx,
        state: state_rx,
        slots,
    }
}

struct Connection<R> {
    reader: R,
    writer: WriterHandle,
    writer_task: JoinHandle<Result<()>>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    phase: Phase,
    protocol_version: u8,
    compression: Compression,
    tracing: bool,
    cql_version: String,
    credentials: Option<(String, String)>,
    credentials_sent: bool,
    decoder: Decoder,
    pool: StreamIdPool,
    pending: PendingTable,
    listener: Option<EventListener>,
}

impl<R> Connection<R>
where
    R: AsyncRead + Unpin,
{
    async fn run(mut self) {
        let reason = self.drive().await;

        match &reason {
            TerminationReason::Shutdown => tracing::debug!("Connection shut down"),
            reason => tracing::error!("Connection terminated: {}", reason),
        }

        // Publish before the pending table is dropped so callers that see
        // their reply channel close can read the reason.
        self.state.send_replace(ConnectionState::Terminated(reason));
        self.writer.slots().close();
    }

    async fn drive(&mut self) -> TerminationReason {
        if let Err(e) = self.send_startup() {
            return e.into();
        }

        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return TerminationReason::Shutdown;
                    };
                    if let Err(e) = self.handle_command(command) {
                        return e.into();
                    }
                }
                read = self.reader.read(&mut buf) => {
                    let n = match read {
                        Ok(0) => return TerminationReason::Closed,
                        Ok(n) => n,
                        Err(e) => return TerminationReason::Io(e.to_string()),
                    };
                    if let Err(e) = self.handle_bytes(&buf[..n]) {
                        return e.into();
                    }
                }
                result = &mut self.writer_task => {
                    return match result {
                        Ok(Ok(())) => TerminationReason::Closed,
                        Ok(Err(e)) => e.into(),
                        Err(e) => TerminationReason::Io(format!("writer task failed: {}", e)),
                    };
                }
            }
        }
    }

    fn send_startup(&mut self) -> Result<()> {
        let request = startup(&self.cql_version, self.compression.startup_name());
        tracing::debug!(
            "Sending STARTUP (protocol v{}, compression {:?})",
            self.protocol_version,
            self.compression
        );
        self.writer.try_send(self.encode_request(&request, HANDSHAKE_STREAM))
    }

    fn encode_request(&self, request: &Request, stream: StreamId) -> Bytes {
        let frame_flags = if self.tracing && request.is_traceable() {
            flags::TRACING
        } else {
            0
        };
        protocol::encode(
            request,
            frame_flags,
            stream,
            self.protocol_version,
            self.compression,
        )
    }

    fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Submit {
                request,
                token,
                permit,
                ack,
                reply,
            } => self.submit(request, token, permit, ack, reply),
            Command::Release { stream, token } => {
                if self.pending.release(stream, token) {
                    tracing::debug!("Released stream {} after caller timeout", stream);
                    self.pool.release(stream);
                }
                Ok(())
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
                Ok(())
            }
        }
    }

    fn submit(
        &mut self,
        request: Request,
        token: RequestToken,
        permit: WritePermit,
        ack: oneshot::Sender<Result<StreamId>>,
        reply: oneshot::Sender<Response>,
    ) -> Result<()> {
        if self.phase == Phase::Startup {
            let _ = ack.send(Err(DriverError::NotReady));
            return Ok(());
        }

        let Some(stream) = self.pool.allocate() else {
            let _ = ack.send(Err(DriverError::TooManyRequests));
            return Ok(());
        };

        let bytes = self.encode_request(&request, stream);
        match self.writer.send_reserved(permit, bytes) {
            Ok(()) => {}
            Err(DriverError::BackpressureTimeout) => {
                self.pool.release(stream);
                let _ = ack.send(Err(DriverError::BackpressureTimeout));
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        self.pending.insert(stream, PendingRequest { token, reply });

        if ack.send(Ok(stream)).is_err() {
            // Nobody knows this stream, so nobody would release it.
            tracing::debug!("Submitter of {} on stream {} went away", request.name(), stream);
            if self.pending.release(stream, token) {
                self.pool.release(stream);
            }
        }
        Ok(())
    }

    fn handle_bytes(&mut self, data: &[u8]) -> Result<()> {
        let messages = self.decoder.decode(data)?;
        for message in messages {
            match self.phase {
                Phase::Startup => self.handle_handshake(message)?,
                Phase::Ready => self.handle_message(message)?,
            }
        }
        Ok(())
    }

    fn handle_handshake(&mut self, message: Message) -> Result<()> {
        if message.stream != HANDSHAKE_STREAM {
            return Err(DriverError::BadResponse(format!(
                "{} on stream {} during handshake",
                message.response.name(),
                message.stream
            )));
        }

        match message.response {
            Response::Ready => {
                self.pool.release(HANDSHAKE_STREAM);
                self.phase = Phase::Ready;
                self.state.send_replace(ConnectionState::Ready);
                tracing::debug!("Connection ready");
                Ok(())
            }
            Response::Authenticate { authenticator } => {
                if authenticator != PASSWORD_AUTHENTICATOR {
                    return Err(DriverError::UnknownAuthMechanism(authenticator));
                }
                if self.credentials_sent {
                    return Err(DriverError::BadResponse(
                        "AUTHENTICATE received after credentials were sent".to_string(),
                    ));
                }
                let Some((username, password)) = self.credentials.clone() else {
                    return Err(DriverError::BadResponse(format!(
                        "server requires {} but no credentials are configured",
                        authenticator
                    )));
                };
                tracing::debug!("Sending CREDENTIALS for {}", authenticator);
                self.credentials_sent = true;
                let request = Request::Credentials { username, password };
                self.writer
                    .try_send(self.encode_request(&request, HANDSHAKE_STREAM))
            }
            Response::Error { code, message } => Err(DriverError::BadResponse(format!(
                "handshake failed with server error {:#06x}: {}",
                code, message
            ))),
            other => Err(DriverError::BadResponse(format!(
                "unexpected {} during handshake",
                other.name()
            ))),
        }
    }

    fn handle_message(&mut self, message: Message) -> Result<()> {
        if message.stream == EVENT_STREAM {
            return match message.response {
                Response::Event(event) => {
                    self.dispatch_event(event);
                    Ok(())
                }
                other => Err(DriverError::BadResponse(format!(
                    "{} on event stream",
                    other.name()
                ))),
            };
        }

        if matches!(message.response, Response::Event(_)) {
            return Err(DriverError::BadResponse(format!(
                "EVENT on stream {}",
                message.stream
            )));
        }

        let Some(entry) = self.pending.complete(message.stream) else {
            tracing::debug!(
                "Discarding stale {} on stream {}",
                message.response.name(),
                message.stream
            );
            return Ok(());
        };

        if let Some(id) = message.tracing_id {
            tracing::debug!("Stream {} traced as session {:02x?}", message.stream, id);
        }

        // A caller that already timed out has dropped its receiver.
        let _ = entry.reply.send(message.response);
        self.pool.release(message.stream);
        Ok(())
    }

    fn dispatch_event(&self, event: protocol::Event) {
        match &self.listener {
            Some(listener) => listener.dispatch(event),
            None => tracing::debug!("No event listener, dropping {:?}", event),
        }
    }

    fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            state: match self.phase {
                Phase::Startup => ConnectionState::Startup,
                Phase::Ready => ConnectionState::Ready,
            },
            available_streams: self.pool.available(),
            pending_requests: self.pending.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, opcode, primitives, FrameBuffer, Header, QueryResult};
    use bytes::BytesMut;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    fn response_frame(stream: i8, op: u8, body: &[u8]) -> Vec<u8> {
        let header = Header::new(0x82, 0, stream, op, body.len() as u32);
        build_frame(&header, body)
    }

    fn void_result(stream: i8) -> Vec<u8> {
        let mut body = BytesMut::new();
        primitives::write_int(&mut body, 1);
        response_frame(stream, opcode::RESULT, &body)
    }

    /// Server side of the duplex, splitting request frames out of reads.
    struct Peer {
        io: DuplexStream,
        frames: FrameBuffer,
        queued: VecDeque<protocol::Frame>,
    }

    impl Peer {
        fn new(io: DuplexStream) -> Self {
            Self {
                io,
                frames: FrameBuffer::new(),
                queued: VecDeque::new(),
            }
        }

        async fn next_frame(&mut self) -> protocol::Frame {
            let mut buf = [0u8; 4096];
            loop {
                if let Some(frame) = self.queued.pop_front() {
                    return frame;
                }
                let n = self.io.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed the connection");
                self.queued.extend(self.frames.push(&buf[..n]).unwrap());
            }
        }

        async fn send(&mut self, bytes: &[u8]) {
            self.io.write_all(bytes).await.unwrap();
        }
    }

    async fn ready_connection() -> (ConnectionHandles, Peer) {
        let (client, server) = duplex(64 * 1024);
        let handles = spawn(client, &ConnectionConfig::default(), None);
        let mut peer = Peer::new(server);

        let startup = peer.next_frame().await;
        assert_eq!(startup.opcode(), opcode::STARTUP);
        assert_eq!(startup.stream(), 0);

        peer.send(&response_frame(0, opcode::READY, &[])).await;

        let mut state = handles.state.clone();
        tokio::time::timeout(Duration::from_secs(1), state.wait_for(|s| s.is_ready()))
            .await
            .unwrap()
            .unwrap();

        (handles, peer)
    }

    async fn submit(
        handles: &ConnectionHandles,
        request: Request,
    ) -> (Result<StreamId>, oneshot::Receiver<Response>, RequestToken) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        let token = RequestToken::next();
        let permit = handles.slots.acquire().await.unwrap();
        handles
            .commands
            .send(Command::Submit {
                request,
                token,
                permit,
                ack: ack_tx,
                reply: reply_tx,
            })
            .unwrap();
        (ack_rx.await.unwrap(), reply_rx, token)
    }

    async fn stats(handles: &ConnectionHandles) -> ConnectionStats {
        let (tx, rx) = oneshot::channel();
        handles.commands.send(Command::Stats { reply: tx }).unwrap();
        rx.await.unwrap()
    }

    #[test]
    fn test_termination_reason_to_error() {
        assert!(matches!(
            TerminationReason::Closed.to_error(),
            DriverError::ConnectionClosed
        ));
        assert!(matches!(
            TerminationReason::UnknownAuthMechanism("x".into()).to_error(),
            DriverError::UnknownAuthMechanism(name) if name == "x"
        ));
        assert_eq!(
            TerminationReason::from(DriverError::Decode("bad".into())),
            TerminationReason::Decode("bad".into())
        );
    }

    #[tokio::test]
    async fn test_submit_before_ready_is_rejected() {
        let (client, server) = duplex(4096);
        let handles = spawn(client, &ConnectionConfig::default(), None);
        let mut peer = Peer::new(server);
        peer.next_frame().await;

        let (ack, _reply, _) = submit(&handles, Request::Options).await;
        assert!(matches!(ack, Err(DriverError::NotReady)));

        let stats = stats(&handles).await;
        assert_eq!(stats.state, ConnectionState::Startup);
        assert_eq!(stats.available_streams, 127);
        assert_eq!(stats.pending_requests, 0);
    }

    #[tokio::test]
    async fn test_ready_releases_handshake_stream() {
        let (handles, _peer) = ready_connection().await;
        let stats = stats(&handles).await;
        assert_eq!(stats.state, ConnectionState::Ready);
        assert_eq!(stats.available_streams, 128);
    }

    #[tokio::test]
    async fn test_response_routed_and_stream_released() {
        let (handles, mut peer) = ready_connection().await;

        let (ack, reply, _) = submit(&handles, Request::Options).await;
        let stream = ack.unwrap();
        assert_eq!(stats(&handles).await.pending_requests, 1);

        let sent = peer.next_frame().await;
        assert_eq!(sent.stream(), stream);
        assert_eq!(sent.opcode(), opcode::OPTIONS);

        peer.send(&void_result(stream)).await;
        assert_eq!(reply.await.unwrap(), Response::Result(QueryResult::Void));

        let stats = stats(&handles).await;
        assert_eq!(stats.pending_requests, 0);
        assert_eq!(stats.available_streams, 128);
    }

    #[tokio::test]
    async fn test_release_with_stale_token_is_ignored() {
        let (handles, _peer) = ready_connection().await;

        let (ack, _reply, token) = submit(&handles, Request::Options).await;
        let stream = ack.unwrap();

        handles
            .commands
            .send(Command::Release {
                stream,
                token: RequestToken::next(),
            })
            .unwrap();
        assert_eq!(stats(&handles).await.pending_requests, 1);

        handles
            .commands
            .send(Command::Release { stream, token })
            .unwrap();
        let stats = stats(&handles).await;
        assert_eq!(stats.pending_requests, 0);
        assert_eq!(stats.available_streams, 128);
    }

    #[tokio::test]
    async fn test_submitter_gone_before_ack_frees_stream() {
        let (handles, mut peer) = ready_connection().await;

        let (ack_tx, ack_rx) = oneshot::channel();
        let (reply_tx, _reply_rx) = oneshot::channel();
        drop(ack_rx);
        let permit = handles.slots.acquire().await.unwrap();
        handles
            .commands
            .send(Command::Submit {
                request: Request::Options,
                token: RequestToken::next(),
                permit,
                ack: ack_tx,
                reply: reply_tx,
            })
            .unwrap();

        let snapshot = stats(&handles).await;
        assert_eq!(snapshot.pending_requests, 0);
        assert_eq!(snapshot.available_streams, 128);

        // The request still went out; its late answer is discarded.
        let sent = peer.next_frame().await;
        peer.send(&void_result(sent.stream())).await;
        assert!(stats(&handles).await.state.is_ready());
    }

    #[tokio::test]
    async fn test_ready_on_other_stream_is_fatal() {
        let (client, server) = duplex(4096);
        let handles = spawn(client, &ConnectionConfig::default(), None);
        let mut peer = Peer::new(server);
        peer.next_frame().await;

        peer.send(&response_frame(5, opcode::READY, &[])).await;

        let mut state = handles.state.clone();
        let state = state.wait_for(|s| s.is_terminated()).await.unwrap().clone();
        assert!(matches!(
            state,
            ConnectionState::Terminated(TerminationReason::BadResponse(msg)) if msg.contains("stream 5")
        ));
    }

    #[tokio::test]
    async fn test_termination_closes_write_slots() {
        let (handles, peer) = ready_connection().await;
        drop(peer);

        let err = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Err(e) = handles.slots.acquire().await {
                    break e;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(matches!(err, DriverError::ConnectionClosed));
        assert!(handles.state.borrow().is_terminated());
    }

    #[tokio::test]
    async fn test_event_on_request_stream_is_fatal() {
        let (handles, mut peer) = ready_connection().await;

        let mut body = BytesMut::new();
        primitives::write_string(&mut body, "SCHEMA_CHANGE");
        primitives::write_string(&mut body, "CREATED");
        primitives::write_string(&mut body, "ks");
        primitives::write_string(&mut body, "");
        peer.send(&response_frame(4, opcode::EVENT, &body)).await;

        let mut state = handles.state.clone();
        let state = state.wait_for(|s| s.is_terminated()).await.unwrap().clone();
        assert!(matches!(
            state,
            ConnectionState::Terminated(TerminationReason::BadResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_dropping_commands_shuts_down() {
        let (handles, mut peer) = ready_connection().await;
        let mut state = handles.state.clone();
        drop(handles.commands);

        let state = state.wait_for(|s| s.is_terminated()).await.unwrap().clone();
        assert_eq!(
            state,
            ConnectionState::Terminated(TerminationReason::Shutdown)
        );

        // Write half is shut down once the task ends.
        let mut rest = Vec::new();
        peer.io.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
