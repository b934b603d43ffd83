//! Client builder and request facade.
//!
//! The [`ClientBuilder`] provides a fluent API over [`ConnectionConfig`].
//! The [`Client`] is a cheap, cloneable handle to one connection task:
//! 1. Connect the socket
//! 2. Spawn the writer task and the connection task (which sends STARTUP)
//! 3. Wait for READY, authenticating if the server asks
//! 4. REGISTER for the configured events
//!
//! Every request call then submits to the connection task, waits for the
//! stream id acknowledgment and finally for the correlated reply, all within
//! the request timeout.
//!
//! # Example
//!
//! ```ignore
//! use cqlwire_client::{Client, Consistency, EventType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .host("127.0.0.1")
//!         .credentials("cassandra", "cassandra")
//!         .register_events(vec![EventType::SchemaChange])
//!         .on_event(|event| println!("{:?}", event))
//!         .connect()
//!         .await?;
//!
//!     let result = client
//!         .query("SELECT release_version FROM system.local", Consistency::One)
//!         .await?;
//!     println!("{:?}", result);
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::config::ConnectionConfig;
use crate::connection::pending::RequestToken;
use crate::connection::{self, Command, ConnectionState, ConnectionStats, TerminationReason};
use crate::error::{DriverError, Result};
use crate::events::EventListener;
use crate::protocol::{
    Compression, Consistency, Event, EventType, PreparedId, QueryResult, Request, Response,
};
use crate::transport;
use crate::writer::WriteSlots;

/// Builder for configuring and connecting a [`Client`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ConnectionConfig,
    listener: Option<EventListener>,
}

impl ClientBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration, e.g. one loaded from JSON.
    pub fn from_config(config: ConnectionConfig) -> Self {
        Self {
            config,
            listener: None,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Body compression announced in STARTUP.
    ///
    /// Default: none
    pub fn compression(mut self, compression: Compression) -> Self {
        self.config.compression = compression;
        self
    }

    /// Ask the server to trace QUERY, PREPARE and EXECUTE requests.
    pub fn tracing(mut self, enabled: bool) -> Self {
        self.config.tracing = enabled;
        self
    }

    /// Native protocol version, 1 or 2.
    ///
    /// Default: 2
    pub fn protocol_version(mut self, version: u8) -> Self {
        self.config.protocol_version = version;
        self
    }

    pub fn cql_version(mut self, version: impl Into<String>) -> Self {
        self.config.cql_version = version.into();
        self
    }

    /// Credentials for the password authenticator.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self.config.password = Some(password.into());
        self
    }

    /// Events to REGISTER for once the connection is ready.
    pub fn register_events(mut self, events: Vec<EventType>) -> Self {
        self.config.register_events = events;
        self
    }

    /// Deadline for each request, measured from the start of the call.
    ///
    /// Default: 5 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Largest response body accepted before the connection is dropped.
    ///
    /// Default: 256 MiB
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the maximum pending frames for backpressure.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.max_pending_frames = limit;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.backpressure_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn event_listener(mut self, listener: EventListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Call `f` on the connection task for every pushed event.
    pub fn on_event<F>(self, f: F) -> Self
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.event_listener(EventListener::callback(f))
    }

    /// Connect and return as soon as the connection task is running.
    pub async fn open(self) -> Result<Client> {
        Client::open(self.config, self.listener).await
    }

    /// Connect, wait for the handshake and register for events.
    pub async fn connect(self) -> Result<Client> {
        Client::connect(self.config, self.listener).await
    }
}

/// Prepared statement id with its raw result metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatement {
    pub id: PreparedId,
    pub metadata: Bytes,
}

/// Handle to a running connection.
///
/// Clones share the connection. The connection task shuts down once every
/// clone is dropped.
#[derive(Debug, Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    slots: WriteSlots,
    request_timeout: Duration,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect the socket and start the connection task.
    ///
    /// Returns while the handshake is still in progress; requests made
    /// before it completes fail with [`DriverError::NotReady`].
    pub async fn open(config: ConnectionConfig, listener: Option<EventListener>) -> Result<Self> {
        config.validate()?;
        let stream = transport::connect(&config.host, config.port, config.connect_timeout()).await?;
        Self::from_stream(stream, config, listener)
    }

    /// [`open`](Self::open), then wait for READY and register for the
    /// configured events.
    pub async fn connect(config: ConnectionConfig, listener: Option<EventListener>) -> Result<Self> {
        let events = config.register_events.clone();
        let timeout = config.request_timeout();

        let client = Self::open(config, listener).await?;
        client.wait_ready(timeout).await?;

        if !events.is_empty() {
            client.register(&events).await?;
        }
        Ok(client)
    }

    /// Run a connection over an already established byte stream.
    pub fn from_stream<S>(
        stream: S,
        config: ConnectionConfig,
        listener: Option<EventListener>,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;
        let handles = connection::spawn(stream, &config, listener);

        Ok(Client {
            commands: handles.commands,
            state: handles.state,
            slots: handles.slots,
            request_timeout: config.request_timeout(),
        })
    }

    /// Wait until the handshake completes.
    ///
    /// Fails with [`DriverError::Timeout`] if it takes longer than
    /// `timeout`, or with the termination error if the connection dies.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let mut state = self.state.clone();
        let waited =
            tokio::time::timeout(timeout, state.wait_for(|s| *s != ConnectionState::Startup)).await;

        match waited {
            Err(_) => Err(DriverError::Timeout),
            Ok(Err(_)) => Err(DriverError::ConnectionClosed),
            Ok(Ok(current)) => match &*current {
                ConnectionState::Terminated(reason) => Err(reason.to_error()),
                _ => Ok(()),
            },
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Stream and pending-table counters from the connection task.
    pub async fn stats(&self) -> Result<ConnectionStats> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply: tx })
            .map_err(|_| self.closed_error())?;
        rx.await.map_err(|_| self.closed_error())
    }

    /// Wait until the connection terminates and return why.
    pub async fn wait_for_shutdown(&self) -> TerminationReason {
        let mut state = self.state.clone();
        let result = match state.wait_for(|s| s.is_terminated()).await {
            Ok(current) => match &*current {
                ConnectionState::Terminated(reason) => reason.clone(),
                _ => TerminationReason::Closed,
            },
            Err(_) => TerminationReason::Closed,
        };
        result
    }

    /// Run a CQL query.
    pub async fn query(&self, query: &str, consistency: Consistency) -> Result<QueryResult> {
        let request = Request::Query {
            query: query.to_string(),
            consistency,
        };
        match self.call(request).await? {
            Response::Result(result) => Ok(result),
            other => Err(unexpected("QUERY", &other)),
        }
    }

    /// Prepare a statement for later [`execute`](Self::execute) calls.
    pub async fn prepare(&self, query: &str) -> Result<PreparedStatement> {
        let request = Request::Prepare {
            query: query.to_string(),
        };
        match self.call(request).await? {
            Response::Result(QueryResult::Prepared { id, metadata }) => {
                Ok(PreparedStatement { id, metadata })
            }
            other => Err(unexpected("PREPARE", &other)),
        }
    }

    /// Execute a prepared statement with already serialized bound values.
    pub async fn execute(
        &self,
        id: &PreparedId,
        values: Vec<Option<Bytes>>,
        consistency: Consistency,
    ) -> Result<QueryResult> {
        if values.len() > u16::MAX as usize {
            return Err(DriverError::InvalidRequest(format!(
                "{} bound values, at most {} allowed",
                values.len(),
                u16::MAX
            )));
        }
        let request = Request::Execute {
            id: id.clone(),
            values,
            consistency,
        };
        match self.call(request).await? {
            Response::Result(result) => Ok(result),
            other => Err(unexpected("EXECUTE", &other)),
        }
    }

    /// Startup options the server supports.
    pub async fn options(&self) -> Result<HashMap<String, Vec<String>>> {
        match self.call(Request::Options).await? {
            Response::Supported(options) => Ok(options),
            other => Err(unexpected("OPTIONS", &other)),
        }
    }

    /// Subscribe this connection to server events.
    pub async fn register(&self, events: &[EventType]) -> Result<()> {
        let request = Request::Register {
            events: events.to_vec(),
        };
        match self.call(request).await? {
            Response::Ready => Ok(()),
            other => Err(unexpected("REGISTER", &other)),
        }
    }

    /// Send a request and turn a server ERROR into [`DriverError::Server`].
    async fn call(&self, request: Request) -> Result<Response> {
        match self.round_trip(request).await? {
            Response::Error { code, message } => Err(DriverError::Server { code, message }),
            response => Ok(response),
        }
    }

    async fn round_trip(&self, request: Request) -> Result<Response> {
        let deadline = Instant::now() + self.request_timeout;
        let token = RequestToken::next();
        let (ack_tx, mut ack_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = oneshot::channel();

        // Backpressure waits here, never in the connection task.
        let permit = match tokio::time::timeout_at(deadline, self.slots.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(DriverError::ConnectionClosed)) => return Err(self.closed_error()),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(DriverError::Timeout),
        };

        self.commands
            .send(Command::Submit {
                request,
                token,
                permit,
                ack: ack_tx,
                reply: reply_tx,
            })
            .map_err(|_| self.closed_error())?;

        let stream = match tokio::time::timeout_at(deadline, &mut ack_rx).await {
            Ok(Ok(ack)) => ack?,
            Ok(Err(_)) => return Err(self.closed_error()),
            Err(_) => {
                // Either the task sees the closed ack and frees the stream
                // itself, or the stream is already here to release.
                ack_rx.close();
                if let Ok(Ok(stream)) = ack_rx.try_recv() {
                    let _ = self.commands.send(Command::Release { stream, token });
                }
                return Err(DriverError::Timeout);
            }
        };

        match tokio::time::timeout_at(deadline, reply_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                let _ = self.commands.send(Command::Release { stream, token });
                Err(DriverError::Timeout)
            }
        }
    }

    /// Error for a call cut off by connection termination.
    fn closed_error(&self) -> DriverError {
        match &*self.state.borrow() {
            ConnectionState::Terminated(reason) => reason.to_error(),
            _ => DriverError::ConnectionClosed,
        }
    }
}

fn unexpected(request: &str, response: &Response) -> DriverError {
    DriverError::UnexpectedResponse(format!("{} in reply to {}", response.name(), request))
}
