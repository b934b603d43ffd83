//! # cqlwire-client
//!
//! Multiplexing client connection for the Cassandra native protocol (v1/v2).
//!
//! One TCP connection carries up to 128 concurrent requests, each tagged
//! with a stream id so responses can come back in any order.
//!
//! ## Architecture
//!
//! - **Connection task**: owns the socket reader, stream id pool, pending
//!   request table and decoder; runs the STARTUP/AUTHENTICATE handshake
//! - **Writer task**: owns the socket write half and batches outbound frames
//! - **Client**: cloneable handle that submits requests and awaits replies
//!   with a per-call timeout
//!
//! ## Example
//!
//! ```ignore
//! use cqlwire_client::{Client, Consistency};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cqlwire_client::DriverError> {
//!     let client = Client::builder().host("127.0.0.1").connect().await?;
//!
//!     let rows = client
//!         .query("SELECT * FROM system.peers", Consistency::One)
//!         .await?;
//!     println!("{:?}", rows);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod protocol;
pub mod transport;
pub mod writer;

mod client;

pub use client::{Client, ClientBuilder, PreparedStatement};
pub use config::ConnectionConfig;
pub use connection::{ConnectionState, ConnectionStats, TerminationReason};
pub use error::{DriverError, Result};
pub use events::EventListener;
pub use protocol::{Compression, Consistency, Event, EventType, PreparedId, QueryResult};
