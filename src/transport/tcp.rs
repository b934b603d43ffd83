//! TCP connection to a server node.
//!
//! # Example
//!
//! ```ignore
//! use cqlwire_client::transport::connect;
//! use std::time::Duration;
//!
//! let stream = connect("127.0.0.1", 9042, Duration::from_secs(5)).await?;
//! let (reader, writer) = stream.into_split();
//! ```

use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{DriverError, Result};

/// Open a TCP connection with `TCP_NODELAY` set.
///
/// Any failure, including hitting `connect_timeout`, is reported as
/// [`DriverError::ConnectFailure`].
pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<TcpStream> {
    let addr = format!("{}:{}", host, port);

    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(DriverError::ConnectFailure { addr, source }),
        Err(_) => {
            return Err(DriverError::ConnectFailure {
                addr,
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            })
        }
    };

    stream
        .set_nodelay(true)
        .map_err(|source| DriverError::ConnectFailure {
            addr: addr.clone(),
            source,
        })?;

    tracing::debug!("Connected to {}", addr);
    Ok(stream)
}
