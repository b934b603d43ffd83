//! Response messages and their body decoding.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;

use super::primitives::{read_inet, read_int, read_short_bytes, read_string, read_string_multimap};
use super::request::PreparedId;
use super::wire_format::opcode;
use crate::error::{DriverError, Result};

/// Authenticator the driver can answer with CREDENTIALS.
pub const PASSWORD_AUTHENTICATOR: &str = "org.apache.cassandra.auth.PasswordAuthenticator";

/// A decoded server response.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Error { code: i32, message: String },
    Ready,
    Authenticate { authenticator: String },
    Supported(HashMap<String, Vec<String>>),
    Result(QueryResult),
    Event(Event),
}

/// Body of a RESULT response.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Void,
    /// Rows are handed over undecoded: metadata, row count and row content.
    Rows(Bytes),
    SetKeyspace(String),
    Prepared {
        id: PreparedId,
        metadata: Bytes,
    },
    SchemaChange {
        change: String,
        keyspace: String,
        table: String,
    },
}

/// Server pushed event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TopologyChange { change: String, address: SocketAddr },
    StatusChange { change: String, address: SocketAddr },
    SchemaChange {
        change: String,
        keyspace: String,
        table: String,
    },
}

mod result_kind {
    pub const VOID: i32 = 0x0001;
    pub const ROWS: i32 = 0x0002;
    pub const SET_KEYSPACE: i32 = 0x0003;
    pub const PREPARED: i32 = 0x0004;
    pub const SCHEMA_CHANGE: i32 = 0x0005;
}

impl Response {
    /// Decode a response body for the given opcode.
    ///
    /// `body` must already be decompressed and have any tracing id removed.
    pub fn decode(op: u8, mut body: Bytes) -> Result<Self> {
        let response = match op {
            opcode::ERROR => {
                let code = read_int(&mut body)?;
                let message = read_string(&mut body)?;
                // Error-specific trailing fields are not surfaced.
                Response::Error { code, message }
            }
            opcode::READY => Response::Ready,
            opcode::AUTHENTICATE => Response::Authenticate {
                authenticator: read_string(&mut body)?,
            },
            opcode::SUPPORTED => Response::Supported(read_string_multimap(&mut body)?),
            opcode::RESULT => Response::Result(decode_result(&mut body)?),
            opcode::EVENT => Response::Event(decode_event(&mut body)?),
            other => {
                return Err(DriverError::Decode(format!(
                    "Unexpected response opcode {:#04x} ({})",
                    other,
                    opcode::name(other)
                )))
            }
        };
        Ok(response)
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Response::Error { .. } => "ERROR",
            Response::Ready => "READY",
            Response::Authenticate { .. } => "AUTHENTICATE",
            Response::Supported(_) => "SUPPORTED",
            Response::Result(_) => "RESULT",
            Response::Event(_) => "EVENT",
        }
    }
}

fn decode_result(body: &mut Bytes) -> Result<QueryResult> {
    let kind = read_int(body)?;
    let result = match kind {
        result_kind::VOID => QueryResult::Void,
        result_kind::ROWS => QueryResult::Rows(body.split_off(0)),
        result_kind::SET_KEYSPACE => QueryResult::SetKeyspace(read_string(body)?),
        result_kind::PREPARED => QueryResult::Prepared {
            id: PreparedId(read_short_bytes(body)?),
            metadata: body.split_off(0),
        },
        result_kind::SCHEMA_CHANGE => QueryResult::SchemaChange {
            change: read_string(body)?,
            keyspace: read_string(body)?,
            table: read_string(body)?,
        },
        other => {
            return Err(DriverError::Decode(format!(
                "Unknown result kind {:#06x}",
                other
            )))
        }
    };
    Ok(result)
}

fn decode_event(body: &mut Bytes) -> Result<Event> {
    let kind = read_string(body)?;
    let event = match kind.as_str() {
        "TOPOLOGY_CHANGE" => Event::TopologyChange {
            change: read_string(body)?,
            address: read_inet(body)?,
        },
        "STATUS_CHANGE" => Event::StatusChange {
            change: read_string(body)?,
            address: read_inet(body)?,
        },
        "SCHEMA_CHANGE" => Event::SchemaChange {
            change: read_string(body)?,
            keyspace: read_string(body)?,
            table: read_string(body)?,
        },
        other => {
            return Err(DriverError::Decode(format!("Unknown event type {}", other)));
        }
    };
    Ok(event)
}
