//! Request messages and their body encoding.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::primitives::{
    short_len, write_bytes, write_long_string, write_short, write_short_bytes, write_string_list,
    write_string_map,
};
use super::wire_format::opcode;

/// Consistency level of a read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    Serial,
    LocalSerial,
    LocalOne,
}

impl Consistency {
    /// Wire code (`[consistency]` is a `[short]`).
    pub fn code(&self) -> u16 {
        match self {
            Consistency::Any => 0x0000,
            Consistency::One => 0x0001,
            Consistency::Two => 0x0002,
            Consistency::Three => 0x0003,
            Consistency::Quorum => 0x0004,
            Consistency::All => 0x0005,
            Consistency::LocalQuorum => 0x0006,
            Consistency::EachQuorum => 0x0007,
            Consistency::Serial => 0x0008,
            Consistency::LocalSerial => 0x0009,
            Consistency::LocalOne => 0x000A,
        }
    }
}

/// Server event types a connection can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    TopologyChange,
    StatusChange,
    SchemaChange,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TopologyChange => "TOPOLOGY_CHANGE",
            EventType::StatusChange => "STATUS_CHANGE",
            EventType::SchemaChange => "SCHEMA_CHANGE",
        }
    }
}

/// Identifier returned by PREPARE and passed back in EXECUTE.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreparedId(pub Bytes);

impl PreparedId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A client request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Startup {
        options: Vec<(String, String)>,
    },
    Credentials {
        username: String,
        password: String,
    },
    Options,
    Query {
        query: String,
        consistency: Consistency,
    },
    Prepare {
        query: String,
    },
    Execute {
        id: PreparedId,
        values: Vec<Option<Bytes>>,
        consistency: Consistency,
    },
    Register {
        events: Vec<EventType>,
    },
}

/// Query parameter flag: values follow.
const QUERY_FLAG_VALUES: u8 = 0x01;

impl Request {
    pub fn opcode(&self) -> u8 {
        match self {
            Request::Startup { .. } => opcode::STARTUP,
            Request::Credentials { .. } => opcode::CREDENTIALS,
            Request::Options => opcode::OPTIONS,
            Request::Query { .. } => opcode::QUERY,
            Request::Prepare { .. } => opcode::PREPARE,
            Request::Execute { .. } => opcode::EXECUTE,
            Request::Register { .. } => opcode::REGISTER,
        }
    }

    /// Requests whose response honours the tracing flag.
    pub fn is_traceable(&self) -> bool {
        matches!(
            self,
            Request::Query { .. } | Request::Prepare { .. } | Request::Execute { .. }
        )
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        opcode::name(self.opcode())
    }

    /// Encode the uncompressed body for the given protocol version.
    ///
    /// QUERY and EXECUTE differ between v1 (consistency last) and v2
    /// (query parameters block).
    pub fn encode_body(&self, protocol_version: u8) -> BytesMut {
        let mut buf = BytesMut::new();
        match self {
            Request::Startup { options } => write_string_map(&mut buf, options),
            Request::Credentials { username, password } => {
                write_string_map(&mut buf, &[("username", username), ("password", password)])
            }
            Request::Options => {}
            Request::Query { query, consistency } => {
                write_long_string(&mut buf, query);
                if protocol_version >= 2 {
                    write_query_parameters(&mut buf, *consistency, &[]);
                } else {
                    write_short(&mut buf, consistency.code());
                }
            }
            Request::Prepare { query } => write_long_string(&mut buf, query),
            Request::Execute {
                id,
                values,
                consistency,
            } => {
                write_short_bytes(&mut buf, id.as_bytes());
                if protocol_version >= 2 {
                    write_query_parameters(&mut buf, *consistency, values);
                } else {
                    write_values(&mut buf, values);
                    write_short(&mut buf, consistency.code());
                }
            }
            Request::Register { events } => {
                let names: Vec<&str> = events.iter().map(EventType::as_str).collect();
                write_string_list(&mut buf, &names);
            }
        }
        buf
    }
}

fn write_values(buf: &mut BytesMut, values: &[Option<Bytes>]) {
    write_short(buf, short_len(values.len()));
    for value in values {
        write_bytes(buf, value.as_deref());
    }
}

fn write_query_parameters(buf: &mut BytesMut, consistency: Consistency, values: &[Option<Bytes>]) {
    write_short(buf, consistency.code());
    if values.is_empty() {
        buf.put_u8(0);
    } else {
        buf.put_u8(QUERY_FLAG_VALUES);
        write_values(buf, values);
    }
}

/// Name of the STARTUP option carrying the CQL version.
pub const CQL_VERSION_OPTION: &str = "CQL_VERSION";

/// Name of the STARTUP option carrying the compression algorithm.
pub const COMPRESSION_OPTION: &str = "COMPRESSION";

/// Build the handshake STARTUP request.
pub fn startup(cql_version: &str, compression: Option<&str>) -> Request {
    let mut options = vec![(CQL_VERSION_OPTION.to_string(), cql_version.to_string())];
    if let Some(name) = compression {
        options.push((COMPRESSION_OPTION.to_string(), name.to_string()));
    }
    Request::Startup { options }
}
