//! Protocol module - wire format, framing, and message types.
//!
//! This module implements native protocol v1/v2:
//! - 8-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Request encoding and response decoding
//! - LZ4 body compression
//! - The [`encode`] / [`Decoder`] boundary used by the connection task

mod codec;
mod compression;
mod frame;
mod frame_buffer;
pub mod primitives;
mod request;
mod response;
mod wire_format;

pub use codec::{encode, Decoder, Message};
pub use compression::Compression;
pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use request::{
    startup, Consistency, EventType, PreparedId, Request, COMPRESSION_OPTION, CQL_VERSION_OPTION,
};
pub use response::{Event, QueryResult, Response, PASSWORD_AUTHENTICATOR};
pub use wire_format::{
    flags, opcode, Header, DEFAULT_MAX_BODY_SIZE, EVENT_STREAM, HEADER_SIZE, MAX_STREAM_ID,
    RESPONSE_DIRECTION, SUPPORTED_VERSIONS,
};
