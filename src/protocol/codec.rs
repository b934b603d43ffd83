//! Boundary between logical messages and bytes on the socket.
//!
//! - [`encode`] turns one request into one complete frame.
//! - [`Decoder`] turns arbitrary slices of the inbound byte stream into
//!   decoded messages, keeping any partial frame for the next call.
//!
//! # Example
//!
//! ```
//! use cqlwire_client::protocol::{encode, Compression, Decoder, Request};
//!
//! let frame = encode(&Request::Options, 0, 1, 2, Compression::None);
//! assert_eq!(&frame[..4], &[0x02, 0x00, 0x01, 0x05]);
//!
//! let mut decoder = Decoder::new(2, Compression::None);
//! // READY on stream 0, split over two reads
//! assert!(decoder.decode(&[0x82, 0x00, 0x00]).unwrap().is_empty());
//! let messages = decoder.decode(&[0x02, 0, 0, 0, 0]).unwrap();
//! assert_eq!(messages.len(), 1);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::compression::Compression;
use super::frame_buffer::FrameBuffer;
use super::primitives::read_uuid;
use super::request::Request;
use super::response::Response;
use super::wire_format::{flags, Header, DEFAULT_MAX_BODY_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::Result;

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Stream id the server tagged the frame with.
    pub stream: i8,
    /// Tracing session id, present when the tracing flag was set.
    pub tracing_id: Option<[u8; 16]>,
    pub response: Response,
}

/// Encode one request frame.
///
/// `frame_flags` carries the tracing bit; the compression bit is added
/// here when `compression` is enabled, except for STARTUP which is always
/// sent uncompressed.
pub fn encode(
    request: &Request,
    frame_flags: u8,
    stream: i8,
    protocol_version: u8,
    compression: Compression,
) -> Bytes {
    let body = request.encode_body(protocol_version);

    let compress = compression.is_enabled() && !matches!(request, Request::Startup { .. });
    let (frame_flags, body) = if compress {
        (frame_flags | flags::COMPRESSION, compression.compress(&body))
    } else {
        (frame_flags & !flags::COMPRESSION, body.freeze())
    };

    let header = Header::request(
        protocol_version,
        frame_flags,
        stream,
        request.opcode(),
        body.len() as u32,
    );

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
    buf.put_slice(&header.encode());
    buf.put_slice(&body);
    buf.freeze()
}

/// Resumable decoder for the inbound byte stream.
///
/// Owns the buffered partial frame. Feed every socket read to
/// [`Decoder::decode`]; it yields the complete messages in wire order.
pub struct Decoder {
    frames: FrameBuffer,
    protocol_version: u8,
    compression: Compression,
    max_body_size: u32,
}

impl Decoder {
    pub fn new(protocol_version: u8, compression: Compression) -> Self {
        Self::with_max_body(protocol_version, compression, DEFAULT_MAX_BODY_SIZE)
    }

    pub fn with_max_body(protocol_version: u8, compression: Compression, max_body_size: u32) -> Self {
        Self {
            frames: FrameBuffer::with_max_body(max_body_size),
            protocol_version,
            compression,
            max_body_size,
        }
    }

    /// Decode every complete message contained in the bytes seen so far.
    ///
    /// # Errors
    ///
    /// Any malformed frame is an error; the stream cannot be resynchronised
    /// afterwards and the connection must be dropped.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<Message>> {
        let frames = self.frames.push(data)?;
        frames.into_iter().map(|frame| self.decode_frame(frame)).collect()
    }

    fn decode_frame(&self, frame: Frame) -> Result<Message> {
        let header = frame.header;
        header.validate_response(self.protocol_version, self.max_body_size)?;

        let mut body = if header.is_compressed() {
            self.compression.decompress(&frame.body, self.max_body_size)?
        } else {
            frame.body
        };

        let tracing_id = if header.is_tracing() {
            Some(read_uuid(&mut body)?)
        } else {
            None
        };

        let response = Response::decode(header.opcode, body)?;

        Ok(Message {
            stream: header.stream,
            tracing_id,
            response,
        })
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.frames.len()
    }
}
