//! One inbound or outbound message: header plus raw body.
//!
//! The body is a `Bytes` slice of the read buffer, so splitting frames off
//! a large read copies nothing.
//!
//! # Example
//!
//! ```
//! use cqlwire_client::protocol::{opcode, Frame, Header};
//! use bytes::Bytes;
//!
//! let header = Header::new(0x82, 0, 3, opcode::READY, 0);
//! let frame = Frame::new(header, Bytes::new());
//!
//! assert_eq!(frame.stream(), 3);
//! assert_eq!(frame.opcode(), opcode::READY);
//! ```

use bytes::Bytes;

use super::wire_format::{Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Body bytes, still compressed if the compression flag is set.
    pub body: Bytes,
}

impl Frame {
    pub fn new(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Raw body, before decompression.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[inline]
    pub fn stream(&self) -> i8 {
        self.header.stream
    }

    #[inline]
    pub fn opcode(&self) -> u8 {
        self.header.opcode
    }

    #[inline]
    pub fn flags(&self) -> u8 {
        self.header.flags
    }

    /// Sent on the event stream.
    #[inline]
    pub fn is_event(&self) -> bool {
        self.header.is_event()
    }
}

/// Concatenate an encoded header and `body`.
///
/// `header.length` is written as given and should equal `body.len()`.
///
/// # Example
///
/// ```
/// use cqlwire_client::protocol::{build_frame, opcode, Header};
///
/// let header = Header::new(0x82, 0, 1, opcode::RESULT, 4);
/// let bytes = build_frame(&header, &[0, 0, 0, 1]);
/// assert_eq!(bytes.len(), 8 + 4);
/// ```
pub fn build_frame(header: &Header, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(body);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{opcode, EVENT_STREAM};

    #[test]
    fn test_frame_accessors() {
        let header = Header::new(0x82, 0x02, 42, opcode::RESULT, 5);
        let frame = Frame::new(header, Bytes::from_static(b"hello"));

        assert_eq!(frame.stream(), 42);
        assert_eq!(frame.opcode(), opcode::RESULT);
        assert_eq!(frame.flags(), 0x02);
        assert_eq!(frame.body(), b"hello");
        assert!(!frame.is_event());
    }

    #[test]
    fn test_frame_is_event() {
        let header = Header::new(0x82, 0, EVENT_STREAM, opcode::EVENT, 0);
        assert!(Frame::new(header, Bytes::new()).is_event());
    }

    #[test]
    fn test_build_frame() {
        let header = Header::new(0x82, 0, 1, opcode::RESULT, 5);
        let bytes = build_frame(&header, b"hello");

        assert_eq!(bytes.len(), HEADER_SIZE + 5);
        assert_eq!(Header::decode(&bytes).unwrap(), header);
        assert_eq!(&bytes[HEADER_SIZE..], b"hello");
    }
}
