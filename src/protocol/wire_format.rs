//! The 8-byte frame header of native protocol v1/v2:
//! ```text
//! ┌─────────┬───────┬────────┬────────┬──────────┐
//! │ Version │ Flags │ Stream │ Opcode │ Length   │
//! │ 1 byte  │ 1 byte│ int8   │ 1 byte │ uint32 BE│
//! └─────────┴───────┴────────┴────────┴──────────┘
//! ```
//!
//! The high bit of the version byte is the direction: 0 for requests,
//! 1 for responses.

use crate::error::{DriverError, Result};

pub const HEADER_SIZE: usize = 8;

/// Default maximum body size (256 MB, the server side limit).
pub const DEFAULT_MAX_BODY_SIZE: u32 = 256 * 1024 * 1024;

/// Direction bit of the version byte.
pub const RESPONSE_DIRECTION: u8 = 0x80;

/// Stream id used by the server for pushed events.
pub const EVENT_STREAM: i8 = -1;

/// Highest stream id a client may use.
pub const MAX_STREAM_ID: i8 = 127;

/// Supported protocol versions.
pub const SUPPORTED_VERSIONS: [u8; 2] = [1, 2];

/// Header flag bits.
pub mod flags {
    /// Body is compressed with the negotiated algorithm.
    pub const COMPRESSION: u8 = 0x01;
    /// Request tracing; responses carry a tracing session id.
    pub const TRACING: u8 = 0x02;

    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

pub mod opcode {
    pub const ERROR: u8 = 0x00;
    pub const STARTUP: u8 = 0x01;
    pub const READY: u8 = 0x02;
    pub const AUTHENTICATE: u8 = 0x03;
    pub const CREDENTIALS: u8 = 0x04;
    pub const OPTIONS: u8 = 0x05;
    pub const SUPPORTED: u8 = 0x06;
    pub const QUERY: u8 = 0x07;
    pub const RESULT: u8 = 0x08;
    pub const PREPARE: u8 = 0x09;
    pub const EXECUTE: u8 = 0x0A;
    pub const REGISTER: u8 = 0x0B;
    pub const EVENT: u8 = 0x0C;

    /// Human readable opcode name for logs and errors.
    pub fn name(op: u8) -> &'static str {
        match op {
            ERROR => "ERROR",
            STARTUP => "STARTUP",
            READY => "READY",
            AUTHENTICATE => "AUTHENTICATE",
            CREDENTIALS => "CREDENTIALS",
            OPTIONS => "OPTIONS",
            SUPPORTED => "SUPPORTED",
            QUERY => "QUERY",
            RESULT => "RESULT",
            PREPARE => "PREPARE",
            EXECUTE => "EXECUTE",
            REGISTER => "REGISTER",
            EVENT => "EVENT",
            _ => "UNKNOWN",
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Version byte, including the direction bit.
    pub version: u8,
    /// Flags byte (see `flags` module).
    pub flags: u8,
    /// Stream id (-1 = server event).
    pub stream: i8,
    /// Message opcode.
    pub opcode: u8,
    /// Body length in bytes.
    pub length: u32,
}

impl Header {
    pub fn new(version: u8, flags: u8, stream: i8, opcode: u8, length: u32) -> Self {
        Self {
            version,
            flags,
            stream,
            opcode,
            length,
        }
    }

    /// Header for a client request of the given protocol version.
    pub fn request(protocol_version: u8, flags: u8, stream: i8, opcode: u8, length: u32) -> Self {
        Self::new(protocol_version & !RESPONSE_DIRECTION, flags, stream, opcode, length)
    }

    /// Wire bytes of this header. The length is big-endian.
    ///
    /// # Example
    ///
    /// ```
    /// use cqlwire_client::protocol::{opcode, Header};
    ///
    /// let header = Header::request(2, 0, 5, opcode::QUERY, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes, [0x02, 0x00, 0x05, 0x07, 0, 0, 0, 100]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Write the header into the first `HEADER_SIZE` bytes of `buf`.
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.version;
        buf[1] = self.flags;
        buf[2] = self.stream as u8;
        buf[3] = self.opcode;
        buf[4..8].copy_from_slice(&self.length.to_be_bytes());
    }

    /// Parse the first `HEADER_SIZE` bytes of `buf`, or `None` if there are fewer.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            version: buf[0],
            flags: buf[1],
            stream: buf[2] as i8,
            opcode: buf[3],
            length: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Reject headers that are not responses, carry another protocol
    /// version, or announce a body above `max_body_size`.
    pub fn validate_response(&self, protocol_version: u8, max_body_size: u32) -> Result<()> {
        if !self.is_response() {
            return Err(DriverError::Decode(format!(
                "Version byte {:#04x} is not a response",
                self.version
            )));
        }

        if self.protocol_version() != protocol_version {
            return Err(DriverError::Decode(format!(
                "Protocol version {} does not match negotiated version {}",
                self.protocol_version(),
                protocol_version
            )));
        }

        if self.length > max_body_size {
            return Err(DriverError::Decode(format!(
                "Body size {} exceeds maximum {}",
                self.length, max_body_size
            )));
        }

        Ok(())
    }

    /// Protocol version without the direction bit.
    #[inline]
    pub fn protocol_version(&self) -> u8 {
        self.version & !RESPONSE_DIRECTION
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        self.version & RESPONSE_DIRECTION != 0
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        flags::has_flag(self.flags, flags::COMPRESSION)
    }

    #[inline]
    pub fn is_tracing(&self) -> bool {
        flags::has_flag(self.flags, flags::TRACING)
    }

    /// Pushed by the server rather than answering a request.
    #[inline]
    pub fn is_event(&self) -> bool {
        self.stream == EVENT_STREAM
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_decodes_what_it_encodes() {
        let original = Header::new(0x82, flags::TRACING, 42, opcode::RESULT, 100);
        let decoded = Header::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_byte_layout() {
        let header = Header::new(0x82, 0x03, -1, opcode::EVENT, 0x0102_0304);
        let bytes = header.encode();

        assert_eq!(bytes[0], 0x82);
        assert_eq!(bytes[1], 0x03);
        assert_eq!(bytes[2], 0xFF); // stream -1
        assert_eq!(bytes[3], 0x0C);
        assert_eq!(&bytes[4..], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_seven_bytes_are_not_a_header() {
        let buf = [0u8; 7];
        assert!(Header::decode(&buf).is_none());
    }

    #[test]
    fn test_request_header_clears_direction_bit() {
        let header = Header::request(0x82, 0, 1, opcode::OPTIONS, 0);
        assert_eq!(header.version, 0x02);
        assert!(!header.is_response());
    }

    #[test]
    fn test_validate_rejects_request_direction() {
        let header = Header::new(0x02, 0, 1, opcode::RESULT, 0);
        let err = header.validate_response(2, DEFAULT_MAX_BODY_SIZE).unwrap_err();
        assert!(err.to_string().contains("not a response"));
    }

    #[test]
    fn test_validate_rejects_version_mismatch() {
        let header = Header::new(0x81, 0, 1, opcode::RESULT, 0);
        let err = header.validate_response(2, DEFAULT_MAX_BODY_SIZE).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_validate_rejects_oversized_body() {
        let header = Header::new(0x82, 0, 1, opcode::RESULT, 1_000);
        let err = header.validate_response(2, 100).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_header_accessors() {
        let header = Header::new(0x82, flags::COMPRESSION | flags::TRACING, EVENT_STREAM, opcode::EVENT, 0);
        assert!(header.is_response());
        assert!(header.is_compressed());
        assert!(header.is_tracing());
        assert!(header.is_event());
        assert_eq!(header.protocol_version(), 2);
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(opcode::name(opcode::AUTHENTICATE), "AUTHENTICATE");
        assert_eq!(opcode::name(0x7F), "UNKNOWN");
    }
}
