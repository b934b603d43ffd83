//! Frame body compression.
//!
//! Negotiated once in STARTUP (`COMPRESSION` option). LZ4 bodies are a
//! 4-byte big endian uncompressed length followed by a raw LZ4 block;
//! `lz4_flex`'s own size-prepended helpers use little endian, so the
//! length is written by hand.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

/// Compression algorithm for frame bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Bodies are sent as-is.
    #[default]
    None,
    /// LZ4 block compression.
    Lz4,
}

impl Compression {
    /// Value of the STARTUP `COMPRESSION` option, if any.
    pub fn startup_name(&self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Lz4 => Some("lz4"),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Compression::None)
    }

    /// Compress a request body.
    pub fn compress(&self, body: &[u8]) -> Bytes {
        match self {
            Compression::None => Bytes::copy_from_slice(body),
            Compression::Lz4 => {
                let block = lz4_flex::block::compress(body);
                let mut buf = BytesMut::with_capacity(4 + block.len());
                buf.put_u32(body.len() as u32);
                buf.put_slice(&block);
                buf.freeze()
            }
        }
    }

    /// Decompress a response body of at most `max_size` uncompressed bytes.
    ///
    /// The length prefix is checked against `max_size` before anything is
    /// allocated.
    pub fn decompress(&self, body: &[u8], max_size: u32) -> Result<Bytes> {
        match self {
            Compression::None => Err(DriverError::Decode(
                "Compressed body received without negotiated compression".to_string(),
            )),
            Compression::Lz4 => {
                if body.len() < 4 {
                    return Err(DriverError::Decode(
                        "LZ4 body shorter than its length prefix".to_string(),
                    ));
                }
                let size = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                if size > max_size {
                    return Err(DriverError::Decode(format!(
                        "Uncompressed body size {} exceeds maximum {}",
                        size, max_size
                    )));
                }
                let out = lz4_flex::block::decompress(&body[4..], size as usize)
                    .map_err(|e| DriverError::Decode(format!("LZ4 decompression failed: {}", e)))?;
                Ok(Bytes::from(out))
            }
        }
    }
}

impl std::str::FromStr for Compression {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            other => Err(DriverError::Config(format!(
                "Unsupported compression: {}",
                other
            ))),
        }
    }
}
