//! Body notation of the native protocol.
//!
//! `[short]` is a u16, `[int]` an i32, both big endian. `[string]` is a
//! `[short]` length followed by UTF-8, `[long string]` uses an `[int]`
//! length. `[bytes]` is an `[int]` length (negative = null) followed by raw
//! bytes; `[short bytes]` uses a `[short]` length. `[inet]` is a one-byte
//! address size, the address, and an `[int]` port.
//!
//! Readers consume from a `Bytes` so that blobs are split off without
//! copying.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DriverError, Result};

fn truncated(what: &str) -> DriverError {
    DriverError::Decode(format!("Truncated body while reading {}", what))
}

fn ensure(buf: &Bytes, n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(truncated(what));
    }
    Ok(())
}

/// `[short]` length prefix. Callers keep lengths within `u16::MAX`.
pub(crate) fn short_len(len: usize) -> u16 {
    debug_assert!(len <= u16::MAX as usize, "[short] length {} out of range", len);
    len as u16
}

/// `[int]` length prefix. Frames never get near `i32::MAX`.
fn int_len(len: usize) -> i32 {
    debug_assert!(len <= i32::MAX as usize, "[int] length {} out of range", len);
    len as i32
}

pub fn write_short(buf: &mut BytesMut, value: u16) {
    buf.put_u16(value);
}

pub fn write_int(buf: &mut BytesMut, value: i32) {
    buf.put_i32(value);
}

pub fn write_string(buf: &mut BytesMut, value: &str) {
    buf.put_u16(short_len(value.len()));
    buf.put_slice(value.as_bytes());
}

pub fn write_long_string(buf: &mut BytesMut, value: &str) {
    buf.put_i32(int_len(value.len()));
    buf.put_slice(value.as_bytes());
}

pub fn write_string_list<S: AsRef<str>>(buf: &mut BytesMut, values: &[S]) {
    buf.put_u16(short_len(values.len()));
    for value in values {
        write_string(buf, value.as_ref());
    }
}

/// `[string map]`, written in the order given.
pub fn write_string_map<K: AsRef<str>, V: AsRef<str>>(buf: &mut BytesMut, entries: &[(K, V)]) {
    buf.put_u16(short_len(entries.len()));
    for (key, value) in entries {
        write_string(buf, key.as_ref());
        write_string(buf, value.as_ref());
    }
}

/// `[bytes]`; `None` is written as the null length -1.
pub fn write_bytes(buf: &mut BytesMut, value: Option<&[u8]>) {
    match value {
        Some(data) => {
            buf.put_i32(int_len(data.len()));
            buf.put_slice(data);
        }
        None => buf.put_i32(-1),
    }
}

pub fn write_short_bytes(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u16(short_len(value.len()));
    buf.put_slice(value);
}

pub fn read_u8(buf: &mut Bytes) -> Result<u8> {
    ensure(buf, 1, "byte")?;
    Ok(buf.get_u8())
}

pub fn read_short(buf: &mut Bytes) -> Result<u16> {
    ensure(buf, 2, "short")?;
    Ok(buf.get_u16())
}

pub fn read_int(buf: &mut Bytes) -> Result<i32> {
    ensure(buf, 4, "int")?;
    Ok(buf.get_i32())
}

pub fn read_string(buf: &mut Bytes) -> Result<String> {
    let len = read_short(buf)? as usize;
    ensure(buf, len, "string")?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|e| DriverError::Decode(format!("Invalid UTF-8 in string: {}", e)))
}

pub fn read_string_list(buf: &mut Bytes) -> Result<Vec<String>> {
    let n = read_short(buf)? as usize;
    (0..n).map(|_| read_string(buf)).collect()
}

pub fn read_string_multimap(buf: &mut Bytes) -> Result<HashMap<String, Vec<String>>> {
    let n = read_short(buf)? as usize;
    let mut map = HashMap::with_capacity(n);
    for _ in 0..n {
        let key = read_string(buf)?;
        let values = read_string_list(buf)?;
        map.insert(key, values);
    }
    Ok(map)
}

/// `[bytes]`; a negative length is null.
pub fn read_bytes(buf: &mut Bytes) -> Result<Option<Bytes>> {
    let len = read_int(buf)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    ensure(buf, len, "bytes")?;
    Ok(Some(buf.split_to(len)))
}

pub fn read_short_bytes(buf: &mut Bytes) -> Result<Bytes> {
    let len = read_short(buf)? as usize;
    ensure(buf, len, "short bytes")?;
    Ok(buf.split_to(len))
}

pub fn read_inet(buf: &mut Bytes) -> Result<SocketAddr> {
    let size = read_u8(buf)? as usize;
    ensure(buf, size, "inet address")?;
    let ip = match size {
        4 => {
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        16 => {
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => {
            return Err(DriverError::Decode(format!(
                "Invalid inet address size {}",
                other
            )))
        }
    };
    let port = read_int(buf)?;
    let port = u16::try_from(port)
        .map_err(|_| DriverError::Decode(format!("Invalid inet port {}", port)))?;
    Ok(SocketAddr::new(ip, port))
}

pub fn read_uuid(buf: &mut Bytes) -> Result<[u8; 16]> {
    ensure(buf, 16, "uuid")?;
    let mut uuid = [0u8; 16];
    buf.copy_to_slice(&mut uuid);
    Ok(uuid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_layout() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "abc");
        assert_eq!(&buf[..], &[0, 3, b'a', b'b', b'c']);

        let mut bytes = buf.freeze();
        assert_eq!(read_string(&mut bytes).unwrap(), "abc");
        assert!(bytes.is_empty());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "out of range")]
    fn test_string_longer_than_short_panics() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, &"k".repeat(u16::MAX as usize + 1));
    }

    #[test]
    fn test_string_at_short_limit() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, &"k".repeat(u16::MAX as usize));
        assert_eq!(&buf[..2], &[0xFF, 0xFF]);
        assert_eq!(buf.len(), 2 + u16::MAX as usize);
    }

    #[test]
    fn test_long_string_layout() {
        let mut buf = BytesMut::new();
        write_long_string(&mut buf, "SELECT 1");
        assert_eq!(&buf[..4], &[0, 0, 0, 8]);
        assert_eq!(&buf[4..], b"SELECT 1");
    }

    #[test]
    fn test_null_bytes() {
        let mut buf = BytesMut::new();
        write_bytes(&mut buf, None);
        write_bytes(&mut buf, Some(b"xy"));
        let mut bytes = buf.freeze();

        assert_eq!(read_bytes(&mut bytes).unwrap(), None);
        assert_eq!(read_bytes(&mut bytes).unwrap().unwrap(), &b"xy"[..]);
    }

    #[test]
    fn test_multimap() {
        let mut buf = BytesMut::new();
        write_short(&mut buf, 1);
        write_string(&mut buf, "COMPRESSION");
        write_string_list(&mut buf, &["lz4", "snappy"]);

        let map = read_string_multimap(&mut buf.freeze()).unwrap();
        assert_eq!(map["COMPRESSION"], vec!["lz4", "snappy"]);
    }

    #[test]
    fn test_inet_v4() {
        let mut buf = BytesMut::new();
        buf.put_u8(4);
        buf.put_slice(&[10, 0, 0, 7]);
        write_int(&mut buf, 9042);

        let addr = read_inet(&mut buf.freeze()).unwrap();
        assert_eq!(addr, "10.0.0.7:9042".parse().unwrap());
    }

    #[test]
    fn test_inet_bad_size() {
        let mut buf = BytesMut::new();
        buf.put_u8(5);
        buf.put_slice(&[0; 9]);
        assert!(read_inet(&mut buf.freeze()).is_err());
    }

    #[test]
    fn test_truncated_string_is_error() {
        let mut bytes = Bytes::from_static(&[0, 10, b'a']);
        let err = read_string(&mut bytes).unwrap_err();
        assert!(err.to_string().contains("Truncated"));
    }
}
