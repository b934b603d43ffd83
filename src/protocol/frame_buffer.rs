//! Reassembly of frames from arbitrarily split socket reads.
//!
//! Reads never line up with frame boundaries. [`FrameBuffer`] keeps the
//! unconsumed tail between calls and remembers a header it has already
//! parsed, so a large body trickling in is not re-inspected on every read.

use bytes::{Bytes, BytesMut};

use super::wire_format::{Header, DEFAULT_MAX_BODY_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::{DriverError, Result};

const INITIAL_CAPACITY: usize = 64 * 1024;

/// Carries partial frames from one read to the next.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    /// Header of the frame whose body is still incomplete.
    header: Option<Header>,
    max_body_size: u32,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_max_body(DEFAULT_MAX_BODY_SIZE)
    }

    /// Buffer rejecting any frame whose header announces more than
    /// `max_body_size` body bytes.
    pub fn with_max_body(max_body_size: u32) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
            header: None,
            max_body_size,
        }
    }

    /// Append `data` and return every frame it completes, in wire order.
    ///
    /// # Errors
    ///
    /// A header announcing an oversized body. The buffer cannot recover
    /// from that, since the frame boundary is lost.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buf.extend_from_slice(data);

        let mut out = Vec::new();
        loop {
            let header = match self.header {
                Some(header) => header,
                None => match self.take_header()? {
                    Some(header) => header,
                    None => break,
                },
            };

            let needed = header.length as usize;
            if self.buf.len() < needed {
                self.header = Some(header);
                break;
            }

            self.header = None;
            let body = if needed == 0 {
                Bytes::new()
            } else {
                self.buf.split_to(needed).freeze()
            };
            out.push(Frame::new(header, body));
        }

        Ok(out)
    }

    fn take_header(&mut self) -> Result<Option<Header>> {
        let Some(header) = Header::decode(&self.buf) else {
            return Ok(None);
        };
        if header.length > self.max_body_size {
            return Err(DriverError::Decode(format!(
                "Body size {} exceeds maximum {}",
                header.length, self.max_body_size
            )));
        }
        let _ = self.buf.split_to(HEADER_SIZE);
        Ok(Some(header))
    }

    /// Buffered bytes not yet returned as part of a frame.
    pub fn len(&self) -> usize {
        self.buf.len() + if self.header.is_some() { HEADER_SIZE } else { 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when no partial frame is held.
    pub fn is_at_frame_boundary(&self) -> bool {
        self.is_empty()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, opcode};

    fn wire(stream: i8, op: u8, body: &[u8]) -> Vec<u8> {
        build_frame(&Header::new(0x82, 0, stream, op, body.len() as u32), body)
    }

    #[test]
    fn test_whole_frame() {
        let mut fb = FrameBuffer::new();
        let frames = fb.push(&wire(7, opcode::RESULT, b"\x00\x00\x00\x01")).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].stream(), 7);
        assert_eq!(frames[0].body(), b"\x00\x00\x00\x01");
        assert!(fb.is_at_frame_boundary());
    }

    #[test]
    fn test_back_to_back_frames_keep_order() {
        let mut fb = FrameBuffer::new();
        let mut data = wire(0, opcode::READY, b"");
        data.extend(wire(-1, opcode::EVENT, b"evt"));
        data.extend(wire(12, opcode::RESULT, b"res"));

        let streams: Vec<i8> = fb.push(&data).unwrap().iter().map(|f| f.stream()).collect();
        assert_eq!(streams, vec![0, -1, 12]);
        assert!(fb.is_empty());
    }

    #[test]
    fn test_header_split_across_reads() {
        let mut fb = FrameBuffer::new();
        let data = wire(3, opcode::SUPPORTED, b"opts");

        assert!(fb.push(&data[..3]).unwrap().is_empty());
        assert_eq!(fb.len(), 3);
        assert!(!fb.is_at_frame_boundary());

        assert_eq!(fb.push(&data[3..]).unwrap().len(), 1);
        assert!(fb.is_at_frame_boundary());
    }

    #[test]
    fn test_body_split_keeps_parsed_header() {
        let mut fb = FrameBuffer::new();
        let body = vec![0x5A; 300];
        let data = wire(4, opcode::RESULT, &body);

        assert!(fb.push(&data[..HEADER_SIZE + 100]).unwrap().is_empty());
        assert!(fb.header.is_some());
        assert_eq!(fb.len(), HEADER_SIZE + 100);

        let frames = fb.push(&data[HEADER_SIZE + 100..]).unwrap();
        assert_eq!(frames[0].body(), &body[..]);
        assert!(fb.header.is_none());
    }

    #[test]
    fn test_oversized_body_rejected_from_header() {
        let mut fb = FrameBuffer::with_max_body(100);
        let header = Header::new(0x82, 0, 1, opcode::RESULT, 1000);

        let err = fb.push(&header.encode()).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_complete_frame_then_partial_one() {
        let mut fb = FrameBuffer::new();
        let first = wire(1, opcode::RESULT, b"one");
        let second = wire(2, opcode::RESULT, b"two");

        let mut data = first;
        data.extend_from_slice(&second[..10]);
        let frames = fb.push(&data).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].stream(), 1);

        let frames = fb.push(&second[10..]).unwrap();
        assert_eq!(frames[0].stream(), 2);
        assert_eq!(frames[0].body(), b"two");
    }

    #[test]
    fn test_single_byte_reads() {
        let mut fb = FrameBuffer::new();
        let data = wire(9, opcode::ERROR, b"err!");

        let frames: Vec<Frame> = data
            .iter()
            .flat_map(|b| fb.push(std::slice::from_ref(b)).unwrap())
            .collect();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode(), opcode::ERROR);
    }
}
