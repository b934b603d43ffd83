//! Fixed-capacity pool of reusable stream ids.

use crate::protocol::MAX_STREAM_ID;

/// Stream id carried in the frame header.
pub type StreamId = i8;

/// Stream used by the handshake; joins the pool once the connection is ready.
pub const HANDSHAKE_STREAM: StreamId = 0;

const CAPACITY: usize = MAX_STREAM_ID as usize + 1;

/// Free stream ids.
///
/// `allocate` and `release` are O(1). A bitmask mirrors the free stack so a
/// release of an id that is already free cannot put it in the pool twice.
#[derive(Debug)]
pub struct StreamIdPool {
    free: Vec<StreamId>,
    /// Bit `n` set means stream `n` is free.
    free_mask: u128,
}

impl StreamIdPool {
    /// Pool with every id except [`HANDSHAKE_STREAM`] available.
    pub fn new() -> Self {
        let mut pool = Self {
            free: Vec::with_capacity(CAPACITY),
            free_mask: 0,
        };
        // Pushed high to low so the lowest ids are handed out first.
        for id in (1..=MAX_STREAM_ID).rev() {
            pool.push(id);
        }
        pool
    }

    /// Take a free stream id, or `None` when every id is in use.
    pub fn allocate(&mut self) -> Option<StreamId> {
        let id = self.free.pop()?;
        self.free_mask &= !bit(id);
        Some(id)
    }

    /// Return a stream id to the pool.
    ///
    /// Ids that are out of range or already free are ignored.
    pub fn release(&mut self, id: StreamId) {
        if !(0..=MAX_STREAM_ID).contains(&id) {
            tracing::warn!("Ignoring release of out-of-range stream {}", id);
            return;
        }
        if self.is_free(id) {
            tracing::warn!("Ignoring release of stream {} which is already free", id);
            return;
        }
        self.push(id);
    }

    pub fn is_free(&self, id: StreamId) -> bool {
        (0..=MAX_STREAM_ID).contains(&id) && self.free_mask & bit(id) != 0
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        CAPACITY
    }

    fn push(&mut self, id: StreamId) {
        self.free.push(id);
        self.free_mask |= bit(id);
    }
}

impl Default for StreamIdPool {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn bit(id: StreamId) -> u128 {
    1u128 << (id as u32)
}
