//! Requests waiting for their response, keyed by stream id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;

use super::stream_pool::StreamId;
use crate::protocol::Response;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Correlation token of one call; unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
    pub fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// A request that has been written and awaits its response.
#[derive(Debug)]
pub struct PendingRequest {
    pub token: RequestToken,
    pub reply: oneshot::Sender<Response>,
}

/// Stream id to pending request map. Owned by the connection task only.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<StreamId, PendingRequest>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request on `stream`.
    ///
    /// # Panics
    ///
    /// If `stream` already has a pending request. The pool never hands out
    /// a stream twice, so this only fires on an internal bookkeeping bug.
    pub fn insert(&mut self, stream: StreamId, request: PendingRequest) {
        if let Some(previous) = self.entries.insert(stream, request) {
            panic!(
                "stream {} already has a pending request (token {})",
                stream,
                previous.token.get()
            );
        }
    }

    /// Remove the entry for a response that just arrived.
    pub fn complete(&mut self, stream: StreamId) -> Option<PendingRequest> {
        self.entries.remove(&stream)
    }

    /// Remove the entry for `stream` if it still belongs to `token`.
    ///
    /// Returns whether an entry was removed.
    pub fn release(&mut self, stream: StreamId, token: RequestToken) -> bool {
        match self.entries.get(&stream) {
            Some(entry) if entry.token == token => {
                self.entries.remove(&stream);
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
