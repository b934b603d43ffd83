//! Dedicated writer task for the socket write half.
//!
//! The connection task never writes to the socket itself. It queues encoded
//! frames here, so a slow peer cannot stall response decoding. Frames that
//! pile up while a write is in flight go out together in one vectored write.
//!
//! ```text
//! connection task ─► WriterHandle::send ─► mpsc ─► writer task ─► write half
//! ```
//!
//! Every queued frame holds a semaphore permit until it has been written.
//! Callers reserve permits through [`WriteSlots`] and wait there, up to the
//! backpressure timeout, when all of them are taken.

use std::collections::VecDeque;
use std::io::IoSlice;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;

use crate::error::{DriverError, Result};

pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on frames coalesced into one write.
const MAX_BATCH_FRAMES: usize = 64;

/// Queue and flow-control settings of the writer task.
#[derive(Debug, Clone, PartialEq)]
pub struct WriterConfig {
    /// Frames accepted but not yet written before `send` starts waiting.
    pub max_pending_frames: usize,
    /// Raised to `max_pending_frames` if smaller.
    pub channel_capacity: usize,
    /// How long a slot reservation waits for room before failing.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Frame on its way to the socket. The permit is returned when it drops.
struct QueuedFrame {
    bytes: Bytes,
    _permit: OwnedSemaphorePermit,
}

/// Room for one frame in the writer queue, held until that frame is written.
#[derive(Debug)]
pub struct WritePermit(OwnedSemaphorePermit);

/// Free slots of a writer queue.
///
/// Callers reserve a slot here before handing a request to the connection
/// task, so waiting for room never blocks that task.
#[derive(Debug, Clone)]
pub struct WriteSlots {
    slots: Arc<Semaphore>,
    backpressure_timeout: Duration,
}

impl WriteSlots {
    /// Reserve a slot, waiting up to the backpressure timeout.
    ///
    /// # Errors
    ///
    /// [`DriverError::BackpressureTimeout`] if no slot frees up in time,
    /// [`DriverError::ConnectionClosed`] once the slots are closed.
    pub async fn acquire(&self) -> Result<WritePermit> {
        if let Some(permit) = self.try_acquire()? {
            return Ok(permit);
        }

        let acquire = self.slots.clone().acquire_owned();
        match tokio::time::timeout(self.backpressure_timeout, acquire).await {
            Ok(Ok(permit)) => Ok(WritePermit(permit)),
            Ok(Err(_)) => Err(DriverError::ConnectionClosed),
            Err(_) => Err(DriverError::BackpressureTimeout),
        }
    }

    /// Reserve a slot if one is free right now.
    pub fn try_acquire(&self) -> Result<Option<WritePermit>> {
        match self.slots.clone().try_acquire_owned() {
            Ok(permit) => Ok(Some(WritePermit(permit))),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(DriverError::ConnectionClosed),
        }
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Fail current and future waiters with `ConnectionClosed`.
    pub fn close(&self) {
        self.slots.close();
    }
}

/// Sending side of the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<QueuedFrame>,
    slots: WriteSlots,
    max_pending: usize,
}

impl WriterHandle {
    /// Queue one encoded frame, waiting for a free slot if needed.
    pub async fn send(&self, bytes: Bytes) -> Result<()> {
        let permit = self.slots.acquire().await?;
        self.send_reserved(permit, bytes)
    }

    /// Queue one frame only if a slot is free right now.
    ///
    /// # Errors
    ///
    /// [`DriverError::BackpressureTimeout`] when the queue is full.
    pub fn try_send(&self, bytes: Bytes) -> Result<()> {
        match self.slots.try_acquire()? {
            Some(permit) => self.send_reserved(permit, bytes),
            None => Err(DriverError::BackpressureTimeout),
        }
    }

    /// Queue one frame into a slot reserved through [`WriteSlots`].
    ///
    /// Never waits: the channel has room for every outstanding permit.
    pub fn send_reserved(&self, permit: WritePermit, bytes: Bytes) -> Result<()> {
        self.tx
            .try_send(QueuedFrame {
                bytes,
                _permit: permit.0,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => DriverError::BackpressureTimeout,
                TrySendError::Closed(_) => DriverError::ConnectionClosed,
            })
    }

    /// Slots shared with callers that reserve ahead of submitting.
    pub fn slots(&self) -> WriteSlots {
        self.slots.clone()
    }

    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.slots.available() == 0
    }

    /// Frames accepted but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.max_pending - self.slots.available()
    }
}

/// Spawn the writer task over `writer`.
///
/// The task finishes with `Ok(())` after every handle is dropped (shutting
/// the write half down first), or with the first write error.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    // Queued frames never outnumber permits, so `try_send` cannot see a
    // full channel.
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(config.max_pending_frames));
    let handle = WriterHandle {
        tx,
        slots: WriteSlots {
            slots: Arc::new(Semaphore::new(config.max_pending_frames)),
            backpressure_timeout: config.backpressure_timeout,
        },
        max_pending: config.max_pending_frames,
    };

    (handle, tokio::spawn(run_writer(rx, writer)))
}

async fn run_writer<W>(mut rx: mpsc::Receiver<QueuedFrame>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_FRAMES);

    loop {
        if rx.recv_many(&mut batch, MAX_BATCH_FRAMES).await == 0 {
            let _ = writer.shutdown().await;
            return Ok(());
        }

        let chunks = batch.iter().map(|frame| frame.bytes.clone()).collect();
        write_all_vectored(&mut writer, chunks).await?;

        // Dropping the frames hands their permits back.
        batch.clear();
    }
}

/// Write every chunk, resuming mid-chunk after short writes.
async fn write_all_vectored<W>(writer: &mut W, mut chunks: VecDeque<Bytes>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while !chunks.is_empty() {
        let slices: Vec<IoSlice<'_>> = chunks.iter().map(|c| IoSlice::new(c)).collect();
        let mut written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
        }

        while written > 0 {
            let Some(front) = chunks.front_mut() else {
                break;
            };
            if written >= front.len() {
                written -= front.len();
                chunks.pop_front();
            } else {
                front.advance(written);
                written = 0;
            }
        }
    }

    writer.flush().await?;
    Ok(())
}
