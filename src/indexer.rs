use crate::error::{Error, Result};
use crate::pointer::VirtualPointer;
use crate::sink::BlockListener;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use tracing::trace;

/// Half-open range of virtual pointers locating a record in the stream.
///
/// Both endpoints start out in preliminary form (address field = logical
/// block index) and are rewritten in place, each exactly once, when the
/// block they reference lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub start: VirtualPointer,
    pub end: VirtualPointer,
}

impl Chunk {
    pub fn new(start: VirtualPointer, end: VirtualPointer) -> Chunk {
        Chunk { start, end }
    }
}

/// The one thing the indexer needs from an otherwise opaque alignment
/// record: the chunks locating it in the stream.
pub trait ChunkedRecord: Send {
    fn chunks(&self) -> &[Chunk];
    fn chunks_mut(&mut self) -> &mut [Chunk];
}

/// Minimal owned record: just its chunks. Enough for building a chunk-level
/// index, and the record type the tests drive the indexer with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSpan {
    chunks: Vec<Chunk>,
}

impl RecordSpan {
    pub fn new(chunk: Chunk) -> RecordSpan {
        RecordSpan {
            chunks: vec![chunk],
        }
    }

    pub fn with_chunks(chunks: Vec<Chunk>) -> RecordSpan {
        RecordSpan { chunks }
    }
}

impl ChunkedRecord for RecordSpan {
    fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    fn chunks_mut(&mut self) -> &mut [Chunk] {
        &mut self.chunks
    }
}

/// Downstream consumer of records whose chunks are final byte offsets.
pub trait IndexDelegate<R>: Send {
    fn process_alignment(&mut self, record: R) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

struct Pending<R> {
    queue: VecDeque<R>,
    // Records popped for forwarding but not yet handed to the delegate;
    // finish must not complete while any are outstanding.
    in_flight: usize,
}

/// Buffers alignment records whose chunk pointers still hold logical block
/// indices, and resolves them to real compressed offsets as the sink places
/// blocks.
///
/// Records drain from the head only: producer order means a record can never
/// resolve before one accepted ahead of it, so the first unresolvable record
/// stops the pass. Resolved records are forwarded to the delegate in
/// acceptance order.
pub struct DeferredIndexer<R, D> {
    pending: Mutex<Pending<R>>,
    drained: Condvar,
    delegate: Mutex<D>,
}

/// How long `finish` waits without any forwarding progress before deciding
/// the writer was never closed and the queue cannot drain.
const FINISH_STALL: Duration = Duration::from_millis(500);

impl<R: ChunkedRecord, D: IndexDelegate<R>> DeferredIndexer<R, D> {
    pub fn new(delegate: D) -> DeferredIndexer<R, D> {
        DeferredIndexer {
            pending: Mutex::new(Pending {
                queue: VecDeque::new(),
                in_flight: 0,
            }),
            drained: Condvar::new(),
            delegate: Mutex::new(delegate),
        }
    }

    /// Accept a record whose chunk pointers are still preliminary. The
    /// record is held until every endpoint is resolved.
    ///
    /// Must happen before any block the record references is placed. The
    /// writer's single-thread protocol gives this for free: mint the
    /// pointers, register the record, then write its bytes, so the blocks
    /// it references cannot have been submitted yet.
    pub fn process_alignment(&self, record: R) {
        self.pending.lock().unwrap().queue.push_back(record);
    }

    /// Number of records still waiting for their blocks to be placed.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().queue.len()
    }

    /// Block `block_idx` has landed at byte offset `block_address`: rewrite
    /// every buffered pointer that references it, and forward the records
    /// that became fully resolved.
    ///
    /// Called by the sink under its monitor, so passes arrive strictly in
    /// block order; the indexer lock is always taken after the sink's.
    pub fn rewrite_block(&self, block_idx: u32, block_address: u64) -> Result<()> {
        let mut batch = Vec::new();
        {
            let mut pending = self.pending.lock().unwrap();
            while let Some(head) = pending.queue.front_mut() {
                if !resolve_record(head, block_idx, block_address)? {
                    break;
                }
                let record = pending.queue.pop_front().unwrap();
                batch.push(record);
            }
            pending.in_flight += batch.len();
        }

        if !batch.is_empty() {
            trace!(
                block_idx,
                block_address,
                forwarded = batch.len(),
                "records resolved"
            );
            let forwarded = batch.len();
            let result: Result<()> = {
                let mut delegate = self.delegate.lock().unwrap();
                batch
                    .into_iter()
                    .try_for_each(|record| delegate.process_alignment(record))
            };
            self.pending.lock().unwrap().in_flight -= forwarded;
            self.drained.notify_all();
            result?;
        }
        Ok(())
    }

    /// Wait for the queue to drain, then finish the delegate.
    ///
    /// Must be called after the writer is closed; by then every block has
    /// been placed and the queue is already empty. If records remain and no
    /// forwarding progress happens, the wait gives up instead of hanging.
    pub fn finish(&self) -> Result<()> {
        let mut pending = self.pending.lock().unwrap();
        loop {
            if pending.queue.is_empty() && pending.in_flight == 0 {
                break;
            }
            let before = (pending.queue.len(), pending.in_flight);
            let (next, timeout) = self.drained.wait_timeout(pending, FINISH_STALL).unwrap();
            pending = next;
            if timeout.timed_out() && (pending.queue.len(), pending.in_flight) == before {
                return Err(Error::UnresolvedRecords(pending.queue.len()));
            }
        }
        drop(pending);
        self.delegate.lock().unwrap().finish()
    }

    /// Run a closure against the delegate; lets callers inspect or extract
    /// index state after finishing.
    pub fn with_delegate<T>(&self, f: impl FnOnce(&mut D) -> T) -> T {
        f(&mut *self.delegate.lock().unwrap())
    }

    /// Consume the indexer and hand back the delegate.
    pub fn into_delegate(self) -> D {
        self.delegate.into_inner().unwrap()
    }
}

impl<R: ChunkedRecord, D: IndexDelegate<R>> BlockListener for DeferredIndexer<R, D> {
    fn block_placed(&self, block_idx: u32, block_address: u64) -> Result<()> {
        self.rewrite_block(block_idx, block_address)
    }
}

/// Rewrite the endpoints of one record that reference `block_idx`. Returns
/// true when the record has no unresolved endpoint left and can be handed to
/// the delegate.
fn resolve_record<R: ChunkedRecord>(
    record: &mut R,
    block_idx: u32,
    block_address: u64,
) -> Result<bool> {
    let chunks = record.chunks_mut();
    let (first_start, first_end) = match chunks.first() {
        Some(c) => (c.start, c.end),
        None => return Ok(true),
    };
    let idx = u64::from(block_idx);

    // Not addressed by this block yet; FIFO order means no later record in
    // the queue can be either.
    if first_start.block_address() > idx && first_end.block_address() > idx {
        return Ok(false);
    }

    for chunk in chunks.iter_mut() {
        if chunk.start.block_address() == idx {
            chunk.start = VirtualPointer::new(block_address, chunk.start.intra_offset())?;
        }
        if chunk.end.block_address() == idx {
            chunk.end = VirtualPointer::new(block_address, chunk.end.intra_offset())?;
        } else if !chunk.end.is_zero() {
            // The chunk crosses into a block that has not been placed yet.
            // The zero exemption keeps start-of-stream pointers (block 0 at
            // address 0) from counting as unresolved.
            return Ok(false);
        }
    }
    Ok(true)
}
