use crate::error::{Error, Result};
use std::io::{self, Write};
use std::sync::{Arc, Condvar, Mutex};
use tracing::trace;

/// Observer notified, under the sink monitor, each time a block lands at its
/// final byte offset. Placements are observed strictly in block-index order.
pub trait BlockListener: Send + Sync {
    fn block_placed(&self, block_idx: u32, block_address: u64) -> Result<()>;
}

struct SinkState<W> {
    next_idx: u32,
    block_address: u64,
    failed: Option<Error>,
    out: Option<W>,
    listener: Option<Arc<dyn BlockListener>>,
}

/// Serialization point between the compressor workers and the output stream.
///
/// Workers hand in framed blocks tagged with their producer-order index; the
/// sink writes them strictly in ascending index order, parking early arrivals
/// on a condition variable. The first failure is latched and re-raised to
/// every later caller, so an error inside one worker surfaces through the
/// writer's flush or close.
pub struct OrderedSink<W> {
    state: Mutex<SinkState<W>>,
    placed: Condvar,
}

impl<W: Write + Send> OrderedSink<W> {
    pub fn new(out: W) -> OrderedSink<W> {
        OrderedSink {
            state: Mutex::new(SinkState {
                next_idx: 0,
                block_address: 0,
                failed: None,
                out: Some(out),
                listener: None,
            }),
            placed: Condvar::new(),
        }
    }

    pub fn set_listener(&self, listener: Arc<dyn BlockListener>) {
        self.state.lock().unwrap().listener = Some(listener);
    }

    /// Write a framed block to the output once every earlier block has been
    /// written. Blocks the calling worker until it is this block's turn.
    pub fn emit(&self, block_idx: u32, block: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        while block_idx != state.next_idx {
            if let Some(err) = &state.failed {
                return Err(err.duplicate());
            }
            state = self.placed.wait(state).unwrap();
        }
        if let Some(err) = &state.failed {
            return Err(err.duplicate());
        }

        let address = state.block_address;
        let mut result = match state.out.as_mut() {
            Some(out) => out.write_all(block).map_err(Error::from),
            None => Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "output stream already closed",
            ))),
        };
        if result.is_ok() {
            // The listener observes the placement in the same order blocks
            // hit the output; the monitor is still held.
            if let Some(listener) = state.listener.clone() {
                result = listener.block_placed(block_idx, address);
            }
        }

        match result {
            Ok(()) => {
                state.block_address = address + block.len() as u64;
                state.next_idx += 1;
                trace!(block_idx, address, len = block.len(), "block placed");
                drop(state);
                self.placed.notify_all();
                Ok(())
            }
            Err(err) => {
                let reraise = err.duplicate();
                state.failed = Some(err);
                drop(state);
                self.placed.notify_all();
                Err(reraise)
            }
        }
    }

    /// Latch a failure that happened outside the sink (a worker's codec
    /// error) so that flush and close re-raise it.
    pub fn fail(&self, err: Error) {
        let mut state = self.state.lock().unwrap();
        if state.failed.is_none() {
            state.failed = Some(err);
        }
        drop(state);
        self.placed.notify_all();
    }

    /// Wait until `count` blocks have been placed (or a failure is latched).
    pub fn wait_until_placed(&self, count: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        while state.next_idx < count {
            if let Some(err) = &state.failed {
                return Err(err.duplicate());
            }
            state = self.placed.wait(state).unwrap();
        }
        match &state.failed {
            Some(err) => Err(err.duplicate()),
            None => Ok(()),
        }
    }

    /// Append raw bytes (the EOF terminator) past the last placed block.
    pub fn write_raw(&self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = &state.failed {
            return Err(err.duplicate());
        }
        let result = match state.out.as_mut() {
            Some(out) => out.write_all(bytes).map_err(Error::from),
            None => Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "output stream already closed",
            ))),
        };
        match result {
            Ok(()) => {
                state.block_address += bytes.len() as u64;
                Ok(())
            }
            Err(err) => {
                let reraise = err.duplicate();
                state.failed = Some(err);
                Err(reraise)
            }
        }
    }

    pub fn flush_output(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = &state.failed {
            return Err(err.duplicate());
        }
        if let Some(out) = state.out.as_mut() {
            if let Err(err) = out.flush() {
                let err = Error::from(err);
                let reraise = err.duplicate();
                state.failed = Some(err);
                return Err(reraise);
            }
        }
        Ok(())
    }

    /// The latched failure, if any, for re-raising on a repeated close.
    pub fn latched(&self) -> Option<Error> {
        self.state.lock().unwrap().failed.as_ref().map(Error::duplicate)
    }

    /// Take the output stream back; used after the pool has shut down.
    pub fn take_output(&self) -> Option<W> {
        self.state.lock().unwrap().out.take()
    }

    /// Number of blocks placed so far.
    pub fn blocks_placed(&self) -> u32 {
        self.state.lock().unwrap().next_idx
    }

    /// Running byte offset of the compressed stream.
    pub fn compressed_offset(&self) -> u64 {
        self.state.lock().unwrap().block_address
    }
}
