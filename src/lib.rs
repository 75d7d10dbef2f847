//! Parallel BGZF encoder with in-line index pointer resolution.
//!
//! BGZF is a concatenation of independent deflate blocks of at most 64 KiB;
//! positions inside the stream are 64-bit virtual pointers packing a 48-bit
//! compressed block address with a 16-bit offset into the block's
//! uncompressed payload. [`ParallelBgzfWriter`] fills fixed-size blocks and
//! fans them out to a pool of compressor workers; [`OrderedSink`] puts the
//! compressed blocks back on the output in producer order.
//!
//! Because compression is asynchronous, a pointer handed out for a byte that
//! has not been compressed yet can only carry the *logical index* of its
//! future block. [`DeferredIndexer`] buffers records built from such
//! pointers and rewrites them to real byte offsets the moment their block
//! lands, then forwards them to an index delegate in acceptance order.

pub mod bgzf;
mod block;
mod chunk_index;
mod error;
mod indexer;
mod pointer;
mod pool;
mod sink;
mod writer;

// Re-export main types for public API
pub use chunk_index::ChunkIndex;
pub use error::{Error, Result};
pub use indexer::{Chunk, ChunkedRecord, DeferredIndexer, IndexDelegate, RecordSpan};
pub use pointer::VirtualPointer;
pub use pool::DeflaterPool;
pub use sink::{BlockListener, OrderedSink};
pub use writer::{BgzfWriterBuilder, ParallelBgzfWriter, DEFAULT_COMPRESSION_LEVEL};
