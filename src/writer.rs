use crate::bgzf::{check_termination, BGZF_EOF, DEFAULT_UNCOMPRESSED_BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::pointer::VirtualPointer;
use crate::pool::DeflaterPool;
use crate::sink::{BlockListener, OrderedSink};
use libdeflater::CompressionLvl;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_COMPRESSION_LEVEL: u32 = 5;
pub const MAX_PARALLELISM: usize = 256;

/// Configuration for a [`ParallelBgzfWriter`].
pub struct BgzfWriterBuilder {
    compression_level: u32,
    parallelism: usize,
    write_terminator: bool,
}

impl BgzfWriterBuilder {
    pub fn new() -> BgzfWriterBuilder {
        BgzfWriterBuilder {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            parallelism: rayon::current_num_threads(),
            write_terminator: true,
        }
    }

    /// Deflate level, 0 (stored) through 9.
    pub fn compression_level(mut self, level: u32) -> BgzfWriterBuilder {
        self.compression_level = level;
        self
    }

    /// Number of compressor workers; clamped to [1, 256]. Defaults to the
    /// hardware thread count.
    pub fn parallelism(mut self, parallelism: usize) -> BgzfWriterBuilder {
        self.parallelism = parallelism;
        self
    }

    /// Whether close appends the 28-byte EOF terminator. On by default.
    pub fn write_terminator(mut self, write_terminator: bool) -> BgzfWriterBuilder {
        self.write_terminator = write_terminator;
        self
    }

    /// Create the output file and a writer compressing into it.
    pub fn create<P: AsRef<Path>>(
        self,
        path: P,
    ) -> Result<ParallelBgzfWriter<BufWriter<File>>> {
        let path = path.as_ref().to_path_buf();
        let file = BufWriter::new(File::create(&path)?);
        self.build(file, Some(path))
    }

    /// Wrap an arbitrary byte sink. The post-close termination check is
    /// skipped, since the sink cannot be reopened.
    pub fn from_writer<W: Write + Send + 'static>(self, out: W) -> Result<ParallelBgzfWriter<W>> {
        self.build(out, None)
    }

    fn build<W: Write + Send + 'static>(
        self,
        out: W,
        path: Option<PathBuf>,
    ) -> Result<ParallelBgzfWriter<W>> {
        if self.compression_level > 9 {
            return Err(Error::InvalidCompressionLevel(self.compression_level));
        }
        let level = CompressionLvl::new(self.compression_level as i32)
            .map_err(|_| Error::InvalidCompressionLevel(self.compression_level))?;
        let parallelism = self.parallelism.clamp(1, MAX_PARALLELISM);

        let sink = Arc::new(OrderedSink::new(out));
        let pool = DeflaterPool::new(Arc::clone(&sink), parallelism, level);
        debug!(
            level = self.compression_level,
            parallelism, "parallel BGZF writer opened"
        );
        Ok(ParallelBgzfWriter {
            sink,
            pool,
            buffer: Vec::with_capacity(DEFAULT_UNCOMPRESSED_BLOCK_SIZE),
            next_block_idx: 0,
            path,
            write_terminator: self.write_terminator,
            closed: false,
        })
    }
}

impl Default for BgzfWriterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// BGZF writer that compresses blocks on a worker pool.
///
/// The caller treats it as a byte stream; under the covers a block is handed
/// to the pool whenever 65 280 uncompressed bytes have accumulated, and the
/// compressed blocks reach the output in producer order. `close` must be
/// called to flush the last block and append the EOF terminator; an unclosed
/// stream is defective.
///
/// The writer is driven by a single thread. `file_pointer` values minted
/// before close carry the *logical block index* in their address field; an
/// attached indexer rewrites them to byte offsets as blocks land.
pub struct ParallelBgzfWriter<W: Write + Send + 'static> {
    sink: Arc<OrderedSink<W>>,
    pool: DeflaterPool<W>,
    buffer: Vec<u8>,
    next_block_idx: u32,
    path: Option<PathBuf>,
    write_terminator: bool,
    closed: bool,
}

impl<W: Write + Send + 'static> ParallelBgzfWriter<W> {
    /// Attach the listener that resolves preliminary pointers. Must happen
    /// before the first byte is written; a listener attached later would
    /// miss placements and strand its records.
    pub fn set_indexer(&mut self, indexer: Arc<dyn BlockListener>) -> Result<()> {
        if self.closed || self.next_block_idx > 0 || !self.buffer.is_empty() {
            return Err(Error::IndexerMismatch);
        }
        self.sink.set_listener(indexer);
        Ok(())
    }

    /// Preliminary virtual pointer for the next byte to be written: logical
    /// block index in the address field, current fill as the intra offset.
    pub fn file_pointer(&self) -> Result<VirtualPointer> {
        VirtualPointer::new(u64::from(self.next_block_idx), self.buffer.len() as u16)
    }

    pub fn write_bytes(&mut self, mut bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(self.sink.latched().unwrap_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "writer already closed",
                ))
            }));
        }
        while !bytes.is_empty() {
            let room = DEFAULT_UNCOMPRESSED_BLOCK_SIZE - self.buffer.len();
            let take = room.min(bytes.len());
            self.buffer.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if self.buffer.len() == DEFAULT_UNCOMPRESSED_BLOCK_SIZE {
                self.emit_current_block()?;
            }
        }
        Ok(())
    }

    fn emit_current_block(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        // Blocks while every worker is busy; the pool copies the payload
        // before returning, so the buffer is immediately reusable.
        self.pool.submit(self.next_block_idx, &self.buffer)?;
        self.next_block_idx += 1;
        self.buffer.clear();
        Ok(())
    }

    /// Force the current block out even if partial, then wait until every
    /// submitted block has been compressed and written.
    pub fn flush_blocks(&mut self) -> Result<()> {
        self.emit_current_block()?;
        self.pool.flush()?;
        self.sink.flush_output()
    }

    /// Flush, stop the workers, append the EOF terminator, and verify it for
    /// regular files. Idempotent after success; after a failure the original
    /// error is re-raised.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return match self.sink.latched() {
                Some(err) => Err(err),
                None => Ok(()),
            };
        }
        self.closed = true;

        let flushed = self.flush_blocks();
        let pool_closed = self.pool.close();
        flushed?;
        pool_closed?;

        if self.write_terminator {
            self.sink.write_raw(&BGZF_EOF)?;
        }
        self.sink.flush_output()?;

        if self.write_terminator {
            if let Some(path) = &self.path {
                if path.is_file() {
                    if let Err(err) = check_termination(path) {
                        // Latch so a repeated close re-raises the same kind
                        self.sink.fail(err.duplicate());
                        return Err(err);
                    }
                }
            }
        }
        debug!(blocks = self.next_block_idx, "parallel BGZF writer closed");
        Ok(())
    }

    /// Close if necessary and hand back the underlying byte sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.close()?;
        self.sink.take_output().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "output stream already taken",
            ))
        })
    }

    /// Blocks placed on the output so far.
    pub fn blocks_written(&self) -> u32 {
        self.sink.blocks_placed()
    }
}

impl<W: Write + Send + 'static> Write for ParallelBgzfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_blocks()?;
        Ok(())
    }
}

impl<W: Write + Send + 'static> Drop for ParallelBgzfWriter<W> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    fn writer_to_vec(builder: BgzfWriterBuilder) -> ParallelBgzfWriter<Vec<u8>> {
        builder.from_writer(Vec::new()).unwrap()
    }

    fn decode(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        MultiGzDecoder::new(bytes).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn rejects_out_of_range_level() {
        assert!(matches!(
            BgzfWriterBuilder::new()
                .compression_level(10)
                .from_writer(Vec::new()),
            Err(Error::InvalidCompressionLevel(10))
        ));
    }

    #[test]
    fn file_pointer_is_preliminary() {
        let mut writer = writer_to_vec(BgzfWriterBuilder::new().parallelism(2));
        writer.write_bytes(&[0u8; 1456]).unwrap();
        let vp = writer.file_pointer().unwrap();
        assert_eq!(vp.block_address(), 0);
        assert_eq!(vp.intra_offset(), 1456);

        // Fill the rest of block 0 and cross into block 1
        writer
            .write_bytes(&vec![1u8; DEFAULT_UNCOMPRESSED_BLOCK_SIZE - 1456 + 10])
            .unwrap();
        let vp = writer.file_pointer().unwrap();
        assert_eq!(vp.block_address(), 1);
        assert_eq!(vp.intra_offset(), 10);
        writer.close().unwrap();
    }

    #[test]
    fn empty_stream_is_just_the_terminator() {
        let writer = writer_to_vec(BgzfWriterBuilder::new().parallelism(1));
        let bytes = writer.into_inner().unwrap();
        assert_eq!(bytes, BGZF_EOF);
    }

    #[test]
    fn terminator_can_be_suppressed() {
        let writer = writer_to_vec(BgzfWriterBuilder::new().write_terminator(false));
        let bytes = writer.into_inner().unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn close_twice_is_a_no_op() {
        let mut writer = writer_to_vec(BgzfWriterBuilder::new());
        writer.write_bytes(b"some data").unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn indexer_must_attach_before_writing() {
        struct Nop;
        impl BlockListener for Nop {
            fn block_placed(&self, _: u32, _: u64) -> Result<()> {
                Ok(())
            }
        }
        let mut writer = writer_to_vec(BgzfWriterBuilder::new());
        writer.write_bytes(b"x").unwrap();
        assert!(matches!(
            writer.set_indexer(Arc::new(Nop)),
            Err(Error::IndexerMismatch)
        ));
        writer.close().unwrap();
    }

    #[test]
    fn multi_block_roundtrip() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut writer = writer_to_vec(BgzfWriterBuilder::new().parallelism(4));
        writer.write_bytes(&data).unwrap();
        let bytes = writer.into_inner().unwrap();
        assert_eq!(&bytes[bytes.len() - BGZF_EOF.len()..], &BGZF_EOF);
        assert_eq!(decode(&bytes), data);
    }

    #[test]
    fn partial_block_flush_keeps_bytes_in_order() {
        let mut writer = writer_to_vec(BgzfWriterBuilder::new().parallelism(2));
        writer.write_bytes(b"first ").unwrap();
        writer.flush_blocks().unwrap();
        writer.write_bytes(b"second").unwrap();
        let bytes = writer.into_inner().unwrap();
        assert_eq!(decode(&bytes), b"first second");
    }
}
