use crate::bgzf::BGZF_BLOCK_MAX_SIZE;
use crate::block::BlockCodec;
use crate::error::{Error, Result};
use crate::sink::OrderedSink;
use crossbeam::channel::{bounded, Receiver, Sender};
use libdeflater::CompressionLvl;
use std::io::{self, Write};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, trace};

struct Job {
    block_idx: u32,
    payload: Vec<u8>,
}

/// Fixed set of long-lived compressor workers.
///
/// Dispatch goes through a zero-capacity channel: `submit` completes only
/// when an idle worker takes the job, so a caller that outruns the pool is
/// suspended on the send. There is no queue to grow. Each worker owns its
/// deflate state and output buffer and reuses them across blocks; payload
/// buffers are recycled through a second bounded channel so steady-state
/// submission does not allocate.
pub struct DeflaterPool<W> {
    jobs: Option<Sender<Job>>,
    spare_rx: Receiver<Vec<u8>>,
    workers: Vec<JoinHandle<()>>,
    sink: Arc<OrderedSink<W>>,
    submitted: u32,
}

impl<W: Write + Send + 'static> DeflaterPool<W> {
    pub fn new(sink: Arc<OrderedSink<W>>, parallelism: usize, level: CompressionLvl) -> DeflaterPool<W> {
        let (jobs_tx, jobs_rx) = bounded::<Job>(0);
        let (spare_tx, spare_rx) = bounded::<Vec<u8>>(parallelism * 2);

        let workers = (0..parallelism)
            .map(|i| {
                let jobs = jobs_rx.clone();
                let sink = Arc::clone(&sink);
                let spare = spare_tx.clone();
                std::thread::Builder::new()
                    .name(format!("pbgzf-deflate-{i}"))
                    .spawn(move || worker_loop(jobs, sink, spare, level))
                    .expect("failed to spawn compressor worker")
            })
            .collect();
        debug!(parallelism, "deflater pool started");

        DeflaterPool {
            jobs: Some(jobs_tx),
            spare_rx,
            workers,
            sink,
            submitted: 0,
        }
    }

    /// Hand one uncompressed block to the next idle worker. The payload is
    /// copied before this returns, so the caller may reuse its buffer.
    /// Blocks while every worker is busy.
    pub fn submit(&mut self, block_idx: u32, payload: &[u8]) -> Result<()> {
        let jobs = match &self.jobs {
            Some(jobs) => jobs,
            None => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "deflater pool already closed",
                )))
            }
        };

        let mut buf = self.spare_rx.try_recv().unwrap_or_default();
        buf.clear();
        buf.extend_from_slice(payload);

        if jobs.send(Job { block_idx, payload: buf }).is_err() {
            // Every worker has exited; the cause is latched in the sink.
            return Err(self.sink.latched().unwrap_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "compressor workers exited unexpectedly",
                ))
            }));
        }
        self.submitted = block_idx + 1;
        Ok(())
    }

    /// Wait until every dispatched block has been handed to the sink and
    /// written out.
    pub fn flush(&self) -> Result<()> {
        self.sink.wait_until_placed(self.submitted)
    }

    /// Stop the workers and release them. Idempotent. Workers parked in the
    /// sink are woken by the latch if the stream failed; a partially written
    /// stream gets no terminator.
    pub fn close(&mut self) -> Result<()> {
        if let Some(jobs) = self.jobs.take() {
            drop(jobs);
            for handle in self.workers.drain(..) {
                if handle.join().is_err() {
                    eprintln!("pbgzf: compressor worker panicked during shutdown");
                }
            }
            debug!("deflater pool stopped");
        }
        Ok(())
    }
}

impl<W> Drop for DeflaterPool<W> {
    fn drop(&mut self) {
        if let Some(jobs) = self.jobs.take() {
            drop(jobs);
            for handle in self.workers.drain(..) {
                let _ = handle.join();
            }
        }
    }
}

fn worker_loop<W: Write + Send>(
    jobs: Receiver<Job>,
    sink: Arc<OrderedSink<W>>,
    spare: Sender<Vec<u8>>,
    level: CompressionLvl,
) {
    let mut codec = BlockCodec::new(level);
    let mut frame = Vec::with_capacity(BGZF_BLOCK_MAX_SIZE);

    while let Ok(Job { block_idx, payload }) = jobs.recv() {
        match codec.encode(&payload, &mut frame) {
            Ok(total) => {
                trace!(block_idx, total, "block compressed");
                let _ = spare.try_send(payload);
                if sink.emit(block_idx, &frame).is_err() {
                    // Latched in the sink; surfaces through flush or close.
                    break;
                }
            }
            Err(err) => {
                sink.fail(err);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bgzf::BGZF_HEADER_SIZE;
    use libdeflater::Decompressor;

    fn decode_stream(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut scratch = vec![0u8; BGZF_BLOCK_MAX_SIZE];
        let mut decompressor = Decompressor::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let bsize =
                u16::from_le_bytes([bytes[pos + 16], bytes[pos + 17]]) as usize + 1;
            let n = decompressor
                .gzip_decompress(&bytes[pos..pos + bsize], &mut scratch)
                .unwrap();
            out.extend_from_slice(&scratch[..n]);
            pos += bsize;
        }
        out
    }

    #[test]
    fn pool_preserves_submission_order() {
        let sink = Arc::new(OrderedSink::new(Vec::new()));
        let mut pool =
            DeflaterPool::new(Arc::clone(&sink), 4, CompressionLvl::new(5).unwrap());

        let blocks: Vec<Vec<u8>> = (0..16u8).map(|i| vec![i; 4000]).collect();
        for (idx, block) in blocks.iter().enumerate() {
            pool.submit(idx as u32, block).unwrap();
        }
        pool.flush().unwrap();
        pool.close().unwrap();

        let bytes = sink.take_output().unwrap();
        let expected: Vec<u8> = blocks.concat();
        assert_eq!(decode_stream(&bytes), expected);
        assert_eq!(sink.blocks_placed(), 16);
    }

    #[test]
    fn flush_waits_for_all_submitted_blocks() {
        let sink = Arc::new(OrderedSink::new(Vec::new()));
        let mut pool =
            DeflaterPool::new(Arc::clone(&sink), 2, CompressionLvl::new(1).unwrap());
        pool.submit(0, &[7u8; 1000]).unwrap();
        pool.submit(1, &[8u8; 1000]).unwrap();
        pool.flush().unwrap();
        assert_eq!(sink.blocks_placed(), 2);
        pool.close().unwrap();
    }

    #[test]
    fn close_is_idempotent() {
        let sink = Arc::new(OrderedSink::new(Vec::new()));
        let mut pool =
            DeflaterPool::new(Arc::clone(&sink), 2, CompressionLvl::new(5).unwrap());
        pool.submit(0, b"only block").unwrap();
        pool.flush().unwrap();
        pool.close().unwrap();
        pool.close().unwrap();
        assert!(pool.submit(1, b"late").is_err());
    }

    #[test]
    fn emitted_frames_start_with_headers() {
        let sink = Arc::new(OrderedSink::new(Vec::new()));
        let mut pool =
            DeflaterPool::new(Arc::clone(&sink), 1, CompressionLvl::new(5).unwrap());
        pool.submit(0, b"hello").unwrap();
        pool.flush().unwrap();
        pool.close().unwrap();
        let bytes = sink.take_output().unwrap();
        assert!(bytes.len() > BGZF_HEADER_SIZE);
        assert!(crate::bgzf::is_bgzf_header(&bytes));
    }
}
