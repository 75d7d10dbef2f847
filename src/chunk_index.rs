use crate::error::{Error, Result};
use crate::indexer::{Chunk, ChunkedRecord, IndexDelegate};
use crate::pointer::VirtualPointer;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Chunk-level index over a BGZF stream.
///
/// Collects the resolved chunks of every record forwarded by the deferred
/// indexer. By the time a chunk arrives here its endpoints are real byte
/// offsets into the compressed stream, so the index can be persisted and
/// used to seek without any further translation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkIndex {
    chunks: Vec<Chunk>,
    total_records: u64,
    finished: bool,
}

impl ChunkIndex {
    pub fn new() -> ChunkIndex {
        ChunkIndex::default()
    }

    /// Record one resolved record's chunks (used during index building)
    pub fn add_record(&mut self, chunks: &[Chunk]) {
        self.chunks.extend_from_slice(chunks);
        self.total_records += 1;
    }

    /// Total number of records indexed
    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Chunks overlapping the given virtual pointer range.
    pub fn overlapping(&self, start: VirtualPointer, end: VirtualPointer) -> Vec<Chunk> {
        self.chunks
            .iter()
            .filter(|c| c.start < end && start < c.end)
            .copied()
            .collect()
    }

    /// Save index to file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, self).map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("failed to serialize index: {e}"),
            ))
        })?;
        Ok(())
    }

    /// Load index from file
    pub fn from_file(path: &Path) -> Result<ChunkIndex> {
        let file = File::open(path)?;
        bincode::deserialize_from(file).map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("failed to deserialize index: {e}"),
            ))
        })
    }
}

impl<R: ChunkedRecord> IndexDelegate<R> for ChunkIndex {
    fn process_alignment(&mut self, record: R) -> Result<()> {
        self.add_record(record.chunks());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(start: u64, end: u64) -> Chunk {
        Chunk::new(
            VirtualPointer::new(start, 0).unwrap(),
            VirtualPointer::new(end, 0).unwrap(),
        )
    }

    #[test]
    fn counts_records_and_chunks() {
        let mut index = ChunkIndex::new();
        index.add_record(&[chunk(100, 200)]);
        index.add_record(&[chunk(200, 300), chunk(300, 400)]);
        assert_eq!(index.total_records(), 2);
        assert_eq!(index.chunks().len(), 3);
        assert!(!index.is_finished());
    }

    #[test]
    fn overlap_query() {
        let mut index = ChunkIndex::new();
        index.add_record(&[chunk(100, 200)]);
        index.add_record(&[chunk(200, 300)]);
        index.add_record(&[chunk(500, 700)]);

        let hits = index.overlapping(
            VirtualPointer::new(150, 0).unwrap(),
            VirtualPointer::new(250, 0).unwrap(),
        );
        assert_eq!(hits.len(), 2);

        let hits = index.overlapping(
            VirtualPointer::new(300, 0).unwrap(),
            VirtualPointer::new(500, 0).unwrap(),
        );
        assert!(hits.is_empty());
    }

    #[test]
    fn survives_a_save_load_cycle() {
        let mut index = ChunkIndex::new();
        index.add_record(&[chunk(42, 4242)]);
        index.finished = true;

        let file = tempfile::NamedTempFile::new().unwrap();
        index.save_to_file(file.path()).unwrap();
        let loaded = ChunkIndex::from_file(file.path()).unwrap();
        assert_eq!(loaded.total_records(), 1);
        assert_eq!(loaded.chunks(), index.chunks());
        assert!(loaded.is_finished());
    }
}
