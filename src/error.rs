use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Deflate layer failed outright; fatal to the stream
    #[error("deflate failed on a {len} byte block: {reason}")]
    Deflate { len: usize, reason: String },

    #[error("compressed block does not fit the BGZF frame even when stored ({uncompressed} bytes in)")]
    BlockOverflow { uncompressed: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("BGZF terminator block missing at end of {}", path.display())]
    MissingTerminator { path: PathBuf },

    #[error("virtual pointer fields out of range: block_address={block_address}, intra_offset={intra_offset}")]
    InvalidPointerFields {
        block_address: u64,
        intra_offset: u16,
    },

    #[error("an indexer can only be attached before the first byte is written")]
    IndexerMismatch,

    #[error("{0} records still unresolved at finish; close the writer before finishing the index")]
    UnresolvedRecords(usize),

    #[error("invalid compression level {0} (expected 0..=9)")]
    InvalidCompressionLevel(u32),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Re-raisable copy of a latched failure. The sink stores the first
    /// error and every later flush/close/submit re-raises the same kind;
    /// `io::Error` is not `Clone`, so the copy carries kind + message.
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::Deflate { len, reason } => Error::Deflate {
                len: *len,
                reason: reason.clone(),
            },
            Error::BlockOverflow { uncompressed } => Error::BlockOverflow {
                uncompressed: *uncompressed,
            },
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            Error::MissingTerminator { path } => Error::MissingTerminator { path: path.clone() },
            Error::InvalidPointerFields {
                block_address,
                intra_offset,
            } => Error::InvalidPointerFields {
                block_address: *block_address,
                intra_offset: *intra_offset,
            },
            Error::IndexerMismatch => Error::IndexerMismatch,
            Error::UnresolvedRecords(n) => Error::UnresolvedRecords(*n),
            Error::InvalidCompressionLevel(l) => Error::InvalidCompressionLevel(*l),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Io(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}
