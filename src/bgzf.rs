use crate::error::{Error, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// BGZF block format constants
pub const BGZF_HEADER_SIZE: usize = 18;
pub const BGZF_FOOTER_SIZE: usize = 8;
pub const BGZF_BLOCK_MAX_SIZE: usize = 65536;

/// Uncompressed payload cap per block. Sized so that even a stored (level 0)
/// deflate of a full block stays inside the 64 KiB frame.
pub const DEFAULT_UNCOMPRESSED_BLOCK_SIZE: usize = 65280;

/// BGZF EOF terminator (28 bytes): an empty deflate payload in standard
/// framing. A conforming writer appends it on close; a conforming reader
/// expects it as the last block of a well-formed file.
pub const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, // gzip magic, method, flags (FEXTRA)
    0x00, 0x00, 0x00, 0x00, // mtime
    0x00, 0xff, // xfl, os
    0x06, 0x00, // xlen = 6
    0x42, 0x43, // subfield ID "BC"
    0x02, 0x00, // subfield length = 2
    0x1b, 0x00, // BSIZE = 27 (28 - 1)
    0x03, 0x00, // empty deflate block
    0x00, 0x00, 0x00, 0x00, // CRC32 = 0
    0x00, 0x00, 0x00, 0x00, // ISIZE = 0
];

/// Check if the header is a valid GZIP header
pub fn is_bgzf_header(header: &[u8]) -> bool {
    header[0..2] == [0x1f, 0x8b]
}

/// Verify that a closed BGZF file ends with the EOF terminator.
///
/// Reopens the file and compares the trailing 28 bytes. Only meaningful for
/// regular files; pipes and sockets cannot be reopened and are the caller's
/// responsibility to skip.
pub fn check_termination<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len < BGZF_EOF.len() as u64 {
        return Err(Error::MissingTerminator {
            path: path.to_path_buf(),
        });
    }
    file.seek(SeekFrom::End(-(BGZF_EOF.len() as i64)))?;
    let mut tail = [0u8; 28];
    file.read_exact(&mut tail)?;
    if tail != BGZF_EOF {
        return Err(Error::MissingTerminator {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}
