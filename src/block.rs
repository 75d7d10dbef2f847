use crate::bgzf::{BGZF_BLOCK_MAX_SIZE, BGZF_FOOTER_SIZE, BGZF_HEADER_SIZE};
use crate::error::{Error, Result};
use libdeflater::{CompressionError, CompressionLvl, Compressor, Crc};

/// Deflate payload bytes that fit in one framed block.
pub const MAX_DEFLATE_PAYLOAD: usize = BGZF_BLOCK_MAX_SIZE - BGZF_HEADER_SIZE - BGZF_FOOTER_SIZE;

/// Deflates one uncompressed block into a complete BGZF frame.
///
/// Each compressor worker owns its codec; deflate contexts are never shared
/// across threads. The second, level-0 compressor covers the rare case where
/// deflation expands the input past the frame cap: a stored rendition grows
/// the input by a bounded few bytes and always fits, since the uncompressed
/// block size is capped below the frame size by more than that margin.
pub struct BlockCodec {
    deflater: Compressor,
    stored_deflater: Compressor,
    payload: Vec<u8>,
}

impl BlockCodec {
    pub fn new(level: CompressionLvl) -> BlockCodec {
        let stored = CompressionLvl::new(0).expect("level 0 is always valid");
        BlockCodec {
            deflater: Compressor::new(level),
            stored_deflater: Compressor::new(stored),
            payload: vec![0u8; MAX_DEFLATE_PAYLOAD],
        }
    }

    /// Compress `uncompressed` and frame it as a BGZF block in `frame`
    /// (cleared first). Returns the total framed length.
    pub fn encode(&mut self, uncompressed: &[u8], frame: &mut Vec<u8>) -> Result<usize> {
        let compressed_size = match self.deflater.deflate_compress(uncompressed, &mut self.payload)
        {
            Ok(size) => size,
            Err(CompressionError::InsufficientSpace) => {
                // Deflation expanded the input; store it instead.
                match self
                    .stored_deflater
                    .deflate_compress(uncompressed, &mut self.payload)
                {
                    Ok(size) => size,
                    Err(CompressionError::InsufficientSpace) => {
                        return Err(Error::BlockOverflow {
                            uncompressed: uncompressed.len(),
                        })
                    }
                }
            }
        };

        let mut crc = Crc::new();
        crc.update(uncompressed);

        let total = BGZF_HEADER_SIZE + compressed_size + BGZF_FOOTER_SIZE;
        frame.clear();
        frame.reserve(total);
        write_header(frame, total);
        frame.extend_from_slice(&self.payload[..compressed_size]);
        frame.extend_from_slice(&crc.sum().to_le_bytes());
        frame.extend_from_slice(&(uncompressed.len() as u32).to_le_bytes());
        Ok(total)
    }
}

fn write_header(frame: &mut Vec<u8>, total_block_size: usize) {
    let bsize = (total_block_size - 1) as u16;
    frame.extend_from_slice(&[
        0x1f, 0x8b, // gzip magic
        0x08, // compression method (DEFLATE)
        0x04, // flags (FEXTRA)
        0x00, 0x00, 0x00, 0x00, // mtime
        0x00, // extra flags
        0xff, // OS (unknown)
        0x06, 0x00, // xlen = 6
        0x42, 0x43, // subfield ID "BC"
        0x02, 0x00, // subfield length = 2
    ]);
    frame.extend_from_slice(&bsize.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bgzf::{is_bgzf_header, DEFAULT_UNCOMPRESSED_BLOCK_SIZE};
    use libdeflater::Decompressor;

    fn roundtrip(level: i32, data: &[u8]) -> Vec<u8> {
        let mut codec = BlockCodec::new(CompressionLvl::new(level).unwrap());
        let mut frame = Vec::new();
        let total = codec.encode(data, &mut frame).unwrap();
        assert_eq!(total, frame.len());
        assert!(total <= BGZF_BLOCK_MAX_SIZE);

        let mut out = vec![0u8; BGZF_BLOCK_MAX_SIZE];
        let mut decompressor = Decompressor::new();
        let n = decompressor.gzip_decompress(&frame, &mut out).unwrap();
        out.truncate(n);
        out
    }

    #[test]
    fn frame_roundtrips() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(100);
        assert_eq!(roundtrip(5, &data), data);
    }

    #[test]
    fn stored_level_roundtrips() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 31 % 251) as u8).collect();
        assert_eq!(roundtrip(0, &data), data);
    }

    #[test]
    fn full_block_of_noise_fits_the_frame() {
        // Pseudo-random payload at the block size cap must still frame
        let mut state = 0x2545f4914f6cdd1du64;
        let data: Vec<u8> = (0..DEFAULT_UNCOMPRESSED_BLOCK_SIZE)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state & 0xff) as u8
            })
            .collect();
        assert_eq!(roundtrip(1, &data), data);
    }

    #[test]
    fn header_fields() {
        let mut codec = BlockCodec::new(CompressionLvl::new(5).unwrap());
        let mut frame = Vec::new();
        codec.encode(b"abc", &mut frame).unwrap();

        assert!(is_bgzf_header(&frame));
        assert_eq!(frame[2], 0x08); // deflate
        assert_eq!(frame[3], 0x04); // FEXTRA
        assert_eq!(&frame[12..14], b"BC");
        let bsize = u16::from_le_bytes([frame[16], frame[17]]) as usize;
        assert_eq!(bsize + 1, frame.len());
        // footer: ISIZE is the uncompressed length
        let isize_field = u32::from_le_bytes(frame[frame.len() - 4..].try_into().unwrap());
        assert_eq!(isize_field, 3);
    }

    #[test]
    fn crc_reference_vector() {
        let mut codec = BlockCodec::new(CompressionLvl::new(5).unwrap());
        let mut frame = Vec::new();
        codec.encode(b"123456789", &mut frame).unwrap();
        let crc = u32::from_le_bytes(frame[frame.len() - 8..frame.len() - 4].try_into().unwrap());
        assert_eq!(crc, 0xcbf43926);
    }
}
