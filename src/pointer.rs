use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Largest compressed byte offset a pointer can address (48 bits).
pub const MAX_BLOCK_ADDRESS: u64 = (1 << 48) - 1;

const ADDRESS_SHIFT: u32 = 16;
const OFFSET_MASK: u64 = 0xffff;

/// BGZF virtual file offset.
///
/// Upper 48 bits are the byte offset of a compressed block's first byte;
/// lower 16 bits are an offset into that block's uncompressed payload.
/// Equality and ordering are bitwise on the packed 64-bit value.
///
/// While a block is still waiting to be compressed and placed, the writer
/// mints *preliminary* pointers whose address field holds the logical block
/// index instead of a byte offset; the deferred indexer rewrites those once
/// the block lands.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct VirtualPointer(u64);

impl VirtualPointer {
    /// Start of the stream; also the form block zero's pointers keep after
    /// resolution, since logical index 0 and byte address 0 coincide.
    pub const ZERO: VirtualPointer = VirtualPointer(0);

    pub fn new(block_address: u64, intra_offset: u16) -> Result<VirtualPointer> {
        if block_address > MAX_BLOCK_ADDRESS {
            return Err(Error::InvalidPointerFields {
                block_address,
                intra_offset,
            });
        }
        Ok(VirtualPointer(
            (block_address << ADDRESS_SHIFT) | u64::from(intra_offset),
        ))
    }

    /// Byte offset of the enclosing block in the compressed stream (or the
    /// logical block index, for a preliminary pointer).
    pub fn block_address(self) -> u64 {
        self.0 >> ADDRESS_SHIFT
    }

    /// Offset into the uncompressed payload of the enclosing block.
    pub fn intra_offset(self) -> u16 {
        (self.0 & OFFSET_MASK) as u16
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(raw: u64) -> VirtualPointer {
        VirtualPointer(raw)
    }
}

impl std::fmt::Display for VirtualPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.block_address(), self.intra_offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack() {
        let vp = VirtualPointer::new(18900, 1456).unwrap();
        assert_eq!(vp.block_address(), 18900);
        assert_eq!(vp.intra_offset(), 1456);
        assert_eq!(vp.as_u64(), (18900 << 16) | 1456);
    }

    #[test]
    fn extremes() {
        let vp = VirtualPointer::new(MAX_BLOCK_ADDRESS, u16::MAX).unwrap();
        assert_eq!(vp.block_address(), MAX_BLOCK_ADDRESS);
        assert_eq!(vp.intra_offset(), u16::MAX);
        assert!(VirtualPointer::ZERO.is_zero());
    }

    #[test]
    fn address_out_of_range() {
        assert!(matches!(
            VirtualPointer::new(MAX_BLOCK_ADDRESS + 1, 0),
            Err(Error::InvalidPointerFields { .. })
        ));
    }

    #[test]
    fn ordering_is_bitwise() {
        let a = VirtualPointer::new(1, u16::MAX).unwrap();
        let b = VirtualPointer::new(2, 0).unwrap();
        assert!(a < b);
        assert!(VirtualPointer::ZERO < a);
    }
}
