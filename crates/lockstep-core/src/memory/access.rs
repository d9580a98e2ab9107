//! Access-width validation and little-endian byte-lane helpers.

use crate::AccessFault;

/// Legal data/fetch access widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AccessWidth {
    /// 1 byte.
    Byte = 1,
    /// 2 bytes.
    Half = 2,
    /// 4 bytes.
    Word = 4,
    /// 8 bytes.
    Double = 8,
}

impl AccessWidth {
    /// Validates a byte count.
    ///
    /// # Errors
    ///
    /// Returns [`AccessFault::InvalidWidth`] unless `len` is 1, 2, 4 or 8.
    pub const fn from_len(len: usize) -> Result<Self, AccessFault> {
        match len {
            1 => Ok(Self::Byte),
            2 => Ok(Self::Half),
            4 => Ok(Self::Word),
            8 => Ok(Self::Double),
            _ => Err(AccessFault::InvalidWidth { len }),
        }
    }

    /// Width in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        self as usize
    }

    /// Mask covering the low `bytes()` bytes.
    #[must_use]
    pub const fn mask(self) -> u64 {
        match self {
            Self::Double => u64::MAX,
            Self::Byte | Self::Half | Self::Word => (1 << (self.bytes() * 8)) - 1,
        }
    }

    /// Truncates `value` to this width.
    #[must_use]
    pub const fn truncate(self, value: u64) -> u64 {
        value & self.mask()
    }
}

/// Expands a per-byte write-enable mask into a bit mask over a 64-bit word.
#[must_use]
pub const fn lane_mask(byte_enable: u8) -> u64 {
    let mut mask = 0_u64;
    let mut lane = 0;
    while lane < 8 {
        if byte_enable & (1 << lane) != 0 {
            mask |= 0xFF << (lane * 8);
        }
        lane += 1;
    }
    mask
}

/// Reads up to eight bytes as a little-endian value.
#[must_use]
pub fn read_le(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0_u64, |acc, byte| (acc << 8) | u64::from(*byte))
}

/// Writes the low `dst.len()` bytes of `value` in little-endian order.
pub fn write_le(dst: &mut [u8], value: u64) {
    let bytes = value.to_le_bytes();
    let len = dst.len().min(bytes.len());
    dst[..len].copy_from_slice(&bytes[..len]);
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{lane_mask, AccessWidth};
    use crate::AccessFault;

    #[rstest]
    #[case(1, AccessWidth::Byte, 0xFF)]
    #[case(2, AccessWidth::Half, 0xFFFF)]
    #[case(4, AccessWidth::Word, 0xFFFF_FFFF)]
    #[case(8, AccessWidth::Double, u64::MAX)]
    fn legal_widths_decode_with_masks(#[case] len: usize, #[case] width: AccessWidth, #[case] mask: u64) {
        assert_eq!(AccessWidth::from_len(len), Ok(width));
        assert_eq!(width.bytes(), len);
        assert_eq!(width.mask(), mask);
    }

    #[rstest]
    #[case(0)]
    #[case(3)]
    #[case(5)]
    #[case(16)]
    fn illegal_widths_are_rejected(#[case] len: usize) {
        assert_eq!(
            AccessWidth::from_len(len),
            Err(AccessFault::InvalidWidth { len })
        );
    }

    #[test]
    fn truncate_keeps_low_bytes() {
        assert_eq!(AccessWidth::Half.truncate(0x1234_5678), 0x5678);
        assert_eq!(AccessWidth::Byte.truncate(0x1FF), 0xFF);
    }

    #[test]
    fn lane_mask_expands_enabled_bytes() {
        assert_eq!(lane_mask(0b0000_0000), 0);
        assert_eq!(lane_mask(0b0000_0001), 0xFF);
        assert_eq!(lane_mask(0b0000_0101), 0x00FF_00FF);
        assert_eq!(lane_mask(0xFF), u64::MAX);
    }
}
