//! Register byte order handling
//!
//! A Modbus visitor describes its device's quirks with two independent
//! toggles: `swapRegister` reverses the order of the selected words and
//! `swapByte` reverses the two bytes inside each word. Together they select
//! one of four layouts, named in ABCD notation:
//!
//! | swapRegister | swapByte | 32-bit `0x12345678` from `[0x1234, 0x5678]` |
//! |--------------|----------|---------------------------------------------|
//! | false        | false    | `ABCD` → `[0x12, 0x34, 0x56, 0x78]`          |
//! | true         | false    | `CDAB` → `[0x56, 0x78, 0x12, 0x34]`          |
//! | false        | true     | `BADC` → `[0x34, 0x12, 0x78, 0x56]`          |
//! | true         | true     | `DCBA` → `[0x78, 0x56, 0x34, 0x12]`          |
//!
//! The register swap is applied before the byte swap; the two commute, so the
//! order only matters for readers following the bytes by hand.

use std::fmt;

/// Byte/word layout of a register buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    /// ABCD: registers and bytes in wire order
    #[default]
    BigEndian,
    /// DCBA: both registers and bytes reversed
    LittleEndian,
    /// CDAB: registers reversed (common in Modbus PLCs)
    BigEndianSwap,
    /// BADC: bytes reversed inside each register
    LittleEndianSwap,
}

impl ByteOrder {
    pub fn from_swaps(swap_register: bool, swap_byte: bool) -> Self {
        match (swap_register, swap_byte) {
            (false, false) => Self::BigEndian,
            (true, true) => Self::LittleEndian,
            (true, false) => Self::BigEndianSwap,
            (false, true) => Self::LittleEndianSwap,
        }
    }

    pub fn has_word_swap(&self) -> bool {
        matches!(self, Self::LittleEndian | Self::BigEndianSwap)
    }

    pub fn has_byte_swap(&self) -> bool {
        matches!(self, Self::LittleEndian | Self::LittleEndianSwap)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BigEndian => "ABCD",
            Self::LittleEndian => "DCBA",
            Self::BigEndianSwap => "CDAB",
            Self::LittleEndianSwap => "BADC",
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Register Conversions
// ============================================================================

/// Reorder registers in place according to `order`
///
/// The transform is an involution: applying it twice restores the input, so
/// the same call serves the read and the write direction.
pub fn reorder_registers(regs: &mut [u16], order: ByteOrder) {
    if order.has_word_swap() {
        regs.reverse();
    }
    if order.has_byte_swap() {
        for reg in regs.iter_mut() {
            *reg = reg.swap_bytes();
        }
    }
}

/// Convert registers to bytes, each register emitted big-endian after reordering
pub fn regs_to_bytes(regs: &[u16], order: ByteOrder) -> Vec<u8> {
    let mut words = regs.to_vec();
    reorder_registers(&mut words, order);
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

/// Convert bytes back to registers, inverse of [`regs_to_bytes`]
///
/// An odd trailing byte is padded with zero in the low half of the last word.
pub fn bytes_to_regs(bytes: &[u8], order: ByteOrder) -> Vec<u16> {
    let mut words: Vec<u16> = bytes
        .chunks(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
        .collect();
    reorder_registers(&mut words, order);
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_composition() {
        let regs = [0x1234, 0x5678];

        let mut words = regs;
        reorder_registers(&mut words, ByteOrder::from_swaps(true, false));
        assert_eq!(words, [0x5678, 0x1234]);

        let mut words = regs;
        reorder_registers(&mut words, ByteOrder::from_swaps(false, true));
        assert_eq!(words, [0x3412, 0x7856]);

        let mut words = regs;
        reorder_registers(&mut words, ByteOrder::from_swaps(true, true));
        assert_eq!(words, [0x7856, 0x3412]);
    }

    #[test]
    fn test_regs_to_bytes_all_orders() {
        let regs = [0x1234, 0x5678];

        assert_eq!(
            regs_to_bytes(&regs, ByteOrder::BigEndian),
            [0x12, 0x34, 0x56, 0x78]
        );
        assert_eq!(
            regs_to_bytes(&regs, ByteOrder::LittleEndian),
            [0x78, 0x56, 0x34, 0x12]
        );
        assert_eq!(
            regs_to_bytes(&regs, ByteOrder::BigEndianSwap),
            [0x56, 0x78, 0x12, 0x34]
        );
        assert_eq!(
            regs_to_bytes(&regs, ByteOrder::LittleEndianSwap),
            [0x34, 0x12, 0x78, 0x56]
        );
    }

    #[test]
    fn test_64bit_word_swap_reverses_all_registers() {
        let regs = [0x0102, 0x0304, 0x0506, 0x0708];
        assert_eq!(
            regs_to_bytes(&regs, ByteOrder::BigEndianSwap),
            [0x07, 0x08, 0x05, 0x06, 0x03, 0x04, 0x01, 0x02]
        );
    }

    #[test]
    fn test_bytes_to_regs_inverts_reordering() {
        let bytes = [0x78, 0x56, 0x34, 0x12];
        assert_eq!(
            bytes_to_regs(&bytes, ByteOrder::LittleEndian),
            [0x1234, 0x5678]
        );
        assert_eq!(
            bytes_to_regs(&[0x41, 0x42, 0x43], ByteOrder::BigEndian),
            [0x4142, 0x4300]
        );
    }

    #[test]
    fn test_from_swaps() {
        assert_eq!(ByteOrder::from_swaps(false, false), ByteOrder::default());
        assert_eq!(ByteOrder::from_swaps(true, false).to_string(), "CDAB");
        assert_eq!(ByteOrder::from_swaps(false, true).to_string(), "BADC");
        assert_eq!(ByteOrder::from_swaps(true, true).to_string(), "DCBA");
    }
}
