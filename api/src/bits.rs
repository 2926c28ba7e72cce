// Licensed under the Apache-2.0 license

//! Bit-range helpers for 32-bit mailbox and fuse words.

/// Extract bits `[hi:lo]` of `word`, inclusive on both ends.
pub const fn bits(word: u32, hi: u32, lo: u32) -> u32 {
    assert!(hi < 32 && lo <= hi);
    (word >> lo) & (u32::MAX >> (31 - (hi - lo)))
}

/// Extract bit `n` of `word` as 0 or 1.
pub const fn bit(word: u32, n: u32) -> u32 {
    assert!(n < 32);
    (word >> n) & 1
}

/// Return `word` with bits `[hi:lo]` replaced by the low bits of `val`.
pub const fn set_bits(word: u32, hi: u32, lo: u32, val: u32) -> u32 {
    assert!(hi < 32 && lo <= hi);
    let mask = (u32::MAX >> (31 - (hi - lo))) << lo;
    (word & !mask) | ((val << lo) & mask)
}

/// Mask covering bits `[hi:lo]` inclusive.
pub const fn mask(hi: u32, lo: u32) -> u32 {
    assert!(hi < 32 && lo <= hi);
    (u32::MAX >> (31 - (hi - lo))) << lo
}

/// Reverse the bit order within every byte of the buffer, in place.
///
/// Some storage paths deliver configuration images with each byte
/// bit-reversed; the descriptor resolver undoes that before reading
/// structural fields.
pub fn reverse_bits_in_place(buf: &mut [u8]) {
    for b in buf.iter_mut() {
        *b = b.reverse_bits();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits() {
        assert_eq!(bits(0xDEAD_BEEF, 31, 28), 0xD);
        assert_eq!(bits(0xDEAD_BEEF, 11, 0), 0xEEF);
        assert_eq!(bits(0xDEAD_BEEF, 31, 0), 0xDEAD_BEEF);
        assert_eq!(bits(0x8000_0000, 31, 31), 1);
    }

    #[test]
    fn test_bit() {
        assert_eq!(bit(0b100, 2), 1);
        assert_eq!(bit(0b100, 1), 0);
    }

    #[test]
    fn test_set_bits() {
        assert_eq!(set_bits(0, 23, 12, 0x3), 0x3000);
        assert_eq!(set_bits(0xFFFF_FFFF, 11, 0, 0), 0xFFFF_F000);
        // Excess bits of val must not leak outside the range.
        assert_eq!(set_bits(0, 3, 0, 0x1F), 0xF);
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask(11, 0), 0xFFF);
        assert_eq!(mask(31, 28), 0xF000_0000);
        assert_eq!(mask(5, 5), 0x20);
    }

    #[test]
    fn test_reverse_bits_in_place() {
        let mut buf = [0x80, 0x01, 0xA5];
        reverse_bits_in_place(&mut buf);
        assert_eq!(buf, [0x01, 0x80, 0xA5]);
        reverse_bits_in_place(&mut buf);
        assert_eq!(buf, [0x80, 0x01, 0xA5]);
    }
}
