// Licensed under the Apache-2.0 license

//! eFuse addressing and region-mask model for the SDM fuse array.
//!
//! The array is addressed by (bank, row); each row shadows one 32-bit
//! one-time-programmable word. Two region tables partition sensitive bit
//! ranges: GAP rows must never be written, SECURITY rows are excluded from
//! convenience writers unless explicitly requested.

#![cfg_attr(not(test), no_std)]

use fwval_api::bits::mask;

/// Row address within the fuse array.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct EfuseAddress {
    pub bank: u32,
    pub row: u32,
}

impl EfuseAddress {
    pub const fn new(bank: u32, row: u32) -> Self {
        Self { bank, row }
    }

    /// Linear byte address of the row: (bank << 11) | (row << 5).
    pub const fn linear(self) -> u32 {
        (self.bank << 11) | (self.row << 5)
    }
}

/// One masked bit range: bits [bit_hi:bit_lo] of (bank, row).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegionRange {
    pub bank: u32,
    pub row: u32,
    pub bit_lo: u32,
    pub bit_hi: u32,
}

const fn rr(bank: u32, row: u32, bit_lo: u32, bit_hi: u32) -> RegionRange {
    RegionRange {
        bank,
        row,
        bit_lo,
        bit_hi,
    }
}

/// Reserved ranges that no write may ever touch.
pub const GAP_REGIONS: &[RegionRange] = &[
    rr(0, 0, 28, 31),
    rr(0, 6, 0, 31),
    rr(0, 7, 0, 31),
    rr(1, 15, 0, 15),
    rr(2, 30, 0, 31),
    rr(2, 31, 0, 31),
    rr(3, 12, 8, 15),
];

/// Sensitive ranges excluded from convenience writers unless requested:
/// owner root-hash storage, cancellation masks, anti-rollback counters.
pub const SECURITY_REGIONS: &[RegionRange] = &[
    rr(2, 0, 0, 31),
    rr(2, 1, 0, 31),
    rr(2, 2, 0, 31),
    rr(2, 3, 0, 31),
    rr(2, 4, 0, 31),
    rr(2, 5, 0, 31),
    rr(2, 6, 0, 31),
    rr(2, 7, 0, 31),
    rr(2, 8, 0, 31),
    rr(2, 9, 0, 31),
    rr(2, 16, 0, 31),
    rr(3, 0, 0, 31),
    rr(3, 1, 0, 31),
    rr(3, 2, 0, 31),
    rr(3, 3, 0, 31),
];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Region {
    Gap,
    Security,
}

impl Region {
    pub fn table(self) -> &'static [RegionRange] {
        match self {
            Region::Gap => GAP_REGIONS,
            Region::Security => SECURITY_REGIONS,
        }
    }
}

/// Combined mask of every range the region lists for (bank, row).
pub fn region_mask(region: Region, bank: u32, row: u32) -> u32 {
    let mut m = 0;
    for r in region.table() {
        if r.bank == bank && r.row == row {
            m |= mask(r.bit_hi, r.bit_lo);
        }
    }
    m
}

pub fn is_gap(bank: u32, row: u32) -> bool {
    region_mask(Region::Gap, bank, row) != 0
}

pub fn is_security(bank: u32, row: u32) -> bool {
    region_mask(Region::Security, bank, row) != 0
}

/// Clear exactly the region's bits from a run of row values starting at
/// `start_row`, leaving every other bit untouched. Idempotent.
pub fn mask_out(region: Region, bank: u32, start_row: u32, values: &mut [u32]) {
    for (i, v) in values.iter_mut().enumerate() {
        *v &= !region_mask(region, bank, start_row + i as u32);
    }
}

/// Merge a requested value into an already-programmed word. Fuse bits only
/// transition 0 -> 1, so the result is the bitwise OR.
pub const fn program_word(old: u32, new: u32) -> u32 {
    old | new
}

/// True if `new` asks for a 1 -> 0 transition relative to `old`, which the
/// physical array cannot perform.
pub const fn would_clear_bits(old: u32, new: u32) -> bool {
    old & !new != 0
}
