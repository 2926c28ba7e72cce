// Licensed under the Apache-2.0 license

use crate::{ImageBuffer, ResolverError, ResolverResult};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Byte offset of the Main Image Pointer block.
pub const MIP_OFFSET: u32 = 0x1F00;
/// "MIP1", little endian.
pub const MIP_MAGIC: u32 = 0x3150_494D;
/// Maximum number of main-section pointer words the MIP carries.
pub const MAX_MAIN_SECTIONS: usize = 4;
/// Offset of a section's declared size within its descriptor.
pub const SECTION_SIZE_OFFSET: u32 = 0x8;
/// Offset of a section's signature block from the section start.
pub const SIG_BLOCK_OFFSET: u32 = 0x1000;
/// Offset of the root-entry pointer within a signature block.
pub const SIG_ROOT_ENTRY_PTR_OFFSET: u32 = 0x8;
/// Offset of the next-entry pointer within a certificate-chain entry.
pub const SIG_NEXT_ENTRY_PTR_OFFSET: u32 = 0xC;

/// Fixed-layout view of the MIP block.
#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Default, Debug, Clone, Copy)]
pub struct MipBlock {
    pub magic: u32,
    pub main_section_count: u32,
    pub main_section_ptrs: [u32; MAX_MAIN_SECTIONS],
    pub ssbl_start: u32,
    pub ssbl_size: u32,
    pub trampoline_start: u32,
    pub trampoline_size: u32,
}

/// A main-section pointer word as stored in the MIP. Zero means "follows
/// the previous section", resolved from that section's declared size.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Pointer {
    Absolute(u32),
    RelativeToPrevious,
}

impl From<u32> for Pointer {
    fn from(word: u32) -> Self {
        if word == 0 {
            Pointer::RelativeToPrevious
        } else {
            Pointer::Absolute(word)
        }
    }
}

/// Resolved structural offsets of a configuration image. Ranges are
/// inclusive byte windows.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DescriptorTable {
    pub main_section_addrs: Vec<u32>,
    pub ssbl_range: (u32, u32),
    pub trampoline_range: (u32, u32),
    /// Filler between trampoline end and SSBL start, when they differ.
    pub sync_range: Option<(u32, u32)>,
}

/// Inclusive byte window of a (start, size) descriptor pair. A zeroed or
/// wrapping descriptor is what a corrupted MIP looks like; reject it
/// instead of forming a bogus window.
fn inclusive_range(start: u32, size: u32) -> ResolverResult<(u32, u32)> {
    let end = size
        .checked_sub(1)
        .and_then(|s| start.checked_add(s))
        .ok_or(ResolverError::BadSectionRange { start, size })?;
    Ok((start, end))
}

fn read_mip(image: &ImageBuffer) -> ResolverResult<MipBlock> {
    let bytes = image.slice(MIP_OFFSET, core::mem::size_of::<MipBlock>() as u32)?;
    let mip = MipBlock::read_from_bytes(bytes).map_err(|_| ResolverError::TruncatedImage {
        offset: MIP_OFFSET,
    })?;
    if mip.magic != MIP_MAGIC {
        return Err(ResolverError::BadMagic(mip.magic));
    }
    Ok(mip)
}

/// Walk the MIP block and resolve every structural range.
///
/// Section pointers resolve left to right: an absolute pointer is taken
/// as-is, a zero pointer chains from the previous section's declared size.
pub fn resolve(image: &ImageBuffer) -> ResolverResult<DescriptorTable> {
    let mip = read_mip(image)?;
    let count = mip.main_section_count as usize;
    if count == 0 || count > MAX_MAIN_SECTIONS {
        return Err(ResolverError::BadSectionCount(mip.main_section_count));
    }

    let mut main_section_addrs = Vec::with_capacity(count);
    for (i, &ptr) in mip.main_section_ptrs[..count].iter().enumerate() {
        let addr = match Pointer::from(ptr) {
            Pointer::Absolute(addr) => addr,
            Pointer::RelativeToPrevious => {
                let Some(&prev) = main_section_addrs.last() else {
                    return Err(ResolverError::RelativeWithoutPredecessor { index: i });
                };
                let prev_size = image.read_u32(prev + SECTION_SIZE_OFFSET)?;
                prev + prev_size
            }
        };
        main_section_addrs.push(addr);
    }

    let ssbl_range = inclusive_range(mip.ssbl_start, mip.ssbl_size)?;
    let trampoline_range = inclusive_range(mip.trampoline_start, mip.trampoline_size)?;
    let sync_range = if trampoline_range.1 + 1 != ssbl_range.0 {
        Some((trampoline_range.1 + 1, ssbl_range.0 - 1))
    } else {
        None
    };

    Ok(DescriptorTable {
        main_section_addrs,
        ssbl_range,
        trampoline_range,
        sync_range,
    })
}

/// Which hop of the certificate chain inside a signature block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChainEntry {
    Root,
    PublicKey,
    Block0,
}

/// Byte offset of a certificate-chain entry inside a main section's
/// signature block. Pointers inside the block are block-relative; the walk
/// is root entry -> public-key entry -> block-0 entry.
pub fn key_chain_entry(
    image: &ImageBuffer,
    table: &DescriptorTable,
    section: usize,
    entry: ChainEntry,
) -> ResolverResult<u32> {
    let &base = table.main_section_addrs.get(section).ok_or(
        ResolverError::UnsupportedLocation(format!("main{section}")),
    )?;
    let sig_base = base + SIG_BLOCK_OFFSET;

    let root = sig_base + image.read_u32(sig_base + SIG_ROOT_ENTRY_PTR_OFFSET)?;
    if entry == ChainEntry::Root {
        return Ok(root);
    }
    let pubkey = sig_base + image.read_u32(root + SIG_NEXT_ENTRY_PTR_OFFSET)?;
    if entry == ChainEntry::PublicKey {
        return Ok(pubkey);
    }
    Ok(sig_base + image.read_u32(pubkey + SIG_NEXT_ENTRY_PTR_OFFSET)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use zerocopy::IntoBytes;

    pub(crate) fn synthetic_image() -> Vec<u8> {
        let mut bytes = vec![0u8; 0x18_0000];
        let mip = MipBlock {
            magic: MIP_MAGIC,
            main_section_count: 3,
            main_section_ptrs: [0x8_0000, 0x10_0000, 0, 0],
            ssbl_start: 0xA000,
            ssbl_size: 0x4000,
            trampoline_start: 0x8000,
            trampoline_size: 0x1000,
        };
        bytes[MIP_OFFSET as usize..MIP_OFFSET as usize + core::mem::size_of::<MipBlock>()]
            .copy_from_slice(mip.as_bytes());
        // Section 1 declares 0x4_0000 bytes, placing section 2 at 0x14_0000.
        bytes[0x10_0008..0x10_000C].copy_from_slice(&0x4_0000u32.to_le_bytes());
        // Signature block of section 0: root entry at +0x40, public key
        // entry at +0x80, block-0 entry at +0xC0, all block-relative.
        let sig = 0x8_0000 + SIG_BLOCK_OFFSET as usize;
        bytes[sig + 0x8..sig + 0xC].copy_from_slice(&0x40u32.to_le_bytes());
        bytes[sig + 0x40 + 0xC..sig + 0x40 + 0x10].copy_from_slice(&0x80u32.to_le_bytes());
        bytes[sig + 0x80 + 0xC..sig + 0x80 + 0x10].copy_from_slice(&0xC0u32.to_le_bytes());
        bytes
    }

    #[test]
    fn test_resolve_fixture() {
        let image = ImageBuffer::new(&synthetic_image()).unwrap();
        let table = resolve(&image).unwrap();
        assert_eq!(table.main_section_addrs, vec![0x8_0000, 0x10_0000, 0x14_0000]);
        assert_eq!(table.ssbl_range, (0xA000, 0xDFFF));
        assert_eq!(table.trampoline_range, (0x8000, 0x8FFF));
        assert_eq!(table.sync_range, Some((0x9000, 0x9FFF)));
    }

    #[test]
    fn test_no_sync_range_when_contiguous() {
        let mut bytes = synthetic_image();
        // Grow the trampoline so it abuts the SSBL.
        let size_off = MIP_OFFSET as usize + 0x24;
        bytes[size_off..size_off + 4].copy_from_slice(&0x2000u32.to_le_bytes());
        let image = ImageBuffer::new(&bytes).unwrap();
        let table = resolve(&image).unwrap();
        assert_eq!(table.sync_range, None);
    }

    #[test]
    fn test_relative_pointer_needs_predecessor() {
        let mut bytes = synthetic_image();
        let ptr0 = MIP_OFFSET as usize + 0x8;
        bytes[ptr0..ptr0 + 4].copy_from_slice(&0u32.to_le_bytes());
        let image = ImageBuffer::new(&bytes).unwrap();
        assert_eq!(
            resolve(&image),
            Err(ResolverError::RelativeWithoutPredecessor { index: 0 })
        );
    }

    #[test]
    fn test_zeroed_ssbl_descriptor_rejected() {
        let mut bytes = synthetic_image();
        // Zero out SSBL start and size, as a corrupted descriptor would.
        let ssbl_off = MIP_OFFSET as usize + 0x18;
        bytes[ssbl_off..ssbl_off + 8].copy_from_slice(&[0; 8]);
        let image = ImageBuffer::new(&bytes).unwrap();
        assert_eq!(
            resolve(&image),
            Err(ResolverError::BadSectionRange { start: 0, size: 0 })
        );
    }

    #[test]
    fn test_wrapping_trampoline_descriptor_rejected() {
        let mut bytes = synthetic_image();
        let size_off = MIP_OFFSET as usize + 0x24;
        bytes[size_off..size_off + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        let image = ImageBuffer::new(&bytes).unwrap();
        assert_eq!(
            resolve(&image),
            Err(ResolverError::BadSectionRange {
                start: 0x8000,
                size: u32::MAX,
            })
        );
    }

    #[test]
    fn test_bad_section_count() {
        let mut bytes = synthetic_image();
        let count_off = MIP_OFFSET as usize + 0x4;
        bytes[count_off..count_off + 4].copy_from_slice(&9u32.to_le_bytes());
        let image = ImageBuffer::new(&bytes).unwrap();
        assert_eq!(resolve(&image), Err(ResolverError::BadSectionCount(9)));
    }

    #[test]
    fn test_key_chain_walk() {
        let image = ImageBuffer::new(&synthetic_image()).unwrap();
        let table = resolve(&image).unwrap();
        let sig = 0x8_0000 + SIG_BLOCK_OFFSET;
        assert_eq!(
            key_chain_entry(&image, &table, 0, ChainEntry::Root).unwrap(),
            sig + 0x40
        );
        assert_eq!(
            key_chain_entry(&image, &table, 0, ChainEntry::PublicKey).unwrap(),
            sig + 0x80
        );
        assert_eq!(
            key_chain_entry(&image, &table, 0, ChainEntry::Block0).unwrap(),
            sig + 0xC0
        );
    }
}
