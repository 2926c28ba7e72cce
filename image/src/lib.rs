// Licensed under the Apache-2.0 license

//! Structural descriptor resolver for SDM configuration images.
//!
//! Walks the Main Image Pointer (MIP) block of a raw image buffer to locate
//! section addresses, the SSBL/TSBL boot-loader range, the trampoline range
//! and the sync filler between them, then maps symbolic corruption targets
//! ("ssbl", "main1_desc", ...) to exact byte offsets. Operates purely on the
//! byte buffer; it never touches the device link.

mod buffer;
mod location;
mod mip;

pub use buffer::ImageBuffer;
pub use location::{select_offset, Location};
pub use mip::{
    key_chain_entry, resolve, ChainEntry, DescriptorTable, Pointer, MIP_MAGIC, MIP_OFFSET,
    SIG_BLOCK_OFFSET,
};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ResolverError {
    /// The buffer carries no MIP magic in either bit order.
    BadMagic(u32),
    /// A structural field lies beyond the end of the buffer.
    TruncatedImage { offset: u32 },
    /// A zero (relative) section pointer with no predecessor to chain from.
    RelativeWithoutPredecessor { index: usize },
    BadSectionCount(u32),
    /// A boot-loader or trampoline range whose size is zero or whose end
    /// does not fit in the address space.
    BadSectionRange { start: u32, size: u32 },
    /// A symbolic location name the resolver does not know.
    UnsupportedLocation(String),
    /// Alignment rounding pushed the offset outside the location's window.
    OutOfRange {
        offset: u32,
        window: (u32, u32),
    },
}

pub type ResolverResult<T> = Result<T, ResolverError>;
