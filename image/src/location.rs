// Licensed under the Apache-2.0 license

use crate::mip::SIG_BLOCK_OFFSET;
use crate::{DescriptorTable, ImageBuffer, ResolverError, ResolverResult};
use std::str::FromStr;

/// Byte offset of a section's data region from the section start.
pub const SECTION_DATA_OFFSET: u32 = 0x2000;

/// A symbolic corruption target inside a configuration image.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Location {
    /// Anywhere in the first 4 KiB (descriptor region).
    First4k,
    /// The signature block of the first main section.
    SignatureDesc,
    Ssbl,
    Trampoline,
    SyncFirstWord,
    /// Descriptor region of main section N.
    MainDesc(usize),
    /// Data region of main section N.
    MainData(usize),
    /// A literal hex or decimal byte address.
    Literal(u32),
}

impl FromStr for Location {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || ResolverError::UnsupportedLocation(s.to_string());
        match s {
            "first4k" => return Ok(Location::First4k),
            "signature_desc" => return Ok(Location::SignatureDesc),
            "ssbl" => return Ok(Location::Ssbl),
            "trampoline" => return Ok(Location::Trampoline),
            "sync_first_word" => return Ok(Location::SyncFirstWord),
            _ => {}
        }
        if let Some(rest) = s.strip_prefix("main") {
            if let Some(n) = rest.strip_suffix("_desc") {
                return Ok(Location::MainDesc(
                    n.parse().map_err(|_| unsupported())?,
                ));
            }
            if let Some(n) = rest.strip_suffix("_data") {
                return Ok(Location::MainData(
                    n.parse().map_err(|_| unsupported())?,
                ));
            }
            return Err(unsupported());
        }
        let literal = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16)
        } else {
            s.parse()
        };
        literal.map(Location::Literal).map_err(|_| unsupported())
    }
}

impl Location {
    /// Base offset and inclusive window for the location.
    fn base_and_window(
        &self,
        image: &ImageBuffer,
        table: &DescriptorTable,
    ) -> ResolverResult<(u32, (u32, u32))> {
        let image_window = (0, image.len().saturating_sub(1));
        let section = |n: usize| -> ResolverResult<u32> {
            table
                .main_section_addrs
                .get(n)
                .copied()
                .ok_or_else(|| ResolverError::UnsupportedLocation(format!("main{n}")))
        };
        Ok(match *self {
            Location::First4k => (0, (0, 0xFFF)),
            Location::SignatureDesc => {
                let base = section(0)? + SIG_BLOCK_OFFSET;
                (base, (base, base + 0xFFF))
            }
            Location::Ssbl => (table.ssbl_range.0, table.ssbl_range),
            Location::Trampoline => (table.trampoline_range.0, table.trampoline_range),
            Location::SyncFirstWord => {
                let range = table.sync_range.ok_or_else(|| {
                    ResolverError::UnsupportedLocation("sync_first_word".to_string())
                })?;
                (range.0, range)
            }
            Location::MainDesc(n) => {
                let base = section(n)?;
                (base, (base, base + 0xFFF))
            }
            Location::MainData(n) => {
                let base = section(n)? + SECTION_DATA_OFFSET;
                (base, (base, image_window.1))
            }
            Location::Literal(addr) => (addr, image_window),
        })
    }
}

/// Map a symbolic location to a concrete byte offset, optionally rounded
/// down to `align`. Fails with `OutOfRange` if rounding leaves the window,
/// or if the offset is past the end of the buffer.
pub fn select_offset(
    image: &ImageBuffer,
    table: &DescriptorTable,
    spec: &str,
    align: Option<u32>,
) -> ResolverResult<u32> {
    let location = Location::from_str(spec)?;
    let (base, window) = location.base_and_window(image, table)?;
    let offset = match align {
        Some(a) if a > 1 => base - base % a,
        _ => base,
    };
    if offset < window.0 || offset > window.1 || offset >= image.len() {
        return Err(ResolverError::OutOfRange { offset, window });
    }
    Ok(offset)
}
