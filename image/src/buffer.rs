// Licensed under the Apache-2.0 license

use crate::mip::{MIP_MAGIC, MIP_OFFSET};
use crate::{ResolverError, ResolverResult};
use fwval_api::bits::reverse_bits_in_place;

/// A configuration image with byte order normalized for structural reads.
///
/// Some storage paths deliver the whole buffer with each byte bit-reversed;
/// construction probes the MIP magic both ways and keeps a corrected copy.
#[derive(Debug)]
pub struct ImageBuffer {
    data: Vec<u8>,
    bit_reversed: bool,
}

impl ImageBuffer {
    pub fn new(bytes: &[u8]) -> ResolverResult<Self> {
        let mut image = ImageBuffer {
            data: bytes.to_vec(),
            bit_reversed: false,
        };
        let magic = image.read_u32(MIP_OFFSET)?;
        if magic == MIP_MAGIC {
            return Ok(image);
        }
        reverse_bits_in_place(&mut image.data);
        image.bit_reversed = true;
        let reversed_magic = image.read_u32(MIP_OFFSET)?;
        if reversed_magic == MIP_MAGIC {
            Ok(image)
        } else {
            Err(ResolverError::BadMagic(magic))
        }
    }

    /// True if the raw input was stored bit-reversed.
    pub fn bit_reversed(&self) -> bool {
        self.bit_reversed
    }

    pub fn len(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Little-endian structural field read.
    pub fn read_u32(&self, offset: u32) -> ResolverResult<u32> {
        let offset = offset as usize;
        let bytes = self
            .data
            .get(offset..offset + 4)
            .ok_or(ResolverError::TruncatedImage {
                offset: offset as u32,
            })?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn slice(&self, offset: u32, len: u32) -> ResolverResult<&[u8]> {
        self.data
            .get(offset as usize..(offset + len) as usize)
            .ok_or(ResolverError::TruncatedImage { offset })
    }
}
