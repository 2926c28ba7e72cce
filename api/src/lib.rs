// Licensed under the Apache-2.0 license

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bits;

mod packet;

pub use packet::{
    decode_response, CommandPacket, MailboxClient, Opcode, ResponseHeader, ResponsePacket,
    MAX_COMMAND_ARGS,
};

pub type FwvalResult<T> = Result<T, FwvalApiError>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FwvalApiError {
    /// The response declared more payload words than were received.
    MalformedResponse { declared: u32, actual: u32 },
    /// More than 4095 argument words were supplied to a command.
    TooManyCommandArgs(usize),
    /// The SDM returned a non-zero error code for a command that must succeed.
    SdmCommandFailed(u32),
}

/// SDM firmware revision. Selected once per session and used to pick
/// decode tables; never branched on inline.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FirmwareRev {
    RevA,
    RevB,
}

impl FirmwareRev {
    /// Width of the error-code field in a response header.
    pub fn error_code_mask(self) -> u32 {
        match self {
            FirmwareRev::RevA => 0x7FF,
            FirmwareRev::RevB => 0x3FF,
        }
    }
}

/// Device family, which fixes the number of owner root-hash slots.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceFamily {
    /// Legacy family with 3 owner root-hash slots.
    Gen1,
    /// Family with 5 owner root-hash slots.
    Gen2,
}

impl DeviceFamily {
    pub fn rh_slot_count(self) -> usize {
        match self {
            DeviceFamily::Gen1 => 3,
            DeviceFamily::Gen2 => 5,
        }
    }
}
