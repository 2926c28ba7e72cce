// Licensed under the Apache-2.0 license

use crate::bits::bits;
use crate::{FirmwareRev, FwvalApiError};
use alloc::vec::Vec;

/// SDM mailbox command opcode, bits [11:0] of a command header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Opcode(pub u32);

impl Opcode {
    pub const NOOP: Self = Self(0x000);
    /// Flush the command queue. Only valid with [`MailboxClient::SYNC`].
    pub const SYNC: Self = Self(0x001);
    pub const CONFIG_STATUS: Self = Self(0x004);
    pub const RECONFIG: Self = Self(0x006);
    pub const RECONFIG_DATA: Self = Self(0x008);
    pub const RECONFIG_STATUS: Self = Self(0x009);
    pub const EFUSE_READ: Self = Self(0x01A);
    pub const EFUSE_WRITE: Self = Self(0x01B);
    /// Disarm eFuse write protection for the current power cycle.
    pub const FUSE_WR_PROT_DISABLE: Self = Self(0x01C);
    /// Re-load the eFuse shadow cache from the physical array.
    pub const EFUSE_CACHE_RELOAD: Self = Self(0x01D);
    pub const PROVISION_STATUS: Self = Self(0x049);
    /// Remote-system-update image bookkeeping report.
    pub const RSU_STATUS: Self = Self(0x05B);
    pub const PROGRAM_ROOT_HASH: Self = Self(0x04A);
    pub const KEY_CANCEL: Self = Self(0x04B);
    pub const COSIGN_ENABLE: Self = Self(0x04C);
    pub const BIG_COUNTER_INC: Self = Self(0x04D);
}

impl From<Opcode> for u32 {
    fn from(value: Opcode) -> Self {
        value.0
    }
}

/// Origin of a mailbox command, bits [31:28] of the header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MailboxClient(pub u32);

impl MailboxClient {
    pub const JTAG: Self = Self(0x0);
    pub const FPGA_MAILBOX: Self = Self(0xE);
    /// Reserved for the SYNC flush command.
    pub const SYNC: Self = Self(0xF);
}

/// A command packet: one header word followed by `args` in order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CommandPacket<'a> {
    pub opcode: Opcode,
    pub client: MailboxClient,
    pub id: u32,
    pub args: &'a [u32],
}

pub const MAX_COMMAND_ARGS: usize = 0xFFF;

impl<'a> CommandPacket<'a> {
    pub fn new(opcode: Opcode, client: MailboxClient, id: u32, args: &'a [u32]) -> Self {
        Self {
            opcode,
            client,
            id,
            args,
        }
    }

    /// Header word: opcode[11:0] | length[23:12] | id[27:24] | client[31:28].
    /// Length is the argument word count, not a byte count.
    pub fn header(&self) -> Result<u32, FwvalApiError> {
        if self.args.len() > MAX_COMMAND_ARGS {
            return Err(FwvalApiError::TooManyCommandArgs(self.args.len()));
        }
        Ok((self.opcode.0 & 0xFFF)
            | ((self.args.len() as u32) << 12)
            | ((self.id & 0xF) << 24)
            | ((self.client.0 & 0xF) << 28))
    }

    /// The full wire sequence, header first, argument order preserved.
    pub fn encode(&self) -> Result<Vec<u32>, FwvalApiError> {
        let mut words = Vec::with_capacity(1 + self.args.len());
        words.push(self.header()?);
        words.extend_from_slice(self.args);
        Ok(words)
    }
}

/// First word of a response. The layout mirrors the command header, with
/// the low bits reinterpreted as an error code.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ResponseHeader(pub u32);

impl ResponseHeader {
    pub fn error_code(self, rev: FirmwareRev) -> u32 {
        self.0 & rev.error_code_mask()
    }

    pub fn length(self) -> u32 {
        bits(self.0, 23, 12)
    }

    pub fn id(self) -> u32 {
        bits(self.0, 27, 24)
    }

    pub fn client(self) -> u32 {
        bits(self.0, 31, 28)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResponsePacket {
    pub header: ResponseHeader,
    pub error_code: u32,
    pub payload: Vec<u32>,
}

impl ResponsePacket {
    pub fn ok(&self) -> bool {
        self.error_code == 0
    }
}

/// Decode a raw response word sequence.
///
/// On success (error code 0) the payload must be at least as long as the
/// header declares, and exactly the declared words are returned. On failure
/// the payload is command-defined (often empty) and returned as-is; callers
/// must inspect `error_code` before trusting the payload length.
pub fn decode_response(words: &[u32], rev: FirmwareRev) -> Result<ResponsePacket, FwvalApiError> {
    let Some((&header, rest)) = words.split_first() else {
        return Err(FwvalApiError::MalformedResponse {
            declared: 1,
            actual: 0,
        });
    };
    let header = ResponseHeader(header);
    let error_code = header.error_code(rev);
    if error_code != 0 {
        return Ok(ResponsePacket {
            header,
            error_code,
            payload: rest.to_vec(),
        });
    }
    let declared = header.length() as usize;
    if rest.len() < declared {
        return Err(FwvalApiError::MalformedResponse {
            declared: declared as u32,
            actual: rest.len() as u32,
        });
    }
    Ok(ResponsePacket {
        header,
        error_code: 0,
        payload: rest[..declared].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encoding() {
        let args = [0x1122_3344, 0x5566_7788];
        let cmd = CommandPacket::new(Opcode::RECONFIG_DATA, MailboxClient::JTAG, 3, &args);
        assert_eq!(cmd.header().unwrap(), 0x0300_2008);
        assert_eq!(
            cmd.encode().unwrap(),
            vec![0x0300_2008, 0x1122_3344, 0x5566_7788]
        );
    }

    #[test]
    fn test_sync_uses_reserved_client() {
        let cmd = CommandPacket::new(Opcode::SYNC, MailboxClient::SYNC, 0, &[]);
        assert_eq!(cmd.header().unwrap(), 0xF000_0001);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let args = [0xA, 0xB, 0xC];
        for (opcode, client, id) in [
            (Opcode::CONFIG_STATUS, MailboxClient::JTAG, 0),
            (Opcode::EFUSE_WRITE, MailboxClient::FPGA_MAILBOX, 0xF),
            (Opcode::PROVISION_STATUS, MailboxClient::JTAG, 7),
        ] {
            let cmd = CommandPacket::new(opcode, client, id, &args);
            let words = cmd.encode().unwrap();
            let hdr = ResponseHeader(words[0]);
            assert_eq!(hdr.length(), args.len() as u32);
            assert_eq!(hdr.id(), id);
            assert_eq!(hdr.client(), client.0);
            assert_eq!(words[0] & 0xFFF, opcode.0);
            assert_eq!(&words[1..], &args);
        }
    }

    #[test]
    fn test_too_many_args() {
        let args = vec![0u32; 0x1000];
        let cmd = CommandPacket::new(Opcode::RECONFIG_DATA, MailboxClient::JTAG, 0, &args);
        assert_eq!(
            cmd.header(),
            Err(FwvalApiError::TooManyCommandArgs(0x1000))
        );
    }

    #[test]
    fn test_decode_success() {
        let words = [0x0000_3000, 1, 2, 3];
        let resp = decode_response(&words, FirmwareRev::RevB).unwrap();
        assert!(resp.ok());
        assert_eq!(resp.payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_decode_error_code_masks() {
        // Bit 10 is part of the error code on RevA only.
        let words = [0x0000_0400];
        let resp = decode_response(&words, FirmwareRev::RevA).unwrap();
        assert_eq!(resp.error_code, 0x400);
        // On RevB the same word is a clean zero error code declaring no payload.
        let resp = decode_response(&words, FirmwareRev::RevB).unwrap();
        assert!(resp.ok());
        assert!(resp.payload.is_empty());
    }

    #[test]
    fn test_decode_short_payload() {
        let words = [0x0000_3000, 1, 2];
        assert_eq!(
            decode_response(&words, FirmwareRev::RevB),
            Err(FwvalApiError::MalformedResponse {
                declared: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_decode_error_payload_is_command_defined() {
        // Error responses may carry fewer words than the length field.
        let words = [0x0000_3005, 0xDEAD];
        let resp = decode_response(&words, FirmwareRev::RevB).unwrap();
        assert_eq!(resp.error_code, 5);
        assert_eq!(resp.payload, vec![0xDEAD]);
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(
            decode_response(&[], FirmwareRev::RevB),
            Err(FwvalApiError::MalformedResponse {
                declared: 1,
                actual: 0
            })
        );
    }
}
