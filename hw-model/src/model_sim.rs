// Licensed under the Apache-2.0 license

use crate::{Transport, TransportError};
use fwval_api::bits::bits;
use fwval_api::{DeviceFamily, FirmwareRev, Opcode};
use fwval_scoreboard::{Owner, ProvisionOp, ProvisioningExpectation, ScoreboardSideState};
use log::trace;
use std::collections::HashMap;
use std::time::Duration;

/// Configuration error reported when an image fails authentication.
const CONFIG_AUTH_ERROR_STATE: u32 = 0xF006_0001;
/// Error code for a provisioning command the slot model rejects.
const ERR_NO_FREE_SLOT: u32 = 0x01F;
const ERR_BAD_ARGS: u32 = 0x003;
const ERR_UNKNOWN_CMD: u32 = 0x0FF;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum SimStage {
    Bootrom,
    CmfOk,
    CmfError,
}

/// In-process simulated SDM, used by tests in place of a real device link.
///
/// Behaves like the firmware to the extent the validation core can
/// observe: stage-dependent status payloads, OTP fuse semantics, and the
/// provisioning slot rules (including the secondary-owner shift quirk).
pub struct ModelSim {
    family: DeviceFamily,
    rev: FirmwareRev,
    stage: SimStage,
    version: u32,
    msel: u32,
    golden_image: Option<Vec<u8>>,
    rx_image: Vec<u8>,
    fuses: HashMap<u32, u32>,
    provisioning: ProvisioningExpectation,
    side: ScoreboardSideState,
    /// RSU state word of the report; settable for mismatch-path tests.
    pub rsu_state: u32,
    /// Swallow every command, as a hung device would.
    pub drop_responses: bool,
}

impl ModelSim {
    pub fn new(family: DeviceFamily, rev: FirmwareRev) -> Self {
        Self {
            family,
            rev,
            stage: SimStage::Bootrom,
            version: 0x0203_0100,
            msel: 0x9,
            golden_image: None,
            rx_image: Vec::new(),
            fuses: HashMap::new(),
            provisioning: ProvisioningExpectation::new(family, rev),
            side: ScoreboardSideState::default(),
            rsu_state: 0,
            drop_responses: false,
        }
    }

    /// Image the simulated boot ROM will accept; anything else ends in the
    /// error stage.
    pub fn set_golden_image(&mut self, image: Vec<u8>) {
        self.golden_image = Some(image);
    }

    pub fn fuse_word(&self, addr: u32) -> u32 {
        self.fuses.get(&addr).copied().unwrap_or(0)
    }

    /// Force a provisioning-state divergence, for mismatch-path tests.
    pub fn provisioning_mut(&mut self) -> &mut ProvisioningExpectation {
        &mut self.provisioning
    }

    // Provisioning commands land in the eFuse shadow cache; reloading the
    // cache or dropping power discards them.
    fn reset_provisioning(&mut self) {
        self.provisioning = ProvisioningExpectation::new(self.family, self.rev);
        self.side = ScoreboardSideState::default();
    }

    fn ok(&self, id: u32, client: u32, payload: &[u32]) -> Vec<u32> {
        self.err(id, client, payload, 0)
    }

    fn err(&self, id: u32, client: u32, payload: &[u32], code: u32) -> Vec<u32> {
        let mut words = vec![(client << 28) | (id << 24) | ((payload.len() as u32) << 12) | code];
        words.extend_from_slice(payload);
        words
    }

    fn config_status_payload(&self) -> Vec<u32> {
        match self.stage {
            SimStage::Bootrom => vec![0],
            SimStage::CmfOk => {
                vec![0, self.version, 0b10 | 0b1 | (self.msel << 4), 0b11, 0, 0]
            }
            SimStage::CmfError => vec![
                CONFIG_AUTH_ERROR_STATE,
                self.version,
                0b10 | 0b1 | (self.msel << 4),
                0,
                0x0000_A000,
                0x1,
            ],
        }
    }

    fn finalize_image(&mut self) {
        let Some(golden) = &self.golden_image else {
            self.stage = SimStage::CmfOk;
            return;
        };
        if self.rx_image.len() >= golden.len() {
            self.stage = if &self.rx_image[..golden.len()] == golden.as_slice() {
                SimStage::CmfOk
            } else {
                SimStage::CmfError
            };
        }
    }

    fn provision_op(&mut self, opcode: Opcode, args: &[u32]) -> Result<(), u32> {
        let op = match opcode {
            Opcode::PROGRAM_ROOT_HASH => {
                let Some((&ctrl, hash)) = args.split_first() else {
                    return Err(ERR_BAD_ARGS);
                };
                if hash.len() != self.provisioning.hash_type.word_count() {
                    return Err(ERR_BAD_ARGS);
                }
                let owner = match ctrl & 0xF {
                    0 => Owner::Static,
                    1 => Owner::SecondaryPr,
                    2 => Owner::SecondaryExtAuth,
                    _ => return Err(ERR_BAD_ARGS),
                };
                ProvisionOp::ProgramRootHash {
                    owner,
                    hash,
                    late_provision: ctrl & 0x10 != 0,
                }
            }
            Opcode::KEY_CANCEL => {
                let &[arg] = args else {
                    return Err(ERR_BAD_ARGS);
                };
                if arg & 1 << 8 != 0 {
                    ProvisionOp::CancelOwnerSlot {
                        slot: (arg & 0xFF) as usize,
                        explicit_key: arg & 1 << 9 != 0,
                    }
                } else {
                    ProvisionOp::CancelIntelKey { key_id: arg & 0xFF }
                }
            }
            Opcode::COSIGN_ENABLE => ProvisionOp::EnableCosign,
            Opcode::BIG_COUNTER_INC => {
                let &[ticks] = args else {
                    return Err(ERR_BAD_ARGS);
                };
                ProvisionOp::IncrementBigCounter { ticks }
            }
            _ => return Err(ERR_UNKNOWN_CMD),
        };
        self.provisioning
            .apply_effect(&mut self.side, &op)
            .map_err(|_| ERR_NO_FREE_SLOT)
    }
}

impl Transport for ModelSim {
    fn send(&mut self, words: &[u32], _timeout: Duration) -> Result<Vec<u32>, TransportError> {
        if self.drop_responses {
            return Err(TransportError::Timeout);
        }
        let Some((&header, args)) = words.split_first() else {
            return Err(TransportError::Link("empty command".into()));
        };
        let opcode = Opcode(bits(header, 11, 0));
        let declared = bits(header, 23, 12) as usize;
        let id = bits(header, 27, 24);
        let client = bits(header, 31, 28);
        trace!("sim: opcode 0x{:03X} id {id} client 0x{client:X}", opcode.0);
        if declared != args.len() {
            return Ok(self.err(id, client, &[], ERR_BAD_ARGS));
        }

        let resp = match opcode {
            Opcode::SYNC | Opcode::NOOP => self.ok(id, client, &[]),
            Opcode::CONFIG_STATUS | Opcode::RECONFIG_STATUS => {
                let payload = self.config_status_payload();
                self.ok(id, client, &payload)
            }
            Opcode::RSU_STATUS => {
                // The report only exists once the CMF is up.
                let payload = match self.stage {
                    SimStage::Bootrom => vec![0],
                    _ => vec![0, 0, 0, 0, self.rsu_state, self.version, 0, 0],
                };
                self.ok(id, client, &payload)
            }
            Opcode::RECONFIG => {
                self.rx_image.clear();
                self.stage = SimStage::Bootrom;
                self.ok(id, client, &[])
            }
            Opcode::RECONFIG_DATA => {
                for w in args {
                    self.rx_image.extend_from_slice(&w.to_le_bytes());
                }
                self.finalize_image();
                self.ok(id, client, &[])
            }
            Opcode::EFUSE_WRITE => {
                let Some((&addr, values)) = args.split_first() else {
                    return Ok(self.err(id, client, &[], ERR_BAD_ARGS));
                };
                for (i, &v) in values.iter().enumerate() {
                    let a = addr + 0x20 * i as u32;
                    let merged = self.fuse_word(a) | v;
                    self.fuses.insert(a, merged);
                }
                self.ok(id, client, &[])
            }
            Opcode::EFUSE_READ => {
                let &[addr, rows] = args else {
                    return Ok(self.err(id, client, &[], ERR_BAD_ARGS));
                };
                let payload: Vec<u32> = (0..rows).map(|i| self.fuse_word(addr + 0x20 * i)).collect();
                self.ok(id, client, &payload)
            }
            Opcode::FUSE_WR_PROT_DISABLE => self.ok(id, client, &[]),
            Opcode::EFUSE_CACHE_RELOAD => {
                self.reset_provisioning();
                self.ok(id, client, &[])
            }
            Opcode::PROVISION_STATUS => {
                let mut resp = self.provisioning.to_status().encode();
                resp[0] |= (client << 28) | (id << 24);
                resp
            }
            Opcode::PROGRAM_ROOT_HASH
            | Opcode::KEY_CANCEL
            | Opcode::COSIGN_ENABLE
            | Opcode::BIG_COUNTER_INC => match self.provision_op(opcode, args) {
                Ok(()) => self.ok(id, client, &[]),
                Err(code) => self.err(id, client, &[], code),
            },
            _ => self.err(id, client, &[], ERR_UNKNOWN_CMD),
        };
        Ok(resp)
    }

    fn power_cycle(&mut self) {
        self.stage = SimStage::Bootrom;
        self.rx_image.clear();
        self.reset_provisioning();
        // Burned fuse words are non-volatile.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwval_api::{decode_response, CommandPacket, MailboxClient};

    fn send(sim: &mut ModelSim, opcode: Opcode, args: &[u32]) -> Vec<u32> {
        let words = CommandPacket::new(opcode, MailboxClient::JTAG, 2, args)
            .encode()
            .unwrap();
        sim.send(&words, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_bootrom_status_is_single_word() {
        let mut sim = ModelSim::new(DeviceFamily::Gen1, FirmwareRev::RevB);
        let resp = send(&mut sim, Opcode::CONFIG_STATUS, &[]);
        let decoded = decode_response(&resp, FirmwareRev::RevB).unwrap();
        assert!(decoded.ok());
        assert_eq!(decoded.header.id(), 2);
        assert_eq!(decoded.payload, vec![0]);
    }

    #[test]
    fn test_image_acceptance_moves_to_cmf() {
        let mut sim = ModelSim::new(DeviceFamily::Gen1, FirmwareRev::RevB);
        send(&mut sim, Opcode::RECONFIG, &[]);
        send(&mut sim, Opcode::RECONFIG_DATA, &[1, 2, 3, 4]);
        let resp = send(&mut sim, Opcode::CONFIG_STATUS, &[]);
        let decoded = decode_response(&resp, FirmwareRev::RevB).unwrap();
        assert_eq!(decoded.payload.len(), 6);
        assert_eq!(decoded.payload[0], 0);
        assert_eq!(decoded.payload[3], 0b11);
    }

    #[test]
    fn test_corrupt_image_reports_error_state() {
        let mut sim = ModelSim::new(DeviceFamily::Gen1, FirmwareRev::RevB);
        sim.set_golden_image(vec![0xAA; 16]);
        send(&mut sim, Opcode::RECONFIG, &[]);
        let corrupt = [0xAAAA_AAAA, 0xAAAA_AAAA, 0xABAA_AAAA, 0xAAAA_AAAA];
        send(&mut sim, Opcode::RECONFIG_DATA, &corrupt);
        let resp = send(&mut sim, Opcode::CONFIG_STATUS, &[]);
        let decoded = decode_response(&resp, FirmwareRev::RevB).unwrap();
        assert_eq!(decoded.payload[0], CONFIG_AUTH_ERROR_STATE);
        assert_eq!(decoded.payload[3], 0);
    }

    #[test]
    fn test_fuses_or_on_rewrite() {
        let mut sim = ModelSim::new(DeviceFamily::Gen1, FirmwareRev::RevB);
        send(&mut sim, Opcode::EFUSE_WRITE, &[0x800, 0x0F]);
        send(&mut sim, Opcode::EFUSE_WRITE, &[0x800, 0xF0]);
        let resp = send(&mut sim, Opcode::EFUSE_READ, &[0x800, 1]);
        let decoded = decode_response(&resp, FirmwareRev::RevB).unwrap();
        assert_eq!(decoded.payload, vec![0xFF]);
    }

    #[test]
    fn test_timeout_injection() {
        let mut sim = ModelSim::new(DeviceFamily::Gen1, FirmwareRev::RevB);
        sim.drop_responses = true;
        let words = CommandPacket::new(Opcode::CONFIG_STATUS, MailboxClient::JTAG, 1, &[])
            .encode()
            .unwrap();
        assert_eq!(
            sim.send(&words, Duration::from_secs(1)),
            Err(TransportError::Timeout)
        );
    }
}
