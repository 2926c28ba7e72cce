// Licensed under the Apache-2.0 license

use crate::side_state::ScoreboardSideState;
use crate::{Expect, Mismatch, ScoreboardError, ScoreboardResult};
use bitflags::bitflags;
use fwval_api::bits::bits;
use fwval_api::{DeviceFamily, FirmwareRev};
use log::{debug, warn};

bitflags! {
    /// Per-slot cancellation-status word.
    #[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
    pub struct CancelFlags: u32 {
        const SLOT_CANCELLED = 1 << 0;
        const EXPKEY_CANCELLED = 1 << 1;
    }
}

/// Owner root-hash curve, which fixes the per-slot hash width.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HashType {
    /// Legacy 256-bit curve, 8 words per hash.
    Secp256,
    /// 384-bit curve, 12 words per hash.
    Secp384,
}

impl HashType {
    pub fn word_count(self) -> usize {
        match self {
            HashType::Secp256 => 8,
            HashType::Secp384 => 12,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(HashType::Secp256),
            1 => Some(HashType::Secp384),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            HashType::Secp256 => 0,
            HashType::Secp384 => 1,
        }
    }
}

/// Which owner a root hash belongs to. The static owner fills slots from
/// slot 0 upward; secondary owners claim the last slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Owner {
    Static,
    SecondaryPr,
    SecondaryExtAuth,
}

impl Owner {
    pub fn is_secondary(self) -> bool {
        !matches!(self, Owner::Static)
    }
}

/// One decoded owner root-hash slot.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RootHashSlot {
    pub hash: Vec<u32>,
    pub cancelled: bool,
    pub expkey_cancelled: bool,
}

impl RootHashSlot {
    fn cancel_word(&self) -> u32 {
        let mut flags = CancelFlags::empty();
        flags.set(CancelFlags::SLOT_CANCELLED, self.cancelled);
        flags.set(CancelFlags::EXPKEY_CANCELLED, self.expkey_cancelled);
        flags.bits()
    }
}

/// A decoded PROVISION_STATUS response.
///
/// Wire framing: the header's value divided by 4096 declares the payload
/// word count. Fixed head of 3 words, then `hash_count + 1` repetitions of
/// hash words plus a cancellation word, then the fixed tail (big counter,
/// SVNs, key-slot-status words; the tail width differs between firmware
/// revisions).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ProvisioningStatus {
    pub status: u32,
    pub intel_cancellation: u32,
    pub cosign: bool,
    pub hash_type: HashType,
    /// Index of the highest populated slot; the wire always carries
    /// `hash_count + 1` slots, slot 0 included.
    pub hash_count: u32,
    pub slots: Vec<RootHashSlot>,
    pub big_counter_base: u32,
    pub big_counter_value: u32,
    pub svn: [u8; 4],
    pub key_slot_status: Vec<u32>,
}

/// Key-slot-status tail width per firmware revision.
fn key_slot_status_words(rev: FirmwareRev) -> usize {
    match rev {
        FirmwareRev::RevA => 1,
        FirmwareRev::RevB => 2,
    }
}

impl ProvisioningStatus {
    pub fn decode(words: &[u32], rev: FirmwareRev) -> ScoreboardResult<Self> {
        let Some((&header, payload)) = words.split_first() else {
            return Err(ScoreboardError::MalformedResponse {
                declared: 1,
                actual: 0,
            });
        };
        // Length lives at [23:12]; the id/client bits above it are echo.
        let declared = bits(header, 23, 12);
        if payload.len() as u32 != declared {
            return Err(ScoreboardError::MalformedResponse {
                declared,
                actual: payload.len() as u32,
            });
        }

        let malformed = || ScoreboardError::MalformedResponse {
            declared,
            actual: payload.len() as u32,
        };
        if payload.len() < 3 {
            return Err(malformed());
        }
        let status = payload[0];
        let intel_cancellation = payload[1];
        let packed = payload[2];
        let cosign = bits(packed, 0, 0) != 0;
        let hash_type = HashType::from_wire(bits(packed, 7, 4)).ok_or_else(malformed)?;
        let hash_count = bits(packed, 11, 8);

        let hash_words = hash_type.word_count();
        let slot_words = hash_words + 1;
        let tail_words = 3 + key_slot_status_words(rev);
        let expected_len = 3 + (hash_count as usize + 1) * slot_words + tail_words;
        if payload.len() != expected_len {
            return Err(malformed());
        }

        let mut slots = Vec::with_capacity(hash_count as usize + 1);
        let mut cursor = 3;
        for _ in 0..=hash_count {
            let hash = payload[cursor..cursor + hash_words].to_vec();
            let cancel = CancelFlags::from_bits_truncate(payload[cursor + hash_words]);
            slots.push(RootHashSlot {
                hash,
                cancelled: cancel.contains(CancelFlags::SLOT_CANCELLED),
                expkey_cancelled: cancel.contains(CancelFlags::EXPKEY_CANCELLED),
            });
            cursor += slot_words;
        }

        let big_counter_base = payload[cursor];
        let big_counter_value = payload[cursor + 1];
        let svn = payload[cursor + 2].to_le_bytes();
        let key_slot_status = payload[cursor + 3..].to_vec();

        Ok(ProvisioningStatus {
            status,
            intel_cancellation,
            cosign,
            hash_type,
            hash_count,
            slots,
            big_counter_base,
            big_counter_value,
            svn,
            key_slot_status,
        })
    }

    /// Wire form, header first. Inverse of `decode`; the simulated SDM and
    /// the framing tests are built on it.
    pub fn encode(&self) -> Vec<u32> {
        let mut payload = vec![
            self.status,
            self.intel_cancellation,
            (self.cosign as u32)
                | (self.hash_type.to_wire() << 4)
                | ((self.hash_count & 0xF) << 8),
        ];
        for slot in &self.slots {
            payload.extend_from_slice(&slot.hash);
            payload.push(slot.cancel_word());
        }
        payload.push(self.big_counter_base);
        payload.push(self.big_counter_value);
        payload.push(u32::from_le_bytes(self.svn));
        payload.extend_from_slice(&self.key_slot_status);

        let mut words = vec![(payload.len() as u32) * 4096];
        words.extend_from_slice(&payload);
        words
    }
}

/// A provisioning command whose deterministic effect on the expectation
/// the scoreboard models.
#[derive(Debug, Clone)]
pub enum ProvisionOp<'a> {
    ProgramRootHash {
        owner: Owner,
        hash: &'a [u32],
        /// Leave the remaining slots open for later owners instead of
        /// cancelling them.
        late_provision: bool,
    },
    CancelIntelKey {
        key_id: u32,
    },
    CancelOwnerSlot {
        slot: usize,
        explicit_key: bool,
    },
    EnableCosign,
    IncrementBigCounter {
        ticks: u32,
    },
}

/// Expected slot state plus the owner bookkeeping the wire does not carry.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ExpectedSlot {
    pub hash: Vec<u32>,
    pub cancelled: bool,
    pub expkey_cancelled: bool,
    pub owner: Option<Owner>,
}

impl ExpectedSlot {
    fn is_empty(&self) -> bool {
        self.owner.is_none() && !self.cancelled && self.hash.iter().all(|&w| w == 0)
    }
}

/// Expected provisioning state for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningExpectation {
    /// Skip all provisioning comparison for this device.
    pub skip: bool,
    pub status: Expect<u32>,
    pub intel_cancellation: u32,
    pub cosign: bool,
    pub hash_type: HashType,
    pub hash_count: u32,
    pub slots: Vec<ExpectedSlot>,
    pub big_counter_base: u32,
    pub big_counter_value: u32,
    pub svn: [u8; 4],
    pub key_slot_status: Vec<u32>,
    family: DeviceFamily,
    rev: FirmwareRev,
}

impl ProvisioningExpectation {
    pub fn new(family: DeviceFamily, rev: FirmwareRev) -> Self {
        let hash_type = match family {
            DeviceFamily::Gen1 => HashType::Secp256,
            DeviceFamily::Gen2 => HashType::Secp384,
        };
        Self {
            skip: false,
            status: Expect::NoErrorSentinel,
            intel_cancellation: 0,
            cosign: false,
            hash_type,
            hash_count: 0,
            slots: vec![
                ExpectedSlot {
                    hash: vec![0; hash_type.word_count()],
                    ..Default::default()
                };
                family.rh_slot_count()
            ],
            big_counter_base: 0,
            big_counter_value: 0,
            svn: [0; 4],
            key_slot_status: vec![0; key_slot_status_words(rev)],
            family,
            rev,
        }
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    /// Advance the expectation for a provisioning command that succeeded.
    pub fn apply_effect(
        &mut self,
        side: &mut ScoreboardSideState,
        op: &ProvisionOp,
    ) -> ScoreboardResult<()> {
        match *op {
            ProvisionOp::ProgramRootHash {
                owner,
                hash,
                late_provision,
            } => self.program_root_hash(side, owner, hash, late_provision),
            ProvisionOp::CancelIntelKey { key_id } => {
                self.intel_cancellation |= 1 << key_id;
                Ok(())
            }
            ProvisionOp::CancelOwnerSlot { slot, explicit_key } => {
                let slot = self
                    .slots
                    .get_mut(slot)
                    .ok_or(ScoreboardError::NoFreeSlot)?;
                if explicit_key {
                    slot.expkey_cancelled = true;
                } else {
                    slot.cancelled = true;
                }
                Ok(())
            }
            ProvisionOp::EnableCosign => {
                self.cosign = true;
                if side.secondary_ownership_pk {
                    side.sec_owner_auth_flag = true;
                }
                Ok(())
            }
            ProvisionOp::IncrementBigCounter { ticks } => {
                // The physical counter pegs at all-ones; never panic on a
                // hostile tick count.
                self.big_counter_value = self.big_counter_value.saturating_add(ticks);
                Ok(())
            }
        }
    }

    fn program_root_hash(
        &mut self,
        side: &mut ScoreboardSideState,
        owner: Owner,
        hash: &[u32],
        late_provision: bool,
    ) -> ScoreboardResult<()> {
        let last = self.slots.len() - 1;

        // An owner that already holds a slot re-programs in place; fuse
        // bits only set, so the stored hash is the OR of old and new.
        let target = if let Some(i) = self.slots.iter().position(|s| s.owner == Some(owner)) {
            i
        } else if !owner.is_secondary() {
            self.slots
                .iter()
                .position(|s| s.is_empty())
                .ok_or(ScoreboardError::NoFreeSlot)?
        } else if self.slots[last].is_empty() {
            last
        } else if self.slots[last]
            .owner
            .is_some_and(|o| o.is_secondary() && o != owner)
        {
            // Firmware quirk, reproduced bit-exactly: when another
            // secondary owner already holds the last slot, its hash is
            // shifted down one slot and the write re-targets the last.
            if !self.slots[last - 1].is_empty() {
                return Err(ScoreboardError::NoFreeSlot);
            }
            debug!("secondary-owner collision: shifting slot {last} down to {}", last - 1);
            self.slots[last - 1] = self.slots[last].clone();
            self.slots[last] = ExpectedSlot {
                hash: vec![0; self.hash_type.word_count()],
                ..Default::default()
            };
            last
        } else {
            return Err(ScoreboardError::NoFreeSlot);
        };

        let slot = &mut self.slots[target];
        slot.owner = Some(owner);
        for (old, &new) in slot.hash.iter_mut().zip(hash) {
            *old = fwval_efuse::program_word(*old, new);
        }

        if owner == Owner::Static && !late_provision {
            for s in self.slots.iter_mut().filter(|s| s.is_empty()) {
                s.cancelled = true;
            }
        }
        match owner {
            Owner::Static => {}
            Owner::SecondaryPr => {
                side.secondary_ownership_pk = true;
                side.pr_root_hash_provisioned = true;
            }
            Owner::SecondaryExtAuth => {
                side.secondary_ownership_pk = true;
                side.ext_auth_root_hash_provisioned = true;
            }
        }

        // Slots are only ever consumed, never freed.
        let populated = self
            .slots
            .iter()
            .rposition(|s| !s.hash.iter().all(|&w| w == 0))
            .unwrap_or(0) as u32;
        self.hash_count = self.hash_count.max(populated);
        Ok(())
    }

    /// Compare a decoded provisioning response against this expectation.
    pub fn verify(&self, measured: &ProvisioningStatus) -> Vec<Mismatch> {
        if self.skip {
            return Vec::new();
        }
        let mut mismatches = Vec::new();
        let mut push = |field: &'static str, expected: String, value: String| {
            let m = Mismatch {
                field,
                expected,
                measured: value,
            };
            warn!("provisioning mismatch: {m}");
            mismatches.push(m);
        };

        if !self.status.matches(measured.status) {
            push(
                "PROVISION_STATUS",
                self.status.to_string(),
                format!("0x{:08X}", measured.status),
            );
        }
        if measured.intel_cancellation != self.intel_cancellation {
            push(
                "INTEL_CANCELLATION",
                format!("0x{:08X}", self.intel_cancellation),
                format!("0x{:08X}", measured.intel_cancellation),
            );
        }
        if measured.cosign != self.cosign {
            push(
                "COSIGN",
                self.cosign.to_string(),
                measured.cosign.to_string(),
            );
        }
        if measured.hash_type != self.hash_type {
            push(
                "HASH_TYPE",
                format!("{:?}", self.hash_type),
                format!("{:?}", measured.hash_type),
            );
        }
        if measured.hash_count != self.hash_count {
            push(
                "HASH_COUNT",
                self.hash_count.to_string(),
                measured.hash_count.to_string(),
            );
        }
        for (i, m_slot) in measured.slots.iter().enumerate() {
            let Some(e_slot) = self.slots.get(i) else {
                push(
                    "RH_SLOT_COUNT",
                    self.slots.len().to_string(),
                    measured.slots.len().to_string(),
                );
                break;
            };
            if m_slot.hash != e_slot.hash {
                push(
                    slot_field_name(i),
                    format!("{:08X?}", e_slot.hash),
                    format!("{:08X?}", m_slot.hash),
                );
            }
            if m_slot.cancelled != e_slot.cancelled
                || m_slot.expkey_cancelled != e_slot.expkey_cancelled
            {
                push(
                    slot_cancel_field_name(i),
                    format!("{:?}", (e_slot.cancelled, e_slot.expkey_cancelled)),
                    format!("{:?}", (m_slot.cancelled, m_slot.expkey_cancelled)),
                );
            }
        }
        if measured.big_counter_base != self.big_counter_base {
            push(
                "BIG_COUNTER_BASE",
                self.big_counter_base.to_string(),
                measured.big_counter_base.to_string(),
            );
        }
        if measured.big_counter_value != self.big_counter_value {
            push(
                "BIG_COUNTER_VALUE",
                self.big_counter_value.to_string(),
                measured.big_counter_value.to_string(),
            );
        }
        if measured.svn != self.svn {
            push(
                "SVN",
                format!("{:?}", self.svn),
                format!("{:?}", measured.svn),
            );
        }
        if measured.key_slot_status != self.key_slot_status {
            push(
                "KEY_SLOT_STATUS",
                format!("{:08X?}", self.key_slot_status),
                format!("{:08X?}", measured.key_slot_status),
            );
        }
        mismatches
    }

    /// The wire image of this expectation, used by the simulated SDM.
    pub fn to_status(&self) -> ProvisioningStatus {
        ProvisioningStatus {
            status: match self.status {
                Expect::Exact(v) => v,
                _ => 0,
            },
            intel_cancellation: self.intel_cancellation,
            cosign: self.cosign,
            hash_type: self.hash_type,
            hash_count: self.hash_count,
            slots: self.slots[..=self.hash_count as usize]
                .iter()
                .map(|s| RootHashSlot {
                    hash: s.hash.clone(),
                    cancelled: s.cancelled,
                    expkey_cancelled: s.expkey_cancelled,
                })
                .collect(),
            big_counter_base: self.big_counter_base,
            big_counter_value: self.big_counter_value,
            svn: self.svn,
            key_slot_status: self.key_slot_status.clone(),
        }
    }
}

fn slot_field_name(i: usize) -> &'static str {
    const NAMES: [&str; 5] = [
        "RH_SLOT0_HASH",
        "RH_SLOT1_HASH",
        "RH_SLOT2_HASH",
        "RH_SLOT3_HASH",
        "RH_SLOT4_HASH",
    ];
    NAMES.get(i).copied().unwrap_or("RH_SLOT_HASH")
}

fn slot_cancel_field_name(i: usize) -> &'static str {
    const NAMES: [&str; 5] = [
        "RH_SLOT0_CANCEL",
        "RH_SLOT1_CANCEL",
        "RH_SLOT2_CANCEL",
        "RH_SLOT3_CANCEL",
        "RH_SLOT4_CANCEL",
    ];
    NAMES.get(i).copied().unwrap_or("RH_SLOT_CANCEL")
}
