// Licensed under the Apache-2.0 license

use crate::{Expect, Mismatch, ScoreboardError, ScoreboardResult};
use fwval_api::bits::bits;
use fwval_api::{FirmwareRev, ResponsePacket};
use log::warn;

/// Configuration stage the device reports through CONFIG_STATUS /
/// RECONFIG_STATUS. Discriminated by payload length: exactly one data word
/// means the boot ROM answered, four or more means the CMF did.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stage {
    Bootrom,
    Cmf,
}

/// Position of one named field inside a CMF-stage status payload.
#[derive(Copy, Clone, Debug)]
pub struct CmfFieldSpec {
    pub name: &'static str,
    pub word: usize,
    pub hi: u32,
    pub lo: u32,
}

const fn f(name: &'static str, word: usize, hi: u32, lo: u32) -> CmfFieldSpec {
    CmfFieldSpec { name, word, hi, lo }
}

// Payload words of a CMF-stage response:
//   0 state, 1 version, 2 pin status, 3 done/error flags,
//   4 error location, 5 error details.
static CMF_LAYOUT_REV_A: &[CmfFieldSpec] = &[
    f("STATE", 0, 31, 0),
    f("VERSION", 1, 31, 0),
    f("NSTATUS", 2, 0, 0),
    f("NCONFIG", 2, 1, 1),
    f("MSEL_LATCHED", 2, 7, 4),
    // RevA reports POR wait in the pin word.
    f("POR_WAIT", 2, 8, 8),
    f("CONFIG_DONE", 3, 0, 0),
    f("INIT_DONE", 3, 1, 1),
    f("CVP_DONE", 3, 2, 2),
    f("SEU_ERROR", 3, 3, 3),
    f("TRAMP_DSBLE", 3, 4, 4),
    f("BETALOADER", 3, 5, 5),
    f("PROVISION_CMF", 3, 6, 6),
    f("ERROR_LOCATION", 4, 31, 0),
    f("ERROR_DETAILS", 5, 31, 0),
];

static CMF_LAYOUT_REV_B: &[CmfFieldSpec] = &[
    f("STATE", 0, 31, 0),
    f("VERSION", 1, 31, 0),
    f("NSTATUS", 2, 0, 0),
    f("NCONFIG", 2, 1, 1),
    f("MSEL_LATCHED", 2, 7, 4),
    f("CONFIG_DONE", 3, 0, 0),
    f("INIT_DONE", 3, 1, 1),
    f("CVP_DONE", 3, 2, 2),
    f("SEU_ERROR", 3, 3, 3),
    // RevB moved POR wait into the flags word and shifted the tail bits.
    f("POR_WAIT", 3, 4, 4),
    f("TRAMP_DSBLE", 3, 5, 5),
    f("BETALOADER", 3, 6, 6),
    f("PROVISION_CMF", 3, 7, 7),
    f("ERROR_LOCATION", 4, 31, 0),
    f("ERROR_DETAILS", 5, 31, 0),
];

/// Decode table for a CMF-stage payload, selected once per session.
pub fn cmf_layout(rev: FirmwareRev) -> &'static [CmfFieldSpec] {
    match rev {
        FirmwareRev::RevA => CMF_LAYOUT_REV_A,
        FirmwareRev::RevB => CMF_LAYOUT_REV_B,
    }
}

/// A decoded configuration-status response.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConfigStatus {
    pub stage: Stage,
    pub words: Vec<u32>,
}

impl ConfigStatus {
    pub fn decode(resp: &ResponsePacket) -> ScoreboardResult<Self> {
        let stage = match resp.payload.len() {
            1 => Stage::Bootrom,
            n if n >= 4 => Stage::Cmf,
            n => return Err(ScoreboardError::UnknownStageLength(n as u32)),
        };
        Ok(ConfigStatus {
            stage,
            words: resp.payload.clone(),
        })
    }

    /// Extract a field; words past the end of a short payload read as zero.
    pub fn field(&self, spec: &CmfFieldSpec) -> u32 {
        let word = self.words.get(spec.word).copied().unwrap_or(0);
        bits(word, spec.hi, spec.lo)
    }
}

/// Comparison knobs for one verification pass.
#[derive(Copy, Clone, Debug, Default)]
pub struct VerifyPolicy {
    /// CMF version numbers are not modeled faithfully by every simulator.
    pub skip_version_check: bool,
    /// After an ambiguous partial-reconfiguration failure, CONFIG_DONE and
    /// INIT_DONE are indeterminate and excluded.
    pub skip_done_bits: bool,
    /// Escalate the first mismatch to a hard error.
    pub strict: bool,
}

/// Expected configuration state, mutated by the orchestrator after every
/// state-changing operation and compared against each decoded response.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigStatusExpectation {
    pub stage: Stage,
    pub state: Expect<u32>,
    pub version: Expect<u32>,
    pub nstatus: Expect<u32>,
    pub nconfig: Expect<u32>,
    pub msel_latched: Expect<u32>,
    pub config_done: Expect<u32>,
    pub init_done: Expect<u32>,
    pub cvp_done: Expect<u32>,
    pub seu_error: Expect<u32>,
    pub por_wait: Expect<u32>,
    pub tramp_dsble: Expect<u32>,
    pub betaloader: Expect<u32>,
    pub provision_cmf: Expect<u32>,
    pub error_location: Expect<u32>,
    pub error_details: Expect<u32>,
}

impl ConfigStatusExpectation {
    /// Fresh-out-of-reset expectation: boot ROM stage, nothing configured.
    pub fn new() -> Self {
        Self {
            stage: Stage::Bootrom,
            state: Expect::NoErrorSentinel,
            version: Expect::DontCare,
            nstatus: Expect::DontCare,
            nconfig: Expect::DontCare,
            msel_latched: Expect::DontCare,
            config_done: Expect::Exact(0),
            init_done: Expect::Exact(0),
            cvp_done: Expect::DontCare,
            seu_error: Expect::NoErrorSentinel,
            por_wait: Expect::DontCare,
            tramp_dsble: Expect::DontCare,
            betaloader: Expect::DontCare,
            provision_cmf: Expect::DontCare,
            error_location: Expect::NoErrorSentinel,
            error_details: Expect::NoErrorSentinel,
        }
    }

    pub fn field(&self, name: &str) -> Option<Expect<u32>> {
        Some(match name {
            "STATE" => self.state,
            "VERSION" => self.version,
            "NSTATUS" => self.nstatus,
            "NCONFIG" => self.nconfig,
            "MSEL_LATCHED" => self.msel_latched,
            "CONFIG_DONE" => self.config_done,
            "INIT_DONE" => self.init_done,
            "CVP_DONE" => self.cvp_done,
            "SEU_ERROR" => self.seu_error,
            "POR_WAIT" => self.por_wait,
            "TRAMP_DSBLE" => self.tramp_dsble,
            "BETALOADER" => self.betaloader,
            "PROVISION_CMF" => self.provision_cmf,
            "ERROR_LOCATION" => self.error_location,
            "ERROR_DETAILS" => self.error_details,
            _ => return None,
        })
    }

    /// A successful image send moves the device into the CMF stage with
    /// both done pins released.
    pub fn image_sent(&mut self) {
        self.stage = Stage::Cmf;
        self.state = Expect::NoErrorSentinel;
        self.config_done = Expect::Exact(1);
        self.init_done = Expect::Exact(1);
        self.error_location = Expect::NoErrorSentinel;
        self.error_details = Expect::NoErrorSentinel;
    }

    /// A rejected or corrupted image leaves the device reporting an error.
    pub fn image_failed(&mut self) {
        self.stage = Stage::Cmf;
        self.state = Expect::ErrorSentinel;
        self.config_done = Expect::Exact(0);
        self.init_done = Expect::Exact(0);
        self.error_location = Expect::ErrorSentinel;
        self.error_details = Expect::DontCare;
    }

    pub fn power_cycled(&mut self) {
        *self = Self::new();
    }

    /// nconfig deassertion drops the device back to the boot ROM without a
    /// power cycle.
    pub fn nconfig_deasserted(&mut self) {
        self.stage = Stage::Bootrom;
        self.state = Expect::NoErrorSentinel;
        self.nconfig = Expect::Exact(0);
        self.config_done = Expect::Exact(0);
        self.init_done = Expect::Exact(0);
    }

    /// Compare a decoded response field-by-field. All mismatches are
    /// collected; strict mode turns the first into a hard error.
    pub fn verify(
        &self,
        measured: &ConfigStatus,
        rev: FirmwareRev,
        policy: VerifyPolicy,
    ) -> ScoreboardResult<Vec<Mismatch>> {
        let mut mismatches = Vec::new();
        let mut push = |field: &'static str, expected: String, measured_val: String| {
            let m = Mismatch {
                field,
                expected,
                measured: measured_val,
            };
            warn!("config status mismatch: {m}");
            mismatches.push(m);
        };

        if measured.stage != self.stage {
            push(
                "STAGE",
                format!("{:?}", self.stage),
                format!("{:?}", measured.stage),
            );
        } else if measured.stage == Stage::Bootrom {
            let state = measured.words[0];
            if !self.state.matches(state) {
                push("STATE", self.state.to_string(), format!("0x{state:08X}"));
            }
        } else {
            for spec in cmf_layout(rev) {
                if policy.skip_version_check && spec.name == "VERSION" {
                    continue;
                }
                if policy.skip_done_bits
                    && (spec.name == "CONFIG_DONE" || spec.name == "INIT_DONE")
                {
                    continue;
                }
                // Layout names are the expectation's own field inventory.
                let expected = self.field(spec.name).unwrap();
                let value = measured.field(spec);
                if !expected.matches(value) {
                    push(spec.name, expected.to_string(), format!("0x{value:X}"));
                }
            }
        }

        if policy.strict {
            if let Some(first) = mismatches.first().cloned() {
                return Err(ScoreboardError::StrictMismatch(first));
            }
        }
        Ok(mismatches)
    }
}

impl Default for ConfigStatusExpectation {
    fn default() -> Self {
        Self::new()
    }
}
