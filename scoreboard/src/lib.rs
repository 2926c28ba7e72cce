// Licensed under the Apache-2.0 license

//! Expected-state scoreboards for SDM configuration and provisioning.
//!
//! The framework keeps an independent model of what the device should
//! report and compares it field-by-field against every decoded response.
//! Mismatches are collected, never short-circuited, so one verification
//! pass reports every discrepancy.

mod config_status;
mod expect;
mod provisioning;
mod rsu_status;
mod side_state;

pub use config_status::{
    cmf_layout, CmfFieldSpec, ConfigStatus, ConfigStatusExpectation, Stage, VerifyPolicy,
};
pub use expect::Expect;
pub use provisioning::{
    CancelFlags, ExpectedSlot, HashType, Owner, ProvisionOp, ProvisioningExpectation,
    ProvisioningStatus, RootHashSlot,
};
pub use rsu_status::{RsuStatus, RsuStatusExpectation};
pub use side_state::ScoreboardSideState;

use fwval_api::{DeviceFamily, FirmwareRev};

/// One expected-vs-measured discrepancy, with both values rendered for the
/// log.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Mismatch {
    pub field: &'static str,
    pub expected: String,
    pub measured: String,
}

impl core::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}: expected {}, measured {}",
            self.field, self.expected, self.measured
        )
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ScoreboardError {
    /// Response framing disagrees with its declared length.
    MalformedResponse { declared: u32, actual: u32 },
    /// Payload word count matches no known configuration stage.
    UnknownStageLength(u32),
    /// Strict mode escalated the first mismatch.
    StrictMismatch(Mismatch),
    /// An effect was applied that the slot model cannot represent.
    NoFreeSlot,
}

pub type ScoreboardResult<T> = Result<T, ScoreboardError>;

/// The whole expectation state for one device session: both scoreboards
/// plus the side flags no single response can reveal. `snapshot`/`restore`
/// give the orchestrator the reset-to-backup behavior that power cycles
/// and eFuse cache reloads require.
#[derive(Debug, Clone, PartialEq)]
pub struct Scoreboard {
    pub config: ConfigStatusExpectation,
    pub rsu: RsuStatusExpectation,
    pub provisioning: ProvisioningExpectation,
    pub side: ScoreboardSideState,
}

/// An opaque backup of the scoreboard, taken at session start.
#[derive(Debug, Clone)]
pub struct Snapshot(Scoreboard);

impl Snapshot {
    pub fn scoreboard(&self) -> &Scoreboard {
        &self.0
    }
}

impl Scoreboard {
    pub fn new(family: DeviceFamily, rev: FirmwareRev) -> Self {
        Self {
            config: ConfigStatusExpectation::new(),
            rsu: RsuStatusExpectation::new(),
            provisioning: ProvisioningExpectation::new(family, rev),
            side: ScoreboardSideState::default(),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.clone())
    }

    /// Restore, not clear: the backup may itself carry non-zero state
    /// (e.g. which slot is next) that must survive reset events.
    pub fn restore(&mut self, snapshot: &Snapshot) {
        *self = snapshot.0.clone();
    }
}
