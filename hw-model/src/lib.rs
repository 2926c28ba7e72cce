// Licensed under the Apache-2.0 license

//! Session orchestration over an SDM mailbox transport.
//!
//! The protocol is strictly synchronous request/reply: one command is
//! outstanding at a time and the session owns the transport exclusively.
//! Every state-changing operation updates the expectation scoreboard
//! immediately after the command it issued succeeds, never speculatively.

mod model_sim;
mod session;

pub use model_sim::ModelSim;
pub use session::{EfuseWriteOptions, SdmSession};

use fwval_api::FwvalApiError;
use fwval_scoreboard::ScoreboardError;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TransportError {
    /// No response arrived within the command-class timeout.
    Timeout,
    Link(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "command timed out"),
            TransportError::Link(msg) => write!(f, "link error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// The device link. Implementations move words; they never interpret them.
pub trait Transport {
    fn send(&mut self, words: &[u32], timeout: Duration) -> Result<Vec<u32>, TransportError>;

    fn is_busy(&self) -> bool {
        false
    }

    /// Hook for transports that also control the power connector.
    fn power_cycle(&mut self) {}
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ModelError {
    Api(FwvalApiError),
    Scoreboard(ScoreboardError),
    Transport(TransportError),
    /// A physical fuse burn was attempted while still write-protected, or a
    /// write touched bits the region tables forbid. The real-hardware
    /// action is irreversible, so this always aborts.
    PolicyViolation(String),
    /// A command timed out earlier; the device state is unknown until a
    /// power cycle or eFuse cache reload.
    SessionPoisoned,
    /// Read-back after an eFuse write did not match what was written.
    FuseReadbackMismatch {
        addr: u32,
        wrote: u32,
        read: u32,
    },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Api(e) => write!(f, "protocol error: {e:?}"),
            ModelError::Scoreboard(e) => write!(f, "scoreboard error: {e:?}"),
            ModelError::Transport(e) => write!(f, "{e}"),
            ModelError::PolicyViolation(msg) => write!(f, "policy violation: {msg}"),
            ModelError::SessionPoisoned => {
                write!(f, "session poisoned by an earlier timeout; recover first")
            }
            ModelError::FuseReadbackMismatch { addr, wrote, read } => write!(
                f,
                "fuse readback mismatch at 0x{addr:08X}: wrote 0x{wrote:08X}, read 0x{read:08X}"
            ),
        }
    }
}

impl std::error::Error for ModelError {}

impl From<FwvalApiError> for ModelError {
    fn from(e: FwvalApiError) -> Self {
        ModelError::Api(e)
    }
}

impl From<ScoreboardError> for ModelError {
    fn from(e: ScoreboardError) -> Self {
        ModelError::Scoreboard(e)
    }
}

impl From<TransportError> for ModelError {
    fn from(e: TransportError) -> Self {
        ModelError::Transport(e)
    }
}

/// Timeout class of a command. Reconfiguration is orders of magnitude
/// slower than a status poll; eFuse sequences sit in between.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandClass {
    Sync,
    Status,
    Reconfig,
    Efuse,
    Provision,
}

/// What the transport is attached to. Cycle-accurate simulation runs the
/// same protocol at a fraction of real-time speed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Platform {
    Hardware,
    Simulator,
}

impl Platform {
    fn timeout_multiplier(self) -> u32 {
        match self {
            Platform::Hardware => 1,
            Platform::Simulator => 100,
        }
    }
}

pub fn command_timeout(class: CommandClass, platform: Platform) -> Duration {
    let base = match class {
        CommandClass::Sync => Duration::from_millis(500),
        CommandClass::Status => Duration::from_secs(2),
        CommandClass::Reconfig => Duration::from_secs(30),
        CommandClass::Efuse => Duration::from_secs(10),
        CommandClass::Provision => Duration::from_secs(10),
    };
    base * platform.timeout_multiplier()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulator_timeouts_are_scaled() {
        let hw = command_timeout(CommandClass::Status, Platform::Hardware);
        let sim = command_timeout(CommandClass::Status, Platform::Simulator);
        assert_eq!(sim, hw * 100);
        assert!(
            command_timeout(CommandClass::Reconfig, Platform::Hardware)
                > command_timeout(CommandClass::Sync, Platform::Hardware)
        );
    }
}
