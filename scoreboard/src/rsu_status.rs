// Licensed under the Apache-2.0 license

use crate::{Expect, Mismatch, ScoreboardError, ScoreboardResult};
use fwval_api::ResponsePacket;
use log::warn;

/// A decoded RSU_STATUS response.
///
/// The report carries the remote-system-update image bookkeeping: the
/// 64-bit flash addresses of the running image and the last image that
/// failed, split into low/high words on the wire. The boot ROM answers
/// with a single status word; the report is only available from the CMF.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RsuStatus {
    Unavailable,
    Report {
        current_image: [u32; 2],
        last_fail_image: [u32; 2],
        state: u32,
        version: u32,
        error_location: u32,
        error_details: u32,
    },
}

impl RsuStatus {
    pub fn decode(resp: &ResponsePacket) -> ScoreboardResult<Self> {
        let p = &resp.payload;
        match p.len() {
            1 => Ok(RsuStatus::Unavailable),
            n if n >= 8 => Ok(RsuStatus::Report {
                current_image: [p[0], p[1]],
                last_fail_image: [p[2], p[3]],
                state: p[4],
                version: p[5],
                error_location: p[6],
                error_details: p[7],
            }),
            n => Err(ScoreboardError::UnknownStageLength(n as u32)),
        }
    }
}

/// Expected RSU report state.
///
/// ERROR_LOCATION and ERROR_DETAILS are informational and never compared;
/// VERSION is compared only when the caller asks for it, since not every
/// platform models it faithfully.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RsuStatusExpectation {
    /// False while the device still answers from the boot ROM, where the
    /// report does not exist yet.
    pub available: bool,
    pub current_image: [Expect<u32>; 2],
    pub last_fail_image: [Expect<u32>; 2],
    pub state: Expect<u32>,
    pub version: Expect<u32>,
}

impl RsuStatusExpectation {
    pub fn new() -> Self {
        Self {
            available: false,
            current_image: [Expect::Exact(0); 2],
            last_fail_image: [Expect::Exact(0); 2],
            state: Expect::NoErrorSentinel,
            version: Expect::DontCare,
        }
    }

    /// Compare a decoded report field-by-field, collecting every mismatch.
    pub fn verify(&self, measured: &RsuStatus, check_version: bool) -> Vec<Mismatch> {
        let mut mismatches = Vec::new();
        let mut push = |field: &'static str, expected: String, value: String| {
            let m = Mismatch {
                field,
                expected,
                measured: value,
            };
            warn!("rsu status mismatch: {m}");
            mismatches.push(m);
        };

        let RsuStatus::Report {
            current_image,
            last_fail_image,
            state,
            version,
            ..
        } = measured
        else {
            if self.available {
                push(
                    "RSU_AVAILABLE",
                    "report".to_string(),
                    "unavailable".to_string(),
                );
            }
            return mismatches;
        };
        if !self.available {
            push(
                "RSU_AVAILABLE",
                "unavailable".to_string(),
                "report".to_string(),
            );
            return mismatches;
        }

        let named = [
            ("CURRENT_IMAGE_0", self.current_image[0], current_image[0]),
            ("CURRENT_IMAGE_1", self.current_image[1], current_image[1]),
            ("LAST_FAIL_IMAGE_0", self.last_fail_image[0], last_fail_image[0]),
            ("LAST_FAIL_IMAGE_1", self.last_fail_image[1], last_fail_image[1]),
            ("RSU_STATE", self.state, *state),
        ];
        for (name, expected, value) in named {
            if !expected.matches(value) {
                push(name, expected.to_string(), format!("0x{value:08X}"));
            }
        }
        if check_version && !self.version.matches(*version) {
            push(
                "RSU_VERSION",
                self.version.to_string(),
                format!("0x{version:08X}"),
            );
        }
        mismatches
    }
}

impl Default for RsuStatusExpectation {
    fn default() -> Self {
        Self::new()
    }
}
