// Licensed under the Apache-2.0 license

/// Flags no single response can reveal; they track what the orchestrator
/// itself has done this session. Restored (not cleared) from the session
/// backup on power-cycle and eFuse-cache reload.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ScoreboardSideState {
    /// A secondary-ownership public key has been introduced.
    pub secondary_ownership_pk: bool,
    /// Secondary-owner authentication took effect (cosign enabled after a
    /// secondary key was provisioned).
    pub sec_owner_auth_flag: bool,
    pub pr_root_hash_provisioned: bool,
    pub ext_auth_root_hash_provisioned: bool,
}
