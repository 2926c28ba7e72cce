// Licensed under the Apache-2.0 license

use crate::{command_timeout, CommandClass, ModelError, Platform, Transport, TransportError};
use fwval_api::{
    decode_response, CommandPacket, DeviceFamily, FirmwareRev, MailboxClient, Opcode,
    ResponsePacket,
};
use fwval_efuse::{mask_out, region_mask, would_clear_bits, EfuseAddress, Region};
use fwval_scoreboard::{
    ConfigStatus, Mismatch, Owner, ProvisionOp, ProvisioningStatus, RsuStatus, Scoreboard,
    Snapshot, VerifyPolicy,
};
use log::{debug, info};

pub type SessionResult<T> = Result<T, ModelError>;

/// Options for the eFuse write helpers.
///
/// The defaults are the safe ones: gap and security ranges masked out and
/// the write performed virtually (non-destructive eFuse-cache write).
#[derive(Copy, Clone, Debug)]
pub struct EfuseWriteOptions {
    /// Zero every bit the GAP table lists before writing.
    pub no_gap: bool,
    /// Zero every bit the SECURITY table lists before writing.
    pub no_security: bool,
    /// Write the shadow cache only; a physical burn additionally requires
    /// write protection to have been disabled this power cycle.
    pub virtual_write: bool,
}

impl Default for EfuseWriteOptions {
    fn default() -> Self {
        Self {
            no_gap: true,
            no_security: true,
            virtual_write: true,
        }
    }
}

/// One device session over an exclusively-owned transport.
///
/// Exactly one command is outstanding at a time. The scoreboard is mutated
/// only by this call path, immediately after a command it issued succeeds.
pub struct SdmSession<T: Transport> {
    transport: T,
    platform: Platform,
    family: DeviceFamily,
    rev: FirmwareRev,
    pub scoreboard: Scoreboard,
    backup: Snapshot,
    next_id: u32,
    fuse_write_enabled: bool,
    poisoned: bool,
}

impl<T: Transport> SdmSession<T> {
    pub fn new(transport: T, family: DeviceFamily, rev: FirmwareRev, platform: Platform) -> Self {
        let scoreboard = Scoreboard::new(family, rev);
        let backup = scoreboard.snapshot();
        info!("session start: {family:?} {rev:?} on {platform:?}");
        Self {
            transport,
            platform,
            family,
            rev,
            scoreboard,
            backup,
            next_id: 1,
            fuse_write_enabled: false,
            poisoned: false,
        }
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    pub fn rev(&self) -> FirmwareRev {
        self.rev
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // Id 0 stays reserved for SYNC.
    fn take_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = if self.next_id == 0xF { 1 } else { self.next_id + 1 };
        id
    }

    fn send(
        &mut self,
        class: CommandClass,
        opcode: Opcode,
        client: MailboxClient,
        args: &[u32],
    ) -> SessionResult<ResponsePacket> {
        if self.poisoned {
            return Err(ModelError::SessionPoisoned);
        }
        if self.transport.is_busy() {
            return Err(ModelError::Transport(TransportError::Link(
                "transport busy with a previous command".into(),
            )));
        }
        let id = if client == MailboxClient::SYNC {
            0
        } else {
            self.take_id()
        };
        let words = CommandPacket::new(opcode, client, id, args).encode()?;
        debug!("send opcode 0x{:03X} id {id} ({} arg words)", opcode.0, args.len());
        let resp = match self
            .transport
            .send(&words, command_timeout(class, self.platform))
        {
            Ok(resp) => resp,
            Err(TransportError::Timeout) => {
                // Device state is unknown until an explicit recovery step.
                self.poisoned = true;
                return Err(ModelError::Transport(TransportError::Timeout));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(decode_response(&resp, self.rev)?)
    }

    fn send_expect_ok(
        &mut self,
        class: CommandClass,
        opcode: Opcode,
        args: &[u32],
    ) -> SessionResult<ResponsePacket> {
        let resp = self.send(class, opcode, MailboxClient::JTAG, args)?;
        if !resp.ok() {
            return Err(ModelError::Api(fwval_api::FwvalApiError::SdmCommandFailed(
                resp.error_code,
            )));
        }
        Ok(resp)
    }

    /// Flush the command queue on the reserved client id.
    pub fn sync(&mut self) -> SessionResult<()> {
        self.send(CommandClass::Sync, Opcode::SYNC, MailboxClient::SYNC, &[])?;
        Ok(())
    }

    fn status_command(
        &mut self,
        opcode: Opcode,
        policy: VerifyPolicy,
    ) -> SessionResult<Vec<Mismatch>> {
        let resp = self.send_expect_ok(CommandClass::Status, opcode, &[])?;
        let measured = ConfigStatus::decode(&resp)?;
        Ok(self
            .scoreboard
            .config
            .verify(&measured, self.rev, policy)?)
    }

    /// Poll CONFIG_STATUS and compare against the expectation. Returns
    /// every mismatch; an empty list means the device agrees with the model.
    pub fn verify_config_status(&mut self, policy: VerifyPolicy) -> SessionResult<Vec<Mismatch>> {
        self.status_command(Opcode::CONFIG_STATUS, policy)
    }

    /// RECONFIG_STATUS variant used after partial-reconfiguration flows.
    pub fn verify_reconfig_status(&mut self, policy: VerifyPolicy) -> SessionResult<Vec<Mismatch>> {
        self.status_command(Opcode::RECONFIG_STATUS, policy)
    }

    /// Stream a configuration image. `expect_success` is the caller's
    /// intent: tests that corrupt an image on purpose expect the device to
    /// end up reporting a configuration error.
    pub fn send_image(&mut self, image: &[u8], expect_success: bool) -> SessionResult<()> {
        self.send_expect_ok(CommandClass::Reconfig, Opcode::RECONFIG, &[])?;
        let words: Vec<u32> = image
            .chunks(4)
            .map(|c| {
                let mut b = [0u8; 4];
                b[..c.len()].copy_from_slice(c);
                u32::from_le_bytes(b)
            })
            .collect();
        for chunk in words.chunks(fwval_api::MAX_COMMAND_ARGS) {
            self.send_expect_ok(CommandClass::Reconfig, Opcode::RECONFIG_DATA, chunk)?;
        }
        if expect_success {
            self.scoreboard.config.image_sent();
        } else {
            self.scoreboard.config.image_failed();
        }
        // Either way the CMF is up and the RSU report exists.
        self.scoreboard.rsu.available = true;
        Ok(())
    }

    /// Poll RSU_STATUS and compare the image bookkeeping against the
    /// expectation. VERSION is compared only when `check_version` is set.
    pub fn verify_rsu_status(&mut self, check_version: bool) -> SessionResult<Vec<Mismatch>> {
        let resp = self.send_expect_ok(CommandClass::Status, Opcode::RSU_STATUS, &[])?;
        let measured = RsuStatus::decode(&resp)?;
        Ok(self.scoreboard.rsu.verify(&measured, check_version))
    }

    /// Power cycle the board. Both scoreboards and the side state return to
    /// the backup snapshot taken at session start, and fuse write
    /// protection re-arms.
    pub fn power_cycle(&mut self) {
        info!("power cycle");
        self.transport.power_cycle();
        self.scoreboard.restore(&self.backup);
        self.fuse_write_enabled = false;
        self.poisoned = false;
    }

    /// Reload the eFuse shadow cache from the array. Resets the
    /// provisioning expectation and side state to the backup snapshot; the
    /// configuration expectation is unaffected.
    pub fn efuse_cache_reload(&mut self) -> SessionResult<()> {
        self.poisoned = false;
        self.send_expect_ok(CommandClass::Efuse, Opcode::EFUSE_CACHE_RELOAD, &[])?;
        let backup = self.backup.scoreboard();
        self.scoreboard.provisioning = backup.provisioning.clone();
        self.scoreboard.side = backup.side;
        Ok(())
    }

    /// Disarm eFuse write protection until the next power cycle.
    pub fn disable_fuse_write_protection(&mut self) -> SessionResult<()> {
        self.send_expect_ok(CommandClass::Efuse, Opcode::FUSE_WR_PROT_DISABLE, &[])?;
        self.fuse_write_enabled = true;
        Ok(())
    }

    /// Write a run of fuse rows starting at (bank, row). Returns the values
    /// actually issued after region masking.
    pub fn efuse_write(
        &mut self,
        bank: u32,
        row: u32,
        values: &[u32],
        opts: EfuseWriteOptions,
    ) -> SessionResult<Vec<u32>> {
        if !opts.virtual_write && !self.fuse_write_enabled {
            return Err(ModelError::PolicyViolation(
                "physical fuse burn without disabling write protection".into(),
            ));
        }
        let mut masked = values.to_vec();
        if opts.no_gap {
            mask_out(Region::Gap, bank, row, &mut masked);
        }
        if opts.no_security {
            mask_out(Region::Security, bank, row, &mut masked);
        }
        // Gap ranges are unwritable regardless of options.
        for (i, &v) in masked.iter().enumerate() {
            let gap = region_mask(Region::Gap, bank, row + i as u32);
            if v & gap != 0 {
                return Err(ModelError::PolicyViolation(format!(
                    "write touches gap bits 0x{gap:08X} of bank {bank} row {}",
                    row + i as u32
                )));
            }
        }
        let mut args = vec![EfuseAddress::new(bank, row).linear()];
        args.extend_from_slice(&masked);
        self.send_expect_ok(CommandClass::Efuse, Opcode::EFUSE_WRITE, &args)?;
        Ok(masked)
    }

    pub fn efuse_read(&mut self, bank: u32, row: u32, rows: u32) -> SessionResult<Vec<u32>> {
        let args = [EfuseAddress::new(bank, row).linear(), rows];
        let resp = self.send_expect_ok(CommandClass::Efuse, Opcode::EFUSE_READ, &args)?;
        Ok(resp.payload)
    }

    /// Write, read back and compare, holding the transport for the whole
    /// sequence so no other command class can interleave.
    pub fn efuse_write_verified(
        &mut self,
        bank: u32,
        row: u32,
        values: &[u32],
        opts: EfuseWriteOptions,
    ) -> SessionResult<Vec<u32>> {
        let written = self.efuse_write(bank, row, values, opts)?;
        let read = self.efuse_read(bank, row, written.len() as u32)?;
        for (i, (&wrote, &got)) in written.iter().zip(read.iter()).enumerate() {
            // Earlier burns may have set extra bits; those never clear.
            if would_clear_bits(wrote, got) {
                return Err(ModelError::FuseReadbackMismatch {
                    addr: EfuseAddress::new(bank, row + i as u32).linear(),
                    wrote,
                    read: got,
                });
            }
        }
        Ok(read)
    }

    /// Poll PROVISION_STATUS and compare against the expectation.
    pub fn verify_provision_status(&mut self) -> SessionResult<Vec<Mismatch>> {
        let resp = self.send_expect_ok(CommandClass::Provision, Opcode::PROVISION_STATUS, &[])?;
        let mut raw = vec![resp.header.0];
        raw.extend_from_slice(&resp.payload);
        let measured = ProvisioningStatus::decode(&raw, self.rev)?;
        Ok(self.scoreboard.provisioning.verify(&measured))
    }

    fn apply_provision_op(&mut self, op: &ProvisionOp) -> SessionResult<()> {
        self.scoreboard
            .provisioning
            .apply_effect(&mut self.scoreboard.side, op)?;
        Ok(())
    }

    /// Program an owner root hash and advance the expectation.
    pub fn program_root_hash(
        &mut self,
        owner: Owner,
        hash: &[u32],
        late_provision: bool,
    ) -> SessionResult<()> {
        let owner_code = match owner {
            Owner::Static => 0,
            Owner::SecondaryPr => 1,
            Owner::SecondaryExtAuth => 2,
        };
        let mut args = vec![owner_code | (late_provision as u32) << 4];
        args.extend_from_slice(hash);
        self.send_expect_ok(CommandClass::Provision, Opcode::PROGRAM_ROOT_HASH, &args)?;
        self.apply_provision_op(&ProvisionOp::ProgramRootHash {
            owner,
            hash,
            late_provision,
        })
    }

    pub fn cancel_intel_key(&mut self, key_id: u32) -> SessionResult<()> {
        self.send_expect_ok(CommandClass::Provision, Opcode::KEY_CANCEL, &[key_id])?;
        self.apply_provision_op(&ProvisionOp::CancelIntelKey { key_id })
    }

    pub fn cancel_owner_slot(&mut self, slot: usize, explicit_key: bool) -> SessionResult<()> {
        let arg = slot as u32 | 1 << 8 | (explicit_key as u32) << 9;
        self.send_expect_ok(CommandClass::Provision, Opcode::KEY_CANCEL, &[arg])?;
        self.apply_provision_op(&ProvisionOp::CancelOwnerSlot { slot, explicit_key })
    }

    pub fn enable_cosign(&mut self) -> SessionResult<()> {
        self.send_expect_ok(CommandClass::Provision, Opcode::COSIGN_ENABLE, &[])?;
        self.apply_provision_op(&ProvisionOp::EnableCosign)
    }

    pub fn increment_big_counter(&mut self, ticks: u32) -> SessionResult<()> {
        self.send_expect_ok(CommandClass::Provision, Opcode::BIG_COUNTER_INC, &[ticks])?;
        self.apply_provision_op(&ProvisionOp::IncrementBigCounter { ticks })
    }
}
