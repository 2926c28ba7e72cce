// Licensed under the Apache-2.0 license

//! End-to-end session flows against the simulated SDM.

use anyhow::Result;
use fwval_api::{DeviceFamily, FirmwareRev};
use fwval_hw_model::{
    EfuseWriteOptions, ModelError, ModelSim, Platform, SdmSession, TransportError,
};
use fwval_image::{resolve, select_offset, ImageBuffer, MIP_MAGIC, MIP_OFFSET};
use fwval_scoreboard::{Owner, VerifyPolicy};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn put_u32(bytes: &mut [u8], offset: u32, value: u32) {
    let offset = offset as usize;
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// A minimal well-formed configuration image: one main section, SSBL at
/// 0x3000..0x37FF, trampoline at 0x2800..0x2BFF, sync filler between them.
fn test_image() -> Vec<u8> {
    let mut bytes = vec![0u8; 0x8000];
    put_u32(&mut bytes, MIP_OFFSET, MIP_MAGIC);
    put_u32(&mut bytes, MIP_OFFSET + 0x4, 1);
    put_u32(&mut bytes, MIP_OFFSET + 0x8, 0x4000);
    put_u32(&mut bytes, MIP_OFFSET + 0x18, 0x3000);
    put_u32(&mut bytes, MIP_OFFSET + 0x1C, 0x800);
    put_u32(&mut bytes, MIP_OFFSET + 0x20, 0x2800);
    put_u32(&mut bytes, MIP_OFFSET + 0x24, 0x400);
    bytes
}

fn new_session() -> SdmSession<ModelSim> {
    init_log();
    let mut sim = ModelSim::new(DeviceFamily::Gen1, FirmwareRev::RevB);
    sim.set_golden_image(test_image());
    SdmSession::new(sim, DeviceFamily::Gen1, FirmwareRev::RevB, Platform::Simulator)
}

#[test]
fn test_clean_configuration_flow() -> Result<()> {
    let mut session = new_session();
    session.sync()?;
    session.send_image(&test_image(), true)?;
    let mismatches = session.verify_config_status(VerifyPolicy::default())?;
    assert!(mismatches.is_empty(), "{mismatches:?}");
    Ok(())
}

#[test]
fn test_corrupt_ssbl_ends_in_error_state() -> Result<()> {
    let mut image = test_image();
    let buffer = ImageBuffer::new(&image).unwrap();
    let table = resolve(&buffer).unwrap();
    let offset = select_offset(&buffer, &table, "ssbl", None).unwrap();
    image[offset as usize] ^= 0x01;

    let mut session = new_session();
    session.send_image(&image, false)?;
    let mismatches = session.verify_config_status(VerifyPolicy::default())?;
    assert!(mismatches.is_empty(), "{mismatches:?}");
    Ok(())
}

#[test]
fn test_corrupt_image_caught_against_optimistic_expectation() -> Result<()> {
    let mut image = test_image();
    image[0x3000] ^= 0x80;
    let mut session = new_session();
    // Claim success on purpose; every error-path field must trip.
    session.send_image(&image, true)?;
    let mismatches = session.verify_config_status(VerifyPolicy::default())?;
    let fields: Vec<_> = mismatches.iter().map(|m| m.field).collect();
    assert!(fields.contains(&"STATE"), "{fields:?}");
    assert!(fields.contains(&"CONFIG_DONE"), "{fields:?}");
    Ok(())
}

#[test]
fn test_power_cycle_resets_both_sides() -> Result<()> {
    let mut session = new_session();
    session.send_image(&test_image(), true)?;
    session.power_cycle();
    // Device and expectation are both back in the boot ROM stage.
    let mismatches = session.verify_config_status(VerifyPolicy::default())?;
    assert!(mismatches.is_empty(), "{mismatches:?}");
    Ok(())
}

#[test]
fn test_provisioning_flow_round_trip() -> Result<()> {
    let mut session = new_session();
    session.program_root_hash(Owner::Static, &[0x11; 8], false)?;
    session.cancel_intel_key(2)?;
    session.increment_big_counter(3)?;
    session.enable_cosign()?;
    let mismatches = session.verify_provision_status()?;
    assert!(mismatches.is_empty(), "{mismatches:?}");
    Ok(())
}

#[test]
fn test_secondary_owner_provisioning() -> Result<()> {
    let mut session = new_session();
    session.program_root_hash(Owner::Static, &[0x11; 8], true)?;
    session.program_root_hash(Owner::SecondaryPr, &[0x22; 8], true)?;
    session.program_root_hash(Owner::SecondaryExtAuth, &[0x33; 8], true)?;
    let mismatches = session.verify_provision_status()?;
    assert!(mismatches.is_empty(), "{mismatches:?}");
    Ok(())
}

#[test]
fn test_rsu_status_tracks_configuration() -> Result<()> {
    let mut session = new_session();
    // No report exists while the boot ROM answers.
    assert!(session.verify_rsu_status(false)?.is_empty());

    session.send_image(&test_image(), true)?;
    assert!(session.verify_rsu_status(false)?.is_empty());

    // A diverging RSU state word is caught field-by-field.
    session.transport_mut().rsu_state = 0xF004_0002;
    let fields: Vec<_> = session
        .verify_rsu_status(false)?
        .iter()
        .map(|m| m.field)
        .collect();
    assert_eq!(fields, vec!["RSU_STATE"]);
    Ok(())
}

#[test]
fn test_provisioning_divergence_is_reported() -> Result<()> {
    let mut session = new_session();
    session.transport_mut().provisioning_mut().big_counter_value = 41;
    let mismatches = session.verify_provision_status()?;
    let fields: Vec<_> = mismatches.iter().map(|m| m.field).collect();
    assert_eq!(fields, vec!["BIG_COUNTER_VALUE"]);
    Ok(())
}

#[test]
fn test_efuse_cache_reload_resets_provisioning_only() -> Result<()> {
    let mut session = new_session();
    session.send_image(&test_image(), true)?;
    session.program_root_hash(Owner::Static, &[0x77; 8], false)?;
    assert!(session.verify_provision_status()?.is_empty());

    session.efuse_cache_reload()?;
    assert!(session.verify_provision_status()?.is_empty());
    // The configuration side is untouched by a cache reload.
    let mismatches = session.verify_config_status(VerifyPolicy::default())?;
    assert!(mismatches.is_empty(), "{mismatches:?}");
    Ok(())
}

#[test]
fn test_efuse_write_read_back() -> Result<()> {
    let mut session = new_session();
    let written =
        session.efuse_write_verified(1, 0, &[0x00FF_00FF], EfuseWriteOptions::default())?;
    assert_eq!(written, vec![0x00FF_00FF]);
    // A second write only adds bits; read-back tolerates the earlier ones.
    let read = session.efuse_write_verified(1, 0, &[0xFF00_0000], EfuseWriteOptions::default())?;
    assert_eq!(read, vec![0xFFFF_00FF]);
    Ok(())
}

#[test]
fn test_security_rows_masked_by_default() -> Result<()> {
    let mut session = new_session();
    let issued = session.efuse_write(2, 0, &[0xFFFF_FFFF], EfuseWriteOptions::default())?;
    assert_eq!(issued, vec![0]);
    Ok(())
}

#[test]
fn test_gap_write_always_rejected() {
    let mut session = new_session();
    let opts = EfuseWriteOptions {
        no_gap: false,
        ..Default::default()
    };
    let err = session.efuse_write(0, 6, &[1], opts).unwrap_err();
    assert!(matches!(err, ModelError::PolicyViolation(_)), "{err:?}");
}

#[test]
fn test_physical_burn_requires_protection_disable() -> Result<()> {
    let mut session = new_session();
    let opts = EfuseWriteOptions {
        virtual_write: false,
        ..Default::default()
    };
    let err = session.efuse_write(1, 1, &[1], opts).unwrap_err();
    assert!(matches!(err, ModelError::PolicyViolation(_)), "{err:?}");

    session.disable_fuse_write_protection()?;
    session.efuse_write(1, 1, &[1], opts)?;

    // Protection re-arms with power.
    session.power_cycle();
    let err = session.efuse_write(1, 1, &[1], opts).unwrap_err();
    assert!(matches!(err, ModelError::PolicyViolation(_)), "{err:?}");
    Ok(())
}

#[test]
fn test_timeout_poisons_session_until_recovery() -> Result<()> {
    let mut session = new_session();
    session.transport_mut().drop_responses = true;
    let err = session.sync().unwrap_err();
    assert!(
        matches!(err, ModelError::Transport(TransportError::Timeout)),
        "{err:?}"
    );
    assert!(session.is_poisoned());
    // Everything fails fast until an explicit recovery step.
    assert!(matches!(
        session.verify_config_status(VerifyPolicy::default()),
        Err(ModelError::SessionPoisoned)
    ));

    session.transport_mut().drop_responses = false;
    session.power_cycle();
    assert!(!session.is_poisoned());
    session.sync()?;
    Ok(())
}
