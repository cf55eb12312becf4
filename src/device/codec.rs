//! Binary records exchanged with the accessory firmware.
//!
//! All numeric fields are little-endian. Accessory notifications carry a one byte type
//! header, commands sent to the accessory carry a one byte directive header.

use crate::device::constants::{
    COMMAND_CONFIGURE_AND_START, NOTIFICATION_ACCESSORY_CONFIG, NOTIFICATION_UWB_DID_START,
    NOTIFICATION_UWB_DID_STOP, SPEC_VERSION_MAJOR,
};
use crate::error::CodecError;
use crate::uwb::types::UwbAddress;

pub const DEVICE_CONFIG_LEN: usize = 18;
pub const PHONE_CONFIG_LEN: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    AccessoryConfig,
    UwbDidStart,
    UwbDidStop,
    Other(u8),
}

impl From<u8> for NotificationType {
    fn from(value: u8) -> Self {
        match value {
            NOTIFICATION_ACCESSORY_CONFIG => NotificationType::AccessoryConfig,
            NOTIFICATION_UWB_DID_START => NotificationType::UwbDidStart,
            NOTIFICATION_UWB_DID_STOP => NotificationType::UwbDidStop,
            other => NotificationType::Other(other),
        }
    }
}

/// Capabilities reported by the accessory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub spec_version_major: u16,
    pub spec_version_minor: u16,
    pub chip_id: u16,
    pub chip_fw_version: u16,
    pub mw_version: [u8; 3],
    pub supported_profile_ids: u32,
    pub supported_ranging_roles: u8,
    pub device_mac_address: UwbAddress,
}

/// Session setup sent to the accessory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneConfig {
    pub spec_version_major: u16,
    pub spec_version_minor: u16,
    pub session_id: i32,
    pub preamble_index: u8,
    pub channel: u8,
    pub profile_id: u8,
    // bit 0 set: the phone acts as controlee/initiator
    pub device_ranging_role: u8,
    pub phone_mac_address: UwbAddress,
}

/// Splits an accessory notification into its type and payload.
pub fn split_notification(bytes: &[u8]) -> Result<(NotificationType, &[u8]), CodecError> {
    match bytes.split_first() {
        Some((kind, payload)) => Ok((NotificationType::from(*kind), payload)),
        None => Err(CodecError::EmptyNotification),
    }
}

pub fn decode_device_config(bytes: &[u8]) -> Result<DeviceConfig, CodecError> {
    if bytes.len() < DEVICE_CONFIG_LEN {
        return Err(CodecError::TooShort { expected: DEVICE_CONFIG_LEN, actual: bytes.len() });
    }

    let u16_at = |offset: usize| u16::from_le_bytes([bytes[offset], bytes[offset + 1]]);

    let spec_version_major = u16_at(0);
    let spec_version_minor = u16_at(2);
    if spec_version_major != SPEC_VERSION_MAJOR {
        return Err(CodecError::UnsupportedVersion { major: spec_version_major, minor: spec_version_minor });
    }

    Ok(DeviceConfig {
        spec_version_major,
        spec_version_minor,
        chip_id: u16_at(4),
        chip_fw_version: u16_at(6),
        mw_version: [bytes[8], bytes[9], bytes[10]],
        supported_profile_ids: u32::from_le_bytes([bytes[11], bytes[12], bytes[13], bytes[14]]),
        supported_ranging_roles: bytes[15],
        device_mac_address: UwbAddress([bytes[16], bytes[17]]),
    })
}

pub fn encode_phone_config(config: &PhoneConfig) -> [u8; PHONE_CONFIG_LEN] {
    let mut out = [0u8; PHONE_CONFIG_LEN];
    out[0..2].copy_from_slice(&config.spec_version_major.to_le_bytes());
    out[2..4].copy_from_slice(&config.spec_version_minor.to_le_bytes());
    out[4..8].copy_from_slice(&config.session_id.to_le_bytes());
    out[8] = config.preamble_index;
    out[9] = config.channel;
    out[10] = config.profile_id;
    out[11] = config.device_ranging_role;
    out[12..14].copy_from_slice(&config.phone_mac_address.0);
    out
}

pub fn frame_command(directive: u8, payload: &[u8]) -> Vec<u8> {
    let mut cmd = Vec::with_capacity(payload.len() + 1);
    cmd.push(directive);
    cmd.extend_from_slice(payload);
    cmd
}

/// The complete `[0x0B][PhoneConfig]` command.
pub fn configure_command(config: &PhoneConfig) -> Vec<u8> {
    frame_command(COMMAND_CONFIGURE_AND_START, &encode_phone_config(config))
}
