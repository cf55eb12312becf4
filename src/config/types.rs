use serde::{Deserialize, Serialize};

use crate::uwb::types::RangingRole;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UwbConfig {
    pub channel: u8,
    pub preamble_index: u8,
    // 1 = unicast DS-TWR
    pub profile_id: u8,
    pub ranging_role: RangingRole,
    // delay between the configuration write and the first consumed sample
    pub settle_delay_ms: u64,
    pub scope_timeout_ms: u64,
    // only used by the simulated UWB stack
    pub sample_interval_ms: u64,
}

impl Default for UwbConfig {
    fn default() -> Self {
        UwbConfig {
            channel: 9,
            preamble_index: 10,
            profile_id: 1,
            ranging_role: RangingRole::Controlee,
            settle_delay_ms: 100,
            scope_timeout_ms: 5000,
            sample_interval_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BleConfig {
    /// Advertised names of supported accessories.
    pub device_names: Vec<String>,
    pub scan_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl Default for BleConfig {
    fn default() -> Self {
        BleConfig {
            device_names: ["TS_DCU150", "TS_DCU040", "NXP_SR040", "NXP_SR150", "NXP_SR160"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
            scan_timeout_ms: 10000,
            connect_timeout_ms: 20000,
            write_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub uwb: UwbConfig,
    pub ble: BleConfig,
}
