use std::fmt;
use serde::{Deserialize, Serialize};

/// Short (2 byte) UWB MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UwbAddress(pub [u8; 2]);

impl fmt::Display for UwbAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}:{:02X}", self.0[0], self.0[1])
    }
}

/// RF channel and preamble index of a ranging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComplexChannel {
    pub channel: u8,
    pub preamble_index: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RangingRole {
    Controlee,
    Controller,
}

impl RangingRole {
    /// Role as encoded in the PhoneConfig role bitmask.
    pub fn bitmask(&self) -> u8 {
        match self {
            RangingRole::Controlee => 1 << 0,
            RangingRole::Controller => 1 << 1,
        }
    }
}

impl fmt::Display for RangingRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            RangingRole::Controlee => "controlee",
            RangingRole::Controller => "controller",
        };

        write!(f, "{}", result)
    }
}

/// What the local UWB stack handed out for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalScope {
    pub role: RangingRole,
    pub local_address: UwbAddress,
    // only meaningful for controllers, controlees use the configured channel
    pub complex_channel: ComplexChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateRate {
    Automatic,
    Infrequent,
    Frequent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParameters {
    pub role: RangingRole,
    pub profile_id: u8,
    pub session_id: i32,
    pub sub_session_id: i32,
    pub session_key: Vec<u8>,
    pub sub_session_key: Vec<u8>,
    pub complex_channel: ComplexChannel,
    pub peer_addresses: Vec<UwbAddress>,
    pub update_rate: UpdateRate,
}

/// One measurement; any subset of the fields may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    pub distance: Option<f32>,
    pub azimuth: Option<f32>,
    pub elevation: Option<f32>,
}

impl Position {
    /// Overwrites the fields that `sample` carries, keeps the others.
    pub fn merge(&mut self, sample: &Position) {
        if sample.distance.is_some() {
            self.distance = sample.distance;
        }
        if sample.azimuth.is_some() {
            self.azimuth = sample.azimuth;
        }
        if sample.elevation.is_some() {
            self.elevation = sample.elevation;
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = |value: Option<f32>, unit: &str| match value {
            Some(v) => format!("{:.2}{}", v, unit),
            None => "-".to_string(),
        };

        write!(
            f,
            "distance {} azimuth {} elevation {}",
            field(self.distance, "m"),
            field(self.azimuth, "°"),
            field(self.elevation, "°"),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangingResult {
    Position { peer: UwbAddress, position: Position },
    PeerDisconnected { peer: UwbAddress },
}
