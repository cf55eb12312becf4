use std::fmt;

use crate::device::types::BleIdentity;
use crate::uwb::types::{Position, UwbAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Idle,
    Configuring,
    Ranging,
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            AppState::Idle => "idle",
            AppState::Configuring => "configuring",
            AppState::Ranging => "ranging",
        };

        write!(f, "{}", result)
    }
}

/// What a pairing session reports to the presentation side.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged { identity: BleIdentity, state: AppState },
    SampleReceived { identity: BleIdentity, peer: UwbAddress, position: Position },
    HandshakeFailed { identity: BleIdentity, reason: String },
    PeerDisconnected { identity: BleIdentity, active: bool },
}

/// Inputs a session receives besides transport events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    // sent by the sample consumer of the stream opened for `session_id`
    PeerDisconnected { session_id: i32 },
    RetryConfiguration,
    Stop,
}
