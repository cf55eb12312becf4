use std::fmt;

/// Opaque key identifying a BLE peripheral for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BleIdentity(pub String);

impl fmt::Display for BleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BleIdentity {
    fn from(value: &str) -> Self {
        BleIdentity(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    // active: the disconnect was requested by us, otherwise the link was lost
    Disconnected { active: bool },
    Notified(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct DiscoveredAccessory {
    pub identity: BleIdentity,
    pub name: String,
    pub rssi: Option<i16>,
}
