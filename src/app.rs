use std::sync::Arc;
use futures::channel::mpsc::channel;
use futures::StreamExt;
use log::{error, info, warn};
use tokio::spawn;
use tokio_util::sync::CancellationToken;

use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::connection::BtleTransport;
use crate::device::types::{BleIdentity, DiscoveredAccessory, TransportEvent};
use crate::error::{AppRunError, ConfigError};
use crate::session::pairing::{DisconnectObserver, PairingSession};
use crate::session::registry::{PeerDevice, PeerRegistry};
use crate::session::types::SessionEvent;
use crate::uwb::ranging::RangingCoordinator;
use crate::uwb::simulated::SimulatedUwb;

struct LogDisconnectObserver;

impl DisconnectObserver for LogDisconnectObserver {
    fn on_passive_disconnect(&self, identity: &BleIdentity) {
        warn!("Lost connection to accessory {}", identity);
    }
}

fn select_accessories(accessories: Vec<DiscoveredAccessory>, name_filter: Option<&str>) -> Vec<DiscoveredAccessory> {
    match name_filter {
        None => accessories,
        Some(filter) => accessories
            .into_iter()
            .filter(|accessory| accessory.name.contains(filter))
            .collect(),
    }
}

fn peer_label(registry: &PeerRegistry, identity: &BleIdentity) -> String {
    match registry.get(identity).and_then(|peer| peer.name) {
        Some(name) => format!("{} ({})", name, identity),
        None => identity.to_string(),
    }
}

fn describe_event(registry: &PeerRegistry, event: &SessionEvent) -> String {
    match event {
        SessionEvent::StateChanged { identity, state } => {
            format!("{}: {}", peer_label(registry, identity), state)
        },
        SessionEvent::SampleReceived { identity, peer, position } => {
            format!("{} [{}]: {}", peer_label(registry, identity), peer, position)
        },
        SessionEvent::HandshakeFailed { identity, reason } => {
            format!("{}: handshake failed: {}", peer_label(registry, identity), reason)
        },
        SessionEvent::PeerDisconnected { identity, active } => {
            let how = if *active { "disconnected" } else { "connection lost" };
            format!("{}: {}", peer_label(registry, identity), how)
        },
    }
}

pub async fn scan(config: &Config) -> Result<(), AppRunError> {
    let transport = BtleTransport::new(&config.ble).await?;
    let accessories = transport.scan(&config.ble.device_names).await?;

    println!("Found {} accessories:", accessories.len());
    for accessory in accessories {
        let rssi = accessory.rssi.map(|r| format!("{} dBm", r)).unwrap_or_else(|| "N/A".to_string());
        println!("  {} [{}] RSSI: {}", accessory.name, accessory.identity, rssi);
    }

    Ok(())
}

/// Writes `config` back to its file, so every setting shows up with its current value.
pub async fn write_config(config_io: &ConfigIO, config: &Config) -> Result<(), AppRunError> {
    config_io.save(config).await?;
    println!("Configuration written");
    Ok(())
}

pub fn print_config(config: &Config) -> Result<(), AppRunError> {
    let content = serde_json::to_string_pretty(config).map_err(ConfigError::from)?;
    println!("{}", content);
    Ok(())
}

/// Runs a pairing session for every matching accessory until `cancel` fires
/// or every session has ended.
pub async fn range(config: &Config, name_filter: Option<&str>, cancel: CancellationToken) -> Result<(), AppRunError> {
    let transport = Arc::new(BtleTransport::new(&config.ble).await?);
    let accessories = transport.scan(&config.ble.device_names).await?;
    let accessories = select_accessories(accessories, name_filter);
    if accessories.is_empty() {
        return Err(AppRunError::NoAccessory);
    }

    let registry = PeerRegistry::new();
    let uwb = Arc::new(SimulatedUwb::new(&config.uwb));
    let coordinator = Arc::new(RangingCoordinator::new(uwb, &config.uwb));
    let observer: Arc<dyn DisconnectObserver> = Arc::new(LogDisconnectObserver);
    let (event_sender, mut event_receiver) = channel::<SessionEvent>(64);
    let mut tasks = Vec::new();

    for accessory in accessories {
        info!("Pairing with {} ({})", accessory.name, accessory.identity);
        registry.upsert(PeerDevice::new(accessory.identity.clone(), Some(accessory.name.clone())));

        let (transport_sender, transport_receiver) = channel::<TransportEvent>(16);
        let (session, inputs) = PairingSession::new(
            accessory.identity.clone(),
            &config.uwb,
            transport.clone(),
            coordinator.clone(),
            registry.clone(),
            event_sender.clone(),
        );
        let session = session.with_observer(observer.clone());
        tasks.push(spawn(session.run(inputs, transport_receiver, cancel.child_token())));

        // on failure the sender is dropped, which ends the session
        if let Err(err) = transport.connect(&accessory.identity, transport_sender).await {
            error!("Failed to connect to {}: {}", accessory.identity, err);
        }
    }

    // sessions hold the remaining senders
    drop(event_sender);

    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            event = event_receiver.next() => match event {
                Some(event) => match &event {
                    SessionEvent::HandshakeFailed { .. } => warn!("{}", describe_event(&registry, &event)),
                    _ => info!("{}", describe_event(&registry, &event)),
                },
                None => break 'mainloop,
            },
        }
    }

    cancel.cancel();
    for identity in transport.connected() {
        if let Err(err) = transport.disconnect(&identity).await {
            warn!("Failed to disconnect {}: {}", identity, err);
        }
    }

    for task in tasks {
        if let Err(err) = task.await {
            warn!("Session task failed: {}", err);
        }
    }

    info!("Stopped ranging with {} accessories", registry.len());
    for line in last_positions(&registry) {
        info!("{}", line);
    }
    Ok(())
}

fn last_positions(registry: &PeerRegistry) -> Vec<String> {
    registry
        .snapshot()
        .into_iter()
        .map(|peer| {
            let label = peer_label(registry, &peer.identity);
            match peer.uwb_address {
                Some(address) => format!("{} [{}]: last position {}", label, address, peer.position),
                None => format!("{}: never ranged", label),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::AppState;
    use crate::uwb::ranging::RangingHandle;
    use crate::uwb::types::{Position, UwbAddress};

    fn accessory(name: &str) -> DiscoveredAccessory {
        DiscoveredAccessory {
            identity: BleIdentity::from(name),
            name: name.to_string(),
            rssi: Some(-60),
        }
    }

    #[test]
    fn name_filter_is_a_substring_match() {
        let all = vec![accessory("NXP_SR150"), accessory("TS_DCU040"), accessory("NXP_SR040")];

        let names = |list: Vec<DiscoveredAccessory>| list.into_iter().map(|a| a.name).collect::<Vec<_>>();
        assert_eq!(names(select_accessories(all.clone(), Some("NXP"))), vec!["NXP_SR150", "NXP_SR040"]);
        assert_eq!(names(select_accessories(all.clone(), Some("040"))), vec!["TS_DCU040", "NXP_SR040"]);
        assert_eq!(select_accessories(all.clone(), None).len(), 3);
        assert!(select_accessories(all, Some("SR160")).is_empty());
    }

    #[test]
    fn events_are_described_with_accessory_name() {
        let registry = PeerRegistry::new();
        let identity = BleIdentity::from("hci0/dev_01");
        registry.upsert(PeerDevice::new(identity.clone(), Some("NXP_SR150".to_string())));

        let changed = SessionEvent::StateChanged { identity: identity.clone(), state: AppState::Ranging };
        assert_eq!(describe_event(&registry, &changed), "NXP_SR150 (hci0/dev_01): ranging");

        let lost = SessionEvent::PeerDisconnected { identity: identity.clone(), active: false };
        assert_eq!(describe_event(&registry, &lost), "NXP_SR150 (hci0/dev_01): connection lost");

        let sample = SessionEvent::SampleReceived {
            identity,
            peer: UwbAddress([0xAB, 0x01]),
            position: Position { distance: Some(1.5), azimuth: None, elevation: None },
        };
        assert!(describe_event(&registry, &sample).starts_with("NXP_SR150 (hci0/dev_01) [AB:01]: "));
    }

    #[test]
    fn last_positions_cover_every_known_accessory() {
        let registry = PeerRegistry::new();
        let ranged = BleIdentity::from("dev_01");
        registry.upsert(PeerDevice::new(ranged.clone(), Some("NXP_SR150".to_string())));
        registry.upsert(PeerDevice::new(BleIdentity::from("dev_02"), None));
        registry.attach_ranging(&ranged, UwbAddress([0xAB, 0x01]), RangingHandle::new(7));
        registry.record_position(UwbAddress([0xAB, 0x01]), &Position { distance: Some(2.0), azimuth: None, elevation: None });

        let lines = last_positions(&registry);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("NXP_SR150 (dev_01) [AB:01]: last position "));
        assert_eq!(lines[1], "dev_02: never ranged");
    }

    #[tokio::test]
    async fn write_config_saves_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_io = ConfigIO::open(&dir.path().join("config.json")).unwrap();
        let mut config = Config::default();
        config.ble.scan_timeout_ms = 3000;

        write_config(&config_io, &config).await.unwrap();
        assert_eq!(config_io.read().await.unwrap(), config);
    }

    #[test]
    fn unknown_identity_is_described_by_identity() {
        let registry = PeerRegistry::new();
        let failed = SessionEvent::HandshakeFailed { identity: BleIdentity::from("dev_02"), reason: "timeout".to_string() };
        assert_eq!(describe_event(&registry, &failed), "dev_02: handshake failed: timeout");
    }
}
