use std::sync::{Arc, Mutex, MutexGuard};
use indexmap::IndexMap;
use log::debug;

use crate::device::types::BleIdentity;
use crate::uwb::ranging::RangingHandle;
use crate::uwb::types::{Position, UwbAddress};

#[derive(Debug, Clone)]
pub struct PeerDevice {
    pub identity: BleIdentity,
    pub name: Option<String>,
    // assigned once the handshake completed
    pub uwb_address: Option<UwbAddress>,
    pub position: Position,
    // present only while ranging
    pub ranging: Option<RangingHandle>,
}

impl PeerDevice {
    pub fn new(identity: BleIdentity, name: Option<String>) -> Self {
        PeerDevice {
            identity,
            name,
            uwb_address: None,
            position: Position::default(),
            ranging: None,
        }
    }

    pub fn is_ranging(&self) -> bool {
        self.ranging.is_some()
    }
}

/// Peers known to this process, keyed by BLE identity.
///
/// Shared between the BLE event side and the sample consumers; every method takes the lock.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    inner: Arc<Mutex<IndexMap<BleIdentity, PeerDevice>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn peers(&self) -> MutexGuard<'_, IndexMap<BleIdentity, PeerDevice>> {
        self.inner.lock().expect("Failed to lock PeerRegistry")
    }

    /// Replaces any entry with the same identity. The new entry goes to the end.
    pub fn upsert(&self, peer: PeerDevice) {
        let mut peers = self.peers();
        peers.shift_remove(&peer.identity);
        peers.insert(peer.identity.clone(), peer);
    }

    pub fn get(&self, identity: &BleIdentity) -> Option<PeerDevice> {
        self.peers().get(identity).cloned()
    }

    pub fn find_by_uwb_address(&self, address: UwbAddress) -> Option<PeerDevice> {
        self.peers()
            .values()
            .find(|peer| peer.uwb_address == Some(address))
            .cloned()
    }

    pub fn remove(&self, identity: &BleIdentity) -> Option<PeerDevice> {
        self.peers().shift_remove(identity)
    }

    /// Records a finished handshake: the peer's UWB address and its live ranging stream.
    pub fn attach_ranging(&self, identity: &BleIdentity, address: UwbAddress, handle: RangingHandle) {
        let mut peers = self.peers();
        let peer = peers
            .entry(identity.clone())
            .or_insert_with(|| PeerDevice::new(identity.clone(), None));

        peer.uwb_address = Some(address);
        peer.ranging = Some(handle);
    }

    /// Detaches the ranging stream but keeps the entry.
    pub fn clear_ranging(&self, identity: &BleIdentity) -> Option<RangingHandle> {
        self.peers().get_mut(identity).and_then(|peer| peer.ranging.take())
    }

    /// Merges `sample` into the latest position of the peer owning `address`.
    pub fn record_position(&self, address: UwbAddress, sample: &Position) -> Option<PeerDevice> {
        let mut peers = self.peers();
        let peer = peers.values_mut().find(|peer| peer.uwb_address == Some(address));

        match peer {
            Some(peer) => {
                peer.position.merge(sample);
                Some(peer.clone())
            },
            None => {
                debug!("No peer with UWB address {}", address);
                None
            },
        }
    }

    pub fn ranging_peers(&self) -> Vec<PeerDevice> {
        self.peers().values().filter(|peer| peer.is_ranging()).cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<PeerDevice> {
        self.peers().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(identity: &str, address: Option<[u8; 2]>) -> PeerDevice {
        PeerDevice {
            uwb_address: address.map(UwbAddress),
            ..PeerDevice::new(BleIdentity::from(identity), None)
        }
    }

    #[test]
    fn upsert_replaces_same_identity() {
        let registry = PeerRegistry::new();
        registry.upsert(peer("a", Some([0, 1])));
        registry.upsert(peer("a", Some([0, 2])));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&BleIdentity::from("a")).unwrap().uwb_address, Some(UwbAddress([0, 2])));
        assert!(registry.find_by_uwb_address(UwbAddress([0, 1])).is_none());
    }

    #[test]
    fn find_requires_assigned_address() {
        let registry = PeerRegistry::new();
        registry.upsert(peer("a", None));
        registry.upsert(peer("b", Some([0xAB, 0xCD])));

        assert!(registry.find_by_uwb_address(UwbAddress([0, 0])).is_none());
        assert_eq!(registry.find_by_uwb_address(UwbAddress([0xAB, 0xCD])).unwrap().identity, BleIdentity::from("b"));
    }

    #[test]
    fn remove_deletes_entry() {
        let registry = PeerRegistry::new();
        registry.upsert(peer("a", None));
        assert!(registry.remove(&BleIdentity::from("a")).is_some());
        assert!(registry.remove(&BleIdentity::from("a")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn ranging_handle_lifecycle() {
        let registry = PeerRegistry::new();
        let identity = BleIdentity::from("a");
        registry.upsert(peer("a", None));

        registry.attach_ranging(&identity, UwbAddress([1, 2]), RangingHandle::new(7));
        assert_eq!(registry.ranging_peers().len(), 1);

        let handle = registry.clear_ranging(&identity).unwrap();
        assert_eq!(handle.session_id(), 7);
        assert!(registry.ranging_peers().is_empty());

        // entry and address stay around
        let entry = registry.get(&identity).unwrap();
        assert_eq!(entry.uwb_address, Some(UwbAddress([1, 2])));
        assert!(registry.clear_ranging(&identity).is_none());
    }

    #[test]
    fn partial_position_keeps_other_fields() {
        let registry = PeerRegistry::new();
        registry.upsert(peer("a", Some([1, 2])));

        registry.record_position(UwbAddress([1, 2]), &Position { distance: Some(1.0), azimuth: Some(10.0), elevation: Some(3.0) });
        let updated = registry
            .record_position(UwbAddress([1, 2]), &Position { distance: Some(2.0), azimuth: None, elevation: None })
            .unwrap();

        assert_eq!(updated.position, Position { distance: Some(2.0), azimuth: Some(10.0), elevation: Some(3.0) });
        assert!(registry.record_position(UwbAddress([9, 9]), &Position::default()).is_none());
    }
}
