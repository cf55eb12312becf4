//! Per-accessory handshake and ranging lifecycle.
//!
//! ```text
//!   Idle --accessory config--> Configuring --config written--> Ranging
//!     ^                            |                              |
//!     +------- disconnect / peer left / stop / scope failure -----+
//! ```
//!
//! A session is owned by one task. Everything that happens elsewhere (BLE notifications,
//! the sample consumer noticing the peer left, stop requests) reaches it as a message.

use std::sync::Arc;
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::types::UwbConfig;
use crate::device::codec::{configure_command, decode_device_config, split_notification, DeviceConfig, NotificationType, PhoneConfig};
use crate::device::constants::{SPEC_VERSION_MAJOR, SPEC_VERSION_MINOR};
use crate::device::transport::BleTransport;
use crate::device::types::{BleIdentity, TransportEvent};
use crate::error::PairingError;
use crate::session::registry::{PeerDevice, PeerRegistry};
use crate::session::types::{AppState, SessionEvent, SessionInput};
use crate::uwb::ranging::{RangingCoordinator, RangingHandle, UwbRanging};
use crate::uwb::types::{ComplexChannel, RangingRole};

/// Called when an accessory drops the link without us asking for it.
pub trait DisconnectObserver: Send + Sync {
    fn on_passive_disconnect(&self, identity: &BleIdentity);
}

enum SessionState {
    Idle,
    Configuring {
        device_config: DeviceConfig,
    },
    Ranging {
        device_config: DeviceConfig,
        handle: RangingHandle,
        consumer: JoinHandle<()>,
    },
}

impl SessionState {
    fn app_state(&self) -> AppState {
        match self {
            SessionState::Idle => AppState::Idle,
            SessionState::Configuring { .. } => AppState::Configuring,
            SessionState::Ranging { .. } => AppState::Ranging,
        }
    }
}

/// Radio settings a session offers to the accessory.
#[derive(Debug, Clone, Copy)]
struct SessionSettings {
    complex_channel: ComplexChannel,
    profile_id: u8,
    role: RangingRole,
}

pub struct PairingSession<T: BleTransport, U: UwbRanging> {
    identity: BleIdentity,
    state: SessionState,
    settings: SessionSettings,
    transport: Arc<T>,
    coordinator: Arc<RangingCoordinator<U>>,
    registry: PeerRegistry,
    events: Sender<SessionEvent>,
    inputs: Sender<SessionInput>,
    observer: Option<Arc<dyn DisconnectObserver>>,
}

impl<T: BleTransport, U: UwbRanging> PairingSession<T, U> {
    /// Returns the session and the receiving end of its input channel, see [`Self::inputs`].
    pub fn new(
        identity: BleIdentity,
        config: &UwbConfig,
        transport: Arc<T>,
        coordinator: Arc<RangingCoordinator<U>>,
        registry: PeerRegistry,
        events: Sender<SessionEvent>,
    ) -> (Self, Receiver<SessionInput>) {
        let (inputs, inputs_receiver) = channel::<SessionInput>(8);

        let session = PairingSession {
            identity,
            state: SessionState::Idle,
            settings: SessionSettings {
                complex_channel: ComplexChannel {
                    channel: config.channel,
                    preamble_index: config.preamble_index,
                },
                profile_id: config.profile_id,
                role: config.ranging_role,
            },
            transport,
            coordinator,
            registry,
            events,
            inputs,
            observer: None,
        };

        (session, inputs_receiver)
    }

    pub fn with_observer(mut self, observer: Arc<dyn DisconnectObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn identity(&self) -> &BleIdentity {
        &self.identity
    }

    pub fn state(&self) -> AppState {
        self.state.app_state()
    }

    /// Sender for stop and retry requests.
    pub fn inputs(&self) -> Sender<SessionInput> {
        self.inputs.clone()
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) -> Result<(), PairingError> {
        match event {
            TransportEvent::Connected => {
                info!("[{}] Connected", self.identity);
                if self.registry.get(&self.identity).is_none() {
                    self.registry.upsert(PeerDevice::new(self.identity.clone(), None));
                }
                Ok(())
            },
            TransportEvent::Disconnected { active } => {
                self.disconnected(active).await;
                Ok(())
            },
            TransportEvent::Notified(bytes) => self.handle_notification(&bytes).await,
        }
    }

    pub async fn handle_input(&mut self, input: SessionInput) -> Result<(), PairingError> {
        match input {
            SessionInput::PeerDisconnected { session_id } => {
                self.peer_left(session_id).await;
                Ok(())
            },
            SessionInput::RetryConfiguration => self.retry_configuration().await,
            SessionInput::Stop => {
                self.stop().await;
                Ok(())
            },
        }
    }

    async fn handle_notification(&mut self, bytes: &[u8]) -> Result<(), PairingError> {
        match self.state.app_state() {
            AppState::Idle => self.accessory_config_received(bytes).await,
            AppState::Configuring => {
                debug!("[{}] Ignoring notification while configuring", self.identity);
                Ok(())
            },
            AppState::Ranging => {
                match split_notification(bytes) {
                    Ok((NotificationType::UwbDidStart, _)) => info!("[{}] Accessory started ranging", self.identity),
                    Ok((NotificationType::UwbDidStop, _)) => info!("[{}] Accessory stopped ranging", self.identity),
                    _ => debug!("[{}] Ignoring notification while ranging", self.identity),
                }
                Ok(())
            },
        }
    }

    async fn accessory_config_received(&mut self, bytes: &[u8]) -> Result<(), PairingError> {
        let decoded = match split_notification(bytes) {
            Ok((NotificationType::AccessoryConfig, payload)) => decode_device_config(payload),
            Ok((kind, _)) => {
                // e.g. the stop confirmation arriving after teardown
                debug!("[{}] Ignoring {:?} notification while idle", self.identity, kind);
                return Ok(());
            },
            Err(source) => Err(source),
        };

        let device_config = match decoded {
            Ok(device_config) => device_config,
            Err(source) => {
                let error = PairingError::MalformedConfig { source };
                self.handshake_failed(&error).await;
                return Err(error);
            },
        };

        info!(
            "[{}] Accessory config: spec {}.{}, chip {:#06x}, fw {:#06x}, address {}",
            self.identity,
            device_config.spec_version_major,
            device_config.spec_version_minor,
            device_config.chip_id,
            device_config.chip_fw_version,
            device_config.device_mac_address,
        );

        self.set_state(SessionState::Configuring { device_config }).await;
        self.configure().await
    }

    /// Re-runs the configuration step after a failed write, with a new session id.
    pub async fn retry_configuration(&mut self) -> Result<(), PairingError> {
        self.configure().await
    }

    async fn configure(&mut self) -> Result<(), PairingError> {
        let device_config = match &self.state {
            SessionState::Configuring { device_config } => device_config.clone(),
            _ => return Err(PairingError::NotConfiguring),
        };

        let scope = match self.coordinator.acquire_local_scope(self.settings.role).await {
            Ok(scope) => scope,
            Err(source) => {
                let error = PairingError::LocalScopeAcquisitionFailed { source };
                self.handshake_failed(&error).await;
                self.set_state(SessionState::Idle).await;
                return Err(error);
            },
        };

        // controllers pick the channel, controlees use the configured one
        let complex_channel = match scope.role {
            RangingRole::Controller => scope.complex_channel,
            RangingRole::Controlee => self.settings.complex_channel,
        };

        let phone_config = PhoneConfig {
            spec_version_major: SPEC_VERSION_MAJOR,
            spec_version_minor: SPEC_VERSION_MINOR,
            session_id: generate_session_id(),
            preamble_index: complex_channel.preamble_index,
            channel: complex_channel.channel,
            profile_id: self.settings.profile_id,
            device_ranging_role: scope.role.bitmask(),
            phone_mac_address: scope.local_address,
        };

        let peer = device_config.device_mac_address;
        let params = RangingCoordinator::<U>::build_session_parameters(&phone_config, &scope, peer);

        let stream = match self.coordinator.start_ranging(&params) {
            Ok(stream) => stream,
            Err(source) => {
                let error = PairingError::RangingUnavailable { source };
                self.handshake_failed(&error).await;
                self.set_state(SessionState::Idle).await;
                return Err(error);
            },
        };

        let command = configure_command(&phone_config);
        debug!("[{}] Writing configuration {:02X?}", self.identity, command);

        if let Err(source) = self.transport.write(&self.identity, &command).await {
            RangingCoordinator::<U>::stop_ranging(&stream.handle());
            let error = PairingError::TransportWriteFailed { source };
            self.handshake_failed(&error).await;
            return Err(error);
        }

        let handle = stream.handle();
        self.registry.attach_ranging(&self.identity, peer, handle.clone());
        let consumer = self.coordinator.consume(stream, self.registry.clone(), self.events.clone(), self.inputs.clone());

        info!("[{}] Ranging with {} in session {}", self.identity, peer, phone_config.session_id);
        self.set_state(SessionState::Ranging { device_config, handle, consumer }).await;
        Ok(())
    }

    async fn disconnected(&mut self, active: bool) {
        info!("[{}] Disconnected ({})", self.identity, if active { "requested" } else { "link lost" });

        self.teardown();
        self.set_state(SessionState::Idle).await;
        self.emit(SessionEvent::PeerDisconnected { identity: self.identity.clone(), active }).await;

        if !active {
            if let Some(observer) = &self.observer {
                observer.on_passive_disconnect(&self.identity);
            }
        }
    }

    async fn peer_left(&mut self, session_id: i32) {
        match &self.state {
            SessionState::Ranging { handle, .. } if handle.session_id() == session_id => {
                self.teardown();
                self.set_state(SessionState::Idle).await;
            },
            _ => debug!("[{}] Ignoring peer disconnect of stale session {}", self.identity, session_id),
        }
    }

    /// Stops ranging and returns to idle. Does nothing when already idle.
    pub async fn stop(&mut self) {
        self.teardown();
        self.set_state(SessionState::Idle).await;
    }

    fn teardown(&mut self) {
        if let SessionState::Ranging { handle, .. } = &self.state {
            RangingCoordinator::<U>::stop_ranging(handle);
            self.registry.clear_ranging(&self.identity);
        }
    }

    async fn set_state(&mut self, state: SessionState) {
        let previous = self.state.app_state();
        let next = state.app_state();
        self.state = state;

        if previous != next {
            debug!("[{}] {} -> {}", self.identity, previous, next);
            self.emit(SessionEvent::StateChanged { identity: self.identity.clone(), state: next }).await;
        }
    }

    async fn handshake_failed(&mut self, error: &PairingError) {
        warn!("[{}] Handshake failed: {}", self.identity, error);
        self.emit(SessionEvent::HandshakeFailed { identity: self.identity.clone(), reason: error.to_string() }).await;
    }

    async fn emit(&mut self, event: SessionEvent) {
        if let Err(err) = self.events.send(event).await {
            debug!("[{}] No one is listening for session events: {}", self.identity, err);
        }
    }

    /// Drives the session until `cancel` fires or the transport goes away.
    pub async fn run(
        mut self,
        mut inputs: Receiver<SessionInput>,
        mut transport_events: Receiver<TransportEvent>,
        cancel: CancellationToken,
    ) {
        'mainloop: loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                Some(input) = inputs.next() => self.handle_input(input).await,
                event = transport_events.next() => match event {
                    Some(event) => self.handle_transport_event(event).await,
                    None => break 'mainloop,
                },
            };

            if let Err(err) = result {
                debug!("[{}] {}", self.identity, err);
            }
        }

        self.stop().await;
        info!("[{}] Session closed", self.identity);
    }
}

impl<T: BleTransport, U: UwbRanging> Drop for PairingSession<T, U> {
    fn drop(&mut self) {
        self.teardown();
        if let SessionState::Ranging { consumer, .. } = &self.state {
            consumer.abort();
        }
    }
}

fn generate_session_id() -> i32 {
    let mut rng = rand::thread_rng();
    loop {
        let id: i32 = rng.gen();
        if id != 0 {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use futures::future::BoxFuture;
    use crate::device::codec::tests::device_config_bytes;
    use crate::error::{DeviceError, UwbError};
    use crate::uwb::ranging::tests::FakeUwb;
    use crate::uwb::types::{Position, RangingResult, UwbAddress};

    struct FakeTransport {
        fail_writes: Mutex<bool>,
        writes: Mutex<Vec<Vec<u8>>>,
    }

    impl FakeTransport {
        fn new(fail_writes: bool) -> Self {
            FakeTransport { fail_writes: Mutex::new(fail_writes), writes: Mutex::new(Vec::new()) }
        }

        fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl BleTransport for FakeTransport {
        fn write<'a>(&'a self, identity: &'a BleIdentity, data: &'a [u8]) -> BoxFuture<'a, Result<(), DeviceError>> {
            Box::pin(async move {
                self.writes.lock().unwrap().push(data.to_vec());
                if *self.fail_writes.lock().unwrap() {
                    Err(DeviceError::NotConnected(identity.clone()))
                } else {
                    Ok(())
                }
            })
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        calls: Mutex<Vec<BleIdentity>>,
    }

    impl DisconnectObserver for CountingObserver {
        fn on_passive_disconnect(&self, identity: &BleIdentity) {
            self.calls.lock().unwrap().push(identity.clone());
        }
    }

    const PEER: UwbAddress = UwbAddress([0xAB, 0xCD]);

    struct Fixture {
        session: PairingSession<FakeTransport, FakeUwb>,
        inputs: Receiver<SessionInput>,
        events: Receiver<SessionEvent>,
        transport: Arc<FakeTransport>,
        uwb: Arc<FakeUwb>,
        registry: PeerRegistry,
        observer: Arc<CountingObserver>,
    }

    impl Fixture {
        fn drain_events(&mut self) -> Vec<SessionEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn fixture(uwb: FakeUwb, fail_writes: bool) -> Fixture {
        fixture_with_config(uwb, fail_writes, UwbConfig { settle_delay_ms: 0, ..UwbConfig::default() })
    }

    fn fixture_with_config(uwb: FakeUwb, fail_writes: bool, config: UwbConfig) -> Fixture {
        let transport = Arc::new(FakeTransport::new(fail_writes));
        let uwb = Arc::new(uwb);
        let coordinator = Arc::new(RangingCoordinator::new(uwb.clone(), &config));
        let registry = PeerRegistry::new();
        let observer = Arc::new(CountingObserver::default());
        let (events_tx, events) = channel(64);

        let (session, inputs) = PairingSession::new(
            BleIdentity::from("accessory"),
            &config,
            transport.clone(),
            coordinator,
            registry.clone(),
            events_tx,
        );
        let session = session.with_observer(observer.clone());

        Fixture { session, inputs, events, transport, uwb, registry, observer }
    }

    fn config_notification() -> TransportEvent {
        let mut bytes = vec![0x01];
        bytes.extend(device_config_bytes());
        TransportEvent::Notified(bytes)
    }

    fn state_changes(events: &[SessionEvent]) -> Vec<AppState> {
        events.iter().filter_map(|event| match event {
            SessionEvent::StateChanged { state, .. } => Some(*state),
            _ => None,
        }).collect()
    }

    #[tokio::test]
    async fn handshake_reaches_ranging() {
        let mut f = fixture(FakeUwb::new(vec![]), false);
        f.session.handle_transport_event(TransportEvent::Connected).await.unwrap();
        f.session.handle_transport_event(config_notification()).await.unwrap();

        assert_eq!(f.session.state(), AppState::Ranging);
        assert_eq!(state_changes(&f.drain_events()), vec![AppState::Configuring, AppState::Ranging]);

        let writes = f.transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0][0], 0x0B);
        assert_eq!(writes[0].len(), 15);

        let started = f.uwb.started.lock().unwrap().clone();
        assert_eq!(started.len(), 1);
        assert_ne!(started[0].session_id, 0);
        assert_eq!(&writes[0][5..9], &started[0].session_id.to_le_bytes()[..]);
        // channel 9, preamble 10, DS-TWR, controlee, local address
        assert_eq!(&writes[0][9..15], &[10, 9, 1, 0x01, 0x11, 0x22]);
        assert_eq!(started[0].peer_addresses, vec![PEER]);

        let peer = f.registry.get(f.session.identity()).unwrap();
        assert_eq!(peer.uwb_address, Some(PEER));
        assert!(peer.is_ranging());
    }

    #[tokio::test]
    async fn malformed_config_stays_idle() {
        let mut f = fixture(FakeUwb::new(vec![]), false);

        let result = f.session.handle_transport_event(TransportEvent::Notified(vec![0x01, 0x01, 0x00])).await;
        assert!(matches!(result, Err(PairingError::MalformedConfig { .. })));
        assert_eq!(f.session.state(), AppState::Idle);
        assert!(f.transport.writes().is_empty());

        let events = f.drain_events();
        assert!(matches!(events.as_slice(), [SessionEvent::HandshakeFailed { .. }]));
    }

    #[tokio::test]
    async fn write_failure_stays_configuring_without_stream() {
        let mut f = fixture(FakeUwb::new(vec![]), true);

        let result = f.session.handle_transport_event(config_notification()).await;
        assert!(matches!(result, Err(PairingError::TransportWriteFailed { .. })));
        assert_eq!(f.session.state(), AppState::Configuring);
        assert!(f.registry.ranging_peers().is_empty());

        // the stream opened for the attempt is gone again
        assert_eq!(f.uwb.started.lock().unwrap().len(), 1);
        assert_eq!(f.uwb.live_streams(), 0);

        // caller decides to retry, this time the write goes through
        *f.transport.fail_writes.lock().unwrap() = false;
        f.session.retry_configuration().await.unwrap();
        assert_eq!(f.session.state(), AppState::Ranging);

        let started = f.uwb.started.lock().unwrap().clone();
        assert_eq!(started.len(), 2);
        assert_eq!(f.uwb.live_streams(), 1);
        assert_eq!(f.registry.ranging_peers().len(), 1);
    }

    #[tokio::test]
    async fn retry_requires_configuring() {
        let mut f = fixture(FakeUwb::new(vec![]), false);
        assert!(matches!(f.session.retry_configuration().await, Err(PairingError::NotConfiguring)));
    }

    #[tokio::test]
    async fn scope_failure_returns_to_idle() {
        let mut uwb = FakeUwb::new(vec![]);
        uwb.scope = Err(UwbError::ScopeUnavailable("busy".to_string()));
        let mut f = fixture(uwb, false);

        let result = f.session.handle_transport_event(config_notification()).await;
        assert!(matches!(result, Err(PairingError::LocalScopeAcquisitionFailed { .. })));
        assert_eq!(f.session.state(), AppState::Idle);
        assert!(f.transport.writes().is_empty());
        assert!(f.uwb.started.lock().unwrap().is_empty());
        assert_eq!(state_changes(&f.drain_events()), vec![AppState::Configuring, AppState::Idle]);
    }

    #[tokio::test]
    async fn scope_timeout_returns_to_idle() {
        let mut uwb = FakeUwb::new(vec![]);
        uwb.scope_delay = Some(Duration::from_millis(300));
        let config = UwbConfig { settle_delay_ms: 0, scope_timeout_ms: 50, ..UwbConfig::default() };
        let mut f = fixture_with_config(uwb, false, config);

        let result = f.session.handle_transport_event(config_notification()).await;
        assert!(matches!(
            result,
            Err(PairingError::LocalScopeAcquisitionFailed { source: UwbError::ScopeTimeout(_) })
        ));
        assert_eq!(f.session.state(), AppState::Idle);
        assert!(f.transport.writes().is_empty());
        assert_eq!(f.uwb.live_streams(), 0);

        let events = f.drain_events();
        assert!(events.iter().any(|event| matches!(event, SessionEvent::HandshakeFailed { .. })));
        assert_eq!(state_changes(&events), vec![AppState::Configuring, AppState::Idle]);
    }

    #[tokio::test]
    async fn stop_confirmation_after_stop_is_not_a_failure() {
        let mut f = fixture(FakeUwb::new(vec![]), false);
        f.session.handle_transport_event(config_notification()).await.unwrap();
        f.session.stop().await;
        f.drain_events();

        f.session.handle_transport_event(TransportEvent::Notified(vec![0x03])).await.unwrap();
        f.session.handle_transport_event(TransportEvent::Notified(vec![0x02])).await.unwrap();
        f.session.handle_transport_event(TransportEvent::Notified(vec![0x7F, 0x00])).await.unwrap();

        assert_eq!(f.session.state(), AppState::Idle);
        assert!(f.drain_events().is_empty());
        assert_eq!(f.transport.writes().len(), 1);
    }

    #[tokio::test]
    async fn peer_disconnect_sample_returns_to_idle() {
        let mut f = fixture(FakeUwb::new(vec![RangingResult::PeerDisconnected { peer: PEER }]), false);
        f.session.handle_transport_event(config_notification()).await.unwrap();
        assert_eq!(f.session.state(), AppState::Ranging);

        let input = f.inputs.next().await.unwrap();
        assert!(matches!(input, SessionInput::PeerDisconnected { .. }));
        f.session.handle_input(input).await.unwrap();

        assert_eq!(f.session.state(), AppState::Idle);
        let peer = f.registry.get(f.session.identity()).unwrap();
        assert!(peer.ranging.is_none());
        assert!(f.observer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn passive_disconnect_tears_down_and_notifies_observer() {
        let mut f = fixture(FakeUwb::new(vec![]), false);
        f.session.handle_transport_event(config_notification()).await.unwrap();
        let handle = f.registry.get(f.session.identity()).unwrap().ranging.unwrap();
        f.drain_events();

        f.session.handle_transport_event(TransportEvent::Disconnected { active: false }).await.unwrap();

        assert_eq!(f.session.state(), AppState::Idle);
        assert!(handle.is_disposed());
        assert!(f.registry.ranging_peers().is_empty());
        // entry is kept for a later reconnect
        assert!(f.registry.get(f.session.identity()).is_some());
        assert_eq!(f.observer.calls.lock().unwrap().len(), 1);

        let events = f.drain_events();
        assert!(events.contains(&SessionEvent::PeerDisconnected { identity: BleIdentity::from("accessory"), active: false }));
    }

    #[tokio::test]
    async fn active_disconnect_skips_observer() {
        let mut f = fixture(FakeUwb::new(vec![]), false);
        f.session.handle_transport_event(config_notification()).await.unwrap();
        f.session.handle_transport_event(TransportEvent::Disconnected { active: true }).await.unwrap();

        assert_eq!(f.session.state(), AppState::Idle);
        assert!(f.observer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut f = fixture(FakeUwb::new(vec![]), false);
        f.session.stop().await;
        assert_eq!(f.session.state(), AppState::Idle);
        assert!(f.drain_events().is_empty());

        f.session.handle_transport_event(config_notification()).await.unwrap();
        f.session.stop().await;
        f.session.stop().await;
        assert_eq!(f.session.state(), AppState::Idle);
        assert!(f.registry.ranging_peers().is_empty());
    }

    #[tokio::test]
    async fn notifications_while_ranging_do_not_restart_handshake() {
        let mut f = fixture(FakeUwb::new(vec![]), false);
        f.session.handle_transport_event(config_notification()).await.unwrap();
        f.session.handle_transport_event(TransportEvent::Notified(vec![0x02])).await.unwrap();
        f.session.handle_transport_event(config_notification()).await.unwrap();

        assert_eq!(f.session.state(), AppState::Ranging);
        assert_eq!(f.transport.writes().len(), 1);
    }

    #[tokio::test]
    async fn samples_reach_presentation_layer() {
        let sample = Position { distance: Some(2.0), azimuth: None, elevation: None };
        let mut f = fixture(FakeUwb::new(vec![RangingResult::Position { peer: PEER, position: sample }]), false);
        f.session.handle_transport_event(config_notification()).await.unwrap();

        let received = loop {
            match f.events.next().await.unwrap() {
                SessionEvent::SampleReceived { position, .. } => break position,
                _ => continue,
            }
        };
        assert_eq!(received, sample);
    }

    #[tokio::test]
    async fn run_loop_stops_on_cancel() {
        let f = fixture(FakeUwb::new(vec![]), false);
        let registry = f.registry.clone();
        let (mut transport_tx, transport_rx) = channel(8);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(f.session.run(f.inputs, transport_rx, cancel.clone()));
        transport_tx.send(TransportEvent::Connected).await.unwrap();
        transport_tx.send(config_notification()).await.unwrap();

        // wait until the handshake went through
        let mut events = f.events;
        loop {
            if let Some(SessionEvent::StateChanged { state: AppState::Ranging, .. }) = events.next().await {
                break;
            }
        }

        cancel.cancel();
        task.await.unwrap();
        assert!(registry.ranging_peers().is_empty());
    }
}
