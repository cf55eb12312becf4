use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use futures::channel::mpsc::Sender;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::{spawn_blocking, JoinHandle};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::config::types::UwbConfig;
use crate::device::codec::PhoneConfig;
use crate::device::constants::SESSION_KEY;
use crate::error::UwbError;
use crate::session::registry::PeerRegistry;
use crate::session::types::{SessionEvent, SessionInput};
use crate::uwb::types::{ComplexChannel, LocalScope, RangingResult, RangingRole, SessionParameters, UpdateRate, UwbAddress};

/// The platform UWB stack.
pub trait UwbRanging: Send + Sync + 'static {
    /// Blocks until the stack hands out a session scope for `role`.
    fn acquire_local_scope(&self, role: RangingRole) -> Result<LocalScope, UwbError>;

    /// Opens a ranging session. Samples flow once the returned stream is polled.
    fn start_ranging(&self, params: &SessionParameters) -> Result<BoxStream<'static, RangingResult>, UwbError>;
}

/// Cancels the ranging stream it was created for. Cloneable, disposal happens once.
#[derive(Clone)]
pub struct RangingHandle {
    session_id: i32,
    cancel: CancellationToken,
    disposed: Arc<AtomicBool>,
}

impl RangingHandle {
    pub fn new(session_id: i32) -> Self {
        RangingHandle {
            session_id,
            cancel: CancellationToken::new(),
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    /// Returns false if the stream was already disposed.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.cancel.cancel();
        true
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub async fn disposed(&self) {
        self.cancel.cancelled().await
    }
}

impl fmt::Debug for RangingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangingHandle")
            .field("session_id", &self.session_id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// An opened, not yet consumed, ranging session.
pub struct SampleStream {
    handle: RangingHandle,
    results: BoxStream<'static, RangingResult>,
}

impl SampleStream {
    pub fn handle(&self) -> RangingHandle {
        self.handle.clone()
    }
}

pub struct RangingCoordinator<U: UwbRanging> {
    uwb: Arc<U>,
    scope_timeout: Duration,
    settle_delay: Duration,
}

impl<U: UwbRanging> RangingCoordinator<U> {
    pub fn new(uwb: Arc<U>, config: &UwbConfig) -> Self {
        RangingCoordinator {
            uwb,
            scope_timeout: Duration::from_millis(config.scope_timeout_ms),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
        }
    }

    /// Runs the blocking scope acquisition on the blocking pool, bounded by the scope timeout.
    pub async fn acquire_local_scope(&self, role: RangingRole) -> Result<LocalScope, UwbError> {
        let uwb = self.uwb.clone();
        let task = spawn_blocking(move || uwb.acquire_local_scope(role));

        match timeout(self.scope_timeout, task).await {
            Err(_) => Err(UwbError::ScopeTimeout(self.scope_timeout)),
            Ok(Err(join_error)) => Err(UwbError::ScopeUnavailable(join_error.to_string())),
            Ok(Ok(result)) => result,
        }
    }

    pub fn build_session_parameters(phone_config: &PhoneConfig, scope: &LocalScope, peer: UwbAddress) -> SessionParameters {
        SessionParameters {
            role: scope.role,
            profile_id: phone_config.profile_id,
            session_id: phone_config.session_id,
            sub_session_id: 0,
            session_key: SESSION_KEY.to_vec(),
            sub_session_key: Vec::new(),
            complex_channel: ComplexChannel {
                channel: phone_config.channel,
                preamble_index: phone_config.preamble_index,
            },
            peer_addresses: vec![peer],
            update_rate: UpdateRate::Frequent,
        }
    }

    pub fn start_ranging(&self, params: &SessionParameters) -> Result<SampleStream, UwbError> {
        let results = self.uwb.start_ranging(params)?;
        info!("Opened ranging session {} with {:?}", params.session_id, params.peer_addresses);

        Ok(SampleStream {
            handle: RangingHandle::new(params.session_id),
            results,
        })
    }

    pub fn stop_ranging(handle: &RangingHandle) -> bool {
        let disposed = handle.dispose();
        if disposed {
            info!("Stopped ranging session {}", handle.session_id());
        }
        disposed
    }

    /// Consumes `stream` on its own task until it is disposed or the peer disconnects.
    ///
    /// Samples are attributed through `registry`; samples from addresses no peer owns yet
    /// are dropped.
    pub fn consume(
        &self,
        stream: SampleStream,
        registry: PeerRegistry,
        mut events: Sender<SessionEvent>,
        mut inputs: Sender<SessionInput>,
    ) -> JoinHandle<()> {
        let settle_delay = self.settle_delay;
        let SampleStream { handle, mut results } = stream;

        spawn(async move {
            // give the firmware time to settle after the configuration write
            tokio::select! {
                biased;
                _ = handle.disposed() => return,
                _ = sleep(settle_delay) => {},
            }

            'mainloop: loop {
                tokio::select! {
                    biased;
                    _ = handle.disposed() => {
                        break 'mainloop;
                    },
                    result = results.next() => match result {
                        None => {
                            debug!("Ranging session {} ended", handle.session_id());
                            break 'mainloop;
                        },
                        Some(RangingResult::Position { peer, position }) => {
                            let Some(device) = registry.record_position(peer, &position) else {
                                continue 'mainloop;
                            };

                            let event = SessionEvent::SampleReceived {
                                identity: device.identity,
                                peer,
                                position: device.position,
                            };
                            if let Err(err) = events.send(event).await {
                                debug!("Dropping sample, no one is listening: {}", err);
                            }
                        },
                        Some(RangingResult::PeerDisconnected { peer }) => {
                            info!("Peer {} left ranging session {}", peer, handle.session_id());
                            Self::stop_ranging(&handle);

                            let input = SessionInput::PeerDisconnected { session_id: handle.session_id() };
                            if let Err(err) = inputs.send(input).await {
                                warn!("Failed to notify session about peer disconnect: {}", err);
                            }
                            break 'mainloop;
                        },
                    },
                }
            }
        })
    }
}
