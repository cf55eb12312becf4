//! Stand-in UWB stack for hosts without UWB hardware.
//!
//! Hands out a random local address and reports a slowly drifting position for every peer
//! of a session. Angles are occasionally left out, the way real sensors sometimes only
//! resolve the distance.

use std::thread;
use std::time::Duration;
use futures::stream::{self, BoxStream, StreamExt};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::sleep;

use crate::config::types::UwbConfig;
use crate::error::UwbError;
use crate::uwb::ranging::UwbRanging;
use crate::uwb::types::{ComplexChannel, LocalScope, Position, RangingResult, RangingRole, SessionParameters, UwbAddress};

/**
 * How long (milliseconds) bringing up the local stack takes.
 */
const SCOPE_ACQUISITION_DELAY: u64 = 50;

pub struct SimulatedUwb {
    complex_channel: ComplexChannel,
    sample_interval: Duration,
}

impl SimulatedUwb {
    pub fn new(config: &UwbConfig) -> Self {
        SimulatedUwb {
            complex_channel: ComplexChannel {
                channel: config.channel,
                preamble_index: config.preamble_index,
            },
            sample_interval: Duration::from_millis(config.sample_interval_ms),
        }
    }
}

struct Walk {
    rng: StdRng,
    peers: Vec<UwbAddress>,
    distances: Vec<f32>,
    next: usize,
}

impl Walk {
    fn step(&mut self) -> RangingResult {
        let index = self.next % self.peers.len();
        self.next += 1;

        let distance = (self.distances[index] + self.rng.gen_range(-0.05..0.05)).max(0.1);
        self.distances[index] = distance;

        let with_angles = self.rng.gen_bool(0.8);
        let position = Position {
            distance: Some(distance),
            azimuth: with_angles.then(|| self.rng.gen_range(-60.0..60.0)),
            elevation: with_angles.then(|| self.rng.gen_range(-30.0..30.0)),
        };

        RangingResult::Position { peer: self.peers[index], position }
    }
}

impl UwbRanging for SimulatedUwb {
    fn acquire_local_scope(&self, role: RangingRole) -> Result<LocalScope, UwbError> {
        thread::sleep(Duration::from_millis(SCOPE_ACQUISITION_DELAY));

        let local_address = UwbAddress(rand::thread_rng().gen());
        info!("Simulated UWB stack ready as {} with address {}", role, local_address);

        Ok(LocalScope {
            role,
            local_address,
            complex_channel: self.complex_channel,
        })
    }

    fn start_ranging(&self, params: &SessionParameters) -> Result<BoxStream<'static, RangingResult>, UwbError> {
        if params.peer_addresses.is_empty() {
            return Err(UwbError::RangingUnavailable("no peers to range with".to_string()));
        }

        let mut rng = StdRng::from_entropy();
        let distances = params.peer_addresses.iter().map(|_| rng.gen_range(0.5..5.0)).collect();
        let walk = Walk {
            rng,
            peers: params.peer_addresses.clone(),
            distances,
            next: 0,
        };
        let interval = self.sample_interval;

        let results = stream::unfold(walk, move |mut walk| async move {
            sleep(interval).await;
            let result = walk.step();
            Some((result, walk))
        });

        Ok(results.boxed())
    }
}
