use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use futures::channel::mpsc::Sender;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use log::{debug, info, warn};
use tokio::spawn;
use tokio_util::sync::CancellationToken;
use tokio::time::{sleep, timeout, Duration};

use crate::config::types::BleConfig;
use crate::device::constants::{make_uart_service_uuid, make_uart_rx_uuid, make_uart_tx_uuid, COMMAND_INITIALIZE, CONNECTION_POLL_DELAY, IS_CONNECTED_DEADLINE};
use crate::device::transport::BleTransport;
use crate::device::types::{BleIdentity, DiscoveredAccessory, TransportEvent};
use crate::error::DeviceError;

struct Link {
    peripheral: Peripheral,
    rx_char: Characteristic,
    events: Sender<TransportEvent>,
    cancel: CancellationToken,
}

type Links = Arc<Mutex<HashMap<BleIdentity, Link>>>;

/// BLE central for ranging accessories, built on btleplug.
#[derive(Clone)]
pub struct BtleTransport {
    adapters: Vec<Adapter>,
    discovered: Arc<Mutex<HashMap<BleIdentity, Peripheral>>>,
    links: Links,
    scan_duration: Duration,
    connect_deadline: Duration,
    write_deadline: Duration,
}

async fn start_scanning(adapters: &Vec<Adapter>) -> Result<(), DeviceError> {
    // accessories do not advertise the UART service, so filter on names afterwards
    let filter = ScanFilter::default();

    for adapter in adapters {
        info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        adapter.start_scan(filter.clone()).await?;
    }

    Ok(())
}

async fn stop_scanning(adapters: &Vec<Adapter>) {
    for adapter in adapters {
        if let Err(err) = adapter.stop_scan().await {
            warn!("Failed to stop scanning: {:?}", err);
        }
    }
}

async fn find_peripherals(adapters: &Vec<Adapter>, names: &[String]) -> Vec<(DiscoveredAccessory, Peripheral)> {
    let mut found = Vec::new();

    for adapter in adapters {
        let peripherals = match adapter.peripherals().await {
            Ok(v) => v,
            Err(err) => {
                warn!("Failed to query BLE adapter for peripherals: {}", err);
                continue;
            },
        };

        for peripheral in peripherals {
            match peripheral.properties().await {
                Err(err) => {
                    warn!("Could not query peripheral for properties: {:?}", err);
                },
                Ok(None) => {
                    debug!("Peripheral has no properties");
                },
                Ok(Some(properties)) => {
                    let Some(name) = properties.local_name else {
                        continue;
                    };

                    if names.iter().any(|known| known == &name) {
                        info!("Found accessory {} {} rssi {:?}", name, properties.address, properties.rssi);
                        let accessory = DiscoveredAccessory {
                            identity: BleIdentity(format!("{:?}", peripheral.id())),
                            name,
                            rssi: properties.rssi,
                        };
                        found.push((accessory, peripheral));
                    }
                },
            }
        }
    }

    found
}

async fn connect_peripheral(peripheral: &Peripheral) -> Result<(Characteristic, Characteristic), DeviceError> {
    let service_uuid = make_uart_service_uuid();
    let rx_uuid = make_uart_rx_uuid();
    let tx_uuid = make_uart_tx_uuid();

    info!("Connecting to peripheral...");
    peripheral.connect().await?;

    info!("Connected; Discovering services...");
    peripheral.discover_services().await?;

    let service = peripheral
        .services()
        .into_iter()
        .find(|service| service.uuid == service_uuid)
        .ok_or(DeviceError::MissingCharacteristic)?;

    let rx_char = service.characteristics.iter().find(|c| c.uuid == rx_uuid).cloned();
    let tx_char = service.characteristics.iter().find(|c| c.uuid == tx_uuid).cloned();

    match (rx_char, tx_char) {
        (Some(rx_char), Some(tx_char)) => {
            info!("Subscribing to characteristic {:?} {:?}", service.uuid, tx_char.uuid);
            peripheral.subscribe(&tx_char).await?;
            Ok((rx_char, tx_char))
        },
        _ => Err(DeviceError::MissingCharacteristic),
    }
}

async fn write_with_deadline(peripheral: &Peripheral, rx_char: &Characteristic, data: &[u8], deadline: Duration) -> Result<(), DeviceError> {
    let fut = peripheral.write(rx_char, data, WriteType::WithResponse);

    tokio::select! {
        _ = sleep(deadline) => {
            warn!("Sending to rx characteristic took too long");
            Err(DeviceError::Timeout(deadline))
        }
        result = fut => {
            result.map_err(DeviceError::from)
        }
    }
}

async fn send_event(events: &mut Sender<TransportEvent>, event: TransportEvent) {
    if let Err(err) = events.send(event).await {
        debug!("Dropping transport event, session is gone: {}", err);
    }
}

// The stream is opened before returning so no reply to a following write is missed.
async fn read_notifications_task(cancel: CancellationToken, peripheral: &Peripheral, mut events: Sender<TransportEvent>) -> Result<(), DeviceError> {
    let tx_uuid = make_uart_tx_uuid();
    let mut notification_stream = peripheral.notifications().await?;

    spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                data = notification_stream.next() => match data {
                    Some(data) if data.uuid == tx_uuid => {
                        debug!("Notification {:02X?}", data.value);
                        send_event(&mut events, TransportEvent::Notified(data.value)).await;
                    },
                    Some(_) => {},
                    None => break 'mainloop,
                },
            }
        }
    });

    Ok(())
}

fn watch_connection_task(cancel: CancellationToken, identity: BleIdentity, peripheral: &Peripheral, links: Links) {
    let peripheral_clone = peripheral.clone();

    spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return;
                },
                _ = sleep(Duration::from_millis(CONNECTION_POLL_DELAY)) => {},
            }

            tokio::select! {
                _ = sleep(Duration::from_millis(IS_CONNECTED_DEADLINE)) => {
                    // macOS
                    warn!("Checking for connection status took too long");
                    break 'mainloop;
                }
                result = peripheral_clone.is_connected() => match result {
                    Err(err) => {
                        warn!("Error checking for connection state: {:?}", err);
                        break 'mainloop;
                    },
                    Ok(false) => {
                        warn!("Connection lost");
                        break 'mainloop;
                    },
                    Ok(true) => {},
                }
            }
        }

        let link = links.lock().expect("Failed to lock BtleTransport links").remove(&identity);
        if let Some(mut link) = link {
            link.cancel.cancel();
            send_event(&mut link.events, TransportEvent::Disconnected { active: false }).await;
        }
    });
}

impl BtleTransport {
    pub async fn new(config: &BleConfig) -> Result<Self, DeviceError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        if adapters.is_empty() {
            return Err(DeviceError::NoAdapter);
        }

        Ok(BtleTransport {
            adapters,
            discovered: Arc::new(Mutex::new(HashMap::new())),
            links: Arc::new(Mutex::new(HashMap::new())),
            scan_duration: Duration::from_millis(config.scan_timeout_ms),
            connect_deadline: Duration::from_millis(config.connect_timeout_ms),
            write_deadline: Duration::from_millis(config.write_timeout_ms),
        })
    }

    /// Scans for the scan duration and returns the accessories whose advertised name is in `names`.
    pub async fn scan(&self, names: &[String]) -> Result<Vec<DiscoveredAccessory>, DeviceError> {
        start_scanning(&self.adapters).await?;
        sleep(self.scan_duration).await;
        let found = find_peripherals(&self.adapters, names).await;
        stop_scanning(&self.adapters).await;

        let mut discovered = self.discovered.lock().expect("Failed to lock BtleTransport discovered");
        Ok(found
            .into_iter()
            .map(|(accessory, peripheral)| {
                discovered.insert(accessory.identity.clone(), peripheral);
                accessory
            })
            .collect())
    }

    /// Connects to a scanned accessory and asks it for its configuration.
    ///
    /// Notifications and link loss are reported on `events` until [`Self::disconnect`].
    pub async fn connect(&self, identity: &BleIdentity, mut events: Sender<TransportEvent>) -> Result<(), DeviceError> {
        let peripheral = self.discovered
            .lock()
            .expect("Failed to lock BtleTransport discovered")
            .get(identity)
            .cloned()
            .ok_or_else(|| DeviceError::NotConnected(identity.clone()))?;

        let (rx_char, _tx_char) = match timeout(self.connect_deadline, connect_peripheral(&peripheral)).await {
            Ok(result) => result?,
            Err(_) => return Err(DeviceError::Timeout(self.connect_deadline)),
        };

        let cancel = CancellationToken::new();
        read_notifications_task(cancel.clone(), &peripheral, events.clone()).await?;
        send_event(&mut events, TransportEvent::Connected).await;

        self.links.lock().expect("Failed to lock BtleTransport links").insert(identity.clone(), Link {
            peripheral: peripheral.clone(),
            rx_char: rx_char.clone(),
            events,
            cancel: cancel.clone(),
        });
        watch_connection_task(cancel, identity.clone(), &peripheral, self.links.clone());

        if let Err(err) = write_with_deadline(&peripheral, &rx_char, &[COMMAND_INITIALIZE], self.write_deadline).await {
            warn!("Failed to send initialize command: {:?}", err);
        }

        info!("Peripheral {} ready", identity);
        Ok(())
    }

    pub async fn disconnect(&self, identity: &BleIdentity) -> Result<(), DeviceError> {
        let link = self.links.lock().expect("Failed to lock BtleTransport links").remove(identity);
        let Some(mut link) = link else {
            return Err(DeviceError::NotConnected(identity.clone()));
        };

        link.cancel.cancel();
        let result = link.peripheral.disconnect().await;
        send_event(&mut link.events, TransportEvent::Disconnected { active: true }).await;
        result?;
        Ok(())
    }

    pub fn connected(&self) -> Vec<BleIdentity> {
        self.links.lock().expect("Failed to lock BtleTransport links").keys().cloned().collect()
    }
}

impl BleTransport for BtleTransport {
    fn write<'a>(&'a self, identity: &'a BleIdentity, data: &'a [u8]) -> BoxFuture<'a, Result<(), DeviceError>> {
        Box::pin(async move {
            let target = self.links
                .lock()
                .expect("Failed to lock BtleTransport links")
                .get(identity)
                .map(|link| (link.peripheral.clone(), link.rx_char.clone()));

            let Some((peripheral, rx_char)) = target else {
                return Err(DeviceError::NotConnected(identity.clone()));
            };

            write_with_deadline(&peripheral, &rx_char, data, self.write_deadline).await
        })
    }
}
