use async_trait::async_trait;
use btleplug::{
    api::{
        Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
        ScanFilter, WriteType,
    },
    platform::{Adapter, Manager, Peripheral, PeripheralId},
};
use bytes::Bytes;
use futures::{future, stream::StreamExt};
use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{Result, SunnyFitError},
    transport::{
        ConnectionEvent, ConnectionEventStream, FrameStream, RadioState, ScanData, ScanStream,
        Transport,
    },
    types::ManufacturerData,
    EM_MICROELECTRONIC_COMPANY_ID,
};

/// [`Transport`] backed by the first Bluetooth adapter found by btleplug
pub struct BtleplugTransport {
    _manager: Manager,
    adapter: Adapter,
    scan_stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl BtleplugTransport {
    /// Open the first Bluetooth adapter
    ///
    /// # Errors
    ///
    /// Returns [`SunnyFitError::BluetoothUnavailable`] if there is no adapter, or
    /// [`SunnyFitError::Ble`] if the platform Bluetooth stack cannot be initialized.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(SunnyFitError::BluetoothUnavailable)?;

        Ok(Self {
            _manager: manager,
            adapter,
            scan_stop: Mutex::new(None),
        })
    }

    /// Adapter in use
    #[must_use]
    pub const fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn peripheral(&self, id: &PeripheralId) -> Result<Peripheral> {
        Ok(self.adapter.peripheral(id).await?)
    }
}

/// Pick the record to match against when a peer advertises several companies
fn select_manufacturer_data(records: &HashMap<u16, Vec<u8>>) -> Option<ManufacturerData> {
    records
        .get_key_value(&EM_MICROELECTRONIC_COMPANY_ID)
        .or_else(|| records.iter().min_by_key(|&(company, _)| *company))
        .map(|(company, data)| ManufacturerData::new(*company, data.clone()))
}

async fn scan_data(adapter: &Adapter, id: PeripheralId) -> Option<ScanData<PeripheralId>> {
    let peripheral = match adapter.peripheral(&id).await {
        Ok(peripheral) => peripheral,
        Err(e) => {
            debug!("Peripheral {:?} vanished: {}", id, e);
            return None;
        }
    };
    let properties = match peripheral.properties().await {
        Ok(properties) => properties?,
        Err(e) => {
            debug!("No properties for {:?}: {}", id, e);
            return None;
        }
    };

    let mut data = ScanData::new(id).with_services(properties.services);
    data.local_name = properties.local_name;
    data.manufacturer_data = select_manufacturer_data(&properties.manufacturer_data);
    data.rssi = properties.rssi;
    Some(data)
}

#[async_trait]
impl Transport for BtleplugTransport {
    type Peer = PeripheralId;
    type Characteristic = Characteristic;

    async fn radio_state(&self) -> Result<RadioState> {
        Ok(match self.adapter.adapter_state().await? {
            CentralState::PoweredOn => RadioState::PoweredOn,
            CentralState::PoweredOff => RadioState::PoweredOff,
            _ => RadioState::Unknown,
        })
    }

    async fn scan(&self, filter_duplicates: bool) -> Result<ScanStream<PeripheralId>> {
        // btleplug always reports updates; the aggregator coalesces them
        debug!("Starting scan (filter duplicates: {})", filter_duplicates);

        let events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let (stop_tx, stop_rx) = oneshot::channel();
        *self.scan_stop.lock().await = Some(stop_tx);

        let adapter = self.adapter.clone();
        let stream = events
            .take_until(stop_rx)
            .filter_map(move |event| {
                let adapter = adapter.clone();
                async move {
                    let id = match event {
                        CentralEvent::DeviceDiscovered(id)
                        | CentralEvent::DeviceUpdated(id)
                        | CentralEvent::ManufacturerDataAdvertisement { id, .. }
                        | CentralEvent::ServicesAdvertisement { id, .. } => id,
                        _ => return None,
                    };
                    scan_data(&adapter, id).await.map(Ok)
                }
            })
            .boxed();

        Ok(stream)
    }

    async fn stop_scan(&self) -> Result<()> {
        if let Some(stop) = self.scan_stop.lock().await.take() {
            let _ = stop.send(());
        }
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, peer: &PeripheralId) -> Result<()> {
        let peripheral = self.peripheral(peer).await?;
        if peripheral.is_connected().await? {
            return Ok(());
        }
        peripheral
            .connect()
            .await
            .map_err(|e| SunnyFitError::ConnectionFailed(e.to_string()))
    }

    async fn disconnect(&self, peer: &PeripheralId) -> Result<()> {
        self.peripheral(peer).await?.disconnect().await?;
        Ok(())
    }

    async fn resolve_characteristics(
        &self,
        peer: &PeripheralId,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<HashMap<Uuid, Characteristic>> {
        let peripheral = self.peripheral(peer).await?;
        peripheral.discover_services().await?;

        let services = peripheral.services();
        let Some(found) = services.iter().find(|s| s.uuid == service) else {
            info!("Service {} not found on {:?}", service, peer);
            return Err(SunnyFitError::ServiceNotFound(service));
        };

        Ok(found
            .characteristics
            .iter()
            .filter(|c| characteristics.contains(&c.uuid))
            .map(|c| (c.uuid, c.clone()))
            .collect())
    }

    async fn write(
        &self,
        peer: &PeripheralId,
        characteristic: &Characteristic,
        data: &[u8],
        with_response: bool,
    ) -> Result<()> {
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.peripheral(peer)
            .await?
            .write(characteristic, data, write_type)
            .await
            .map_err(|e| SunnyFitError::Transport(format!("Failed to send command: {e}")))
    }

    async fn subscribe(
        &self,
        peer: &PeripheralId,
        characteristic: &Characteristic,
    ) -> Result<FrameStream> {
        let peripheral = self.peripheral(peer).await?;
        let notifications = peripheral.notifications().await?;
        peripheral.subscribe(characteristic).await?;

        let uuid = characteristic.uuid;
        Ok(notifications
            .filter(move |notification| future::ready(notification.uuid == uuid))
            .map(|notification| Bytes::from(notification.value))
            .boxed())
    }

    async fn connection_events(&self) -> Result<ConnectionEventStream<PeripheralId>> {
        let events = self.adapter.events().await?;
        Ok(events
            .filter_map(|event| {
                future::ready(match event {
                    CentralEvent::DeviceConnected(id) => Some(ConnectionEvent::Connected(id)),
                    CentralEvent::DeviceDisconnected(id) => Some(ConnectionEvent::Disconnected(id)),
                    _ => None,
                })
            })
            .boxed())
    }
}
