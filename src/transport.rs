use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::{collections::HashMap, fmt, hash::Hash};
use uuid::Uuid;

use crate::{error::Result, types::ManufacturerData};

/// Power state of the local Bluetooth radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    /// Ready to scan and connect
    PoweredOn,
    /// Radio switched off
    PoweredOff,
    /// State not reported by the platform
    Unknown,
}

/// One advertisement event observed while scanning
///
/// A field is `None` (or empty) when this particular packet did not carry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanData<P> {
    /// Transport handle of the advertising peer
    pub peer: P,
    /// Complete or shortened local name
    pub local_name: Option<String>,
    /// Manufacturer specific data record
    pub manufacturer_data: Option<ManufacturerData>,
    /// Advertised service UUIDs
    pub service_uuids: Vec<Uuid>,
    /// Received signal strength
    pub rssi: Option<i16>,
    /// Raw advertisement bytes, when the platform exposes them
    pub raw: Option<Bytes>,
}

impl<P> ScanData<P> {
    /// Create an empty event for a peer
    pub const fn new(peer: P) -> Self {
        Self {
            peer,
            local_name: None,
            manufacturer_data: None,
            service_uuids: Vec::new(),
            rssi: None,
            raw: None,
        }
    }

    /// Set the local name
    #[must_use]
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    /// Set the manufacturer data
    #[must_use]
    pub fn with_manufacturer_data(mut self, data: ManufacturerData) -> Self {
        self.manufacturer_data = Some(data);
        self
    }

    /// Add advertised services
    #[must_use]
    pub fn with_services(mut self, services: impl IntoIterator<Item = Uuid>) -> Self {
        self.service_uuids.extend(services);
        self
    }
}

/// Connection lifecycle change pushed by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent<P> {
    /// Peer connected
    Connected(P),
    /// Peer disconnected, by either side
    Disconnected(P),
}

/// Stream of scan events
pub type ScanStream<P> = BoxStream<'static, Result<ScanData<P>>>;

/// Stream of raw notification frames in arrival order
pub type FrameStream = BoxStream<'static, Bytes>;

/// Stream of connection lifecycle events
pub type ConnectionEventStream<P> = BoxStream<'static, ConnectionEvent<P>>;

/// BLE central capabilities the library is built on
///
/// GATT discovery, connection management and radio access are provided by the
/// implementation; the library only drives them.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Handle identifying a remote peer
    type Peer: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// Handle identifying a resolved characteristic
    type Characteristic: Clone + fmt::Debug + Send + Sync + 'static;

    /// Current radio power state
    async fn radio_state(&self) -> Result<RadioState>;

    /// Start scanning
    ///
    /// The stream ends after [`Transport::stop_scan`] or yields an error if the scan fails.
    async fn scan(&self, filter_duplicates: bool) -> Result<ScanStream<Self::Peer>>;

    /// Stop an active scan
    async fn stop_scan(&self) -> Result<()>;

    /// Open a connection to a peer
    async fn connect(&self, peer: &Self::Peer) -> Result<()>;

    /// Close the connection to a peer
    async fn disconnect(&self, peer: &Self::Peer) -> Result<()>;

    /// Look up characteristics of a service on a connected peer
    ///
    /// Characteristics that do not exist are absent from the returned map. A missing
    /// service is [`crate::SunnyFitError::ServiceNotFound`].
    async fn resolve_characteristics(
        &self,
        peer: &Self::Peer,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<HashMap<Uuid, Self::Characteristic>>;

    /// Write a value to a characteristic
    async fn write(
        &self,
        peer: &Self::Peer,
        characteristic: &Self::Characteristic,
        data: &[u8],
        with_response: bool,
    ) -> Result<()>;

    /// Enable notifications and stream the received frames
    async fn subscribe(
        &self,
        peer: &Self::Peer,
        characteristic: &Self::Characteristic,
    ) -> Result<FrameStream>;

    /// Subscribe to connection lifecycle events of all peers
    async fn connection_events(&self) -> Result<ConnectionEventStream<Self::Peer>>;
}
