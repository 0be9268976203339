use bytes::Bytes;
use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    hash::Hash,
    sync::Arc,
    time::SystemTime,
};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    transport::ScanData,
    types::{AccessoryIdentity, ManufacturerData},
};

const IDENTITY_CHANNEL_CAPACITY: usize = 64;

/// Everything learned about one peer during the current scan
///
/// A device may need several packets (primary advertisement and scan response) before
/// both its name and manufacturer data are known, so fields are only ever overwritten
/// by newer values, never cleared by absence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    /// Last seen local name
    pub local_name: Option<String>,
    /// Last seen manufacturer data
    pub manufacturer_data: Option<ManufacturerData>,
    /// Union of all advertised services
    pub service_uuids: BTreeSet<Uuid>,
    /// Last seen signal strength
    pub rssi: Option<i16>,
    /// Last raw advertisement
    pub raw: Option<Bytes>,
    /// Identity once enough information has been collected
    pub identity: Option<AccessoryIdentity>,
    /// Time of the most recent advertisement
    pub last_seen: SystemTime,
}

impl Default for ScanRecord {
    fn default() -> Self {
        Self {
            local_name: None,
            manufacturer_data: None,
            service_uuids: BTreeSet::new(),
            rssi: None,
            raw: None,
            identity: None,
            last_seen: SystemTime::now(),
        }
    }
}

impl ScanRecord {
    /// Merge the fields present in a new advertisement
    pub fn merge<P>(&mut self, data: ScanData<P>) {
        if let Some(name) = data.local_name {
            self.local_name = Some(name);
        }
        if let Some(manufacturer_data) = data.manufacturer_data {
            self.manufacturer_data = Some(manufacturer_data);
        }
        if data.rssi.is_some() {
            self.rssi = data.rssi;
        }
        if data.raw.is_some() {
            self.raw = data.raw;
        }
        self.service_uuids.extend(data.service_uuids);
        self.last_seen = SystemTime::now();
    }

    /// Try to identify the peer from the accumulated fields
    #[must_use]
    pub fn match_accessory(&self) -> Option<AccessoryIdentity> {
        let name = self.local_name.as_deref()?;
        let manufacturer_data = self.manufacturer_data.as_ref()?;
        AccessoryIdentity::from_advertisement(name, manufacturer_data)
    }

    /// Whether the peer has been identified
    #[must_use]
    pub const fn is_identified(&self) -> bool {
        self.identity.is_some()
    }
}

/// Merges advertisement events per peer and announces newly identified accessories
///
/// Merges for the same peer are serialized; different peers are merged independently.
pub struct ScanAggregator<P> {
    records: RwLock<HashMap<P, Arc<Mutex<ScanRecord>>>>,
    accessories: RwLock<HashMap<AccessoryIdentity, P>>,
    sender: broadcast::Sender<AccessoryIdentity>,
}

impl<P> ScanAggregator<P>
where
    P: Clone + Eq + Hash + fmt::Debug + Send + Sync,
{
    /// Create an empty aggregator
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(IDENTITY_CHANNEL_CAPACITY);
        Self {
            records: RwLock::new(HashMap::new()),
            accessories: RwLock::new(HashMap::new()),
            sender,
        }
    }

    /// Receive every accessory identified from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AccessoryIdentity> {
        self.sender.subscribe()
    }

    /// Merge one advertisement event
    ///
    /// Returns the identity if this event is the one that identified the peer; later
    /// events from an identified peer return `None`.
    pub async fn observe(&self, data: ScanData<P>) -> Option<AccessoryIdentity> {
        let peer = data.peer.clone();
        let cell = self.record_cell(&peer).await;

        let mut record = cell.lock().await;
        record.merge(data);
        if record.is_identified() {
            return None;
        }

        let identity = record.match_accessory()?;
        record.identity = Some(identity);
        self.accessories.write().await.insert(identity, peer.clone());
        drop(record);

        info!("Found {} at peer {:?}", identity, peer);
        if self.sender.send(identity).is_err() {
            debug!("No subscribers for identified accessory {}", identity);
        }
        Some(identity)
    }

    async fn record_cell(&self, peer: &P) -> Arc<Mutex<ScanRecord>> {
        if let Some(cell) = self.records.read().await.get(peer) {
            return cell.clone();
        }
        self.records
            .write()
            .await
            .entry(peer.clone())
            .or_default()
            .clone()
    }

    /// Forget all peers, as when a new scan starts
    pub async fn clear(&self) {
        self.records.write().await.clear();
        self.accessories.write().await.clear();
    }

    /// Snapshot of the record of one peer
    pub async fn record(&self, peer: &P) -> Option<ScanRecord> {
        let cell = self.records.read().await.get(peer).cloned()?;
        let record = cell.lock().await.clone();
        Some(record)
    }

    /// Number of peers seen in the current scan
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether no peer has been seen yet
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Identified accessories
    pub async fn accessories(&self) -> Vec<AccessoryIdentity> {
        self.accessories.read().await.keys().copied().collect()
    }

    /// Transport peer of an identified accessory
    pub async fn peer(&self, identity: &AccessoryIdentity) -> Option<P> {
        self.accessories.read().await.get(identity).cloned()
    }
}

impl<P> Default for ScanAggregator<P>
where
    P: Clone + Eq + Hash + fmt::Debug + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{types::AccessoryType, EM_MICROELECTRONIC_COMPANY_ID, SUNNYFIT_SERVICE_UUID};

    fn stepper_data() -> ManufacturerData {
        ManufacturerData::new(
            EM_MICROELECTRONIC_COMPANY_ID,
            [
                0x00, 0xA4, 0xC1, 0x38, 0xE0, 0xFC, 0x1D, 0x2A, 0x10, 0x00, 0x00, 0x00, 0x00,
            ],
        )
    }

    #[tokio::test]
    async fn test_identifies_from_split_advertisements() {
        let aggregator = ScanAggregator::new();
        let mut identities = aggregator.subscribe();

        let primary = ScanData::new("peer-1").with_local_name("NO. 012 SMART");
        assert!(aggregator.observe(primary).await.is_none());

        let response = ScanData::new("peer-1").with_manufacturer_data(stepper_data());
        let identity = aggregator.observe(response).await.unwrap();
        assert_eq!(identity.accessory_type(), AccessoryType::StepperMini);
        assert_eq!(identity.address().to_string(), "A4:C1:38:E0:FC:1D");

        assert_eq!(identities.try_recv().unwrap(), identity);
        assert_eq!(aggregator.peer(&identity).await, Some("peer-1"));
    }

    #[tokio::test]
    async fn test_same_event_twice_emits_once() {
        let aggregator = ScanAggregator::new();
        let mut identities = aggregator.subscribe();
        let event = ScanData::new("peer-1")
            .with_local_name("NO. 012 SMART")
            .with_manufacturer_data(stepper_data());

        assert!(aggregator.observe(event.clone()).await.is_some());
        assert!(aggregator.observe(event).await.is_none());

        assert!(identities.try_recv().is_ok());
        assert!(identities.try_recv().is_err());
        assert_eq!(aggregator.accessories().await.len(), 1);
    }

    #[tokio::test]
    async fn test_absent_fields_do_not_erase() {
        let aggregator = ScanAggregator::new();
        let first = ScanData::new("peer-1")
            .with_local_name("Some Speaker")
            .with_services([SUNNYFIT_SERVICE_UUID]);
        aggregator.observe(first).await;
        aggregator.observe(ScanData::new("peer-1")).await;

        let record = aggregator.record(&"peer-1").await.unwrap();
        assert_eq!(record.local_name.as_deref(), Some("Some Speaker"));
        assert!(record.service_uuids.contains(&SUNNYFIT_SERVICE_UUID));
        assert!(!record.is_identified());
        assert!(aggregator.accessories().await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_forgets_peers() {
        let aggregator = ScanAggregator::new();
        let event = ScanData::new("peer-1")
            .with_local_name("NO. 012 SMART")
            .with_manufacturer_data(stepper_data());
        assert!(aggregator.observe(event.clone()).await.is_some());

        aggregator.clear().await;
        assert!(aggregator.is_empty().await);
        assert!(aggregator.accessories().await.is_empty());

        // a fresh scan identifies the same peer again
        assert!(aggregator.observe(event).await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_merges_for_one_peer() {
        let aggregator = Arc::new(ScanAggregator::new());
        let mut identities = aggregator.subscribe();

        let mut tasks = Vec::new();
        for index in 0..32 {
            let aggregator = aggregator.clone();
            tasks.push(tokio::spawn(async move {
                let event = if index % 2 == 0 {
                    ScanData::new("peer-1").with_local_name("NO. 012 SMART")
                } else {
                    ScanData::new("peer-1").with_manufacturer_data(stepper_data())
                };
                aggregator.observe(event).await
            }));
        }

        let mut emitted = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                emitted += 1;
            }
        }
        assert_eq!(emitted, 1);
        assert!(identities.try_recv().is_ok());
        assert!(identities.try_recv().is_err());
        assert_eq!(aggregator.len().await, 1);
    }
}
