//! Scripted in-memory transport for tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};
use tokio::{
    sync::{broadcast, mpsc},
    time::Instant,
};
use uuid::Uuid;

use crate::{
    error::{Result, SunnyFitError},
    transport::{
        ConnectionEvent, ConnectionEventStream, FrameStream, RadioState, ScanData, ScanStream,
        Transport,
    },
    SUNNYFIT_SERVICE_UUID,
};

pub(crate) type MockPeer = &'static str;

fn receiver_stream<T: Send + 'static>(
    receiver: mpsc::UnboundedReceiver<T>,
) -> futures::stream::BoxStream<'static, T> {
    stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|item| (item, receiver))
    })
    .boxed()
}

pub(crate) struct MockTransport {
    radio: Mutex<RadioState>,
    scan_script: Mutex<Vec<Result<ScanData<MockPeer>>>>,
    scan_sender: Mutex<Option<mpsc::UnboundedSender<Result<ScanData<MockPeer>>>>>,
    characteristics: Mutex<HashSet<Uuid>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    write_times: Mutex<Vec<Instant>>,
    subscriptions: Mutex<HashMap<Uuid, mpsc::UnboundedSender<Bytes>>>,
    events: broadcast::Sender<ConnectionEvent<MockPeer>>,
    fail_connect: Mutex<bool>,
    hang_connect: Mutex<HashSet<MockPeer>>,
    pub(crate) connects: AtomicUsize,
    pub(crate) disconnects: AtomicUsize,
}

impl MockTransport {
    /// Powered on, exposing every characteristic of both firmware generations
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            radio: Mutex::new(RadioState::PoweredOn),
            scan_script: Mutex::new(Vec::new()),
            scan_sender: Mutex::new(None),
            characteristics: Mutex::new(
                [
                    crate::SUNNYFIT_COMMAND_CHAR_UUID,
                    crate::SUNNYFIT_NOTIFICATION_CHAR_UUID,
                    crate::SUNNYFIT_NOTIFICATION_CHAR_UUID_2,
                    crate::SUNNYFIT_COMMAND_CHAR_UUID_2,
                    crate::SUNNYFIT_NOTIFICATION_CHAR_UUID_3,
                ]
                .into_iter()
                .collect(),
            ),
            writes: Mutex::new(Vec::new()),
            write_times: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(HashMap::new()),
            events,
            fail_connect: Mutex::new(false),
            hang_connect: Mutex::new(HashSet::new()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_radio(&self, state: RadioState) {
        *self.radio.lock().unwrap() = state;
    }

    pub(crate) fn set_fail_connect(&self, fail: bool) {
        *self.fail_connect.lock().unwrap() = fail;
    }

    /// Connecting to `peer` never completes
    pub(crate) fn hang_connect(&self, peer: MockPeer) {
        self.hang_connect.lock().unwrap().insert(peer);
    }

    /// Events delivered as soon as the next scan starts
    pub(crate) fn script_scan(&self, items: Vec<Result<ScanData<MockPeer>>>) {
        *self.scan_script.lock().unwrap() = items;
    }

    /// Push an event into the running scan
    pub(crate) fn advertise(&self, item: Result<ScanData<MockPeer>>) {
        if let Some(sender) = self.scan_sender.lock().unwrap().as_ref() {
            let _ = sender.send(item);
        }
    }

    pub(crate) fn remove_characteristic(&self, uuid: Uuid) {
        self.characteristics.lock().unwrap().remove(&uuid);
    }

    pub(crate) fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }

    /// When each write arrived
    pub(crate) fn write_times(&self) -> Vec<Instant> {
        self.write_times.lock().unwrap().clone()
    }

    pub(crate) fn is_subscribed(&self, uuid: Uuid) -> bool {
        self.subscriptions
            .lock()
            .unwrap()
            .get(&uuid)
            .is_some_and(|sender| !sender.is_closed())
    }

    /// Deliver a notification frame on a subscribed characteristic
    pub(crate) fn notify(&self, uuid: Uuid, frame: &[u8]) {
        if let Some(sender) = self.subscriptions.lock().unwrap().get(&uuid) {
            let _ = sender.send(Bytes::copy_from_slice(frame));
        }
    }

    /// Simulate the peer dropping the link
    pub(crate) fn drop_link(&self, peer: MockPeer) {
        let _ = self.events.send(ConnectionEvent::Disconnected(peer));
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Peer = MockPeer;
    type Characteristic = Uuid;

    async fn radio_state(&self) -> Result<RadioState> {
        Ok(*self.radio.lock().unwrap())
    }

    async fn scan(&self, _filter_duplicates: bool) -> Result<ScanStream<MockPeer>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        for item in self.scan_script.lock().unwrap().drain(..) {
            let _ = sender.send(item);
        }
        *self.scan_sender.lock().unwrap() = Some(sender);
        Ok(receiver_stream(receiver))
    }

    async fn stop_scan(&self) -> Result<()> {
        self.scan_sender.lock().unwrap().take();
        Ok(())
    }

    async fn connect(&self, peer: &MockPeer) -> Result<()> {
        let hang = self.hang_connect.lock().unwrap().contains(peer);
        if hang {
            std::future::pending::<()>().await;
        }
        if *self.fail_connect.lock().unwrap() {
            return Err(SunnyFitError::ConnectionFailed(format!("{peer} refused")));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::Connected(*peer));
        Ok(())
    }

    async fn disconnect(&self, _peer: &MockPeer) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().unwrap().clear();
        Ok(())
    }

    async fn resolve_characteristics(
        &self,
        _peer: &MockPeer,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<HashMap<Uuid, Uuid>> {
        if service != SUNNYFIT_SERVICE_UUID {
            return Err(SunnyFitError::ServiceNotFound(service));
        }
        let available = self.characteristics.lock().unwrap();
        Ok(characteristics
            .iter()
            .filter(|uuid| available.contains(*uuid))
            .map(|uuid| (*uuid, *uuid))
            .collect())
    }

    async fn write(
        &self,
        _peer: &MockPeer,
        characteristic: &Uuid,
        data: &[u8],
        _with_response: bool,
    ) -> Result<()> {
        self.writes
            .lock()
            .unwrap()
            .push((*characteristic, data.to_vec()));
        self.write_times.lock().unwrap().push(Instant::now());
        Ok(())
    }

    async fn subscribe(&self, _peer: &MockPeer, characteristic: &Uuid) -> Result<FrameStream> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscriptions
            .lock()
            .unwrap()
            .insert(*characteristic, sender);
        Ok(receiver_stream(receiver))
    }

    async fn connection_events(&self) -> Result<ConnectionEventStream<MockPeer>> {
        let receiver = self.events.subscribe();
        Ok(stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed())
    }
}
