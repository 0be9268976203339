use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::{AbortHandle, JoinHandle},
    time::{sleep, timeout},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::{Result, SunnyFitError},
    protocol::{DecodeMode, DeviceProfile, NotificationValue},
    scan::ScanAggregator,
    transport::{ConnectionEvent, ConnectionEventStream, FrameStream, Transport},
    types::{AccessoryIdentity, SessionConfig},
    SUNNYFIT_SERVICE_UUID,
};

/// Lifecycle of an accessory session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// No connection
    Disconnected,
    /// Opening the transport connection
    Connecting,
    /// Connected, command and notification characteristics resolved
    ServicesResolved,
    /// Writing the activation handshake
    CommandSequenceRunning,
    /// Notifications subscribed and flowing
    Streaming,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::ServicesResolved => write!(f, "Services Resolved"),
            Self::CommandSequenceRunning => write!(f, "Command Sequence Running"),
            Self::Streaming => write!(f, "Streaming"),
        }
    }
}

type SessionMap<T> = HashMap<AccessoryIdentity, Arc<Session<T>>>;

/// Live connection to one accessory
pub struct Session<T: Transport> {
    id: u64,
    identity: AccessoryIdentity,
    peer: T::Peer,
    profile: DeviceProfile,
    command: T::Characteristic,
    notifications: Vec<T::Characteristic>,
    state: Arc<watch::Sender<SessionState>>,
    watcher: JoinHandle<()>,
    pump: Mutex<Option<AbortHandle>>,
}

impl<T: Transport> Session<T> {
    /// Accessory this session is connected to
    #[must_use]
    pub const fn identity(&self) -> AccessoryIdentity {
        self.identity
    }

    /// Transport handle of the peer
    #[must_use]
    pub const fn peer(&self) -> &T::Peer {
        &self.peer
    }

    /// Characteristics, handshake and frame layout in use
    #[must_use]
    pub const fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state changes
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Move to `next` unless the link is already gone
    fn transition(&self, next: SessionState) -> bool {
        transition(&self.state, self.identity, next)
    }
}

impl<T: Transport> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

fn transition(
    state: &watch::Sender<SessionState>,
    identity: AccessoryIdentity,
    next: SessionState,
) -> bool {
    state.send_if_modified(|current| {
        if *current == SessionState::Disconnected && next != SessionState::Disconnected {
            return false;
        }
        if *current != next {
            debug!("{}: {} -> {}", identity, current, next);
            *current = next;
        }
        true
    })
}

/// Decoded workout values of a streaming session
///
/// Values arrive in the order the frames were received. Malformed frames are skipped.
/// If the accessory disconnects, the stream yields one [`SunnyFitError::Disconnected`]
/// and ends. Dropping the stream cancels the subscription.
#[derive(Debug)]
pub struct NotificationStream {
    receiver: mpsc::Receiver<Result<NotificationValue>>,
    pump: JoinHandle<()>,
}

impl Stream for NotificationStream {
    type Item = Result<NotificationValue>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for NotificationStream {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Drives connect, handshake and notification streaming for identified accessories
///
/// At most one session exists per accessory; connecting again returns the live session.
/// Connection attempts to different accessories run independently.
pub struct SessionController<T: Transport> {
    transport: Arc<T>,
    scan: Arc<ScanAggregator<T::Peer>>,
    config: SessionConfig,
    sessions: Arc<Mutex<SessionMap<T>>>,
    connect_slots: Mutex<HashMap<AccessoryIdentity, Arc<Mutex<()>>>>,
    next_id: AtomicU64,
}

impl<T: Transport> SessionController<T> {
    /// Create a controller resolving accessories through `scan`
    #[must_use]
    pub fn new(
        transport: Arc<T>,
        scan: Arc<ScanAggregator<T::Peer>>,
        config: SessionConfig,
    ) -> Self {
        Self {
            transport,
            scan,
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            connect_slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Session configuration
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Live session of an accessory
    pub async fn session(&self, identity: &AccessoryIdentity) -> Option<Arc<Session<T>>> {
        self.sessions.lock().await.get(identity).cloned()
    }

    /// State of an accessory's session
    pub async fn state(&self, identity: &AccessoryIdentity) -> SessionState {
        self.session(identity)
            .await
            .map_or(SessionState::Disconnected, |session| session.state())
    }

    async fn connect_slot(&self, identity: AccessoryIdentity) -> Arc<Mutex<()>> {
        self.connect_slots
            .lock()
            .await
            .entry(identity)
            .or_default()
            .clone()
    }

    async fn live_session(&self, identity: &AccessoryIdentity) -> Option<Arc<Session<T>>> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(identity) {
            Some(session) if session.state() != SessionState::Disconnected => {
                Some(session.clone())
            }
            Some(_) => {
                sessions.remove(identity);
                None
            }
            None => None,
        }
    }

    /// Connect to an accessory and resolve its characteristics
    ///
    /// Concurrent calls for the same accessory wait for the first attempt and share its
    /// session.
    ///
    /// # Errors
    ///
    /// Returns [`SunnyFitError::UnknownAccessory`] if the accessory was not seen by the scan,
    /// [`SunnyFitError::Timeout`] if connecting and resolving do not finish in time,
    /// [`SunnyFitError::CharacteristicNotFound`] naming the first missing characteristic,
    /// or the transport's error.
    pub async fn connect(&self, identity: AccessoryIdentity) -> Result<Arc<Session<T>>> {
        let slot = self.connect_slot(identity).await;
        let _attempt = slot.lock().await;

        if let Some(session) = self.live_session(&identity).await {
            return Ok(session);
        }

        let peer = self
            .scan
            .peer(&identity)
            .await
            .ok_or_else(|| SunnyFitError::UnknownAccessory(identity.to_string()))?;

        let (state, _) = watch::channel(SessionState::Connecting);
        let state = Arc::new(state);
        info!("Connecting to {}", identity);

        // subscribe first so a drop during setup is not missed
        let events = self.transport.connection_events().await?;

        let profile = DeviceProfile::for_type(identity.accessory_type());
        let timeout_ms = self.config.connect_timeout_ms;
        let setup = async {
            self.transport
                .connect(&peer)
                .await
                .map_err(|e| (e, false))?;
            let handles = self.resolve(&peer, &profile).await.map_err(|e| (e, true))?;
            Ok::<_, (SunnyFitError, bool)>(handles)
        };

        let (command, notifications) = match timeout(Duration::from_millis(timeout_ms), setup).await
        {
            Ok(Ok(handles)) => handles,
            Ok(Err((e, connected))) => {
                if connected {
                    error!("Unable to use {}: {}", identity, e);
                } else {
                    warn!("Failed to connect to {}: {}", identity, e);
                }
                transition(&state, identity, SessionState::Disconnected);
                if connected {
                    self.abandon(&peer).await;
                }
                return Err(e);
            }
            Err(_) => {
                warn!("Connection to {} timed out after {}ms", identity, timeout_ms);
                transition(&state, identity, SessionState::Disconnected);
                self.abandon(&peer).await;
                return Err(SunnyFitError::Timeout { timeout_ms });
            }
        };
        transition(&state, identity, SessionState::ServicesResolved);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let watcher = tokio::spawn(watch_disconnect(
            events,
            peer.clone(),
            identity,
            id,
            state.clone(),
            Arc::downgrade(&self.sessions),
        ));

        let session = Arc::new(Session {
            id,
            identity,
            peer,
            profile,
            command,
            notifications,
            state,
            watcher,
            pump: Mutex::new(None),
        });
        self.sessions.lock().await.insert(identity, session.clone());
        info!("Connected to {}", identity);

        Ok(session)
    }

    async fn abandon(&self, peer: &T::Peer) {
        if let Err(e) = self.transport.disconnect(peer).await {
            debug!("Disconnect after failed setup: {}", e);
        }
    }

    async fn resolve(
        &self,
        peer: &T::Peer,
        profile: &DeviceProfile,
    ) -> Result<(T::Characteristic, Vec<T::Characteristic>)> {
        let mut resolved = self
            .transport
            .resolve_characteristics(peer, SUNNYFIT_SERVICE_UUID, &profile.characteristics())
            .await?;

        let mut take = |uuid: Uuid| {
            resolved
                .remove(&uuid)
                .ok_or(SunnyFitError::CharacteristicNotFound(uuid))
        };
        let command = take(profile.command)?;
        let mut notifications = vec![take(profile.notification)?];
        if let Some(secondary) = profile.secondary_notification {
            notifications.extend(take(secondary).ok());
        }

        Ok((command, notifications))
    }

    /// Connect if needed, run the activation handshake and stream decoded values
    ///
    /// Starting again on a streaming session ends the previous stream.
    ///
    /// # Errors
    ///
    /// Returns any error of [`Self::connect`], a transport error if a command write or
    /// subscription fails, or [`SunnyFitError::Disconnected`] if the link drops during setup.
    pub async fn start(&self, identity: AccessoryIdentity) -> Result<NotificationStream> {
        let session = self.connect(identity).await?;

        if !session.transition(SessionState::CommandSequenceRunning) {
            return Err(SunnyFitError::Disconnected);
        }
        let delay = Duration::from_millis(self.config.command_delay_ms);
        for frame in session.profile.start_sequence {
            debug!("Sending command: {:02X?}", frame.as_bytes());
            if let Err(e) = self
                .transport
                .write(&session.peer, &session.command, frame.as_bytes(), true)
                .await
            {
                session.transition(SessionState::ServicesResolved);
                return Err(e);
            }
            // the firmware ignores commands that arrive too quickly
            sleep(delay).await;
        }

        let mut subscriptions = Vec::with_capacity(session.notifications.len());
        for characteristic in &session.notifications {
            match self.transport.subscribe(&session.peer, characteristic).await {
                Ok(frames) => subscriptions.push(frames),
                Err(e) => {
                    session.transition(SessionState::ServicesResolved);
                    return Err(e);
                }
            }
        }
        let frames = stream::select_all(subscriptions).boxed();

        let (sender, receiver) = mpsc::channel(self.config.notification_buffer.max(1));
        let state = session.watch_state();
        if !session.transition(SessionState::Streaming) {
            return Err(SunnyFitError::Disconnected);
        }
        let pump = tokio::spawn(pump_notifications(
            frames,
            session.profile.decode_mode,
            sender,
            state,
        ));

        if let Some(previous) = session.pump.lock().await.replace(pump.abort_handle()) {
            previous.abort();
        }
        info!("Streaming workout data from {}", identity);

        Ok(NotificationStream {
            receiver,
            pump,
        })
    }

    /// Disconnect from an accessory
    ///
    /// Does nothing if there is no session.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the disconnect request fails; the session is
    /// discarded either way.
    pub async fn disconnect(&self, identity: &AccessoryIdentity) -> Result<()> {
        let Some(session) = self.sessions.lock().await.remove(identity) else {
            debug!("No session for {}", identity);
            return Ok(());
        };
        info!("Disconnecting from {}", identity);
        session.transition(SessionState::Disconnected);
        self.transport.disconnect(&session.peer).await
    }

    /// Disconnect every session
    pub async fn disconnect_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        for (identity, session) in sessions {
            session.transition(SessionState::Disconnected);
            if let Err(e) = self.transport.disconnect(&session.peer).await {
                warn!("Failed to disconnect from {}: {}", identity, e);
            }
        }
    }
}

async fn watch_disconnect<T: Transport>(
    mut events: ConnectionEventStream<T::Peer>,
    peer: T::Peer,
    identity: AccessoryIdentity,
    id: u64,
    state: Arc<watch::Sender<SessionState>>,
    sessions: Weak<Mutex<SessionMap<T>>>,
) {
    while let Some(event) = events.next().await {
        let ConnectionEvent::Disconnected(disconnected) = event else {
            continue;
        };
        if disconnected != peer {
            continue;
        }

        warn!("{} disconnected", identity);
        transition(&state, identity, SessionState::Disconnected);
        if let Some(sessions) = sessions.upgrade() {
            let mut sessions = sessions.lock().await;
            if sessions.get(&identity).is_some_and(|session| session.id == id) {
                sessions.remove(&identity);
            }
        }
        return;
    }
    debug!("Connection events for {} ended", identity);
}

async fn pump_notifications(
    mut frames: FrameStream,
    mode: DecodeMode,
    sender: mpsc::Sender<Result<NotificationValue>>,
    mut state: watch::Receiver<SessionState>,
) {
    loop {
        tokio::select! {
            biased;

            frame = frames.next() => {
                let Some(frame) = frame else {
                    debug!("Notification subscription closed");
                    let _ = sender.send(Err(SunnyFitError::Disconnected)).await;
                    return;
                };
                match NotificationValue::decode(&frame, mode) {
                    Ok(value) => {
                        if sender.send(Ok(value)).await.is_err() {
                            debug!("Notification consumer dropped");
                            return;
                        }
                    }
                    Err(e) => debug!("Skipping frame {:02X?}: {}", &frame[..], e),
                }
            }
            changed = state.changed() => {
                if changed.is_err() || *state.borrow_and_update() == SessionState::Disconnected {
                    let _ = sender.send(Err(SunnyFitError::Disconnected)).await;
                    return;
                }
            }
        }
    }
}
