use futures::StreamExt;
use std::sync::Arc;
use tokio::{
    sync::{broadcast, oneshot, Mutex},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::{
    error::{Result, SunnyFitError},
    scan::ScanAggregator,
    session::{NotificationStream, SessionController, SessionState},
    transport::{RadioState, ScanStream, Transport},
    types::{AccessoryIdentity, ScanParams, SessionConfig},
};

/// Discovers SunnyFit accessories and runs workout sessions on them
///
/// Owns one scan aggregator and one session controller over a shared transport.
pub struct AccessoryManager<T: Transport> {
    transport: Arc<T>,
    aggregator: Arc<ScanAggregator<T::Peer>>,
    sessions: SessionController<T>,
    background_scan: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl<T: Transport> AccessoryManager<T> {
    /// Create a manager with the default session configuration
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    /// Create a manager with a custom session configuration
    pub fn with_config(transport: T, config: SessionConfig) -> Self {
        let transport = Arc::new(transport);
        let aggregator = Arc::new(ScanAggregator::new());
        let sessions = SessionController::new(transport.clone(), aggregator.clone(), config);
        Self {
            transport,
            aggregator,
            sessions,
            background_scan: Mutex::new(None),
        }
    }

    /// Underlying transport
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Advertisement aggregator of the current scan
    #[must_use]
    pub const fn aggregator(&self) -> &Arc<ScanAggregator<T::Peer>> {
        &self.aggregator
    }

    /// Scan for accessories
    ///
    /// Forgets the results of any previous scan. With a duration, returns once the scan
    /// has stopped; otherwise the scan keeps running in the background until
    /// [`Self::stop_scanning`] and failures are only logged.
    ///
    /// # Errors
    ///
    /// Returns [`SunnyFitError::BluetoothUnavailable`] unless the radio is powered on, or
    /// the transport's error if the scan cannot start or fails before the duration ends.
    pub async fn scan(&self, params: ScanParams) -> Result<()> {
        let radio = self.transport.radio_state().await?;
        if radio != RadioState::PoweredOn {
            warn!("Bluetooth radio is {:?}", radio);
            return Err(SunnyFitError::BluetoothUnavailable);
        }

        self.stop_scanning().await?;
        self.aggregator.clear().await;

        let events = self.transport.scan(params.filter_duplicates).await?;
        let (stop_tx, stop_rx) = oneshot::channel();
        let mut task = tokio::spawn(run_scan(events, self.aggregator.clone(), stop_rx));

        let Some(duration) = params.duration else {
            info!("Scanning in the background");
            let handle = tokio::spawn(async move {
                match task.await {
                    Ok(Err(e)) => warn!("Error scanning: {}", e),
                    Err(e) if e.is_panic() => warn!("Scan task panicked"),
                    _ => {}
                }
            });
            *self.background_scan.lock().await = Some((stop_tx, handle));
            return Ok(());
        };

        info!("Scanning for {:?}", duration);
        let outcome = tokio::select! {
            joined = &mut task => Some(joined),
            () = sleep(duration) => None,
        };

        let joined = match outcome {
            Some(joined) => {
                debug!("Scan ended before its duration elapsed");
                self.transport.stop_scan().await?;
                joined
            }
            None => {
                let _ = stop_tx.send(());
                self.transport.stop_scan().await?;
                task.await
            }
        };

        let found = joined.map_err(|e| SunnyFitError::Transport(e.to_string()))?;
        found?;
        info!(
            "Scan finished with {} accessories",
            self.aggregator.accessories().await.len()
        );
        Ok(())
    }

    /// Stop a background scan
    ///
    /// Returns once the scan task has finished, so no advertisement is recorded afterwards.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the scan cannot be stopped.
    pub async fn stop_scanning(&self) -> Result<()> {
        let Some((stop, handle)) = self.background_scan.lock().await.take() else {
            return Ok(());
        };

        info!("Stopping scan");
        let _ = stop.send(());
        if handle.await.is_err() {
            debug!("Scan task was cancelled");
        }
        self.transport.stop_scan().await
    }

    /// Accessories identified by the current scan
    pub async fn accessories(&self) -> Vec<AccessoryIdentity> {
        self.aggregator.accessories().await
    }

    /// Receive every accessory identified from now on
    #[must_use]
    pub fn subscribe_accessories(&self) -> broadcast::Receiver<AccessoryIdentity> {
        self.aggregator.subscribe()
    }

    /// Connect to an accessory
    ///
    /// Returns immediately if the accessory is already connected.
    ///
    /// # Errors
    ///
    /// Returns [`SunnyFitError::UnknownAccessory`] if the accessory was not seen by the scan,
    /// or any connection error.
    pub async fn connect(&self, accessory: AccessoryIdentity) -> Result<()> {
        self.sessions.connect(accessory).await.map(|_| ())
    }

    /// Connect, activate the accessory and stream its workout values
    ///
    /// # Errors
    ///
    /// Returns any error of [`SessionController::start`].
    pub async fn start_exercise(&self, accessory: AccessoryIdentity) -> Result<NotificationStream> {
        self.sessions.start(accessory).await
    }

    /// Disconnect from an accessory
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the disconnect request fails.
    pub async fn disconnect(&self, accessory: &AccessoryIdentity) -> Result<()> {
        self.sessions.disconnect(accessory).await
    }

    /// Session state of an accessory
    pub async fn state(&self, accessory: &AccessoryIdentity) -> SessionState {
        self.sessions.state(accessory).await
    }

    /// Stop scanning and disconnect every accessory
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the scan cannot be stopped.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_scanning().await?;
        self.sessions.disconnect_all().await;
        Ok(())
    }
}

async fn run_scan<P>(
    mut events: ScanStream<P>,
    aggregator: Arc<ScanAggregator<P>>,
    mut stop: oneshot::Receiver<()>,
) -> Result<()>
where
    P: Clone + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync,
{
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => return Ok(()),
            event = events.next() => match event {
                Some(Ok(data)) => {
                    aggregator.observe(data).await;
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            },
        }
    }
}
