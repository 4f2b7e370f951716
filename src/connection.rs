use futures::StreamExt;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, watch, Mutex, RwLock},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::{Result, TrainerError},
    poller::{LinkLostHook, TelemetryPoller},
    protocol::{decode_rep_notification, Command},
    transport::{BleAdapter, ServiceInfo, Transport},
    types::{
        ConnectionParams, ConnectionState, DeviceInfo, HandshakeConfig, PollingConfig,
        RepNotification, WorkoutMetric,
    },
    MONITOR_CHAR_UUID, NOTIFY_CHAR_UUIDS, PROPERTY_CHAR_UUID, REP_NOTIFY_CHAR_UUID, RX_CHAR_UUID,
    SERVICE_UUID,
};

/// Characteristics found on a connected trainer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCharacteristics {
    /// Command channel
    pub rx: Uuid,
    /// Polled telemetry
    pub monitor: Uuid,
    /// Keep-alive
    pub property: Option<Uuid>,
    /// Rep notifications; `None` disables rep counting
    pub rep_notify: Option<Uuid>,
    /// Generic notify characteristics present on the device
    pub notify: Vec<Uuid>,
}

/// Map discovered services onto the characteristics the trainer needs
///
/// # Errors
///
/// Returns [`TrainerError::CharacteristicNotFound`] when the primary service,
/// the RX characteristic or the monitor characteristic is missing.
pub fn resolve_characteristics(services: &[ServiceInfo]) -> Result<ResolvedCharacteristics> {
    let primary = services
        .iter()
        .find(|s| s.uuid == SERVICE_UUID)
        .ok_or_else(|| TrainerError::CharacteristicNotFound(format!("service {SERVICE_UUID}")))?;

    let in_primary = |uuid: Uuid| primary.characteristics.contains(&uuid).then_some(uuid);

    let rx = in_primary(RX_CHAR_UUID)
        .ok_or_else(|| TrainerError::CharacteristicNotFound(format!("RX {RX_CHAR_UUID}")))?;
    let monitor = in_primary(MONITOR_CHAR_UUID).ok_or_else(|| {
        TrainerError::CharacteristicNotFound(format!("monitor {MONITOR_CHAR_UUID}"))
    })?;

    let property = in_primary(PROPERTY_CHAR_UUID);
    if property.is_none() {
        warn!("Property characteristic missing, keep-alive polling disabled");
    }

    let rep_notify = in_primary(REP_NOTIFY_CHAR_UUID).or_else(|| {
        services
            .iter()
            .any(|s| s.characteristics.contains(&REP_NOTIFY_CHAR_UUID))
            .then_some(REP_NOTIFY_CHAR_UUID)
    });
    if rep_notify.is_none() {
        warn!("Rep notification characteristic missing, rep counting disabled");
    }

    let notify = NOTIFY_CHAR_UUIDS
        .iter()
        .copied()
        .filter(|uuid| services.iter().any(|s| s.characteristics.contains(uuid)))
        .collect();

    Ok(ResolvedCharacteristics {
        rx,
        monitor,
        property,
        rep_notify,
        notify,
    })
}

/// The single logical channel to a connected trainer
///
/// Every read and write goes through one lock, so a command frame is never
/// interleaved with another transfer.
pub struct DeviceLink<T: Transport> {
    transport: T,
    io: Mutex<()>,
    characteristics: ResolvedCharacteristics,
}

impl<T: Transport> DeviceLink<T> {
    /// Wrap an established transport
    #[must_use]
    pub fn new(transport: T, characteristics: ResolvedCharacteristics) -> Self {
        Self {
            transport,
            io: Mutex::new(()),
            characteristics,
        }
    }

    /// Characteristics in use
    #[must_use]
    pub const fn characteristics(&self) -> &ResolvedCharacteristics {
        &self.characteristics
    }

    /// Write one command frame
    ///
    /// # Errors
    ///
    /// Returns the transport error unchanged; the write is not retried.
    pub async fn send(&self, command: &Command) -> Result<()> {
        let frame = command.to_bytes();
        let _io = self.io.lock().await;
        debug!(
            command = ?command.id(),
            len = frame.len(),
            "Sending frame: {:02X?}",
            &frame[..]
        );
        self.transport.write(self.characteristics.rx, &frame).await
    }

    /// Read the monitor characteristic
    ///
    /// # Errors
    ///
    /// Returns the transport error.
    pub async fn read_monitor(&self) -> Result<Vec<u8>> {
        let _io = self.io.lock().await;
        self.transport.read(self.characteristics.monitor).await
    }

    /// Read the property characteristic
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::CharacteristicNotFound`] when the device has
    /// no property characteristic, otherwise the transport error.
    pub async fn read_property(&self) -> Result<Vec<u8>> {
        let property = self.characteristics.property.ok_or_else(|| {
            TrainerError::CharacteristicNotFound(format!("property {PROPERTY_CHAR_UUID}"))
        })?;
        let _io = self.io.lock().await;
        self.transport.read(property).await
    }

    /// Whether the transport still reports a link
    pub async fn is_connected(&self) -> bool {
        self.transport.is_connected().await
    }

    async fn subscribe_all(&self) -> Result<()> {
        let _io = self.io.lock().await;
        if let Some(rep_notify) = self.characteristics.rep_notify {
            self.transport.subscribe(rep_notify).await?;
        }
        for uuid in &self.characteristics.notify {
            if let Err(e) = self.transport.subscribe(*uuid).await {
                warn!("Failed to enable notifications on {uuid}: {e}");
            }
        }
        Ok(())
    }

    async fn release(&self) {
        let _io = self.io.lock().await;
        let subscribed = self
            .characteristics
            .rep_notify
            .iter()
            .chain(&self.characteristics.notify);
        for uuid in subscribed {
            if let Err(e) = self.transport.unsubscribe(*uuid).await {
                debug!("Unsubscribe from {uuid} failed: {e}");
            }
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!("Transport disconnect failed: {e}");
        }
    }
}

/// Owns the link lifecycle of one trainer
///
/// Scan, connect, characteristic resolution, notification subscription,
/// the initialization handshake and teardown all go through here. State
/// changes are published on a watch channel; decoded telemetry and rep
/// notifications on bounded broadcast channels that drop the oldest entry
/// when a subscriber falls behind.
pub struct ConnectionManager<A: BleAdapter> {
    adapter: A,
    params: ConnectionParams,
    handshake: HandshakeConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    link: RwLock<Option<Arc<DeviceLink<A::Link>>>>,
    poller: TelemetryPoller<A::Link>,
    metrics: broadcast::Sender<WorkoutMetric>,
    reps: broadcast::Sender<RepNotification>,
    notification_task: Mutex<Option<JoinHandle<()>>>,
    last_scanned: Mutex<Option<DeviceInfo>>,
}

impl<A: BleAdapter> ConnectionManager<A> {
    /// Manager over `adapter` with the given tunables
    #[must_use]
    pub fn new(
        adapter: A,
        params: ConnectionParams,
        handshake: HandshakeConfig,
        polling: PollingConfig,
    ) -> Self {
        let capacity = polling.stream_capacity.max(1);
        let (metrics, _) = broadcast::channel(capacity);
        let (reps, _) = broadcast::channel(capacity);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            adapter,
            params,
            handshake,
            state: Arc::new(state),
            link: RwLock::new(None),
            poller: TelemetryPoller::new(polling, metrics.clone()),
            metrics,
            reps,
            notification_task: Mutex::new(None),
            last_scanned: Mutex::new(None),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Lifecycle state changes
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Decoded monitor samples
    #[must_use]
    pub fn subscribe_metrics(&self) -> broadcast::Receiver<WorkoutMetric> {
        self.metrics.subscribe()
    }

    /// Decoded rep notifications
    #[must_use]
    pub fn subscribe_rep_notifications(&self) -> broadcast::Receiver<RepNotification> {
        self.reps.subscribe()
    }

    /// Whether the connected trainer delivers rep notifications
    pub async fn rep_notifications_available(&self) -> bool {
        self.link
            .read()
            .await
            .as_ref()
            .is_some_and(|link| link.characteristics().rep_notify.is_some())
    }

    /// Scan for the first trainer matching the configured name prefix
    ///
    /// A match returns the manager to `Disconnected`, ready for
    /// [`Self::connect`] or another scan.
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::ScanTimeout`] when nothing matched in time
    /// (the manager moves to `Error`), [`TrainerError::InvalidState`] while a
    /// link is up, or the adapter error.
    pub async fn scan(&self) -> Result<DeviceInfo> {
        self.enter(ConnectionState::Scanning)?;
        info!("Scanning for devices with prefix '{}'...", self.params.name_prefix);

        let found = self
            .adapter
            .scan(
                &self.params.name_prefix,
                Duration::from_millis(self.params.scan_timeout_ms),
            )
            .await;

        match found {
            Ok(Some(device)) => {
                info!("Found trainer: {} ({}, {} dBm)", device.name, device.id, device.rssi);
                *self.last_scanned.lock().await = Some(device.clone());
                // the adapter has stopped scanning
                transition(&self.state, ConnectionState::Disconnected);
                Ok(device)
            }
            Ok(None) => {
                let e = TrainerError::ScanTimeout {
                    prefix: self.params.name_prefix.clone(),
                    timeout_ms: self.params.scan_timeout_ms,
                };
                Err(self.fail(e))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Scan, then connect to whatever was found
    ///
    /// # Errors
    ///
    /// See [`Self::scan`] and [`Self::connect`].
    pub async fn connect_first(&self) -> Result<DeviceInfo> {
        let device = self.scan().await?;
        self.connect(&device.id).await?;
        Ok(device)
    }

    /// Connect to `device_id`, resolve characteristics and run the handshake
    ///
    /// # Errors
    ///
    /// Every failure leaves the manager in `Error`:
    /// - [`TrainerError::Timeout`] or the adapter error after the last attempt
    /// - [`TrainerError::CharacteristicNotFound`] (the link is released)
    /// - [`TrainerError::HandshakeFailed`] (the link is kept)
    pub async fn connect(&self, device_id: &str) -> Result<()> {
        let name = self
            .last_scanned
            .lock()
            .await
            .as_ref()
            .filter(|device| device.id == device_id)
            .map_or_else(|| device_id.to_string(), |device| device.name.clone());

        self.enter(ConnectionState::Connecting(name.clone()))?;
        info!("Connecting to {name} ({device_id})");

        // a link kept after a failed handshake
        self.teardown().await;

        let transport = match self.connect_with_retry(device_id).await {
            Ok(transport) => transport,
            Err(e) => return Err(self.fail(e)),
        };

        match transport.request_mtu(self.params.requested_mtu).await {
            Ok(mtu) => info!("Negotiated MTU {mtu}"),
            Err(e) => warn!("MTU request failed, continuing with default: {e}"),
        }

        let characteristics = match resolve_characteristics(&transport.services()) {
            Ok(characteristics) => characteristics,
            Err(e) => {
                if let Err(disconnect_error) = transport.disconnect().await {
                    debug!("Disconnect after failed resolution: {disconnect_error}");
                }
                return Err(self.fail(e));
            }
        };

        let link = Arc::new(DeviceLink::new(transport, characteristics));
        *self.link.write().await = Some(link.clone());

        if let Err(e) = self.start_notifications(&link).await {
            warn!("Notification setup failed: {e}");
        }

        if let Err(e) = self.run_handshake(&link).await {
            return Err(self.fail(TrainerError::HandshakeFailed(e.to_string())));
        }

        self.enter(ConnectionState::Ready {
            name: name.clone(),
            id: device_id.to_string(),
        })?;

        if link.characteristics().property.is_some() {
            let state = self.state.clone();
            let on_lost: LinkLostHook = Arc::new(move |reason| {
                transition(&state, ConnectionState::Error(reason));
            });
            self.poller.start_property(link, on_lost).await;
        }

        info!("✅ Connected to {name}");
        Ok(())
    }

    /// Stop polling, release the link and return to `Disconnected`
    ///
    /// Safe to call in any state.
    ///
    /// # Errors
    ///
    /// Currently infallible; transport failures during teardown are logged.
    pub async fn disconnect(&self) -> Result<()> {
        info!("Disconnecting from trainer");
        self.teardown().await;
        transition(&self.state, ConnectionState::Disconnected);
        Ok(())
    }

    async fn teardown(&self) {
        // polling must stop before the link is released
        self.poller.stop_all().await;

        if let Some(task) = self.notification_task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }

        let link = self.link.write().await.take();
        if let Some(link) = link {
            link.release().await;
        }
    }

    /// Write one command frame to the trainer
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::NotReady`] unless the manager is `Ready`,
    /// otherwise the write error. Writes are never retried.
    pub async fn send_command(&self, command: &Command) -> Result<()> {
        let link = self.ready_link().await?;
        link.send(command).await
    }

    /// Start (or restart) the monitor loop
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::NotReady`] unless the manager is `Ready`.
    pub async fn start_monitor_polling(&self) -> Result<()> {
        let link = self.ready_link().await?;
        self.poller.start_monitor(link).await;
        Ok(())
    }

    /// Stop the monitor loop; no-op when it is not running
    pub async fn stop_monitor_polling(&self) {
        self.poller.stop_monitor().await;
    }

    /// Whether the monitor loop is running
    pub async fn is_monitor_polling(&self) -> bool {
        self.poller.is_monitor_running().await
    }

    async fn ready_link(&self) -> Result<Arc<DeviceLink<A::Link>>> {
        let state = self.state();
        if !state.is_ready() {
            return Err(TrainerError::NotReady {
                reason: state.to_string(),
            });
        }
        self.link
            .read()
            .await
            .clone()
            .ok_or(TrainerError::Disconnected)
    }

    async fn connect_with_retry(&self, device_id: &str) -> Result<A::Link> {
        let attempts = self.params.retry_attempts.max(1);
        let per_attempt = Duration::from_millis(self.params.connect_timeout_ms);
        let mut last_error = TrainerError::DeviceNotFound;

        for attempt in 1..=attempts {
            match timeout(per_attempt, self.adapter.connect(device_id)).await {
                Ok(Ok(transport)) => return Ok(transport),
                // retrying cannot make an unknown device appear
                Ok(Err(TrainerError::DeviceNotFound)) => return Err(TrainerError::DeviceNotFound),
                Ok(Err(e)) => last_error = e,
                Err(_) => {
                    last_error = TrainerError::Timeout {
                        timeout_ms: self.params.connect_timeout_ms,
                    };
                }
            }

            if attempt < attempts {
                warn!(
                    "Connect attempt {attempt}/{attempts} failed, retrying in {}ms: {last_error}",
                    self.params.retry_delay_ms
                );
                sleep(Duration::from_millis(self.params.retry_delay_ms)).await;
            }
        }

        error!("Connect failed after {attempts} attempts: {last_error}");
        Err(last_error)
    }

    async fn start_notifications(&self, link: &Arc<DeviceLink<A::Link>>) -> Result<()> {
        link.subscribe_all().await?;
        let mut notifications = link.transport.notifications().await?;
        let rep_notify = link.characteristics().rep_notify;
        let reps = self.reps.clone();

        let task = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if Some(notification.characteristic) != rep_notify {
                    debug!(
                        "Notification from {}: {} bytes",
                        notification.characteristic,
                        notification.value.len()
                    );
                    continue;
                }
                match decode_rep_notification(&notification.value) {
                    Ok(rep) => {
                        let _ = reps.send(rep);
                    }
                    Err(e) => debug!("Dropping rep frame: {e}"),
                }
            }
            debug!("Notification stream ended");
        });

        if let Some(previous) = self.notification_task.lock().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn run_handshake(&self, link: &DeviceLink<A::Link>) -> Result<()> {
        info!("Running initialization handshake");
        sleep(Duration::from_millis(self.handshake.settle_delay_ms)).await;
        link.send(&Command::Init).await?;
        sleep(Duration::from_millis(self.handshake.init_preset_delay_ms)).await;
        link.send(&Command::InitPreset).await?;
        sleep(Duration::from_millis(self.handshake.post_preset_delay_ms)).await;
        Ok(())
    }

    fn enter(&self, next: ConnectionState) -> Result<()> {
        if transition(&self.state, next) {
            Ok(())
        } else {
            Err(TrainerError::InvalidState {
                state: self.state().to_string(),
            })
        }
    }

    fn fail(&self, e: TrainerError) -> TrainerError {
        error!("Connection error: {e}");
        transition(&self.state, ConnectionState::Error(e.to_string()));
        e
    }
}

/// Apply `next` if it is a legal successor; returns whether it was applied
fn transition(state: &watch::Sender<ConnectionState>, next: ConnectionState) -> bool {
    let mut applied = false;
    state.send_if_modified(|current| {
        if !current.can_transition_to(&next) {
            warn!("Rejected connection transition {current} -> {next}");
            return false;
        }
        info!("Connection: {current} -> {next}");
        let changed = *current != next;
        *current = next;
        applied = true;
        changed
    });
    applied
}
