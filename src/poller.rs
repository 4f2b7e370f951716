use std::{sync::Arc, time::Duration, time::SystemTime};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{interval, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    connection::DeviceLink,
    protocol::{MonitorDecoder, MonitorSample},
    transport::Transport,
    types::{PollingConfig, WorkoutMetric},
};

/// Called once by the keep-alive loop when it finds the link gone
pub type LinkLostHook = Arc<dyn Fn(String) + Send + Sync>;

/// Derives cable speed from consecutive positions
#[derive(Debug, Clone, Copy, Default)]
pub struct VelocityTracker {
    last: Option<(f32, Instant)>,
}

impl VelocityTracker {
    /// `|Δposition| / Δt` against the previous sample, 0 for the first
    pub fn update(&mut self, position: f32, at: Instant) -> f32 {
        let velocity = match self.last {
            Some((previous, previous_at)) => {
                let dt = at.saturating_duration_since(previous_at).as_secs_f32();
                if dt > 0.0 {
                    (position - previous).abs() / dt
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.last = Some((position, at));
        velocity
    }
}

/// Monitor and keep-alive polling loops over one link
///
/// Each loop lives in exactly one task. Starting a running loop replaces it,
/// and stopping waits for the task to finish so no tick can fire afterwards.
pub struct TelemetryPoller<T: Transport> {
    config: PollingConfig,
    metrics: broadcast::Sender<WorkoutMetric>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
    property_task: Mutex<Option<JoinHandle<()>>>,
    _link: std::marker::PhantomData<fn() -> T>,
}

impl<T: Transport> TelemetryPoller<T> {
    /// Poller publishing decoded metrics on `metrics`
    #[must_use]
    pub fn new(config: PollingConfig, metrics: broadcast::Sender<WorkoutMetric>) -> Self {
        Self {
            config,
            metrics,
            monitor_task: Mutex::new(None),
            property_task: Mutex::new(None),
            _link: std::marker::PhantomData,
        }
    }

    /// Start (or restart) the monitor loop
    pub async fn start_monitor(&self, link: Arc<DeviceLink<T>>) {
        let period = Duration::from_millis(self.config.monitor_interval_ms);
        let metrics = self.metrics.clone();
        let task = tokio::spawn(monitor_loop(link, period, metrics));
        Self::replace(&self.monitor_task, Some(task)).await;
        info!("Monitor polling started ({}ms)", self.config.monitor_interval_ms);
    }

    /// Stop the monitor loop; no-op when it is not running
    pub async fn stop_monitor(&self) {
        if Self::replace(&self.monitor_task, None).await {
            info!("Monitor polling stopped");
        }
    }

    /// Start (or restart) the keep-alive loop
    pub async fn start_property(&self, link: Arc<DeviceLink<T>>, on_link_lost: LinkLostHook) {
        let period = Duration::from_millis(self.config.property_interval_ms);
        let task = tokio::spawn(property_loop(link, period, on_link_lost));
        Self::replace(&self.property_task, Some(task)).await;
        info!("Keep-alive polling started ({}ms)", self.config.property_interval_ms);
    }

    /// Stop the keep-alive loop; no-op when it is not running
    pub async fn stop_property(&self) {
        if Self::replace(&self.property_task, None).await {
            info!("Keep-alive polling stopped");
        }
    }

    /// Stop both loops
    pub async fn stop_all(&self) {
        self.stop_monitor().await;
        self.stop_property().await;
    }

    /// Whether the monitor loop is running
    pub async fn is_monitor_running(&self) -> bool {
        self.monitor_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Whether the keep-alive loop is running
    pub async fn is_property_running(&self) -> bool {
        self.property_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Swap the task in `slot`, cancelling and joining the previous one.
    /// Returns whether a previous task existed.
    async fn replace(slot: &Mutex<Option<JoinHandle<()>>>, next: Option<JoinHandle<()>>) -> bool {
        let mut slot = slot.lock().await;
        let previous = std::mem::replace(&mut *slot, next);
        match previous {
            Some(task) => {
                task.abort();
                if let Err(e) = task.await {
                    if e.is_panic() {
                        error!("Polling task panicked: {e}");
                    }
                }
                true
            }
            None => false,
        }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn monitor_loop<T: Transport>(
    link: Arc<DeviceLink<T>>,
    period: Duration,
    metrics: broadcast::Sender<WorkoutMetric>,
) {
    let mut decoder = MonitorDecoder::new();
    let mut velocity = VelocityTracker::default();
    let mut ticker = ticker(period);

    loop {
        ticker.tick().await;

        let data = match link.read_monitor().await {
            Ok(data) => data,
            Err(e) => {
                warn!("Monitor read failed: {e}");
                continue;
            }
        };

        match decoder.decode(&data) {
            Ok(sample) => {
                let metric = to_metric(&sample, velocity.update(sample.position_a, Instant::now()));
                // No subscribers is fine; the sample is simply dropped.
                let _ = metrics.send(metric);
            }
            Err(e) => debug!("Dropping monitor frame: {e}"),
        }
    }
}

async fn property_loop<T: Transport>(
    link: Arc<DeviceLink<T>>,
    period: Duration,
    on_link_lost: LinkLostHook,
) {
    let mut ticker = ticker(period);

    loop {
        ticker.tick().await;

        match link.read_property().await {
            Ok(data) => debug!("Keep-alive read {} bytes", data.len()),
            Err(e) => {
                warn!("Keep-alive read failed: {e}");
                if !link.is_connected().await {
                    error!("Link lost during keep-alive polling");
                    on_link_lost(format!("Link lost: {e}"));
                    break;
                }
            }
        }
    }
}

fn to_metric(sample: &MonitorSample, velocity_a: f32) -> WorkoutMetric {
    WorkoutMetric {
        timestamp: SystemTime::now(),
        load_a: sample.load_a,
        load_b: sample.load_b,
        position_a: sample.position_a,
        position_b: sample.position_b,
        ticks: sample.ticks,
        velocity_a,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        connection::{resolve_characteristics, DeviceLink},
        transport::mock::MockTransport,
        MONITOR_CHAR_UUID, PROPERTY_CHAR_UUID,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast::error::RecvError;

    fn link(transport: &MockTransport) -> Arc<DeviceLink<MockTransport>> {
        let characteristics = resolve_characteristics(&transport.services()).unwrap();
        Arc::new(DeviceLink::new(transport.clone(), characteristics))
    }

    fn monitor_frame(position_a: u16) -> Vec<u8> {
        let mut frame = vec![0u8; 16];
        frame[4..6].copy_from_slice(&position_a.to_le_bytes());
        frame[8..10].copy_from_slice(&1500u16.to_le_bytes());
        frame
    }

    fn poller() -> (TelemetryPoller<MockTransport>, broadcast::Receiver<WorkoutMetric>) {
        let (tx, rx) = broadcast::channel(64);
        (TelemetryPoller::new(PollingConfig::default(), tx), rx)
    }

    fn noop_hook() -> LinkLostHook {
        Arc::new(|_| {})
    }

    #[tokio::test(start_paused = true)]
    async fn test_velocity_tracker() {
        let mut tracker = VelocityTracker::default();
        let start = Instant::now();
        assert!(tracker.update(100.0, start).abs() < f32::EPSILON);

        let v = tracker.update(80.0, start + Duration::from_millis(100));
        assert!((v - 200.0).abs() < 0.01);

        let v = tracker.update(80.0, start + Duration::from_millis(100));
        assert!(v.abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_poll_publishes_filtered_metrics() {
        let transport = MockTransport::trainer();
        transport.script_reads(
            MONITOR_CHAR_UUID,
            vec![Some(monitor_frame(60_000)), Some(monitor_frame(1200))],
        );
        let (poller, mut rx) = poller();

        poller.start_monitor(link(&transport)).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.position_a.abs() < f32::EPSILON);
        assert!((second.position_a - 1200.0).abs() < f32::EPSILON);
        assert!((second.load_a - 15.0).abs() < 0.001);
        assert!(second.velocity_a > 0.0);

        poller.stop_monitor().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_and_short_reads_do_not_stop_the_loop() {
        let transport = MockTransport::trainer();
        transport.script_reads(
            MONITOR_CHAR_UUID,
            vec![None, Some(vec![0u8; 10]), Some(monitor_frame(300))],
        );
        let (poller, mut rx) = poller();

        poller.start_monitor(link(&transport)).await;
        let metric = rx.recv().await.unwrap();
        assert!((metric.position_a - 300.0).abs() < f32::EPSILON);
        assert!(transport.read_count(MONITOR_CHAR_UUID) >= 3);
        assert!(poller.is_monitor_running().await);

        poller.stop_monitor().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_subscriber_loses_oldest_samples() {
        let transport = MockTransport::trainer();
        transport.script_reads(
            MONITOR_CHAR_UUID,
            (1..=30u16).map(|position| Some(monitor_frame(position))).collect(),
        );
        let (tx, mut rx) = broadcast::channel(4);
        let poller = TelemetryPoller::new(PollingConfig::default(), tx);

        poller.start_monitor(link(&transport)).await;
        tokio::time::sleep(Duration::from_millis(3_050)).await;
        let reads = transport.read_count(MONITOR_CHAR_UUID);
        assert!(reads >= 30, "poller stalled at {reads} reads");

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(26))));
        for expected in 27..=30u16 {
            let metric = rx.recv().await.unwrap();
            assert!((metric.position_a - f32::from(expected)).abs() < f32::EPSILON);
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(transport.read_count(MONITOR_CHAR_UUID) > reads);
        assert!(poller.is_monitor_running().await);

        poller.stop_monitor().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_cadence_and_cancellation() {
        let transport = MockTransport::trainer();
        transport.set_default_read(MONITOR_CHAR_UUID, monitor_frame(10));
        let (poller, _rx) = poller();

        poller.start_monitor(link(&transport)).await;
        tokio::time::sleep(Duration::from_millis(1_050)).await;
        let reads = transport.read_count(MONITOR_CHAR_UUID);
        assert!((10..=12).contains(&reads), "unexpected read count {reads}");

        poller.stop_monitor().await;
        assert!(!poller.is_monitor_running().await);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.read_count(MONITOR_CHAR_UUID), reads);

        // repeated stop is a no-op
        poller.stop_monitor().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_loop() {
        let transport = MockTransport::trainer();
        let (poller, _rx) = poller();
        let link = link(&transport);

        poller.start_monitor(link.clone()).await;
        poller.start_monitor(link.clone()).await;
        poller.start_monitor(link).await;
        tokio::time::sleep(Duration::from_millis(950)).await;

        // one loop at 100ms, not three
        let reads = transport.read_count(MONITOR_CHAR_UUID);
        assert!(reads <= 12, "unexpected read count {reads}");

        poller.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_independent_of_monitor() {
        let transport = MockTransport::trainer();
        let (poller, _rx) = poller();
        let link = link(&transport);

        poller.start_property(link.clone(), noop_hook()).await;
        poller.start_monitor(link).await;
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        poller.stop_monitor().await;
        let keep_alive_reads = transport.read_count(PROPERTY_CHAR_UUID);
        assert!((2..=4).contains(&keep_alive_reads));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(transport.read_count(PROPERTY_CHAR_UUID) > keep_alive_reads);
        assert!(poller.is_property_running().await);

        poller.stop_all().await;
        assert!(!poller.is_property_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_reports_lost_link() {
        let transport = MockTransport::trainer();
        let (poller, _rx) = poller();
        let lost = Arc::new(AtomicUsize::new(0));
        let counter = lost.clone();
        let hook: LinkLostHook = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        poller.start_property(link(&transport), hook).await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        {
            let mut state = transport.lock();
            state.fail_reads = true;
            state.connected = false;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(lost.load(Ordering::SeqCst), 1);
        assert!(!poller.is_property_running().await);
    }
}
