use std::{mem::discriminant, sync::Arc, time::Duration, time::SystemTime};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::{interval, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    ble::BleManager,
    connection::ConnectionManager,
    error::{Result, TrainerError},
    handle::HandleStateDetector,
    protocol::{color_scheme, Command},
    reps::{RepCounter, RepCounterConfig, RepEvent},
    transport::BleAdapter,
    types::{
        ConnectionState, DeviceInfo, HandleState, RepCount, RepNotification, RestContext,
        SessionConfig, SessionState, SessionSummary, SetEnd, TrainerConfig, WorkoutMetric,
        WorkoutParameters,
    },
};

const TICK: Duration = Duration::from_secs(1);
const INTENT_CAPACITY: usize = 16;
const SUMMARY_CAPACITY: usize = 64;

/// Workout orchestrator, the single owner of session state
///
/// Consumes decoded telemetry, rep notifications and connection changes,
/// drives the [`SessionState`] machine and publishes [`RepCount`],
/// [`HandleState`] and [`SessionState`] snapshots on watch channels.
/// Finished sets are broadcast as [`SessionSummary`] records.
///
/// Usually moved into a background task with [`WorkoutSession::spawn`]; the
/// methods can also be driven directly.
pub struct WorkoutSession<A: BleAdapter> {
    connection: Arc<ConnectionManager<A>>,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    rep_count: watch::Sender<RepCount>,
    handle_state: watch::Sender<HandleState>,
    summaries: broadcast::Sender<SessionSummary>,
    rep_counter: RepCounter,
    handles: HandleStateDetector,
    plan: Vec<WorkoutParameters>,
    plan_index: usize,
    auto_start: Option<WorkoutParameters>,
    started_at: Option<Instant>,
    grabbed_during_set: bool,
}

impl<A: BleAdapter> WorkoutSession<A> {
    /// Idle session over `connection`
    #[must_use]
    pub fn new(connection: Arc<ConnectionManager<A>>, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (rep_count, _) = watch::channel(RepCount::default());
        let (handle_state, _) = watch::channel(HandleState::default());
        let (summaries, _) = broadcast::channel(SUMMARY_CAPACITY);

        Self {
            connection,
            config,
            state,
            rep_count,
            handle_state,
            summaries,
            rep_counter: RepCounter::default(),
            handles: HandleStateDetector::new(),
            plan: Vec::new(),
            plan_index: 0,
            auto_start: None,
            started_at: None,
            grabbed_during_set: false,
        }
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Current rep tally
    #[must_use]
    pub fn rep_count(&self) -> RepCount {
        *self.rep_count.borrow()
    }

    /// Current grip state
    #[must_use]
    pub fn handle_state(&self) -> HandleState {
        *self.handle_state.borrow()
    }

    /// Whether auto-start is armed
    #[must_use]
    pub const fn is_auto_start_armed(&self) -> bool {
        self.auto_start.is_some()
    }

    /// Session state changes
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Rep tally changes
    #[must_use]
    pub fn subscribe_rep_count(&self) -> watch::Receiver<RepCount> {
        self.rep_count.subscribe()
    }

    /// Grip state changes
    #[must_use]
    pub fn subscribe_handle_state(&self) -> watch::Receiver<HandleState> {
        self.handle_state.subscribe()
    }

    /// Finished set records
    #[must_use]
    pub fn subscribe_summaries(&self) -> broadcast::Receiver<SessionSummary> {
        self.summaries.subscribe()
    }

    /// Start a single set
    ///
    /// # Errors
    ///
    /// See [`Self::start_routine`].
    pub async fn start_workout(&mut self, params: WorkoutParameters) -> Result<()> {
        self.start_routine(vec![params]).await
    }

    /// Run `plan` in order, resting between exercises
    ///
    /// # Errors
    ///
    /// - [`TrainerError::InvalidParameters`] for an empty plan or invalid entry
    /// - [`TrainerError::InvalidState`] while a set is in progress
    /// - [`TrainerError::NotReady`] without a ready connection
    /// - the write error if the set starts immediately and its frame fails
    pub async fn start_routine(&mut self, plan: Vec<WorkoutParameters>) -> Result<()> {
        if plan.is_empty() {
            return Err(TrainerError::InvalidParameters(
                "Workout plan is empty".to_string(),
            ));
        }
        for params in &plan {
            params.validate()?;
        }

        let state = self.state();
        if state.is_in_progress() {
            return Err(TrainerError::InvalidState {
                state: state.to_string(),
            });
        }
        self.require_connection()?;

        info!("Starting workout plan with {} exercise(s)", plan.len());
        self.plan = plan;
        self.begin(0).await
    }

    /// Stop whatever is running
    ///
    /// An active set is stopped on the trainer first. If that write fails the
    /// error is returned at once and the session stays `Active`, so the
    /// caller can retry; the stop is never retried in the background.
    ///
    /// # Errors
    ///
    /// Returns the stop write error.
    pub async fn stop_workout(&mut self) -> Result<()> {
        self.disarm_auto_start().await;

        match self.state() {
            SessionState::Active => self.finish_set(SetEnd::UserStopped).await,
            SessionState::Countdown(_) => {
                info!("Countdown cancelled");
                self.enter(SessionState::Idle)
            }
            SessionState::Resting(..) => {
                info!("Plan stopped during rest");
                self.enter(SessionState::Completed)
            }
            SessionState::Error(_) => {
                self.connection.send_command(&Command::stop()).await?;
                self.connection.stop_monitor_polling().await;
                self.enter(SessionState::Completed)
            }
            SessionState::Idle | SessionState::Completed => {
                debug!("Stop requested with nothing running");
                Ok(())
            }
        }
    }

    /// End the current rest and start the next exercise
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::InvalidState`] when not resting.
    pub async fn skip_rest(&mut self) -> Result<()> {
        match self.state() {
            SessionState::Resting(_, next) => {
                info!("Rest skipped");
                self.begin(next.next_index).await
            }
            state => Err(TrainerError::InvalidState {
                state: state.to_string(),
            }),
        }
    }

    /// Apply one of the built-in LED color schemes
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::InvalidParameters`] for an unknown index,
    /// otherwise the write error.
    pub async fn set_color_scheme(&mut self, index: usize) -> Result<()> {
        let scheme = color_scheme(index)?;
        info!("Setting color scheme: {}", scheme.name);
        self.connection
            .send_command(&Command::color_scheme(scheme))
            .await
    }

    /// Arm auto-start: grabbing the handles starts a set with `params`
    ///
    /// Monitor polling runs while armed so grips can be seen.
    ///
    /// # Errors
    ///
    /// Returns the validation error for `params` or
    /// [`TrainerError::NotReady`] without a ready connection.
    pub async fn enable_auto_start_detection(&mut self, params: WorkoutParameters) -> Result<()> {
        params.validate()?;
        self.require_connection()?;

        info!("Auto-start armed");
        self.auto_start = Some(params);
        if matches!(self.state(), SessionState::Idle | SessionState::Completed) {
            self.handles.reset();
            self.connection.start_monitor_polling().await?;
        }
        Ok(())
    }

    /// Disarm auto-start
    pub async fn disable_auto_start_detection(&mut self) {
        self.disarm_auto_start().await;
    }

    /// Return to `Idle` from `Completed` or `Error`
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::InvalidState`] while a set is in progress.
    pub fn reset(&mut self) -> Result<()> {
        match self.state() {
            SessionState::Idle => Ok(()),
            SessionState::Completed | SessionState::Error(_) => {
                self.plan.clear();
                self.plan_index = 0;
                self.started_at = None;
                self.rep_counter = RepCounter::default();
                self.rep_count.send_replace(RepCount::default());
                self.enter(SessionState::Idle)
            }
            state => Err(TrainerError::InvalidState {
                state: state.to_string(),
            }),
        }
    }

    /// Advance countdown or rest by one second
    ///
    /// # Errors
    ///
    /// Returns the start error when the countdown or rest runs out and the
    /// next set cannot start.
    pub async fn tick(&mut self) -> Result<()> {
        match self.state() {
            SessionState::Countdown(secs) if secs > 1 => {
                self.enter(SessionState::Countdown(secs - 1))
            }
            SessionState::Countdown(_) => self.activate().await,
            SessionState::Resting(secs, next) if secs > 1 => {
                self.enter(SessionState::Resting(secs - 1, next))
            }
            SessionState::Resting(_, next) => self.begin(next.next_index).await,
            _ => Ok(()),
        }
    }

    /// Feed one decoded monitor sample
    ///
    /// # Errors
    ///
    /// Returns the start error of an auto-started set or the stop error of
    /// an auto-stopped one.
    pub async fn on_metric(&mut self, metric: &WorkoutMetric) -> Result<()> {
        let now = Instant::now();
        if let Some(state) = self
            .handles
            .update(metric.position_a, metric.velocity_a, now)
        {
            self.handle_state.send_replace(state);
        }
        let grip = self.handles.state();

        match self.state() {
            SessionState::Idle | SessionState::Completed if grip == HandleState::Grabbed => {
                if let Some(params) = self.auto_start.clone() {
                    info!("🏋️ Handles grabbed, auto-starting");
                    self.plan = vec![params];
                    return self.begin(0).await;
                }
            }
            SessionState::Active => {
                if grip == HandleState::Grabbed {
                    self.grabbed_during_set = true;
                }
                if self.should_auto_stop(now) {
                    return self.auto_stop().await;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Feed one decoded rep notification
    ///
    /// # Errors
    ///
    /// Returns the stop write error when the set finishes and the trainer
    /// does not take the stop frame; the session moves to `Error`.
    pub async fn on_rep_notification(&mut self, notification: &RepNotification) -> Result<()> {
        if self.state() != SessionState::Active {
            return Ok(());
        }

        let update = self.rep_counter.process(notification);
        if let Some(rep) = update.rep {
            log_rep(rep);
            self.rep_count.send_replace(self.rep_counter.count());
        }

        if update.top_reached {
            if let Some(rep) = self.rep_counter.credit_final_rep() {
                log_rep(rep);
                self.rep_count.send_replace(self.rep_counter.count());
                return self.finish_automatically(SetEnd::StoppedAtTop).await;
            }
        }

        if self.rep_counter.is_complete() {
            return self.finish_automatically(SetEnd::TargetReached).await;
        }
        Ok(())
    }

    /// React to a connection state change
    pub async fn on_connection_state(&mut self, state: &ConnectionState) {
        match state {
            ConnectionState::Error(message) => {
                self.auto_start = None;
                if self.state().is_in_progress() {
                    self.fail(format!("Connection error: {message}")).await;
                }
            }
            ConnectionState::Disconnected => {
                self.auto_start = None;
                if self.state().is_in_progress() {
                    self.fail("Connection lost".to_string()).await;
                }
            }
            _ => {}
        }
    }

    /// Move the orchestrator into a background task
    ///
    /// The task ends once every [`SessionHandle`] is dropped.
    #[must_use]
    pub fn spawn(self) -> SessionHandle<A> {
        let (intents, rx) = mpsc::channel(INTENT_CAPACITY);
        let connection = self.connection.clone();
        let state = self.subscribe_state();
        let rep_count = self.subscribe_rep_count();
        let handle_state = self.subscribe_handle_state();
        let summaries = self.summaries.clone();
        let task = tokio::spawn(self.run(rx));

        SessionHandle {
            connection,
            intents,
            state,
            rep_count,
            handle_state,
            summaries,
            task,
        }
    }

    async fn run(mut self, mut intents: mpsc::Receiver<Intent>) {
        let mut metrics = self.connection.subscribe_metrics();
        let mut reps = self.connection.subscribe_rep_notifications();
        let mut connection_state = self.connection.subscribe_state();
        let mut ticker = interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Workout session started");
        loop {
            let before = discriminant(&*self.state.borrow());

            tokio::select! {
                intent = intents.recv() => {
                    let Some(intent) = intent else { break };
                    self.handle_intent(intent).await;
                }
                metric = metrics.recv() => match metric {
                    Ok(metric) => {
                        if let Err(e) = self.on_metric(&metric).await {
                            warn!("Metric handling failed: {e}");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Session lagged behind telemetry, {skipped} samples dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                rep = reps.recv() => match rep {
                    Ok(rep) => {
                        if let Err(e) = self.on_rep_notification(&rep).await {
                            error!("Rep handling failed: {e}");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Session lagged behind rep notifications, {skipped} dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = connection_state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = connection_state.borrow_and_update().clone();
                    self.on_connection_state(&state).await;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("Session tick failed: {e}");
                    }
                }
            }

            // countdown and rest count whole seconds from when they begin
            let after = self.state();
            if discriminant(&after) != before
                && matches!(after, SessionState::Countdown(_) | SessionState::Resting(..))
            {
                ticker.reset();
            }
        }

        self.connection.stop_monitor_polling().await;
        info!("Workout session ended");
    }

    async fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::StartRoutine(plan, reply) => {
                let _ = reply.send(self.start_routine(plan).await);
            }
            Intent::Stop(reply) => {
                let _ = reply.send(self.stop_workout().await);
            }
            Intent::SkipRest(reply) => {
                let _ = reply.send(self.skip_rest().await);
            }
            Intent::SetColorScheme(index, reply) => {
                let _ = reply.send(self.set_color_scheme(index).await);
            }
            Intent::EnableAutoStart(params, reply) => {
                let _ = reply.send(self.enable_auto_start_detection(params).await);
            }
            Intent::DisableAutoStart(reply) => {
                self.disable_auto_start_detection().await;
                let _ = reply.send(Ok(()));
            }
            Intent::Reset(reply) => {
                let _ = reply.send(self.reset());
            }
        }
    }

    fn require_connection(&self) -> Result<()> {
        let state = self.connection.state();
        if state.is_ready() {
            Ok(())
        } else {
            Err(TrainerError::NotReady {
                reason: state.to_string(),
            })
        }
    }

    async fn begin(&mut self, index: usize) -> Result<()> {
        self.plan_index = index;
        if self.config.countdown_secs == 0 {
            self.activate().await
        } else {
            self.enter(SessionState::Countdown(self.config.countdown_secs))
        }
    }

    async fn activate(&mut self) -> Result<()> {
        let Some(params) = self.plan.get(self.plan_index).cloned() else {
            return Err(TrainerError::InvalidState {
                state: format!("no exercise at position {}", self.plan_index),
            });
        };

        self.rep_counter.configure(RepCounterConfig::from(&params));
        self.rep_count.send_replace(self.rep_counter.count());
        self.grabbed_during_set = self.handles.state() == HandleState::Grabbed;

        if let Err(e) = self.connection.send_command(&Command::workout(&params)).await {
            self.fail(format!("Failed to start workout: {e}")).await;
            return Err(e);
        }
        if let Err(e) = self.connection.start_monitor_polling().await {
            self.fail(format!("Failed to start monitor polling: {e}")).await;
            return Err(e);
        }

        self.started_at = Some(Instant::now());
        info!(
            "💪 Exercise {}/{} active: {:.1} kg per cable",
            self.plan_index + 1,
            self.plan.len(),
            params.weight_per_cable_kg
        );
        self.enter(SessionState::Active)
    }

    /// Stop the set on the trainer and move on; a failed stop leaves the
    /// state untouched and is returned
    async fn finish_set(&mut self, ended_by: SetEnd) -> Result<()> {
        self.connection.send_command(&Command::stop()).await?;
        self.connection.stop_monitor_polling().await;
        self.publish_summary(ended_by);

        let next_index = self.plan_index + 1;
        let next = (ended_by != SetEnd::UserStopped)
            .then(|| self.plan.get(next_index).cloned())
            .flatten();

        match next {
            Some(parameters) => {
                info!("Resting {}s before exercise {}", self.config.rest_secs, next_index + 1);
                self.enter(SessionState::Resting(
                    self.config.rest_secs,
                    RestContext {
                        next_index,
                        parameters,
                    },
                ))?;
                if self.config.rest_secs == 0 {
                    return self.begin(next_index).await;
                }
                Ok(())
            }
            None => {
                info!("🏁 Workout complete");
                self.enter(SessionState::Completed)?;
                self.resume_auto_start_polling().await;
                Ok(())
            }
        }
    }

    async fn finish_automatically(&mut self, ended_by: SetEnd) -> Result<()> {
        if let Err(e) = self.finish_set(ended_by).await {
            self.fail(format!("Stop command failed: {e}")).await;
            return Err(e);
        }
        Ok(())
    }

    fn should_auto_stop(&self, now: Instant) -> bool {
        let is_just_lift = self.rep_counter.config().is_just_lift;
        let dwell = Duration::try_from_secs_f32(self.config.auto_stop_secs.max(0.0))
            .unwrap_or(Duration::MAX);
        is_just_lift
            && self.grabbed_during_set
            && self
                .handles
                .released_for(now)
                .is_some_and(|released| released >= dwell)
    }

    async fn auto_stop(&mut self) -> Result<()> {
        info!("Handles at rest, auto-stopping Just-Lift set");
        if let Err(e) = self.connection.send_command(&Command::stop()).await {
            self.fail(format!("Stop command failed: {e}")).await;
            return Err(e);
        }
        self.connection.stop_monitor_polling().await;
        self.publish_summary(SetEnd::AutoStopped);

        if self.auto_start.is_none() {
            self.auto_start = self.plan.get(self.plan_index).cloned();
        }
        self.enter(SessionState::Idle)?;
        self.resume_auto_start_polling().await;
        Ok(())
    }

    async fn resume_auto_start_polling(&mut self) {
        if self.auto_start.is_some() {
            self.handles.reset();
            self.handle_state.send_replace(HandleState::Released);
            if let Err(e) = self.connection.start_monitor_polling().await {
                warn!("Could not resume polling for auto-start: {e}");
            }
        }
    }

    async fn disarm_auto_start(&mut self) {
        if self.auto_start.take().is_some() {
            info!("Auto-start disarmed");
            if self.state() != SessionState::Active {
                self.connection.stop_monitor_polling().await;
            }
        }
    }

    fn publish_summary(&self, ended_by: SetEnd) {
        let count = self.rep_counter.count();
        let summary = SessionSummary {
            warmup_reps: count.warmup_reps,
            working_reps: count.working_reps,
            total_reps: count.total(),
            duration: self.started_at.map(|at| at.elapsed()).unwrap_or_default(),
            parameters: self.plan.get(self.plan_index).cloned().unwrap_or_default(),
            final_target_weight_kg: self.rep_counter.target_weight_kg(),
            ended_by,
            finished_at: SystemTime::now(),
        };
        info!(
            "Set finished ({ended_by:?}): {} warmup + {} working reps in {:.1}s",
            summary.warmup_reps,
            summary.working_reps,
            summary.duration.as_secs_f32()
        );
        // nobody listening is fine
        let _ = self.summaries.send(summary);
    }

    async fn fail(&mut self, message: String) {
        error!("Session error: {message}");
        self.connection.stop_monitor_polling().await;
        let _ = self.enter(SessionState::Error(message));
    }

    fn enter(&self, next: SessionState) -> Result<()> {
        let mut rejected = None;
        self.state.send_if_modified(|current| {
            if current.can_transition_to(&next) {
                debug!("Session: {current} -> {next}");
                *current = next;
                true
            } else {
                rejected = Some(current.to_string());
                false
            }
        });

        match rejected {
            Some(state) => {
                warn!("Rejected session transition from {state}");
                Err(TrainerError::InvalidState { state })
            }
            None => Ok(()),
        }
    }
}

fn log_rep(rep: RepEvent) {
    match rep {
        RepEvent::Warmup { rep } => info!("Warmup rep {rep}"),
        RepEvent::Working {
            rep,
            next_target_weight_kg,
        } => info!("Rep {rep} (next {next_target_weight_kg:.1} kg)"),
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Intent {
    StartRoutine(Vec<WorkoutParameters>, Reply<()>),
    Stop(Reply<()>),
    SkipRest(Reply<()>),
    SetColorScheme(usize, Reply<()>),
    EnableAutoStart(WorkoutParameters, Reply<()>),
    DisableAutoStart(Reply<()>),
    Reset(Reply<()>),
}

/// Caller-side handle to a running [`WorkoutSession`]
///
/// Intents are queued to the session task and answered once applied.
/// Connection intents go straight to the [`ConnectionManager`].
pub struct SessionHandle<A: BleAdapter> {
    connection: Arc<ConnectionManager<A>>,
    intents: mpsc::Sender<Intent>,
    state: watch::Receiver<SessionState>,
    rep_count: watch::Receiver<RepCount>,
    handle_state: watch::Receiver<HandleState>,
    summaries: broadcast::Sender<SessionSummary>,
    task: JoinHandle<()>,
}

impl SessionHandle<BleManager> {
    /// Scan for the first trainer and connect with default settings
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::Ble`] if the Bluetooth adapter cannot be
    /// initialized, otherwise any scan or connect error.
    pub async fn connect_first() -> Result<Self> {
        Self::connect_first_with_config(TrainerConfig::default()).await
    }

    /// Scan for the first trainer and connect with `config`
    ///
    /// # Errors
    ///
    /// See [`Self::connect_first`].
    pub async fn connect_first_with_config(config: TrainerConfig) -> Result<Self> {
        let adapter = BleManager::new().await?;
        let handle = Self::new(adapter, config);
        handle.scan_and_connect().await?;
        Ok(handle)
    }
}

impl<A: BleAdapter> SessionHandle<A> {
    /// Build the connection and session over `adapter` and start the session task
    #[must_use]
    pub fn new(adapter: A, config: TrainerConfig) -> Self {
        let connection = Arc::new(ConnectionManager::new(
            adapter,
            config.connection,
            config.handshake,
            config.polling,
        ));
        WorkoutSession::new(connection, config.session).spawn()
    }

    /// Scan for a trainer without connecting
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::scan`].
    pub async fn scan(&self) -> Result<DeviceInfo> {
        self.connection.scan().await
    }

    /// Scan, then connect to the first trainer found
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::connect_first`].
    pub async fn scan_and_connect(&self) -> Result<DeviceInfo> {
        self.connection.connect_first().await
    }

    /// Connect to `device_id`
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::connect`].
    pub async fn connect(&self, device_id: &str) -> Result<()> {
        self.connection.connect(device_id).await
    }

    /// Release the link
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::disconnect`].
    pub async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await
    }

    /// Start a single set
    ///
    /// # Errors
    ///
    /// See [`WorkoutSession::start_routine`].
    pub async fn start_workout(&self, params: WorkoutParameters) -> Result<()> {
        self.request(|reply| Intent::StartRoutine(vec![params], reply))
            .await
    }

    /// Run several exercises with rests in between
    ///
    /// # Errors
    ///
    /// See [`WorkoutSession::start_routine`].
    pub async fn start_routine(&self, plan: Vec<WorkoutParameters>) -> Result<()> {
        self.request(|reply| Intent::StartRoutine(plan, reply)).await
    }

    /// Stop whatever is running
    ///
    /// # Errors
    ///
    /// Returns the stop write error; re-issue the stop when this fails.
    pub async fn stop_workout(&self) -> Result<()> {
        self.request(Intent::Stop).await
    }

    /// End the current rest early
    ///
    /// # Errors
    ///
    /// See [`WorkoutSession::skip_rest`].
    pub async fn skip_rest(&self) -> Result<()> {
        self.request(Intent::SkipRest).await
    }

    /// Apply a built-in LED color scheme
    ///
    /// # Errors
    ///
    /// See [`WorkoutSession::set_color_scheme`].
    pub async fn set_color_scheme(&self, index: usize) -> Result<()> {
        self.request(|reply| Intent::SetColorScheme(index, reply))
            .await
    }

    /// Start a set with `params` when the handles are grabbed
    ///
    /// # Errors
    ///
    /// See [`WorkoutSession::enable_auto_start_detection`].
    pub async fn enable_auto_start_detection(&self, params: WorkoutParameters) -> Result<()> {
        self.request(|reply| Intent::EnableAutoStart(params, reply))
            .await
    }

    /// Disarm auto-start
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::SessionClosed`] if the session task is gone.
    pub async fn disable_auto_start_detection(&self) -> Result<()> {
        self.request(Intent::DisableAutoStart).await
    }

    /// Return to `Idle` from `Completed` or `Error`
    ///
    /// # Errors
    ///
    /// See [`WorkoutSession::reset`].
    pub async fn reset(&self) -> Result<()> {
        self.request(Intent::Reset).await
    }

    /// Current connection state
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Current session state
    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Current rep tally
    #[must_use]
    pub fn rep_count(&self) -> RepCount {
        *self.rep_count.borrow()
    }

    /// Current grip state
    #[must_use]
    pub fn handle_state(&self) -> HandleState {
        *self.handle_state.borrow()
    }

    /// Connection state changes
    #[must_use]
    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    /// Decoded monitor samples
    #[must_use]
    pub fn subscribe_metrics(&self) -> broadcast::Receiver<WorkoutMetric> {
        self.connection.subscribe_metrics()
    }

    /// Decoded rep notifications
    #[must_use]
    pub fn subscribe_rep_notifications(&self) -> broadcast::Receiver<RepNotification> {
        self.connection.subscribe_rep_notifications()
    }

    /// Session state changes
    #[must_use]
    pub fn subscribe_session_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Rep tally changes
    #[must_use]
    pub fn subscribe_rep_count(&self) -> watch::Receiver<RepCount> {
        self.rep_count.clone()
    }

    /// Grip state changes
    #[must_use]
    pub fn subscribe_handle_state(&self) -> watch::Receiver<HandleState> {
        self.handle_state.clone()
    }

    /// Finished set records
    #[must_use]
    pub fn subscribe_summaries(&self) -> broadcast::Receiver<SessionSummary> {
        self.summaries.subscribe()
    }

    /// Stop the session task, then release the link
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::disconnect`].
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            connection,
            intents,
            task,
            ..
        } = self;
        drop(intents);
        if let Err(e) = task.await {
            if e.is_panic() {
                error!("Session task panicked: {e}");
            }
        }
        connection.disconnect().await
    }

    async fn request(&self, intent: impl FnOnce(Reply<()>) -> Intent) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.intents
            .send(intent(reply))
            .await
            .map_err(|_| TrainerError::SessionClosed)?;
        response.await.map_err(|_| TrainerError::SessionClosed)?
    }
}
