use serde::{Deserialize, Serialize};
use std::{
    fmt,
    time::{Duration, SystemTime},
};

use crate::error::{Result, TrainerError};

/// Upper bound the trainer accepts for resistance on a single cable
pub const MAX_WEIGHT_PER_CABLE_KG: f32 = 100.0;

/// Upper bound for a fixed rep target
pub const MAX_TARGET_REPS: u8 = 100;

/// Upper bound for warmup reps
pub const MAX_WARMUP_REPS: u8 = 10;

/// Largest per-rep progression/regression magnitude
pub const MAX_PROGRESSION_KG: f32 = 3.0;

/// Largest eccentric load accepted in Echo mode, in percent
pub const MAX_ECCENTRIC_LOAD_PERCENT: u16 = 150;

/// Lifecycle of the wireless link, owned by the connection manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link
    Disconnected,
    /// Looking for a peripheral matching the name prefix
    Scanning,
    /// Link establishment in progress
    Connecting(String),
    /// Link up, characteristics resolved and handshake done
    Ready {
        /// Advertised device name
        name: String,
        /// Platform peripheral identifier
        id: String,
    },
    /// Lifecycle failure, surfaced until the caller acts on it
    Error(String),
}

impl ConnectionState {
    /// Whether `next` is a legal successor of this state
    #[must_use]
    pub const fn can_transition_to(&self, next: &Self) -> bool {
        match (self, next) {
            (_, Self::Disconnected)
            | (Self::Disconnected | Self::Error(_), Self::Scanning | Self::Connecting(_))
            | (Self::Scanning, Self::Connecting(_))
            | (Self::Connecting(_), Self::Ready { .. })
            | (Self::Scanning | Self::Connecting(_) | Self::Ready { .. }, Self::Error(_)) => true,
            _ => false,
        }
    }

    /// Whether commands can be written
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting(name) => write!(f, "Connecting to {name}"),
            Self::Ready { name, .. } => write!(f, "Ready ({name})"),
            Self::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

/// Device information captured during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Advertised device name
    pub name: String,
    /// Platform peripheral identifier (MAC on Linux, UUID on macOS)
    pub id: String,
    /// Signal strength (RSSI)
    pub rssi: i16,
}

impl DeviceInfo {
    /// Create new device info
    #[must_use]
    pub const fn new(name: String, id: String, rssi: i16) -> Self {
        Self { name, id, rssi }
    }
}

/// One decoded monitor sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkoutMetric {
    /// Decode time
    pub timestamp: SystemTime,
    /// Load on cable A in kg
    pub load_a: f32,
    /// Load on cable B in kg
    pub load_b: f32,
    /// Spike-filtered position of cable A
    pub position_a: f32,
    /// Spike-filtered position of cable B
    pub position_b: f32,
    /// Device tick counter
    pub ticks: u32,
    /// Speed of cable A in position units per second
    pub velocity_a: f32,
}

impl WorkoutMetric {
    /// Combined load of both cables in kg
    #[must_use]
    pub fn total_load(&self) -> f32 {
        self.load_a + self.load_b
    }
}

/// One decoded rep notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepNotification {
    /// Wrapping counter bumped when the top of the range is reached
    pub top_counter: u16,
    /// Wrapping counter bumped when a rep completes
    pub complete_counter: u16,
    /// Frame as received
    pub raw: Vec<u8>,
    /// Decode time
    pub timestamp: SystemTime,
}

/// Rep tally for the running set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepCount {
    /// Completed warmup reps
    pub warmup_reps: u32,
    /// Completed working reps
    pub working_reps: u32,
    /// Warmup target reached
    pub is_warmup_complete: bool,
}

impl RepCount {
    /// Warmup plus working reps
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.warmup_reps + self.working_reps
    }
}

/// Grip classification of the handles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandleState {
    /// Handles at rest
    #[default]
    Released,
    /// Handles lifted but not pulled decisively
    Moving,
    /// Handles in use
    Grabbed,
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Released => write!(f, "Released"),
            Self::Moving => write!(f, "Moving"),
            Self::Grabbed => write!(f, "Grabbed"),
        }
    }
}

/// Resistance profiles available in program workouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgramMode {
    /// Constant resistance both ways
    OldSchool,
    /// Fast reps, resistance eases with speed
    Pump,
    /// Slow reps under constant tension
    TimeUnderTension,
    /// Time under tension with a heavier eccentric
    TimeUnderTensionBeast,
    /// Resistance only on the lowering phase
    EccentricOnly,
}

impl ProgramMode {
    /// Mode selector byte written into program frames
    #[must_use]
    pub const fn selector(self) -> u8 {
        match self {
            Self::OldSchool => 0,
            Self::Pump => 2,
            Self::TimeUnderTension => 3,
            Self::TimeUnderTensionBeast => 4,
            Self::EccentricOnly => 6,
        }
    }
}

impl fmt::Display for ProgramMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OldSchool => write!(f, "Old School"),
            Self::Pump => write!(f, "Pump"),
            Self::TimeUnderTension => write!(f, "TUT"),
            Self::TimeUnderTensionBeast => write!(f, "TUT Beast"),
            Self::EccentricOnly => write!(f, "Eccentric Only"),
        }
    }
}

/// Echo mode difficulty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EchoLevel {
    /// Level 0
    Hard,
    /// Level 1
    Harder,
    /// Level 2
    Hardest,
    /// Level 3
    Epic,
}

impl EchoLevel {
    /// Level byte written into echo frames
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            Self::Hard => 0,
            Self::Harder => 1,
            Self::Hardest => 2,
            Self::Epic => 3,
        }
    }

    /// Force gain the trainer applies when echoing the lifter
    #[must_use]
    pub const fn gain(self) -> f32 {
        match self {
            Self::Hard => 1.0,
            Self::Harder => 1.25,
            Self::Hardest => 1.667,
            Self::Epic => 3.333,
        }
    }

    /// Concentric delay cap
    #[must_use]
    pub const fn cap(self) -> f32 {
        match self {
            Self::Hard => 50.0,
            Self::Harder => 40.0,
            Self::Hardest => 30.0,
            Self::Epic => 15.0,
        }
    }
}

/// What kind of resistance a workout uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkoutType {
    /// Fixed weight program
    Program(ProgramMode),
    /// Adaptive resistance mirroring the lifter's force
    Echo {
        /// Difficulty
        level: EchoLevel,
        /// Eccentric load in percent of concentric force
        eccentric_load_percent: u16,
    },
}

impl WorkoutType {
    /// Whether this workout is driven by an echo frame
    #[must_use]
    pub const fn is_echo(&self) -> bool {
        matches!(self, Self::Echo { .. })
    }
}

/// Parameters for one set, supplied by whoever picks the exercise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutParameters {
    /// Program or Echo
    pub workout_type: WorkoutType,
    /// Working reps to complete
    pub target_reps: u8,
    /// Resistance per cable in kg
    pub weight_per_cable_kg: f32,
    /// Added to the weight after each working rep (negative regresses)
    pub progression_per_rep_kg: f32,
    /// Open-ended set that never completes on its own
    pub is_just_lift: bool,
    /// Release at the top of the final rep
    pub stop_at_top: bool,
    /// Reps before the working reps begin
    pub warmup_target: u8,
}

impl Default for WorkoutParameters {
    fn default() -> Self {
        Self {
            workout_type: WorkoutType::Program(ProgramMode::OldSchool),
            target_reps: 10,
            weight_per_cable_kg: 10.0,
            progression_per_rep_kg: 0.0,
            is_just_lift: false,
            stop_at_top: false,
            warmup_target: 3,
        }
    }
}

impl WorkoutParameters {
    /// Open-ended Just-Lift parameters for auto-start
    #[must_use]
    pub fn just_lift(weight_per_cable_kg: f32) -> Self {
        Self {
            weight_per_cable_kg,
            is_just_lift: true,
            ..Self::default()
        }
    }

    /// Check the parameters against what the trainer accepts
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::InvalidParameters`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=MAX_WEIGHT_PER_CABLE_KG).contains(&self.weight_per_cable_kg) {
            return Err(TrainerError::InvalidParameters(format!(
                "Weight {:.1} kg per cable is out of range (0.0 - {MAX_WEIGHT_PER_CABLE_KG:.1})",
                self.weight_per_cable_kg
            )));
        }

        if !self.is_just_lift && !(1..=MAX_TARGET_REPS).contains(&self.target_reps) {
            return Err(TrainerError::InvalidParameters(format!(
                "Target reps {} is out of range (1 - {MAX_TARGET_REPS})",
                self.target_reps
            )));
        }

        if self.warmup_target > MAX_WARMUP_REPS {
            return Err(TrainerError::InvalidParameters(format!(
                "Warmup reps {} exceeds {MAX_WARMUP_REPS}",
                self.warmup_target
            )));
        }

        if self.progression_per_rep_kg.abs() > MAX_PROGRESSION_KG {
            return Err(TrainerError::InvalidParameters(format!(
                "Progression {:.1} kg/rep exceeds +/-{MAX_PROGRESSION_KG:.1}",
                self.progression_per_rep_kg
            )));
        }

        if let WorkoutType::Echo {
            eccentric_load_percent,
            ..
        } = self.workout_type
        {
            if eccentric_load_percent > MAX_ECCENTRIC_LOAD_PERCENT {
                return Err(TrainerError::InvalidParameters(format!(
                    "Eccentric load {eccentric_load_percent}% exceeds {MAX_ECCENTRIC_LOAD_PERCENT}%"
                )));
            }
        }

        Ok(())
    }
}

/// The set waiting behind a rest period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestContext {
    /// Position of the next exercise in the running plan
    pub next_index: usize,
    /// Parameters the next exercise will start with
    pub parameters: WorkoutParameters,
}

/// Workout session lifecycle, owned by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionState {
    /// Nothing running
    Idle,
    /// Set about to start
    Countdown(u32),
    /// Set running
    Active,
    /// Between exercises
    Resting(u32, RestContext),
    /// Plan finished or stopped
    Completed,
    /// Unrecoverable failure, polling stopped
    Error(String),
}

impl SessionState {
    /// Whether `next` is a legal successor of this state
    #[must_use]
    pub const fn can_transition_to(&self, next: &Self) -> bool {
        match (self, next) {
            (_, Self::Error(_))
            | (
                Self::Idle | Self::Completed | Self::Error(_) | Self::Resting(..),
                Self::Countdown(_) | Self::Active,
            )
            | (Self::Countdown(_), Self::Countdown(_) | Self::Active | Self::Idle)
            | (Self::Active, Self::Resting(..) | Self::Completed | Self::Idle)
            | (Self::Resting(..), Self::Resting(..) | Self::Completed)
            | (Self::Completed | Self::Error(_), Self::Idle | Self::Completed) => true,
            _ => false,
        }
    }

    /// Whether a set is counting down, running or resting
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        matches!(self, Self::Countdown(_) | Self::Active | Self::Resting(..))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Countdown(secs) => write!(f, "Starting in {secs}s"),
            Self::Active => write!(f, "Active"),
            Self::Resting(secs, next) => {
                write!(f, "Resting {secs}s before exercise {}", next.next_index + 1)
            }
            Self::Completed => write!(f, "Completed"),
            Self::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

/// Why a set ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetEnd {
    /// Rep target reached
    TargetReached,
    /// Released at the top of the final rep
    StoppedAtTop,
    /// Explicit stop intent
    UserStopped,
    /// Just-Lift handles left at rest
    AutoStopped,
}

/// Finalized record of one set, for persistence collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Completed warmup reps
    pub warmup_reps: u32,
    /// Completed working reps
    pub working_reps: u32,
    /// Warmup plus working reps
    pub total_reps: u32,
    /// Time from activation to end
    pub duration: Duration,
    /// Parameters the set ran with
    pub parameters: WorkoutParameters,
    /// Weight the next working rep would have used
    pub final_target_weight_kg: f32,
    /// Why the set ended
    pub ended_by: SetEnd,
    /// End time
    pub finished_at: SystemTime,
}

/// Discovery and connect parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    /// Advertised name prefix that identifies a trainer
    pub name_prefix: String,
    /// Scan timeout in milliseconds
    pub scan_timeout_ms: u64,
    /// Timeout per connect attempt in milliseconds
    pub connect_timeout_ms: u64,
    /// Connect attempts before giving up
    pub retry_attempts: u32,
    /// Delay between connect attempts in milliseconds
    pub retry_delay_ms: u64,
    /// ATT MTU requested after connecting
    pub requested_mtu: u16,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            name_prefix: "Vee".to_string(),
            scan_timeout_ms: 30_000,
            connect_timeout_ms: 15_000,
            retry_attempts: 3,
            retry_delay_ms: 500,
            requested_mtu: 247,
        }
    }
}

/// Post-connect handshake timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Wait before the first command so the trainer can settle
    pub settle_delay_ms: u64,
    /// Wait between INIT and the INIT preset
    pub init_preset_delay_ms: u64,
    /// Wait after the INIT preset
    pub post_preset_delay_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 2_000,
            init_preset_delay_ms: 200,
            post_preset_delay_ms: 200,
        }
    }
}

/// Telemetry polling cadence and stream sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Monitor read period in milliseconds
    pub monitor_interval_ms: u64,
    /// Keep-alive read period in milliseconds
    pub property_interval_ms: u64,
    /// Capacity of each sample stream before the oldest entries drop
    pub stream_capacity: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            monitor_interval_ms: 100,
            property_interval_ms: 500,
            stream_capacity: 64,
        }
    }
}

/// Workout session timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Countdown before a set goes active (0 starts immediately)
    pub countdown_secs: u32,
    /// Rest between exercises of a plan
    pub rest_secs: u32,
    /// Sustained release that ends a Just-Lift set
    pub auto_stop_secs: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 5,
            rest_secs: 60,
            auto_stop_secs: 3.0,
        }
    }
}

/// Every tunable of the stack, loadable from any serde format
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Discovery and connect
    pub connection: ConnectionParams,
    /// Post-connect handshake
    pub handshake: HandshakeConfig,
    /// Telemetry polling
    pub polling: PollingConfig,
    /// Workout session timing
    pub session: SessionConfig,
}
