#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Vitruvian BLE 🏋️
//!
//! A Rust library for driving Vitruvian resistance trainers via Bluetooth Low Energy.
//!
//! The trainer exposes a Nordic UART style service with one write characteristic
//! for commands and a handful of read/notify characteristics for telemetry. This
//! crate owns the device side of a training app: it finds and connects to the
//! trainer, performs the initialization handshake, writes fixed-size command
//! frames, polls telemetry and turns the raw stream into discrete events such as
//! completed reps, grabbed or released handles and finished sets.
//!
//! ## Layers
//!
//! - [`protocol`]: frame encoding and telemetry decoding
//! - [`reps`]: rep counting over 16-bit wrapping counters
//! - [`handle`]: grip detection with hysteresis
//! - [`connection`]: scan, connect, characteristic resolution, handshake, disconnect
//! - [`poller`]: the monitor and keep-alive polling loops
//! - [`session`]: the workout state machine and its handle
//!
//! ## Safety Warning
//!
//! ⚠️ **Important**: This library controls physical exercise equipment. A failed
//! stop command is always reported to the caller and never retried behind its
//! back; make sure your application surfaces that error and lets the user retry.
//!
//! ## Quick Start
//!
//! ```no_run
//! use vitruvian_ble::{Trainer, WorkoutParameters};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Discover and connect to a trainer
//!     let trainer = Trainer::connect_first().await?;
//!
//!     // Ten reps at 15 kg per cable after three warmup reps
//!     trainer
//!         .start_workout(WorkoutParameters {
//!             weight_per_cable_kg: 15.0,
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     // Stop early if needed
//!     trainer.stop_workout().await?;
//!
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy backend built on btleplug
pub mod ble;
/// Link lifecycle and serialized command channel
pub mod connection;
/// Error types and handling
pub mod error;
/// Grip detection
pub mod handle;
/// Telemetry polling loops
pub mod poller;
/// Frame encoding and decoding
pub mod protocol;
/// Rep counting
pub mod reps;
/// Workout session state machine
pub mod session;
/// Transport seam between the BLE backend and the rest of the crate
pub mod transport;
/// Type definitions and data structures
pub mod types;

use uuid::Uuid;

// Re-export the main types for convenient usage
pub use ble::{BleLink, BleManager};
pub use connection::ConnectionManager;
pub use error::{Result, TrainerError};
pub use session::{SessionHandle, WorkoutSession};
pub use types::{
    ConnectionParams, ConnectionState, DeviceInfo, EchoLevel, HandleState, HandshakeConfig,
    PollingConfig, ProgramMode, RepCount, RepNotification, SessionConfig, SessionState,
    SessionSummary, SetEnd, TrainerConfig, WorkoutMetric, WorkoutParameters, WorkoutType,
};

/// Session handle over the platform Bluetooth backend
pub type Trainer = SessionHandle<BleManager>;

/// Primary trainer service (Nordic UART service)
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e_24dc_ca9e);

/// Command characteristic, written by the app
pub const RX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e_24dc_ca9e);

/// Monitor characteristic, polled for positions and loads
pub const MONITOR_CHAR_UUID: Uuid = Uuid::from_u128(0x90e9_91a6_c548_44ed_969b_eb54_1014_eae3);

/// Property characteristic, polled as keep-alive
pub const PROPERTY_CHAR_UUID: Uuid = Uuid::from_u128(0x5fa5_38ec_d041_42f6_bbd6_c30d_4753_87b7);

/// Rep notification characteristic; absent on some firmware
pub const REP_NOTIFY_CHAR_UUID: Uuid = Uuid::from_u128(0x8308_f2a6_0875_4a94_a86f_5c5c_5e1b_068a);

/// Notify-only characteristics enabled at connect time
pub const NOTIFY_CHAR_UUIDS: [Uuid; 4] = [
    Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e_24dc_ca9e),
    Uuid::from_u128(0x383f_7276_49af_4335_9072_f01b_0f8a_cad6),
    Uuid::from_u128(0x74e9_94ac_0e80_4c02_9cd0_76cb_31d3_959b),
    Uuid::from_u128(0x67d0_dae0_5bfc_4ea2_acc9_ac78_4dee_7f29),
];
