use crate::{
    error::{FrameKind, Result, TrainerError},
    types::{EchoLevel, ProgramMode, RepNotification, WorkoutParameters, WorkoutType},
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::SystemTime;

/// INIT command length
pub const INIT_COMMAND_LEN: usize = 4;

/// INIT preset length
pub const INIT_PRESET_LEN: usize = 34;

/// Program parameters frame length
pub const PROGRAM_PARAMS_LEN: usize = 96;

/// Echo control frame length
pub const ECHO_CONTROL_LEN: usize = 40;

/// Color scheme frame length
pub const COLOR_SCHEME_LEN: usize = 44;

/// Shortest monitor frame that carries every field
pub const MONITOR_FRAME_MIN_LEN: usize = 16;

/// Shortest rep notification frame that carries both counters
pub const REP_FRAME_MIN_LEN: usize = 6;

/// Raw positions above this are sensor glitches
pub const POSITION_SPIKE_THRESHOLD: u16 = 50_000;

/// Target reps byte that tells the trainer to run open-ended
pub const JUST_LIFT_REPS: u8 = 0xFF;

/// Colors a color scheme frame can carry
pub const MAX_SCHEME_COLORS: usize = 10;

/// Leading command byte of each outbound frame
///
/// The trainer reads the first byte of a write on the RX characteristic as the
/// command selector; the rest of the first 32-bit word is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandId {
    /// Program workout parameters
    ProgramParams = 0x04,
    /// Initialization, also interpreted as stop while a set runs
    Init = 0x0A,
    /// LED color scheme, also the INIT preset
    ColorScheme = 0x11,
    /// Echo mode control
    EchoControl = 0x4E,
}

/// Factory preset sent once after INIT
const INIT_PRESET: [u8; INIT_PRESET_LEN] = [
    0x11, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xCD, 0xCC, 0xCC,
    0x3E, 0xFF, 0x00, 0x4C, 0xFF, 0x23, 0x8C, 0xFF, 0x8C, 0x8C, 0xFF, 0x00, 0x4C, 0xFF, 0x23,
    0x8C, 0xFF, 0x8C, 0x8C,
];

/// 8-bit RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

/// LED scheme for the trainer's light ring
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorScheme {
    /// Preset name
    pub name: &'static str,
    /// 0.0 - 1.0
    pub brightness: f32,
    /// Colors in display order
    pub colors: &'static [Rgb],
}

/// Built-in schemes addressable by index
pub const COLOR_SCHEMES: [ColorScheme; 6] = [
    ColorScheme {
        name: "Blue",
        brightness: 0.4,
        colors: &[Rgb(0x00, 0xA8, 0xDD), Rgb(0x00, 0xCF, 0xFC), Rgb(0x5D, 0xDF, 0xFC)],
    },
    ColorScheme {
        name: "Green",
        brightness: 0.4,
        colors: &[Rgb(0x7D, 0xC1, 0x47), Rgb(0xA1, 0xD8, 0x6A), Rgb(0xBA, 0xE0, 0x94)],
    },
    ColorScheme {
        name: "Teal",
        brightness: 0.4,
        colors: &[Rgb(0x3E, 0x9A, 0xB7), Rgb(0x83, 0xBE, 0xD1), Rgb(0xC3, 0xE0, 0xE8)],
    },
    ColorScheme {
        name: "Yellow",
        brightness: 0.4,
        colors: &[Rgb(0xFF, 0x90, 0x51), Rgb(0xFF, 0xC6, 0x47), Rgb(0xFF, 0xD7, 0x47)],
    },
    ColorScheme {
        name: "Pink",
        brightness: 0.4,
        colors: &[Rgb(0xFF, 0x00, 0x4C), Rgb(0xFF, 0x23, 0x8C), Rgb(0xFF, 0x8C, 0x8C)],
    },
    ColorScheme {
        name: "Red",
        brightness: 0.4,
        colors: &[Rgb(0xFF, 0x00, 0x00), Rgb(0xFF, 0x55, 0x55), Rgb(0xFF, 0xAA, 0xAA)],
    },
];

/// Look up a built-in color scheme
///
/// # Errors
///
/// Returns [`TrainerError::InvalidParameters`] for an unknown index.
pub fn color_scheme(index: usize) -> Result<&'static ColorScheme> {
    COLOR_SCHEMES.get(index).ok_or_else(|| {
        TrainerError::InvalidParameters(format!(
            "Color scheme {index} does not exist (0 - {})",
            COLOR_SCHEMES.len() - 1
        ))
    })
}

/// Force profile block for program frames: concentric speed window, concentric
/// force scale, eccentric speed window, eccentric force scale, soft max and ramp.
const fn mode_profile(mode: ProgramMode) -> [f32; 8] {
    match mode {
        ProgramMode::OldSchool => [0.0, 20.0, 1.0, -1300.0, -1200.0, 1.0, 100.0, 3.0],
        ProgramMode::Pump => [50.0, 450.0, 0.6, -700.0, -550.0, 0.6, 100.0, 5.0],
        ProgramMode::TimeUnderTension => [250.0, 350.0, 1.0, -1100.0, -1000.0, 1.0, 100.0, 3.0],
        ProgramMode::TimeUnderTensionBeast => {
            [150.0, 250.0, 1.0, -1100.0, -1000.0, 1.3, 100.0, 3.0]
        }
        ProgramMode::EccentricOnly => [50.0, 550.0, 0.0, -1300.0, -1200.0, 1.0, 100.0, 3.0],
    }
}

/// Outbound frame
///
/// Every variant serializes to the exact length the trainer expects; the
/// connection writes each one as a single logical write.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// 4-byte INIT, doubles as stop
    Init,
    /// 34-byte factory preset
    InitPreset,
    /// 96-byte program parameters
    ProgramParams(WorkoutParameters),
    /// 40-byte echo control
    EchoControl(WorkoutParameters),
    /// 44-byte color scheme
    ColorScheme {
        /// 0.0 - 1.0
        brightness: f32,
        /// At most [`MAX_SCHEME_COLORS`] colors
        colors: Vec<Rgb>,
    },
}

impl Command {
    /// Stop the running set
    #[must_use]
    pub const fn stop() -> Self {
        Self::Init
    }

    /// The single frame that starts `params`: echo control for Echo
    /// workouts, program parameters for everything else
    #[must_use]
    pub fn workout(params: &WorkoutParameters) -> Self {
        if params.workout_type.is_echo() {
            Self::EchoControl(params.clone())
        } else {
            Self::ProgramParams(params.clone())
        }
    }

    /// Frame for a built-in color scheme
    #[must_use]
    pub fn color_scheme(scheme: &ColorScheme) -> Self {
        Self::ColorScheme {
            brightness: scheme.brightness,
            colors: scheme.colors.to_vec(),
        }
    }

    /// Leading command byte
    #[must_use]
    pub const fn id(&self) -> CommandId {
        match self {
            Self::Init => CommandId::Init,
            Self::InitPreset | Self::ColorScheme { .. } => CommandId::ColorScheme,
            Self::ProgramParams(_) => CommandId::ProgramParams,
            Self::EchoControl(_) => CommandId::EchoControl,
        }
    }

    /// Serialized length
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        match self {
            Self::Init => INIT_COMMAND_LEN,
            Self::InitPreset => INIT_PRESET_LEN,
            Self::ProgramParams(_) => PROGRAM_PARAMS_LEN,
            Self::EchoControl(_) => ECHO_CONTROL_LEN,
            Self::ColorScheme { .. } => COLOR_SCHEME_LEN,
        }
    }

    /// Serialize to bytes
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.frame_len());

        match self {
            Self::InitPreset => buf.extend_from_slice(&INIT_PRESET),
            Self::Init => put_header(&mut buf, CommandId::Init),
            Self::ProgramParams(params) => encode_program(&mut buf, params),
            Self::EchoControl(params) => encode_echo(&mut buf, params),
            Self::ColorScheme { brightness, colors } => {
                encode_color_scheme(&mut buf, *brightness, colors);
            }
        }

        debug_assert_eq!(buf.len(), self.frame_len());
        buf.freeze()
    }
}

fn put_header(buf: &mut BytesMut, id: CommandId) {
    buf.put_u8(id as u8);
    buf.put_bytes(0, 3);
}

fn pad_to(buf: &mut BytesMut, len: usize) {
    let missing = len.saturating_sub(buf.len());
    buf.put_bytes(0, missing);
}

fn reps_byte(params: &WorkoutParameters) -> u8 {
    if params.is_just_lift {
        JUST_LIFT_REPS
    } else {
        params.target_reps
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn centi_kg(kg: f32) -> u32 {
    (kg.max(0.0) * 100.0).round() as u32
}

#[allow(clippy::cast_possible_truncation)]
fn signed_centi_kg(kg: f32) -> i32 {
    (kg * 100.0).round() as i32
}

/// Program layout:
/// - 0x00: command header
/// - 0x04: target reps (0xFF for Just-Lift)
/// - 0x05: warmup reps
/// - 0x06: mode selector
/// - 0x07: flags (bit 0 Just-Lift, bit 1 stop-at-top)
/// - 0x08: weight per cable, kg x 100 (u32 LE)
/// - 0x0C: progression per rep, kg x 100 (i32 LE)
/// - 0x30: mode force profile (8 x f32 LE)
fn encode_program(buf: &mut BytesMut, params: &WorkoutParameters) {
    let mode = match params.workout_type {
        WorkoutType::Program(mode) => mode,
        WorkoutType::Echo { .. } => ProgramMode::OldSchool,
    };

    put_header(buf, CommandId::ProgramParams);
    buf.put_u8(reps_byte(params));
    buf.put_u8(params.warmup_target);
    buf.put_u8(mode.selector());
    buf.put_u8(u8::from(params.is_just_lift) | (u8::from(params.stop_at_top) << 1));
    buf.put_u32_le(centi_kg(params.weight_per_cable_kg));
    buf.put_i32_le(signed_centi_kg(params.progression_per_rep_kg));

    pad_to(buf, 0x30);
    for value in mode_profile(mode) {
        buf.put_f32_le(value);
    }
    pad_to(buf, PROGRAM_PARAMS_LEN);
}

/// Echo layout:
/// - 0x00: command header
/// - 0x04: warmup reps
/// - 0x05: target reps (0xFF for Just-Lift)
/// - 0x06: flags (bit 0 Just-Lift)
/// - 0x07: level
/// - 0x08: eccentric load percent (u16 LE)
/// - 0x0C: gain, cap, floor, negative limit (f32 LE)
fn encode_echo(buf: &mut BytesMut, params: &WorkoutParameters) {
    let (level, eccentric) = match params.workout_type {
        WorkoutType::Echo {
            level,
            eccentric_load_percent,
        } => (level, eccentric_load_percent),
        WorkoutType::Program(_) => (EchoLevel::Hard, 100),
    };

    put_header(buf, CommandId::EchoControl);
    buf.put_u8(params.warmup_target);
    buf.put_u8(reps_byte(params));
    buf.put_u8(u8::from(params.is_just_lift));
    buf.put_u8(level.index());
    buf.put_u16_le(eccentric);

    pad_to(buf, 0x0C);
    buf.put_f32_le(level.gain());
    buf.put_f32_le(level.cap());
    buf.put_f32_le(0.0);
    buf.put_f32_le(-100.0);
    pad_to(buf, ECHO_CONTROL_LEN);
}

/// Color layout:
/// - 0x00: command header
/// - 0x08: brightness (f32 LE)
/// - 0x0C: color count (u16 LE)
/// - 0x0E: RGB triples, zero filled
fn encode_color_scheme(buf: &mut BytesMut, brightness: f32, colors: &[Rgb]) {
    let colors = &colors[..colors.len().min(MAX_SCHEME_COLORS)];

    put_header(buf, CommandId::ColorScheme);
    pad_to(buf, 0x08);
    buf.put_f32_le(brightness.clamp(0.0, 1.0));
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u16_le(colors.len() as u16);
    for Rgb(r, g, b) in colors {
        buf.put_slice(&[*r, *g, *b]);
    }
    pad_to(buf, COLOR_SCHEME_LEN);
}

/// Monitor fields before velocity is attached
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSample {
    /// Tick counter rebuilt from its two halves
    pub ticks: u32,
    /// Spike-filtered position A
    pub position_a: f32,
    /// Spike-filtered position B
    pub position_b: f32,
    /// Load A in kg
    pub load_a: f32,
    /// Load B in kg
    pub load_b: f32,
}

/// Monitor frame decoder with per-cable spike memory
///
/// Monitor layout (u16 LE words): 0 ticks low, 1 ticks high, 2 position A,
/// 4 load A, 5 position B, 7 load B. Loads are kg x 100.
#[derive(Debug, Clone, Default)]
pub struct MonitorDecoder {
    last_position_a: f32,
    last_position_b: f32,
}

impl MonitorDecoder {
    /// Decoder with zeroed position memory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one monitor frame
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::FrameTooShort`] for frames under 16 bytes; the
    /// spike memory is left untouched.
    pub fn decode(&mut self, data: &[u8]) -> Result<MonitorSample> {
        if data.len() < MONITOR_FRAME_MIN_LEN {
            return Err(TrainerError::FrameTooShort {
                kind: FrameKind::Monitor,
                len: data.len(),
                min: MONITOR_FRAME_MIN_LEN,
            });
        }

        let mut buf = data;
        let ticks_low = buf.get_u16_le();
        let ticks_high = buf.get_u16_le();
        let raw_position_a = buf.get_u16_le();
        buf.advance(2);
        let raw_load_a = buf.get_u16_le();
        let raw_position_b = buf.get_u16_le();
        buf.advance(2);
        let raw_load_b = buf.get_u16_le();

        let position_a = Self::filter(raw_position_a, &mut self.last_position_a);
        let position_b = Self::filter(raw_position_b, &mut self.last_position_b);

        Ok(MonitorSample {
            ticks: u32::from(ticks_low) | (u32::from(ticks_high) << 16),
            position_a,
            position_b,
            load_a: f32::from(raw_load_a) / 100.0,
            load_b: f32::from(raw_load_b) / 100.0,
        })
    }

    fn filter(raw: u16, last_accepted: &mut f32) -> f32 {
        if raw > POSITION_SPIKE_THRESHOLD {
            *last_accepted
        } else {
            *last_accepted = f32::from(raw);
            *last_accepted
        }
    }
}

/// Decode a rep notification: top counter at byte 0, completion counter at
/// byte 4, both u16 LE.
///
/// # Errors
///
/// Returns [`TrainerError::FrameTooShort`] for frames under 6 bytes.
pub fn decode_rep_notification(data: &[u8]) -> Result<RepNotification> {
    if data.len() < REP_FRAME_MIN_LEN {
        return Err(TrainerError::FrameTooShort {
            kind: FrameKind::RepNotification,
            len: data.len(),
            min: REP_FRAME_MIN_LEN,
        });
    }

    let mut buf = data;
    let top_counter = buf.get_u16_le();
    buf.advance(2);
    let complete_counter = buf.get_u16_le();

    Ok(RepNotification {
        top_counter,
        complete_counter,
        raw: data.to_vec(),
        timestamp: SystemTime::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_frame(ticks: u32, pos_a: u16, load_a: u16, pos_b: u16, load_b: u16) -> Vec<u8> {
        let mut buf = BytesMut::new();
        #[allow(clippy::cast_possible_truncation)]
        buf.put_u16_le(ticks as u16);
        buf.put_u16_le((ticks >> 16) as u16);
        buf.put_u16_le(pos_a);
        buf.put_u16_le(0);
        buf.put_u16_le(load_a);
        buf.put_u16_le(pos_b);
        buf.put_u16_le(0);
        buf.put_u16_le(load_b);
        buf.to_vec()
    }

    #[test]
    fn test_frame_lengths() {
        let params = WorkoutParameters::default();
        let echo = WorkoutParameters {
            workout_type: WorkoutType::Echo {
                level: EchoLevel::Harder,
                eccentric_load_percent: 120,
            },
            ..Default::default()
        };

        assert_eq!(Command::Init.to_bytes().len(), 4);
        assert_eq!(Command::InitPreset.to_bytes().len(), 34);
        assert_eq!(Command::ProgramParams(params).to_bytes().len(), 96);
        assert_eq!(Command::EchoControl(echo).to_bytes().len(), 40);
        assert_eq!(Command::color_scheme(&COLOR_SCHEMES[0]).to_bytes().len(), 44);
    }

    #[test]
    fn test_init_and_stop_frames() {
        assert_eq!(&Command::Init.to_bytes()[..], &[0x0A, 0, 0, 0]);
        assert_eq!(Command::stop(), Command::Init);
        assert_eq!(Command::InitPreset.to_bytes()[0], CommandId::ColorScheme as u8);
    }

    #[test]
    fn test_program_frame_fields() {
        let params = WorkoutParameters {
            workout_type: WorkoutType::Program(ProgramMode::TimeUnderTension),
            target_reps: 8,
            weight_per_cable_kg: 22.5,
            progression_per_rep_kg: -0.5,
            is_just_lift: false,
            stop_at_top: true,
            warmup_target: 3,
        };
        let bytes = Command::workout(&params).to_bytes();

        assert_eq!(bytes[0], CommandId::ProgramParams as u8);
        assert_eq!(bytes[4], 8);
        assert_eq!(bytes[5], 3);
        assert_eq!(bytes[6], 3);
        assert_eq!(bytes[7], 0b10);
        assert_eq!(&bytes[8..12], &2250u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &(-50i32).to_le_bytes());
        assert_eq!(&bytes[0x30..0x34], &250.0f32.to_le_bytes());
    }

    #[test]
    fn test_just_lift_reps_marker() {
        let params = WorkoutParameters::just_lift(15.0);
        let bytes = Command::workout(&params).to_bytes();
        assert_eq!(bytes[4], JUST_LIFT_REPS);
        assert_eq!(bytes[7] & 0x01, 0x01);
    }

    #[test]
    fn test_echo_frame_is_exclusive() {
        let params = WorkoutParameters {
            workout_type: WorkoutType::Echo {
                level: EchoLevel::Epic,
                eccentric_load_percent: 130,
            },
            target_reps: 12,
            warmup_target: 2,
            ..Default::default()
        };
        let command = Command::workout(&params);
        assert!(matches!(command, Command::EchoControl(_)));

        let bytes = command.to_bytes();
        assert_eq!(bytes[0], CommandId::EchoControl as u8);
        assert_eq!(bytes[4], 2);
        assert_eq!(bytes[5], 12);
        assert_eq!(bytes[7], 3);
        assert_eq!(&bytes[8..10], &130u16.to_le_bytes());
        assert_eq!(&bytes[12..16], &3.333f32.to_le_bytes());
    }

    #[test]
    fn test_color_scheme_frame() {
        let scheme = color_scheme(4).unwrap();
        let bytes = Command::color_scheme(scheme).to_bytes();

        assert_eq!(bytes[0], CommandId::ColorScheme as u8);
        assert_eq!(&bytes[8..12], &0.4f32.to_le_bytes());
        assert_eq!(&bytes[12..14], &3u16.to_le_bytes());
        assert_eq!(&bytes[14..17], &[0xFF, 0x00, 0x4C]);
        assert!(bytes[23..].iter().all(|b| *b == 0));

        assert!(matches!(
            color_scheme(COLOR_SCHEMES.len()),
            Err(TrainerError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_color_scheme_truncates_colors() {
        let command = Command::ColorScheme {
            brightness: 2.0,
            colors: vec![Rgb(1, 2, 3); 14],
        };
        let bytes = command.to_bytes();
        assert_eq!(bytes.len(), COLOR_SCHEME_LEN);
        assert_eq!(&bytes[8..12], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[12..14], &10u16.to_le_bytes());
    }

    #[test]
    fn test_monitor_decode() {
        let mut decoder = MonitorDecoder::new();
        let frame = monitor_frame(0x0002_0010, 640, 1250, 655, 1310);
        let sample = decoder.decode(&frame).unwrap();

        assert_eq!(sample.ticks, 0x0002_0010);
        assert!((sample.position_a - 640.0).abs() < f32::EPSILON);
        assert!((sample.position_b - 655.0).abs() < f32::EPSILON);
        assert!((sample.load_a - 12.5).abs() < 0.001);
        assert!((sample.load_b - 13.1).abs() < 0.001);
    }

    #[test]
    fn test_monitor_spike_filter() {
        let mut decoder = MonitorDecoder::new();

        let spike = decoder.decode(&monitor_frame(1, 60_000, 0, 60_000, 0)).unwrap();
        assert!(spike.position_a.abs() < f32::EPSILON);
        assert!(spike.position_b.abs() < f32::EPSILON);

        let good = decoder.decode(&monitor_frame(2, 1200, 0, 1100, 0)).unwrap();
        assert!((good.position_a - 1200.0).abs() < f32::EPSILON);

        let spike = decoder.decode(&monitor_frame(3, 65_535, 0, 900, 0)).unwrap();
        assert!((spike.position_a - 1200.0).abs() < f32::EPSILON);
        assert!((spike.position_b - 900.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_short_frames_rejected() {
        let mut decoder = MonitorDecoder::new();
        decoder.decode(&monitor_frame(1, 500, 0, 500, 0)).unwrap();

        let err = decoder.decode(&[0u8; 10]).unwrap_err();
        assert!(matches!(
            err,
            TrainerError::FrameTooShort { kind: FrameKind::Monitor, len: 10, min: 16 }
        ));

        let err = decode_rep_notification(&[0u8; 4]).unwrap_err();
        assert!(matches!(
            err,
            TrainerError::FrameTooShort { kind: FrameKind::RepNotification, len: 4, min: 6 }
        ));

        // memory survives rejected frames
        let sample = decoder.decode(&monitor_frame(2, 60_001, 0, 500, 0)).unwrap();
        assert!((sample.position_a - 500.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_rep_notification_decode() {
        let data = [0x05, 0x00, 0xAA, 0xBB, 0xFF, 0xFF, 0x01];
        let notification = decode_rep_notification(&data).unwrap();

        assert_eq!(notification.top_counter, 5);
        assert_eq!(notification.complete_counter, 0xFFFF);
        assert_eq!(notification.raw, data.to_vec());
    }
}
