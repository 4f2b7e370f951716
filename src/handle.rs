use crate::types::HandleState;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Position above which the handles count as lifted
pub const GRABBED_THRESHOLD: f32 = 8.0;

/// Position below which grabbed handles count as put down
pub const REST_THRESHOLD: f32 = 2.5;

/// Speed that confirms a deliberate pull, in position units per second
pub const VELOCITY_THRESHOLD: f32 = 100.0;

/// Next grip state for one sample
///
/// Leaving `Grabbed` only looks at position, so a pause mid-rep does not
/// flicker the state.
#[must_use]
pub fn next_handle_state(position: f32, velocity: f32, current: HandleState) -> HandleState {
    match current {
        HandleState::Released | HandleState::Moving => {
            if position > GRABBED_THRESHOLD && velocity > VELOCITY_THRESHOLD {
                HandleState::Grabbed
            } else if position > GRABBED_THRESHOLD {
                HandleState::Moving
            } else {
                HandleState::Released
            }
        }
        HandleState::Grabbed => {
            if position < REST_THRESHOLD {
                HandleState::Released
            } else {
                HandleState::Grabbed
            }
        }
    }
}

/// Grip detector holding the current state and release dwell
#[derive(Debug, Clone, Default)]
pub struct HandleStateDetector {
    state: HandleState,
    released_since: Option<Instant>,
}

impl HandleStateDetector {
    /// Detector starting from `Released`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> HandleState {
        self.state
    }

    /// Apply one sample taken at `at`; returns the new state when it changed
    pub fn update(&mut self, position: f32, velocity: f32, at: Instant) -> Option<HandleState> {
        let next = next_handle_state(position, velocity, self.state);

        if next == HandleState::Released {
            self.released_since.get_or_insert(at);
        } else {
            self.released_since = None;
        }

        if next == self.state {
            return None;
        }

        debug!(from = %self.state, to = %next, position, velocity, "Handle state changed");
        self.state = next;
        Some(next)
    }

    /// How long the handles have been continuously released as of `now`
    #[must_use]
    pub fn released_for(&self, now: Instant) -> Option<Duration> {
        self.released_since
            .map(|since| now.saturating_duration_since(since))
    }

    /// Back to `Released` with no dwell history
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
