use crate::types::{RepCount, RepNotification, WorkoutParameters, MAX_WEIGHT_PER_CABLE_KG};
use tracing::debug;

/// Distance between two readings of a 16-bit wrapping counter
///
/// `current - previous` when `current >= previous`, otherwise the distance
/// through the wrap point. Never negative.
#[must_use]
pub const fn wrap_delta(previous: u16, current: u16) -> u16 {
    current.wrapping_sub(previous)
}

/// Rep counter settings, fixed for one set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepCounterConfig {
    /// Reps counted as warmup
    pub warmup_target: u32,
    /// Working reps that complete the set
    pub working_target: u32,
    /// Open-ended set
    pub is_just_lift: bool,
    /// Finish at the top of the final rep
    pub stop_at_top: bool,
    /// Weight of the first working rep
    pub base_weight_kg: f32,
    /// Added per completed working rep
    pub progression_per_rep_kg: f32,
}

impl Default for RepCounterConfig {
    fn default() -> Self {
        Self::from(&WorkoutParameters::default())
    }
}

impl From<&WorkoutParameters> for RepCounterConfig {
    fn from(params: &WorkoutParameters) -> Self {
        Self {
            warmup_target: u32::from(params.warmup_target),
            working_target: u32::from(params.target_reps),
            is_just_lift: params.is_just_lift,
            stop_at_top: params.stop_at_top,
            base_weight_kg: params.weight_per_cable_kg,
            progression_per_rep_kg: params.progression_per_rep_kg,
        }
    }
}

/// A rep boundary crossed by one notification
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RepEvent {
    /// Warmup rep `rep` (1-based) done
    Warmup {
        /// Warmup reps so far
        rep: u32,
    },
    /// Working rep `rep` (1-based) done
    Working {
        /// Working reps so far
        rep: u32,
        /// Weight for the next working rep
        next_target_weight_kg: f32,
    },
}

/// What one notification changed
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RepUpdate {
    /// Completed rep, if any
    pub rep: Option<RepEvent>,
    /// Top-of-range counter moved
    pub top_reached: bool,
}

/// Counts reps from the trainer's wrapping rep counters
///
/// The first notification after [`RepCounter::configure`] only anchors the
/// counters. The trainer reports its current counter values on the first
/// read, which must not count as a rep.
#[derive(Debug, Clone)]
pub struct RepCounter {
    config: RepCounterConfig,
    count: RepCount,
    last_top: Option<u16>,
    last_complete: Option<u16>,
    target_weight_kg: f32,
    top_reached_on_final: bool,
}

impl Default for RepCounter {
    fn default() -> Self {
        Self::new(RepCounterConfig::default())
    }
}

impl RepCounter {
    /// Counter for a fresh set
    #[must_use]
    pub fn new(config: RepCounterConfig) -> Self {
        Self {
            config,
            count: RepCount {
                is_warmup_complete: config.warmup_target == 0,
                ..RepCount::default()
            },
            last_top: None,
            last_complete: None,
            target_weight_kg: config.base_weight_kg,
            top_reached_on_final: false,
        }
    }

    /// Reset every counter and apply a new configuration
    pub fn configure(&mut self, config: RepCounterConfig) {
        *self = Self::new(config);
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &RepCounterConfig {
        &self.config
    }

    /// Current tally
    #[must_use]
    pub const fn count(&self) -> RepCount {
        self.count
    }

    /// Weight the next working rep should use
    #[must_use]
    pub const fn target_weight_kg(&self) -> f32 {
        self.target_weight_kg
    }

    /// Feed one rep notification
    pub fn process(&mut self, notification: &RepNotification) -> RepUpdate {
        let (Some(last_top), Some(last_complete)) = (self.last_top, self.last_complete) else {
            debug!(
                top = notification.top_counter,
                complete = notification.complete_counter,
                "Anchoring rep counters"
            );
            self.last_top = Some(notification.top_counter);
            self.last_complete = Some(notification.complete_counter);
            return RepUpdate::default();
        };

        self.last_top = Some(notification.top_counter);
        self.last_complete = Some(notification.complete_counter);

        let top_reached = wrap_delta(last_top, notification.top_counter) > 0;
        if top_reached {
            self.on_top_reached();
        }

        // One notification per rep; larger deltas still count once.
        let rep = (wrap_delta(last_complete, notification.complete_counter) > 0)
            .then(|| self.record_rep());

        RepUpdate { rep, top_reached }
    }

    /// Signal that the handles reached the top of their range
    pub fn on_top_reached(&mut self) {
        if self.config.stop_at_top
            && !self.config.is_just_lift
            && self.config.working_target > 0
            && self.count.is_warmup_complete
            && self.count.working_reps + 1 == self.config.working_target
        {
            debug!("Top reached on final rep");
            self.top_reached_on_final = true;
        }
    }

    /// Whether the set may end now at the top of the final rep
    #[must_use]
    pub const fn should_stop_at_top(&self) -> bool {
        self.top_reached_on_final
    }

    /// Count the final working rep at its top instead of waiting for the
    /// completion counter. No-op unless [`Self::should_stop_at_top`] holds.
    pub fn credit_final_rep(&mut self) -> Option<RepEvent> {
        if !self.should_stop_at_top() {
            return None;
        }
        self.top_reached_on_final = false;
        if !self.count.is_warmup_complete {
            return None;
        }
        Some(self.record_rep())
    }

    /// Whether the working target is reached; Just-Lift never completes
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        !self.config.is_just_lift && self.count.working_reps >= self.config.working_target
    }

    /// Weight for working rep `rep` (1-based)
    #[must_use]
    pub fn weight_for_working_rep(&self, rep: u32) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let steps = rep.saturating_sub(1) as f32;
        (self.config.base_weight_kg + steps * self.config.progression_per_rep_kg)
            .clamp(0.0, MAX_WEIGHT_PER_CABLE_KG)
    }

    fn record_rep(&mut self) -> RepEvent {
        if self.count.total() < self.config.warmup_target {
            self.count.warmup_reps += 1;
            self.count.is_warmup_complete = self.count.warmup_reps >= self.config.warmup_target;
            debug!(rep = self.count.warmup_reps, "Warmup rep");
            RepEvent::Warmup {
                rep: self.count.warmup_reps,
            }
        } else {
            self.count.is_warmup_complete = true;
            self.count.working_reps += 1;
            self.top_reached_on_final = false;
            self.target_weight_kg = self.weight_for_working_rep(self.count.working_reps + 1);
            debug!(
                rep = self.count.working_reps,
                next_weight = self.target_weight_kg,
                "Working rep"
            );
            RepEvent::Working {
                rep: self.count.working_reps,
                next_target_weight_kg: self.target_weight_kg,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn notification(top: u16, complete: u16) -> RepNotification {
        RepNotification {
            top_counter: top,
            complete_counter: complete,
            raw: Vec::new(),
            timestamp: SystemTime::now(),
        }
    }

    fn counter(warmup: u32, working: u32) -> RepCounter {
        let mut counter = RepCounter::default();
        counter.configure(RepCounterConfig {
            warmup_target: warmup,
            working_target: working,
            is_just_lift: false,
            stop_at_top: false,
            base_weight_kg: 10.0,
            progression_per_rep_kg: 0.0,
        });
        counter
    }

    #[test]
    fn test_wrap_delta_across_boundary() {
        assert_eq!(wrap_delta(65_535, 0), 1);
        assert_eq!(wrap_delta(10, 15), 5);
        assert_eq!(wrap_delta(65_530, 4), 10);
        assert_eq!(wrap_delta(7, 7), 0);

        let mut previous = 65_500u16;
        for _ in 0..100 {
            let current = previous.wrapping_add(1);
            assert_eq!(wrap_delta(previous, current), 1, "at {previous}");
            previous = current;
        }
    }

    #[test]
    fn test_first_notification_only_anchors() {
        let mut counter = counter(3, 10);
        let update = counter.process(&notification(40, 812));
        assert_eq!(update, RepUpdate::default());
        assert_eq!(counter.count().total(), 0);

        let update = counter.process(&notification(41, 813));
        assert!(update.top_reached);
        assert_eq!(update.rep, Some(RepEvent::Warmup { rep: 1 }));
    }

    #[test]
    fn test_warmup_then_working_classification() {
        let mut counter = counter(3, 10);
        counter.process(&notification(0, 100));

        for i in 1..=3 {
            counter.process(&notification(i, 100 + i));
        }
        let count = counter.count();
        assert_eq!(count.warmup_reps, 3);
        assert_eq!(count.working_reps, 0);
        assert!(count.is_warmup_complete);
        assert!(!counter.is_complete());

        for i in 4..=13 {
            counter.process(&notification(i, 100 + i));
        }
        assert_eq!(counter.count().working_reps, 10);
        assert_eq!(counter.count().warmup_reps, 3);
        assert!(counter.is_complete());
    }

    #[test]
    fn test_counting_across_wraparound() {
        let mut counter = counter(0, 5);
        counter.process(&notification(65_534, 65_533));

        for step in 1..=5u16 {
            let value = 65_533u16.wrapping_add(step);
            counter.process(&notification(value, value));
        }
        assert_eq!(counter.count().working_reps, 5);
        assert!(counter.is_complete());
    }

    #[test]
    fn test_repeated_value_is_not_a_rep() {
        let mut counter = counter(0, 5);
        counter.process(&notification(1, 1));
        let update = counter.process(&notification(1, 1));
        assert_eq!(update.rep, None);
        assert!(!update.top_reached);
    }

    #[test]
    fn test_just_lift_never_completes() {
        let mut counter = RepCounter::default();
        counter.configure(RepCounterConfig {
            warmup_target: 0,
            working_target: 0,
            is_just_lift: true,
            stop_at_top: false,
            base_weight_kg: 20.0,
            progression_per_rep_kg: 0.0,
        });
        counter.process(&notification(0, 0));

        for i in 1..=200u16 {
            counter.process(&notification(i, i));
            assert!(!counter.is_complete());
        }
        assert_eq!(counter.count().working_reps, 200);
    }

    #[test]
    fn test_progression_sequence() {
        let mut counter = RepCounter::default();
        counter.configure(RepCounterConfig {
            warmup_target: 0,
            working_target: 5,
            is_just_lift: false,
            stop_at_top: false,
            base_weight_kg: 10.0,
            progression_per_rep_kg: 2.0,
        });
        counter.process(&notification(0, 0));

        let mut weights = Vec::new();
        for i in 1..=5u16 {
            weights.push(counter.target_weight_kg());
            counter.process(&notification(i, i));
        }
        assert_eq!(weights, vec![10.0, 12.0, 14.0, 16.0, 18.0]);
    }

    #[test]
    fn test_progression_ignores_warmup_reps() {
        let mut counter = RepCounter::default();
        counter.configure(RepCounterConfig {
            warmup_target: 2,
            working_target: 5,
            is_just_lift: false,
            stop_at_top: false,
            base_weight_kg: 10.0,
            progression_per_rep_kg: 1.0,
        });
        counter.process(&notification(0, 0));
        counter.process(&notification(1, 1));
        counter.process(&notification(2, 2));
        assert!((counter.target_weight_kg() - 10.0).abs() < f32::EPSILON);

        let update = counter.process(&notification(3, 3));
        assert_eq!(
            update.rep,
            Some(RepEvent::Working {
                rep: 1,
                next_target_weight_kg: 11.0
            })
        );
    }

    #[test]
    fn test_stop_at_top_on_final_rep() {
        let mut counter = RepCounter::default();
        counter.configure(RepCounterConfig {
            warmup_target: 0,
            working_target: 3,
            is_just_lift: false,
            stop_at_top: true,
            base_weight_kg: 10.0,
            progression_per_rep_kg: 0.0,
        });
        counter.process(&notification(0, 0));

        // top of rep 1 and 2: not final
        counter.process(&notification(1, 0));
        assert!(!counter.should_stop_at_top());
        counter.process(&notification(1, 1));
        counter.process(&notification(2, 1));
        assert!(!counter.should_stop_at_top());
        counter.process(&notification(2, 2));

        let update = counter.process(&notification(3, 2));
        assert!(update.top_reached);
        assert!(counter.should_stop_at_top());
        assert!(!counter.is_complete());

        assert_eq!(
            counter.credit_final_rep(),
            Some(RepEvent::Working {
                rep: 3,
                next_target_weight_kg: 10.0
            })
        );
        assert!(counter.is_complete());
        assert!(!counter.should_stop_at_top());
        assert_eq!(counter.credit_final_rep(), None);
    }

    #[test]
    fn test_stop_at_top_waits_for_warmup() {
        let mut counter = RepCounter::default();
        counter.configure(RepCounterConfig {
            warmup_target: 2,
            working_target: 1,
            is_just_lift: false,
            stop_at_top: true,
            base_weight_kg: 10.0,
            progression_per_rep_kg: 0.0,
        });
        counter.process(&notification(0, 0));

        // tops of both warmup reps
        counter.process(&notification(1, 0));
        assert!(!counter.should_stop_at_top());
        assert_eq!(counter.credit_final_rep(), None);
        counter.process(&notification(1, 1));
        counter.process(&notification(2, 1));
        assert!(!counter.should_stop_at_top());
        counter.process(&notification(2, 2));
        assert!(counter.count().is_warmup_complete);
        assert_eq!(counter.count().working_reps, 0);

        counter.process(&notification(3, 2));
        assert!(counter.should_stop_at_top());
        assert_eq!(
            counter.credit_final_rep(),
            Some(RepEvent::Working {
                rep: 1,
                next_target_weight_kg: 10.0
            })
        );
        assert_eq!(counter.count().warmup_reps, 2);
        assert!(counter.is_complete());
    }

    #[test]
    fn test_configure_resets() {
        let mut counter = counter(1, 2);
        counter.process(&notification(0, 0));
        counter.process(&notification(1, 1));
        counter.process(&notification(2, 2));
        assert_eq!(counter.count().total(), 2);

        counter.configure(RepCounterConfig::default());
        assert_eq!(counter.count().total(), 0);
        assert_eq!(counter.process(&notification(9, 9)).rep, None);
    }
}
