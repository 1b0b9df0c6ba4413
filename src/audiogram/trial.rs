//! 2AFC trial planning and scoring
//!
//! Each trial presents two intervals in strict sequential order (A always
//! before B, never overlapping). One interval, drawn uniformly and
//! independently per trial, carries the signal at the staircase's current
//! level; the other plays at the quiet sentinel level. The subject's
//! choice is scored by equality against the draw.

use crate::audiogram::Interval;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// One interval's stimulus: when it plays (by position) and how loud
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stimulus {
    pub interval: Interval,
    pub level_db: f64,
}

/// Plan for a single 2AFC presentation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialPlan {
    /// Target frequency in Hz
    pub freq_hz: u32,
    /// Signal level (the staircase's current level)
    pub level_db: f64,
    /// Which interval carries the signal
    pub signal: Interval,
}

impl TrialPlan {
    /// Stimulus schedule in presentation order: interval A first, then
    /// interval B, regardless of which one carries the signal.
    pub fn schedule(&self, quiet_db: f64) -> [Stimulus; 2] {
        let level_for = |interval: Interval| {
            if interval == self.signal {
                self.level_db
            } else {
                quiet_db
            }
        };
        [
            Stimulus {
                interval: Interval::A,
                level_db: level_for(Interval::A),
            },
            Stimulus {
                interval: Interval::B,
                level_db: level_for(Interval::B),
            },
        ]
    }

    /// Score the subject's choice against the signal assignment
    pub fn score(&self, chosen: Interval) -> bool {
        chosen == self.signal
    }
}

/// Generates trial plans with a uniform, independent interval draw
#[derive(Debug)]
pub struct TrialSequencer {
    rng: SmallRng,
}

impl TrialSequencer {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
        }
    }

    /// Deterministic sequencer for tests
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn next_plan(&mut self, freq_hz: u32, level_db: f64) -> TrialPlan {
        let signal = if self.rng.gen_bool(0.5) {
            Interval::A
        } else {
            Interval::B
        };
        TrialPlan {
            freq_hz,
            level_db,
            signal,
        }
    }
}

impl Default for TrialSequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_presents_a_before_b() {
        let plan = TrialPlan {
            freq_hz: 1000,
            level_db: -45.0,
            signal: Interval::B,
        };
        let schedule = plan.schedule(-90.0);
        assert_eq!(schedule[0].interval, Interval::A);
        assert_eq!(schedule[1].interval, Interval::B);
    }

    #[test]
    fn test_exactly_one_interval_carries_the_signal() {
        for signal in [Interval::A, Interval::B] {
            let plan = TrialPlan {
                freq_hz: 2000,
                level_db: -30.0,
                signal,
            };
            let schedule = plan.schedule(-90.0);
            let at_signal_level = schedule
                .iter()
                .filter(|s| s.level_db == -30.0)
                .count();
            let at_quiet_level = schedule
                .iter()
                .filter(|s| s.level_db == -90.0)
                .count();
            assert_eq!(at_signal_level, 1);
            assert_eq!(at_quiet_level, 1);
        }
    }

    #[test]
    fn test_scoring_by_equality() {
        let plan = TrialPlan {
            freq_hz: 500,
            level_db: -45.0,
            signal: Interval::A,
        };
        assert!(plan.score(Interval::A));
        assert!(!plan.score(Interval::B));
    }

    #[test]
    fn test_draw_covers_both_intervals() {
        let mut seq = TrialSequencer::with_seed(7);
        let mut saw_a = false;
        let mut saw_b = false;
        for _ in 0..100 {
            match seq.next_plan(1000, -45.0).signal {
                Interval::A => saw_a = true,
                Interval::B => saw_b = true,
            }
        }
        assert!(saw_a && saw_b);
    }

    #[test]
    fn test_seeded_sequencer_is_deterministic() {
        let mut a = TrialSequencer::with_seed(42);
        let mut b = TrialSequencer::with_seed(42);
        for _ in 0..32 {
            assert_eq!(
                a.next_plan(250, -45.0).signal,
                b.next_plan(250, -45.0).signal
            );
        }
    }
}
