//! Adaptive 2-down-1-up staircase
//!
//! Converts a stream of correct/incorrect trial outcomes into a converged
//! threshold estimate. Two consecutive correct outcomes lower the level by
//! the current step; a single incorrect outcome raises it and resets the
//! streak. A reversal is recorded whenever the movement direction differs
//! from the previous movement's direction; the very first movement never
//! counts (there is no prior direction to differ from). The step size
//! depends only on how many reversals have occurred: large before the
//! first, medium after one, small after two or more.

use crate::config::StaircaseParams;

/// Direction of the last level movement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Down,
    Up,
}

/// Per-frequency staircase state. One instance per frequency, discarded
/// on convergence or cancellation.
#[derive(Debug, Clone)]
pub struct Staircase {
    params: StaircaseParams,
    level_db: f64,
    step_db: f64,
    reversals: Vec<f64>,
    last_direction: Option<Direction>,
    correct_streak: u32,
}

impl Staircase {
    pub fn new(params: StaircaseParams) -> Self {
        Self {
            params,
            level_db: params.start_db,
            step_db: params.step_large_db,
            reversals: Vec::new(),
            last_direction: None,
            correct_streak: 0,
        }
    }

    /// Level to use for the next trial's stimulus, always within bounds
    pub fn current_level(&self) -> f64 {
        self.level_db
    }

    /// Step size the next movement will use
    pub fn step_db(&self) -> f64 {
        self.step_db
    }

    pub fn reversal_count(&self) -> usize {
        self.reversals.len()
    }

    /// Consume one trial outcome and advance the state.
    ///
    /// Order matters: the level moves first, then the reversal is
    /// detected (at the pre-clamp level), then the step phase is
    /// recomputed so the trial immediately following a reversal already
    /// uses the new step, and finally the level is clamped to bounds.
    pub fn update(&mut self, correct: bool) {
        let new_direction = if correct {
            self.correct_streak += 1;
            if self.correct_streak >= 2 {
                self.correct_streak = 0;
                self.level_db -= self.step_db;
                Some(Direction::Down)
            } else {
                self.last_direction
            }
        } else {
            self.correct_streak = 0;
            self.level_db += self.step_db;
            Some(Direction::Up)
        };

        if let (Some(prev), Some(next)) = (self.last_direction, new_direction) {
            if prev != next {
                self.reversals.push(self.level_db);
            }
        }

        self.last_direction = new_direction;
        self.step_db = self.phase_step();
        self.level_db = self.level_db.clamp(self.params.min_db, self.params.max_db);
    }

    /// Whether the stopping rule has been reached
    pub fn done(&self) -> bool {
        self.reversals.len() >= self.params.stop_reversals
    }

    /// Converged estimate: mean of the last `avg_reversals` reversal
    /// levels, or of all reversals if fewer exist, or the current level
    /// if none do.
    pub fn threshold(&self) -> f64 {
        if self.reversals.is_empty() {
            return self.level_db;
        }
        let tail_len = self.reversals.len().min(self.params.avg_reversals);
        let tail = &self.reversals[self.reversals.len() - tail_len..];
        tail.iter().sum::<f64>() / tail.len() as f64
    }

    fn phase_step(&self) -> f64 {
        match self.reversals.len() {
            0 => self.params.step_large_db,
            1 => self.params.step_medium_db,
            _ => self.params.step_small_db,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn staircase() -> Staircase {
        Staircase::new(StaircaseParams::default())
    }

    #[test]
    fn test_starts_at_configured_level_with_large_step() {
        let sc = staircase();
        assert_eq!(sc.current_level(), -45.0);
        assert_eq!(sc.step_db(), 6.0);
        assert!(!sc.done());
    }

    #[test]
    fn test_single_correct_does_not_move() {
        let mut sc = staircase();
        sc.update(true);
        assert_eq!(sc.current_level(), -45.0);
    }

    #[test]
    fn test_two_consecutive_correct_move_down_once() {
        let mut sc = staircase();
        sc.update(true);
        sc.update(true);
        assert_eq!(sc.current_level(), -51.0);
        // streak was consumed; two more corrects are needed for the next drop
        sc.update(true);
        assert_eq!(sc.current_level(), -51.0);
    }

    #[test]
    fn test_single_incorrect_moves_up_and_resets_streak() {
        let mut sc = staircase();
        sc.update(true);
        sc.update(false);
        assert_eq!(sc.current_level(), -39.0);
        // the earlier correct must not count toward the next pair
        sc.update(true);
        assert_eq!(sc.current_level(), -39.0);
        sc.update(true);
        assert_eq!(sc.current_level(), -45.0);
    }

    #[test]
    fn test_first_movement_is_never_a_reversal() {
        let mut sc = staircase();
        sc.update(true);
        sc.update(true); // first movement (down), no prior direction
        assert_eq!(sc.reversal_count(), 0);

        let mut sc = staircase();
        sc.update(false); // first movement (up)
        assert_eq!(sc.reversal_count(), 0);
    }

    #[test]
    fn test_direction_change_records_reversal() {
        let mut sc = staircase();
        sc.update(true);
        sc.update(true); // down to -51
        sc.update(false); // up: reversal at -45
        assert_eq!(sc.reversal_count(), 1);
        assert_eq!(sc.threshold(), -45.0);
    }

    #[test]
    fn test_step_phase_follows_reversal_count() {
        let mut sc = staircase();
        assert_eq!(sc.step_db(), 6.0);
        sc.update(true);
        sc.update(true);
        sc.update(false); // reversal 1
        assert_eq!(sc.step_db(), 3.0);
        sc.update(true);
        sc.update(true); // reversal 2 (up -> down)
        assert_eq!(sc.step_db(), 2.0);
        sc.update(false); // reversal 3, step stays small
        assert_eq!(sc.step_db(), 2.0);
    }

    #[test]
    fn test_level_stays_within_bounds() {
        let mut sc = staircase();
        // walk hard toward the floor
        for _ in 0..60 {
            sc.update(true);
            assert!(sc.current_level() >= -80.0 && sc.current_level() <= -3.0);
        }
        assert_eq!(sc.current_level(), -80.0);

        let mut sc = staircase();
        // walk hard toward the ceiling
        for _ in 0..60 {
            sc.update(false);
            assert!(sc.current_level() >= -80.0 && sc.current_level() <= -3.0);
        }
        assert_eq!(sc.current_level(), -3.0);
    }

    #[test]
    fn test_done_after_stop_reversals() {
        let mut sc = staircase();
        // alternate two-correct / one-incorrect to force a reversal on
        // every movement after the first
        let mut outcomes = Vec::new();
        while !sc.done() {
            outcomes.push(sc.reversal_count());
            sc.update(true);
            sc.update(true);
            sc.update(false);
            assert!(outcomes.len() < 20, "staircase failed to converge");
        }
        assert!(sc.reversal_count() >= 6);
    }

    #[test]
    fn test_threshold_averages_last_four_reversals() {
        let mut sc = staircase();
        // deterministic walk: C C W repeating from -45
        let script = [
            true, true, false, true, true, false, true, true, false, true, true,
        ];
        for &correct in &script {
            sc.update(correct);
        }
        // reversals: -45, -48, -46, -48, -46, -48; mean of last 4 = -47
        assert!(sc.done());
        assert_eq!(sc.reversal_count(), 6);
        assert_abs_diff_eq!(sc.threshold(), -47.0);
    }

    #[test]
    fn test_threshold_with_fewer_reversals_averages_all() {
        let mut sc = staircase();
        sc.update(true);
        sc.update(true); // -51, no reversal
        sc.update(false); // reversal at -45
        sc.update(true);
        sc.update(true); // reversal at -48
        assert_eq!(sc.reversal_count(), 2);
        assert_abs_diff_eq!(sc.threshold(), -46.5);
    }

    #[test]
    fn test_threshold_without_reversals_is_current_level() {
        let mut sc = staircase();
        sc.update(true);
        sc.update(true);
        assert_eq!(sc.threshold(), -51.0);
    }
}
