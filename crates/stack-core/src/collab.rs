//! Collaborators the core notifies but does not own.
//!
//! The game is generic over these so tests can inject recording
//! implementations in place of the real score board or time-attack clock.

use serde::{Deserialize, Serialize};

use crate::physics::secs_to_frames;

/// Receives points for landed blocks.
pub trait ScoreAccumulator {
    fn add_score(&mut self, points: u32);

    /// Current score, used as the difficulty signal for variant selection.
    fn score(&self) -> u32;
}

/// Time-limited game mode hooks.
pub trait TimedMode {
    fn is_time_limited_mode_active(&self) -> bool;

    fn on_block_landed(&mut self);

    /// Advances the mode's clock by `frames` fixed steps.
    fn advance(&mut self, _frames: u32) {}

    /// Once true, the scheduler stops spawning for good.
    fn spawning_finished(&self) -> bool {
        false
    }
}

/// Running score total.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreBoard {
    score: u32,
    credited_landings: u32,
}

impl ScoreBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credited_landings(&self) -> u32 {
        self.credited_landings
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl ScoreAccumulator for ScoreBoard {
    fn add_score(&mut self, points: u32) {
        self.score = self.score.saturating_add(points);
        self.credited_landings += 1;
    }

    fn score(&self) -> u32 {
        self.score
    }
}

/// Classic mode: no clock.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NoTimedMode;

impl TimedMode for NoTimedMode {
    fn is_time_limited_mode_active(&self) -> bool {
        false
    }

    fn on_block_landed(&mut self) {}
}

/// Stack as many blocks as possible before the clock runs out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeAttack {
    limit_frames: u32,
    remaining_frames: u32,
    landed: u32,
}

impl TimeAttack {
    pub fn new(time_limit_secs: f32) -> Self {
        let limit_frames = secs_to_frames(time_limit_secs);
        Self {
            limit_frames,
            remaining_frames: limit_frames,
            landed: 0,
        }
    }

    pub fn landed(&self) -> u32 {
        self.landed
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn remaining_secs(&self) -> f32 {
        self.remaining_frames as f32 * crate::physics::PHYSICS_DT
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_frames == 0
    }

    /// Restores the full time limit.
    pub fn restart(&mut self) {
        self.remaining_frames = self.limit_frames;
        self.landed = 0;
    }
}

impl TimedMode for TimeAttack {
    fn is_time_limited_mode_active(&self) -> bool {
        !self.is_expired()
    }

    fn on_block_landed(&mut self) {
        self.landed += 1;
    }

    fn advance(&mut self, frames: u32) {
        if self.is_expired() {
            return;
        }
        self.remaining_frames = self.remaining_frames.saturating_sub(frames);
        if self.is_expired() {
            tracing::info!("[time_attack] Time up with {} blocks landed", self.landed);
        }
    }

    fn spawning_finished(&self) -> bool {
        self.is_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_board_accumulates() {
        let mut board = ScoreBoard::new();
        board.add_score(2);
        board.add_score(3);
        assert_eq!(board.score(), 5);
        assert_eq!(board.credited_landings(), 2);

        board.reset();
        assert_eq!(board.score(), 0);
    }

    #[test]
    fn test_time_attack_expires() {
        let mut mode = TimeAttack::new(1.0);
        assert!(mode.is_time_limited_mode_active());
        assert!(!mode.spawning_finished());

        mode.on_block_landed();
        mode.advance(59);
        assert!(!mode.is_expired());

        mode.advance(1);
        assert!(mode.is_expired());
        assert!(mode.spawning_finished());
        assert!(!mode.is_time_limited_mode_active());
        assert_eq!(mode.landed(), 1);

        mode.restart();
        assert!((mode.remaining_secs() - 1.0).abs() < 1e-4);
        assert_eq!(mode.landed(), 0);
    }

    #[test]
    fn test_classic_mode_is_inert() {
        let mut mode = NoTimedMode;
        mode.advance(1000);
        mode.on_block_landed();
        assert!(!mode.is_time_limited_mode_active());
        assert!(!mode.spawning_finished());
    }
}
