//! Tower stability monitor.
//!
//! Periodically measures how far settled blocks have drifted sideways from
//! their centroid and raises a single alert when the tower looks unstable.
//! Height does not count as drift. The monitor never touches the physics
//! world.

use serde::{Deserialize, Serialize};

use crate::block::{BlockManager, LifecycleState};
use crate::physics::{PhysicsWorld, secs_to_frames};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub check_interval_secs: f32,
    /// Fewer settled blocks than this never raise an alert.
    pub min_blocks: usize,
    /// Largest allowed horizontal distance of a block from the centroid.
    pub max_spread: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 0.5,
            min_blocks: 5,
            max_spread: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityAlert {
    pub spread: f32,
    pub settled: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityMonitor {
    config: MonitorConfig,
    interval_frames: u32,
    frames_until_check: u32,
    alerted: bool,
    last_spread: Option<f32>,
}

impl StabilityMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let interval_frames = secs_to_frames(config.check_interval_secs).max(1);
        Self {
            config,
            interval_frames,
            frames_until_check: interval_frames,
            alerted: false,
            last_spread: None,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Spread measured at the last check with enough blocks.
    pub fn last_spread(&self) -> Option<f32> {
        self.last_spread
    }

    pub fn is_alerted(&self) -> bool {
        self.alerted
    }

    /// Clears the alert latch, e.g. after a rescue.
    pub fn reset(&mut self) {
        self.alerted = false;
        self.frames_until_check = self.interval_frames;
    }

    /// Advances one frame and runs a check when the interval elapses.
    pub fn tick(&mut self, world: &PhysicsWorld, blocks: &BlockManager) -> Option<StabilityAlert> {
        self.frames_until_check = self.frames_until_check.saturating_sub(1);
        if self.frames_until_check > 0 {
            return None;
        }
        self.frames_until_check = self.interval_frames;
        self.check(world, blocks)
    }

    /// Measures the tower immediately.
    pub fn check(&mut self, world: &PhysicsWorld, blocks: &BlockManager) -> Option<StabilityAlert> {
        let positions: Vec<(f32, f32)> = blocks
            .blocks()
            .iter()
            .filter(|b| b.state == LifecycleState::Settled)
            .filter_map(|b| blocks.get_block_position(world, b.id))
            .collect();

        if positions.len() < self.config.min_blocks || positions.is_empty() {
            return None;
        }

        let spread = horizontal_spread(&positions);
        self.last_spread = Some(spread);

        if spread > self.config.max_spread && !self.alerted {
            self.alerted = true;
            tracing::warn!(
                "[monitor] Tower unstable: spread {:.2} over {} blocks",
                spread,
                positions.len()
            );
            return Some(StabilityAlert {
                spread,
                settled: positions.len(),
            });
        }
        if spread <= self.config.max_spread / 2.0 && self.alerted {
            tracing::info!("[monitor] Tower stable again (spread {:.2})", spread);
            self.alerted = false;
        }
        None
    }
}

#[allow(clippy::cast_precision_loss)]
fn horizontal_spread(positions: &[(f32, f32)]) -> f32 {
    let cx = positions.iter().map(|(x, _)| x).sum::<f32>() / positions.len() as f32;
    positions
        .iter()
        .map(|(x, _)| (x - cx).abs())
        .fold(0.0, f32::max)
}
