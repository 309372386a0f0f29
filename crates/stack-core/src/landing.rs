//! Landing detection for the falling block.

use serde::{Deserialize, Serialize};

use crate::block::{BlockId, BlockManager, LifecycleState};
use crate::physics::{PhysicsWorld, secs_to_frames};

/// Landing detector configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LandingConfig {
    /// Vertical speed below which a touching block counts as landed.
    #[serde(default = "default_at_rest_threshold")]
    pub at_rest_threshold: f32,
    /// Time after which a falling block is settled regardless of contacts.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f32,
    /// Whether a timeout-forced settlement still earns points.
    #[serde(default)]
    pub credit_on_timeout: bool,
}

fn default_at_rest_threshold() -> f32 {
    0.05
}

fn default_timeout_secs() -> f32 {
    5.0
}

impl Default for LandingConfig {
    fn default() -> Self {
        Self {
            at_rest_threshold: default_at_rest_threshold(),
            timeout_secs: default_timeout_secs(),
            credit_on_timeout: false,
        }
    }
}

/// Outcome of one landing poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandingStatus {
    Pending,
    Landed,
    /// The timeout elapsed before a resting contact was seen.
    LandedForced,
    /// The watched block no longer exists.
    Aborted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
struct Watch {
    block: BlockId,
    elapsed_frames: u32,
}

/// Watches one falling block per drop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandingDetector {
    config: LandingConfig,
    timeout_frames: u32,
    watch: Option<Watch>,
}

impl LandingDetector {
    pub fn new(config: LandingConfig) -> Self {
        Self {
            config,
            timeout_frames: secs_to_frames(config.timeout_secs),
            watch: None,
        }
    }

    pub fn config(&self) -> &LandingConfig {
        &self.config
    }

    /// Starts watching `block`, replacing any previous watch.
    pub fn watch(&mut self, block: BlockId) {
        self.watch = Some(Watch {
            block,
            elapsed_frames: 0,
        });
    }

    pub fn clear(&mut self) {
        self.watch = None;
    }

    pub fn watched(&self) -> Option<BlockId> {
        self.watch.map(|w| w.block)
    }

    /// Seconds the watched block has been falling.
    #[allow(clippy::cast_precision_loss)]
    pub fn elapsed_secs(&self) -> f32 {
        self.watch
            .map_or(0.0, |w| w.elapsed_frames as f32 * crate::physics::PHYSICS_DT)
    }

    /// Checks the watched block against the current step's physics state.
    pub fn poll(&mut self, world: &PhysicsWorld, blocks: &BlockManager) -> LandingStatus {
        let Some(watch) = self.watch.as_mut() else {
            return LandingStatus::Pending;
        };

        let Some(block) = blocks.get_block(watch.block) else {
            tracing::warn!("[landing] Block {} vanished while falling", watch.block);
            self.watch = None;
            return LandingStatus::Aborted;
        };
        let Some(body) = world.get_rigid_body(block.body_handle) else {
            tracing::warn!("[landing] Body of block {} was destroyed while falling", watch.block);
            self.watch = None;
            return LandingStatus::Aborted;
        };
        if block.state != LifecycleState::Falling {
            tracing::warn!("[landing] Block {} is {:?}, dropping watch", watch.block, block.state);
            self.watch = None;
            return LandingStatus::Aborted;
        }

        let vertical_speed = body.linvel().y.abs();
        if block.touched && vertical_speed < self.config.at_rest_threshold {
            tracing::debug!(
                "[landing] Block {} landed after {} frames",
                watch.block,
                watch.elapsed_frames
            );
            self.watch = None;
            return LandingStatus::Landed;
        }

        watch.elapsed_frames += 1;
        if watch.elapsed_frames >= self.timeout_frames {
            tracing::warn!(
                "[landing] Block {} timed out after {:.2}s, forcing landing",
                watch.block,
                self.config.timeout_secs
            );
            self.watch = None;
            return LandingStatus::LandedForced;
        }

        LandingStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{add_ground, unit_variant};
    use rapier2d::prelude::Vector;

    fn dropped_block(world: &mut PhysicsWorld, manager: &mut BlockManager, y: f32) -> BlockId {
        let id = manager.spawn(world, unit_variant(), 0.0, y).unwrap();
        manager.request_drop(world, id).unwrap();
        id
    }

    fn step_and_poll(
        world: &mut PhysicsWorld,
        manager: &mut BlockManager,
        detector: &mut LandingDetector,
    ) -> LandingStatus {
        let events = world.step_with_events();
        manager.route_contacts(world, &events);
        detector.poll(world, manager)
    }

    #[test]
    fn test_block_lands_on_ground() {
        let mut world = PhysicsWorld::new();
        add_ground(&mut world);
        let mut manager = BlockManager::default();
        let mut detector = LandingDetector::new(LandingConfig::default());

        let id = dropped_block(&mut world, &mut manager, 3.0);
        detector.watch(id);

        let mut status = LandingStatus::Pending;
        for _ in 0..299 {
            status = step_and_poll(&mut world, &mut manager, &mut detector);
            if status != LandingStatus::Pending {
                break;
            }
        }

        assert_eq!(status, LandingStatus::Landed);
        assert!(detector.watched().is_none());
    }

    #[test]
    fn test_block_resting_before_drop_lands() {
        let mut world = PhysicsWorld::new();
        add_ground(&mut world);
        let mut manager = BlockManager::default();
        let mut detector = LandingDetector::new(LandingConfig::default());

        // Spawned flush on the ground: the contact begins before the drop.
        let id = manager.spawn(&mut world, unit_variant(), 0.0, 0.5).unwrap();
        for _ in 0..5 {
            let events = world.step_with_events();
            manager.route_contacts(&world, &events);
        }
        manager.request_drop(&mut world, id).unwrap();
        assert!(manager.get_block(id).unwrap().touched);
        detector.watch(id);

        let status = (0..30)
            .map(|_| step_and_poll(&mut world, &mut manager, &mut detector))
            .find(|s| *s != LandingStatus::Pending);
        assert_eq!(status, Some(LandingStatus::Landed));
    }

    #[test]
    fn test_no_landing_without_contact() {
        let mut world = PhysicsWorld::with_gravity(Vector::new(0.0, 0.0));
        let mut manager = BlockManager::default();
        let mut detector = LandingDetector::new(LandingConfig::default());

        // At rest in mid-air, but nothing was touched.
        let id = dropped_block(&mut world, &mut manager, 3.0);
        detector.watch(id);

        for _ in 0..60 {
            assert_eq!(
                step_and_poll(&mut world, &mut manager, &mut detector),
                LandingStatus::Pending
            );
        }
    }

    #[test]
    fn test_timeout_forces_landing() {
        let mut world = PhysicsWorld::with_gravity(Vector::new(0.0, 0.0));
        let mut manager = BlockManager::default();
        let mut detector = LandingDetector::new(LandingConfig::default());

        let id = dropped_block(&mut world, &mut manager, 3.0);
        let handle = manager.get_block(id).unwrap().body_handle;
        world
            .get_rigid_body_mut(handle)
            .unwrap()
            .set_linvel(Vector::new(0.0, -2.0), true);
        detector.watch(id);

        for frame in 1..300 {
            let status = step_and_poll(&mut world, &mut manager, &mut detector);
            assert_eq!(status, LandingStatus::Pending, "frame {frame}");
        }
        assert_eq!(
            step_and_poll(&mut world, &mut manager, &mut detector),
            LandingStatus::LandedForced
        );
    }

    #[test]
    fn test_destroyed_block_aborts() {
        let mut world = PhysicsWorld::new();
        let mut manager = BlockManager::default();
        let mut detector = LandingDetector::new(LandingConfig::default());

        let id = dropped_block(&mut world, &mut manager, 3.0);
        detector.watch(id);
        assert_eq!(
            step_and_poll(&mut world, &mut manager, &mut detector),
            LandingStatus::Pending
        );

        let handle = manager.get_block(id).unwrap().body_handle;
        world.remove_rigid_body(handle);

        assert_eq!(
            step_and_poll(&mut world, &mut manager, &mut detector),
            LandingStatus::Aborted
        );
        assert_eq!(detector.poll(&world, &manager), LandingStatus::Pending);
    }

    #[test]
    fn test_idle_detector_is_pending() {
        let world = PhysicsWorld::new();
        let manager = BlockManager::default();
        let mut detector = LandingDetector::new(LandingConfig::default());
        assert_eq!(detector.poll(&world, &manager), LandingStatus::Pending);
        assert_eq!(detector.elapsed_secs(), 0.0);
    }
}
