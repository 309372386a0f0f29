//! Drop scheduling: spawn, wait for the drop signal, wait for landing, repeat.
//!
//! Every wait is an explicit state checked once per tick, so the scheduler
//! can be serialized mid-drop and resumed on the next frame.

use serde::{Deserialize, Serialize};

use crate::block::{BlockId, BlockManager, LifecycleState, Settlement};
use crate::collab::{ScoreAccumulator, TimedMode};
use crate::landing::{LandingDetector, LandingStatus};
use crate::physics::{PHYSICS_DT, PhysicsWorld, secs_to_frames};
use crate::selector::{SelectError, VariantSelector};

/// Horizontal oscillation of the spawned block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SweepConfig {
    /// Units per second.
    pub speed: f32,
    /// Distance from the spawn point to either end.
    pub range: f32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            speed: 3.0,
            range: 2.0,
        }
    }
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Spawning,
    AwaitingDrop,
    AwaitingLanding,
    /// Blocked for a rebalance; `release_in` counts down once a resume is scheduled.
    Gated { release_in: Option<u32> },
}

/// Something the scheduler did this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    Spawned { id: BlockId, variant: String },
    Dropped { id: BlockId },
    Landed(Settlement),
    Aborted { id: BlockId },
    Released,
}

/// Orchestrates the active block's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropScheduler {
    state: SchedulerState,
    blocks: BlockManager,
    selector: VariantSelector,
    detector: LandingDetector,
    spawn_point: [f32; 2],
    sweep: Option<SweepConfig>,
    sweep_right: bool,
    spawning_stopped: bool,
    halted: bool,
}

impl DropScheduler {
    pub fn new(
        blocks: BlockManager,
        selector: VariantSelector,
        detector: LandingDetector,
        spawn_point: [f32; 2],
        sweep: Option<SweepConfig>,
    ) -> Self {
        Self {
            state: SchedulerState::Idle,
            blocks,
            selector,
            detector,
            spawn_point,
            sweep,
            sweep_right: true,
            spawning_stopped: false,
            halted: false,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_gated(&self) -> bool {
        matches!(self.state, SchedulerState::Gated { .. })
    }

    pub fn is_spawning_stopped(&self) -> bool {
        self.spawning_stopped
    }

    /// True once spawning failed with `NoVariantsAvailable`.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// True while the active block is falling.
    pub fn drop_in_flight(&self) -> bool {
        self.blocks
            .active()
            .is_some_and(|b| b.state == LifecycleState::Falling)
    }

    pub fn blocks(&self) -> &BlockManager {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut BlockManager {
        &mut self.blocks
    }

    pub fn selector(&self) -> &VariantSelector {
        &self.selector
    }

    pub fn selector_mut(&mut self) -> &mut VariantSelector {
        &mut self.selector
    }

    pub fn detector(&self) -> &LandingDetector {
        &self.detector
    }

    /// Advances the scheduler by one frame.
    ///
    /// Must run after the physics step so landing checks see this frame's
    /// contacts and velocities. Only `NoVariantsAvailable` is returned as an
    /// error; every other anomaly is recovered here.
    pub fn tick(
        &mut self,
        world: &mut PhysicsWorld,
        drop_requested: bool,
        score: &mut dyn ScoreAccumulator,
        timed: &mut dyn TimedMode,
    ) -> Result<Option<SchedulerEvent>, SelectError> {
        if let SchedulerState::Gated { release_in } = self.state {
            return Ok(self.tick_gate(release_in));
        }

        if self.state == SchedulerState::AwaitingDrop && self.blocks.active().is_none() {
            tracing::warn!("[scheduler] Active block lost while awaiting drop, respawning");
            self.state = SchedulerState::Spawning;
        }

        match self.state {
            SchedulerState::Idle | SchedulerState::Spawning => self.try_spawn(world, score),
            SchedulerState::AwaitingDrop => Ok(self.await_drop(world, drop_requested)),
            SchedulerState::AwaitingLanding => Ok(self.await_landing(world, score, timed)),
            SchedulerState::Gated { .. } => Ok(None),
        }
    }

    fn tick_gate(&mut self, release_in: Option<u32>) -> Option<SchedulerEvent> {
        match release_in {
            None => None,
            Some(remaining) if remaining > 1 => {
                self.state = SchedulerState::Gated {
                    release_in: Some(remaining - 1),
                };
                None
            }
            Some(_) => {
                self.state = self.state_for_active();
                tracing::info!("[scheduler] Released from rebalance gate into {:?}", self.state);
                Some(SchedulerEvent::Released)
            }
        }
    }

    fn try_spawn(
        &mut self,
        world: &mut PhysicsWorld,
        score: &dyn ScoreAccumulator,
    ) -> Result<Option<SchedulerEvent>, SelectError> {
        if self.spawning_stopped {
            self.state = SchedulerState::Idle;
            return Ok(None);
        }
        if self.halted {
            return Err(SelectError::NoVariantsAvailable);
        }
        if self.blocks.active().is_some() {
            self.state = self.state_for_active();
            tracing::warn!("[scheduler] Spawn skipped, a block is still active");
            return Ok(None);
        }

        let variant = match self.selector.select(score.score()) {
            Ok(variant) => variant,
            Err(err) => {
                tracing::warn!("[scheduler] Spawning halted: {}", err);
                self.halted = true;
                self.state = SchedulerState::Idle;
                return Err(err);
            }
        };

        let name = variant.name.clone();
        let [x, y] = self.spawn_point;
        match self.blocks.spawn(world, variant, x, y) {
            Ok(id) => {
                self.sweep_right = true;
                self.state = SchedulerState::AwaitingDrop;
                Ok(Some(SchedulerEvent::Spawned { id, variant: name }))
            }
            Err(err) => {
                tracing::warn!("[scheduler] Spawn rejected: {}", err);
                self.state = self.state_for_active();
                Ok(None)
            }
        }
    }

    fn await_drop(&mut self, world: &mut PhysicsWorld, drop_requested: bool) -> Option<SchedulerEvent> {
        let id = self.blocks.active_id()?;

        if !drop_requested {
            self.sweep_active(world, id);
            return None;
        }

        match self.blocks.request_drop(world, id) {
            Ok(()) => {
                self.detector.watch(id);
                self.state = SchedulerState::AwaitingLanding;
                Some(SchedulerEvent::Dropped { id })
            }
            Err(err) => {
                tracing::warn!("[scheduler] Drop of block {} failed: {}", id, err);
                self.state = self.state_for_active();
                None
            }
        }
    }

    fn await_landing(
        &mut self,
        world: &mut PhysicsWorld,
        score: &mut dyn ScoreAccumulator,
        timed: &mut dyn TimedMode,
    ) -> Option<SchedulerEvent> {
        if self.detector.watched().is_none() {
            // Re-arm after a gate released us mid-fall.
            match self.blocks.active() {
                Some(block) if block.state == LifecycleState::Falling => self.detector.watch(block.id),
                _ => {
                    self.state = self.after_block();
                    return None;
                }
            }
        }
        let watched = self.detector.watched()?;

        match self.detector.poll(world, &self.blocks) {
            LandingStatus::Pending => None,
            status @ (LandingStatus::Landed | LandingStatus::LandedForced) => {
                let via_timeout = status == LandingStatus::LandedForced;
                let event = match self.blocks.mark_settled(world, watched, via_timeout) {
                    Ok(settlement) => {
                        if settlement.credits_score() {
                            score.add_score(settlement.points);
                        }
                        if timed.is_time_limited_mode_active() {
                            timed.on_block_landed();
                        }
                        Some(SchedulerEvent::Landed(settlement))
                    }
                    Err(err) => {
                        tracing::warn!("[scheduler] Could not settle block {}: {}", watched, err);
                        None
                    }
                };
                self.state = self.after_block();
                event
            }
            LandingStatus::Aborted => {
                tracing::warn!("[scheduler] Block {} aborted mid-fall, no score", watched);
                self.blocks.prune_destroyed(world);
                self.state = self.after_block();
                Some(SchedulerEvent::Aborted { id: watched })
            }
        }
    }

    fn after_block(&self) -> SchedulerState {
        if self.spawning_stopped {
            SchedulerState::Idle
        } else {
            SchedulerState::Spawning
        }
    }

    fn state_for_active(&mut self) -> SchedulerState {
        match self.blocks.active() {
            Some(block) if block.state == LifecycleState::Spawned => SchedulerState::AwaitingDrop,
            Some(block) if block.state == LifecycleState::Falling => {
                if self.detector.watched() != Some(block.id) {
                    self.detector.watch(block.id);
                }
                SchedulerState::AwaitingLanding
            }
            _ => self.after_block(),
        }
    }

    fn sweep_active(&mut self, world: &mut PhysicsWorld, id: BlockId) {
        let Some(sweep) = self.sweep else {
            return;
        };
        let Some((x, _)) = self.blocks.get_block_position(world, id) else {
            return;
        };

        let base_x = self.spawn_point[0];
        let target = if self.sweep_right {
            base_x + sweep.range
        } else {
            base_x - sweep.range
        };
        let step = sweep.speed * PHYSICS_DT;
        let next = if (target - x).abs() <= step {
            target
        } else {
            x + step * (target - x).signum()
        };

        if self.blocks.set_spawned_x(world, id, next).is_ok() && (next - target).abs() < 0.01 {
            self.sweep_right = !self.sweep_right;
        }
    }

    /// Blocks all spawning and dropping until a resume is scheduled.
    pub fn pause_for_rebalance(&mut self) {
        tracing::info!("[scheduler] Gated for rebalance (was {:?})", self.state);
        self.state = SchedulerState::Gated { release_in: None };
    }

    /// Schedules release from the gate after `delay_secs`.
    pub fn resume_after_rebalance(&mut self, delay_secs: f32) {
        if !self.is_gated() {
            tracing::warn!("[scheduler] Resume requested while not gated ({:?})", self.state);
            return;
        }
        let frames = secs_to_frames(delay_secs).max(1);
        tracing::info!("[scheduler] Resuming in {:.2}s", delay_secs);
        self.state = SchedulerState::Gated {
            release_in: Some(frames),
        };
    }

    /// Permanently stops new spawns. Used when a timed mode ends.
    pub fn stop_spawning(&mut self) {
        if !self.spawning_stopped {
            tracing::info!("[scheduler] Spawning stopped");
        }
        self.spawning_stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockManager;
    use crate::collab::{NoTimedMode, ScoreBoard};
    use crate::landing::LandingConfig;
    use crate::selector::SelectionPolicy;
    use crate::test_utils::{add_ground, unit_variant};
    use crate::variant::VariantCatalog;
    use rapier2d::prelude::Vector;

    #[derive(Default)]
    struct RecordingTimedMode {
        active: bool,
        landed: u32,
    }

    impl TimedMode for RecordingTimedMode {
        fn is_time_limited_mode_active(&self) -> bool {
            self.active
        }

        fn on_block_landed(&mut self) {
            self.landed += 1;
        }
    }

    fn scheduler_with(catalog: VariantCatalog, landing: LandingConfig) -> DropScheduler {
        DropScheduler::new(
            BlockManager::new(landing.credit_on_timeout),
            VariantSelector::new(catalog, SelectionPolicy::WeightedRandom, 1),
            LandingDetector::new(landing),
            [0.0, 4.0],
            None,
        )
    }

    fn scheduler() -> DropScheduler {
        scheduler_with(
            VariantCatalog::new(vec![unit_variant()]),
            LandingConfig::default(),
        )
    }

    struct Rig {
        world: PhysicsWorld,
        score: ScoreBoard,
        timed: RecordingTimedMode,
        scheduler: DropScheduler,
    }

    impl Rig {
        fn new(scheduler: DropScheduler) -> Self {
            let mut world = PhysicsWorld::new();
            add_ground(&mut world);
            Self {
                world,
                score: ScoreBoard::new(),
                timed: RecordingTimedMode::default(),
                scheduler,
            }
        }

        fn tick(&mut self, drop: bool) -> Result<Option<SchedulerEvent>, SelectError> {
            let events = self.world.step_with_events();
            self.scheduler.blocks_mut().route_contacts(&self.world, &events);
            let result = self
                .scheduler
                .tick(&mut self.world, drop, &mut self.score, &mut self.timed);
            assert!(self.scheduler.blocks().active_count() <= 1);
            result
        }

        fn tick_until(&mut self, max: u32, drop: bool, pred: impl Fn(&SchedulerEvent) -> bool) -> Option<SchedulerEvent> {
            for _ in 0..max {
                if let Some(event) = self.tick(drop).unwrap() {
                    if pred(&event) {
                        return Some(event);
                    }
                }
            }
            None
        }
    }

    #[test]
    fn test_first_tick_spawns() {
        let mut rig = Rig::new(scheduler());
        let event = rig.tick(false).unwrap();
        assert!(matches!(event, Some(SchedulerEvent::Spawned { id: 0, .. })));
        assert_eq!(rig.scheduler.state(), SchedulerState::AwaitingDrop);
    }

    #[test]
    fn test_waits_for_drop_signal() {
        let mut rig = Rig::new(scheduler());
        rig.tick(false).unwrap();
        for _ in 0..60 {
            assert_eq!(rig.tick(false).unwrap(), None);
        }
        assert_eq!(rig.scheduler.state(), SchedulerState::AwaitingDrop);

        let event = rig.tick(true).unwrap();
        assert_eq!(event, Some(SchedulerEvent::Dropped { id: 0 }));
        assert_eq!(rig.scheduler.state(), SchedulerState::AwaitingLanding);
        assert!(rig.scheduler.drop_in_flight());
    }

    #[test]
    fn test_full_cycle_credits_score_and_respawns() {
        let mut rig = Rig::new(scheduler());
        rig.tick(false).unwrap();
        rig.tick(true).unwrap();

        let landed = rig.tick_until(300, false, |e| matches!(e, SchedulerEvent::Landed(_)));
        let Some(SchedulerEvent::Landed(settlement)) = landed else {
            panic!("block never landed");
        };
        assert!(!settlement.via_timeout);
        assert_eq!(rig.score.score(), 1);
        assert_eq!(rig.scheduler.state(), SchedulerState::Spawning);

        let event = rig.tick(false).unwrap();
        assert!(matches!(event, Some(SchedulerEvent::Spawned { id: 1, .. })));
        assert_eq!(rig.scheduler.blocks().settled_count(), 1);
    }

    #[test]
    fn test_timed_mode_notified_only_when_active() {
        let mut rig = Rig::new(scheduler());
        rig.tick(false).unwrap();
        rig.tick(true).unwrap();
        rig.tick_until(300, false, |e| matches!(e, SchedulerEvent::Landed(_)));
        assert_eq!(rig.timed.landed, 0);

        rig.timed.active = true;
        rig.tick(false).unwrap();
        rig.tick(true).unwrap();
        rig.tick_until(300, false, |e| matches!(e, SchedulerEvent::Landed(_)));
        assert_eq!(rig.timed.landed, 1);
    }

    #[test]
    fn test_timeout_settles_without_credit_and_proceeds() {
        let mut rig = Rig::new(scheduler());
        rig.world.gravity = Vector::new(0.0, 0.0);
        rig.tick(false).unwrap();
        rig.tick(true).unwrap();

        let handle = rig.scheduler.blocks().active().unwrap().body_handle;
        rig.world
            .get_rigid_body_mut(handle)
            .unwrap()
            .set_linvel(Vector::new(0.0, 2.0), true);

        for _ in 0..299 {
            assert_eq!(rig.tick(false).unwrap(), None);
        }
        let event = rig.tick(false).unwrap();
        let Some(SchedulerEvent::Landed(settlement)) = event else {
            panic!("expected forced landing, got {event:?}");
        };
        assert!(settlement.via_timeout);
        assert_eq!(rig.scheduler.blocks().state_of(0), Some(LifecycleState::Settled));
        assert_eq!(rig.score.score(), 0);

        let event = rig.tick(false).unwrap();
        assert!(matches!(event, Some(SchedulerEvent::Spawned { id: 1, .. })));
    }

    #[test]
    fn test_timeout_credit_when_configured() {
        let landing = LandingConfig {
            credit_on_timeout: true,
            timeout_secs: 0.5,
            ..LandingConfig::default()
        };
        let mut rig = Rig::new(scheduler_with(VariantCatalog::new(vec![unit_variant()]), landing));
        rig.world.gravity = Vector::new(0.0, 0.0);
        rig.tick(false).unwrap();
        rig.tick(true).unwrap();

        let landed = rig.tick_until(60, false, |e| matches!(e, SchedulerEvent::Landed(_)));
        assert!(matches!(landed, Some(SchedulerEvent::Landed(s)) if s.via_timeout));
        assert_eq!(rig.score.score(), 1);
    }

    #[test]
    fn test_destroyed_block_aborts_and_respawns() {
        let mut rig = Rig::new(scheduler());
        rig.tick(false).unwrap();
        rig.tick(true).unwrap();

        let handle = rig.scheduler.blocks().active().unwrap().body_handle;
        rig.world.remove_rigid_body(handle);

        let event = rig.tick(false).unwrap();
        assert_eq!(event, Some(SchedulerEvent::Aborted { id: 0 }));
        assert_eq!(rig.score.score(), 0);
        assert_eq!(rig.scheduler.state(), SchedulerState::Spawning);

        let event = rig.tick(false).unwrap();
        assert!(matches!(event, Some(SchedulerEvent::Spawned { id: 1, .. })));
    }

    #[test]
    fn test_lost_spawned_block_self_heals() {
        let mut rig = Rig::new(scheduler());
        rig.tick(false).unwrap();

        let handle = rig.scheduler.blocks().active().unwrap().body_handle;
        rig.world.remove_rigid_body(handle);
        rig.scheduler.blocks_mut().prune_destroyed(&rig.world);

        let event = rig.tick(false).unwrap();
        assert!(matches!(event, Some(SchedulerEvent::Spawned { id: 1, .. })));
    }

    #[test]
    fn test_gate_blocks_spawn_and_drop() {
        let mut rig = Rig::new(scheduler());
        rig.tick(false).unwrap();
        rig.scheduler.pause_for_rebalance();

        for _ in 0..120 {
            assert_eq!(rig.tick(true).unwrap(), None);
        }
        assert_eq!(rig.scheduler.blocks().state_of(0), Some(LifecycleState::Spawned));
        assert_eq!(rig.scheduler.blocks().blocks().len(), 1);
    }

    #[test]
    fn test_resume_after_delay_returns_to_existing_block() {
        let mut rig = Rig::new(scheduler());
        rig.tick(false).unwrap();
        rig.scheduler.pause_for_rebalance();
        rig.scheduler.resume_after_rebalance(1.0);

        for _ in 0..59 {
            assert_eq!(rig.tick(true).unwrap(), None);
            assert!(rig.scheduler.is_gated());
        }
        assert_eq!(rig.tick(true).unwrap(), Some(SchedulerEvent::Released));
        assert_eq!(rig.scheduler.state(), SchedulerState::AwaitingDrop);

        assert_eq!(rig.tick(true).unwrap(), Some(SchedulerEvent::Dropped { id: 0 }));
    }

    #[test]
    fn test_resume_with_no_block_spawns() {
        let mut rig = Rig::new(scheduler());
        rig.scheduler.pause_for_rebalance();
        rig.scheduler.resume_after_rebalance(0.0);

        assert_eq!(rig.tick(false).unwrap(), Some(SchedulerEvent::Released));
        assert_eq!(rig.scheduler.state(), SchedulerState::Spawning);
        assert!(matches!(rig.tick(false).unwrap(), Some(SchedulerEvent::Spawned { .. })));
    }

    #[test]
    fn test_gate_mid_fall_rewatches_on_release() {
        let mut rig = Rig::new(scheduler());
        rig.tick(false).unwrap();
        rig.tick(true).unwrap();
        rig.scheduler.pause_for_rebalance();
        rig.scheduler.resume_after_rebalance(0.0);

        assert_eq!(rig.tick(false).unwrap(), Some(SchedulerEvent::Released));
        assert_eq!(rig.scheduler.state(), SchedulerState::AwaitingLanding);
        let landed = rig.tick_until(300, false, |e| matches!(e, SchedulerEvent::Landed(_)));
        assert!(landed.is_some());
    }

    #[test]
    fn test_resume_ignored_when_not_gated() {
        let mut rig = Rig::new(scheduler());
        rig.tick(false).unwrap();
        rig.scheduler.resume_after_rebalance(1.0);
        assert_eq!(rig.scheduler.state(), SchedulerState::AwaitingDrop);
    }

    #[test]
    fn test_stop_spawning_latch() {
        let mut rig = Rig::new(scheduler());
        rig.tick(false).unwrap();
        rig.tick(true).unwrap();
        rig.scheduler.stop_spawning();

        rig.tick_until(300, false, |e| matches!(e, SchedulerEvent::Landed(_)));
        assert_eq!(rig.scheduler.state(), SchedulerState::Idle);
        for _ in 0..30 {
            assert_eq!(rig.tick(true).unwrap(), None);
        }
        assert_eq!(rig.scheduler.blocks().blocks().len(), 1);
    }

    #[test]
    fn test_empty_catalog_halts_spawning() {
        let mut rig = Rig::new(scheduler_with(VariantCatalog::default(), LandingConfig::default()));
        assert_eq!(rig.tick(false), Err(SelectError::NoVariantsAvailable));
        assert!(rig.scheduler.is_halted());
        assert_eq!(rig.tick(false), Err(SelectError::NoVariantsAvailable));
        assert!(rig.scheduler.blocks().blocks().is_empty());
    }

    #[test]
    fn test_sweep_oscillates_within_range() {
        let mut scheduler = scheduler();
        scheduler.sweep = Some(SweepConfig {
            speed: 3.0,
            range: 1.0,
        });
        let mut rig = Rig::new(scheduler);
        rig.tick(false).unwrap();

        let mut min_x = f32::MAX;
        let mut max_x = f32::MIN;
        for _ in 0..120 {
            rig.tick(false).unwrap();
            let (x, _) = rig.scheduler.blocks().get_block_position(&rig.world, 0).unwrap();
            min_x = min_x.min(x);
            max_x = max_x.max(x);
        }
        assert!((max_x - 1.0).abs() < 1e-3, "max x {max_x}");
        assert!((min_x + 1.0).abs() < 1e-3, "min x {min_x}");
    }
}
