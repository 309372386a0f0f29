//! Game façade.
//!
//! `StackGame` owns the physics world and every core component, wires in the
//! score and timed-mode collaborators, and fixes the per-frame order:
//!
//! 1. stabilizer forces
//! 2. physics step
//! 3. contact routing
//! 4. boundary check (blocks below the fall limit are removed)
//! 5. stabilizer timers
//! 6. timed mode clock
//! 7. drop scheduler
//! 8. stability monitor (skipped until a rescue has fully released)

use rapier2d::prelude::*;

use crate::block::{BlockId, BlockManager};
use crate::collab::{NoTimedMode, ScoreAccumulator, ScoreBoard, TimeAttack, TimedMode};
use crate::config::StackConfig;
use crate::landing::LandingDetector;
use crate::monitor::{StabilityAlert, StabilityMonitor};
use crate::physics::{PhysicsWorld, USER_DATA_GROUND, encode_user_data};
use crate::scheduler::{DropScheduler, SchedulerEvent};
use crate::selector::{SelectError, VariantSelector};
use crate::stabilizer::{StabilizeError, StabilizerEvent, TowerStabilizer};

/// What happened during one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub frame: u64,
    pub scheduler: Option<SchedulerEvent>,
    pub stabilizer: Option<StabilizerEvent>,
    /// Blocks removed for falling below the fall limit.
    pub lost: Vec<BlockId>,
    pub alert: Option<StabilityAlert>,
}

/// Stacking game state.
pub struct StackGame<S = ScoreBoard, T = NoTimedMode> {
    pub(crate) config: StackConfig,
    pub(crate) world: PhysicsWorld,
    pub(crate) scheduler: DropScheduler,
    pub(crate) stabilizer: TowerStabilizer,
    pub(crate) monitor: StabilityMonitor,
    pub(crate) score: S,
    pub(crate) timed: T,
}

impl StackGame<ScoreBoard, NoTimedMode> {
    /// Classic endless mode.
    pub fn classic(config: StackConfig) -> Self {
        Self::new(config, ScoreBoard::new(), NoTimedMode)
    }
}

impl StackGame<ScoreBoard, TimeAttack> {
    /// Time-attack mode with the given limit.
    pub fn time_attack(config: StackConfig, time_limit_secs: f32) -> Self {
        Self::new(config, ScoreBoard::new(), TimeAttack::new(time_limit_secs))
    }
}

impl<S: ScoreAccumulator, T: TimedMode> StackGame<S, T> {
    pub fn new(config: StackConfig, score: S, timed: T) -> Self {
        let mut world = PhysicsWorld::new();
        add_ground(&mut world, &config);

        let scheduler = DropScheduler::new(
            BlockManager::new(config.landing.credit_on_timeout),
            VariantSelector::new(config.variant_catalog(), config.selection.clone(), config.seed),
            LandingDetector::new(config.landing),
            config.spawn_point,
            config.sweep,
        );

        tracing::info!(
            "[game] New game: {} variants, seed {}",
            config.catalog.len(),
            config.seed
        );

        Self {
            stabilizer: TowerStabilizer::new(config.stabilizer),
            monitor: StabilityMonitor::new(config.monitor),
            config,
            world,
            scheduler,
            score,
            timed,
        }
    }

    /// Advances the game by one fixed frame.
    pub fn tick(&mut self, drop_requested: bool) -> Result<TickReport, SelectError> {
        self.stabilizer.pre_step(&mut self.world);

        let events = self.world.step_with_events();
        self.scheduler.blocks_mut().route_contacts(&self.world, &events);

        let lost = self.remove_fallen_blocks();

        let stabilizer = self.stabilizer.post_step(&mut self.world);
        if let Some(StabilizerEvent::Completed(_)) = stabilizer {
            self.scheduler
                .resume_after_rebalance(self.config.resume_cooldown_secs);
            self.monitor.reset();
        }

        self.timed.advance(1);
        if self.timed.spawning_finished() {
            self.scheduler.stop_spawning();
        }

        let scheduler = self.scheduler.tick(
            &mut self.world,
            drop_requested,
            &mut self.score,
            &mut self.timed,
        )?;

        // The tower is still being rebuilt until the scheduler is released.
        let alert = if self.stabilizer.is_active() || self.scheduler.is_gated() {
            None
        } else {
            self.monitor.tick(&self.world, self.scheduler.blocks())
        };

        Ok(TickReport {
            frame: self.world.current_frame(),
            scheduler,
            stabilizer,
            lost,
            alert,
        })
    }

    /// Starts a tower rescue: gates the scheduler and begins stabilization.
    ///
    /// Refused while a block is falling. Returns the number of captured blocks.
    pub fn rescue_tower(&mut self) -> Result<usize, StabilizeError> {
        if self.stabilizer.is_active() {
            return Err(StabilizeError::AlreadyRunning);
        }
        if self.scheduler.drop_in_flight() {
            tracing::warn!("[game] Rescue refused, a block is falling");
            return Err(StabilizeError::DropInFlight);
        }

        let captured = self.stabilizer.begin(&mut self.world, self.scheduler.blocks())?;
        self.scheduler.pause_for_rebalance();
        self.monitor.reset();
        tracing::info!("[game] Tower rescue started with {} blocks", captured);
        Ok(captured)
    }

    fn remove_fallen_blocks(&mut self) -> Vec<BlockId> {
        let limit = self.config.fall_limit_y;
        let blocks = self.scheduler.blocks();
        let fallen: Vec<BlockId> = blocks
            .blocks()
            .iter()
            .filter(|b| {
                blocks
                    .get_block_position(&self.world, b.id)
                    .is_some_and(|(_, y)| y < limit)
            })
            .map(|b| b.id)
            .collect();

        for id in &fallen {
            tracing::warn!("[game] Block {} fell below {:.1}, removing", id, limit);
            self.scheduler.blocks_mut().remove_block(&mut self.world, *id);
        }
        fallen
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    /// Direct world access for external collaborators (e.g. destroying bodies).
    pub fn world_mut(&mut self) -> &mut PhysicsWorld {
        &mut self.world
    }

    pub fn scheduler(&self) -> &DropScheduler {
        &self.scheduler
    }

    pub fn stabilizer(&self) -> &TowerStabilizer {
        &self.stabilizer
    }

    pub fn monitor(&self) -> &StabilityMonitor {
        &self.monitor
    }

    pub fn score(&self) -> &S {
        &self.score
    }

    pub fn timed(&self) -> &T {
        &self.timed
    }

    pub fn current_frame(&self) -> u64 {
        self.world.current_frame()
    }

    pub fn compute_hash(&self) -> u64 {
        self.world.compute_hash()
    }
}

fn add_ground(world: &mut PhysicsWorld, config: &StackConfig) {
    let [cx, cy] = config.ground.center;
    let [w, h] = config.ground.size;
    let body = RigidBodyBuilder::fixed()
        .translation(Vector::new(cx, cy))
        .user_data(encode_user_data(USER_DATA_GROUND, 0))
        .build();
    let handle = world.add_rigid_body(body);
    let collider = ColliderBuilder::cuboid(w * 0.5, h * 0.5)
        .friction(0.8)
        .active_events(ActiveEvents::COLLISION_EVENTS)
        .build();
    world.add_collider(collider, handle);
}
