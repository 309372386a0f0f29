//! Tower stabilization ("save the stack").
//!
//! A session freezes every settled block, stacks them into an exact vertical
//! column over the lowest one, then eases them back into normal physics:
//!
//! 1. Freeze: zero velocities, disable gravity, lock all axes.
//! 2. Realign: snap each block onto the one below, zero rotation.
//! 3. Active settle: upward corrective force, angular damping.
//! 4. Passive damp: reduced gravity, translations free, linear/angular damping.
//! 5. Release: pre-session gravity restored, then a grace period before the
//!    scheduler is allowed to resume.
//!
//! `pre_step` runs before each physics step and `post_step` after it.

use rapier2d::prelude::*;
use serde::{Deserialize, Serialize};

use crate::block::{BlockId, BlockManager, LifecycleState};
use crate::physics::{PhysicsWorld, USER_DATA_BLOCK, secs_to_frames};

/// Stabilizer configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StabilizerConfig {
    /// Upward force applied to every block during both settle phases.
    pub corrective_force: f32,
    pub active_settle_secs: f32,
    pub passive_damp_secs: f32,
    /// Multiplier on each block's pre-session gravity scale while damping.
    pub passive_gravity_scale: f32,
    /// Per-step angular velocity factor during active settle.
    pub active_angular_damping: f32,
    /// Per-step horizontal velocity factor during passive damp.
    pub passive_linear_damping: f32,
    /// Per-step angular velocity factor during passive damp.
    pub passive_angular_damping: f32,
    /// Wait after release before the scheduler may resume.
    pub grace_secs: f32,
    /// Keep rotations locked after release.
    pub keep_rotation_locked: bool,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            corrective_force: 1.0,
            active_settle_secs: 3.0,
            passive_damp_secs: 3.0,
            passive_gravity_scale: 0.2,
            active_angular_damping: 0.95,
            passive_linear_damping: 0.9,
            passive_angular_damping: 0.9,
            grace_secs: 2.0,
            keep_rotation_locked: true,
        }
    }
}

/// Session phase. Countdown phases hold the frames left.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StabilizePhase {
    Freezing,
    Realigning,
    ActiveSettle { remaining: u32 },
    PassiveDamp { remaining: u32 },
    Releasing { remaining: u32 },
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StabilizeError {
    #[error("no settled blocks to stabilize")]
    NothingToStabilize,
    #[error("a stabilization session is already running")]
    AlreadyRunning,
    #[error("a block is still falling")]
    DropInFlight,
}

/// Emitted by `post_step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilizerEvent {
    PhaseChanged(StabilizePhase),
    Completed(SessionSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub captured: usize,
    /// Blocks that were destroyed during the session.
    pub stale: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CapturedBlock {
    id: BlockId,
    handle: RigidBodyHandle,
    half_height: f32,
    gravity_scale: f32,
    stale: bool,
}

/// State of one running stabilization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilizationSession {
    /// Bottom to top by pre-session Y.
    blocks: Vec<CapturedBlock>,
    phase: StabilizePhase,
}

impl StabilizationSession {
    pub fn phase(&self) -> StabilizePhase {
        self.phase
    }

    /// Captured block ids, bottom to top.
    pub fn order(&self) -> Vec<BlockId> {
        self.blocks.iter().map(|b| b.id).collect()
    }

    pub fn stale_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.stale).count()
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            captured: self.blocks.len(),
            stale: self.stale_count(),
        }
    }

    /// Applies `f` to every live captured body, marking vanished ones stale.
    fn for_each_live(
        &mut self,
        world: &mut PhysicsWorld,
        mut f: impl FnMut(&CapturedBlock, &mut RigidBody),
    ) {
        for captured in &mut self.blocks {
            if captured.stale {
                continue;
            }
            match world.get_rigid_body_mut(captured.handle) {
                Some(body) => f(captured, body),
                None => {
                    tracing::warn!(
                        "[stabilizer] Block {} destroyed mid-session, skipping it",
                        captured.id
                    );
                    captured.stale = true;
                }
            }
        }
    }
}

/// Runs stabilization sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TowerStabilizer {
    config: StabilizerConfig,
    session: Option<StabilizationSession>,
}

impl TowerStabilizer {
    pub fn new(config: StabilizerConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    pub fn config(&self) -> &StabilizerConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&StabilizationSession> {
        self.session.as_ref()
    }

    pub fn phase(&self) -> Option<StabilizePhase> {
        self.session.as_ref().map(StabilizationSession::phase)
    }

    /// Captures and freezes every settled block.
    ///
    /// The freeze is applied before returning, so no physics step can run
    /// between capture and freeze. Returns the number of captured blocks.
    pub fn begin(&mut self, world: &mut PhysicsWorld, blocks: &BlockManager) -> Result<usize, StabilizeError> {
        if self.session.is_some() {
            return Err(StabilizeError::AlreadyRunning);
        }

        let mut captured: Vec<(f32, CapturedBlock)> = world
            .tagged_bodies(USER_DATA_BLOCK)
            .filter_map(|(raw_id, handle)| {
                let id = BlockId::try_from(raw_id).ok()?;
                if blocks.state_of(id) != Some(LifecycleState::Settled) {
                    return None;
                }
                let body = world.get_rigid_body(handle)?;
                let half_height = world.body_half_height(handle).or_else(|| {
                    blocks
                        .get_block(id)
                        .map(|b| b.variant.footprint.half_height())
                })?;
                Some((
                    body.translation().y,
                    CapturedBlock {
                        id,
                        handle,
                        half_height,
                        gravity_scale: body.gravity_scale(),
                        stale: false,
                    },
                ))
            })
            .collect();

        if captured.is_empty() {
            tracing::warn!("[stabilizer] No settled blocks found");
            return Err(StabilizeError::NothingToStabilize);
        }

        captured.sort_by(|(ya, a), (yb, b)| ya.total_cmp(yb).then(a.id.cmp(&b.id)));

        let mut session = StabilizationSession {
            blocks: captured.into_iter().map(|(_, block)| block).collect(),
            phase: StabilizePhase::Freezing,
        };
        let count = session.blocks.len();

        session.for_each_live(world, |_, body| {
            body.set_linvel(Vector::new(0.0, 0.0), true);
            body.set_angvel(0.0, true);
            body.set_gravity_scale(0.0, true);
            body.reset_forces(true);
            body.lock_translations(true, true);
            body.lock_rotations(true, true);
        });
        session.phase = StabilizePhase::Realigning;

        tracing::info!("[stabilizer] Froze {} blocks, starting rebalance", count);
        self.session = Some(session);
        Ok(count)
    }

    /// Per-step work applied before the physics step.
    pub fn pre_step(&mut self, world: &mut PhysicsWorld) {
        let config = self.config;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match session.phase {
            StabilizePhase::Realigning => {
                realign(session, world);
                session.phase = StabilizePhase::ActiveSettle {
                    remaining: secs_to_frames(config.active_settle_secs).max(1),
                };
                tracing::info!("[stabilizer] Column realigned, active settle");
            }
            StabilizePhase::ActiveSettle { .. } => {
                session.for_each_live(world, |_, body| {
                    body.reset_forces(false);
                    body.add_force(Vector::new(0.0, config.corrective_force), true);
                    let angvel = body.angvel();
                    body.set_angvel(angvel * config.active_angular_damping, true);
                });
            }
            StabilizePhase::PassiveDamp { .. } => {
                session.for_each_live(world, |captured, body| {
                    body.set_gravity_scale(captured.gravity_scale * config.passive_gravity_scale, true);
                    body.reset_forces(false);
                    body.add_force(Vector::new(0.0, config.corrective_force), true);
                    let vel = body.linvel();
                    body.set_linvel(Vector::new(vel.x * config.passive_linear_damping, vel.y), true);
                    let angvel = body.angvel();
                    body.set_angvel(angvel * config.passive_angular_damping, true);
                });
            }
            StabilizePhase::Freezing | StabilizePhase::Releasing { .. } | StabilizePhase::Complete => {}
        }
    }

    /// Advances phase timers after the physics step.
    pub fn post_step(&mut self, world: &mut PhysicsWorld) -> Option<StabilizerEvent> {
        let config = self.config;
        let session = self.session.as_mut()?;

        let next = match session.phase {
            StabilizePhase::ActiveSettle { remaining } if remaining > 1 => {
                session.phase = StabilizePhase::ActiveSettle {
                    remaining: remaining - 1,
                };
                return None;
            }
            StabilizePhase::ActiveSettle { .. } => {
                session.for_each_live(world, |captured, body| {
                    body.lock_translations(false, true);
                    body.set_gravity_scale(captured.gravity_scale * config.passive_gravity_scale, true);
                });
                StabilizePhase::PassiveDamp {
                    remaining: secs_to_frames(config.passive_damp_secs).max(1),
                }
            }
            StabilizePhase::PassiveDamp { remaining } if remaining > 1 => {
                session.phase = StabilizePhase::PassiveDamp {
                    remaining: remaining - 1,
                };
                return None;
            }
            StabilizePhase::PassiveDamp { .. } => {
                session.for_each_live(world, |captured, body| {
                    body.reset_forces(true);
                    body.set_gravity_scale(captured.gravity_scale, true);
                    body.lock_rotations(config.keep_rotation_locked, true);
                });
                StabilizePhase::Releasing {
                    remaining: secs_to_frames(config.grace_secs).max(1),
                }
            }
            StabilizePhase::Releasing { remaining } if remaining > 1 => {
                session.phase = StabilizePhase::Releasing {
                    remaining: remaining - 1,
                };
                return None;
            }
            StabilizePhase::Releasing { .. } => StabilizePhase::Complete,
            StabilizePhase::Freezing | StabilizePhase::Realigning | StabilizePhase::Complete => {
                return None;
            }
        };

        session.phase = next;
        if next == StabilizePhase::Complete {
            let summary = session.summary();
            self.session = None;
            tracing::info!(
                "[stabilizer] Stabilization complete ({} blocks, {} lost)",
                summary.captured,
                summary.stale
            );
            return Some(StabilizerEvent::Completed(summary));
        }

        tracing::info!("[stabilizer] Entering {:?}", next);
        Some(StabilizerEvent::PhaseChanged(next))
    }
}

/// Stacks live blocks bottom to top over the lowest one.
fn realign(session: &mut StabilizationSession, world: &mut PhysicsWorld) {
    let mut below: Option<(f32, f32, f32)> = None;

    session.for_each_live(world, |captured, body| {
        let (x, y) = match below {
            None => {
                let pos = body.translation();
                (pos.x, pos.y)
            }
            Some((base_x, below_y, below_half)) => (base_x, below_y + below_half + captured.half_height),
        };

        body.set_translation(Vector::new(x, y), true);
        body.set_rotation(Rotation::from_angle(0.0), true);
        body.set_linvel(Vector::new(0.0, 0.0), true);
        body.set_angvel(0.0, true);

        let base_x = below.map_or(x, |(base_x, _, _)| base_x);
        below = Some((base_x, y, captured.half_height));
    });
}
