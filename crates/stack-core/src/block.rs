//! Block entities and their lifecycle.
//!
//! `BlockManager` owns every block the game has spawned and enforces the
//! single-active-block rule: at most one block is `Spawned` or `Falling`.

use rapier2d::prelude::*;
use serde::{Deserialize, Serialize};

use crate::physics::{PhysicsWorld, USER_DATA_BLOCK, encode_user_data};
use crate::variant::BlockVariant;

/// Unique identifier for a block.
pub type BlockId = u32;

/// Lifecycle state of a block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecycleState {
    /// Floating at the spawn point with gravity disabled.
    Spawned,
    /// Dropped and under normal physics.
    Falling,
    /// At rest. Terminal.
    Settled,
}

/// Lifecycle failures. None of these are fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("block {active} is still active")]
    SpawnBlocked { active: BlockId },
    #[error("block {id} is {actual:?}, expected {expected:?}")]
    InvalidTransition {
        id: BlockId,
        actual: LifecycleState,
        expected: LifecycleState,
    },
    #[error("block {0} no longer exists")]
    StaleBlockHandle(BlockId),
}

/// A live block in the physics world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub body_handle: RigidBodyHandle,
    pub collider_handle: ColliderHandle,
    pub variant: BlockVariant,
    pub state: LifecycleState,
    /// Set once a contact has been seen while falling.
    pub touched: bool,
    /// Physics frame on which the block was spawned.
    pub spawned_frame: u64,
}

impl Block {
    pub fn is_active(&self) -> bool {
        matches!(self.state, LifecycleState::Spawned | LifecycleState::Falling)
    }
}

/// Result of settling a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub id: BlockId,
    pub via_timeout: bool,
    /// Points to credit; zero when the settlement does not earn score.
    pub points: u32,
}

impl Settlement {
    pub fn credits_score(&self) -> bool {
        self.points > 0
    }
}

/// Manages block entities in the physics world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockManager {
    blocks: Vec<Block>,
    active: Option<BlockId>,
    next_id: BlockId,
    credit_on_timeout: bool,
}

impl Default for BlockManager {
    fn default() -> Self {
        Self::new(false)
    }
}

impl BlockManager {
    pub fn new(credit_on_timeout: bool) -> Self {
        Self {
            blocks: Vec::new(),
            active: None,
            next_id: 0,
            credit_on_timeout,
        }
    }

    /// Spawns a floating block for `variant` at `(x, y)`.
    pub fn spawn(
        &mut self,
        world: &mut PhysicsWorld,
        variant: BlockVariant,
        x: f32,
        y: f32,
    ) -> Result<BlockId, LifecycleError> {
        if let Some(active) = self.active {
            return Err(LifecycleError::SpawnBlocked { active });
        }

        let id = self.next_id;
        self.next_id += 1;

        let rigid_body = RigidBodyBuilder::dynamic()
            .translation(Vector::new(x, y))
            .gravity_scale(0.0)
            .ccd_enabled(true)
            .user_data(encode_user_data(USER_DATA_BLOCK, u64::from(id)))
            .build();
        let body_handle = world.add_rigid_body(rigid_body);

        let collider = ColliderBuilder::cuboid(
            variant.footprint.half_width(),
            variant.footprint.half_height(),
        )
        .friction(variant.friction)
        .density(variant.density)
        .restitution(0.0)
        .active_events(ActiveEvents::COLLISION_EVENTS)
        .build();
        let collider_handle = world.add_collider(collider, body_handle);

        tracing::info!("[lifecycle] Spawned block {} ({}) at ({:.2}, {:.2})", id, variant.name, x, y);

        self.blocks.push(Block {
            id,
            body_handle,
            collider_handle,
            variant,
            state: LifecycleState::Spawned,
            touched: false,
            spawned_frame: world.current_frame(),
        });
        self.active = Some(id);

        Ok(id)
    }

    /// Releases a spawned block so gravity acts on it.
    ///
    /// A block already resting on something when dropped starts with its
    /// contact latched, since no new contact-begin event will arrive for it.
    /// Dropping a block that is not `Spawned` (including a second drop)
    /// returns `InvalidTransition` and leaves the block unchanged.
    pub fn request_drop(&mut self, world: &mut PhysicsWorld, id: BlockId) -> Result<(), LifecycleError> {
        let block = self.get_block_mut(id).ok_or(LifecycleError::StaleBlockHandle(id))?;
        if block.state != LifecycleState::Spawned {
            return Err(LifecycleError::InvalidTransition {
                id,
                actual: block.state,
                expected: LifecycleState::Spawned,
            });
        }

        let touching = world.has_active_contact(block.collider_handle);
        let body = world
            .get_rigid_body_mut(block.body_handle)
            .ok_or(LifecycleError::StaleBlockHandle(id))?;
        body.set_gravity_scale(1.0, true);

        block.state = LifecycleState::Falling;
        block.touched = touching;
        tracing::info!("[lifecycle] Dropped block {}", id);
        Ok(())
    }

    /// Settles a falling block and reports whether it earns its points.
    pub fn mark_settled(
        &mut self,
        world: &mut PhysicsWorld,
        id: BlockId,
        via_timeout: bool,
    ) -> Result<Settlement, LifecycleError> {
        let credit_on_timeout = self.credit_on_timeout;
        let block = self.get_block_mut(id).ok_or(LifecycleError::StaleBlockHandle(id))?;
        if block.state != LifecycleState::Falling {
            return Err(LifecycleError::InvalidTransition {
                id,
                actual: block.state,
                expected: LifecycleState::Falling,
            });
        }

        if let Some(body) = world.get_rigid_body_mut(block.body_handle) {
            body.set_linvel(Vector::new(0.0, 0.0), true);
            body.set_angvel(0.0, true);
        }

        block.state = LifecycleState::Settled;
        let credit = !via_timeout || credit_on_timeout;
        let points = if credit { block.variant.points } else { 0 };
        if self.active == Some(id) {
            self.active = None;
        }

        tracing::info!(
            "[lifecycle] Settled block {} (timeout={}, points={})",
            id,
            via_timeout,
            points
        );
        Ok(Settlement {
            id,
            via_timeout,
            points,
        })
    }

    /// Latches the contact flag of a falling block.
    pub fn record_contact(&mut self, id: BlockId) -> bool {
        match self.get_block_mut(id) {
            Some(block) if block.state == LifecycleState::Falling && !block.touched => {
                block.touched = true;
                tracing::debug!("[lifecycle] Block {} made contact", id);
                true
            }
            _ => false,
        }
    }

    /// Routes contact-begin events to the blocks they involve.
    pub fn route_contacts(&mut self, world: &PhysicsWorld, events: &[CollisionEvent]) {
        for event in events {
            if let CollisionEvent::Started(h1, h2, _) = event {
                for handle in [*h1, *h2] {
                    if let Some((USER_DATA_BLOCK, id)) = world.collider_tag(handle) {
                        if let Ok(id) = BlockId::try_from(id) {
                            self.record_contact(id);
                        }
                    }
                }
            }
        }
    }

    /// Moves the spawned block horizontally.
    pub fn set_spawned_x(&mut self, world: &mut PhysicsWorld, id: BlockId, x: f32) -> Result<(), LifecycleError> {
        let block = self.get_block(id).ok_or(LifecycleError::StaleBlockHandle(id))?;
        if block.state != LifecycleState::Spawned {
            return Err(LifecycleError::InvalidTransition {
                id,
                actual: block.state,
                expected: LifecycleState::Spawned,
            });
        }
        let body = world
            .get_rigid_body_mut(block.body_handle)
            .ok_or(LifecycleError::StaleBlockHandle(id))?;
        let pos = body.translation();
        body.set_translation(Vector::new(x, pos.y), true);
        Ok(())
    }

    /// Removes a block and its body (boundary collaborator).
    pub fn remove_block(&mut self, world: &mut PhysicsWorld, id: BlockId) -> bool {
        if let Some(pos) = self.blocks.iter().position(|b| b.id == id) {
            let block = self.blocks.remove(pos);
            world.remove_rigid_body(block.body_handle);
            if self.active == Some(id) {
                self.active = None;
            }
            true
        } else {
            false
        }
    }

    /// Forgets blocks whose bodies were removed from the world externally.
    pub fn prune_destroyed(&mut self, world: &PhysicsWorld) -> Vec<BlockId> {
        let mut removed = Vec::new();
        self.blocks.retain(|block| {
            let alive = world.get_rigid_body(block.body_handle).is_some();
            if !alive {
                removed.push(block.id);
            }
            alive
        });
        if let Some(active) = self.active {
            if removed.contains(&active) {
                self.active = None;
            }
        }
        removed
    }

    /// Whether the block still exists in both the manager and the world.
    pub fn is_alive(&self, world: &PhysicsWorld, id: BlockId) -> bool {
        self.get_block(id)
            .is_some_and(|block| world.get_rigid_body(block.body_handle).is_some())
    }

    pub fn get_block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    fn get_block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    pub fn state_of(&self, id: BlockId) -> Option<LifecycleState> {
        self.get_block(id).map(|b| b.state)
    }

    /// The block currently in `Spawned` or `Falling`, if any.
    pub fn active(&self) -> Option<&Block> {
        self.active.and_then(|id| self.get_block(id))
    }

    pub fn active_id(&self) -> Option<BlockId> {
        self.active
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Number of blocks in `Spawned` or `Falling`.
    pub fn active_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_active()).count()
    }

    pub fn settled_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.state == LifecycleState::Settled)
            .count()
    }

    /// Gets the position of a block.
    pub fn get_block_position(&self, world: &PhysicsWorld, id: BlockId) -> Option<(f32, f32)> {
        self.get_block(id).and_then(|block| {
            world.get_rigid_body(block.body_handle).map(|body| {
                let pos = body.translation();
                (pos.x, pos.y)
            })
        })
    }

    /// Gets the velocity of a block.
    pub fn get_block_velocity(&self, world: &PhysicsWorld, id: BlockId) -> Option<(f32, f32)> {
        self.get_block(id).and_then(|block| {
            world.get_rigid_body(block.body_handle).map(|body| {
                let vel = body.linvel();
                (vel.x, vel.y)
            })
        })
    }
}
