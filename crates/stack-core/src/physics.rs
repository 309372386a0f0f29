//! Physics simulation using `Rapier2D` with deterministic behavior.
//!
//! Y grows upward and gravity pulls toward -Y. Bodies owned by the game are
//! tagged through rapier `user_data` so the world can be queried by role.

use parking_lot::Mutex;
use rapier2d::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Fixed timestep for physics simulation (60Hz).
pub const PHYSICS_DT: f32 = 1.0 / 60.0;

/// Default gravity vector (downward, in world units/s²).
pub fn default_gravity() -> Vector {
    Vector::new(0.0, -9.81)
}

/// Converts a duration in seconds to a whole number of fixed steps.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn secs_to_frames(secs: f32) -> u32 {
    if secs.is_finite() && secs > 0.0 {
        (secs / PHYSICS_DT).round() as u32
    } else {
        0
    }
}

/// Type tags for user_data encoding.
pub const USER_DATA_BLOCK: u64 = 1;
pub const USER_DATA_GROUND: u64 = 2;

/// Encodes a type tag and ID into u128 user_data.
pub fn encode_user_data(type_tag: u64, id: u64) -> u128 {
    (u128::from(type_tag) << 64) | u128::from(id)
}

/// Decodes u128 user_data into (type_tag, id).
#[allow(clippy::cast_possible_truncation)]
pub fn decode_user_data(user_data: u128) -> (u64, u64) {
    let type_tag = (user_data >> 64) as u64;
    let id = user_data as u64;
    (type_tag, id)
}

/// Collects rapier collision events emitted during a single step.
#[derive(Default)]
struct CollisionCollector {
    events: Mutex<Vec<CollisionEvent>>,
}

impl CollisionCollector {
    fn into_events(self) -> Vec<CollisionEvent> {
        self.events.into_inner()
    }
}

impl EventHandler for CollisionCollector {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        event: CollisionEvent,
        _contact_pair: Option<&ContactPair>,
    ) {
        self.events.lock().push(event);
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
    }
}

/// Physics world containing all `Rapier2D` components for deterministic simulation.
#[derive(Serialize, Deserialize)]
pub struct PhysicsWorld {
    pub rigid_body_set: RigidBodySet,
    pub collider_set: ColliderSet,
    pub integration_parameters: IntegrationParameters,
    #[serde(skip, default = "PhysicsPipeline::new")]
    pub physics_pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub impulse_joint_set: ImpulseJointSet,
    pub multibody_joint_set: MultibodyJointSet,
    pub ccd_solver: CCDSolver,
    pub gravity: Vector,
    pub frame: u64,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PhysicsWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicsWorld")
            .field("frame", &self.frame)
            .field("rigid_body_count", &self.rigid_body_set.len())
            .field("collider_count", &self.collider_set.len())
            .field("gravity", &self.gravity)
            .finish_non_exhaustive()
    }
}

impl PhysicsWorld {
    /// Creates a new physics world with default settings.
    pub fn new() -> Self {
        Self::with_gravity(default_gravity())
    }

    /// Creates a new physics world with custom gravity.
    pub fn with_gravity(gravity: Vector) -> Self {
        let integration_parameters = IntegrationParameters {
            dt: PHYSICS_DT,
            ..Default::default()
        };

        Self {
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            integration_parameters,
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            gravity,
            frame: 0,
        }
    }

    /// Advances the physics simulation by one fixed timestep.
    pub fn step(&mut self) {
        self.step_with_handler(&());
    }

    /// Advances one fixed timestep and returns the collision events it produced.
    pub fn step_with_events(&mut self) -> Vec<CollisionEvent> {
        let collector = CollisionCollector::default();
        self.step_with_handler(&collector);
        collector.into_events()
    }

    fn step_with_handler(&mut self, events: &dyn EventHandler) {
        self.physics_pipeline.step(
            self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            &(),
            events,
        );
        self.frame += 1;
    }

    /// Advances the physics simulation by multiple steps.
    pub fn step_n(&mut self, n: u32) {
        for _ in 0..n {
            self.step();
        }
    }

    /// Adds a rigid body to the world and returns its handle.
    pub fn add_rigid_body(&mut self, rigid_body: RigidBody) -> RigidBodyHandle {
        self.rigid_body_set.insert(rigid_body)
    }

    /// Adds a collider attached to a rigid body.
    pub fn add_collider(&mut self, collider: Collider, parent: RigidBodyHandle) -> ColliderHandle {
        self.collider_set
            .insert_with_parent(collider, parent, &mut self.rigid_body_set)
    }

    /// Removes a rigid body and its attached colliders.
    pub fn remove_rigid_body(&mut self, handle: RigidBodyHandle) {
        self.rigid_body_set.remove(
            handle,
            &mut self.island_manager,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            true,
        );
    }

    /// Gets an immutable reference to a rigid body.
    pub fn get_rigid_body(&self, handle: RigidBodyHandle) -> Option<&RigidBody> {
        self.rigid_body_set.get(handle)
    }

    /// Gets a mutable reference to a rigid body.
    pub fn get_rigid_body_mut(&mut self, handle: RigidBodyHandle) -> Option<&mut RigidBody> {
        self.rigid_body_set.get_mut(handle)
    }

    /// Returns the `(tag, id)` pair of the body owning a collider, if tagged.
    pub fn collider_tag(&self, handle: ColliderHandle) -> Option<(u64, u64)> {
        let collider = self.collider_set.get(handle)?;
        let user_data = match collider.parent() {
            Some(parent) => self.rigid_body_set.get(parent)?.user_data,
            None => collider.user_data,
        };
        if user_data == 0 {
            return None;
        }
        Some(decode_user_data(user_data))
    }

    /// True if the collider currently has at least one solver contact.
    pub fn has_active_contact(&self, handle: ColliderHandle) -> bool {
        self.narrow_phase
            .contact_pairs_with(handle)
            .any(ContactPair::has_any_active_contact)
    }

    /// Enumerates `(id, handle)` for every rigid body carrying `type_tag`.
    pub fn tagged_bodies(&self, type_tag: u64) -> impl Iterator<Item = (u64, RigidBodyHandle)> + '_ {
        self.rigid_body_set.iter().filter_map(move |(handle, body)| {
            let (tag, id) = decode_user_data(body.user_data);
            (body.user_data != 0 && tag == type_tag).then_some((id, handle))
        })
    }

    /// Half of the vertical extent of the first cuboid collider of a body.
    pub fn body_half_height(&self, handle: RigidBodyHandle) -> Option<f32> {
        let body = self.rigid_body_set.get(handle)?;
        body.colliders().iter().find_map(|collider| {
            self.collider_set
                .get(*collider)
                .and_then(|c| c.shape().as_cuboid())
                .map(|cuboid| cuboid.half_extents.y)
        })
    }

    /// Computes a deterministic hash of the current physics state.
    pub fn compute_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        self.frame.hash(&mut hasher);

        for (handle, body) in self.rigid_body_set.iter() {
            let (index, generation) = handle.into_raw_parts();
            index.hash(&mut hasher);
            generation.hash(&mut hasher);

            let pos = body.translation();
            hash_f32(pos.x, &mut hasher);
            hash_f32(pos.y, &mut hasher);

            let rot = body.rotation().angle();
            hash_f32(rot, &mut hasher);

            let linvel = body.linvel();
            hash_f32(linvel.x, &mut hasher);
            hash_f32(linvel.y, &mut hasher);

            let angvel = body.angvel();
            hash_f32(angvel, &mut hasher);
        }

        hasher.finish()
    }

    /// Returns the current simulation frame number.
    pub fn current_frame(&self) -> u64 {
        self.frame
    }
}

/// Hashes a f32 value by converting to bits.
fn hash_f32(value: f32, hasher: &mut impl Hasher) {
    value.to_bits().hash(hasher);
}
