//! Shared fixtures for unit tests.

use rapier2d::prelude::*;

use crate::block::{BlockId, BlockManager};
use crate::physics::{PhysicsWorld, USER_DATA_GROUND, encode_user_data};
use crate::variant::{BlockVariant, Footprint};

/// 1x1 variant worth one point.
pub(crate) fn unit_variant() -> BlockVariant {
    BlockVariant::new("Normal", Footprint::new(1.0, 1.0), 1.0, 1)
}

/// Wide static ground whose top surface sits at `y = 0`.
pub(crate) fn add_ground(world: &mut PhysicsWorld) -> RigidBodyHandle {
    add_ground_at(world, 0.0)
}

/// Wide static ground whose top surface sits at `top_y`.
pub(crate) fn add_ground_at(world: &mut PhysicsWorld, top_y: f32) -> RigidBodyHandle {
    let body = RigidBodyBuilder::fixed()
        .translation(Vector::new(0.0, top_y - 0.5))
        .user_data(encode_user_data(USER_DATA_GROUND, 0))
        .build();
    let handle = world.add_rigid_body(body);
    let collider = ColliderBuilder::cuboid(10.0, 0.5)
        .active_events(ActiveEvents::COLLISION_EVENTS)
        .build();
    world.add_collider(collider, handle);
    handle
}

/// Spawns a block, drops it and settles it in place with the given tilt.
pub(crate) fn settle_block_at(
    world: &mut PhysicsWorld,
    manager: &mut BlockManager,
    variant: BlockVariant,
    x: f32,
    y: f32,
    angle: f32,
) -> BlockId {
    let id = manager.spawn(world, variant, x, y).unwrap();
    manager.request_drop(world, id).unwrap();
    let handle = manager.get_block(id).unwrap().body_handle;
    world
        .get_rigid_body_mut(handle)
        .unwrap()
        .set_rotation(Rotation::from_angle(angle), true);
    manager.mark_settled(world, id, false).unwrap();
    id
}

/// Calls `f` up to `max_ticks` times, returning its first `Some`.
pub(crate) fn run_until<T>(max_ticks: usize, mut f: impl FnMut() -> Option<T>) -> Option<T> {
    (0..max_ticks).find_map(|_| f())
}
