//! Physics world seam — the rigid-body engine as seen by the destruction core.
//!
//! The core never touches backend types directly: bodies and colliders are
//! addressed by generational handles, contacts arrive as `ContactForceEvent`s
//! and rollback goes through either a whole-world snapshot or per-body states.

pub mod rapier;

use bevy::math::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::DestructionError;

/// Generational rigid-body handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyHandle {
    pub index: u32,
    pub generation: u32,
}

impl BodyHandle {
    pub const fn from_raw_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

/// Generational collider handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColliderHandle {
    pub index: u32,
    pub generation: u32,
}

impl ColliderHandle {
    pub const fn from_raw_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyKind {
    Fixed,
    Dynamic,
}

/// Pose and velocity of one body; also the per-body snapshot record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    pub position: Vec3,
    pub rotation: Quat,
    pub linvel: Vec3,
    pub angvel: Vec3,
    pub is_fixed: bool,
}

impl Default for BodyState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            linvel: Vec3::ZERO,
            angvel: Vec3::ZERO,
            is_fixed: false,
        }
    }
}

impl BodyState {
    /// World point → body frame
    pub fn to_local_point(&self, world: Vec3) -> Vec3 {
        self.rotation.inverse() * (world - self.position)
    }

    /// World vector → body frame
    pub fn to_local_vector(&self, world: Vec3) -> Vec3 {
        self.rotation.inverse() * world
    }

    /// Body frame point → world
    pub fn to_world_point(&self, local: Vec3) -> Vec3 {
        self.position + self.rotation * local
    }
}

#[derive(Debug, Clone)]
pub struct BodyDesc {
    pub kind: BodyKind,
    pub position: Vec3,
    pub rotation: Quat,
    pub linvel: Vec3,
    pub angvel: Vec3,
    pub ccd: bool,
}

impl BodyDesc {
    pub fn new(kind: BodyKind) -> Self {
        Self {
            kind,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            linvel: Vec3::ZERO,
            angvel: Vec3::ZERO,
            ccd: false,
        }
    }

    pub fn with_pose(mut self, position: Vec3, rotation: Quat) -> Self {
        self.position = position;
        self.rotation = rotation;
        self
    }

    pub fn with_velocity(mut self, linvel: Vec3, angvel: Vec3) -> Self {
        self.linvel = linvel;
        self.angvel = angvel;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColliderShape {
    Cuboid { half_extents: Vec3 },
    Ball { radius: f32 },
    ConvexHull { points: Vec<Vec3> },
}

/// Membership/filter bit masks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionGroups {
    pub memberships: u32,
    pub filter: u32,
}

impl CollisionGroups {
    pub const STRUCTURE: u32 = 1 << 0;
    pub const GROUND: u32 = 1 << 1;
    pub const PROJECTILE: u32 = 1 << 2;
    pub const ALL: u32 = u32::MAX;

    pub const fn new(memberships: u32, filter: u32) -> Self {
        Self {
            memberships,
            filter,
        }
    }

    /// Structure pieces, optionally ignoring each other
    pub const fn structure(single_collision: bool) -> Self {
        if single_collision {
            Self::new(Self::STRUCTURE, Self::GROUND | Self::PROJECTILE)
        } else {
            Self::new(Self::STRUCTURE, Self::ALL)
        }
    }

    pub const fn ground() -> Self {
        Self::new(Self::GROUND, Self::ALL)
    }

    pub const fn projectile() -> Self {
        Self::new(Self::PROJECTILE, Self::STRUCTURE | Self::GROUND)
    }

    pub fn interacts_with(&self, other: &CollisionGroups) -> bool {
        (self.memberships & other.filter) != 0 && (other.memberships & self.filter) != 0
    }
}

#[derive(Debug, Clone)]
pub struct ColliderDesc {
    pub shape: ColliderShape,
    pub local_offset: Vec3,
    pub mass: f32,
    pub friction: f32,
    pub restitution: f32,
    pub groups: CollisionGroups,
    pub contact_force_events: bool,
}

/// One contact-force report from a physics step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactForceEvent {
    pub collider1: ColliderHandle,
    pub collider2: ColliderHandle,
    /// Sum of forces between the pair; applied to collider1, opposite on collider2
    pub total_force: Vec3,
    /// Approximate world-space contact point
    pub point: Vec3,
}

impl ContactForceEvent {
    pub fn magnitude(&self) -> f32 {
        self.total_force.length()
    }
}

/// Rigid-body engine as consumed by the destruction core
pub trait PhysicsWorld {
    type WorldSnapshot;

    fn step(&mut self, dt: f32) -> Result<(), DestructionError>;
    /// Moves every contact-force event of the last step into `out`
    fn drain_contact_forces(&mut self, out: &mut Vec<ContactForceEvent>);

    fn create_body(&mut self, desc: &BodyDesc) -> BodyHandle;
    fn remove_body(&mut self, body: BodyHandle);
    fn create_collider(&mut self, desc: &ColliderDesc, parent: BodyHandle) -> ColliderHandle;
    fn remove_collider(&mut self, collider: ColliderHandle);
    fn set_collider_enabled(&mut self, collider: ColliderHandle, enabled: bool);
    fn set_collider_parent(&mut self, collider: ColliderHandle, parent: BodyHandle, local_offset: Vec3);
    fn set_collision_groups(&mut self, collider: ColliderHandle, groups: CollisionGroups);
    fn collider_parent(&self, collider: ColliderHandle) -> Option<BodyHandle>;

    fn body_state(&self, body: BodyHandle) -> Option<BodyState>;
    fn set_body_state(&mut self, body: BodyHandle, state: &BodyState);
    fn velocity_at_point(&self, body: BodyHandle, world_point: Vec3) -> Vec3;
    fn apply_impulse_at_point(&mut self, body: BodyHandle, impulse: Vec3, world_point: Vec3);
    fn set_gravity(&mut self, gravity: Vec3);

    fn snapshot_world(&self) -> Self::WorldSnapshot;
    fn restore_world(&mut self, snapshot: Self::WorldSnapshot) -> Result<(), DestructionError>;
}
