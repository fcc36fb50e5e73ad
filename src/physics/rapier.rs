//! Rapier backend for the physics seam.
//!
//! Uses the rapier3d crate re-exported by `bevy_rapier3d`, driven directly
//! through a `PhysicsPipeline` so the destruction core controls exactly when
//! a step happens and can clone the whole world for rollback.

use std::panic::{catch_unwind, AssertUnwindSafe};

use bevy::math::{Quat, Vec3};
use bevy_rapier3d::rapier::na::{Quaternion, UnitQuaternion};
use bevy_rapier3d::rapier::prelude::{
    vector, ActiveEvents, CCDSolver, ColliderBuilder, ColliderHandle as RapierColliderHandle,
    ColliderSet, CollisionEvent, ContactForceEvent as RapierContactForceEvent, ContactPair,
    DefaultBroadPhase, EventHandler, Group, ImpulseJointSet, IntegrationParameters,
    InteractionGroups, IslandManager, Isometry, MultibodyJointSet, NarrowPhase, PhysicsPipeline,
    Point, Real, RigidBodyBuilder, RigidBodyHandle, RigidBodySet, Vector,
};
use parking_lot::Mutex;

use super::{
    BodyDesc, BodyHandle, BodyKind, BodyState, ColliderDesc, ColliderHandle, ColliderShape,
    CollisionGroups, ContactForceEvent, PhysicsWorld,
};
use crate::error::DestructionError;

// ============================================================================
// Conversions
// ============================================================================

fn to_vector(v: Vec3) -> Vector<Real> {
    vector![v.x, v.y, v.z]
}

fn from_vector(v: &Vector<Real>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

fn to_rotation(q: Quat) -> UnitQuaternion<Real> {
    UnitQuaternion::new_normalize(Quaternion::new(q.w, q.x, q.y, q.z))
}

fn from_rotation(q: &UnitQuaternion<Real>) -> Quat {
    let c = q.quaternion().coords;
    Quat::from_xyzw(c.x, c.y, c.z, c.w)
}

fn to_isometry(position: Vec3, rotation: Quat) -> Isometry<Real> {
    Isometry::from_parts(to_vector(position).into(), to_rotation(rotation))
}

fn to_body_handle(h: BodyHandle) -> RigidBodyHandle {
    RigidBodyHandle::from_raw_parts(h.index, h.generation)
}

fn from_body_handle(h: RigidBodyHandle) -> BodyHandle {
    let (index, generation) = h.into_raw_parts();
    BodyHandle::from_raw_parts(index, generation)
}

fn to_collider_handle(h: ColliderHandle) -> RapierColliderHandle {
    RapierColliderHandle::from_raw_parts(h.index, h.generation)
}

fn from_collider_handle(h: RapierColliderHandle) -> ColliderHandle {
    let (index, generation) = h.into_raw_parts();
    ColliderHandle::from_raw_parts(index, generation)
}

fn to_interaction_groups(groups: CollisionGroups) -> InteractionGroups {
    InteractionGroups::new(
        Group::from_bits_truncate(groups.memberships),
        Group::from_bits_truncate(groups.filter),
    )
}

// ============================================================================
// Contact collection
// ============================================================================

/// Collects contact-force events during `PhysicsPipeline::step`
#[derive(Default)]
struct ContactForceCollector {
    events: Mutex<Vec<ContactForceEvent>>,
}

impl EventHandler for ContactForceCollector {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _event: CollisionEvent,
        _contact_pair: Option<&ContactPair>,
    ) {
    }

    fn handle_contact_force_event(
        &self,
        dt: Real,
        _bodies: &RigidBodySet,
        colliders: &ColliderSet,
        contact_pair: &ContactPair,
        total_force_magnitude: Real,
    ) {
        let raw = RapierContactForceEvent::from_contact_pair(dt, contact_pair, total_force_magnitude);

        let mut sum = Vector::<Real>::zeros();
        let mut count = 0usize;
        for manifold in &contact_pair.manifolds {
            for contact in &manifold.data.solver_contacts {
                sum += contact.point.coords;
                count += 1;
            }
        }
        let point = if count > 0 {
            from_vector(&(sum / count as Real))
        } else {
            // No solver contacts this step: midpoint of the two collider origins
            let a = colliders.get(raw.collider1).map(|c| from_vector(c.translation()));
            let b = colliders.get(raw.collider2).map(|c| from_vector(c.translation()));
            match (a, b) {
                (Some(a), Some(b)) => (a + b) * 0.5,
                (Some(p), None) | (None, Some(p)) => p,
                (None, None) => Vec3::ZERO,
            }
        };

        self.events.lock().push(ContactForceEvent {
            collider1: from_collider_handle(raw.collider1),
            collider2: from_collider_handle(raw.collider2),
            total_force: from_vector(&raw.total_force),
            point,
        });
    }
}

// ============================================================================
// World
// ============================================================================

/// Everything that a whole-world snapshot has to capture
#[derive(Clone)]
struct RapierState {
    bodies: RigidBodySet,
    colliders: ColliderSet,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
}

impl RapierState {
    fn new() -> Self {
        Self {
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
        }
    }
}

/// Whole-world snapshot for `SnapshotMode::World`
#[derive(Clone)]
pub struct RapierSnapshot {
    state: RapierState,
    step_count: u64,
}

pub struct RapierWorld {
    state: RapierState,
    pipeline: PhysicsPipeline,
    ccd_solver: CCDSolver,
    params: IntegrationParameters,
    gravity: Vector<Real>,
    collector: ContactForceCollector,
    step_count: u64,
}

impl Default for RapierWorld {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, crate::constants::DEFAULT_GRAVITY_Y, 0.0))
    }
}

impl RapierWorld {
    pub fn new(gravity: Vec3) -> Self {
        Self {
            state: RapierState::new(),
            pipeline: PhysicsPipeline::new(),
            ccd_solver: CCDSolver::new(),
            params: IntegrationParameters::default(),
            gravity: to_vector(gravity),
            collector: ContactForceCollector::default(),
            step_count: 0,
        }
    }

    /// Number of successful steps (restored on world rollback)
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn body_count(&self) -> usize {
        self.state.bodies.len()
    }

    pub fn collider_count(&self) -> usize {
        self.state.colliders.len()
    }

    pub fn is_collider_enabled(&self, collider: ColliderHandle) -> bool {
        self.state
            .colliders
            .get(to_collider_handle(collider))
            .map(|c| c.is_enabled())
            .unwrap_or(false)
    }
}

impl PhysicsWorld for RapierWorld {
    type WorldSnapshot = RapierSnapshot;

    fn step(&mut self, dt: f32) -> Result<(), DestructionError> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(DestructionError::PhysicsStep(format!("invalid timestep {dt}")));
        }
        self.params.dt = dt;

        let Self {
            state,
            pipeline,
            ccd_solver,
            params,
            gravity,
            collector,
            ..
        } = self;

        let stepped = catch_unwind(AssertUnwindSafe(|| {
            pipeline.step(
                gravity,
                params,
                &mut state.islands,
                &mut state.broad_phase,
                &mut state.narrow_phase,
                &mut state.bodies,
                &mut state.colliders,
                &mut state.impulse_joints,
                &mut state.multibody_joints,
                ccd_solver,
                None,
                &(),
                &*collector,
            );
        }));

        match stepped {
            Ok(()) => {
                self.step_count += 1;
                Ok(())
            }
            Err(_) => {
                self.collector.events.lock().clear();
                Err(DestructionError::PhysicsStep("rapier pipeline panicked".into()))
            }
        }
    }

    fn drain_contact_forces(&mut self, out: &mut Vec<ContactForceEvent>) {
        out.append(&mut self.collector.events.lock());
    }

    fn create_body(&mut self, desc: &BodyDesc) -> BodyHandle {
        let builder = match desc.kind {
            BodyKind::Fixed => RigidBodyBuilder::fixed(),
            BodyKind::Dynamic => RigidBodyBuilder::dynamic()
                .linvel(to_vector(desc.linvel))
                .angvel(to_vector(desc.angvel))
                .ccd_enabled(desc.ccd),
        };
        let body = builder
            .position(to_isometry(desc.position, desc.rotation))
            .build();
        from_body_handle(self.state.bodies.insert(body))
    }

    fn remove_body(&mut self, body: BodyHandle) {
        let state = &mut self.state;
        state.bodies.remove(
            to_body_handle(body),
            &mut state.islands,
            &mut state.colliders,
            &mut state.impulse_joints,
            &mut state.multibody_joints,
            true,
        );
    }

    fn create_collider(&mut self, desc: &ColliderDesc, parent: BodyHandle) -> ColliderHandle {
        let builder = match &desc.shape {
            ColliderShape::Cuboid { half_extents } => {
                ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
            }
            ColliderShape::Ball { radius } => ColliderBuilder::ball(*radius),
            ColliderShape::ConvexHull { points } => {
                let hull: Vec<Point<Real>> =
                    points.iter().map(|p| Point::new(p.x, p.y, p.z)).collect();
                ColliderBuilder::convex_hull(&hull).unwrap_or_else(|| {
                    // Degenerate hull: bounding ball keeps the piece simulated
                    let radius = points.iter().map(|p| p.length()).fold(0.05, f32::max);
                    ColliderBuilder::ball(radius)
                })
            }
        };

        let mut builder = builder
            .translation(to_vector(desc.local_offset))
            .friction(desc.friction)
            .restitution(desc.restitution)
            .collision_groups(to_interaction_groups(desc.groups));
        if desc.mass > 0.0 {
            builder = builder.mass(desc.mass);
        }
        if desc.contact_force_events {
            builder = builder
                .active_events(ActiveEvents::CONTACT_FORCE_EVENTS)
                .contact_force_event_threshold(0.0);
        }

        let state = &mut self.state;
        let handle =
            state
                .colliders
                .insert_with_parent(builder.build(), to_body_handle(parent), &mut state.bodies);
        from_collider_handle(handle)
    }

    fn remove_collider(&mut self, collider: ColliderHandle) {
        let state = &mut self.state;
        state.colliders.remove(
            to_collider_handle(collider),
            &mut state.islands,
            &mut state.bodies,
            true,
        );
    }

    fn set_collider_enabled(&mut self, collider: ColliderHandle, enabled: bool) {
        if let Some(c) = self.state.colliders.get_mut(to_collider_handle(collider)) {
            c.set_enabled(enabled);
        }
    }

    fn set_collider_parent(&mut self, collider: ColliderHandle, parent: BodyHandle, local_offset: Vec3) {
        let state = &mut self.state;
        let handle = to_collider_handle(collider);
        if state.colliders.get(handle).is_none() {
            return;
        }
        state
            .colliders
            .set_parent(handle, Some(to_body_handle(parent)), &mut state.bodies);
        if let Some(c) = state.colliders.get_mut(handle) {
            c.set_position_wrt_parent(Isometry::translation(
                local_offset.x,
                local_offset.y,
                local_offset.z,
            ));
        }
    }

    fn set_collision_groups(&mut self, collider: ColliderHandle, groups: CollisionGroups) {
        if let Some(c) = self.state.colliders.get_mut(to_collider_handle(collider)) {
            c.set_collision_groups(to_interaction_groups(groups));
        }
    }

    fn collider_parent(&self, collider: ColliderHandle) -> Option<BodyHandle> {
        self.state
            .colliders
            .get(to_collider_handle(collider))
            .and_then(|c| c.parent())
            .map(from_body_handle)
    }

    fn body_state(&self, body: BodyHandle) -> Option<BodyState> {
        self.state.bodies.get(to_body_handle(body)).map(|rb| BodyState {
            position: from_vector(rb.translation()),
            rotation: from_rotation(rb.rotation()),
            linvel: from_vector(rb.linvel()),
            angvel: from_vector(rb.angvel()),
            is_fixed: rb.is_fixed(),
        })
    }

    fn set_body_state(&mut self, body: BodyHandle, state: &BodyState) {
        if let Some(rb) = self.state.bodies.get_mut(to_body_handle(body)) {
            rb.set_position(to_isometry(state.position, state.rotation), true);
            if !rb.is_fixed() {
                rb.set_linvel(to_vector(state.linvel), true);
                rb.set_angvel(to_vector(state.angvel), true);
            }
        }
    }

    fn velocity_at_point(&self, body: BodyHandle, world_point: Vec3) -> Vec3 {
        self.state
            .bodies
            .get(to_body_handle(body))
            .map(|rb| {
                from_vector(&rb.velocity_at_point(&Point::new(
                    world_point.x,
                    world_point.y,
                    world_point.z,
                )))
            })
            .unwrap_or(Vec3::ZERO)
    }

    fn apply_impulse_at_point(&mut self, body: BodyHandle, impulse: Vec3, world_point: Vec3) {
        if let Some(rb) = self.state.bodies.get_mut(to_body_handle(body)) {
            if rb.is_dynamic() {
                rb.apply_impulse_at_point(
                    to_vector(impulse),
                    Point::new(world_point.x, world_point.y, world_point.z),
                    true,
                );
            }
        }
    }

    fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = to_vector(gravity);
    }

    fn snapshot_world(&self) -> RapierSnapshot {
        RapierSnapshot {
            state: self.state.clone(),
            step_count: self.step_count,
        }
    }

    fn restore_world(&mut self, snapshot: RapierSnapshot) -> Result<(), DestructionError> {
        self.state = snapshot.state;
        self.step_count = snapshot.step_count;
        self.collector.events.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(local_offset: Vec3, groups: CollisionGroups) -> ColliderDesc {
        ColliderDesc {
            shape: ColliderShape::Cuboid {
                half_extents: Vec3::splat(0.5),
            },
            local_offset,
            mass: 1.0,
            friction: 0.5,
            restitution: 0.0,
            groups,
            contact_force_events: true,
        }
    }

    #[test]
    fn test_handle_roundtrip() {
        let h = BodyHandle::from_raw_parts(7, 3);
        assert_eq!(from_body_handle(to_body_handle(h)), h);
        let c = ColliderHandle::from_raw_parts(11, 2);
        assert_eq!(from_collider_handle(to_collider_handle(c)), c);
    }

    #[test]
    fn test_rotation_roundtrip() {
        let q = Quat::from_rotation_z(0.7) * Quat::from_rotation_x(-0.3);
        let back = from_rotation(&to_rotation(q));
        assert!(back.angle_between(q) < 1e-4);
    }

    #[test]
    fn test_dynamic_body_falls() {
        let mut world = RapierWorld::default();
        let body = world.create_body(
            &BodyDesc::new(BodyKind::Dynamic).with_pose(Vec3::new(0.0, 10.0, 0.0), Quat::IDENTITY),
        );
        world.create_collider(&cube(Vec3::ZERO, CollisionGroups::structure(false)), body);
        for _ in 0..10 {
            world.step(1.0 / 60.0).unwrap();
        }
        let state = world.body_state(body).unwrap();
        assert!(state.position.y < 10.0);
        assert!(state.linvel.y < 0.0);
        assert_eq!(world.step_count(), 10);
    }

    #[test]
    fn test_invalid_timestep_is_error() {
        let mut world = RapierWorld::default();
        assert!(world.step(0.0).is_err());
        assert!(world.step(f32::NAN).is_err());
        assert_eq!(world.step_count(), 0);
    }

    #[test]
    fn test_world_snapshot_restore() {
        let mut world = RapierWorld::default();
        let body = world.create_body(
            &BodyDesc::new(BodyKind::Dynamic).with_pose(Vec3::new(0.0, 5.0, 0.0), Quat::IDENTITY),
        );
        world.create_collider(&cube(Vec3::ZERO, CollisionGroups::structure(false)), body);

        let before = world.body_state(body).unwrap();
        let snapshot = world.snapshot_world();
        for _ in 0..5 {
            world.step(1.0 / 60.0).unwrap();
        }
        assert_ne!(world.body_state(body).unwrap().position, before.position);

        world.restore_world(snapshot).unwrap();
        let after = world.body_state(body).unwrap();
        assert_eq!(after.position, before.position);
        assert_eq!(after.linvel, before.linvel);
        assert_eq!(world.step_count(), 0);
    }

    #[test]
    fn test_body_state_restore() {
        let mut world = RapierWorld::default();
        let body = world.create_body(
            &BodyDesc::new(BodyKind::Dynamic).with_pose(Vec3::new(0.0, 5.0, 0.0), Quat::IDENTITY),
        );
        world.create_collider(&cube(Vec3::ZERO, CollisionGroups::structure(false)), body);
        let saved = world.body_state(body).unwrap();
        world.step(1.0 / 60.0).unwrap();
        world.set_body_state(body, &saved);
        let restored = world.body_state(body).unwrap();
        assert!((restored.position - saved.position).length() < 1e-6);
        assert!((restored.linvel - saved.linvel).length() < 1e-6);
    }

    #[test]
    fn test_collider_reparent_keeps_offset() {
        let mut world = RapierWorld::default();
        let a = world.create_body(&BodyDesc::new(BodyKind::Fixed));
        let b = world.create_body(&BodyDesc::new(BodyKind::Dynamic));
        let c = world.create_collider(&cube(Vec3::new(0.0, 2.0, 0.0), CollisionGroups::structure(false)), a);
        assert_eq!(world.collider_parent(c), Some(a));

        world.set_collider_parent(c, b, Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(world.collider_parent(c), Some(b));
        assert_eq!(world.collider_count(), 1);
    }

    #[test]
    fn test_resting_contact_emits_force_events() {
        let mut world = RapierWorld::default();
        let ground = world.create_body(&BodyDesc::new(BodyKind::Fixed));
        world.create_collider(
            &ColliderDesc {
                shape: ColliderShape::Cuboid {
                    half_extents: Vec3::new(10.0, 0.5, 10.0),
                },
                local_offset: Vec3::new(0.0, -0.5, 0.0),
                mass: 0.0,
                friction: 0.5,
                restitution: 0.0,
                groups: CollisionGroups::ground(),
                contact_force_events: false,
            },
            ground,
        );
        let body = world.create_body(
            &BodyDesc::new(BodyKind::Dynamic).with_pose(Vec3::new(0.0, 0.6, 0.0), Quat::IDENTITY),
        );
        world.create_collider(&cube(Vec3::ZERO, CollisionGroups::structure(false)), body);

        let mut events = Vec::new();
        for _ in 0..30 {
            world.step(1.0 / 60.0).unwrap();
            world.drain_contact_forces(&mut events);
        }
        assert!(!events.is_empty());
        assert!(events.iter().all(|e| e.point.is_finite()));

        let mut again = Vec::new();
        world.drain_contact_forces(&mut again);
        assert!(again.is_empty());
    }
}
