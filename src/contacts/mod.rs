//! Contact Draining & Force Injection
//!
//! Per contact-force event:
//! 1. collider → node (one rebuild of the collider map per drain on a miss)
//! 2. relative surface velocity between the owning bodies
//! 3. speed factor scales the magnitude used for damage
//! 4. the physical force goes to the solver in the actor's body frame,
//!    `total_force` pushes collider2, so collider2's node gets `+total_force`
//!    and collider1's node the reaction `-total_force`
//! 5. damage is applied now or buffered for the end of a speculative pass

use bevy::math::Vec3;
use tracing::trace;

use crate::damage::{BufferedImpact, ContactKind};
use crate::engine::DestructionCore;
use crate::physics::{ColliderHandle, ContactForceEvent, PhysicsWorld};
use crate::profiling::{ProfileStage, StageTimer};
use crate::solver::StressSolver;
use crate::NodeIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageMode {
    /// Accepted pass: damage lands immediately
    Apply,
    /// Speculative pass: damage waits in the impact buffer
    Buffer,
}

impl<P: PhysicsWorld, S: StressSolver> DestructionCore<P, S> {
    pub(crate) fn drain_contacts(&mut self, dt: f32, mode: DamageMode) {
        let timer = StageTimer::start(self.profiler.as_deref(), ProfileStage::ContactDrain);
        let mut events = std::mem::take(&mut self.contact_events);
        events.clear();
        self.physics.drain_contact_forces(&mut events);

        let mut rebuilt = false;
        for event in &events {
            self.process_contact(event, dt, mode, &mut rebuilt);
        }

        events.clear();
        self.contact_events = events;
        timer.finish(self.profiler.as_deref());
    }

    pub(crate) fn resolve_collider(
        &mut self,
        collider: ColliderHandle,
        rebuilt: &mut bool,
    ) -> Option<NodeIndex> {
        if let Some(node) = self.ownership.collider_node(collider) {
            return Some(node);
        }
        let is_ground = self.ground.is_some_and(|(_, c)| c == collider);
        if is_ground || self.is_projectile_collider(collider) || *rebuilt {
            return None;
        }
        *rebuilt = true;
        self.ownership.rebuild_collider_map(&self.segments);
        trace!(?collider, "collider map rebuilt after a miss");
        self.ownership.collider_node(collider)
    }

    fn process_contact(
        &mut self,
        event: &ContactForceEvent,
        dt: f32,
        mode: DamageMode,
        rebuilt: &mut bool,
    ) {
        let node1 = self.resolve_collider(event.collider1, rebuilt);
        let node2 = self.resolve_collider(event.collider2, rebuilt);
        if node1.is_none() && node2.is_none() {
            return;
        }
        let magnitude = event.magnitude();
        if !magnitude.is_finite() || !event.point.is_finite() {
            return;
        }

        let surface_velocity = |collider| {
            self.physics
                .collider_parent(collider)
                .map(|body| self.physics.velocity_at_point(body, event.point))
                .unwrap_or(Vec3::ZERO)
        };
        let relative_speed =
            (surface_velocity(event.collider1) - surface_velocity(event.collider2)).length();
        let kind = if node1.is_some() && node2.is_some() {
            ContactKind::Internal
        } else {
            ContactKind::External
        };
        let damage_force = magnitude * self.damage.speed_factor(relative_speed, kind);

        if let Some(node) = node1 {
            self.inject_node_force(node, event.point, -event.total_force);
        }
        if let Some(node) = node2 {
            self.inject_node_force(node, event.point, event.total_force);
        }

        if !self.damage.enabled() {
            return;
        }
        let impact = match (node1, node2) {
            (Some(node_a), Some(node_b)) => BufferedImpact::Internal {
                node_a,
                node_b,
                force: damage_force,
                dt,
                local_points: self
                    .node_local_point(node_a, event.point)
                    .zip(self.node_local_point(node_b, event.point)),
            },
            (Some(node), None) | (None, Some(node)) => BufferedImpact::External {
                node,
                force: damage_force,
                dt,
                local_point: self.node_local_point(node, event.point),
            },
            (None, None) => return,
        };
        match mode {
            DamageMode::Apply => self.damage.replay(std::slice::from_ref(&impact)),
            DamageMode::Buffer => self.buffered_impacts.push(impact),
        }
    }

    /// World point in the frame of the body holding `node`
    fn node_local_point(&self, node: NodeIndex, world: Vec3) -> Option<Vec3> {
        let segment = self.segments.get(node as usize)?;
        self.physics
            .body_state(segment.body)
            .map(|state| state.to_local_point(world))
    }

    /// Adds a world-space force to the solver in the node's actor frame
    pub(crate) fn inject_node_force(&mut self, node: NodeIndex, world_point: Vec3, world_force: Vec3) {
        let Some(actor) = self.ownership.node_actor(node) else {
            return;
        };
        let Some(segment) = self.segments.get(node as usize).filter(|s| !s.destroyed) else {
            return;
        };
        let Some(state) = self.physics.body_state(segment.body) else {
            return;
        };
        self.solver.add_node_force(
            actor,
            node,
            state.to_local_point(world_point),
            state.to_local_vector(world_force),
        );
    }
}
