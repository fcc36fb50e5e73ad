//! Fracture/Split Application
//!
//! Turns solver split events into physics bookkeeping:
//! - partition check of every event against the parent's prior node set
//! - support detection (any support node → fixed body)
//! - optional culling of one-node debris
//! - planner-driven body reuse, queued body creation and collider migration
//!
//! Physics mutations are queued in `SplitQueue` and only applied by
//! `flush_pending`, so handles stay valid while a step is in flight.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use bevy::math::Vec3;
use tracing::{debug, error, trace};

use crate::engine::{DestructionCore, StepReport};
use crate::error::DestructionError;
use crate::physics::{BodyDesc, BodyHandle, BodyKind, ColliderHandle, PhysicsWorld};
use crate::planner::{plan_split_migration, ExistingBodyState};
use crate::profiling::{ProfileStage, StageTimer};
use crate::solver::{FractureCommand, SplitChildNodes, SplitEvent, StressSolver};
use crate::structure::SplitChild;
use crate::{ActorIndex, BondIndex, NodeIndex};

/// Checks that `children` partition `prior` exactly
pub fn validate_split_partition(
    parent: ActorIndex,
    prior: &BTreeSet<NodeIndex>,
    children: &[SplitChildNodes],
) -> Result<(), DestructionError> {
    let violation = |reason: String| DestructionError::PartitionViolation { parent, reason };

    let mut seen = BTreeSet::new();
    for child in children {
        for &node in &child.nodes {
            if !prior.contains(&node) {
                return Err(violation(format!("node {node} was not in the parent")));
            }
            if !seen.insert(node) {
                return Err(violation(format!("node {node} appears in more than one child")));
            }
        }
    }
    if let Some(missing) = prior.difference(&seen).next() {
        return Err(violation(format!("node {missing} is missing from every child")));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingBody {
    pub actor: ActorIndex,
    pub nodes: Vec<NodeIndex>,
    pub is_support: bool,
    /// Body the nodes currently sit on; supplies pose and velocity
    pub source: Option<BodyHandle>,
}

/// Deferred physics work, flushed in this order: bodies, migrations,
/// collider removals, body removals
#[derive(Debug, Default)]
pub(crate) struct SplitQueue {
    pub bodies: Vec<PendingBody>,
    pub migrations: Vec<(NodeIndex, BodyHandle)>,
    pub collider_removals: Vec<ColliderHandle>,
    pub body_removals: Vec<BodyHandle>,
    /// Bond cuts from destroyed nodes and user requests
    pub bond_cuts: VecDeque<BondIndex>,
}

impl<P: PhysicsWorld, S: StressSolver> DestructionCore<P, S> {
    pub(crate) fn apply_fracture(&mut self, commands: Vec<FractureCommand>, report: &mut StepReport) {
        if commands.is_empty() {
            return;
        }
        for command in &commands {
            for &bond in &command.bonds {
                self.bonds.mark_removed(bond);
            }
        }
        let events = self.solver.apply_fracture_commands(&commands);
        for event in events {
            match self.apply_split_event(&event, report) {
                Ok(()) => report.split_events.push(event),
                Err(e) => error!(parent = event.parent_actor_index, "split skipped: {e}"),
            }
        }
    }

    fn apply_split_event(
        &mut self,
        event: &SplitEvent,
        report: &mut StepReport,
    ) -> Result<(), DestructionError> {
        let parent = event.parent_actor_index;
        let prior = self
            .ownership
            .actor_nodes(parent)
            .cloned()
            .ok_or_else(|| DestructionError::PartitionViolation {
                parent,
                reason: "unknown parent actor".into(),
            })?;
        validate_split_partition(parent, &prior, &event.children)?;

        // Support detection runs before any table is touched
        let mut children = Vec::with_capacity(event.children.len());
        for (index, child) in event.children.iter().enumerate() {
            let mut live = Vec::with_capacity(child.nodes.len());
            let mut is_support = false;
            for &node in &child.nodes {
                let segment = self
                    .segments
                    .get(node as usize)
                    .ok_or(DestructionError::MissingSegment(node))?;
                if !segment.destroyed {
                    live.push(node);
                    is_support |= segment.is_support;
                }
            }
            children.push(SplitChild {
                index,
                actor_index: child.actor_index,
                nodes: live,
                is_support,
            });
        }

        let parent_body = self.ownership.remove_actor(parent);
        // A parent still waiting for its body hands that body's source on to the children
        let source = match parent_body {
            Some(body) => Some(body),
            None => self.take_pending_body(parent).and_then(|p| p.source),
        };
        for child in &event.children {
            for &node in &child.nodes {
                let live = !self.segments[node as usize].destroyed;
                self.ownership
                    .set_node_actor(node, live.then_some(child.actor_index));
            }
            self.ownership
                .set_actor_nodes(child.actor_index, child.nodes.iter().copied().collect());
        }

        if self.config.skip_single_bodies {
            for child in &mut children {
                if !child.is_support && child.nodes.len() == 1 {
                    let node = child.nodes[0];
                    if self.destroy_node(node)? {
                        trace!(node, "single-node fragment culled");
                        report.destroyed_nodes.push(node);
                    }
                    child.nodes.clear();
                }
            }
        }
        let live_children: Vec<SplitChild> =
            children.into_iter().filter(|c| !c.nodes.is_empty()).collect();

        let existing: Vec<ExistingBodyState> = parent_body
            .and_then(|body| {
                let state = self.physics.body_state(body)?;
                let owned = self.ownership.body_nodes(body)?;
                Some(ExistingBodyState {
                    handle: body,
                    node_indices: owned.intersection(&prior).copied().collect(),
                    is_fixed: state.is_fixed,
                })
            })
            .into_iter()
            .collect();

        let timer = StageTimer::start(self.profiler.as_deref(), ProfileStage::SplitPlanning);
        let plan = plan_split_migration(&existing, &live_children);
        timer.finish(self.profiler.as_deref());

        let mut parent_reused = false;
        for entry in &plan.reuse {
            let Some(child) = live_children.iter().find(|c| c.index == entry.child_index) else {
                continue;
            };
            let body = entry.body;
            parent_reused |= Some(body) == parent_body;
            self.ownership.bind_actor(child.actor_index, body);

            let mut owned = self.ownership.body_nodes(body).cloned().unwrap_or_default();
            owned.retain(|n| !prior.contains(n));
            owned.extend(child.nodes.iter().copied());
            self.ownership.set_body_nodes(body, owned);

            for &node in &child.nodes {
                self.damage.set_owner(node, Some(body));
                if self.segments[node as usize].body != body {
                    self.split_queue.migrations.push((node, body));
                }
            }
        }

        for entry in &plan.create {
            let Some(child) = live_children.iter().find(|c| c.index == entry.child_index) else {
                continue;
            };
            self.split_queue.bodies.push(PendingBody {
                actor: child.actor_index,
                nodes: child.nodes.clone(),
                is_support: child.is_support,
                source,
            });
        }

        if let (Some(body), false) = (parent_body, parent_reused) {
            let remaining: BTreeSet<NodeIndex> = self
                .ownership
                .body_nodes(body)
                .map(|owned| owned.difference(&prior).copied().collect())
                .unwrap_or_default();
            if remaining.is_empty() && !self.ownership.body_in_use(body) {
                self.ownership.forget_body(body);
                self.split_queue.body_removals.push(body);
            } else {
                self.ownership.set_body_nodes(body, remaining);
            }
        }

        debug!(
            parent,
            pending_parent = parent_body.is_none(),
            children = event.children.len(),
            reused = plan.reuse.len(),
            created = plan.create.len(),
            "split applied"
        );
        Ok(())
    }

    /// Marks `node` destroyed and queues its collider removal and bond cuts.
    /// Returns false when it already was destroyed.
    pub(crate) fn destroy_node(&mut self, node: NodeIndex) -> Result<bool, DestructionError> {
        let segment = self
            .segments
            .get_mut(node as usize)
            .ok_or(DestructionError::MissingSegment(node))?;
        if segment.destroyed {
            return Ok(false);
        }
        segment.destroyed = true;
        if segment.health.is_some() {
            segment.health = Some(0.0);
        }
        let body = segment.body;
        let collider = segment.collider.take();

        self.damage.force_destroy(node);
        self.damage.set_owner(node, None);
        self.ownership.set_node_actor(node, None);

        if let Some(collider) = collider {
            self.physics.set_collider_enabled(collider, false);
            self.ownership.unmap_collider(collider);
            self.split_queue.collider_removals.push(collider);
        }
        self.split_queue.bond_cuts.extend(self.bonds.node_bonds(node));

        if self.ownership.remove_body_node(body, node) {
            let bound: Vec<ActorIndex> = self
                .ownership
                .actors()
                .filter(|(_, b)| **b == body)
                .map(|(a, _)| *a)
                .collect();
            for actor in bound {
                self.ownership.unbind_actor(actor);
            }
            self.ownership.forget_body(body);
            self.split_queue.body_removals.push(body);
        }
        for pending in &mut self.split_queue.bodies {
            pending.nodes.retain(|&n| n != node);
        }

        debug!(node, "node destroyed");
        Ok(true)
    }

    /// Applies queued bond cuts until no further split produces new ones
    pub(crate) fn flush_bond_cuts(&mut self, report: &mut StepReport) {
        while !self.split_queue.bond_cuts.is_empty() {
            let mut by_actor: BTreeMap<ActorIndex, Vec<BondIndex>> = BTreeMap::new();
            while let Some(bond) = self.split_queue.bond_cuts.pop_front() {
                if self.bonds.is_removed(bond) {
                    continue;
                }
                let Some(node0) = self.bonds.get(bond).map(|b| b.node0) else {
                    continue;
                };
                let Some(actor) = self.ownership.solver_actor(node0) else {
                    continue;
                };
                let bonds = by_actor.entry(actor).or_default();
                if !bonds.contains(&bond) {
                    bonds.push(bond);
                }
            }
            let commands: Vec<FractureCommand> = by_actor
                .into_iter()
                .map(|(actor_index, bonds)| FractureCommand { actor_index, bonds })
                .collect();
            self.apply_fracture(commands, report);
        }
    }

    fn take_pending_body(&mut self, actor: ActorIndex) -> Option<PendingBody> {
        let at = self.split_queue.bodies.iter().position(|p| p.actor == actor)?;
        Some(self.split_queue.bodies.remove(at))
    }

    /// Creates queued bodies, migrates colliders, then removes what is unused
    pub(crate) fn flush_pending(&mut self) {
        let timer = StageTimer::start(self.profiler.as_deref(), ProfileStage::Flush);

        for pending in std::mem::take(&mut self.split_queue.bodies) {
            let live: Vec<NodeIndex> = pending
                .nodes
                .iter()
                .copied()
                .filter(|&n| !self.segments[n as usize].destroyed)
                .collect();
            if live.is_empty() {
                continue;
            }
            let body = self.create_child_body(&pending, &live);
            self.ownership.bind_actor(pending.actor, body);
            self.ownership.set_body_nodes(body, live.iter().copied().collect());
            self.split_queue
                .migrations
                .extend(live.iter().map(|&n| (n, body)));
            trace!(actor = pending.actor, nodes = live.len(), "body created for fragment");
        }

        for (node, body) in std::mem::take(&mut self.split_queue.migrations) {
            let segment = &mut self.segments[node as usize];
            if segment.destroyed {
                continue;
            }
            segment.body = body;
            if let Some(collider) = segment.collider {
                self.physics
                    .set_collider_parent(collider, body, segment.base_local_offset);
            }
            self.damage.set_owner(node, Some(body));
        }

        for collider in std::mem::take(&mut self.split_queue.collider_removals) {
            self.physics.remove_collider(collider);
        }

        for body in std::mem::take(&mut self.split_queue.body_removals) {
            let unused = !self.ownership.body_in_use(body)
                && self
                    .ownership
                    .body_nodes(body)
                    .map_or(true, |nodes| nodes.is_empty());
            if unused {
                self.physics.remove_body(body);
                self.ownership.forget_body(body);
            }
        }

        timer.finish(self.profiler.as_deref());
    }

    /// New body at the source pose, carrying the source's motion at the child's centre of mass
    fn create_child_body(&mut self, pending: &PendingBody, live: &[NodeIndex]) -> BodyHandle {
        let source = pending
            .source
            .and_then(|b| self.physics.body_state(b).map(|s| (b, s)));
        let kind = if pending.is_support {
            BodyKind::Fixed
        } else {
            BodyKind::Dynamic
        };

        let mut desc = BodyDesc::new(kind);
        if let Some((source_body, state)) = source {
            desc = desc.with_pose(state.position, state.rotation);
            if !pending.is_support && !state.is_fixed {
                let (weighted, total) = live.iter().fold((Vec3::ZERO, 0.0f32), |(acc, m), &n| {
                    let node = &self.nodes[n as usize];
                    let mass = node.mass.max(1e-6);
                    (acc + node.centroid * mass, m + mass)
                });
                let com = state.to_world_point(weighted / total);
                let linvel = self.physics.velocity_at_point(source_body, com);
                desc = desc.with_velocity(linvel, state.angvel);
            }
        }
        self.physics.create_body(&desc)
    }
}
