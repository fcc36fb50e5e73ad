//! Destruction Core — Integration Layer
//!
//! Owns the physics world, the stress solver, the damage system and the
//! ownership tables, and exposes the per-frame API:
//!
//! ```text
//!   host ──enqueue/cut/force──► command queues
//!   host ──step()──► spawns + cuts ─► resimulation loop ─► flush ─► StepReport
//!   host ◄──segments()/node_actor_map()/projectiles()/solver_debug_lines()
//! ```

mod projectiles;
mod resim;

pub use projectiles::{Projectile, ProjectileSpawn};

use std::collections::{BTreeSet, VecDeque};

use bevy::math::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{CollisionMode, CoreConfig};
use crate::damage::{BufferedImpact, DamageSystem, NodeHealth};
use crate::error::DestructionError;
use crate::fracture::SplitQueue;
use crate::physics::rapier::RapierWorld;
use crate::physics::{
    BodyDesc, BodyHandle, BodyKind, ColliderDesc, ColliderHandle, ColliderShape, CollisionGroups,
    ContactForceEvent, PhysicsWorld,
};
use crate::profiling::ProfilerSink;
use crate::solver::bond_solver::BondStressSolver;
use crate::solver::{DebugLine, SplitEvent, StressSolver};
use crate::structure::{BondTable, Node, OwnershipTable, ScenarioDesc, Segment};
use crate::{ActorIndex, BondIndex, NodeIndex};

/// Outcome of one `step()` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Physics steps taken, rejected passes included
    pub passes: u32,
    /// At least one pass was rolled back
    pub resimulated: bool,
    /// The pass budget ran out and the frame fell back to a plain step
    pub budget_exhausted: bool,
    /// Physics stepping failed; nothing after the failure was committed
    pub abandoned: bool,
    pub split_events: Vec<SplitEvent>,
    pub destroyed_nodes: Vec<NodeIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ExternalForce {
    pub node: NodeIndex,
    pub point: Vec3,
    pub force: Vec3,
}

/// Default collider: a box of the node's size
pub fn cuboid_shape(_node: NodeIndex, _desc: &Node, size: Vec3) -> ColliderShape {
    ColliderShape::Cuboid {
        half_extents: size * 0.5,
    }
}

pub struct DestructionCore<P: PhysicsWorld = RapierWorld, S: StressSolver = BondStressSolver> {
    pub(crate) config: CoreConfig,
    pub(crate) physics: P,
    pub(crate) solver: S,
    pub(crate) damage: DamageSystem,

    pub(crate) nodes: Vec<Node>,
    pub(crate) bonds: BondTable,
    pub(crate) segments: Vec<Segment>,
    pub(crate) ownership: OwnershipTable,

    pub(crate) ground: Option<(BodyHandle, ColliderHandle)>,
    pub(crate) projectiles: Vec<Projectile>,
    pub(crate) next_projectile_id: u64,

    pub(crate) pending_spawns: VecDeque<ProjectileSpawn>,
    pub(crate) pending_forces: VecDeque<ExternalForce>,
    pub(crate) pending_cuts: VecDeque<BondIndex>,
    pub(crate) split_queue: SplitQueue,

    /// Reused every drain
    pub(crate) contact_events: Vec<ContactForceEvent>,
    pub(crate) buffered_impacts: Vec<BufferedImpact>,

    pub(crate) profiler: Option<Box<dyn ProfilerSink>>,
    pub(crate) frame: u64,
    pub(crate) disposed: bool,
}

impl DestructionCore<RapierWorld, BondStressSolver> {
    /// Rapier world plus the reference bond solver, both from `config`
    pub fn rapier(scenario: &ScenarioDesc, config: CoreConfig) -> Result<Self, DestructionError> {
        let physics = RapierWorld::new(config.gravity);
        let solver = BondStressSolver::new(&scenario.nodes, &scenario.bonds, config.solver.clone())
            .with_material_scale(config.material_scale);
        Self::build(scenario, config, physics, solver)
    }
}

impl<P: PhysicsWorld, S: StressSolver> DestructionCore<P, S> {
    pub fn build(
        scenario: &ScenarioDesc,
        config: CoreConfig,
        physics: P,
        solver: S,
    ) -> Result<Self, DestructionError> {
        Self::build_with_shapes(scenario, config, physics, solver, cuboid_shape)
    }

    /// Like `build`, with a per-node collider shape factory
    pub fn build_with_shapes(
        scenario: &ScenarioDesc,
        config: CoreConfig,
        mut physics: P,
        solver: S,
        mut shape_fn: impl FnMut(NodeIndex, &Node, Vec3) -> ColliderShape,
    ) -> Result<Self, DestructionError> {
        scenario.validate()?;
        config.validate()?;
        physics.set_gravity(config.gravity);

        let node_count = scenario.nodes.len();
        let has_support = scenario.nodes.iter().any(Node::is_support);
        let root_kind = if has_support {
            BodyKind::Fixed
        } else {
            BodyKind::Dynamic
        };
        let root = physics.create_body(&BodyDesc::new(root_kind));

        let ground = config.ground.as_ref().map(|g| {
            let body = physics.create_body(
                &BodyDesc::new(BodyKind::Fixed).with_pose(g.position, Quat::IDENTITY),
            );
            let collider = physics.create_collider(
                &ColliderDesc {
                    shape: ColliderShape::Cuboid {
                        half_extents: g.half_extents,
                    },
                    local_offset: Vec3::ZERO,
                    mass: 0.0,
                    friction: config.friction,
                    restitution: config.restitution,
                    groups: CollisionGroups::ground(),
                    contact_force_events: false,
                },
                body,
            );
            (body, collider)
        });

        let mut damage = DamageSystem::new(config.damage.clone(), &scenario.nodes);
        let mut ownership = OwnershipTable::new(node_count);
        let groups = CollisionGroups::structure(config.collision_mode == CollisionMode::Single);

        let mut segments = Vec::with_capacity(node_count);
        for (i, node) in scenario.nodes.iter().enumerate() {
            let index = i as NodeIndex;
            let size = scenario.node_size(index);
            let collider = physics.create_collider(
                &ColliderDesc {
                    shape: shape_fn(index, node, size),
                    local_offset: node.centroid,
                    mass: node.mass,
                    friction: config.friction,
                    restitution: config.restitution,
                    groups,
                    contact_force_events: true,
                },
                root,
            );
            ownership.map_collider(collider, index);
            damage.set_owner(index, Some(root));
            let health = damage.node_health(index);
            segments.push(Segment {
                node_index: index,
                size,
                is_support: node.is_support(),
                base_local_offset: node.centroid,
                collider: Some(collider),
                body: root,
                destroyed: false,
                health: health.map(|h| h.health),
                max_health: health.map(|h| h.max_health),
            });
        }

        ownership.set_body_nodes(root, (0..node_count as NodeIndex).collect());
        for actor in solver.actors() {
            for &node in &actor.nodes {
                ownership.set_node_actor(node, Some(actor.actor_index));
            }
            ownership.set_actor_nodes(actor.actor_index, actor.nodes.iter().copied().collect());
            ownership.bind_actor(actor.actor_index, root);
        }

        info!(
            nodes = node_count,
            bonds = scenario.bonds.len(),
            fixed_root = has_support,
            ground = ground.is_some(),
            "destruction core built"
        );

        Ok(Self {
            nodes: scenario.nodes.clone(),
            bonds: BondTable::new(node_count, &scenario.bonds),
            segments,
            ownership,
            ground,
            projectiles: Vec::new(),
            next_projectile_id: 0,
            pending_spawns: VecDeque::new(),
            pending_forces: VecDeque::new(),
            pending_cuts: VecDeque::new(),
            split_queue: SplitQueue::default(),
            contact_events: Vec::new(),
            buffered_impacts: Vec::new(),
            profiler: None,
            frame: 0,
            disposed: false,
            config,
            physics,
            solver,
            damage,
        })
    }

    pub fn with_profiler(mut self, sink: Box<dyn ProfilerSink>) -> Self {
        self.profiler = Some(sink);
        self
    }

    pub fn set_profiler(&mut self, sink: Option<Box<dyn ProfilerSink>>) {
        self.profiler = sink;
    }

    // ========================================================================
    // Command queues
    // ========================================================================

    /// Spawned at the start of the next `step()`
    pub fn enqueue_projectile(&mut self, spawn: ProjectileSpawn) {
        if !self.disposed {
            self.pending_spawns.push_back(spawn);
        }
    }

    /// World-space force on `node`, fed to the solver in the next accepted pass
    pub fn apply_external_force(&mut self, node: NodeIndex, point: Vec3, force: Vec3) {
        if self.disposed || (node as usize) >= self.nodes.len() {
            return;
        }
        self.pending_forces.push_back(ExternalForce { node, point, force });
    }

    /// Queues a bond cut; false when the bond is unknown or already cut
    pub fn cut_bond(&mut self, bond: BondIndex) -> bool {
        if self.disposed || self.bonds.get(bond).is_none() || self.bonds.is_removed(bond) {
            return false;
        }
        self.pending_cuts.push_back(bond);
        true
    }

    /// Queues every live bond of `node`; returns how many were queued
    pub fn cut_node_bonds(&mut self, node: NodeIndex) -> usize {
        let bonds = self.node_bonds(node);
        bonds.into_iter().filter(|&b| self.cut_bond(b)).count()
    }

    pub fn node_bonds(&self, node: NodeIndex) -> Vec<BondIndex> {
        self.bonds.node_bonds(node)
    }

    pub fn node_health(&self, node: NodeIndex) -> Option<NodeHealth> {
        self.damage.node_health(node)
    }

    /// Queues direct damage, committed by the next damage tick
    pub fn apply_node_damage(&mut self, node: NodeIndex, amount: f32) -> bool {
        !self.disposed && self.damage.apply_node_damage(node, amount)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.config.gravity = gravity;
        self.physics.set_gravity(gravity);
    }

    pub fn set_solver_gravity_enabled(&mut self, enabled: bool) {
        self.config.solver_gravity_enabled = enabled;
    }

    /// Toggles structure-vs-structure contacts on every live collider
    pub fn set_single_collision_mode(&mut self, single: bool) {
        self.config.collision_mode = if single {
            CollisionMode::Single
        } else {
            CollisionMode::Full
        };
        let groups = CollisionGroups::structure(single);
        for segment in &self.segments {
            if let (Some(collider), false) = (segment.collider, segment.destroyed) {
                self.physics.set_collision_groups(collider, groups);
            }
        }
    }

    /// Removes every body and collider the core created; later calls are no-ops
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        let bodies: BTreeSet<BodyHandle> = self
            .ownership
            .bodies()
            .map(|(b, _)| *b)
            .chain(self.ownership.actors().map(|(_, b)| *b))
            .chain(self.split_queue.body_removals.iter().copied())
            .collect();
        for body in bodies {
            self.physics.remove_body(body);
        }
        for projectile in self.projectiles.drain(..) {
            self.physics.remove_body(projectile.body);
        }
        if let Some((body, _)) = self.ground.take() {
            self.physics.remove_body(body);
        }
        for segment in &mut self.segments {
            segment.collider = None;
        }
        self.ownership.clear();
        self.split_queue = SplitQueue::default();
        self.pending_spawns.clear();
        self.pending_forces.clear();
        self.pending_cuts.clear();
        self.buffered_impacts.clear();
        self.disposed = true;
        info!("destruction core disposed");
    }

    // ========================================================================
    // Read-only views
    // ========================================================================

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn node_actor_map(&self) -> &[Option<ActorIndex>] {
        self.ownership.node_actor_map()
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    pub fn solver_debug_lines(&self) -> Vec<DebugLine> {
        self.solver.debug_lines()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn physics(&self) -> &P {
        &self.physics
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Body currently holding a live node
    pub fn node_body(&self, node: NodeIndex) -> Option<BodyHandle> {
        self.segments
            .get(node as usize)
            .filter(|s| !s.destroyed)
            .map(|s| s.body)
    }

    /// Bodies holding at least one live structure node
    pub fn live_bodies(&self) -> Vec<BodyHandle> {
        let mut bodies: Vec<BodyHandle> = self
            .ownership
            .bodies()
            .filter(|(_, nodes)| !nodes.is_empty())
            .map(|(b, _)| *b)
            .collect();
        bodies.sort();
        bodies
    }

    pub fn ground_body(&self) -> Option<BodyHandle> {
        self.ground.map(|(b, _)| b)
    }

    pub(crate) fn sync_segment_health(&mut self) {
        for segment in &mut self.segments {
            if let Some(h) = self.damage.node_health(segment.node_index) {
                segment.health = Some(h.health);
                segment.max_health = Some(h.max_health);
            }
        }
    }
}
