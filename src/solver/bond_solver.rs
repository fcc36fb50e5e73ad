//! Reference bond stress solver
//!
//! ## Model
//! - Each actor is solved as a graph Laplacian: bond stiffness is its area,
//!   support nodes are anchored (zero displacement).
//! - Unsupported actors get inertial relief: every node's load has
//!   `m_i * a_cm` removed so the actor's loads sum to zero, and its
//!   first node is anchored instead.
//! - Gauss-Seidel sweeps, warm-started from the previous displacements.
//! - Bond force `k (u0 - u1)`, split into normal (compression when pushing
//!   towards node1) and shear, divided by area and compared against the
//!   limits times material scale.
//! - Fracture removes bonds; connected components from petgraph's
//!   union-find become child actors, the largest keeps the parent index.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bevy::math::Vec3;
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DebugLine, FractureCommand, SolverActor, SplitChildNodes, SplitEvent, StressSolver};
use crate::constants::*;
use crate::structure::{Bond, Node};
use crate::{ActorIndex, BondIndex, NodeIndex};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverSettings {
    pub compression_limit: f32,
    pub tension_limit: f32,
    pub shear_limit: f32,
    /// Maximum Gauss-Seidel sweeps per update
    pub iterations: u32,
    /// Early exit when the largest displacement change falls below this fraction
    pub tolerance: f32,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            compression_limit: DEFAULT_COMPRESSION_LIMIT,
            tension_limit: DEFAULT_TENSION_LIMIT,
            shear_limit: DEFAULT_SHEAR_LIMIT,
            iterations: DEFAULT_SOLVER_ITERATIONS,
            tolerance: 1.0e-4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BondStress {
    pub compression: f32,
    pub tension: f32,
    pub shear: f32,
    pub ratio: f32,
}

fn limit_ratio(stress: f32, limit: f32) -> f32 {
    if limit > 0.0 {
        stress / limit
    } else if stress > 0.0 {
        f32::INFINITY
    } else {
        0.0
    }
}

pub struct BondStressSolver {
    nodes: Vec<Node>,
    bonds: Vec<Bond>,
    adjacency: Vec<Vec<BondIndex>>,
    removed: Vec<bool>,
    settings: SolverSettings,
    material_scale: f32,

    node_actor: Vec<ActorIndex>,
    /// Sorted node lists per actor
    actors: BTreeMap<ActorIndex, Vec<NodeIndex>>,
    next_actor: ActorIndex,

    loads: Vec<Vec3>,
    gravity: HashMap<ActorIndex, Vec3>,
    displacement: Vec<Vec3>,
    residual: Vec<Vec3>,
    stress: Vec<BondStress>,
    overstressed: Vec<BondIndex>,
}

impl BondStressSolver {
    /// Starts with every node in actor 0
    pub fn new(nodes: &[Node], bonds: &[Bond], settings: SolverSettings) -> Self {
        let n = nodes.len();
        let mut adjacency = vec![Vec::new(); n];
        for bond in bonds {
            adjacency[bond.node0 as usize].push(bond.index);
            adjacency[bond.node1 as usize].push(bond.index);
        }
        let mut actors = BTreeMap::new();
        actors.insert(0, (0..n as NodeIndex).collect());

        Self {
            nodes: nodes.to_vec(),
            bonds: bonds.to_vec(),
            adjacency,
            removed: vec![false; bonds.len()],
            settings,
            material_scale: 1.0,
            node_actor: vec![0; n],
            actors,
            next_actor: 1,
            loads: vec![Vec3::ZERO; n],
            gravity: HashMap::new(),
            displacement: vec![Vec3::ZERO; n],
            residual: vec![Vec3::ZERO; n],
            stress: vec![BondStress::default(); bonds.len()],
            overstressed: Vec::new(),
        }
    }

    pub fn with_material_scale(mut self, scale: f32) -> Self {
        self.material_scale = scale;
        self
    }

    pub fn set_material_scale(&mut self, scale: f32) {
        self.material_scale = scale;
    }

    pub fn node_actor(&self, node: NodeIndex) -> Option<ActorIndex> {
        self.node_actor.get(node as usize).copied()
    }

    pub fn bond_stress(&self, bond: BondIndex) -> Option<BondStress> {
        self.stress.get(bond as usize).copied()
    }

    fn solve_actor(&mut self, actor: ActorIndex, members: &[NodeIndex]) {
        let Some(&first) = members.first() else {
            return;
        };
        let g = self.gravity.get(&actor).copied().unwrap_or(Vec3::ZERO);
        let supported = members.iter().any(|&i| self.nodes[i as usize].is_support());

        let mut total_load = Vec3::ZERO;
        let mut total_mass = 0.0;
        for &i in members {
            let node = &self.nodes[i as usize];
            let r = self.loads[i as usize] + g * node.mass;
            self.residual[i as usize] = r;
            total_load += r;
            total_mass += node.mass;
        }
        if !supported && total_mass > 0.0 {
            let a_cm = total_load / total_mass;
            for &i in members {
                self.residual[i as usize] -= a_cm * self.nodes[i as usize].mass;
            }
        }

        let anchored = |i: NodeIndex, nodes: &[Node]| {
            if supported {
                nodes[i as usize].is_support()
            } else {
                i == first
            }
        };

        for _ in 0..self.settings.iterations.max(1) {
            let mut max_delta = 0.0f32;
            let mut max_norm = 0.0f32;
            for &i in members {
                let iu = i as usize;
                if anchored(i, &self.nodes) {
                    self.displacement[iu] = Vec3::ZERO;
                    continue;
                }
                let mut sum_k = 0.0;
                let mut acc = self.residual[iu];
                for &b in &self.adjacency[iu] {
                    if self.removed[b as usize] {
                        continue;
                    }
                    let bond = &self.bonds[b as usize];
                    let Some(j) = bond.other(i) else { continue };
                    let k = bond.area.max(MIN_BOND_AREA);
                    sum_k += k;
                    acc += self.displacement[j as usize] * k;
                }
                let next = if sum_k > 0.0 { acc / sum_k } else { Vec3::ZERO };
                max_delta = max_delta.max((next - self.displacement[iu]).length());
                max_norm = max_norm.max(next.length());
                self.displacement[iu] = next;
            }
            if max_delta <= self.settings.tolerance * max_norm.max(f32::EPSILON) {
                break;
            }
        }
    }

    fn measure_bonds(&mut self) {
        let scale = self.material_scale;
        let limits = (
            self.settings.compression_limit * scale,
            self.settings.tension_limit * scale,
            self.settings.shear_limit * scale,
        );
        self.overstressed.clear();

        for (b, bond) in self.bonds.iter().enumerate() {
            if self.removed[b] {
                continue;
            }
            let (n0, n1) = (bond.node0 as usize, bond.node1 as usize);
            if self.nodes[n0].is_support() && self.nodes[n1].is_support() {
                self.stress[b] = BondStress::default();
                continue;
            }
            let area = bond.area.max(MIN_BOND_AREA);
            let force = (self.displacement[n0] - self.displacement[n1]) * area;
            let normal = bond.normal.normalize_or_zero();
            let along = force.dot(normal);
            let shear = (force - normal * along).length();

            let compression = along.max(0.0) / area;
            let tension = (-along).max(0.0) / area;
            let shear = shear / area;
            let ratio = limit_ratio(compression, limits.0)
                .max(limit_ratio(tension, limits.1))
                .max(limit_ratio(shear, limits.2));

            self.stress[b] = BondStress {
                compression,
                tension,
                shear,
                ratio,
            };
            if ratio > 1.0 {
                self.overstressed.push(b as BondIndex);
            }
        }
    }

    /// Re-labels an actor's connected components; None when still connected
    fn split_actor(&mut self, actor: ActorIndex) -> Option<SplitEvent> {
        let members = self.actors.get(&actor)?.clone();
        let mut components = UnionFind::<usize>::new(members.len());
        for (li, &n) in members.iter().enumerate() {
            for &b in &self.adjacency[n as usize] {
                if self.removed[b as usize] {
                    continue;
                }
                let Some(other) = self.bonds[b as usize].other(n) else {
                    continue;
                };
                if let Ok(lj) = members.binary_search(&other) {
                    components.union(li, lj);
                }
            }
        }

        let labels = components.into_labeling();
        let mut group_of_root: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<Vec<NodeIndex>> = Vec::new();
        for (li, &n) in members.iter().enumerate() {
            let gi = *group_of_root.entry(labels[li]).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[gi].push(n);
        }
        if groups.len() <= 1 {
            return None;
        }

        let mut largest = 0;
        for (gi, group) in groups.iter().enumerate() {
            if group.len() > groups[largest].len() {
                largest = gi;
            }
        }

        self.actors.remove(&actor);
        let mut children = Vec::with_capacity(groups.len());
        for (gi, group) in groups.into_iter().enumerate() {
            let child_actor = if gi == largest {
                actor
            } else {
                let next = self.next_actor;
                self.next_actor += 1;
                next
            };
            for &n in &group {
                self.node_actor[n as usize] = child_actor;
            }
            self.actors.insert(child_actor, group.clone());
            children.push(SplitChildNodes {
                actor_index: child_actor,
                nodes: group,
            });
        }

        debug!(
            parent = actor,
            children = children.len(),
            "actor split into components"
        );
        Some(SplitEvent {
            parent_actor_index: actor,
            children,
        })
    }
}

impl StressSolver for BondStressSolver {
    fn actors(&self) -> Vec<SolverActor> {
        self.actors
            .iter()
            .map(|(&actor_index, nodes)| SolverActor {
                actor_index,
                nodes: nodes.clone(),
            })
            .collect()
    }

    fn add_node_force(&mut self, actor: ActorIndex, node: NodeIndex, _local_point: Vec3, local_force: Vec3) {
        // Translational model: the application point only matters for torque
        if self.node_actor(node) == Some(actor) && local_force.is_finite() {
            self.loads[node as usize] += local_force;
        }
    }

    fn add_gravity(&mut self, actor: ActorIndex, local_gravity: Vec3) {
        if self.actors.contains_key(&actor) && local_gravity.is_finite() {
            *self.gravity.entry(actor).or_insert(Vec3::ZERO) += local_gravity;
        }
    }

    fn update(&mut self) {
        let actors: Vec<(ActorIndex, Vec<NodeIndex>)> = self
            .actors
            .iter()
            .map(|(a, nodes)| (*a, nodes.clone()))
            .collect();
        for (actor, members) in &actors {
            self.solve_actor(*actor, members);
        }
        self.measure_bonds();

        self.loads.iter_mut().for_each(|l| *l = Vec3::ZERO);
        self.gravity.clear();
    }

    fn overstressed_bond_count(&self) -> usize {
        self.overstressed.len()
    }

    fn generate_fracture_commands(&mut self) -> Vec<FractureCommand> {
        let mut by_actor: BTreeMap<ActorIndex, Vec<BondIndex>> = BTreeMap::new();
        for &b in &self.overstressed {
            if self.removed[b as usize] {
                continue;
            }
            let actor = self.node_actor[self.bonds[b as usize].node0 as usize];
            by_actor.entry(actor).or_default().push(b);
        }
        by_actor
            .into_iter()
            .map(|(actor_index, bonds)| FractureCommand { actor_index, bonds })
            .collect()
    }

    fn apply_fracture_commands(&mut self, commands: &[FractureCommand]) -> Vec<SplitEvent> {
        let mut touched = BTreeSet::new();
        for command in commands {
            if !self.actors.contains_key(&command.actor_index) {
                continue;
            }
            for &b in &command.bonds {
                let Some(bond) = self.bonds.get(b as usize) else {
                    continue;
                };
                if self.removed[b as usize]
                    || self.node_actor[bond.node0 as usize] != command.actor_index
                {
                    continue;
                }
                self.removed[b as usize] = true;
                self.stress[b as usize] = BondStress::default();
                touched.insert(command.actor_index);
            }
        }
        self.overstressed.retain(|&b| !self.removed[b as usize]);

        touched
            .into_iter()
            .filter_map(|actor| self.split_actor(actor))
            .collect()
    }

    fn bond_removed(&self, bond: BondIndex) -> bool {
        self.removed.get(bond as usize).copied().unwrap_or(true)
    }

    fn debug_lines(&self) -> Vec<DebugLine> {
        self.bonds
            .iter()
            .enumerate()
            .filter(|(b, _)| !self.removed[*b])
            .map(|(b, bond)| DebugLine {
                start: self.nodes[bond.node0 as usize].centroid,
                end: self.nodes[bond.node1 as usize].centroid,
                stress_ratio: self.stress[b].ratio,
                actor_index: self.node_actor[bond.node0 as usize],
            })
            .collect()
    }
}
