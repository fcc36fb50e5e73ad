//! Node/Bond/Actor model
//!
//! Static scenario data (nodes, bonds), the per-node `Segment` record and the
//! live ownership tables: node → actor, actor → body, body → nodes and
//! collider → node. Tables are only mutated by the stepping thread at flush
//! points; everything else reads them.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bevy::math::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::DestructionError;
use crate::physics::{BodyHandle, ColliderHandle};
use crate::{ActorIndex, BondIndex, NodeIndex};

/// Point mass in the stress solver
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub centroid: Vec3,
    /// 0 marks an infinite-mass support node
    pub mass: f32,
    pub volume: f32,
}

impl Node {
    pub fn is_support(&self) -> bool {
        self.mass == 0.0
    }
}

/// Cohesive link between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bond {
    pub index: BondIndex,
    pub node0: NodeIndex,
    pub node1: NodeIndex,
    pub centroid: Vec3,
    /// Unit normal pointing from node0 towards node1
    pub normal: Vec3,
    pub area: f32,
}

impl Bond {
    pub fn other(&self, node: NodeIndex) -> Option<NodeIndex> {
        if node == self.node0 {
            Some(self.node1)
        } else if node == self.node1 {
            Some(self.node0)
        } else {
            None
        }
    }
}

/// Scenario ingested by `DestructionCore::build`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioDesc {
    pub nodes: Vec<Node>,
    pub bonds: Vec<Bond>,
    /// Full extents per node; missing entries fall back to a cube of the node's volume
    #[serde(default)]
    pub sizes: Vec<Vec3>,
}

impl ScenarioDesc {
    pub fn node_size(&self, node: NodeIndex) -> Vec3 {
        self.sizes
            .get(node as usize)
            .copied()
            .unwrap_or_else(|| {
                let volume = self.nodes.get(node as usize).map(|n| n.volume).unwrap_or(0.0);
                Vec3::splat(volume.max(1e-6).cbrt())
            })
    }

    pub fn validate(&self) -> Result<(), DestructionError> {
        if self.nodes.is_empty() {
            return Err(DestructionError::InvalidScenario("no nodes".into()));
        }
        let n = self.nodes.len() as u32;
        for (i, node) in self.nodes.iter().enumerate() {
            if !node.centroid.is_finite() || !(node.mass >= 0.0) || !(node.volume >= 0.0) {
                return Err(DestructionError::InvalidScenario(format!(
                    "node {i} has non-finite or negative data"
                )));
            }
        }
        for (i, bond) in self.bonds.iter().enumerate() {
            if bond.index as usize != i {
                return Err(DestructionError::InvalidScenario(format!(
                    "bond at position {i} carries index {}",
                    bond.index
                )));
            }
            if bond.node0 >= n || bond.node1 >= n || bond.node0 == bond.node1 {
                return Err(DestructionError::InvalidScenario(format!(
                    "bond {i} links invalid nodes {}-{}",
                    bond.node0, bond.node1
                )));
            }
        }
        Ok(())
    }
}

/// Physical representation of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub node_index: NodeIndex,
    pub size: Vec3,
    pub is_support: bool,
    /// Collider offset inside whichever body owns the node
    pub base_local_offset: Vec3,
    pub collider: Option<ColliderHandle>,
    pub body: BodyHandle,
    pub destroyed: bool,
    pub health: Option<f32>,
    pub max_health: Option<f32>,
}

/// Post-fracture fragment handed to the planner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitChild {
    pub index: usize,
    pub actor_index: ActorIndex,
    pub nodes: Vec<NodeIndex>,
    pub is_support: bool,
}

// ============================================================================
// Bond table
// ============================================================================

/// Bond storage with per-node adjacency and the removed-set
#[derive(Debug, Clone, Default)]
pub struct BondTable {
    bonds: Vec<Bond>,
    adjacency: Vec<Vec<BondIndex>>,
    removed: BTreeSet<BondIndex>,
}

impl BondTable {
    pub fn new(node_count: usize, bonds: &[Bond]) -> Self {
        let mut adjacency = vec![Vec::new(); node_count];
        for bond in bonds {
            adjacency[bond.node0 as usize].push(bond.index);
            adjacency[bond.node1 as usize].push(bond.index);
        }
        Self {
            bonds: bonds.to_vec(),
            adjacency,
            removed: BTreeSet::new(),
        }
    }

    pub fn get(&self, bond: BondIndex) -> Option<&Bond> {
        self.bonds.get(bond as usize)
    }

    pub fn len(&self) -> usize {
        self.bonds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bonds.is_empty()
    }

    pub fn is_removed(&self, bond: BondIndex) -> bool {
        self.removed.contains(&bond)
    }

    /// Returns false when the bond was already cut or never existed
    pub fn mark_removed(&mut self, bond: BondIndex) -> bool {
        (bond as usize) < self.bonds.len() && self.removed.insert(bond)
    }

    pub fn live_count(&self) -> usize {
        self.bonds.len() - self.removed.len()
    }

    /// Live bonds touching `node`
    pub fn node_bonds(&self, node: NodeIndex) -> Vec<BondIndex> {
        self.adjacency
            .get(node as usize)
            .map(|list| {
                list.iter()
                    .copied()
                    .filter(|b| !self.removed.contains(b))
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ============================================================================
// Ownership tables
// ============================================================================

/// node → actor, actor → body, body → live nodes, collider → node
#[derive(Debug, Clone, Default)]
pub struct OwnershipTable {
    /// Live nodes only; destroyed nodes map to `None`
    node_actor: Vec<Option<ActorIndex>>,
    /// Solver actor of every node, destroyed ones included
    solver_actor: Vec<Option<ActorIndex>>,
    /// Every node the solver places in an actor, destroyed ones included
    actor_nodes: BTreeMap<ActorIndex, BTreeSet<NodeIndex>>,
    actor_body: HashMap<ActorIndex, BodyHandle>,
    body_nodes: HashMap<BodyHandle, BTreeSet<NodeIndex>>,
    collider_node: HashMap<ColliderHandle, NodeIndex>,
}

impl OwnershipTable {
    pub fn new(node_count: usize) -> Self {
        Self {
            node_actor: vec![None; node_count],
            solver_actor: vec![None; node_count],
            ..Default::default()
        }
    }

    pub fn node_actor(&self, node: NodeIndex) -> Option<ActorIndex> {
        self.node_actor.get(node as usize).copied().flatten()
    }

    pub fn node_actor_map(&self) -> &[Option<ActorIndex>] {
        &self.node_actor
    }

    pub fn set_node_actor(&mut self, node: NodeIndex, actor: Option<ActorIndex>) {
        if let Some(slot) = self.node_actor.get_mut(node as usize) {
            *slot = actor;
        }
    }

    pub fn actor_nodes(&self, actor: ActorIndex) -> Option<&BTreeSet<NodeIndex>> {
        self.actor_nodes.get(&actor)
    }

    pub fn set_actor_nodes(&mut self, actor: ActorIndex, nodes: BTreeSet<NodeIndex>) {
        for &node in &nodes {
            if let Some(slot) = self.solver_actor.get_mut(node as usize) {
                *slot = Some(actor);
            }
        }
        self.actor_nodes.insert(actor, nodes);
    }

    pub fn solver_actor(&self, node: NodeIndex) -> Option<ActorIndex> {
        self.solver_actor.get(node as usize).copied().flatten()
    }

    pub fn remove_actor(&mut self, actor: ActorIndex) -> Option<BodyHandle> {
        self.actor_nodes.remove(&actor);
        self.actor_body.remove(&actor)
    }

    pub fn actor_body(&self, actor: ActorIndex) -> Option<BodyHandle> {
        self.actor_body.get(&actor).copied()
    }

    pub fn bind_actor(&mut self, actor: ActorIndex, body: BodyHandle) {
        self.actor_body.insert(actor, body);
    }

    pub fn unbind_actor(&mut self, actor: ActorIndex) -> Option<BodyHandle> {
        self.actor_body.remove(&actor)
    }

    pub fn body_in_use(&self, body: BodyHandle) -> bool {
        self.actor_body.values().any(|b| *b == body)
    }

    pub fn body_nodes(&self, body: BodyHandle) -> Option<&BTreeSet<NodeIndex>> {
        self.body_nodes.get(&body)
    }

    pub fn set_body_nodes(&mut self, body: BodyHandle, nodes: BTreeSet<NodeIndex>) {
        self.body_nodes.insert(body, nodes);
    }

    /// Drops `node` from its body; returns true when that emptied the body
    pub fn remove_body_node(&mut self, body: BodyHandle, node: NodeIndex) -> bool {
        match self.body_nodes.get_mut(&body) {
            Some(nodes) => nodes.remove(&node) && nodes.is_empty(),
            None => false,
        }
    }

    pub fn forget_body(&mut self, body: BodyHandle) {
        self.body_nodes.remove(&body);
    }

    pub fn bodies(&self) -> impl Iterator<Item = (&BodyHandle, &BTreeSet<NodeIndex>)> {
        self.body_nodes.iter()
    }

    pub fn actors(&self) -> impl Iterator<Item = (&ActorIndex, &BodyHandle)> {
        self.actor_body.iter()
    }

    pub fn collider_node(&self, collider: ColliderHandle) -> Option<NodeIndex> {
        self.collider_node.get(&collider).copied()
    }

    pub fn map_collider(&mut self, collider: ColliderHandle, node: NodeIndex) {
        self.collider_node.insert(collider, node);
    }

    pub fn unmap_collider(&mut self, collider: ColliderHandle) {
        self.collider_node.remove(&collider);
    }

    /// Rebuilds collider → node from the segment table
    pub fn rebuild_collider_map(&mut self, segments: &[Segment]) {
        self.collider_node.clear();
        for segment in segments {
            if let (Some(collider), false) = (segment.collider, segment.destroyed) {
                self.collider_node.insert(collider, segment.node_index);
            }
        }
    }

    pub fn clear(&mut self) {
        self.node_actor.iter_mut().for_each(|a| *a = None);
        self.solver_actor.iter_mut().for_each(|a| *a = None);
        self.actor_nodes.clear();
        self.actor_body.clear();
        self.body_nodes.clear();
        self.collider_node.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: u32) -> ScenarioDesc {
        let nodes = (0..n)
            .map(|i| Node {
                centroid: Vec3::new(0.0, i as f32, 0.0),
                mass: if i == 0 { 0.0 } else { 1.0 },
                volume: 1.0,
            })
            .collect();
        let bonds = (0..n - 1)
            .map(|i| Bond {
                index: i,
                node0: i,
                node1: i + 1,
                centroid: Vec3::new(0.0, i as f32 + 0.5, 0.0),
                normal: Vec3::Y,
                area: 1.0,
            })
            .collect();
        ScenarioDesc {
            nodes,
            bonds,
            sizes: vec![],
        }
    }

    #[test]
    fn test_support_flag() {
        let desc = chain(3);
        assert!(desc.nodes[0].is_support());
        assert!(!desc.nodes[1].is_support());
    }

    #[test]
    fn test_validate_rejects_bad_bond() {
        let mut desc = chain(3);
        assert!(desc.validate().is_ok());
        desc.bonds[1].node1 = 9;
        assert!(matches!(
            desc.validate(),
            Err(DestructionError::InvalidScenario(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(ScenarioDesc::default().validate().is_err());
    }

    #[test]
    fn test_node_size_fallback_is_cube_of_volume() {
        let mut desc = chain(2);
        desc.nodes[1].volume = 8.0;
        let size = desc.node_size(1);
        assert!((size - Vec3::splat(2.0)).length() < 1e-4);
    }

    #[test]
    fn test_bond_table_removal_is_permanent() {
        let desc = chain(4);
        let mut table = BondTable::new(desc.nodes.len(), &desc.bonds);
        assert_eq!(table.node_bonds(1), vec![0, 1]);
        assert!(table.mark_removed(0));
        assert!(!table.mark_removed(0));
        assert!(!table.mark_removed(99));
        assert_eq!(table.node_bonds(1), vec![1]);
        assert_eq!(table.live_count(), 2);
        assert!(table.is_removed(0));
    }

    #[test]
    fn test_bond_other() {
        let desc = chain(3);
        assert_eq!(desc.bonds[0].other(0), Some(1));
        assert_eq!(desc.bonds[0].other(1), Some(0));
        assert_eq!(desc.bonds[0].other(2), None);
    }

    #[test]
    fn test_ownership_body_emptying() {
        let mut table = OwnershipTable::new(3);
        let body = BodyHandle::from_raw_parts(0, 0);
        table.set_body_nodes(body, [1, 2].into_iter().collect());
        assert!(!table.remove_body_node(body, 1));
        assert!(table.remove_body_node(body, 2));
        // already gone
        assert!(!table.remove_body_node(body, 2));
    }

    #[test]
    fn test_solver_actor_outlives_live_mapping() {
        let mut table = OwnershipTable::new(3);
        table.set_actor_nodes(4, [0, 1].into_iter().collect());
        table.set_node_actor(0, Some(4));
        assert_eq!(table.node_actor(0), Some(4));
        assert_eq!(table.node_actor(1), None);
        assert_eq!(table.solver_actor(1), Some(4));
        assert_eq!(table.solver_actor(2), None);
        table.clear();
        assert_eq!(table.solver_actor(0), None);
    }

    #[test]
    fn test_rebuild_collider_map_skips_destroyed() {
        let body = BodyHandle::from_raw_parts(0, 0);
        let seg = |i: u32, destroyed| Segment {
            node_index: i,
            size: Vec3::ONE,
            is_support: false,
            base_local_offset: Vec3::ZERO,
            collider: Some(ColliderHandle::from_raw_parts(i, 0)),
            body,
            destroyed,
            health: None,
            max_health: None,
        };
        let mut table = OwnershipTable::new(2);
        table.rebuild_collider_map(&[seg(0, false), seg(1, true)]);
        assert_eq!(table.collider_node(ColliderHandle::from_raw_parts(0, 0)), Some(0));
        assert_eq!(table.collider_node(ColliderHandle::from_raw_parts(1, 0)), None);
    }
}
