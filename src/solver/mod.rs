//! Stress solver seam — cohesive bond graph as seen by the destruction core.
//!
//! A solver owns nodes grouped into actors, accepts forces in each actor's
//! body frame, reports overstressed bonds and turns fracture commands into
//! split events that partition an actor's nodes.

pub mod bond_solver;

use bevy::math::Vec3;
use serde::{Deserialize, Serialize};

use crate::{ActorIndex, BondIndex, NodeIndex};

/// One connected node group as the solver currently sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverActor {
    pub actor_index: ActorIndex,
    pub nodes: Vec<NodeIndex>,
}

/// Bonds to cut inside one actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FractureCommand {
    pub actor_index: ActorIndex,
    pub bonds: Vec<BondIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitChildNodes {
    pub actor_index: ActorIndex,
    pub nodes: Vec<NodeIndex>,
}

/// Result of cutting an actor into disconnected pieces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitEvent {
    pub parent_actor_index: ActorIndex,
    pub children: Vec<SplitChildNodes>,
}

/// Bond visualisation in the owning actor's frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DebugLine {
    pub start: Vec3,
    pub end: Vec3,
    /// Worst stress over limit; above 1.0 means overstressed
    pub stress_ratio: f32,
    pub actor_index: ActorIndex,
}

pub trait StressSolver {
    fn actors(&self) -> Vec<SolverActor>;

    /// Force on `node`, both vectors in the actor's body frame
    fn add_node_force(&mut self, actor: ActorIndex, node: NodeIndex, local_point: Vec3, local_force: Vec3);
    /// Gravity acceleration for one actor, in its body frame
    fn add_gravity(&mut self, actor: ActorIndex, local_gravity: Vec3);

    /// Solves with the forces added since the last update, then clears them
    fn update(&mut self);
    fn overstressed_bond_count(&self) -> usize;

    fn generate_fracture_commands(&mut self) -> Vec<FractureCommand>;
    /// Cuts bonds; already-removed bonds are ignored
    fn apply_fracture_commands(&mut self, commands: &[FractureCommand]) -> Vec<SplitEvent>;

    fn bond_removed(&self, bond: BondIndex) -> bool;
    fn debug_lines(&self) -> Vec<DebugLine>;
}
