//! Error type shared by the destruction core and its collaborators.

use crate::{ActorIndex, NodeIndex};

#[derive(Debug, thiserror::Error)]
pub enum DestructionError {
    #[error("Physics step failed: {0}")]
    PhysicsStep(String),
    #[error("Snapshot restore failed: {0}")]
    SnapshotRestore(String),
    #[error("Node {0} has no segment record")]
    MissingSegment(NodeIndex),
    #[error("Split of actor {parent} does not partition its nodes: {reason}")]
    PartitionViolation { parent: ActorIndex, reason: String },
    #[error("Invalid scenario: {0}")]
    InvalidScenario(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}
