//! Tower Destruction Core
//!
//! Sits between the rigid-body physics world and a cohesive-bond stress solver:
//! - Damage model (impulse + speed weighted, splash falloff)
//! - Fracture detection and split application
//! - Split migration planner (exact match + Hungarian assignment)
//! - Contact draining with actor-local force injection
//! - Resimulation loop (step → detect → rollback → reapply)
//! - Rapier physics backend and a reference bond stress solver

pub mod config;
pub mod constants;
pub mod contacts;
pub mod damage;
pub mod engine;
pub mod error;
pub mod fracture;
pub mod logging;
pub mod physics;
pub mod planner;
pub mod plugin;
pub mod profiling;
pub mod solver;
pub mod structure;

pub use config::{CollisionMode, CoreConfig, GroundConfig, ResimulationPolicy, SnapshotMode};
pub use damage::{ContactKind, DamageOptions, DamageSystem, NodeHealth, SpeedScaling};
pub use engine::{DestructionCore, Projectile, ProjectileSpawn, StepReport};
pub use error::DestructionError;
pub use fracture::validate_split_partition;
pub use logging::{init_tracing, init_tracing_default, LoggingPlugin, TracingConfig};
pub use physics::rapier::RapierWorld;
pub use physics::{BodyHandle, ColliderHandle, PhysicsWorld};
pub use planner::{
    plan_split_migration, plan_split_migration_timed, ExistingBodyState, MigrationPlan,
    PlannerTiming,
};
pub use plugin::{DestructionPlugin, DestructionResource, DestructionStepEvent};
pub use profiling::{ProfileStage, ProfilerSink};
pub use solver::bond_solver::{BondStressSolver, SolverSettings};
pub use solver::{DebugLine, FractureCommand, SplitEvent, StressSolver};
pub use structure::{Bond, Node, ScenarioDesc, Segment, SplitChild};

/// Index of a node in every solver-facing array
pub type NodeIndex = u32;
/// Index of a bond in the scenario bond table
pub type BondIndex = u32;
/// Solver-side actor identifier
pub type ActorIndex = u32;
