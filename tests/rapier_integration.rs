//! End-to-end tests on the Rapier backend with the reference bond solver
//!
//! Tests whole frames through the public API:
//! - A supported column stands still
//! - Cutting the base bond splits off a falling dynamic fragment
//! - A projectile hit damages the node it strikes
//! - Profiling hooks see every stage of a frame
//! - Ground contact reaches the solver as an upward force

use std::sync::Arc;
use std::time::Duration;

use bevy::math::Vec3;
use parking_lot::Mutex;

use tower_destruction::solver::{DebugLine, FractureCommand, SolverActor, SplitEvent};
use tower_destruction::{
    Bond, BondStressSolver, CoreConfig, DestructionCore, Node, PhysicsWorld, ProfileStage,
    ProfilerSink, ProjectileSpawn, RapierWorld, ScenarioDesc, SolverSettings, SpeedScaling,
    StressSolver,
};

// ============================================================
// Helpers
// ============================================================

/// Column of unit cubes; node 0 is the support
fn column(n: u32) -> ScenarioDesc {
    ScenarioDesc {
        nodes: (0..n)
            .map(|i| Node {
                centroid: Vec3::new(0.0, 0.5 + i as f32, 0.0),
                mass: if i == 0 { 0.0 } else { 100.0 },
                volume: 1.0,
            })
            .collect(),
        bonds: (0..n - 1)
            .map(|i| Bond {
                index: i,
                node0: i,
                node1: i + 1,
                centroid: Vec3::new(0.0, 1.0 + i as f32, 0.0),
                normal: Vec3::Y,
                area: 1.0,
            })
            .collect(),
        sizes: vec![Vec3::splat(0.98); n as usize],
    }
}

#[derive(Default)]
struct StageLog(Mutex<Vec<ProfileStage>>);

struct SharedSink(Arc<StageLog>);

impl ProfilerSink for SharedSink {
    fn record(&self, stage: ProfileStage, _elapsed: Duration) {
        self.0 .0.lock().push(stage);
    }
}

/// Reference solver that keeps every node force it is handed
struct RecordingSolver {
    inner: BondStressSolver,
    forces: Arc<Mutex<Vec<(u32, Vec3)>>>,
}

impl StressSolver for RecordingSolver {
    fn actors(&self) -> Vec<SolverActor> {
        self.inner.actors()
    }

    fn add_node_force(&mut self, actor: u32, node: u32, local_point: Vec3, local_force: Vec3) {
        self.forces.lock().push((node, local_force));
        self.inner.add_node_force(actor, node, local_point, local_force);
    }

    fn add_gravity(&mut self, actor: u32, local_gravity: Vec3) {
        self.inner.add_gravity(actor, local_gravity);
    }

    fn update(&mut self) {
        self.inner.update();
    }

    fn overstressed_bond_count(&self) -> usize {
        self.inner.overstressed_bond_count()
    }

    fn generate_fracture_commands(&mut self) -> Vec<FractureCommand> {
        self.inner.generate_fracture_commands()
    }

    fn apply_fracture_commands(&mut self, commands: &[FractureCommand]) -> Vec<SplitEvent> {
        self.inner.apply_fracture_commands(commands)
    }

    fn bond_removed(&self, bond: u32) -> bool {
        self.inner.bond_removed(bond)
    }

    fn debug_lines(&self) -> Vec<DebugLine> {
        self.inner.debug_lines()
    }
}

// ============================================================
// Tests
// ============================================================

#[test]
fn test_supported_column_stands() {
    let mut core = DestructionCore::rapier(&column(4), CoreConfig::default()).unwrap();
    for _ in 0..60 {
        let report = core.step(None);
        assert!(report.split_events.is_empty());
        assert!(report.destroyed_nodes.is_empty());
    }
    assert_eq!(core.live_bodies().len(), 1);
    let top = core.segments()[3].body;
    let state = core.physics().body_state(top).unwrap();
    assert!(state.is_fixed);
    assert_eq!(state.position, Vec3::ZERO);
}

#[test]
fn test_base_cut_drops_upper_fragment() {
    let mut core = DestructionCore::rapier(&column(4), CoreConfig::default()).unwrap();
    let root = core.segments()[0].body;
    assert!(core.cut_bond(0));

    let report = core.step(None);
    assert_eq!(report.split_events.len(), 1);
    assert_eq!(report.split_events[0].children.len(), 2);

    let upper = core.segments()[1].body;
    assert_ne!(upper, root);
    assert!(core.segments()[1..].iter().all(|s| s.body == upper));
    assert!(!core.physics().body_state(upper).unwrap().is_fixed);

    // fragment starts at the source pose and settles onto the base
    for _ in 0..30 {
        core.step(None);
    }
    let state = core.physics().body_state(upper).unwrap();
    assert!(state.position.y <= 0.0);
    assert!(state.position.y > -0.5);
}

#[test]
fn test_projectile_hit_damages_target() {
    let mut config = CoreConfig::default();
    config.damage.min_impulse_threshold = 0.0;
    config.damage.speed = SpeedScaling::flat();
    let mut core = DestructionCore::rapier(&column(3), config).unwrap();

    core.enqueue_projectile(
        ProjectileSpawn::new(Vec3::new(0.0, 2.5, 5.0), Vec3::new(0.0, 0.0, -40.0)).with_mass(50.0),
    );
    for _ in 0..30 {
        core.step(None);
    }

    let health = core.node_health(2).unwrap();
    assert!(health.health < health.max_health);
    assert!(!health.destroyed);
    assert_eq!(core.projectiles().len(), 1);
    assert_eq!(core.segments()[2].health, Some(health.health));
}

#[test]
fn test_profiler_sees_frame_stages() {
    let log = Arc::new(StageLog::default());
    let mut core = DestructionCore::rapier(&column(3), CoreConfig::default())
        .unwrap()
        .with_profiler(Box::new(SharedSink(log.clone())));
    core.cut_bond(1);
    core.step(None);

    let stages = log.0.lock();
    for stage in [
        ProfileStage::PhysicsStep,
        ProfileStage::ContactDrain,
        ProfileStage::SolverUpdate,
        ProfileStage::SplitPlanning,
        ProfileStage::Flush,
        ProfileStage::Frame,
    ] {
        assert!(stages.contains(&stage), "missing {stage:?}");
    }
    assert_eq!(stages.last(), Some(&ProfileStage::Frame));
}

#[test]
fn test_dispose_removes_everything() {
    let mut core = DestructionCore::rapier(&column(3), CoreConfig::default()).unwrap();
    core.enqueue_projectile(ProjectileSpawn::new(Vec3::new(0.0, 5.0, 5.0), Vec3::ZERO));
    core.step(None);
    core.dispose();
    assert_eq!(core.physics().body_count(), 0);
    assert_eq!(core.physics().collider_count(), 0);
    assert!(core.segments().iter().all(|s| s.collider.is_none()));
}

#[test]
fn test_ground_contact_pushes_resting_cube_up() {
    let scenario = ScenarioDesc {
        nodes: vec![Node {
            centroid: Vec3::new(0.0, 0.5, 0.0),
            mass: 100.0,
            volume: 1.0,
        }],
        bonds: Vec::new(),
        sizes: vec![Vec3::splat(0.98)],
    };
    let mut config = CoreConfig::default();
    config.damage.enabled = false;
    let forces = Arc::new(Mutex::new(Vec::new()));
    let solver = RecordingSolver {
        inner: BondStressSolver::new(&scenario.nodes, &scenario.bonds, SolverSettings::default()),
        forces: forces.clone(),
    };
    let mut core =
        DestructionCore::build(&scenario, config, RapierWorld::default(), solver).unwrap();

    for _ in 0..30 {
        core.step(None);
    }
    forces.lock().clear();
    for _ in 0..30 {
        core.step(None);
    }

    let forces = forces.lock();
    assert!(!forces.is_empty());
    let on_cube: Vec3 = forces.iter().filter(|(n, _)| *n == 0).map(|(_, f)| *f).sum();
    assert!(on_cube.y > 0.0, "ground reaction points down: {on_cube:?}");
}
