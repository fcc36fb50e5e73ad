//! Resimulation loop — step → detect → rollback → reapply
//!
//! ```text
//!          ┌────────────────────────────────────────────────┐
//!          ▼                                                │
//!   Snapshot ─► Step ─► DrainContacts(buffered) ─► SolverUpdate ─► Detect
//!                                                              │
//!            no overstress, no previewed destruction ──► Accept │
//!            otherwise ─► Restore ─► apply fractures ─► pre-destroy ─► flush
//! ```
//! The pass budget bounds the loop; once spent the frame takes one plain step.

use tracing::{error, warn};

use super::{DestructionCore, StepReport};
use crate::config::SnapshotMode;
use crate::contacts::DamageMode;
use crate::error::DestructionError;
use crate::logging::TimingSpan;
use crate::physics::{BodyHandle, BodyState, PhysicsWorld};
use crate::profiling::{ProfileStage, StageTimer};
use crate::solver::StressSolver;
use crate::NodeIndex;

/// Physics half of a pass snapshot
pub(crate) enum PhysicsSnapshot<W> {
    World(W),
    Bodies(Vec<(BodyHandle, BodyState)>),
}

impl<P: PhysicsWorld, S: StressSolver> DestructionCore<P, S> {
    /// Advances one frame. `dt_override` replaces the configured fixed dt.
    pub fn step(&mut self, dt_override: Option<f32>) -> StepReport {
        let mut report = StepReport::default();
        if self.disposed {
            return report;
        }
        let dt = dt_override
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(self.config.fixed_dt);
        self.frame += 1;
        let _span = TimingSpan::new("step", self.frame);
        let frame_timer = StageTimer::start(self.profiler.as_deref(), ProfileStage::Frame);

        self.spawn_pending_projectiles();
        let cuts: Vec<_> = self.pending_cuts.drain(..).collect();
        self.split_queue.bond_cuts.extend(cuts);
        self.flush_bond_cuts(&mut report);
        self.flush_pending();

        if self
            .config
            .resimulation
            .enabled(self.damage.enabled())
        {
            self.step_resimulated(dt, &mut report);
        } else {
            self.step_plain(dt, &mut report);
        }

        frame_timer.finish(self.profiler.as_deref());
        report
    }

    fn physics_step(&mut self, dt: f32) -> Result<(), DestructionError> {
        let timer = StageTimer::start(self.profiler.as_deref(), ProfileStage::PhysicsStep);
        let result = self.physics.step(dt);
        timer.finish(self.profiler.as_deref());
        result
    }

    pub(crate) fn solver_update(&mut self) {
        let timer = StageTimer::start(self.profiler.as_deref(), ProfileStage::SolverUpdate);
        if self.config.solver_gravity_enabled {
            let actors: Vec<_> = self.ownership.actors().map(|(a, b)| (*a, *b)).collect();
            for (actor, body) in actors {
                if let Some(state) = self.physics.body_state(body) {
                    self.solver
                        .add_gravity(actor, state.to_local_vector(self.config.gravity));
                }
            }
        }
        self.solver.update();
        timer.finish(self.profiler.as_deref());
    }

    /// Single pass with damage applied immediately
    fn step_plain(&mut self, dt: f32, report: &mut StepReport) {
        report.passes += 1;
        if let Err(e) = self.physics_step(dt) {
            error!(frame = self.frame, "physics step failed, frame abandoned: {e}");
            report.abandoned = true;
            return;
        }
        self.drain_contacts(dt, DamageMode::Apply);
        self.solver_update();
        self.accept_pass(dt, report);
    }

    fn step_resimulated(&mut self, dt: f32, report: &mut StepReport) {
        let policy = self.config.resimulation.clone();
        let damage_checks = self.damage.enabled() && policy.damage_triggers_resimulation;
        let mut rejected = 0u32;

        loop {
            if rejected >= policy.max_passes {
                warn!(
                    frame = self.frame,
                    passes = rejected,
                    "resimulation budget exhausted, taking a plain step"
                );
                report.budget_exhausted = true;
                self.step_plain(dt, report);
                return;
            }

            report.passes += 1;
            let snapshot = self.capture_physics(policy.snapshot_mode);
            let impact_state = self.damage.capture_impact_state();
            self.buffered_impacts.clear();

            if let Err(e) = self.physics_step(dt) {
                error!(frame = self.frame, "physics step failed, frame abandoned: {e}");
                self.buffered_impacts.clear();
                report.abandoned = true;
                return;
            }
            self.drain_contacts(dt, DamageMode::Buffer);
            self.solver_update();

            let overstressed =
                policy.fracture_on_overstress && self.solver.overstressed_bond_count() > 0;
            let doomed = if damage_checks {
                self.preview_destructions()
            } else {
                Vec::new()
            };

            if !overstressed && doomed.is_empty() {
                self.accept_pass(dt, report);
                return;
            }

            let commands = if overstressed {
                self.solver.generate_fracture_commands()
            } else {
                Vec::new()
            };

            let rollback = StageTimer::start(self.profiler.as_deref(), ProfileStage::Rollback);
            let restored = self.restore_physics(snapshot);
            rollback.finish(self.profiler.as_deref());
            if let Err(e) = restored {
                warn!(frame = self.frame, "rollback failed, accepting pass as-is: {e}");
                self.accept_pass(dt, report);
                return;
            }

            self.damage.restore_impact_state(impact_state);
            self.buffered_impacts.clear();
            report.resimulated = true;
            rejected += 1;

            self.apply_fracture(commands, report);
            for node in doomed {
                self.destroy_and_record(node, report);
            }
            self.flush_bond_cuts(report);
            self.flush_pending();
        }
    }

    /// Nodes this pass's buffered damage would destroy; commits nothing
    fn preview_destructions(&mut self) -> Vec<NodeIndex> {
        let saved = self.damage.capture_impact_state();
        self.damage.replay(&self.buffered_impacts);
        let doomed = self.damage.preview_tick();
        self.damage.restore_impact_state(saved);
        doomed
    }

    fn accept_pass(&mut self, dt: f32, report: &mut StepReport) {
        self.damage.replay(&self.buffered_impacts);
        self.buffered_impacts.clear();

        self.inject_external_forces();

        let mut destroyed = Vec::new();
        self.damage.tick(dt, |node| destroyed.push(node));
        for node in destroyed {
            self.destroy_and_record(node, report);
        }
        self.sync_segment_health();

        if self.solver.overstressed_bond_count() > 0 {
            let commands = self.solver.generate_fracture_commands();
            self.apply_fracture(commands, report);
        }
        self.flush_bond_cuts(report);
        self.flush_pending();
        self.expire_projectiles(dt);
    }

    fn destroy_and_record(&mut self, node: NodeIndex, report: &mut StepReport) {
        match self.destroy_node(node) {
            Ok(true) => report.destroyed_nodes.push(node),
            Ok(false) => {}
            Err(e) => error!("node destruction failed: {e}"),
        }
    }

    fn inject_external_forces(&mut self) {
        while let Some(f) = self.pending_forces.pop_front() {
            self.inject_node_force(f.node, f.point, f.force);
        }
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    fn capture_physics(&self, mode: SnapshotMode) -> PhysicsSnapshot<P::WorldSnapshot> {
        match mode {
            SnapshotMode::World => PhysicsSnapshot::World(self.physics.snapshot_world()),
            SnapshotMode::Bodies => {
                let bodies = self
                    .ownership
                    .bodies()
                    .map(|(b, _)| *b)
                    .chain(self.projectiles.iter().map(|p| p.body))
                    .filter_map(|b| self.physics.body_state(b).map(|s| (b, s)))
                    .collect();
                PhysicsSnapshot::Bodies(bodies)
            }
        }
    }

    fn restore_physics(
        &mut self,
        snapshot: PhysicsSnapshot<P::WorldSnapshot>,
    ) -> Result<(), DestructionError> {
        match snapshot {
            PhysicsSnapshot::World(world) => {
                self.physics.restore_world(world)?;
            }
            PhysicsSnapshot::Bodies(bodies) => {
                for (body, state) in bodies {
                    if self.physics.body_state(body).is_none() {
                        return Err(DestructionError::SnapshotRestore(format!(
                            "body {body:?} vanished during the pass"
                        )));
                    }
                    self.physics.set_body_state(body, &state);
                }
            }
        }
        // Contacts of the rejected pass must not leak into the next one
        let mut stale = std::mem::take(&mut self.contact_events);
        self.physics.drain_contact_forces(&mut stale);
        stale.clear();
        self.contact_events = stale;
        Ok(())
    }
}
