//! Optional profiling hooks for the hot path.
//!
//! The core holds `Option<Box<dyn ProfilerSink>>`; with no sink installed the
//! timing calls collapse to a single `None` check.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfileStage {
    PhysicsStep,
    ContactDrain,
    SolverUpdate,
    Rollback,
    SplitPlanning,
    Flush,
    Frame,
}

impl ProfileStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileStage::PhysicsStep => "physics_step",
            ProfileStage::ContactDrain => "contact_drain",
            ProfileStage::SolverUpdate => "solver_update",
            ProfileStage::Rollback => "rollback",
            ProfileStage::SplitPlanning => "split_planning",
            ProfileStage::Flush => "flush",
            ProfileStage::Frame => "frame",
        }
    }
}

pub trait ProfilerSink: Send + Sync {
    fn record(&self, stage: ProfileStage, elapsed: Duration);
}

/// Discards every sample
pub struct NoopProfiler;

impl ProfilerSink for NoopProfiler {
    fn record(&self, _stage: ProfileStage, _elapsed: Duration) {}
}

/// Emits each sample as a `trace!` event
pub struct TracingProfiler;

impl ProfilerSink for TracingProfiler {
    fn record(&self, stage: ProfileStage, elapsed: Duration) {
        tracing::trace!(
            target: "tower_destruction::profiling",
            stage = stage.as_str(),
            micros = elapsed.as_micros() as u64,
            "stage timing"
        );
    }
}

/// Started only when a sink exists. Holds no borrow between `start` and `finish`.
pub(crate) struct StageTimer {
    stage: ProfileStage,
    started: Option<Instant>,
}

impl StageTimer {
    pub(crate) fn start(sink: Option<&dyn ProfilerSink>, stage: ProfileStage) -> Self {
        Self {
            started: sink.map(|_| Instant::now()),
            stage,
        }
    }

    pub(crate) fn finish(self, sink: Option<&dyn ProfilerSink>) {
        if let (Some(sink), Some(started)) = (sink, self.started) {
            sink.record(self.stage, started.elapsed());
        }
    }
}
