//! Split Migration Planner — which fragment keeps which body
//!
//! ## Algorithm
//! 1. Exact match: sorted node lists hashed; identical sets with compatible
//!    fixedness reuse the body directly.
//! 2. Overlap matrix (shared node count) over what is left. A fixed body only
//!    pairs with a support child and a support child only with a fixed body;
//!    incompatible pairs are zero before the solve.
//! 3. Hungarian maximum-weight assignment on the padded matrix; a zero-overlap
//!    match counts as no match.
//! 4. Every unmatched child becomes a create.

pub mod hungarian;

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::physics::BodyHandle;
use crate::structure::SplitChild;
use crate::NodeIndex;

/// Snapshot of which live nodes a body currently owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingBodyState {
    pub handle: BodyHandle,
    pub node_indices: BTreeSet<NodeIndex>,
    pub is_fixed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReuseEntry {
    pub child_index: usize,
    pub body: BodyHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEntry {
    pub child_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub reuse: Vec<ReuseEntry>,
    pub create: Vec<CreateEntry>,
}

impl MigrationPlan {
    pub fn reused_body(&self, child_index: usize) -> Option<BodyHandle> {
        self.reuse
            .iter()
            .find(|r| r.child_index == child_index)
            .map(|r| r.body)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlannerTiming {
    pub exact_match: Duration,
    pub overlap_matrix: Duration,
    pub hungarian: Duration,
    pub total: Duration,
}

fn compatible(body: &ExistingBodyState, child: &SplitChild) -> bool {
    body.is_fixed == child.is_support
}

pub fn plan_split_migration(bodies: &[ExistingBodyState], children: &[SplitChild]) -> MigrationPlan {
    plan_split_migration_timed(bodies, children).0
}

pub fn plan_split_migration_timed(
    bodies: &[ExistingBodyState],
    children: &[SplitChild],
) -> (MigrationPlan, PlannerTiming) {
    let started = Instant::now();
    let mut timing = PlannerTiming::default();
    let mut plan = MigrationPlan::default();

    if bodies.is_empty() || children.is_empty() {
        plan.create = children
            .iter()
            .map(|c| CreateEntry { child_index: c.index })
            .collect();
        timing.total = started.elapsed();
        return (plan, timing);
    }

    // ---- exact match ----
    let phase = Instant::now();
    let mut by_key: HashMap<Vec<NodeIndex>, usize> = HashMap::with_capacity(bodies.len());
    for (i, body) in bodies.iter().enumerate() {
        if !body.node_indices.is_empty() {
            by_key
                .entry(body.node_indices.iter().copied().collect())
                .or_insert(i);
        }
    }

    let mut body_taken = vec![false; bodies.len()];
    let mut child_done = vec![false; children.len()];
    for (ci, child) in children.iter().enumerate() {
        let mut key = child.nodes.clone();
        key.sort_unstable();
        key.dedup();
        let Some(&bi) = by_key.get(&key) else {
            continue;
        };
        if body_taken[bi] || !compatible(&bodies[bi], child) {
            continue;
        }
        body_taken[bi] = true;
        child_done[ci] = true;
        plan.reuse.push(ReuseEntry {
            child_index: child.index,
            body: bodies[bi].handle,
        });
    }
    timing.exact_match = phase.elapsed();

    let open_bodies: Vec<usize> = (0..bodies.len()).filter(|&i| !body_taken[i]).collect();
    let open_children: Vec<usize> = (0..children.len()).filter(|&i| !child_done[i]).collect();

    if !open_bodies.is_empty() && !open_children.is_empty() {
        // ---- overlap matrix ----
        let phase = Instant::now();
        let weights: Vec<Vec<u32>> = open_bodies
            .iter()
            .map(|&bi| {
                let body = &bodies[bi];
                open_children
                    .iter()
                    .map(|&ci| {
                        let child = &children[ci];
                        if !compatible(body, child) {
                            return 0;
                        }
                        child
                            .nodes
                            .iter()
                            .filter(|n| body.node_indices.contains(n))
                            .count() as u32
                    })
                    .collect()
            })
            .collect();
        timing.overlap_matrix = phase.elapsed();

        // ---- assignment ----
        let phase = Instant::now();
        let assignment = hungarian::max_weight_assignment(&weights);
        for (row, col) in assignment.into_iter().enumerate() {
            let Some(col) = col else { continue };
            if weights[row][col] == 0 {
                continue;
            }
            let ci = open_children[col];
            child_done[ci] = true;
            plan.reuse.push(ReuseEntry {
                child_index: children[ci].index,
                body: bodies[open_bodies[row]].handle,
            });
        }
        timing.hungarian = phase.elapsed();
    }

    plan.create = children
        .iter()
        .zip(&child_done)
        .filter(|(_, done)| !**done)
        .map(|(c, _)| CreateEntry { child_index: c.index })
        .collect();
    plan.reuse.sort_by_key(|r| r.child_index);

    timing.total = started.elapsed();
    (plan, timing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(id: u32, nodes: &[NodeIndex], is_fixed: bool) -> ExistingBodyState {
        ExistingBodyState {
            handle: BodyHandle::from_raw_parts(id, 0),
            node_indices: nodes.iter().copied().collect(),
            is_fixed,
        }
    }

    fn child(index: usize, nodes: &[NodeIndex], is_support: bool) -> SplitChild {
        SplitChild {
            index,
            actor_index: index as u32,
            nodes: nodes.to_vec(),
            is_support,
        }
    }

    fn h(id: u32) -> BodyHandle {
        BodyHandle::from_raw_parts(id, 0)
    }

    #[test]
    fn test_exact_match_shortcut() {
        let bodies = [body(1, &[0, 1, 2], false), body(2, &[3, 4, 5], false)];
        let children = [child(0, &[3, 4, 5], false), child(1, &[0, 1, 2], false)];
        let plan = plan_split_migration(&bodies, &children);
        assert_eq!(plan.reused_body(0), Some(h(2)));
        assert_eq!(plan.reused_body(1), Some(h(1)));
        assert!(plan.create.is_empty());
    }

    #[test]
    fn test_exact_match_ignores_node_order() {
        let bodies = [body(1, &[0, 1, 2], false)];
        let children = [child(0, &[2, 0, 1], false)];
        let plan = plan_split_migration(&bodies, &children);
        assert_eq!(plan.reused_body(0), Some(h(1)));
    }

    #[test]
    fn test_largest_overlap_reuse() {
        let bodies = [body(1, &[0, 1, 2, 3, 4, 5], false)];
        let children = [child(0, &[0, 1, 2, 3], false), child(1, &[4, 5], false)];
        let plan = plan_split_migration(&bodies, &children);
        assert_eq!(plan.reuse, vec![ReuseEntry { child_index: 0, body: h(1) }]);
        assert_eq!(plan.create, vec![CreateEntry { child_index: 1 }]);
    }

    #[test]
    fn test_fixed_body_exclusivity() {
        let bodies = [body(1, &[0, 1, 2], true)];
        let children = [child(0, &[0], true), child(1, &[1, 2], false)];
        let plan = plan_split_migration(&bodies, &children);
        assert_eq!(plan.reused_body(0), Some(h(1)));
        assert_eq!(plan.reused_body(1), None);
        assert_eq!(plan.create, vec![CreateEntry { child_index: 1 }]);
    }

    #[test]
    fn test_support_child_never_takes_dynamic_body() {
        let bodies = [body(1, &[0, 1, 2], false)];
        let children = [child(0, &[0, 1, 2], true)];
        let plan = plan_split_migration(&bodies, &children);
        assert!(plan.reuse.is_empty());
        assert_eq!(plan.create.len(), 1);
    }

    #[test]
    fn test_hungarian_under_ambiguity() {
        let bodies = [body(1, &[0, 1, 2, 3], false), body(2, &[4, 5, 6, 7], false)];
        let children = [
            child(0, &[0, 1, 2], false),
            child(1, &[3, 4], false),
            child(2, &[5, 6, 7], false),
        ];
        let (plan, timing) = plan_split_migration_timed(&bodies, &children);
        assert_eq!(plan.reused_body(0), Some(h(1)));
        assert_eq!(plan.reused_body(2), Some(h(2)));
        assert_eq!(plan.create, vec![CreateEntry { child_index: 1 }]);
        assert!(timing.total >= timing.hungarian);
    }

    #[test]
    fn test_zero_overlap_is_create() {
        let bodies = [body(1, &[0, 1], false)];
        let children = [child(0, &[5, 6], false)];
        let plan = plan_split_migration(&bodies, &children);
        assert!(plan.reuse.is_empty());
        assert_eq!(plan.create, vec![CreateEntry { child_index: 0 }]);
    }

    #[test]
    fn test_empty_inputs_create_everything() {
        let children = [child(0, &[0], false), child(1, &[1], true)];
        let plan = plan_split_migration(&[], &children);
        assert!(plan.reuse.is_empty());
        assert_eq!(plan.create.len(), 2);

        let plan = plan_split_migration(&[body(1, &[0], false)], &[]);
        assert_eq!(plan, MigrationPlan::default());
    }

    #[test]
    fn test_each_body_reused_at_most_once() {
        let bodies = [body(1, &[0, 1, 2, 3], false)];
        let children = [child(0, &[0, 1], false), child(1, &[2, 3], false)];
        let plan = plan_split_migration(&bodies, &children);
        assert_eq!(plan.reuse.len(), 1);
        assert_eq!(plan.create.len(), 1);
    }
}
