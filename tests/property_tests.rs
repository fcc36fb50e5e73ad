//! Property-based tests using proptest
//!
//! Invariants that must hold for ALL inputs:
//! - Solver splits: children always partition the parent's nodes
//! - Planner: every child planned exactly once, every body reused at most once
//! - Planner: fixed bodies only ever carry support children
//! - Damage: health never increases and never goes negative

use std::collections::{BTreeMap, BTreeSet, HashSet};

use bevy::math::Vec3;
use proptest::prelude::*;

use tower_destruction::physics::BodyHandle;
use tower_destruction::solver::{FractureCommand, StressSolver};
use tower_destruction::{
    plan_split_migration, validate_split_partition, Bond, BondStressSolver, DamageOptions,
    DamageSystem, ExistingBodyState, Node, SolverSettings, SplitChild,
};

// ============================================================
// Helpers
// ============================================================

fn nodes(count: usize) -> Vec<Node> {
    (0..count)
        .map(|i| Node {
            centroid: Vec3::new(i as f32, 0.5, 0.0),
            mass: if i == 0 { 0.0 } else { 10.0 },
            volume: 1.0,
        })
        .collect()
}

fn bonds_from_pairs(count: usize, pairs: &[(usize, usize)]) -> Vec<Bond> {
    let mut seen = HashSet::new();
    let mut bonds = Vec::new();
    for &(a, b) in pairs {
        let (a, b) = (a % count, b % count);
        if a == b || !seen.insert((a.min(b), a.max(b))) {
            continue;
        }
        bonds.push(Bond {
            index: bonds.len() as u32,
            node0: a as u32,
            node1: b as u32,
            centroid: Vec3::new((a + b) as f32 * 0.5, 0.5, 0.0),
            normal: Vec3::X,
            area: 1.0,
        });
    }
    bonds
}

/// Random bodies over disjoint node sets plus random children over 0..node_count
fn planner_case(
    body_sets: &[(Vec<u32>, bool)],
    child_sets: &[(Vec<u32>, bool)],
) -> (Vec<ExistingBodyState>, Vec<SplitChild>) {
    let mut claimed = BTreeSet::new();
    let bodies = body_sets
        .iter()
        .enumerate()
        .map(|(i, (nodes, fixed))| ExistingBodyState {
            handle: BodyHandle::from_raw_parts(i as u32, 0),
            node_indices: nodes.iter().copied().filter(|n| claimed.insert(*n)).collect(),
            is_fixed: *fixed,
        })
        .collect();

    let mut used = BTreeSet::new();
    let children = child_sets
        .iter()
        .enumerate()
        .map(|(i, (nodes, support))| {
            let mut own: Vec<u32> = nodes.iter().copied().filter(|n| used.insert(*n)).collect();
            own.sort_unstable();
            SplitChild {
                index: i,
                actor_index: i as u32 + 1,
                nodes: own,
                is_support: *support,
            }
        })
        .collect();
    (bodies, children)
}

// ============================================================
// Solver split properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_solver_splits_partition_parent(
        count in 2usize..12,
        pairs in prop::collection::vec((0usize..12, 0usize..12), 1..30),
        rounds in prop::collection::vec(prop::collection::vec(any::<bool>(), 30), 1..4),
    ) {
        let nodes = nodes(count);
        let bonds = bonds_from_pairs(count, &pairs);
        let mut solver = BondStressSolver::new(&nodes, &bonds, SolverSettings::default());

        for mask in rounds {
            let prior: BTreeMap<u32, BTreeSet<u32>> = solver
                .actors()
                .into_iter()
                .map(|a| (a.actor_index, a.nodes.into_iter().collect()))
                .collect();

            let mut per_actor: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
            for bond in bonds.iter().filter(|b| mask[b.index as usize] && !solver.bond_removed(b.index)) {
                let Some(actor) = solver.node_actor(bond.node0) else { continue };
                per_actor.entry(actor).or_default().push(bond.index);
            }
            let commands: Vec<FractureCommand> = per_actor
                .into_iter()
                .map(|(actor_index, bonds)| FractureCommand { actor_index, bonds })
                .collect();

            for event in solver.apply_fracture_commands(&commands) {
                let parent_nodes = &prior[&event.parent_actor_index];
                prop_assert!(validate_split_partition(
                    event.parent_actor_index,
                    parent_nodes,
                    &event.children,
                ).is_ok());
                prop_assert!(event.children.len() >= 2);
            }

            // Actor table stays a partition of every node
            let mut all: Vec<u32> = solver.actors().into_iter().flat_map(|a| a.nodes).collect();
            all.sort_unstable();
            prop_assert_eq!(all, (0..count as u32).collect::<Vec<_>>());
        }
    }
}

// ============================================================
// Planner properties
// ============================================================

fn node_set() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(0u32..24, 0..8)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_planner_conserves_children_and_bodies(
        body_sets in prop::collection::vec((node_set(), any::<bool>()), 0..6),
        child_sets in prop::collection::vec((node_set(), any::<bool>()), 0..8),
    ) {
        let (bodies, children) = planner_case(&body_sets, &child_sets);
        let plan = plan_split_migration(&bodies, &children);

        let mut planned: Vec<usize> = plan
            .reuse
            .iter()
            .map(|r| r.child_index)
            .chain(plan.create.iter().map(|c| c.child_index))
            .collect();
        planned.sort_unstable();
        prop_assert_eq!(planned, (0..children.len()).collect::<Vec<_>>());

        let reused: HashSet<BodyHandle> = plan.reuse.iter().map(|r| r.body).collect();
        prop_assert_eq!(reused.len(), plan.reuse.len());
        for entry in &plan.reuse {
            prop_assert!(bodies.iter().any(|b| b.handle == entry.body));
        }
    }

    #[test]
    fn prop_planner_respects_support_fixedness(
        body_sets in prop::collection::vec((node_set(), any::<bool>()), 1..6),
        child_sets in prop::collection::vec((node_set(), any::<bool>()), 1..8),
    ) {
        let (bodies, children) = planner_case(&body_sets, &child_sets);
        let plan = plan_split_migration(&bodies, &children);

        for entry in &plan.reuse {
            let body = bodies.iter().find(|b| b.handle == entry.body).unwrap();
            let child = &children[entry.child_index];
            prop_assert_eq!(body.is_fixed, child.is_support);
        }
    }

    #[test]
    fn prop_planner_reuses_identical_sets(
        sets in prop::collection::vec(prop::collection::btree_set(0u32..40, 1..6), 1..5),
    ) {
        // Disjoint identical sets on both sides: every child keeps its body
        let mut claimed = BTreeSet::new();
        let sets: Vec<Vec<u32>> = sets
            .into_iter()
            .map(|s| s.into_iter().filter(|n| claimed.insert(*n)).collect::<Vec<_>>())
            .filter(|s| !s.is_empty())
            .collect();
        let bodies: Vec<ExistingBodyState> = sets
            .iter()
            .enumerate()
            .map(|(i, s)| ExistingBodyState {
                handle: BodyHandle::from_raw_parts(i as u32, 0),
                node_indices: s.iter().copied().collect(),
                is_fixed: false,
            })
            .collect();
        let children: Vec<SplitChild> = sets
            .iter()
            .enumerate()
            .map(|(i, s)| SplitChild {
                index: i,
                actor_index: i as u32,
                nodes: s.clone(),
                is_support: false,
            })
            .collect();

        let plan = plan_split_migration(&bodies, &children);
        prop_assert!(plan.create.is_empty());
        for (i, body) in bodies.iter().enumerate() {
            prop_assert_eq!(plan.reused_body(i), Some(body.handle));
        }
    }
}

// ============================================================
// Damage properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_health_is_monotonic_and_bounded(
        hits in prop::collection::vec((1u32..4, 0.0f32..1e6, 0.001f32..0.1), 1..40),
    ) {
        let options = DamageOptions {
            contact_cooldown_ms: 0.0,
            ..Default::default()
        };
        let mut damage = DamageSystem::new(options, &nodes(4));
        let mut last: Vec<f32> = (0..4).map(|n| damage.node_health(n).map(|h| h.health).unwrap_or(0.0)).collect();

        for (node, force, dt) in hits {
            damage.on_impact(node, force, dt, None);
            damage.tick(dt, |_| {});
            for n in 1..4u32 {
                let health = damage.node_health(n).unwrap();
                prop_assert!(health.health >= 0.0);
                prop_assert!(health.health <= last[n as usize]);
                last[n as usize] = health.health;
            }
        }
    }
}
