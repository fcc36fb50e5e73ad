//! Damage System — contact impulses to per-node health loss
//!
//! ## Model
//! ```text
//! contact force ──► impulse = max(0, F) · max(0, dt)
//!       │               (ignored below the kind's threshold)
//!       ▼
//! per-node cooldown gate ──► damage = k_impact · impulse / mass^exp
//!       │
//!       ▼
//! pending[node] (+ splash to same-body nodes, (1 - d/r)^falloff)
//!       │
//!       ▼
//! tick(dt) ──► health -= pending ──► on_destroyed(node) once at zero
//! ```
//! Pending damage and cooldown timestamps form the impact state, which the
//! resimulation loop captures and restores around speculative passes.

mod speed;

pub use speed::{ContactKind, SpeedScaling, SpeedThresholds};

use bevy::math::Vec3;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::DestructionError;
use crate::physics::BodyHandle;
use crate::structure::Node;
use crate::NodeIndex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DamageOptions {
    pub enabled: bool,
    pub strength_per_volume: f32,
    pub k_impact: f32,
    pub mass_exponent: f32,
    pub min_impulse_threshold: f32,
    pub internal_min_impulse_threshold: f32,
    pub internal_contact_scale: f32,
    pub contact_cooldown_ms: f32,
    pub splash_radius: f32,
    pub splash_falloff_exp: f32,
    /// Track health on support (infinite-mass) nodes too
    pub enable_support_damage: bool,
    pub speed: SpeedScaling,
}

impl Default for DamageOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            strength_per_volume: DEFAULT_STRENGTH_PER_VOLUME,
            k_impact: DEFAULT_K_IMPACT,
            mass_exponent: DEFAULT_MASS_EXPONENT,
            min_impulse_threshold: DEFAULT_MIN_IMPULSE_THRESHOLD,
            internal_min_impulse_threshold: DEFAULT_INTERNAL_MIN_IMPULSE_THRESHOLD,
            internal_contact_scale: DEFAULT_INTERNAL_CONTACT_SCALE,
            contact_cooldown_ms: DEFAULT_CONTACT_COOLDOWN_MS,
            splash_radius: DEFAULT_SPLASH_RADIUS,
            splash_falloff_exp: DEFAULT_SPLASH_FALLOFF_EXP,
            enable_support_damage: false,
            speed: SpeedScaling::default(),
        }
    }
}

impl DamageOptions {
    pub fn validate(&self) -> Result<(), DestructionError> {
        let non_negative = [
            ("strength_per_volume", self.strength_per_volume),
            ("k_impact", self.k_impact),
            ("min_impulse_threshold", self.min_impulse_threshold),
            ("internal_min_impulse_threshold", self.internal_min_impulse_threshold),
            ("internal_contact_scale", self.internal_contact_scale),
            ("contact_cooldown_ms", self.contact_cooldown_ms),
            ("splash_radius", self.splash_radius),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0) {
                return Err(DestructionError::InvalidConfig(format!(
                    "damage.{name} must be >= 0, got {value}"
                )));
            }
        }
        self.speed.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub health: f32,
    pub max_health: f32,
    pub destroyed: bool,
}

/// A contact recorded during a speculative pass, replayed once accepted
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BufferedImpact {
    External {
        node: NodeIndex,
        force: f32,
        dt: f32,
        local_point: Option<Vec3>,
    },
    Internal {
        node_a: NodeIndex,
        node_b: NodeIndex,
        force: f32,
        dt: f32,
        local_points: Option<(Vec3, Vec3)>,
    },
}

/// Pending damage and cooldown clock; everything a rejected pass may have touched
#[derive(Debug, Clone, PartialEq)]
pub struct ImpactState {
    pending: Vec<f32>,
    last_hit: Vec<Option<f32>>,
}

#[derive(Debug, Clone)]
struct NodeDamage {
    health: Option<f32>,
    max_health: Option<f32>,
    destroyed: bool,
    mass: f32,
    local_position: Vec3,
    owner: Option<BodyHandle>,
}

pub struct DamageSystem {
    options: DamageOptions,
    nodes: Vec<NodeDamage>,
    impact: ImpactState,
    /// Seconds of committed simulation time
    clock: f32,
}

impl DamageSystem {
    pub fn new(options: DamageOptions, nodes: &[Node]) -> Self {
        let states = nodes
            .iter()
            .map(|node| {
                let tracked = options.enabled && (!node.is_support() || options.enable_support_damage);
                let max_health = tracked.then(|| options.strength_per_volume * node.volume);
                NodeDamage {
                    health: max_health,
                    max_health,
                    destroyed: false,
                    mass: node.mass,
                    local_position: node.centroid,
                    owner: None,
                }
            })
            .collect();
        Self {
            impact: ImpactState {
                pending: vec![0.0; nodes.len()],
                last_hit: vec![None; nodes.len()],
            },
            nodes: states,
            options,
            clock: 0.0,
        }
    }

    pub fn options(&self) -> &DamageOptions {
        &self.options
    }

    pub fn enabled(&self) -> bool {
        self.options.enabled
    }

    pub fn set_owner(&mut self, node: NodeIndex, body: Option<BodyHandle>) {
        if let Some(state) = self.nodes.get_mut(node as usize) {
            state.owner = body;
        }
    }

    pub fn speed_factor(&self, relative_speed: f32, kind: ContactKind) -> f32 {
        self.options.speed.factor(relative_speed, kind)
    }

    pub fn node_health(&self, node: NodeIndex) -> Option<NodeHealth> {
        let state = self.nodes.get(node as usize)?;
        Some(NodeHealth {
            health: state.health?,
            max_health: state.max_health?,
            destroyed: state.destroyed,
        })
    }

    pub fn is_destroyed(&self, node: NodeIndex) -> bool {
        self.nodes
            .get(node as usize)
            .map(|s| s.destroyed)
            .unwrap_or(false)
    }

    fn is_live_tracked(&self, node: NodeIndex) -> bool {
        self.nodes
            .get(node as usize)
            .map(|s| !s.destroyed && s.health.is_some())
            .unwrap_or(false)
    }

    fn cooling_down(&self, node: NodeIndex) -> bool {
        let window = self.options.contact_cooldown_ms / 1000.0;
        match self.impact.last_hit[node as usize] {
            Some(at) => self.clock - at < window,
            None => false,
        }
    }

    fn damage_for(&self, node: NodeIndex, impulse: f32) -> f32 {
        let mass = self.nodes[node as usize].mass;
        let divisor = if mass > 0.0 {
            mass.powf(self.options.mass_exponent)
        } else {
            1.0
        };
        self.options.k_impact * impulse / divisor
    }

    /// Adds `amount` to `node` and splashes it over live nodes on the same body
    fn deposit(&mut self, node: NodeIndex, amount: f32, local_point: Option<Vec3>) {
        self.impact.pending[node as usize] += amount;

        let radius = self.options.splash_radius;
        let (Some(point), true) = (local_point, radius > 0.0) else {
            return;
        };
        let Some(owner) = self.nodes[node as usize].owner else {
            return;
        };
        let falloff = self.options.splash_falloff_exp;
        for (i, other) in self.nodes.iter().enumerate() {
            if i == node as usize
                || other.destroyed
                || other.health.is_none()
                || other.owner != Some(owner)
            {
                continue;
            }
            let distance = other.local_position.distance(point);
            let weight = (1.0 - distance / radius).max(0.0).powf(falloff);
            if weight > 0.0 {
                self.impact.pending[i] += amount * weight;
            }
        }
    }

    /// Records an external contact on `node`; returns the damage queued on it
    pub fn on_impact(
        &mut self,
        node: NodeIndex,
        force: f32,
        dt: f32,
        local_point: Option<Vec3>,
    ) -> f32 {
        if !self.is_live_tracked(node) {
            return 0.0;
        }
        let impulse = force.max(0.0) * dt.max(0.0);
        if impulse < self.options.min_impulse_threshold || self.cooling_down(node) {
            return 0.0;
        }
        let damage = self.damage_for(node, impulse);
        self.deposit(node, damage, local_point);
        self.impact.last_hit[node as usize] = Some(self.clock);
        damage
    }

    /// Records a structure-vs-structure contact on both ends
    pub fn on_internal_impact(
        &mut self,
        node_a: NodeIndex,
        node_b: NodeIndex,
        force: f32,
        dt: f32,
        local_points: Option<(Vec3, Vec3)>,
    ) -> f32 {
        let impulse = force.max(0.0) * dt.max(0.0);
        if impulse < self.options.internal_min_impulse_threshold {
            return 0.0;
        }
        let scaled = impulse * self.options.internal_contact_scale;
        let mut total = 0.0;
        for (node, point) in [
            (node_a, local_points.map(|p| p.0)),
            (node_b, local_points.map(|p| p.1)),
        ] {
            if !self.is_live_tracked(node) || self.cooling_down(node) {
                continue;
            }
            let damage = self.damage_for(node, scaled);
            self.deposit(node, damage, point);
            self.impact.last_hit[node as usize] = Some(self.clock);
            total += damage;
        }
        total
    }

    pub fn replay(&mut self, impacts: &[BufferedImpact]) {
        for impact in impacts {
            match *impact {
                BufferedImpact::External {
                    node,
                    force,
                    dt,
                    local_point,
                } => {
                    self.on_impact(node, force, dt, local_point);
                }
                BufferedImpact::Internal {
                    node_a,
                    node_b,
                    force,
                    dt,
                    local_points,
                } => {
                    self.on_internal_impact(node_a, node_b, force, dt, local_points);
                }
            }
        }
    }

    /// Queues direct damage, bypassing thresholds and cooldown
    pub fn apply_node_damage(&mut self, node: NodeIndex, amount: f32) -> bool {
        if !self.is_live_tracked(node) || !(amount > 0.0) {
            return false;
        }
        self.impact.pending[node as usize] += amount;
        true
    }

    /// Nodes the next `tick` would destroy, without committing anything
    pub fn preview_tick(&self) -> Vec<NodeIndex> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, state)| {
                let pending = self.impact.pending[i];
                match (state.destroyed, state.health) {
                    (false, Some(health)) if pending > 0.0 && health - pending <= 0.0 => {
                        Some(i as NodeIndex)
                    }
                    _ => None,
                }
            })
            .collect()
    }

    /// Commits pending damage and advances the cooldown clock
    pub fn tick(&mut self, dt: f32, mut on_destroyed: impl FnMut(NodeIndex)) -> usize {
        self.clock += dt.max(0.0);
        let mut destroyed = 0;
        for (i, state) in self.nodes.iter_mut().enumerate() {
            let pending = std::mem::take(&mut self.impact.pending[i]);
            if pending <= 0.0 || state.destroyed {
                continue;
            }
            let Some(health) = state.health else {
                continue;
            };
            let remaining = (health - pending).max(0.0);
            state.health = Some(remaining);
            if remaining <= 0.0 {
                state.destroyed = true;
                destroyed += 1;
                on_destroyed(i as NodeIndex);
            }
        }
        destroyed
    }

    /// Marks `node` dead immediately; returns false if it already was
    pub fn force_destroy(&mut self, node: NodeIndex) -> bool {
        let Some(state) = self.nodes.get_mut(node as usize) else {
            return false;
        };
        if state.destroyed {
            return false;
        }
        state.destroyed = true;
        if state.health.is_some() {
            state.health = Some(0.0);
        }
        self.impact.pending[node as usize] = 0.0;
        true
    }

    pub fn capture_impact_state(&self) -> ImpactState {
        self.impact.clone()
    }

    pub fn restore_impact_state(&mut self, state: ImpactState) {
        self.impact = state;
    }

    pub fn pending_damage(&self, node: NodeIndex) -> f32 {
        self.impact
            .pending
            .get(node as usize)
            .copied()
            .unwrap_or(0.0)
    }
}
