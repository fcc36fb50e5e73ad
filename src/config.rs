use bevy::math::Vec3;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::damage::DamageOptions;
use crate::error::DestructionError;
use crate::solver::bond_solver::SolverSettings;

/// How rollback captures physics state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotMode {
    /// Clone the entire physics world (contacts and warm-start included)
    World,
    /// Record pose and velocity of every live body
    Bodies,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollisionMode {
    /// Structure pieces collide with each other
    Full,
    /// Structure pieces only collide with ground and projectiles
    Single,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResimulationPolicy {
    pub max_passes: u32,
    pub fracture_on_overstress: bool,
    pub damage_triggers_resimulation: bool,
    pub snapshot_mode: SnapshotMode,
}

impl Default for ResimulationPolicy {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_RESIMULATION_PASSES,
            fracture_on_overstress: true,
            damage_triggers_resimulation: true,
            snapshot_mode: SnapshotMode::World,
        }
    }
}

impl ResimulationPolicy {
    pub fn enabled(&self, damage_enabled: bool) -> bool {
        self.max_passes > 0
            && (self.fracture_on_overstress
                || (damage_enabled && self.damage_triggers_resimulation))
    }
}

/// Static ground slab created at build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundConfig {
    pub half_extents: Vec3,
    pub position: Vec3,
}

impl Default for GroundConfig {
    fn default() -> Self {
        Self {
            half_extents: Vec3::new(50.0, 0.5, 50.0),
            position: Vec3::new(0.0, -0.5, 0.0),
        }
    }
}

/// Tuning parameters for one destructible structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub gravity: Vec3,
    pub fixed_dt: f32,
    pub friction: f32,
    pub restitution: f32,
    /// Multiplies every bond stress limit
    pub material_scale: f32,
    pub collision_mode: CollisionMode,
    /// Destroy one-node non-support fragments instead of simulating them
    pub skip_single_bodies: bool,
    pub solver_gravity_enabled: bool,
    pub ground: Option<GroundConfig>,
    pub damage: DamageOptions,
    pub resimulation: ResimulationPolicy,
    pub solver: SolverSettings,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, DEFAULT_GRAVITY_Y, 0.0),
            fixed_dt: DEFAULT_FIXED_DT,
            friction: DEFAULT_FRICTION,
            restitution: DEFAULT_RESTITUTION,
            material_scale: 1.0,
            collision_mode: CollisionMode::Full,
            skip_single_bodies: false,
            solver_gravity_enabled: true,
            ground: Some(GroundConfig::default()),
            damage: DamageOptions::default(),
            resimulation: ResimulationPolicy::default(),
            solver: SolverSettings::default(),
        }
    }
}

impl CoreConfig {
    pub fn validate(&self) -> Result<(), DestructionError> {
        if !(self.fixed_dt.is_finite() && self.fixed_dt > 0.0) {
            return Err(DestructionError::InvalidConfig(format!(
                "fixed_dt must be positive, got {}",
                self.fixed_dt
            )));
        }
        if !self.gravity.is_finite() {
            return Err(DestructionError::InvalidConfig("gravity is not finite".into()));
        }
        if !(self.material_scale > 0.0) {
            return Err(DestructionError::InvalidConfig(format!(
                "material_scale must be positive, got {}",
                self.material_scale
            )));
        }
        self.damage.validate()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self, DestructionError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DestructionError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
