//! Centralized tuning defaults for the destruction core.
//!
//! Every value here is a default for a config field; nothing reads these
//! directly at runtime except `Default` impls.

// =====================================================
// Simulation
// =====================================================

/// Fixed physics timestep (60 Hz)
pub const DEFAULT_FIXED_DT: f32 = 1.0 / 60.0;

/// World gravity along -Y (m/s^2)
pub const DEFAULT_GRAVITY_Y: f32 = -9.81;

/// Collider friction coefficient for structure pieces
pub const DEFAULT_FRICTION: f32 = 0.6;

/// Collider restitution for structure pieces
pub const DEFAULT_RESTITUTION: f32 = 0.05;

/// Upper bound on step → rollback → reapply passes per frame
pub const DEFAULT_MAX_RESIMULATION_PASSES: u32 = 2;

// =====================================================
// Damage
// =====================================================

/// Health per unit volume of a node
pub const DEFAULT_STRENGTH_PER_VOLUME: f32 = 10_000.0;

/// Damage per unit impulse before mass scaling
pub const DEFAULT_K_IMPACT: f32 = 1.0;

/// Exponent applied to node mass when dividing impulse
pub const DEFAULT_MASS_EXPONENT: f32 = 0.5;

/// External impulses below this (N·s) deal no damage
pub const DEFAULT_MIN_IMPULSE_THRESHOLD: f32 = 50.0;

/// Internal (self-contact) impulses below this deal no damage
pub const DEFAULT_INTERNAL_MIN_IMPULSE_THRESHOLD: f32 = 100.0;

/// Multiplier for damage coming from structure-vs-structure contacts
pub const DEFAULT_INTERNAL_CONTACT_SCALE: f32 = 1.5;

/// Per-node damage cooldown window
pub const DEFAULT_CONTACT_COOLDOWN_MS: f32 = 120.0;

/// Splash radius around a known impact point (m); 0 disables splash
pub const DEFAULT_SPLASH_RADIUS: f32 = 1.5;

/// Splash weight exponent: (1 - d/r)^exp
pub const DEFAULT_SPLASH_FALLOFF_EXP: f32 = 2.0;

/// Damage multiplier for contacts slower than the slow threshold
pub const DEFAULT_SLOW_SPEED_FACTOR: f32 = 0.1;

/// Damage multiplier for contacts faster than the fast threshold
pub const DEFAULT_FAST_SPEED_FACTOR: f32 = 3.0;

/// Relative speed (m/s) under which external contacts count as resting
pub const DEFAULT_SLOW_SPEED_THRESHOLD: f32 = 1.0;

/// Relative speed (m/s) above which external contacts get the full boost
pub const DEFAULT_FAST_SPEED_THRESHOLD: f32 = 20.0;

/// Relative speed under which internal contacts count as resting
pub const DEFAULT_INTERNAL_SLOW_SPEED_THRESHOLD: f32 = 2.0;

/// Relative speed above which internal contacts get the full boost
pub const DEFAULT_INTERNAL_FAST_SPEED_THRESHOLD: f32 = 15.0;

/// Interpolation curve exponent between slow and fast factors
pub const DEFAULT_SPEED_CURVE_EXP: f32 = 2.0;

// =====================================================
// Stress solver
// =====================================================

/// Compressive stress limit per unit bond area (Pa, before material scale)
pub const DEFAULT_COMPRESSION_LIMIT: f32 = 2.0e6;

/// Tensile stress limit per unit bond area
pub const DEFAULT_TENSION_LIMIT: f32 = 4.0e5;

/// Shear stress limit per unit bond area
pub const DEFAULT_SHEAR_LIMIT: f32 = 6.0e5;

/// Gauss-Seidel sweeps per solver update
pub const DEFAULT_SOLVER_ITERATIONS: u32 = 24;

/// Bonds with a smaller area are treated as this area to keep stiffness finite
pub const MIN_BOND_AREA: f32 = 1.0e-4;

// =====================================================
// Projectiles
// =====================================================

/// Projectile lifetime when the spawn does not specify one (s)
pub const DEFAULT_PROJECTILE_TTL_SECS: f32 = 8.0;
