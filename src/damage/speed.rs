//! Relative-speed damage scaling.
//!
//! Resting contacts are damped, fast hits are boosted, with a power curve in
//! between. External and internal contacts have separate thresholds.

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::DestructionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContactKind {
    /// Structure against ground or a projectile
    External,
    /// Structure against structure
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedThresholds {
    pub slow: f32,
    pub fast: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedScaling {
    pub slow_speed_factor: f32,
    pub fast_speed_factor: f32,
    pub external: SpeedThresholds,
    pub internal: SpeedThresholds,
    pub curve_exp: f32,
}

impl Default for SpeedScaling {
    fn default() -> Self {
        Self {
            slow_speed_factor: DEFAULT_SLOW_SPEED_FACTOR,
            fast_speed_factor: DEFAULT_FAST_SPEED_FACTOR,
            external: SpeedThresholds {
                slow: DEFAULT_SLOW_SPEED_THRESHOLD,
                fast: DEFAULT_FAST_SPEED_THRESHOLD,
            },
            internal: SpeedThresholds {
                slow: DEFAULT_INTERNAL_SLOW_SPEED_THRESHOLD,
                fast: DEFAULT_INTERNAL_FAST_SPEED_THRESHOLD,
            },
            curve_exp: DEFAULT_SPEED_CURVE_EXP,
        }
    }
}

impl SpeedScaling {
    /// Neutral scaling: every contact counts at face value
    pub fn flat() -> Self {
        Self {
            slow_speed_factor: 1.0,
            fast_speed_factor: 1.0,
            ..Default::default()
        }
    }

    pub fn thresholds(&self, kind: ContactKind) -> SpeedThresholds {
        match kind {
            ContactKind::External => self.external,
            ContactKind::Internal => self.internal,
        }
    }

    pub fn factor(&self, relative_speed: f32, kind: ContactKind) -> f32 {
        let SpeedThresholds { slow, fast } = self.thresholds(kind);
        let speed = if relative_speed.is_finite() {
            relative_speed.abs()
        } else {
            fast
        };
        if speed <= slow {
            return self.slow_speed_factor;
        }
        if speed >= fast {
            return self.fast_speed_factor;
        }
        let t = (speed - slow) / (fast - slow);
        self.slow_speed_factor
            + (self.fast_speed_factor - self.slow_speed_factor) * t.powf(self.curve_exp)
    }

    pub fn validate(&self) -> Result<(), DestructionError> {
        for (name, t) in [("external", self.external), ("internal", self.internal)] {
            if !(t.slow >= 0.0 && t.fast > t.slow) {
                return Err(DestructionError::InvalidConfig(format!(
                    "damage.speed.{name}: need 0 <= slow < fast, got {} / {}",
                    t.slow, t.fast
                )));
            }
        }
        if !(self.slow_speed_factor >= 0.0 && self.fast_speed_factor >= 0.0) {
            return Err(DestructionError::InvalidConfig(
                "damage.speed factors must be >= 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_factor_bands() {
        let scaling = SpeedScaling::default();
        assert_eq!(scaling.factor(0.0, ContactKind::External), 0.1);
        assert_eq!(scaling.factor(100.0, ContactKind::External), 3.0);
        assert_eq!(scaling.factor(-100.0, ContactKind::External), 3.0);
    }

    #[test]
    fn test_speed_factor_curve_is_monotone() {
        let scaling = SpeedScaling::default();
        let mut last = scaling.factor(0.0, ContactKind::Internal);
        for i in 1..40 {
            let f = scaling.factor(i as f32 * 0.5, ContactKind::Internal);
            assert!(f >= last);
            last = f;
        }
        // halfway through the band with a squared curve
        let mid = scaling.factor(8.5, ContactKind::Internal);
        assert!((mid - (0.1 + 2.9 * 0.25)).abs() < 1e-4);
    }

    #[test]
    fn test_kinds_use_own_thresholds() {
        let scaling = SpeedScaling::default();
        // 1.5 m/s is above the external slow band but inside the internal one
        assert!(scaling.factor(1.5, ContactKind::External) > 0.1);
        assert_eq!(scaling.factor(1.5, ContactKind::Internal), 0.1);
    }

    #[test]
    fn test_flat_scaling() {
        let scaling = SpeedScaling::flat();
        assert_eq!(scaling.factor(0.0, ContactKind::External), 1.0);
        assert_eq!(scaling.factor(10.0, ContactKind::Internal), 1.0);
    }

    #[test]
    fn test_invalid_band_rejected() {
        let mut scaling = SpeedScaling::default();
        scaling.internal.fast = 0.5;
        assert!(scaling.validate().is_err());
    }
}
