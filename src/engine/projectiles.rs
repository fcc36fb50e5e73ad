//! Projectile queue: spawned at the start of a step, expired by age.

use bevy::math::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::DestructionCore;
use crate::constants::DEFAULT_PROJECTILE_TTL_SECS;
use crate::physics::{
    BodyDesc, BodyHandle, BodyKind, ColliderDesc, ColliderHandle, ColliderShape, CollisionGroups,
    PhysicsWorld,
};
use crate::solver::StressSolver;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileSpawn {
    pub position: Vec3,
    pub velocity: Vec3,
    pub radius: f32,
    pub mass: f32,
    /// Lifetime in seconds; `None` uses the default
    pub ttl_secs: Option<f32>,
}

impl ProjectileSpawn {
    pub fn new(position: Vec3, velocity: Vec3) -> Self {
        Self {
            position,
            velocity,
            radius: 0.25,
            mass: 10.0,
            ttl_secs: None,
        }
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projectile {
    pub id: u64,
    pub body: BodyHandle,
    pub collider: ColliderHandle,
    pub radius: f32,
    pub age: f32,
    pub ttl: f32,
}

impl<P: PhysicsWorld, S: StressSolver> DestructionCore<P, S> {
    pub(crate) fn spawn_pending_projectiles(&mut self) {
        while let Some(spawn) = self.pending_spawns.pop_front() {
            let body = self.physics.create_body(&BodyDesc {
                ccd: true,
                ..BodyDesc::new(BodyKind::Dynamic)
                    .with_pose(spawn.position, Quat::IDENTITY)
                    .with_velocity(spawn.velocity, Vec3::ZERO)
            });
            let collider = self.physics.create_collider(
                &ColliderDesc {
                    shape: ColliderShape::Ball {
                        radius: spawn.radius.max(0.01),
                    },
                    local_offset: Vec3::ZERO,
                    mass: spawn.mass.max(0.001),
                    friction: self.config.friction,
                    restitution: self.config.restitution,
                    groups: CollisionGroups::projectile(),
                    contact_force_events: false,
                },
                body,
            );
            let id = self.next_projectile_id;
            self.next_projectile_id += 1;
            trace!(id, "projectile spawned");
            self.projectiles.push(Projectile {
                id,
                body,
                collider,
                radius: spawn.radius,
                age: 0.0,
                ttl: spawn.ttl_secs.unwrap_or(DEFAULT_PROJECTILE_TTL_SECS),
            });
        }
    }

    /// Ages projectiles and removes the expired ones
    pub(crate) fn expire_projectiles(&mut self, dt: f32) {
        let physics = &mut self.physics;
        self.projectiles.retain_mut(|p| {
            p.age += dt;
            if p.age >= p.ttl {
                physics.remove_body(p.body);
                false
            } else {
                true
            }
        });
    }

    pub(crate) fn is_projectile_collider(&self, collider: ColliderHandle) -> bool {
        self.projectiles.iter().any(|p| p.collider == collider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::engine::tests::column;

    #[test]
    fn test_projectile_spawned_on_next_step() {
        let mut core = DestructionCore::rapier(&column(2), CoreConfig::default()).unwrap();
        core.enqueue_projectile(ProjectileSpawn::new(Vec3::new(0.0, 1.0, 10.0), Vec3::ZERO));
        assert!(core.projectiles().is_empty());
        core.step(None);
        assert_eq!(core.projectiles().len(), 1);
        assert_eq!(core.projectiles()[0].id, 0);
    }

    #[test]
    fn test_projectile_expires() {
        let mut core = DestructionCore::rapier(&column(2), CoreConfig::default()).unwrap();
        let spawn = ProjectileSpawn {
            ttl_secs: Some(0.05),
            ..ProjectileSpawn::new(Vec3::new(0.0, 5.0, 10.0), Vec3::ZERO)
        };
        core.enqueue_projectile(spawn);
        let bodies_before = core.physics().body_count();
        core.step(None);
        assert_eq!(core.projectiles().len(), 1);
        for _ in 0..3 {
            core.step(None);
        }
        assert!(core.projectiles().is_empty());
        assert_eq!(core.physics().body_count(), bodies_before);
    }
}
