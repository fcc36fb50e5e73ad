//! Bevy integration: one destruction step per `FixedUpdate` tick.

use bevy::prelude::*;
use std::sync::{Arc, RwLock};
use tracing::error;

use crate::config::CoreConfig;
use crate::engine::{DestructionCore, StepReport};
use crate::logging::LoggingPlugin;
use crate::structure::ScenarioDesc;

pub struct DestructionPlugin {
    pub scenario: ScenarioDesc,
    pub config: CoreConfig,
}

impl DestructionPlugin {
    pub fn new(scenario: ScenarioDesc, config: CoreConfig) -> Self {
        Self { scenario, config }
    }
}

impl Plugin for DestructionPlugin {
    fn build(&self, app: &mut App) {
        if !app.is_plugin_added::<LoggingPlugin>() {
            app.add_plugins(LoggingPlugin::default());
        }
        app.add_event::<DestructionStepEvent>();
        match DestructionCore::rapier(&self.scenario, self.config.clone()) {
            Ok(core) => {
                app.insert_resource(DestructionResource(Arc::new(RwLock::new(core))))
                    .add_systems(FixedUpdate, destruction_step_system);
            }
            Err(e) => error!("destruction core not created: {e}"),
        }
    }
}

#[derive(Resource, Clone)]
pub struct DestructionResource(pub Arc<RwLock<DestructionCore>>);

/// Sent for every step that split or destroyed something
#[derive(Event, Debug, Clone)]
pub struct DestructionStepEvent(pub StepReport);

fn destruction_step_system(
    time: Res<Time>,
    core: Res<DestructionResource>,
    mut events: EventWriter<DestructionStepEvent>,
) {
    if let Ok(mut core) = core.0.write() {
        let report = core.step(Some(time.delta_secs()));
        if !report.split_events.is_empty() || !report.destroyed_nodes.is_empty() {
            events.send(DestructionStepEvent(report));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{Bond, Node};

    fn pair() -> ScenarioDesc {
        ScenarioDesc {
            nodes: vec![
                Node {
                    centroid: Vec3::new(0.0, 0.5, 0.0),
                    mass: 0.0,
                    volume: 1.0,
                },
                Node {
                    centroid: Vec3::new(0.0, 1.5, 0.0),
                    mass: 50.0,
                    volume: 1.0,
                },
            ],
            bonds: vec![Bond {
                index: 0,
                node0: 0,
                node1: 1,
                centroid: Vec3::new(0.0, 1.0, 0.0),
                normal: Vec3::Y,
                area: 1.0,
            }],
            sizes: vec![],
        }
    }

    #[test]
    fn test_plugin_inserts_resource() {
        let mut app = App::new();
        app.add_plugins(DestructionPlugin::new(pair(), CoreConfig::default()));
        let resource = app.world().get_resource::<DestructionResource>().unwrap();
        let core = resource.0.read().unwrap();
        assert_eq!(core.segments().len(), 2);
        assert!(app
            .world()
            .contains_resource::<Events<DestructionStepEvent>>());
    }

    #[test]
    fn test_plugin_installs_logging_once() {
        let mut app = App::new();
        app.add_plugins(LoggingPlugin::default())
            .add_plugins(DestructionPlugin::new(pair(), CoreConfig::default()));
        assert!(app.is_plugin_added::<LoggingPlugin>());
        assert!(app.world().contains_resource::<DestructionResource>());

        let mut bare = App::new();
        bare.add_plugins(DestructionPlugin::new(pair(), CoreConfig::default()));
        assert!(bare.is_plugin_added::<LoggingPlugin>());
    }

    #[test]
    fn test_plugin_skips_invalid_scenario() {
        let mut app = App::new();
        app.add_plugins(DestructionPlugin::new(
            ScenarioDesc::default(),
            CoreConfig::default(),
        ));
        assert!(app.world().get_resource::<DestructionResource>().is_none());
    }

    #[test]
    fn test_shared_handle_steps_core() {
        let mut app = App::new();
        app.add_plugins(DestructionPlugin::new(pair(), CoreConfig::default()));
        let shared = app.world().resource::<DestructionResource>().clone();
        let report = shared.0.write().unwrap().step(None);
        assert_eq!(report.passes, 1);
    }
}
