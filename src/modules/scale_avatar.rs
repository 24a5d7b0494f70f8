//! Two-handed avatar scaling: squeeze both grips and move the hands apart or
//! together.

use super::common::{write_world, Thresholds};
use crate::controller::{capability, ControllerData, Hand};
use crate::dispatcher::{DispatchError, DispatcherModule, ModuleParameters, RunningState};
use crate::world::SharedWorld;
use tracing::{debug, info};

pub const SCALE_AVATAR_PRIORITY: i32 = 600;
pub const SCALE_AVATAR_NAME: &str = "ScaleAvatar";

const MIN_AVATAR_SCALE: f32 = 0.005;
const MAX_AVATAR_SCALE: f32 = 1000.0;
/// Hand separations below this are ignored
const MIN_HAND_DISTANCE: f32 = 0.01;

#[derive(Clone, Copy, Debug)]
struct Gesture {
    initial_distance: f32,
    initial_scale: f32,
}

pub struct ScaleAvatar {
    parameters: ModuleParameters,
    thresholds: Thresholds,
    world: SharedWorld,
    gesture: Option<Gesture>,
}

impl ScaleAvatar {
    pub fn new(world: SharedWorld, thresholds: Thresholds) -> Self {
        let parameters = ModuleParameters::new(
            SCALE_AVATAR_PRIORITY,
            [Hand::Left.group(), Hand::Right.group()],
        )
        .with_required_capabilities([capability::TRIGGERS, capability::POSES]);
        Self {
            parameters,
            thresholds,
            world,
            gesture: None,
        }
    }

    fn both_grips(&self, data: &ControllerData) -> bool {
        Hand::BOTH.iter().all(|&hand| {
            data.controller_location(hand).valid
                && self.thresholds.secondary_squeezed(data.secondary_value(hand))
        })
    }

    fn hand_distance(data: &ControllerData) -> f32 {
        data.controller_location(Hand::Left)
            .position
            .distance(data.controller_location(Hand::Right).position)
    }
}

impl DispatcherModule for ScaleAvatar {
    fn parameters(&self) -> &ModuleParameters {
        &self.parameters
    }

    fn is_ready(
        &mut self,
        data: &ControllerData,
        _delta_time: f32,
    ) -> Result<RunningState, DispatchError> {
        if self.both_grips(data) && Self::hand_distance(data) > MIN_HAND_DISTANCE {
            Ok(RunningState::running())
        } else {
            Ok(RunningState::stopped())
        }
    }

    fn run(&mut self, data: &ControllerData, _delta_time: f32) -> Result<RunningState, DispatchError> {
        if !self.both_grips(data) {
            self.gesture = None;
            debug!("Avatar scaling ended");
            return Ok(RunningState::stopped());
        }

        let distance = Self::hand_distance(data);
        let mut world = write_world(&self.world)?;
        let gesture = *self.gesture.get_or_insert_with(|| {
            info!("Avatar scaling started at scale {:.3}", world.avatar().scale);
            Gesture {
                initial_distance: distance.max(MIN_HAND_DISTANCE),
                initial_scale: world.avatar().scale,
            }
        });

        let scale = (gesture.initial_scale * distance / gesture.initial_distance)
            .clamp(MIN_AVATAR_SCALE, MAX_AVATAR_SCALE);
        world.avatar_mut().scale = scale;

        Ok(RunningState::running())
    }

    fn stop(&mut self) -> Result<(), DispatchError> {
        self.gesture = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Pose;
    use crate::world::World;
    use glam::{Quat, Vec3};

    fn grips(separation: f32, left_grip: f32) -> ControllerData {
        ControllerData::default()
            .with_capabilities([capability::TRIGGERS, capability::POSES])
            .with_pose(Hand::Left, Pose::new(Vec3::new(-separation / 2.0, 1.0, 0.0), Quat::IDENTITY))
            .with_pose(Hand::Right, Pose::new(Vec3::new(separation / 2.0, 1.0, 0.0), Quat::IDENTITY))
            .with_secondary(Hand::Left, left_grip)
            .with_secondary(Hand::Right, 1.0)
    }

    #[test]
    fn spreading_hands_scales_up() {
        let world = World::new().into_shared();
        let mut module = ScaleAvatar::new(world.clone(), Thresholds::default());

        let start = grips(0.4, 1.0);
        assert!(module.is_ready(&start, 0.0).expect("probe").running);
        module.run(&start, 0.0).expect("start");
        module.run(&grips(0.8, 1.0), 0.0).expect("spread");

        let scale = world.read().expect("world").avatar().scale;
        assert!((scale - 2.0).abs() < 1e-5);
    }

    #[test]
    fn one_grip_is_not_enough() {
        let world = World::new().into_shared();
        let mut module = ScaleAvatar::new(world, Thresholds::default());
        assert!(!module.is_ready(&grips(0.4, 0.0), 0.0).expect("probe").running);
    }

    #[test]
    fn releasing_a_grip_ends_gesture() {
        let world = World::new().into_shared();
        let mut module = ScaleAvatar::new(world.clone(), Thresholds::default());
        module.run(&grips(0.4, 1.0), 0.0).expect("start");
        assert!(!module.run(&grips(0.2, 0.0), 0.0).expect("release").running);
        assert_eq!(world.read().expect("world").avatar().scale, 1.0);
    }

    #[test]
    fn claims_both_hands() {
        let module = ScaleAvatar::new(World::new().into_shared(), Thresholds::default());
        assert!(module.parameters().declares("leftHand"));
        assert!(module.parameters().declares("rightHand"));
    }
}
