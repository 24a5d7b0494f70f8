//! Grabbing an entity within reach of the hand.

use super::common::{write_world, HeldEntity, Thresholds, NEAR_GRAB_RADIUS};
use crate::controller::{capability, ControllerData, Hand};
use crate::dispatcher::{DispatchError, DispatcherModule, ModuleParameters, RunningState};
use crate::world::{EntityId, SharedWorld};
use glam::{Quat, Vec3};
use tracing::{debug, info, warn};

pub const NEAR_GRAB_PRIORITY: i32 = 500;

/// Offset of the held entity in controller space, captured at grab time
#[derive(Clone, Copy, Debug)]
struct Grip {
    held: HeldEntity,
    local_position: Vec3,
    local_rotation: Quat,
}

pub struct NearGrabEntity {
    hand: Hand,
    parameters: ModuleParameters,
    thresholds: Thresholds,
    world: SharedWorld,
    target: Option<EntityId>,
    grip: Option<Grip>,
}

impl NearGrabEntity {
    pub fn new(hand: Hand, world: SharedWorld, thresholds: Thresholds) -> Self {
        let parameters = ModuleParameters::new(NEAR_GRAB_PRIORITY, [hand.group()])
            .with_required_capabilities([
                capability::TRIGGERS,
                capability::POSES,
                capability::NEARBY_ENTITIES,
            ]);
        Self {
            hand,
            parameters,
            thresholds,
            world,
            target: None,
            grip: None,
        }
    }

    pub fn name_for(hand: Hand) -> String {
        format!("{}NearGrabEntity", hand.label())
    }

    pub fn held_entity(&self) -> Option<EntityId> {
        self.grip.map(|grip| grip.held.id)
    }

    /// Closest grabbable entity whose bounds touch the near-grab sphere
    fn find_target(&self, data: &ControllerData) -> Option<EntityId> {
        let pose = data.controller_location(self.hand);
        if !pose.valid {
            return None;
        }
        let radius = NEAR_GRAB_RADIUS * data.avatar_scale;
        data.nearby_entities(self.hand)
            .iter()
            .filter(|props| props.is_grabbable() && props.is_free())
            .find(|props| props.bounds().intersects_sphere(pose.position, radius))
            .map(|props| props.id)
    }

    /// False if the entity was taken by the other hand in the meantime
    fn start_grab(&mut self, data: &ControllerData, id: EntityId) -> Result<bool, DispatchError> {
        let pose = *data.controller_location(self.hand);
        let mut world = write_world(&self.world)?;
        let props = world.entity(id).ok_or(DispatchError::EntityNotFound(id))?;
        let local_position = pose.inverse_transform_point(props.position);
        let local_rotation = pose.orientation.inverse() * props.rotation;

        let Some(held) = HeldEntity::begin(&mut world, self.hand, id)? else {
            return Ok(false);
        };
        info!("{} hand grabbed entity {}", self.hand, id);
        self.grip = Some(Grip {
            held,
            local_position,
            local_rotation,
        });
        Ok(true)
    }

    fn end_grab(&mut self) -> Result<(), DispatchError> {
        self.target = None;
        if let Some(grip) = self.grip.take() {
            let mut world = write_world(&self.world)?;
            grip.held.release(&mut world);
            info!("{} hand released entity {}", self.hand, grip.held.id);
        }
        Ok(())
    }
}

impl DispatcherModule for NearGrabEntity {
    fn parameters(&self) -> &ModuleParameters {
        &self.parameters
    }

    fn is_ready(
        &mut self,
        data: &ControllerData,
        _delta_time: f32,
    ) -> Result<RunningState, DispatchError> {
        self.target = None;
        if !self.thresholds.trigger_squeezed(data.trigger_value(self.hand)) {
            return Ok(RunningState::stopped());
        }

        match self.find_target(data) {
            Some(id) => {
                debug!("{} near grab ready on {}", self.hand, id);
                self.target = Some(id);
                Ok(RunningState::running().with_targets(vec![id]))
            }
            None => Ok(RunningState::stopped()),
        }
    }

    fn run(&mut self, data: &ControllerData, delta_time: f32) -> Result<RunningState, DispatchError> {
        if self.thresholds.trigger_released(data.trigger_value(self.hand)) {
            self.end_grab()?;
            return Ok(RunningState::stopped());
        }

        if self.grip.is_none() {
            let id = match self.target {
                Some(id) => id,
                None => return Ok(RunningState::stopped()),
            };
            if !self.start_grab(data, id)? {
                self.target = None;
                return Ok(RunningState::stopped());
            }
        }

        let pose = *data.controller_location(self.hand);
        let Some(grip) = self.grip.as_mut() else {
            return Ok(RunningState::stopped());
        };
        if pose.valid {
            let mut world = write_world(&self.world)?;
            grip.held.move_to(
                &mut world,
                pose.transform_point(grip.local_position),
                Some(pose.orientation * grip.local_rotation),
                delta_time,
            )?;
        }

        Ok(RunningState::running().with_targets(vec![grip.held.id]))
    }

    fn stop(&mut self) -> Result<(), DispatchError> {
        self.end_grab()
            .map_err(|e| DispatchError::StopFailed(format!("{} near grab: {}", self.hand, e)))
    }

    fn cleanup(&mut self) {
        if let Err(e) = self.end_grab() {
            warn!("{} near grab cleanup failed: {}", self.hand, e);
        }
    }
}
