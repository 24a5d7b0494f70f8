//! Grabbing an entity at a distance along the controller's ray.
//!
//! While the trigger is squeezed a laser overlay runs from the hand to the
//! picked entity. Clicking the trigger starts distance holding: the entity is
//! pulled toward a target at the grab radius along the controller's pointing
//! axis. Pushing or pulling the hand along that axis changes the radius, and
//! hand translation is exaggerated with distance so far objects stay
//! controllable.

use super::common::{read_world, write_world, HeldEntity, Thresholds};
use crate::controller::{capability, ControllerData, Hand, Pose};
use crate::dispatcher::{
    DispatchError, DispatcherModule, LaserLock, ModuleParameters, RunningState,
};
use crate::world::{EntityId, OverlayId, OverlayKind, SharedWorld, World};
use glam::Vec3;
use tracing::{debug, info, warn};

pub const FAR_GRAB_PRIORITY: i32 = 540;

/// Multiplied by the hand to object distance
const RADIUS_FACTOR: f32 = 3.5;
/// How quickly held objects move to their target, in seconds
const ACTION_TIMEFRAME: f32 = 0.1;
/// Mass at which the action timeframe is unmodified
const UNITY_MASS: f32 = 1200.0;
/// Distance at which the action timeframe is unmodified
const UNITY_DISTANCE: f32 = 6.0;
const MINIMUM_GRAB_RADIUS: f32 = 0.1;
const RADIAL_GRAB_AMPLIFIER: f32 = 10.0;
const VELOCITY_AVERAGING_TIME: f32 = 0.016;

/// Time an object of `mass` at `distance` takes to reach its hold target
pub fn distance_grab_timescale(mass: f32, distance: f32) -> f32 {
    (ACTION_TIMEFRAME * mass / UNITY_MASS * distance / UNITY_DISTANCE).max(ACTION_TIMEFRAME)
}

/// Exaggeration applied to hand motion for an object grabbed at `grab_radius`
pub fn radius_scalar(grab_radius: f32) -> f32 {
    (grab_radius + 1.0).ln().max(1.0)
}

#[derive(Clone, Debug)]
struct DistanceHold {
    held: HeldEntity,
    grab_radius: f32,
    radial_velocity: f32,
    radius_scalar: f32,
    mass: f32,
    /// Entity position relative to the point at the grab radius
    offset: Vec3,
    /// Hand translation beyond 1:1, accumulated from exaggerated motion
    amplified_motion: Vec3,
    previous_controller_position: Vec3,
}

impl DistanceHold {
    /// `None` while the entity is held or equipped by the other hand
    fn start(
        world: &mut World,
        hand: Hand,
        id: EntityId,
        pose: &Pose,
        grab_distance: f32,
    ) -> Result<Option<Self>, DispatchError> {
        let props = world.entity(id).ok_or(DispatchError::EntityNotFound(id))?;
        let grab_radius = grab_distance.max(MINIMUM_GRAB_RADIUS);
        let offset = props.position - (pose.position + pose.up() * grab_radius);
        let mass = props.mass();

        let Some(held) = HeldEntity::begin(world, hand, id)? else {
            return Ok(None);
        };
        Ok(Some(Self {
            held,
            grab_radius,
            radial_velocity: 0.0,
            radius_scalar: radius_scalar(grab_radius),
            mass,
            offset,
            amplified_motion: Vec3::ZERO,
            previous_controller_position: pose.position,
        }))
    }

    fn step(&mut self, world: &mut World, pose: &Pose, delta_time: f32) -> Result<(), DispatchError> {
        let id = self.held.id;
        let entity_position = world
            .entity(id)
            .map(|props| props.position)
            .ok_or(DispatchError::EntityNotFound(id))?;
        let controller = pose.position;

        let radius = (entity_position.distance(controller) * self.radius_scalar * RADIUS_FACTOR).max(1.0);
        let hand_delta = controller - self.previous_controller_position;
        self.previous_controller_position = controller;
        self.amplified_motion += hand_delta * (radius - 1.0);

        if delta_time > 0.0 {
            let last_velocity = hand_delta / delta_time;
            let toward_entity = (entity_position - controller).normalize_or_zero();
            let new_radial_velocity = last_velocity.dot(toward_entity);

            let blend = (delta_time / VELOCITY_AVERAGING_TIME).clamp(0.0, 1.0);
            self.radial_velocity = blend * new_radial_velocity + (1.0 - blend) * self.radial_velocity;
            self.grab_radius += self.radial_velocity * delta_time * self.grab_radius * RADIAL_GRAB_AMPLIFIER;
        }
        // a zero radius can never grow again
        self.grab_radius = self.grab_radius.max(MINIMUM_GRAB_RADIUS);

        let target = controller + pose.up() * self.grab_radius + self.offset + self.amplified_motion;
        let timescale = distance_grab_timescale(self.mass, entity_position.distance(controller));
        let blend = if delta_time > 0.0 {
            (delta_time / timescale).min(1.0)
        } else {
            0.0
        };

        self.held
            .move_to(world, entity_position.lerp(target, blend), None, delta_time)
    }
}

pub struct FarGrabEntity {
    hand: Hand,
    parameters: ModuleParameters,
    thresholds: Thresholds,
    world: SharedWorld,
    target: Option<EntityId>,
    /// Laser end point relative to the target's position
    lock_offset: Vec3,
    laser: Option<OverlayId>,
    hold: Option<DistanceHold>,
}

impl FarGrabEntity {
    pub fn new(hand: Hand, world: SharedWorld, thresholds: Thresholds) -> Self {
        let parameters = ModuleParameters::new(FAR_GRAB_PRIORITY, [hand.group()])
            .with_required_capabilities([capability::TRIGGERS, capability::POSES, capability::RAY_PICKS]);
        Self {
            hand,
            parameters,
            thresholds,
            world,
            target: None,
            lock_offset: Vec3::ZERO,
            laser: None,
            hold: None,
        }
    }

    pub fn name_for(hand: Hand) -> String {
        format!("{}FarGrabEntity", hand.label())
    }

    pub fn laser(&self) -> Option<OverlayId> {
        self.laser
    }

    pub fn is_holding(&self) -> bool {
        self.hold.is_some()
    }

    fn running_state(&self) -> RunningState {
        match self.target {
            Some(target) => RunningState::running()
                .with_targets(vec![target])
                .with_laser_lock(LaserLock {
                    hand: self.hand,
                    target,
                    offset: self.lock_offset,
                }),
            None => RunningState::running(),
        }
    }

    fn update_laser(&mut self, world: &mut World, pose: &Pose) -> Result<(), DispatchError> {
        let target = self.target.ok_or_else(|| {
            DispatchError::RunFailed(format!("{} far grab has no target", self.hand))
        })?;
        let end = world
            .entity(target)
            .map(|props| props.position + self.lock_offset)
            .ok_or(DispatchError::EntityNotFound(target))?;
        let kind = OverlayKind::Laser {
            hand: self.hand,
            start: pose.position,
            end,
        };

        match self.laser {
            Some(id) if world.update_overlay(id, kind) => {}
            _ => {
                let id = world.add_overlay(kind);
                debug!("{} far grab laser {} created", self.hand, id);
                self.laser = Some(id);
            }
        }
        Ok(())
    }

    fn end_far_grab(&mut self) -> Result<(), DispatchError> {
        let laser = self.laser.take();
        let hold = self.hold.take();
        self.target = None;
        if laser.is_none() && hold.is_none() {
            return Ok(());
        }

        let mut world = write_world(&self.world)?;
        if let Some(id) = laser {
            world.remove_overlay(id);
        }
        if let Some(hold) = hold {
            hold.held.release(&mut world);
            info!("{} hand far grab released entity {}", self.hand, hold.held.id);
        }
        Ok(())
    }
}

impl DispatcherModule for FarGrabEntity {
    fn parameters(&self) -> &ModuleParameters {
        &self.parameters
    }

    fn is_ready(
        &mut self,
        data: &ControllerData,
        _delta_time: f32,
    ) -> Result<RunningState, DispatchError> {
        self.target = None;
        if !data.controller_location(self.hand).valid
            || !self.thresholds.trigger_squeezed(data.trigger_value(self.hand))
        {
            return Ok(RunningState::stopped());
        }

        let pick = data.ray_pick(self.hand);
        let Some(id) = pick.entity() else {
            return Ok(RunningState::stopped());
        };
        if pick.distance > self.thresholds.far_grab_max_distance {
            return Ok(RunningState::stopped());
        }

        let world = read_world(&self.world)?;
        let Some(props) = world.entity(id) else {
            return Ok(RunningState::stopped());
        };
        if !props.is_grabbable() || !props.is_free() {
            return Ok(RunningState::stopped());
        }

        debug!("{} far grab ready on {} at {:.2}m", self.hand, id, pick.distance);
        self.target = Some(id);
        self.lock_offset = pick.intersection - props.position;
        Ok(self.running_state())
    }

    fn run(&mut self, data: &ControllerData, delta_time: f32) -> Result<RunningState, DispatchError> {
        if self.thresholds.trigger_released(data.trigger_value(self.hand)) || self.target.is_none() {
            self.end_far_grab()?;
            return Ok(RunningState::stopped());
        }

        let pose = *data.controller_location(self.hand);
        if !pose.valid {
            return Ok(self.running_state());
        }

        let world_handle = self.world.clone();
        let mut world = write_world(&world_handle)?;

        if self.hold.is_none() && data.trigger_click(self.hand) {
            if let Some(target) = self.target {
                let grab_distance = data.ray_pick(self.hand).distance;
                match DistanceHold::start(&mut world, self.hand, target, &pose, grab_distance)? {
                    Some(hold) => {
                        info!("{} hand far grabbed entity {}", self.hand, target);
                        self.hold = Some(hold);
                    }
                    None => {
                        debug!("{} far grab target {} taken by the other hand", self.hand, target);
                        drop(world);
                        self.end_far_grab()?;
                        return Ok(RunningState::stopped());
                    }
                }
            }
        }

        if let Some(hold) = self.hold.as_mut() {
            hold.step(&mut world, &pose, delta_time)?;
        }
        self.update_laser(&mut world, &pose)?;

        Ok(self.running_state())
    }

    fn stop(&mut self) -> Result<(), DispatchError> {
        self.end_far_grab()
            .map_err(|e| DispatchError::StopFailed(format!("{} far grab: {}", self.hand, e)))
    }

    fn cleanup(&mut self) {
        if let Err(e) = self.end_far_grab() {
            warn!("{} far grab cleanup failed: {}", self.hand, e);
        }
    }
}
