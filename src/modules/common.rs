//! Pieces shared by the grab modules: thresholds, world locking and the
//! bookkeeping for an entity held kinematically by a hand.

use crate::controller::Hand;
use crate::dispatcher::DispatchError;
use crate::persistence::InputSettings;
use crate::world::{EntityId, SharedWorld, World};
use glam::Vec3;
use std::sync::{RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Radius of the sphere around the hand used for near grabs, in meters at
/// avatar scale 1
pub const NEAR_GRAB_RADIUS: f32 = 0.15;

/// Input thresholds a module evaluates every frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub trigger_on: f32,
    pub trigger_off: f32,
    pub bumper_on: f32,
    pub far_grab_max_distance: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&InputSettings::default())
    }
}

impl From<&InputSettings> for Thresholds {
    fn from(settings: &InputSettings) -> Self {
        Self {
            trigger_on: settings.trigger_on_value,
            trigger_off: settings.trigger_off_value,
            bumper_on: settings.bumper_on_value,
            far_grab_max_distance: settings.far_grab_max_distance,
        }
    }
}

impl Thresholds {
    pub fn trigger_squeezed(&self, value: f32) -> bool {
        value > self.trigger_on
    }

    pub fn trigger_released(&self, value: f32) -> bool {
        value < self.trigger_off
    }

    pub fn secondary_squeezed(&self, value: f32) -> bool {
        value > self.bumper_on
    }
}

pub fn read_world(world: &SharedWorld) -> Result<RwLockReadGuard<'_, World>, DispatchError> {
    world
        .read()
        .map_err(|e| DispatchError::WorldUnavailable(e.to_string()))
}

pub fn write_world(world: &SharedWorld) -> Result<RwLockWriteGuard<'_, World>, DispatchError> {
    world
        .write()
        .map_err(|e| DispatchError::WorldUnavailable(e.to_string()))
}

/// An entity made kinematic while a hand moves it
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeldEntity {
    pub id: EntityId,
    pub hand: Hand,
    /// `dynamic` flag before the grab, restored on release
    pub original_dynamic: bool,
    pub last_position: Vec3,
    /// Velocity tracked while held, imparted on release
    pub velocity: Vec3,
}

impl HeldEntity {
    /// Takes the entity out of physics simulation for `hand`. Returns `None`
    /// while another hand holds or has equipped the entity.
    pub fn begin(world: &mut World, hand: Hand, id: EntityId) -> Result<Option<Self>, DispatchError> {
        let props = world.entity(id).ok_or(DispatchError::EntityNotFound(id))?;
        if !props.is_free() {
            debug!(
                "Entity {} not free for {} hand (held by {:?}, equipped to {:?})",
                id, hand, props.held_by, props.parent_joint
            );
            return Ok(None);
        }
        let held = Self {
            id,
            hand,
            original_dynamic: props.dynamic,
            last_position: props.position,
            velocity: Vec3::ZERO,
        };
        world.edit_entity(id, |props| {
            props.dynamic = false;
            props.velocity = Vec3::ZERO;
            props.held_by = Some(hand);
        });
        Ok(Some(held))
    }

    /// Moves the entity and updates the tracked velocity
    pub fn move_to(
        &mut self,
        world: &mut World,
        position: Vec3,
        rotation: Option<glam::Quat>,
        delta_time: f32,
    ) -> Result<(), DispatchError> {
        let moved = world.edit_entity(self.id, |props| {
            props.position = position;
            if let Some(rotation) = rotation {
                props.rotation = rotation;
            }
        });
        if !moved {
            return Err(DispatchError::EntityNotFound(self.id));
        }

        if delta_time > 0.0 {
            self.velocity = (position - self.last_position) / delta_time;
        }
        self.last_position = position;
        Ok(())
    }

    /// Restores the original dynamic flag and imparts the tracked velocity.
    /// A vanished entity is only logged.
    pub fn release(&self, world: &mut World) {
        let hand = self.hand;
        let original_dynamic = self.original_dynamic;
        let velocity = if original_dynamic { self.velocity } else { Vec3::ZERO };
        let found = world.edit_entity(self.id, |props| {
            props.dynamic = original_dynamic;
            props.velocity = velocity;
            if props.held_by == Some(hand) {
                props.held_by = None;
            }
        });

        if found {
            debug!("Released entity {} with velocity {:?}", self.id, velocity);
        } else {
            warn!("Entity {} vanished while held", self.id);
        }
    }
}
