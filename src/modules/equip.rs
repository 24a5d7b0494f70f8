//! Equipping entities by their equip hotspot.
//!
//! An equipped entity is parented to the hand joint and follows it without
//! the hand having to keep squeezing. It is dropped by squeezing and then
//! releasing the grip again.

use super::common::{read_world, write_world, Thresholds};
use crate::controller::{capability, ControllerData, Hand};
use crate::dispatcher::{DispatchError, DispatcherModule, ModuleParameters, RunningState};
use crate::world::{EntityId, SharedWorld, World};
use glam::{Quat, Vec3};
use tracing::{debug, info, warn};

pub const EQUIP_PRIORITY: i32 = 300;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EquipOutcome {
    Equipped,
    /// Already parented to this hand, nothing changed
    AlreadyEquipped,
    /// Locked entities are never equipped
    Locked,
    /// A hand is holding the entity with a grab
    Held,
}

/// Parents `id` to the hand joint using the hotspot's joint offset.
/// Equipping an entity already on this hand is a no-op.
pub fn equip(world: &mut World, hand: Hand, id: EntityId) -> Result<EquipOutcome, DispatchError> {
    let props = world.entity(id).ok_or(DispatchError::EntityNotFound(id))?;
    if props.locked {
        return Ok(EquipOutcome::Locked);
    }
    if props.parent_joint == Some(hand) {
        return Ok(EquipOutcome::AlreadyEquipped);
    }
    if props.held_by.is_some() {
        return Ok(EquipOutcome::Held);
    }

    let offset = props
        .equip_hotspot
        .as_ref()
        .map(|hotspot| hotspot.offset_for(hand))
        .unwrap_or_default();
    let joint = *world.avatar().hand_joint(hand);

    world.edit_entity(id, |props| {
        props.parent_joint = Some(hand);
        props.local_position = offset.position;
        props.local_rotation = offset.rotation;
        props.dynamic = false;
        props.velocity = Vec3::ZERO;
        props.angular_velocity = Vec3::ZERO;
        if joint.valid {
            props.position = joint.transform_point(offset.position);
            props.rotation = joint.orientation * offset.rotation;
        }
    });
    Ok(EquipOutcome::Equipped)
}

/// Un-parents `id` from whatever joint holds it and hands it back to physics
pub fn unequip(world: &mut World, id: EntityId) -> Result<(), DispatchError> {
    let found = world.edit_entity(id, |props| {
        props.parent_joint = None;
        props.local_position = Vec3::ZERO;
        props.local_rotation = Quat::IDENTITY;
        props.dynamic = true;
    });
    if found {
        Ok(())
    } else {
        Err(DispatchError::EntityNotFound(id))
    }
}

pub struct EquipEntity {
    hand: Hand,
    parameters: ModuleParameters,
    thresholds: Thresholds,
    world: SharedWorld,
    target: Option<EntityId>,
    equipped: Option<EntityId>,
    equipped_with_secondary: bool,
    preparing_release: bool,
}

impl EquipEntity {
    pub fn new(hand: Hand, world: SharedWorld, thresholds: Thresholds) -> Self {
        let parameters = ModuleParameters::new(EQUIP_PRIORITY, [hand.group(), hand.equip_group()])
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
            equipped: None,
            equipped_with_secondary: false,
            preparing_release: false,
        }
    }

    pub fn name_for(hand: Hand) -> String {
        format!("{}EquipEntity", hand.label())
    }

    pub fn equipped_entity(&self) -> Option<EntityId> {
        self.equipped
    }

    /// Closest unlocked entity whose hotspot is within reach of the hand
    fn find_hotspot(&self, data: &ControllerData) -> Option<EntityId> {
        let pose = data.controller_location(self.hand);
        if !pose.valid {
            return None;
        }
        data.nearby_entities(self.hand)
            .iter()
            .filter(|props| !props.locked && props.held_by.is_none())
            .filter_map(|props| {
                let hotspot = props.equip_hotspot.as_ref()?;
                let position = props.hotspot_world_position()?;
                let distance = position.distance(pose.position);
                (distance <= hotspot.radius * data.avatar_scale).then_some((distance, props.id))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, id)| id)
    }

    fn end_equip(&mut self) -> Result<(), DispatchError> {
        self.target = None;
        self.preparing_release = false;
        self.equipped_with_secondary = false;
        if let Some(id) = self.equipped.take() {
            let mut world = write_world(&self.world)?;
            match unequip(&mut world, id) {
                Ok(()) => info!("{} hand unequipped entity {}", self.hand, id),
                Err(e) => warn!("{} hand could not unequip: {}", self.hand, e),
            }
        }
        Ok(())
    }
}

impl DispatcherModule for EquipEntity {
    fn parameters(&self) -> &ModuleParameters {
        &self.parameters
    }

    fn is_ready(
        &mut self,
        data: &ControllerData,
        _delta_time: f32,
    ) -> Result<RunningState, DispatchError> {
        self.target = None;
        let squeezed = self.thresholds.trigger_squeezed(data.trigger_value(self.hand))
            || self.thresholds.secondary_squeezed(data.secondary_value(self.hand));
        if !squeezed {
            return Ok(RunningState::stopped());
        }

        match self.find_hotspot(data) {
            Some(id) => {
                debug!("{} equip ready on {}", self.hand, id);
                self.target = Some(id);
                Ok(RunningState::running().with_targets(vec![id]))
            }
            None => Ok(RunningState::stopped()),
        }
    }

    fn run(&mut self, data: &ControllerData, _delta_time: f32) -> Result<RunningState, DispatchError> {
        let secondary = self.thresholds.secondary_squeezed(data.secondary_value(self.hand));

        if self.equipped.is_none() {
            let Some(id) = self.target else {
                return Ok(RunningState::stopped());
            };
            let outcome = {
                let mut world = write_world(&self.world)?;
                equip(&mut world, self.hand, id)?
            };
            match outcome {
                EquipOutcome::Locked | EquipOutcome::Held => {
                    self.target = None;
                    return Ok(RunningState::stopped());
                }
                EquipOutcome::Equipped | EquipOutcome::AlreadyEquipped => {
                    info!("{} hand equipped entity {} ({:?})", self.hand, id, outcome);
                    self.equipped = Some(id);
                    self.equipped_with_secondary = secondary;
                }
            }
        }

        let Some(id) = self.equipped else {
            return Ok(RunningState::stopped());
        };
        let still_attached = read_world(&self.world)?
            .entity(id)
            .is_some_and(|props| props.parent_joint == Some(self.hand));
        if !still_attached {
            debug!("{} hand lost equipped entity {}", self.hand, id);
            self.equipped = None;
            self.end_equip()?;
            return Ok(RunningState::stopped());
        }

        // The grip that equipped the entity has to be let go once before a
        // new squeeze and release drops it
        if secondary && !self.equipped_with_secondary {
            self.preparing_release = true;
        }
        if self.preparing_release && !secondary {
            self.end_equip()?;
            return Ok(RunningState::stopped());
        }
        if !secondary {
            self.equipped_with_secondary = false;
        }

        Ok(RunningState::running().with_targets(vec![id]))
    }

    fn stop(&mut self) -> Result<(), DispatchError> {
        self.end_equip()
            .map_err(|e| DispatchError::StopFailed(format!("{} equip: {}", self.hand, e)))
    }

    fn cleanup(&mut self) {
        if let Err(e) = self.end_equip() {
            warn!("{} equip cleanup failed: {}", self.hand, e);
        }
    }
}
