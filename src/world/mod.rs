//! Simulated host world the controller modules act upon.
//!
//! Stands in for the engine's entity server: an entity table with the grab
//! related properties, laser overlays, and the local avatar with its two hand
//! joints. Entities parented to a hand joint follow that joint every step.
//!
//! The world is shared between the frame loop and the modules as
//! [`SharedWorld`]. All access happens on the frame loop's task, the lock
//! only makes the sharing explicit.

pub mod geometry;

use crate::controller::controller_data::{Hand, Pose};
use geometry::Aabb;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub type SharedWorld = Arc<RwLock<World>>;

/// Identifier of an entity in the world
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an overlay (laser, highlight) in the world
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OverlayId(Uuid);

impl OverlayId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OverlayId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OverlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Offset of an equipped entity relative to a hand joint
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JointOffset {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for JointOffset {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

/// Point on an entity where a hand can equip it
#[derive(Clone, Debug, PartialEq)]
pub struct EquipHotspot {
    /// Hotspot position in entity space
    pub local_position: Vec3,
    pub radius: f32,
    pub left_hand: JointOffset,
    pub right_hand: JointOffset,
}

impl EquipHotspot {
    pub fn new(local_position: Vec3, radius: f32) -> Self {
        Self {
            local_position,
            radius,
            left_hand: JointOffset::default(),
            right_hand: JointOffset::default(),
        }
    }

    pub fn offset_for(&self, hand: Hand) -> JointOffset {
        match hand {
            Hand::Left => self.left_hand,
            Hand::Right => self.right_hand,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EntityProperties {
    pub id: EntityId,
    pub name: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub dimensions: Vec3,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub density: f32,
    /// Whether physics simulates this entity
    pub dynamic: bool,
    pub grabbable: bool,
    pub locked: bool,
    /// Hand joint this entity is parented to
    pub parent_joint: Option<Hand>,
    /// Hand currently holding this entity kinematically
    pub held_by: Option<Hand>,
    pub local_position: Vec3,
    pub local_rotation: Quat,
    pub equip_hotspot: Option<EquipHotspot>,
    /// Bumped on every edit
    pub revision: u64,
}

impl EntityProperties {
    pub fn new(name: impl Into<String>, position: Vec3, dimensions: Vec3) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            position,
            rotation: Quat::IDENTITY,
            dimensions,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            density: 1000.0,
            dynamic: true,
            grabbable: true,
            locked: false,
            parent_joint: None,
            held_by: None,
            local_position: Vec3::ZERO,
            local_rotation: Quat::IDENTITY,
            equip_hotspot: None,
            revision: 0,
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    pub fn with_grabbable(mut self, grabbable: bool) -> Self {
        self.grabbable = grabbable;
        self
    }

    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    pub fn with_equip_hotspot(mut self, hotspot: EquipHotspot) -> Self {
        self.equip_hotspot = Some(hotspot);
        self
    }

    /// Bounds ignore rotation
    pub fn bounds(&self) -> Aabb {
        Aabb::from_center_dimensions(self.position, self.dimensions)
    }

    pub fn is_grabbable(&self) -> bool {
        self.grabbable && !self.locked
    }

    /// Neither held by a hand nor equipped
    pub fn is_free(&self) -> bool {
        self.held_by.is_none() && self.parent_joint.is_none()
    }

    pub fn mass(&self) -> f32 {
        self.dimensions.x * self.dimensions.y * self.dimensions.z * self.density
    }

    /// World position of the equip hotspot, if the entity has one
    pub fn hotspot_world_position(&self) -> Option<Vec3> {
        self.equip_hotspot
            .as_ref()
            .map(|hotspot| self.position + self.rotation * hotspot.local_position)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OverlayKind {
    Laser { hand: Hand, start: Vec3, end: Vec3 },
    /// Destination marker shown while aiming a teleport
    TeleportTarget { hand: Hand, position: Vec3 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Overlay {
    pub id: OverlayId,
    pub kind: OverlayKind,
}

impl Overlay {
    pub fn anchor(&self) -> Vec3 {
        match self.kind {
            OverlayKind::Laser { start, .. } => start,
            OverlayKind::TeleportTarget { position, .. } => position,
        }
    }
}

/// The local avatar: scale and the two hand joints
#[derive(Clone, Debug, PartialEq)]
pub struct Avatar {
    pub position: Vec3,
    pub scale: f32,
    pub hand_joints: [Pose; 2],
}

impl Default for Avatar {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            scale: 1.0,
            hand_joints: [Pose::default(); 2],
        }
    }
}

impl Avatar {
    pub fn hand_joint(&self, hand: Hand) -> &Pose {
        &self.hand_joints[hand.index()]
    }
}

/// Hit returned by [`World::ray_pick`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntityHit {
    pub entity: EntityId,
    pub distance: f32,
    pub intersection: Vec3,
    pub surface_normal: Vec3,
}

#[derive(Debug, Default)]
pub struct World {
    entities: HashMap<EntityId, EntityProperties>,
    overlays: HashMap<OverlayId, Overlay>,
    avatar: Avatar,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedWorld {
        Arc::new(RwLock::new(self))
    }

    pub fn spawn(&mut self, properties: EntityProperties) -> EntityId {
        let id = properties.id;
        debug!("Spawning entity {} ({})", properties.name, id);
        self.entities.insert(id, properties);
        id
    }

    pub fn remove(&mut self, id: EntityId) -> Option<EntityProperties> {
        self.entities.remove(&id)
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntityProperties> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityProperties> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Applies `edit` to an entity and bumps its revision.
    /// Returns false when the entity does not exist.
    pub fn edit_entity<F>(&mut self, id: EntityId, edit: F) -> bool
    where
        F: FnOnce(&mut EntityProperties),
    {
        match self.entities.get_mut(&id) {
            Some(properties) => {
                edit(properties);
                properties.revision += 1;
                true
            }
            None => false,
        }
    }

    /// Entities whose bounds are within `radius` of `point`, closest first
    pub fn entities_near(&self, point: Vec3, radius: f32) -> Vec<EntityProperties> {
        let mut nearby: Vec<(f32, &EntityProperties)> = self
            .entities
            .values()
            .map(|props| (props.bounds().distance_to(point), props))
            .filter(|(distance, _)| *distance <= radius)
            .collect();
        nearby.sort_by(|a, b| a.0.total_cmp(&b.0));
        nearby.into_iter().map(|(_, props)| props.clone()).collect()
    }

    /// Closest entity hit by a ray within `max_distance`
    pub fn ray_pick(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<EntityHit> {
        let direction = direction.try_normalize()?;
        self.entities
            .values()
            .filter_map(|props| {
                let bounds = props.bounds();
                bounds.ray_intersection(origin, direction).map(|distance| {
                    let intersection = origin + direction * distance;
                    EntityHit {
                        entity: props.id,
                        distance,
                        intersection,
                        surface_normal: bounds.face_normal(intersection),
                    }
                })
            })
            .filter(|hit| hit.distance <= max_distance)
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    /// Entities currently parented to the given hand joint
    pub fn children_of(&self, hand: Hand) -> Vec<EntityId> {
        self.entities
            .values()
            .filter(|props| props.parent_joint == Some(hand))
            .map(|props| props.id)
            .collect()
    }

    pub fn add_overlay(&mut self, kind: OverlayKind) -> OverlayId {
        let id = OverlayId::new();
        self.overlays.insert(id, Overlay { id, kind });
        id
    }

    pub fn update_overlay(&mut self, id: OverlayId, kind: OverlayKind) -> bool {
        match self.overlays.get_mut(&id) {
            Some(overlay) => {
                overlay.kind = kind;
                true
            }
            None => false,
        }
    }

    pub fn remove_overlay(&mut self, id: OverlayId) -> bool {
        self.overlays.remove(&id).is_some()
    }

    pub fn overlay(&self, id: OverlayId) -> Option<&Overlay> {
        self.overlays.get(&id)
    }

    pub fn overlays(&self) -> impl Iterator<Item = &Overlay> {
        self.overlays.values()
    }

    pub fn overlays_near(&self, point: Vec3, radius: f32) -> Vec<OverlayId> {
        self.overlays
            .values()
            .filter(|overlay| overlay.anchor().distance(point) <= radius)
            .map(|overlay| overlay.id)
            .collect()
    }

    pub fn avatar(&self) -> &Avatar {
        &self.avatar
    }

    pub fn avatar_mut(&mut self) -> &mut Avatar {
        &mut self.avatar
    }

    pub fn set_hand_joint(&mut self, hand: Hand, pose: Pose) {
        self.avatar.hand_joints[hand.index()] = pose;
    }

    /// Advances the world by one frame: integrates free dynamic entities and
    /// moves parented entities along with their hand joint.
    pub fn step(&mut self, delta_time: f32) {
        let joints = self.avatar.hand_joints;
        for props in self.entities.values_mut() {
            match props.parent_joint {
                Some(hand) => {
                    let joint = joints[hand.index()];
                    if joint.valid {
                        props.position = joint.transform_point(props.local_position);
                        props.rotation = joint.orientation * props.local_rotation;
                    }
                }
                None if props.dynamic && delta_time > 0.0 => {
                    props.position += props.velocity * delta_time;
                }
                None => {}
            }
        }
    }

    /// Logs a one-line summary per entity
    pub fn log_summary(&self) {
        for props in self.entities.values() {
            info!(
                "Entity {}: position={:?} dynamic={} parent={:?} revision={}",
                props.name, props.position, props.dynamic, props.parent_joint, props.revision
            );
        }
        info!(
            "Avatar scale {:.3}, {} overlay(s) alive",
            self.avatar.scale,
            self.overlays.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entities_near_are_sorted_by_distance() {
        let mut world = World::new();
        let far = world.spawn(EntityProperties::new("far", Vec3::new(0.0, 0.0, 0.8), Vec3::splat(0.1)));
        let near = world.spawn(EntityProperties::new("near", Vec3::new(0.0, 0.0, 0.2), Vec3::splat(0.1)));
        world.spawn(EntityProperties::new("out", Vec3::new(0.0, 0.0, 5.0), Vec3::splat(0.1)));

        let found: Vec<EntityId> = world
            .entities_near(Vec3::ZERO, 1.0)
            .into_iter()
            .map(|props| props.id)
            .collect();
        assert_eq!(found, vec![near, far]);
    }

    #[test]
    fn ray_pick_returns_closest_hit() {
        let mut world = World::new();
        let front = world.spawn(EntityProperties::new("front", Vec3::new(0.0, 2.0, 0.0), Vec3::splat(0.5)));
        world.spawn(EntityProperties::new("back", Vec3::new(0.0, 6.0, 0.0), Vec3::splat(0.5)));

        let hit = world.ray_pick(Vec3::ZERO, Vec3::Y, 100.0).expect("hit");
        assert_eq!(hit.entity, front);
        assert!((hit.distance - 1.75).abs() < 1e-5);
        assert!(world.ray_pick(Vec3::ZERO, Vec3::Y, 1.0).is_none());
    }

    #[test]
    fn edit_bumps_revision_and_reports_missing() {
        let mut world = World::new();
        let id = world.spawn(EntityProperties::new("cube", Vec3::ZERO, Vec3::ONE));
        assert!(world.edit_entity(id, |props| props.dynamic = false));
        assert_eq!(world.entity(id).map(|p| p.revision), Some(1));
        assert!(!world.edit_entity(EntityId::new(), |_| {}));
    }

    #[test]
    fn parented_entities_follow_hand_joint() {
        let mut world = World::new();
        let id = world.spawn(EntityProperties::new("gun", Vec3::ZERO, Vec3::splat(0.2)));
        world.edit_entity(id, |props| {
            props.parent_joint = Some(Hand::Right);
            props.local_position = Vec3::new(0.0, 0.1, 0.0);
        });
        world.set_hand_joint(Hand::Right, Pose::new(Vec3::new(1.0, 1.0, 1.0), Quat::IDENTITY));
        world.step(1.0 / 90.0);

        let props = world.entity(id).expect("entity");
        assert!((props.position - Vec3::new(1.0, 1.1, 1.0)).length() < 1e-5);
        assert_eq!(world.children_of(Hand::Right), vec![id]);
    }
}
