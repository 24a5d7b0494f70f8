//! Per-frame controller snapshot handed to every dispatcher module.

use crate::world::{EntityId, EntityProperties, OverlayId};
use chrono::{DateTime, Local};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{self, Display};

/// Exclusion group of the head target
pub const HEAD_GROUP: &str = "head";

/// Names of the data sets a snapshot can provide. Modules list the ones they
/// depend on in their required capabilities.
pub mod capability {
    pub const TRIGGERS: &str = "triggers";
    pub const POSES: &str = "poses";
    pub const NEARBY_ENTITIES: &str = "nearbyEntities";
    pub const RAY_PICKS: &str = "rayPicks";
    pub const OVERLAYS: &str = "overlays";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub const BOTH: [Hand; 2] = [Hand::Left, Hand::Right];

    pub fn index(self) -> usize {
        match self {
            Hand::Left => 0,
            Hand::Right => 1,
        }
    }

    pub fn other(self) -> Hand {
        match self {
            Hand::Left => Hand::Right,
            Hand::Right => Hand::Left,
        }
    }

    /// Exclusion group guarding this hand
    pub fn group(self) -> &'static str {
        match self {
            Hand::Left => "leftHand",
            Hand::Right => "rightHand",
        }
    }

    /// Exclusion group guarding equip attachments on this hand
    pub fn equip_group(self) -> &'static str {
        match self {
            Hand::Left => "leftHandEquip",
            Hand::Right => "rightHandEquip",
        }
    }

    /// Module name prefix, e.g. "Left" in "LeftNearGrabEntity"
    pub fn label(self) -> &'static str {
        match self {
            Hand::Left => "Left",
            Hand::Right => "Right",
        }
    }
}

impl Display for Hand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Tracked pose of a controller, hand joint or the head
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
    pub valid: bool,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            valid: false,
        }
    }
}

impl Pose {
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
            valid: true,
        }
    }

    /// Pointing axis of a controller
    pub fn up(&self) -> Vec3 {
        self.orientation * Vec3::Y
    }

    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.position + self.orientation * local
    }

    pub fn inverse_transform_point(&self, world: Vec3) -> Vec3 {
        self.orientation.inverse() * (world - self.position)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PickKind {
    #[default]
    None,
    Entity,
}

/// Result of the per-hand ray cast
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RayPick {
    pub kind: PickKind,
    pub object_id: Option<EntityId>,
    pub distance: f32,
    pub intersection: Vec3,
    pub surface_normal: Vec3,
}

impl RayPick {
    pub fn entity(&self) -> Option<EntityId> {
        match self.kind {
            PickKind::Entity => self.object_id,
            PickKind::None => None,
        }
    }
}

/// Read-only input snapshot shared by all modules during one frame
#[derive(Clone, Debug)]
pub struct ControllerData {
    pub frame: u64,
    pub timestamp: DateTime<Local>,

    // Indexed by Hand::index()
    pub trigger_values: [f32; 2],
    pub trigger_clicks: [bool; 2],
    pub secondary_values: [f32; 2],
    pub thumb_clicks: [bool; 2],
    pub controller_locations: [Pose; 2],
    pub nearby_entity_properties: [Vec<EntityProperties>; 2],
    pub nearby_overlay_ids: [Vec<OverlayId>; 2],
    pub ray_picks: [RayPick; 2],

    pub head_pose: Pose,
    pub avatar_scale: f32,
    pub capabilities: BTreeSet<String>,
}

impl Default for ControllerData {
    fn default() -> Self {
        Self {
            frame: 0,
            timestamp: Local::now(),
            trigger_values: [0.0; 2],
            trigger_clicks: [false; 2],
            secondary_values: [0.0; 2],
            thumb_clicks: [false; 2],
            controller_locations: [Pose::default(); 2],
            nearby_entity_properties: [Vec::new(), Vec::new()],
            nearby_overlay_ids: [Vec::new(), Vec::new()],
            ray_picks: [RayPick::default(); 2],
            head_pose: Pose::default(),
            avatar_scale: 1.0,
            capabilities: BTreeSet::new(),
        }
    }
}

impl ControllerData {
    pub fn trigger_value(&self, hand: Hand) -> f32 {
        self.trigger_values[hand.index()]
    }

    pub fn trigger_click(&self, hand: Hand) -> bool {
        self.trigger_clicks[hand.index()]
    }

    pub fn secondary_value(&self, hand: Hand) -> f32 {
        self.secondary_values[hand.index()]
    }

    /// Primary thumb pad pressed
    pub fn thumb_click(&self, hand: Hand) -> bool {
        self.thumb_clicks[hand.index()]
    }

    pub fn controller_location(&self, hand: Hand) -> &Pose {
        &self.controller_locations[hand.index()]
    }

    pub fn nearby_entities(&self, hand: Hand) -> &[EntityProperties] {
        &self.nearby_entity_properties[hand.index()]
    }

    pub fn nearby_overlays(&self, hand: Hand) -> &[OverlayId] {
        &self.nearby_overlay_ids[hand.index()]
    }

    pub fn ray_pick(&self, hand: Hand) -> &RayPick {
        &self.ray_picks[hand.index()]
    }

    /// Looks an entity up in either hand's nearby list
    pub fn nearby_entity(&self, id: EntityId) -> Option<&EntityProperties> {
        self.nearby_entity_properties
            .iter()
            .flat_map(|list| list.iter())
            .find(|props| props.id == id)
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains(name)
    }

    pub fn has_capabilities(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }

    pub fn with_capabilities<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_trigger(mut self, hand: Hand, value: f32, clicked: bool) -> Self {
        self.trigger_values[hand.index()] = value;
        self.trigger_clicks[hand.index()] = clicked;
        self
    }

    pub fn with_secondary(mut self, hand: Hand, value: f32) -> Self {
        self.secondary_values[hand.index()] = value;
        self
    }

    pub fn with_thumb(mut self, hand: Hand, pressed: bool) -> Self {
        self.thumb_clicks[hand.index()] = pressed;
        self
    }

    pub fn with_pose(mut self, hand: Hand, pose: Pose) -> Self {
        self.controller_locations[hand.index()] = pose;
        self
    }
}
