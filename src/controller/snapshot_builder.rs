//! Assembles the per-frame [`ControllerData`] from raw device input and the
//! current world state.

use super::controller_data::{capability, ControllerData, Hand, PickKind, Pose, RayPick};
use crate::persistence::InputSettings;
use crate::world::World;
use chrono::Local;
use tracing::trace;

/// Overlays closer than this to a hand are reported as nearby
const NEARBY_OVERLAY_RADIUS: f32 = 0.3;

/// Unprocessed device state for one frame
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RawControllerInput {
    pub trigger_values: [f32; 2],
    pub secondary_values: [f32; 2],
    pub thumb_clicks: [bool; 2],
    pub hand_poses: [Pose; 2],
    pub head_pose: Pose,
}

impl RawControllerInput {
    pub fn with_trigger(mut self, hand: Hand, value: f32) -> Self {
        self.trigger_values[hand.index()] = value;
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
        self.hand_poses[hand.index()] = pose;
        self
    }
}

pub struct SnapshotBuilder {
    settings: InputSettings,
    frame: u64,
}

impl SnapshotBuilder {
    pub fn new(settings: InputSettings) -> Self {
        Self { settings, frame: 0 }
    }

    pub fn settings(&self) -> &InputSettings {
        &self.settings
    }

    /// Number of snapshots built so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn build(&mut self, raw: &RawControllerInput, world: &World) -> ControllerData {
        self.frame += 1;

        let avatar_scale = world.avatar().scale;
        let mut data = ControllerData {
            frame: self.frame,
            timestamp: Local::now(),
            head_pose: raw.head_pose,
            avatar_scale,
            ..Default::default()
        };

        data.capabilities.insert(capability::TRIGGERS.to_string());
        let mut any_pose = false;

        for hand in Hand::BOTH {
            let i = hand.index();
            let trigger = raw.trigger_values[i].clamp(0.0, 1.0);
            data.trigger_values[i] = trigger;
            data.trigger_clicks[i] = trigger >= self.settings.trigger_click_value;
            data.secondary_values[i] = raw.secondary_values[i].clamp(0.0, 1.0);
            data.thumb_clicks[i] = raw.thumb_clicks[i];

            let pose = raw.hand_poses[i];
            data.controller_locations[i] = pose;
            if !pose.valid {
                continue;
            }
            any_pose = true;

            let search_radius = self.settings.nearby_search_radius * avatar_scale;
            data.nearby_entity_properties[i] = world.entities_near(pose.position, search_radius);
            data.nearby_overlay_ids[i] =
                world.overlays_near(pose.position, NEARBY_OVERLAY_RADIUS * avatar_scale);

            if self.settings.ray_picks_enabled {
                data.ray_picks[i] = match world.ray_pick(
                    pose.position,
                    pose.up(),
                    self.settings.far_grab_max_distance,
                ) {
                    Some(hit) => RayPick {
                        kind: PickKind::Entity,
                        object_id: Some(hit.entity),
                        distance: hit.distance,
                        intersection: hit.intersection,
                        surface_normal: hit.surface_normal,
                    },
                    None => RayPick::default(),
                };
            }
        }

        if any_pose {
            data.capabilities.insert(capability::POSES.to_string());
            data.capabilities.insert(capability::NEARBY_ENTITIES.to_string());
            data.capabilities.insert(capability::OVERLAYS.to_string());
            if self.settings.ray_picks_enabled {
                data.capabilities.insert(capability::RAY_PICKS.to_string());
            }
        }

        trace!(
            "Frame {} snapshot: triggers={:?} capabilities={:?}",
            data.frame,
            data.trigger_values,
            data.capabilities
        );
        data
    }
}
