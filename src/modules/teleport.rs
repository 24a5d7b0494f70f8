//! Teleporting the avatar to a surface picked with the hand's ray.
//!
//! Pressing the thumb pad (with the trigger released) starts aiming. A target
//! marker is shown once the short cool-in has passed and the ray points at a
//! floor-like surface far enough away. Releasing the pad moves the avatar
//! there; releasing while the marker is hidden cancels.

use super::common::{write_world, Thresholds};
use crate::controller::{capability, ControllerData, Hand, RayPick, HEAD_GROUP};
use crate::dispatcher::{DispatchError, DispatcherModule, ModuleParameters, RunningState};
use crate::world::{OverlayId, OverlayKind, SharedWorld, World};
use glam::Vec3;
use tracing::{debug, info, warn};

pub const TELEPORT_PRIORITY: i32 = 80;

/// Surfaces tilted further than this from straight up are not walkable
const MAX_ANGLE_FROM_UP_DEGREES: f32 = 70.0;
/// Targets this close to the avatar cancel the teleport
const TELEPORT_CANCEL_RANGE: f32 = 1.0;
/// Releasing before this much aiming time cancels
const COOL_IN_SECONDS: f32 = 0.5;
/// Avatar root height above its feet, at scale 1
const DEFAULT_ROOT_TO_FOOT_OFFSET: f32 = 0.5;

/// Whether a surface with this normal can be stood on
pub fn is_walkable(surface_normal: Vec3) -> bool {
    let Some(normal) = surface_normal.try_normalize() else {
        return false;
    };
    normal.y >= (90.0 - MAX_ANGLE_FROM_UP_DEGREES).to_radians().sin()
}

pub struct Teleport {
    hand: Hand,
    parameters: ModuleParameters,
    thresholds: Thresholds,
    world: SharedWorld,
    /// Seconds spent aiming, `None` while idle
    aiming: Option<f32>,
    marker: Option<OverlayId>,
}

impl Teleport {
    pub fn new(hand: Hand, world: SharedWorld, thresholds: Thresholds) -> Self {
        let parameters = ModuleParameters::new(TELEPORT_PRIORITY, [hand.group(), HEAD_GROUP])
            .with_required_capabilities([capability::TRIGGERS, capability::POSES, capability::RAY_PICKS]);
        Self {
            hand,
            parameters,
            thresholds,
            world,
            aiming: None,
            marker: None,
        }
    }

    pub fn name_for(hand: Hand) -> String {
        format!("{}Teleport", hand.label())
    }

    pub fn marker(&self) -> Option<OverlayId> {
        self.marker
    }

    /// Intersection point when the pick lands on a walkable surface out of
    /// cancel range
    fn destination(world: &World, pick: &RayPick) -> Option<Vec3> {
        pick.entity()?;
        if !is_walkable(pick.surface_normal) {
            return None;
        }
        if world.avatar().position.distance(pick.intersection) <= TELEPORT_CANCEL_RANGE {
            return None;
        }
        Some(pick.intersection)
    }

    fn show_marker(&mut self, world: &mut World, position: Vec3) {
        let kind = OverlayKind::TeleportTarget {
            hand: self.hand,
            position,
        };
        match self.marker {
            Some(id) if world.update_overlay(id, kind) => {}
            _ => {
                let id = world.add_overlay(kind);
                debug!("{} teleport marker {} created", self.hand, id);
                self.marker = Some(id);
            }
        }
    }

    fn hide_marker(&mut self, world: &mut World) {
        if let Some(id) = self.marker.take() {
            world.remove_overlay(id);
        }
    }

    fn end_teleport(&mut self) -> Result<(), DispatchError> {
        self.aiming = None;
        if self.marker.is_none() {
            return Ok(());
        }
        let world_handle = self.world.clone();
        let mut world = write_world(&world_handle)?;
        self.hide_marker(&mut world);
        Ok(())
    }
}

impl DispatcherModule for Teleport {
    fn parameters(&self) -> &ModuleParameters {
        &self.parameters
    }

    fn is_ready(
        &mut self,
        data: &ControllerData,
        _delta_time: f32,
    ) -> Result<RunningState, DispatchError> {
        let ready = data.controller_location(self.hand).valid
            && data.thumb_click(self.hand)
            && !self.thresholds.trigger_squeezed(data.trigger_value(self.hand));
        if ready {
            debug!("{} teleport aiming", self.hand);
            Ok(RunningState::running())
        } else {
            Ok(RunningState::stopped())
        }
    }

    fn run(&mut self, data: &ControllerData, delta_time: f32) -> Result<RunningState, DispatchError> {
        let elapsed = self.aiming.unwrap_or(0.0) + delta_time.max(0.0);
        self.aiming = Some(elapsed);
        let cooled_in = elapsed >= COOL_IN_SECONDS;

        let world_handle = self.world.clone();
        let mut world = write_world(&world_handle)?;
        let destination = if data.controller_location(self.hand).valid {
            Self::destination(&world, data.ray_pick(self.hand))
        } else {
            None
        };

        if data.thumb_click(self.hand) {
            match destination {
                Some(position) if cooled_in => self.show_marker(&mut world, position),
                _ => self.hide_marker(&mut world),
            }
            return Ok(RunningState::running());
        }

        self.hide_marker(&mut world);
        self.aiming = None;
        match destination {
            Some(position) if cooled_in => {
                let avatar = world.avatar_mut();
                avatar.position = position + Vec3::Y * DEFAULT_ROOT_TO_FOOT_OFFSET * avatar.scale;
                info!("{} hand teleported avatar to {:?}", self.hand, avatar.position);
            }
            _ => debug!("{} teleport cancelled", self.hand),
        }
        Ok(RunningState::stopped())
    }

    fn stop(&mut self) -> Result<(), DispatchError> {
        self.end_teleport()
            .map_err(|e| DispatchError::StopFailed(format!("{} teleport: {}", self.hand, e)))
    }

    fn cleanup(&mut self) {
        if let Err(e) = self.end_teleport() {
            warn!("{} teleport cleanup failed: {}", self.hand, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{Pose, RawControllerInput, SnapshotBuilder};
    use crate::persistence::InputSettings;
    use crate::world::EntityProperties;
    use glam::Quat;
    use std::f32::consts::FRAC_PI_4;

    /// Hand two meters up, pointing forward and down at 45 degrees
    fn aiming(thumb: bool) -> RawControllerInput {
        let orientation = Quat::from_rotation_x(3.0 * FRAC_PI_4);
        RawControllerInput::default()
            .with_pose(Hand::Right, Pose::new(Vec3::new(0.0, 2.0, 0.0), orientation))
            .with_thumb(Hand::Right, thumb)
    }

    fn floor_world() -> SharedWorld {
        let mut world = World::new();
        world.spawn(
            EntityProperties::new("floor", Vec3::new(0.0, -0.05, 0.0), Vec3::new(20.0, 0.1, 20.0))
                .with_dynamic(false),
        );
        world.avatar_mut().position = Vec3::new(0.0, 0.5, 0.0);
        world.into_shared()
    }

    fn snapshot(world: &SharedWorld, builder: &mut SnapshotBuilder, raw: RawControllerInput) -> ControllerData {
        let guard = world.read().expect("world");
        builder.build(&raw, &guard)
    }

    #[test]
    fn releasing_the_pad_moves_the_avatar_to_the_target() {
        let world = floor_world();
        let mut builder = SnapshotBuilder::new(InputSettings::default());
        let mut module = Teleport::new(Hand::Right, world.clone(), Thresholds::default());

        let data = snapshot(&world, &mut builder, aiming(true));
        assert!(module.is_ready(&data, 0.3).expect("ready").running);
        assert!(module.run(&data, 0.3).expect("aim").running);
        assert_eq!(module.marker(), None, "marker hidden during cool-in");

        assert!(module.run(&data, 0.3).expect("aim").running);
        let marker = module.marker().expect("marker");
        let anchor = world.read().expect("world").overlay(marker).map(|o| o.anchor());
        assert!((anchor.expect("overlay") - Vec3::new(0.0, 0.0, 2.0)).length() < 1e-4);

        let data = snapshot(&world, &mut builder, aiming(false));
        assert!(!module.run(&data, 0.3).expect("release").running);
        let guard = world.read().expect("world");
        assert!((guard.avatar().position - Vec3::new(0.0, 0.5, 2.0)).length() < 1e-4);
        assert_eq!(guard.overlays().count(), 0);
    }

    #[test]
    fn early_release_cancels() {
        let world = floor_world();
        let mut builder = SnapshotBuilder::new(InputSettings::default());
        let mut module = Teleport::new(Hand::Right, world.clone(), Thresholds::default());

        let data = snapshot(&world, &mut builder, aiming(true));
        module.run(&data, 0.1).expect("aim");
        let data = snapshot(&world, &mut builder, aiming(false));
        assert!(!module.run(&data, 0.1).expect("release").running);
        assert_eq!(world.read().expect("world").avatar().position, Vec3::new(0.0, 0.5, 0.0));
    }

    #[test]
    fn walls_and_nearby_targets_are_rejected() {
        assert!(is_walkable(Vec3::Y));
        assert!(!is_walkable(Vec3::X));
        assert!(!is_walkable(Vec3::NEG_Y));

        let world = floor_world();
        world.write().expect("world").avatar_mut().position = Vec3::new(0.0, 0.5, 1.5);
        let mut builder = SnapshotBuilder::new(InputSettings::default());
        let mut module = Teleport::new(Hand::Right, world.clone(), Thresholds::default());

        let data = snapshot(&world, &mut builder, aiming(true));
        module.run(&data, 1.0).expect("aim");
        assert_eq!(module.marker(), None, "target inside cancel range");
    }

    #[test]
    fn squeezed_trigger_blocks_aiming() {
        let world = floor_world();
        let mut builder = SnapshotBuilder::new(InputSettings::default());
        let mut module = Teleport::new(Hand::Right, world.clone(), Thresholds::default());
        let data = snapshot(&world, &mut builder, aiming(true).with_trigger(Hand::Right, 0.9));
        assert!(!module.is_ready(&data, 0.0).expect("ready").running);
    }

    #[test]
    fn stop_removes_the_marker() {
        let world = floor_world();
        let mut builder = SnapshotBuilder::new(InputSettings::default());
        let mut module = Teleport::new(Hand::Right, world.clone(), Thresholds::default());
        let data = snapshot(&world, &mut builder, aiming(true));
        module.run(&data, 1.0).expect("aim");
        assert!(module.marker().is_some());

        module.stop().expect("stop");
        assert_eq!(module.marker(), None);
        assert_eq!(world.read().expect("world").overlays().count(), 0);
    }

    #[test]
    fn claims_hand_and_head() {
        let module = Teleport::new(Hand::Left, World::new().into_shared(), Thresholds::default());
        assert!(module.parameters().declares("leftHand"));
        assert!(module.parameters().declares(HEAD_GROUP));
    }
}
