//! Scripted demo scene: a ball to throw, a crate to far grab, a gun to equip,
//! a two-handed scale gesture and a teleport across the floor.

use crate::controller::{Hand, Pose, RawControllerInput, ScriptedInput};
use crate::world::{EntityId, EntityProperties, EquipHotspot, World};
use glam::{Quat, Vec3};

#[derive(Clone, Copy, Debug)]
pub struct DemoScene {
    pub ball: EntityId,
    pub crate_id: EntityId,
    pub gun: EntityId,
}

pub fn populate_world(world: &mut World) -> DemoScene {
    let ball = world.spawn(EntityProperties::new(
        "ball",
        Vec3::new(-0.2, 1.2, 0.1),
        Vec3::splat(0.1),
    ));
    let crate_id = world.spawn(EntityProperties::new(
        "crate",
        Vec3::new(0.2, 6.0, 0.0),
        Vec3::splat(1.0),
    ));
    let gun = world.spawn(
        EntityProperties::new("gun", Vec3::new(0.8, 1.25, 0.0), Vec3::new(0.05, 0.1, 0.2))
            .with_dynamic(false)
            .with_equip_hotspot(EquipHotspot::new(Vec3::ZERO, 0.2)),
    );
    world.spawn(
        EntityProperties::new("floor", Vec3::new(0.0, -0.05, 0.0), Vec3::new(20.0, 0.1, 20.0))
            .with_dynamic(false)
            .with_locked(true),
    );

    DemoScene { ball, crate_id, gun }
}

fn pose(x: f32, y: f32, z: f32) -> Pose {
    Pose::new(Vec3::new(x, y, z), Quat::IDENTITY)
}

fn hands(left: Pose, right: Pose) -> RawControllerInput {
    RawControllerInput::default()
        .with_pose(Hand::Left, left)
        .with_pose(Hand::Right, right)
}

/// Input script for [`populate_world`], roughly three and a half seconds at 90Hz
pub fn scripted_input() -> ScriptedInput {
    let rest_left = pose(-0.2, 1.2, 0.0);
    let rest_right = pose(0.2, 1.2, 0.0);
    let tilted_right = Pose::new(
        Vec3::new(0.2, 1.2, 0.0),
        Quat::from_rotation_z(-std::f32::consts::FRAC_PI_8),
    );
    let at_gun = pose(0.8, 1.2, 0.0);
    let scale_left = pose(-0.2, 1.0, -1.0);
    let scale_right = pose(0.2, 1.0, -1.0);
    let aiming_right = Pose::new(
        Vec3::new(0.2, 1.2, 0.0),
        Quat::from_rotation_x(3.0 * std::f32::consts::FRAC_PI_4),
    );

    ScriptedInput::new()
        .with_keyframe(0, hands(rest_left, rest_right))
        // near grab the ball and throw it
        .with_keyframe(10, hands(rest_left, rest_right).with_trigger(Hand::Left, 0.8))
        .with_keyframe(20, hands(pose(-0.3, 1.3, 0.0), rest_right).with_trigger(Hand::Left, 0.8))
        .with_keyframe(25, hands(pose(-0.4, 1.4, 0.0), rest_right).with_trigger(Hand::Left, 0.8))
        .with_keyframe(26, hands(pose(-0.4, 1.4, 0.0), rest_right))
        // point at the crate, then click to hold and swing it
        .with_keyframe(40, hands(rest_left, rest_right).with_trigger(Hand::Right, 0.5))
        .with_keyframe(50, hands(rest_left, rest_right).with_trigger(Hand::Right, 1.0))
        .with_keyframe(60, hands(rest_left, tilted_right).with_trigger(Hand::Right, 1.0))
        .with_keyframe(110, hands(rest_left, tilted_right))
        // equip the gun with the grip, carry it, drop it with a second squeeze
        .with_keyframe(130, hands(rest_left, at_gun).with_secondary(Hand::Right, 1.0))
        .with_keyframe(140, hands(rest_left, at_gun))
        .with_keyframe(150, hands(rest_left, rest_right))
        .with_keyframe(170, hands(rest_left, rest_right).with_secondary(Hand::Right, 1.0))
        .with_keyframe(175, hands(rest_left, rest_right))
        // two-handed scale
        .with_keyframe(
            200,
            hands(scale_left, scale_right)
                .with_secondary(Hand::Left, 1.0)
                .with_secondary(Hand::Right, 1.0),
        )
        .with_keyframe(
            220,
            hands(pose(-0.4, 1.0, -1.0), pose(0.4, 1.0, -1.0))
                .with_secondary(Hand::Left, 1.0)
                .with_secondary(Hand::Right, 1.0),
        )
        .with_keyframe(240, hands(scale_left, scale_right))
        // aim at the floor with the thumb pad, let go to teleport
        .with_keyframe(250, hands(rest_left, aiming_right).with_thumb(Hand::Right, true))
        .with_keyframe(310, hands(rest_left, aiming_right))
}
