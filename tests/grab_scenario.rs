use controller_dispatcher::controller::{Hand, InputSource, Pose, RawControllerInput, ScriptedInput, SnapshotBuilder};
use controller_dispatcher::dispatcher::{ControllerDispatcher, DispatcherModule, FrameReport};
use controller_dispatcher::host::FrameLoop;
use controller_dispatcher::modules::{register_default_modules, FarGrabEntity, NearGrabEntity, Thresholds};
use std::f32::consts::FRAC_PI_4;
use controller_dispatcher::persistence::{DispatcherConfig, InputSettings};
use controller_dispatcher::world::{EntityId, EntityProperties, SharedWorld, World};
use glam::{Quat, Vec3};

const DT: f32 = 1.0 / 90.0;

fn pose(x: f32, y: f32, z: f32) -> Pose {
    Pose::new(Vec3::new(x, y, z), Quat::IDENTITY)
}

fn overlay_count(world: &SharedWorld) -> usize {
    world.read().expect("world").overlays().count()
}

fn position_of(world: &SharedWorld, id: EntityId) -> Vec3 {
    world.read().expect("world").entity(id).expect("entity").position
}

#[test]
fn near_grab_outranks_far_grab_on_the_same_hand() {
    let mut world = World::new();
    let ball = world.spawn(EntityProperties::new("ball", Vec3::new(0.1, 1.0, 0.0), Vec3::splat(0.1)));
    world.spawn(EntityProperties::new("crate", Vec3::new(0.0, 5.0, 0.0), Vec3::splat(1.0)));
    let world = world.into_shared();

    let near = NearGrabEntity::new(Hand::Left, world.clone(), Thresholds::default());
    let far = FarGrabEntity::new(Hand::Left, world.clone(), Thresholds::default());
    let mut near_parameters = near.parameters().clone();
    near_parameters.priority = 100;
    let mut far_parameters = far.parameters().clone();
    far_parameters.priority = 200;

    let mut dispatcher = ControllerDispatcher::new();
    dispatcher
        .enable_module_with_parameters("LeftNearGrab", Box::new(near), near_parameters)
        .expect("near");
    dispatcher
        .enable_module_with_parameters("LeftFarGrab", Box::new(far), far_parameters)
        .expect("far");

    let mut builder = SnapshotBuilder::new(InputSettings::default());
    let raw = RawControllerInput::default()
        .with_pose(Hand::Left, pose(0.0, 1.0, 0.0))
        .with_trigger(Hand::Left, 0.8);
    let data = builder.build(&raw, &world.read().expect("world"));
    assert!(data.ray_pick(Hand::Left).entity().is_some());

    let report = dispatcher.update(&data, DT);
    assert_eq!(report.ready, vec!["LeftNearGrab".to_string(), "LeftFarGrab".to_string()]);
    assert_eq!(report.ran, vec!["LeftNearGrab".to_string()]);
    assert_eq!(report.rejected, vec!["LeftFarGrab".to_string()]);
    assert_eq!(report.owner("leftHand"), Some("LeftNearGrab"));
    assert_eq!(overlay_count(&world), 0);

    let held = world.read().expect("world").entity(ball).expect("ball").dynamic;
    assert!(!held, "grabbed ball is kinematic");
}

/// Right hand throws a ball, then the left hand far grabs a crate.
fn script() -> ScriptedInput {
    let left = pose(-0.2, 1.2, 0.0);
    let right = |y: f32| pose(0.2, y, 0.0);
    let hands = |left: Pose, right: Pose| {
        RawControllerInput::default()
            .with_pose(Hand::Left, left)
            .with_pose(Hand::Right, right)
    };

    ScriptedInput::new()
        .with_keyframe(1, hands(left, right(1.2)))
        .with_keyframe(5, hands(left, right(1.2)).with_trigger(Hand::Right, 0.8))
        .with_keyframe(10, hands(left, right(1.25)).with_trigger(Hand::Right, 0.8))
        .with_keyframe(11, hands(left, right(1.3)).with_trigger(Hand::Right, 0.8))
        .with_keyframe(12, hands(left, right(1.4)).with_trigger(Hand::Right, 0.8))
        .with_keyframe(13, hands(left, right(1.4)))
        .with_keyframe(20, hands(left, right(1.4)).with_trigger(Hand::Left, 0.5))
        .with_keyframe(25, hands(left, right(1.4)).with_trigger(Hand::Left, 1.0))
        .with_keyframe(40, hands(left, right(1.4)))
}

#[test]
fn throw_then_far_grab_through_the_frame_loop() {
    let mut world = World::new();
    let ball = world.spawn(EntityProperties::new("ball", Vec3::new(0.3, 1.2, 0.0), Vec3::splat(0.1)));
    let crate_id = world.spawn(EntityProperties::new("crate", Vec3::new(-0.2, 6.0, 0.0), Vec3::splat(1.0)));
    let world = world.into_shared();

    let config = DispatcherConfig::default();
    let mut dispatcher = ControllerDispatcher::new();
    register_default_modules(&mut dispatcher, &world, &config).expect("register");

    let input: Box<dyn InputSource> = Box::new(script());
    let mut frame_loop = FrameLoop::create(dispatcher, world.clone(), input, &config).start();

    let mut reports: Vec<FrameReport> = Vec::new();
    for _ in 0..45 {
        reports.push(frame_loop.step(DT).expect("step"));
        let frame = reports.len();

        if frame == 8 {
            let ball_position = position_of(&world, ball);
            assert!((ball_position - Vec3::new(0.3, 1.2, 0.0)).length() < 1e-4);
        }
        if frame == 22 {
            assert_eq!(overlay_count(&world), 1, "laser shown while far grabbing");
        }
    }

    let ran = |frame: usize, name: &str| reports[frame - 1].ran.iter().any(|n| n == name);
    assert!(!ran(4, "RightNearGrabEntity"));
    assert!((5..=13).all(|frame| ran(frame, "RightNearGrabEntity")));
    assert_eq!(reports[12].finished, vec!["RightNearGrabEntity".to_string()]);
    assert!((20..=40).all(|frame| ran(frame, "LeftFarGrabEntity")));
    assert!(reports.iter().all(|report| report.failures.is_empty()));

    {
        let guard = world.read().expect("world");
        let thrown = guard.entity(ball).expect("ball");
        assert!(thrown.dynamic);
        assert!(thrown.velocity.y > 1.0, "ball keeps the hand's velocity");
        assert!(thrown.position.y > 1.5);

        let held = guard.entity(crate_id).expect("crate");
        assert!(held.dynamic, "crate returned to physics");
    }
    assert_eq!(overlay_count(&world), 0, "laser removed on release");

    let stats = frame_loop.stop().shutdown().into_stats();
    assert_eq!(stats.frames, 45);
    assert_eq!(stats.run_frames.get("RightNearGrabEntity"), Some(&9));
    assert!(stats.disabled_modules.is_empty());
}

#[test]
fn one_hand_at_a_time_holds_an_entity() {
    let mut world = World::new();
    let ball = world.spawn(EntityProperties::new("ball", Vec3::new(0.0, 1.0, 0.0), Vec3::splat(0.1)));
    let world = world.into_shared();

    let config = DispatcherConfig::default();
    let mut dispatcher = ControllerDispatcher::new();
    register_default_modules(&mut dispatcher, &world, &config).expect("register");

    let hands = |left: f32, right: f32| {
        RawControllerInput::default()
            .with_pose(Hand::Left, pose(-0.05, 1.0, 0.0))
            .with_pose(Hand::Right, pose(0.05, 1.0, 0.0))
            .with_trigger(Hand::Left, left)
            .with_trigger(Hand::Right, right)
    };
    let script = ScriptedInput::new()
        .with_keyframe(1, hands(0.9, 0.9))
        .with_keyframe(2, hands(0.0, 0.9))
        .with_keyframe(4, hands(0.0, 0.0));
    let input: Box<dyn InputSource> = Box::new(script);
    let mut frame_loop = FrameLoop::create(dispatcher, world.clone(), input, &config).start();

    let first = frame_loop.step(DT).expect("step");
    assert!(first.ran.iter().any(|n| n == "LeftNearGrabEntity"));
    assert!(first.finished.iter().any(|n| n == "RightNearGrabEntity"));
    let held_by = |world: &SharedWorld| world.read().expect("world").entity(ball).and_then(|p| p.held_by);
    assert_eq!(held_by(&world), Some(Hand::Left));

    // left lets go, right picks the ball up on the following frame
    frame_loop.step(DT).expect("step");
    assert_eq!(held_by(&world), None);
    frame_loop.step(DT).expect("step");
    assert_eq!(held_by(&world), Some(Hand::Right));

    let last = frame_loop.step(DT).expect("step");
    assert!(last.finished.iter().any(|n| n == "RightNearGrabEntity"));
    let guard = world.read().expect("world");
    let props = guard.entity(ball).expect("ball");
    assert!(props.dynamic, "ball returned to physics");
    assert_eq!(props.held_by, None);
}

#[test]
fn one_teleport_at_a_time_moves_the_avatar() {
    let mut world = World::new();
    world.spawn(
        EntityProperties::new("floor", Vec3::new(0.0, -0.05, 0.0), Vec3::new(20.0, 0.1, 20.0)).with_dynamic(false),
    );
    world.avatar_mut().position = Vec3::new(0.0, 0.5, 0.0);
    let world = world.into_shared();

    let config = DispatcherConfig::default();
    let mut dispatcher = ControllerDispatcher::new();
    register_default_modules(&mut dispatcher, &world, &config).expect("register");

    let down_and_forward = Quat::from_rotation_x(3.0 * FRAC_PI_4);
    let thumbs = |pressed: bool| {
        RawControllerInput::default()
            .with_pose(Hand::Left, Pose::new(Vec3::new(-0.2, 2.0, 0.0), down_and_forward))
            .with_pose(Hand::Right, Pose::new(Vec3::new(0.2, 2.0, 0.0), down_and_forward))
            .with_thumb(Hand::Left, pressed)
            .with_thumb(Hand::Right, pressed)
    };
    let mut builder = SnapshotBuilder::new(config.input.clone());
    let mut frame = |raw: RawControllerInput| {
        let data = builder.build(&raw, &world.read().expect("world"));
        dispatcher.update(&data, 0.3)
    };

    for _ in 0..2 {
        let report = frame(thumbs(true));
        assert!(report.ran.iter().any(|n| n == "LeftTeleport"));
        assert!(report.rejected.iter().any(|n| n == "RightTeleport"));
        assert_eq!(report.owner("head"), Some("LeftTeleport"));
    }
    assert_eq!(overlay_count(&world), 1, "one target marker");

    let report = frame(thumbs(false));
    assert!(report.finished.iter().any(|n| n == "LeftTeleport"));
    let position = world.read().expect("world").avatar().position;
    assert!((position - Vec3::new(-0.2, 0.5, 2.0)).length() < 1e-4);
    assert_eq!(overlay_count(&world), 0);
}
