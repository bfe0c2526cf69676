//! End-to-end playback scenarios on the mock device: one-shots, eviction
//! under pressure, fades, and global pause/resume.

use audio_engine::{ActionContext, ActionKind, EventId, TriggerAction, TriggerCommand};
use integration_tests::{sound, TestAsset, TestRig, BLOCK_FRAMES};

#[test]
fn one_shot_plays_and_retires_its_event() {
    // 50 ms of audio: five device blocks.
    let rig = TestRig::new(
        &[TestAsset {
            handle: 0xB002,
            frames: BLOCK_FRAMES * 5,
        }],
        32,
    );

    let explode = rig
        .engine
        .registry()
        .add_trigger(
            "explode",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::Play,
                    Some(sound(0xB002, false, 64)),
                    ActionContext::Object,
                )],
            ),
        )
        .unwrap();

    let event = rig.engine.post_trigger(explode, 42);
    assert!(event.is_valid());

    rig.step();
    assert!(rig.engine.has_active_events(42));
    assert_eq!(rig.engine.stats().active_sounds, 1);

    // Let the whole asset play out, with margin for the start latency.
    rig.step_n(10);
    assert!(!rig.engine.has_active_events(42));
    assert_eq!(rig.engine.stats().active_sounds, 0);
}

#[test]
fn unknown_command_and_zero_object_are_rejected() {
    let rig = TestRig::new(
        &[TestAsset {
            handle: 1,
            frames: 256,
        }],
        32,
    );

    let unknown = audio_engine::CommandId::from_name("never-registered");
    assert_eq!(rig.engine.post_trigger(unknown, 42), EventId::INVALID);

    let trigger = rig
        .engine
        .registry()
        .add_trigger(
            "real",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::Play,
                    Some(sound(1, false, 64)),
                    ActionContext::Object,
                )],
            ),
        )
        .unwrap();
    assert_eq!(rig.engine.post_trigger(trigger, 0), EventId::INVALID);
    assert_eq!(
        rig.engine.post_trigger(audio_engine::CommandId::invalid(), 42),
        EventId::INVALID
    );
}

#[test]
fn pool_pressure_evicts_the_lowest_priority_voice() {
    let rig = TestRig::new(
        &[TestAsset {
            handle: 0x10,
            frames: BLOCK_FRAMES * 200,
        }],
        2,
    );
    let registry = rig.engine.registry();

    let mid = registry
        .add_trigger(
            "loop-mid",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::Play,
                    Some(sound(0x10, true, 128)),
                    ActionContext::Object,
                )],
            ),
        )
        .unwrap();
    let low = registry
        .add_trigger(
            "loop-low",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::Play,
                    Some(sound(0x10, true, 64)),
                    ActionContext::Object,
                )],
            ),
        )
        .unwrap();
    let high = registry
        .add_trigger(
            "loop-high",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::Play,
                    Some(sound(0x10, true, 200)),
                    ActionContext::Object,
                )],
            ),
        )
        .unwrap();

    assert!(rig.engine.post_trigger(mid, 1).is_valid());
    assert!(rig.engine.post_trigger(low, 2).is_valid());
    rig.step_n(3);
    assert_eq!(rig.engine.stats().active_sounds, 2);

    // The pool is saturated: the third voice must evict the priority-64
    // one, keeping the priority-128 voice playing.
    assert!(rig.engine.post_trigger(high, 3).is_valid());
    rig.step_n(3);

    assert_eq!(rig.engine.stats().active_sounds, 2);
    assert!(rig.engine.has_active_events(1), "mid priority survives");
    assert!(!rig.engine.has_active_events(2), "low priority evicted");
    assert!(rig.engine.has_active_events(3), "new voice playing");
}

#[test]
fn stop_event_fades_then_releases() {
    let rig = TestRig::new(
        &[TestAsset {
            handle: 7,
            frames: BLOCK_FRAMES * 400,
        }],
        32,
    );

    let trigger = rig
        .engine
        .registry()
        .add_trigger(
            "looping",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::Play,
                    Some(sound(7, true, 64)),
                    ActionContext::Object,
                )],
            ),
        )
        .unwrap();

    let event = rig.engine.post_trigger(trigger, 5);
    rig.step_n(3);
    assert!(rig.engine.has_active_events(5));

    assert!(rig.engine.stop_event(event));
    // The 28 ms stop-fade spans three 10 ms ticks; the voice must survive
    // the first one.
    rig.step();
    assert!(
        rig.engine.has_active_events(5),
        "voice still fading after 10 ms"
    );
    rig.step_n(4);
    assert!(!rig.engine.has_active_events(5), "voice gone after the fade");
    assert_eq!(rig.engine.stats().active_sounds, 0);

    // Stopping an already-retired event reports failure.
    assert!(!rig.engine.stop_event(event));
}

#[test]
fn global_pause_resume_restores_every_voice() {
    let rig = TestRig::new(
        &[TestAsset {
            handle: 3,
            frames: BLOCK_FRAMES * 400,
        }],
        32,
    );
    let registry = rig.engine.registry();

    let play = registry
        .add_trigger(
            "ambient",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::Play,
                    Some(sound(3, true, 64)),
                    ActionContext::Object,
                )],
            ),
        )
        .unwrap();
    let pause_all = registry
        .add_trigger(
            "pause-everything",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::PauseAll,
                    None,
                    ActionContext::Global,
                )],
            ),
        )
        .unwrap();
    let resume_all = registry
        .add_trigger(
            "resume-everything",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::ResumeAll,
                    None,
                    ActionContext::Global,
                )],
            ),
        )
        .unwrap();

    for object in [1u64, 2, 3] {
        assert!(rig.engine.post_trigger(play, object).is_valid());
    }
    rig.step_n(3);
    assert_eq!(rig.engine.stats().active_sounds, 3);

    assert!(rig.engine.post_trigger(pause_all, 99).is_valid());
    // Pause fade completes over a few ticks; no voice may be released.
    rig.step_n(6);
    assert_eq!(rig.engine.stats().active_sounds, 3, "paused, not freed");
    for object in [1u64, 2, 3] {
        assert!(rig.engine.has_active_events(object));
    }

    assert!(rig.engine.post_trigger(resume_all, 99).is_valid());
    rig.step_n(3);
    assert_eq!(
        rig.engine.stats().active_sounds,
        3,
        "no extra voices allocated by resume"
    );
    for object in [1u64, 2, 3] {
        assert!(rig.engine.has_active_events(object));
    }
}

#[test]
fn resume_during_pause_fade_reuses_the_same_voice() {
    let rig = TestRig::new(
        &[TestAsset {
            handle: 9,
            frames: BLOCK_FRAMES * 400,
        }],
        32,
    );
    let registry = rig.engine.registry();
    let config = sound(9, true, 64);

    let play = registry
        .add_trigger(
            "music",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::Play,
                    Some(config.clone()),
                    ActionContext::Object,
                )],
            ),
        )
        .unwrap();
    let pause = registry
        .add_trigger(
            "music-pause",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::Pause,
                    Some(config.clone()),
                    ActionContext::Object,
                )],
            ),
        )
        .unwrap();
    let resume = registry
        .add_trigger(
            "music-resume",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::Resume,
                    Some(config.clone()),
                    ActionContext::Object,
                )],
            ),
        )
        .unwrap();

    rig.engine.post_trigger(play, 1);
    rig.step_n(3);
    assert_eq!(rig.engine.stats().active_sounds, 1);

    // Pause, then resume while the 28 ms fade is still running. The
    // dispatcher must delay the resume and re-enter from the same voice.
    rig.engine.post_trigger(pause, 1);
    rig.step();
    rig.engine.post_trigger(resume, 1);
    rig.step_n(8);

    assert_eq!(
        rig.engine.stats().active_sounds,
        1,
        "resume reuses the existing voice"
    );
    assert!(rig.engine.has_active_events(1));
}

#[test]
fn inactive_objects_are_reported_once_events_finish() {
    let rig = TestRig::new(
        &[TestAsset {
            handle: 2,
            frames: BLOCK_FRAMES * 2,
        }],
        32,
    );

    let trigger = rig
        .engine
        .registry()
        .add_trigger(
            "blip",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::Play,
                    Some(sound(2, false, 64)),
                    ActionContext::Object,
                )],
            ),
        )
        .unwrap();

    rig.engine.post_trigger(trigger, 77);
    // Track the object's transform so the engine knows about it.
    rig.engine
        .submit_source_update_data(vec![audio_engine::SourceUpdateData {
            object_id: 77,
            transform: audio_engine::Transform::default(),
            velocity: glam::Vec3::ZERO,
            volume_multiplier: 1.0,
            pitch_multiplier: 1.0,
        }]);

    rig.step();
    assert!(rig.engine.take_inactive_objects().is_empty());

    rig.step_n(8);
    assert!(!rig.engine.has_active_events(77));
    assert!(rig.engine.take_inactive_objects().contains(&77));
}
