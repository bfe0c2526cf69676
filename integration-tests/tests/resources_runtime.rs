//! Resource-manager behavior through the engine: preloading, streaming
//! threshold, memory accounting, reverb parameter plumbing.

use audio_dsp::reverb::ReverbParameter;
use audio_engine::{
    ActionContext, ActionKind, TriggerAction, TriggerCommand, UserConfig,
};
use integration_tests::{sound, TestAsset, TestRig, BLOCK_FRAMES};

#[test]
fn preload_registers_memory_and_unload_returns_it() {
    let rig = TestRig::new(
        &[TestAsset {
            handle: 5,
            frames: BLOCK_FRAMES * 20,
        }],
        32,
    );

    let trigger = rig
        .engine
        .registry()
        .add_trigger(
            "ui-click",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::Play,
                    Some(sound(5, false, 64)),
                    ActionContext::Object,
                )],
            ),
        )
        .unwrap();

    assert_eq!(rig.engine.stats().mem_resource_manager, 0);

    rig.engine.preload_event_sources(trigger);
    rig.step();
    let loaded = rig.engine.stats().mem_resource_manager;
    assert!(loaded > 0, "preloaded PCM accounted to the resource manager");

    // Preloaded sounds still play.
    rig.engine.post_trigger(trigger, 8);
    rig.step_n(2);
    assert!(rig.engine.has_active_events(8));

    rig.engine.unload_event_sources(trigger);
    rig.step_n(30);
    assert_eq!(rig.engine.stats().mem_resource_manager, 0);
}

#[test]
fn long_files_stream_and_still_complete() {
    // One second of audio against a 100 ms streaming threshold.
    let rig = TestRig::new(
        &[TestAsset {
            handle: 6,
            frames: 48_000,
        }],
        32,
    );
    rig.engine.set_user_config(UserConfig {
        file_streaming_duration_threshold: 0.1,
    });
    rig.step();

    let trigger = rig
        .engine
        .registry()
        .add_trigger(
            "long-music",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::Play,
                    Some(sound(6, false, 64)),
                    ActionContext::Object,
                )],
            ),
        )
        .unwrap();

    rig.engine.post_trigger(trigger, 4);
    rig.step_n(2);
    assert!(rig.engine.has_active_events(4), "streamed voice started");

    // Streaming must not load the file into the preload cache.
    assert_eq!(rig.engine.stats().mem_resource_manager, 0);

    // Drive until the one-second stream finishes (100 blocks + margin).
    let mut done = false;
    for _ in 0..150 {
        rig.step();
        if !rig.engine.has_active_events(4) {
            done = true;
            break;
        }
    }
    assert!(done, "streamed voice should finish");
}

#[test]
fn reverb_parameters_reach_the_bus_and_read_back() {
    let rig = TestRig::new(
        &[TestAsset {
            handle: 1,
            frames: 256,
        }],
        32,
    );

    rig.engine
        .set_master_reverb_parameter(ReverbParameter::RoomSize, 0.9);
    rig.engine
        .set_master_reverb_parameter(ReverbParameter::PreDelay, 120.0);
    rig.step();

    assert_eq!(
        rig.engine.master_reverb_parameter(ReverbParameter::RoomSize),
        Some(0.9)
    );
    assert_eq!(
        rig.engine.master_reverb_parameter(ReverbParameter::PreDelay),
        Some(120.0)
    );
    assert_eq!(rig.engine.master_reverb_parameter(ReverbParameter::Damp), None);
}

#[test]
fn engine_shutdown_is_clean_with_voices_active() {
    let rig = TestRig::new(
        &[TestAsset {
            handle: 2,
            frames: BLOCK_FRAMES * 400,
        }],
        32,
    );

    let trigger = rig
        .engine
        .registry()
        .add_trigger(
            "bed",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::Play,
                    Some(sound(2, true, 64)),
                    ActionContext::Object,
                )],
            ),
        )
        .unwrap();

    rig.engine.post_trigger(trigger, 1);
    rig.step_n(3);
    assert_eq!(rig.engine.stats().active_sounds, 1);

    rig.engine.shutdown();
    assert!(!rig.engine.has_active_events(1));
}
