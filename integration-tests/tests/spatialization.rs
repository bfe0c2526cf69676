//! Spatialized playback through the whole stack: position updates from the
//! game-thread snapshot, VBAP gains in the device render, distance law.

use std::sync::Arc;

use audio_dsp::{AttenuationModel, SpatializationConfig};
use audio_engine::{
    ActionContext, ActionKind, SoundConfig, SourceUpdateData, Transform, TriggerAction,
    TriggerCommand,
};
use glam::Vec3;
use integration_tests::{rms, TestAsset, TestRig, BLOCK_FRAMES};

fn spatial_sound(handle: u64) -> Arc<SoundConfig> {
    Arc::new(SoundConfig {
        data_source_asset: handle,
        looping: true,
        spatialization_enabled: true,
        spatialization: SpatializationConfig {
            attenuation_model: AttenuationModel::Inverse,
            min_distance: 1.0,
            max_distance: 100.0,
            rolloff: 1.0,
            ..Default::default()
        },
        ..Default::default()
    })
}

fn place(rig: &TestRig, object: u64, position: Vec3) {
    rig.engine.submit_source_update_data(vec![SourceUpdateData {
        object_id: object,
        transform: Transform {
            position,
            ..Default::default()
        },
        velocity: Vec3::ZERO,
        volume_multiplier: 1.0,
        pitch_multiplier: 1.0,
    }]);
}

/// Steady-state block RMS of one spatial voice at `position`.
fn level_at(position: Vec3) -> f32 {
    let rig = TestRig::new(
        &[TestAsset {
            handle: 0xCAFE,
            frames: BLOCK_FRAMES * 100,
        }],
        32,
    );

    let trigger = rig
        .engine
        .registry()
        .add_trigger(
            "spatial",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::Play,
                    Some(spatial_sound(0xCAFE)),
                    ActionContext::Object,
                )],
            ),
        )
        .unwrap();

    rig.engine.post_trigger(trigger, 1);
    rig.step();
    place(&rig, 1, position);
    // Let the start and the gain ramp settle before measuring.
    rig.step_n(4);
    rms(&rig.render_and_capture())
}

#[test]
fn spatial_voice_is_silent_until_positioned() {
    let rig = TestRig::new(
        &[TestAsset {
            handle: 0xCAFE,
            frames: BLOCK_FRAMES * 100,
        }],
        32,
    );

    let trigger = rig
        .engine
        .registry()
        .add_trigger(
            "spatial",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::Play,
                    Some(spatial_sound(0xCAFE)),
                    ActionContext::Object,
                )],
            ),
        )
        .unwrap();

    rig.engine.post_trigger(trigger, 1);
    rig.step_n(3);
    let silent = rig.render_and_capture();
    assert!(rms(&silent) < 1e-6, "no position set, no output");

    place(&rig, 1, Vec3::new(0.0, 0.0, -2.0));
    rig.step_n(2);
    let audible = rig.render_and_capture();
    assert!(rms(&audible) > 1e-3, "positioned voice becomes audible");
}

#[test]
fn doubling_distance_halves_the_inverse_model_gain() {
    let near = level_at(Vec3::new(0.0, 0.0, -1.0));
    let far = level_at(Vec3::new(0.0, 0.0, -2.0));
    assert!(near > 0.0 && far > 0.0);

    let ratio = far / near;
    assert!(
        (ratio - 0.5).abs() < 0.1,
        "inverse model: expected ~0.5 level ratio, got {ratio}"
    );
}

#[test]
fn sources_beyond_max_distance_stop_attenuating() {
    let at_100 = level_at(Vec3::new(0.0, 0.0, -100.0));
    let at_200 = level_at(Vec3::new(0.0, 0.0, -200.0));
    assert!(at_100 > 0.0);
    let ratio = at_200 / at_100;
    assert!(
        (ratio - 1.0).abs() < 0.05,
        "gain clamps past max distance, got ratio {ratio}"
    );
}

#[test]
fn lateral_sources_pan_toward_their_side() {
    let rig = TestRig::new(
        &[TestAsset {
            handle: 0xCAFE,
            frames: BLOCK_FRAMES * 100,
        }],
        32,
    );

    let mut config = (*spatial_sound(0xCAFE)).clone();
    // Narrow the source so the panning direction dominates.
    config.spatialization.spread = 0.1;
    config.spatialization.focus = 1.0;
    let config = Arc::new(config);

    let trigger = rig
        .engine
        .registry()
        .add_trigger(
            "panned",
            TriggerCommand::new(
                "",
                vec![TriggerAction::new(
                    ActionKind::Play,
                    Some(config),
                    ActionContext::Object,
                )],
            ),
        )
        .unwrap();

    rig.engine.post_trigger(trigger, 1);
    rig.step();
    place(&rig, 1, Vec3::new(3.0, 0.0, 0.0)); // hard right
    rig.step_n(4);

    let block = rig.render_and_capture();
    let left: f32 = block.iter().step_by(2).map(|s| s * s).sum();
    let right: f32 = block.iter().skip(1).step_by(2).map(|s| s * s).sum();
    assert!(
        right > left * 4.0,
        "right-side source should favor the right channel (L={left}, R={right})"
    );
}
