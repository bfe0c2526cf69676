//! Authoring-side configuration blobs consumed by the runtime.

use audio_dsp::{SpatializationConfig, Transform};
use glam::Vec3;

/// Static properties of one playable sound, referenced by trigger actions.
#[derive(Debug, Clone)]
pub struct SoundConfig {
    /// Asset handle of the encoded audio data.
    pub data_source_asset: u64,
    pub volume_multiplier: f32,
    pub pitch_multiplier: f32,
    pub looping: bool,
    pub spatialization_enabled: bool,
    pub spatialization: SpatializationConfig,
    /// Send level into the master reverb bus, `[0, 1]`.
    pub master_reverb_send: f32,
    /// Normalized low-pass cutoff, `[0, 1]`.
    pub lp_filter_value: f32,
    /// Normalized high-pass cutoff, `[0, 1]`.
    pub hp_filter_value: f32,
    /// Static eviction priority, 0 = first to go.
    pub priority: u8,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            data_source_asset: 0,
            volume_multiplier: 1.0,
            pitch_multiplier: 1.0,
            looping: false,
            spatialization_enabled: false,
            spatialization: SpatializationConfig::default(),
            master_reverb_send: 0.0,
            lp_filter_value: 1.0,
            hp_filter_value: 0.0,
            priority: 64,
        }
    }
}

/// Engine-level user preferences.
#[derive(Debug, Clone, Copy)]
pub struct UserConfig {
    /// Files at least this long (seconds) are streamed instead of
    /// decoded into memory on preload.
    pub file_streaming_duration_threshold: f64,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            file_streaming_duration_threshold: 30.0,
        }
    }
}

/// Per-object data the game thread publishes once per scene tick.
#[derive(Debug, Clone, Copy)]
pub struct SourceUpdateData {
    pub object_id: u64,
    pub transform: Transform,
    pub velocity: Vec3,
    pub volume_multiplier: f32,
    pub pitch_multiplier: f32,
}

/// Snapshot entry the audio thread keeps per tracked object.
#[derive(Debug, Clone, Copy)]
pub struct ObjectState {
    pub transform: Transform,
    pub velocity: Vec3,
}
