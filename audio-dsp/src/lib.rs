//! Per-voice and bus DSP for the audio runtime: biquad filters, the master
//! reverb, the VBAP spatializer and the realtime-safe parameter plumbing
//! between the control thread and the device callback.

pub mod biquad;
pub mod delay_line;
pub mod realtime;
pub mod reverb;
pub mod sample_ops;
pub mod spatializer;
pub mod vbap;

pub use biquad::{Biquad, FilterKind};
pub use realtime::{Fader, RealtimeCell};
pub use reverb::{ReverbBus, ReverbParameter};
pub use spatializer::{
    AttenuationModel, PannerNode, SpatializationConfig, Spatializer, Transform,
};

/// Speed of sound used by the Doppler computation, metres per second.
pub const SPEED_OF_SOUND: f32 = 343.3;

/// Maximum number of channels a single voice can carry through the graph.
pub const MAX_CHANNELS: usize = 8;

/// Number of virtual speakers on the internal panning bus (quad layout).
pub const QUAD_CHANNELS: usize = 4;

#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + t * (b - a)
}

/// Map a normalized control value in `[0, 1]` to a filter cutoff frequency.
///
/// Logarithmic sweep from 20 Hz to 22 kHz: `f(v) = 20 * 2^(v * log2(22000/20))`.
#[inline]
pub fn normalized_to_frequency(value: f32) -> f32 {
    let octave_range = (22_000.0f32 / 20.0).log2();
    (value * octave_range).exp2() * 20.0
}
