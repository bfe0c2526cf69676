//! Per-voice 3-D spatialization: distance and cone attenuation, Doppler
//! pitch, and VBAP panning over the internal quad bus.
//!
//! The [`Spatializer`] lives on the audio (control) thread and owns the
//! positional state of every registered source. Gain updates reach the
//! device callback through a [`RealtimeCell`] snapshot read by the
//! per-voice [`PannerNode`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glam::{Mat4, Vec3};
use tracing::{error, warn};

use crate::realtime::RealtimeCell;
use crate::sample_ops;
use crate::vbap::{ChannelGains, PanUpdate, VbapPanner};
use crate::{MAX_CHANNELS, QUAD_CHANNELS, SPEED_OF_SOUND};

/// World-space pose of a source or the listener. `orientation` is the
/// forward unit vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub orientation: Vec3,
    pub up: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Vec3::NEG_Z,
            up: Vec3::Y,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttenuationModel {
    None,
    #[default]
    Inverse,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpatializationConfig {
    pub attenuation_model: AttenuationModel,
    pub min_distance: f32,
    pub max_distance: f32,
    pub rolloff: f32,
    pub cone_inner_angle: f32,
    pub cone_outer_angle: f32,
    pub cone_outer_gain: f32,
    pub min_gain: f32,
    pub max_gain: f32,
    pub doppler_factor: f32,
    pub spread: f32,
    pub focus: f32,
    pub source_size: f32,
    pub spread_from_source_size: bool,
}

impl Default for SpatializationConfig {
    fn default() -> Self {
        Self {
            attenuation_model: AttenuationModel::Inverse,
            min_distance: 1.0,
            max_distance: 1000.0,
            rolloff: 1.0,
            cone_inner_angle: std::f32::consts::TAU,
            cone_outer_angle: std::f32::consts::TAU,
            cone_outer_gain: 0.0,
            min_gain: 0.0,
            max_gain: 1.0,
            doppler_factor: 1.0,
            spread: 1.0,
            focus: 1.0,
            source_size: 1.0,
            spread_from_source_size: false,
        }
    }
}

/// Azimuth of a direction in the horizontal plane: 0 ahead (-Z), positive
/// to the right, range `(-pi, pi]`.
#[inline]
pub fn vector_angle(direction: Vec3) -> f32 {
    direction.x.atan2(-direction.z)
}

pub fn process_distance_attenuation(
    model: AttenuationModel,
    distance: f32,
    min_distance: f32,
    max_distance: f32,
    rolloff: f32,
) -> f32 {
    // Degenerate ranges would divide by zero. Do not attenuate.
    if !matches!(model, AttenuationModel::None) && min_distance >= max_distance {
        return 1.0;
    }

    let clamped = distance.clamp(min_distance, max_distance);
    match model {
        AttenuationModel::None => 1.0,
        AttenuationModel::Inverse => {
            min_distance / (min_distance + rolloff * (clamped - min_distance))
        }
        AttenuationModel::Linear => {
            1.0 - rolloff * (clamped - min_distance) / (max_distance - min_distance)
        }
        AttenuationModel::Exponential => (clamped / min_distance).powf(-rolloff),
    }
}

pub fn process_angular_attenuation(
    dir_to_target: Vec3,
    dir_source: Vec3,
    cone_inner_angle: f32,
    cone_outer_angle: f32,
    cone_outer_gain: f32,
) -> f32 {
    // An inner angle of a full circle disables the cone.
    if cone_inner_angle >= std::f32::consts::TAU {
        return 1.0;
    }

    let cutoff_inner = (cone_inner_angle * 0.5).cos();
    let cutoff_outer = (cone_outer_angle * 0.5).cos();
    let d = dir_to_target.dot(dir_source);

    if d > cutoff_inner {
        1.0
    } else if d > cutoff_outer {
        crate::lerp(
            cone_outer_gain,
            1.0,
            (d - cutoff_outer) / (cutoff_inner - cutoff_outer),
        )
    } else {
        cone_outer_gain
    }
}

/// Doppler pitch multiplier. `relative_position` is the source-to-listener
/// axis; both velocity projections are capped at `c / dopplerFactor`.
pub fn process_doppler_pitch(
    relative_position: Vec3,
    source_velocity: Vec3,
    listener_velocity: Vec3,
    speed_of_sound: f32,
    doppler_factor: f32,
) -> f32 {
    let len = relative_position.length();
    if len == 0.0 {
        return 1.0;
    }

    let mut v_l = relative_position.dot(listener_velocity) / len;
    let mut v_s = relative_position.dot(source_velocity) / len;

    v_l = v_l.min(speed_of_sound / doppler_factor);
    v_s = v_s.min(speed_of_sound / doppler_factor);

    (speed_of_sound - doppler_factor * v_l) / (speed_of_sound - doppler_factor * v_s)
}

/// Spread derived from the apparent size of a source at a distance.
pub fn spread_from_source_size(source_size: f32, distance: f32) -> f32 {
    if distance <= 0.0 {
        return 1.0;
    }
    let degree_spread = ((0.5 * source_size) / distance).atan().to_degrees() * 2.0;
    degree_spread / 180.0
}

/// Immutable gain snapshot published to the realtime panner.
#[derive(Debug, Clone)]
pub struct PanSnapshot {
    pub channels: usize,
    pub gains: [ChannelGains; MAX_CHANNELS],
    pub doppler_pitch: f32,
}

impl Default for PanSnapshot {
    fn default() -> Self {
        Self {
            channels: 0,
            gains: [[0.0; QUAD_CHANNELS]; MAX_CHANNELS],
            doppler_pitch: 1.0,
        }
    }
}

/// Shared endpoint between a [`Spatializer`] source and its render node.
pub struct PannerCell {
    snapshot: RealtimeCell<PanSnapshot>,
    started: AtomicBool,
}

impl PannerCell {
    fn new() -> Self {
        Self {
            snapshot: RealtimeCell::new(PanSnapshot::default()),
            started: AtomicBool::new(false),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

struct SpatialSource {
    config: Arc<SpatializationConfig>,
    panner: VbapPanner,
    cell: Arc<PannerCell>,
    spread: f32,
    focus: f32,
    transform: Transform,
    velocity: Vec3,
    distance: f32,
    azimuth: f32,
    position_relative: Vec3,
    relative_dir: Vec3,
    distance_attenuation: f32,
    angle_attenuation: f32,
    doppler_pitch: f32,
    initial_position_set: bool,
}

struct ListenerPose {
    transform: Transform,
    velocity: Vec3,
    cone_inner_angle: f32,
    cone_outer_angle: f32,
    cone_outer_gain: f32,
}

impl Default for ListenerPose {
    fn default() -> Self {
        Self {
            transform: Transform::default(),
            velocity: Vec3::ZERO,
            cone_inner_angle: std::f32::consts::TAU,
            cone_outer_angle: std::f32::consts::TAU,
            cone_outer_gain: 0.0,
        }
    }
}

/// Control-thread manager for every spatialized voice.
#[derive(Default)]
pub struct Spatializer {
    sources: HashMap<u32, SpatialSource>,
    listener: ListenerPose,
}

impl Spatializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self, source_id: u32) -> bool {
        self.sources.contains_key(&source_id)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Register a source and hand back the cell its render node reads.
    /// The node stays silent until the first position update arrives.
    pub fn init_source(
        &mut self,
        source_id: u32,
        channels: usize,
        config: Arc<SpatializationConfig>,
    ) -> Arc<PannerCell> {
        debug_assert!(!self.sources.contains_key(&source_id));

        let cell = Arc::new(PannerCell::new());
        let source = SpatialSource {
            spread: config.spread,
            focus: config.focus,
            panner: VbapPanner::new(channels.min(MAX_CHANNELS)),
            cell: cell.clone(),
            config,
            transform: Transform::default(),
            velocity: Vec3::ZERO,
            distance: 0.0,
            azimuth: 0.0,
            position_relative: Vec3::ZERO,
            relative_dir: Vec3::NEG_Z,
            distance_attenuation: 1.0,
            angle_attenuation: 1.0,
            doppler_pitch: 1.0,
            initial_position_set: false,
        };
        self.sources.insert(source_id, source);
        cell
    }

    pub fn release_source(&mut self, source_id: u32) -> bool {
        self.sources.remove(&source_id).is_some()
    }

    pub fn release_all(&mut self) {
        self.sources.clear();
    }

    pub fn current_distance(&self, source_id: u32) -> Option<f32> {
        self.sources.get(&source_id).map(|s| s.distance)
    }

    pub fn current_distance_attenuation(&self, source_id: u32) -> Option<f32> {
        self.sources.get(&source_id).map(|s| s.distance_attenuation)
    }

    pub fn current_cone_attenuation(&self, source_id: u32) -> Option<f32> {
        self.sources.get(&source_id).map(|s| s.angle_attenuation)
    }

    pub fn set_spread(&mut self, source_id: u32, new_spread: f32) {
        let Some(source) = self.sources.get_mut(&source_id) else {
            error!(target: "audio::spatializer", source_id, "set_spread on unknown source");
            return;
        };
        if source.config.spread_from_source_size {
            warn!(
                target: "audio::spatializer",
                source_id, "spread is derived from source size for this voice"
            );
            return;
        }
        source.spread = new_spread.clamp(0.0, 1.0);
        Self::update_vbap(source);
    }

    pub fn set_focus(&mut self, source_id: u32, new_focus: f32) {
        let Some(source) = self.sources.get_mut(&source_id) else {
            error!(target: "audio::spatializer", source_id, "set_focus on unknown source");
            return;
        };
        source.focus = new_focus.clamp(0.0, 1.0);
        Self::update_vbap(source);
    }

    pub fn set_listener_cone(&mut self, inner_angle: f32, outer_angle: f32, outer_gain: f32) {
        self.listener.cone_inner_angle = inner_angle;
        self.listener.cone_outer_angle = outer_angle;
        self.listener.cone_outer_gain = outer_gain;
    }

    /// New source pose from the game-thread snapshot.
    pub fn update_source_position(&mut self, source_id: u32, transform: Transform, velocity: Vec3) {
        // Objects with spatialization disabled are simply not registered.
        let Some(source) = self.sources.get_mut(&source_id) else {
            return;
        };

        let listener_transform = self.listener.transform;
        if !Self::derive_relative(source, &listener_transform, transform, velocity) {
            return;
        }

        Self::update_positional_data(source, &self.listener);
        Self::update_vbap(source);

        // First position known: the render node may produce audio now.
        if !source.initial_position_set {
            source.cell.started.store(true, Ordering::Release);
            source.initial_position_set = true;
        }
    }

    /// Listener moved: re-derive the positional state of every source.
    pub fn update_listener(&mut self, transform: Transform, velocity: Vec3) {
        self.listener.transform = transform;
        self.listener.velocity = velocity;

        let listener_transform = self.listener.transform;
        for source in self.sources.values_mut() {
            let source_transform = source.transform;
            let source_velocity = source.velocity;
            if !Self::derive_relative(source, &listener_transform, source_transform, source_velocity)
            {
                continue;
            }
            Self::update_positional_data(source, &self.listener);
            Self::update_vbap(source);
        }
    }

    /// Recompute distance, azimuth and relative direction for a source.
    /// Returns false when the source sits on top of the listener.
    fn derive_relative(
        source: &mut SpatialSource,
        listener: &Transform,
        transform: Transform,
        velocity: Vec3,
    ) -> bool {
        let lp = listener.position;
        let look_at = Mat4::look_at_rh(lp, lp + listener.orientation, listener.up);
        let relative_pos = look_at.transform_point3(transform.position);

        let sp = transform.position;
        let source_look_at = Mat4::look_at_rh(sp, sp + transform.orientation, transform.up);
        let relative_dir = source_look_at.transform_point3(lp).normalize_or_zero();

        let distance = relative_pos.length();

        source.transform = transform;
        source.velocity = velocity;

        // Vector math degenerates when the sound sits on the listener.
        if distance < 1e-6 {
            return false;
        }

        source.distance = distance;
        source.azimuth = vector_angle(relative_pos.normalize());
        source.position_relative = relative_pos;
        source.relative_dir = relative_dir;

        if source.config.spread_from_source_size {
            source.spread = spread_from_source_size(source.config.source_size, distance);
        }

        true
    }

    fn update_positional_data(source: &mut SpatialSource, listener: &ListenerPose) {
        let config = &source.config;

        source.distance_attenuation = process_distance_attenuation(
            config.attenuation_model,
            source.distance,
            config.min_distance,
            config.max_distance,
            config.rolloff,
        );

        if source.distance > 0.0 {
            let mut angle_attenuation = process_angular_attenuation(
                Vec3::NEG_Z,
                source.relative_dir,
                config.cone_inner_angle,
                config.cone_outer_angle,
                config.cone_outer_gain,
            );

            // Listener cone reduces sounds positioned behind the listener;
            // disabled on default (full-circle) settings.
            if listener.cone_inner_angle < std::f32::consts::TAU {
                angle_attenuation *= process_angular_attenuation(
                    Vec3::NEG_Z,
                    source.position_relative.normalize_or_zero(),
                    listener.cone_inner_angle,
                    listener.cone_outer_angle,
                    listener.cone_outer_gain,
                );
            }

            source.angle_attenuation = angle_attenuation;
        }

        source.doppler_pitch = if config.doppler_factor > 0.0 {
            process_doppler_pitch(
                listener.transform.position - source.transform.position,
                source.velocity,
                listener.velocity,
                SPEED_OF_SOUND,
                config.doppler_factor,
            )
        } else {
            1.0
        };
    }

    fn update_vbap(source: &mut SpatialSource) {
        let config = &source.config;
        let gain = (source.distance_attenuation * source.angle_attenuation)
            .clamp(config.min_gain, config.max_gain);

        source.panner.update(&PanUpdate {
            azimuth: source.azimuth,
            spread: source.spread,
            focus: source.focus,
            gain,
        });

        let mut snapshot = PanSnapshot {
            channels: source.panner.channels(),
            doppler_pitch: source.doppler_pitch,
            ..Default::default()
        };
        for group in source.panner.groups() {
            snapshot.gains[group.channel] = group.gains;
        }
        source.cell.snapshot.publish(snapshot);
    }
}

/// Rear-speaker contribution when folding the quad bus down to stereo.
const REAR_MIX: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Render-side panner. Applies the published VBAP gains to the voice's
/// input, ramping per sample across the block, and folds the internal quad
/// bus to the stereo output.
pub struct PannerNode {
    cell: Arc<PannerCell>,
    channels_in: usize,
    old_gains: [ChannelGains; MAX_CHANNELS],
    target_gains: [ChannelGains; MAX_CHANNELS],
    doppler_pitch: f32,
    quad: Vec<f32>,
}

impl PannerNode {
    pub fn new(cell: Arc<PannerCell>, channels_in: usize, max_block_frames: usize) -> Self {
        Self {
            cell,
            channels_in: channels_in.min(MAX_CHANNELS),
            old_gains: [[0.0; QUAD_CHANNELS]; MAX_CHANNELS],
            target_gains: [[0.0; QUAD_CHANNELS]; MAX_CHANNELS],
            doppler_pitch: 1.0,
            quad: vec![0.0; max_block_frames * QUAD_CHANNELS],
        }
    }

    /// Pull the latest published snapshot, if any. Realtime safe.
    pub fn refresh(&mut self) {
        if let Some(snapshot) = self.cell.snapshot.take_if_dirty() {
            let channels = snapshot.channels.min(MAX_CHANNELS);
            self.target_gains[..channels].copy_from_slice(&snapshot.gains[..channels]);
            self.doppler_pitch = snapshot.doppler_pitch;
        }
    }

    pub fn doppler_pitch(&self) -> f32 {
        self.doppler_pitch
    }

    pub fn is_started(&self) -> bool {
        self.cell.is_started()
    }

    /// Pan `input` (interleaved, `channels_in` wide) into the interleaved
    /// stereo `output`, accumulating.
    pub fn process(&mut self, input: &[f32], frames: usize, output: &mut [f32]) {
        if !self.is_started() {
            return;
        }

        let quad_len = frames * QUAD_CHANNELS;
        debug_assert!(quad_len <= self.quad.len());
        self.quad[..quad_len].fill(0.0);

        for ch in 0..self.channels_in {
            for q in 0..QUAD_CHANNELS {
                let start = self.old_gains[ch][q];
                let end = self.target_gains[ch][q];
                sample_ops::add_and_apply_gain_ramp(
                    &mut self.quad[..quad_len],
                    input,
                    q,
                    ch,
                    QUAD_CHANNELS,
                    self.channels_in,
                    frames,
                    start,
                    end,
                );
                self.old_gains[ch][q] = end;
            }
        }

        // Fixed quad -> stereo fold: fronts pass through, rears at -3 dB.
        for i in 0..frames {
            let fl = self.quad[i * QUAD_CHANNELS];
            let fr = self.quad[i * QUAD_CHANNELS + 1];
            let bl = self.quad[i * QUAD_CHANNELS + 2];
            let br = self.quad[i * QUAD_CHANNELS + 3];
            output[i * 2] += fl + bl * REAR_MIX;
            output[i * 2 + 1] += fr + br * REAR_MIX;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_attenuation_matches_reference_values() {
        let gain = |d: f32| {
            process_distance_attenuation(AttenuationModel::Inverse, d, 1.0, 100.0, 1.0)
        };
        assert!((gain(1.0) - 1.0).abs() < 1e-6);
        assert!((gain(2.0) - 0.5).abs() < 1e-6);
        assert!((gain(10.0) - 0.1).abs() < 1e-6);
        assert!((gain(100.0) - 0.01).abs() < 1e-6);
        // Beyond max distance the gain is clamped.
        assert!((gain(200.0) - gain(100.0)).abs() < 1e-6);
    }

    #[test]
    fn attenuation_is_non_increasing_in_distance() {
        for model in [
            AttenuationModel::Inverse,
            AttenuationModel::Linear,
            AttenuationModel::Exponential,
        ] {
            let mut prev = f32::INFINITY;
            for i in 0..500 {
                let d = 0.5 + i as f32 * 0.5;
                let g = process_distance_attenuation(model, d, 1.0, 100.0, 1.0);
                assert!(g <= prev + 1e-6, "{model:?} increased at d={d}");
                prev = g;
            }
        }
    }

    #[test]
    fn degenerate_distance_range_does_not_attenuate() {
        let g = process_distance_attenuation(AttenuationModel::Inverse, 50.0, 10.0, 10.0, 1.0);
        assert_eq!(g, 1.0);
    }

    #[test]
    fn doppler_matches_reference_scenario() {
        // Listener at origin, source at (10,0,0) approaching at 50 m/s.
        let pitch = process_doppler_pitch(
            Vec3::new(-10.0, 0.0, 0.0),
            Vec3::new(-50.0, 0.0, 0.0),
            Vec3::ZERO,
            SPEED_OF_SOUND,
            1.0,
        );
        assert!((pitch - 343.3 / (343.3 - 50.0)).abs() < 1e-4);
        assert!((pitch - 1.1705).abs() < 1e-3);
    }

    #[test]
    fn full_circle_cone_never_attenuates() {
        let g = process_angular_attenuation(
            Vec3::NEG_Z,
            Vec3::Z,
            std::f32::consts::TAU,
            std::f32::consts::TAU,
            0.25,
        );
        assert_eq!(g, 1.0);
    }

    #[test]
    fn cone_interpolates_between_inner_and_outer() {
        let inner = std::f32::consts::FRAC_PI_2;
        let outer = std::f32::consts::PI;
        // Facing straight at the target: inside the inner cone.
        let g = process_angular_attenuation(Vec3::NEG_Z, Vec3::NEG_Z, inner, outer, 0.1);
        assert_eq!(g, 1.0);
        // Behind the source: outside the outer cone.
        let g = process_angular_attenuation(Vec3::NEG_Z, Vec3::Z, inner, outer, 0.1);
        assert!((g - 0.1).abs() < 1e-6);
    }

    #[test]
    fn node_stays_silent_until_first_position_update() {
        let mut spatializer = Spatializer::new();
        let cell = spatializer.init_source(0, 1, Arc::new(SpatializationConfig::default()));
        let mut node = PannerNode::new(cell, 1, 64);

        let input = vec![1.0f32; 64];
        let mut output = vec![0.0f32; 128];
        node.refresh();
        node.process(&input, 64, &mut output);
        assert!(output.iter().all(|&s| s == 0.0));

        spatializer.update_source_position(
            0,
            Transform {
                position: Vec3::new(0.0, 0.0, -5.0),
                ..Default::default()
            },
            Vec3::ZERO,
        );
        node.refresh();
        node.process(&input, 64, &mut output);
        assert!(output.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn listener_move_rederives_every_source() {
        let mut spatializer = Spatializer::new();
        let _cell = spatializer.init_source(3, 1, Arc::new(SpatializationConfig::default()));
        spatializer.update_source_position(
            3,
            Transform {
                position: Vec3::new(0.0, 0.0, -10.0),
                ..Default::default()
            },
            Vec3::ZERO,
        );
        let before = spatializer.current_distance(3).unwrap();

        spatializer.update_listener(
            Transform {
                position: Vec3::new(0.0, 0.0, -5.0),
                ..Default::default()
            },
            Vec3::ZERO,
        );
        let after = spatializer.current_distance(3).unwrap();
        assert!((before - 10.0).abs() < 1e-4);
        assert!((after - 5.0).abs() < 1e-4);
    }
}
