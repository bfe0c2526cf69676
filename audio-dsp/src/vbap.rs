//! Vector-based amplitude panning over the internal quad speaker bus.
//!
//! Azimuth convention: radians in the listener's horizontal plane, `0` dead
//! ahead, positive to the right, range `(-pi, pi]`.

use std::f32::consts::{FRAC_PI_4, PI};

use crate::{lerp, QUAD_CHANNELS};

/// Azimuths of the four virtual speakers: front-left, front-right,
/// back-left, back-right. Index order matches the quad bus channels.
pub const QUAD_SPEAKER_ANGLES: [f32; QUAD_CHANNELS] = [
    -FRAC_PI_4,
    FRAC_PI_4,
    -3.0 * FRAC_PI_4,
    3.0 * FRAC_PI_4,
];

/// Virtual sources distributed across the spread arc of one channel group.
pub const NUM_VIRTUAL_SOURCES: usize = 8;

pub type ChannelGains = [f32; QUAD_CHANNELS];

/// Positional data consumed by [`VbapPanner::update`].
#[derive(Debug, Clone, Copy)]
pub struct PanUpdate {
    pub azimuth: f32,
    pub spread: f32,
    pub focus: f32,
    /// Combined distance and cone attenuation applied on top of panning.
    pub gain: f32,
}

/// Gains for the speaker pair bracketing one direction.
#[derive(Debug, Clone, Copy)]
pub struct PairGains {
    pub speakers: (usize, usize),
    pub gains: (f32, f32),
}

#[inline]
pub fn wrap_angle(angle: f32) -> f32 {
    let mut a = angle;
    while a > PI {
        a -= 2.0 * PI;
    }
    while a <= -PI {
        a += 2.0 * PI;
    }
    a
}

/// Compute the active speaker pair and its gains for a source direction.
///
/// The pair matrix inverse solves `[u1 u2] * g = p`; the result is
/// normalized so that `g1^2 + g2^2 == 1`.
pub fn pair_gains(azimuth: f32) -> PairGains {
    // Speaker indices sorted by angle: BL, FL, FR, BR.
    const ORDER: [usize; QUAD_CHANNELS] = [2, 0, 1, 3];

    let a = wrap_angle(azimuth);

    let mut lo = ORDER[QUAD_CHANNELS - 1];
    let mut hi = ORDER[0];
    for w in ORDER.windows(2) {
        let (s1, s2) = (w[0], w[1]);
        if a >= QUAD_SPEAKER_ANGLES[s1] && a < QUAD_SPEAKER_ANGLES[s2] {
            lo = s1;
            hi = s2;
            break;
        }
    }

    let u1 = (QUAD_SPEAKER_ANGLES[lo].sin(), QUAD_SPEAKER_ANGLES[lo].cos());
    let u2 = (QUAD_SPEAKER_ANGLES[hi].sin(), QUAD_SPEAKER_ANGLES[hi].cos());
    let p = (a.sin(), a.cos());

    let det = u1.0 * u2.1 - u1.1 * u2.0;
    let (mut g1, mut g2) = if det.abs() < 1e-9 {
        (1.0, 0.0)
    } else {
        (
            (u2.1 * p.0 - u2.0 * p.1) / det,
            (-u1.1 * p.0 + u1.0 * p.1) / det,
        )
    };

    // A bracketing pair yields non-negative gains; numeric noise can still
    // dip slightly below zero at the arc edges.
    g1 = g1.max(0.0);
    g2 = g2.max(0.0);

    let norm = (g1 * g1 + g2 * g2).sqrt();
    if norm > 0.0 {
        g1 /= norm;
        g2 /= norm;
    } else {
        g1 = 1.0;
    }

    PairGains {
        speakers: (lo, hi),
        gains: (g1, g2),
    }
}

/// One set of virtual sources bound to one input channel.
#[derive(Debug, Clone)]
pub struct ChannelGroup {
    pub channel: usize,
    /// Azimuth this input channel leans toward at full spread.
    pub base_angle: f32,
    pub gains: ChannelGains,
}

/// Control-side gain computation for one spatialized voice.
pub struct VbapPanner {
    groups: Vec<ChannelGroup>,
}

impl VbapPanner {
    pub fn new(input_channels: usize) -> Self {
        let channels = input_channels.max(1);
        let groups = (0..channels)
            .map(|channel| ChannelGroup {
                channel,
                base_angle: Self::channel_angle(channel, channels),
                gains: [0.0; QUAD_CHANNELS],
            })
            .collect();
        Self { groups }
    }

    fn channel_angle(channel: usize, channels: usize) -> f32 {
        match channels {
            1 => 0.0,
            2 => {
                if channel == 0 {
                    -FRAC_PI_4
                } else {
                    FRAC_PI_4
                }
            }
            n => {
                // Spread additional channels evenly across the frontal arc.
                let t = channel as f32 / (n - 1) as f32 - 0.5;
                t * PI * 0.5
            }
        }
    }

    pub fn channels(&self) -> usize {
        self.groups.len()
    }

    pub fn groups(&self) -> &[ChannelGroup] {
        &self.groups
    }

    /// Recompute the accumulated, power-normalized gains of every channel
    /// group for a new source direction.
    pub fn update(&mut self, update: &PanUpdate) {
        let spread = update.spread.clamp(0.0, 1.0);
        let focus = update.focus.clamp(0.0, 1.0);
        let arc = spread * PI;

        for group in &mut self.groups {
            let center = update.azimuth + group.base_angle * spread;
            let mut accumulated = [0.0f32; QUAD_CHANNELS];

            for k in 0..NUM_VIRTUAL_SOURCES {
                let t = (k as f32 + 0.5) / NUM_VIRTUAL_SOURCES as f32 - 0.5;
                let angle = center + t * arc;
                // Focus pulls the virtual-source energy toward the arc center.
                let weight = lerp(1.0, 1.0 - 2.0 * t.abs(), focus);

                let pair = pair_gains(angle);
                accumulated[pair.speakers.0] += weight * pair.gains.0;
                accumulated[pair.speakers.1] += weight * pair.gains.1;
            }

            let norm = accumulated.iter().map(|g| g * g).sum::<f32>().sqrt();
            if norm > 0.0 {
                for gain in &mut accumulated {
                    *gain = *gain / norm * update.gain;
                }
            }

            group.gains = accumulated;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_gains_are_power_normalized_for_every_azimuth() {
        for i in 0..=3600 {
            let azimuth = (i as f32 / 3600.0) * 2.0 * PI - PI;
            let pair = pair_gains(azimuth);
            let power = pair.gains.0 * pair.gains.0 + pair.gains.1 * pair.gains.1;
            assert!(
                (power - 1.0).abs() < 1e-6,
                "azimuth {azimuth}: power {power}"
            );
        }
    }

    #[test]
    fn front_source_splits_between_front_speakers() {
        let pair = pair_gains(0.0);
        assert_eq!(pair.speakers, (0, 1));
        assert!((pair.gains.0 - pair.gains.1).abs() < 1e-6);
    }

    #[test]
    fn on_speaker_source_uses_that_speaker_alone() {
        let pair = pair_gains(-FRAC_PI_4);
        assert_eq!(pair.speakers.0, 0);
        assert!((pair.gains.0 - 1.0).abs() < 1e-5);
        assert!(pair.gains.1.abs() < 1e-5);
    }

    #[test]
    fn group_gains_preserve_power_and_attenuation() {
        let mut panner = VbapPanner::new(1);
        panner.update(&PanUpdate {
            azimuth: 0.3,
            spread: 0.5,
            focus: 0.2,
            gain: 0.7,
        });
        let group = &panner.groups()[0];
        let power = group.gains.iter().map(|g| g * g).sum::<f32>().sqrt();
        assert!((power - 0.7).abs() < 1e-5);
    }

    #[test]
    fn stereo_groups_lean_left_and_right() {
        let mut panner = VbapPanner::new(2);
        panner.update(&PanUpdate {
            azimuth: 0.0,
            spread: 1.0,
            focus: 0.0,
            gain: 1.0,
        });
        let left = &panner.groups()[0].gains;
        let right = &panner.groups()[1].gains;
        assert!(left[0] > left[1], "left channel favors front-left");
        assert!(right[1] > right[0], "right channel favors front-right");
    }
}
