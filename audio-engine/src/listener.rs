//! Shared state of the single audio listener: written by the game thread,
//! consumed by the audio thread once per tick via the `changed` flag.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use audio_dsp::Transform;
use glam::Vec3;
use parking_lot::RwLock;

struct Pose {
    transform: Transform,
    velocity: Vec3,
}

pub struct AudioListener {
    pose: RwLock<Pose>,
    changed: AtomicBool,
    // Cone angles as f32 bit patterns so the game thread never blocks.
    inner_angle: AtomicU32,
    outer_angle: AtomicU32,
    outer_gain: AtomicU32,
}

impl Default for AudioListener {
    fn default() -> Self {
        Self {
            pose: RwLock::new(Pose {
                transform: Transform::default(),
                velocity: Vec3::ZERO,
            }),
            changed: AtomicBool::new(false),
            inner_angle: AtomicU32::new(std::f32::consts::TAU.to_bits()),
            outer_angle: AtomicU32::new(std::f32::consts::TAU.to_bits()),
            outer_gain: AtomicU32::new(0f32.to_bits()),
        }
    }
}

impl AudioListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position_needs_update(&self, new_transform: &Transform) -> bool {
        self.pose.read().transform != *new_transform
    }

    pub fn set_position_direction(&self, new_transform: Transform) {
        self.pose.write().transform = new_transform;
        self.changed.store(true, Ordering::Release);
    }

    pub fn set_velocity(&self, new_velocity: Vec3) {
        let mut pose = self.pose.write();
        if pose.velocity != new_velocity {
            self.changed.store(true, Ordering::Release);
        }
        pose.velocity = new_velocity;
    }

    pub fn set_cone(&self, inner_angle: f32, outer_angle: f32, outer_gain: f32) {
        self.inner_angle.store(inner_angle.to_bits(), Ordering::Relaxed);
        self.outer_angle.store(outer_angle.to_bits(), Ordering::Relaxed);
        self.outer_gain.store(outer_gain.to_bits(), Ordering::Relaxed);
        self.changed.store(true, Ordering::Release);
    }

    pub fn cone(&self) -> (f32, f32, f32) {
        (
            f32::from_bits(self.inner_angle.load(Ordering::Relaxed)),
            f32::from_bits(self.outer_angle.load(Ordering::Relaxed)),
            f32::from_bits(self.outer_gain.load(Ordering::Relaxed)),
        )
    }

    pub fn transform(&self) -> Transform {
        self.pose.read().transform
    }

    pub fn velocity(&self) -> Vec3 {
        self.pose.read().velocity
    }

    /// Check the dirty flag, optionally consuming it.
    pub fn has_changed(&self, reset: bool) -> bool {
        if reset {
            self.changed.swap(false, Ordering::AcqRel)
        } else {
            self.changed.load(Ordering::Acquire)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_flag_is_consumed_once() {
        let listener = AudioListener::new();
        assert!(!listener.has_changed(true));

        let t = Transform {
            position: Vec3::new(1.0, 0.0, 0.0),
            ..Default::default()
        };
        assert!(listener.position_needs_update(&t));
        listener.set_position_direction(t);
        assert!(!listener.position_needs_update(&t));

        assert!(listener.has_changed(true));
        assert!(!listener.has_changed(true), "flag cleared after read");
    }

    #[test]
    fn unchanged_velocity_does_not_set_the_flag() {
        let listener = AudioListener::new();
        listener.set_velocity(Vec3::ZERO);
        assert!(!listener.has_changed(true));
        listener.set_velocity(Vec3::new(0.0, 0.0, -3.0));
        assert!(listener.has_changed(true));
    }
}
