//! Realtime-safe parameter plumbing: a single-writer/single-reader cell for
//! publishing control-thread values into the device callback, and a linear
//! fader for click-free gain changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Single-writer, single-reader publication cell.
///
/// The control thread publishes immutable snapshots; the realtime reader
/// takes the latest snapshot without blocking. An `is-dirty` flag lets the
/// reader skip untouched cells.
pub struct RealtimeCell<T> {
    slot: ArcSwap<T>,
    dirty: AtomicBool,
}

impl<T> RealtimeCell<T> {
    pub fn new(initial: T) -> Self {
        Self {
            slot: ArcSwap::from_pointee(initial),
            dirty: AtomicBool::new(false),
        }
    }

    /// Publish a new snapshot. Control thread only.
    pub fn publish(&self, value: T) {
        self.slot.store(Arc::new(value));
        self.dirty.store(true, Ordering::Release);
    }

    /// Read the current snapshot regardless of the dirty flag.
    pub fn read(&self) -> Arc<T> {
        self.slot.load_full()
    }

    /// Realtime reader: returns the latest snapshot only when it changed
    /// since the previous take, clearing the dirty flag.
    pub fn take_if_dirty(&self) -> Option<Arc<T>> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            Some(self.slot.load_full())
        } else {
            None
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

/// Linear per-sample gain ramp. Runs on the realtime side; configured
/// through explicit fade commands from the voice state machine.
pub struct Fader {
    current: f32,
    target: f32,
    step: f32,
    remaining: u64,
}

impl Default for Fader {
    fn default() -> Self {
        Self::new()
    }
}

impl Fader {
    pub fn new() -> Self {
        Self {
            current: 1.0,
            target: 1.0,
            step: 0.0,
            remaining: 0,
        }
    }

    /// Begin a fade to `target` over `frames` samples. `from` of `None`
    /// starts from the current level.
    pub fn set_fade(&mut self, from: Option<f32>, target: f32, frames: u64) {
        if let Some(start) = from {
            self.current = start;
        }
        self.target = target;
        if frames == 0 {
            self.current = target;
            self.remaining = 0;
            self.step = 0.0;
        } else {
            self.step = (target - self.current) / frames as f32;
            self.remaining = frames;
        }
    }

    /// Jump to a level with no ramp.
    pub fn snap_to(&mut self, level: f32) {
        self.current = level;
        self.target = level;
        self.step = 0.0;
        self.remaining = 0;
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn is_ramping(&self) -> bool {
        self.remaining > 0
    }

    /// Apply the ramp to an interleaved buffer in place.
    pub fn process_interleaved(&mut self, buffer: &mut [f32], channels: usize) {
        for frame in buffer.chunks_exact_mut(channels) {
            let gain = self.current;
            for sample in frame {
                *sample *= gain;
            }
            if self.remaining > 0 {
                self.current += self.step;
                self.remaining -= 1;
                if self.remaining == 0 {
                    self.current = self.target;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_delivers_latest_snapshot_once() {
        let cell = RealtimeCell::new(0u32);
        assert!(cell.take_if_dirty().is_none());

        cell.publish(7);
        cell.publish(9);
        assert_eq!(*cell.take_if_dirty().unwrap(), 9);
        assert!(cell.take_if_dirty().is_none());
    }

    #[test]
    fn fader_reaches_target_exactly() {
        let mut fader = Fader::new();
        fader.set_fade(Some(1.0), 0.0, 100);
        let mut buf = vec![1.0f32; 200];
        fader.process_interleaved(&mut buf, 2);
        assert_eq!(fader.value(), 0.0);
        assert!(!fader.is_ramping());
        // First frame keeps the starting gain, later frames decay.
        assert_eq!(buf[0], 1.0);
        assert!(buf[100] < buf[0]);
        assert!(buf[198] < 0.02);
    }

    #[test]
    fn fade_from_current_level() {
        let mut fader = Fader::new();
        fader.snap_to(0.5);
        fader.set_fade(None, 1.0, 10);
        let mut buf = vec![1.0f32; 10];
        fader.process_interleaved(&mut buf, 1);
        assert!((fader.value() - 1.0).abs() < 1e-6);
        assert!((buf[0] - 0.5).abs() < 1e-6);
    }
}
