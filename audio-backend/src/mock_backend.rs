//! Clock-free mock endpoint for tests and headless runs. The paired
//! [`MockDriver`] stands in for the device clock: tests call
//! [`MockDriver::render_blocks`] to pull audio deterministically.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::{AudioBackend, BackendError, DiagnosticsCb, RenderFn};

struct MockShared {
    render: Mutex<Option<RenderFn>>,
    running: AtomicBool,
    frames: AtomicU64,
    sample_rate: u32,
    block_frames: usize,
    channels: usize,
}

pub struct MockAudioBackend {
    shared: Arc<MockShared>,
    diagnostics: Option<DiagnosticsCb>,
}

/// Test-side handle that drives the mock device "callback".
#[derive(Clone)]
pub struct MockDriver {
    shared: Arc<MockShared>,
}

impl MockAudioBackend {
    pub fn new(sample_rate: u32, block_frames: usize) -> (Self, MockDriver) {
        let shared = Arc::new(MockShared {
            render: Mutex::new(None),
            running: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            sample_rate,
            block_frames,
            channels: 2,
        });
        (
            Self {
                shared: shared.clone(),
                diagnostics: None,
            },
            MockDriver { shared },
        )
    }
}

impl AudioBackend for MockAudioBackend {
    fn start(&mut self, render: RenderFn) -> Result<(), BackendError> {
        *self.shared.render.lock().unwrap() = Some(render);
        self.shared.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.shared.running.store(false, Ordering::Release);
        *self.shared.render.lock().unwrap() = None;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    fn block_frames(&self) -> usize {
        self.shared.block_frames
    }

    fn channels(&self) -> u16 {
        self.shared.channels as u16
    }

    fn frames_since_start(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    fn set_diagnostics_callback(&mut self, cb: Option<DiagnosticsCb>) {
        self.diagnostics = cb;
    }

    fn device_name(&self) -> Option<String> {
        Some("mock-device".to_string())
    }
}

impl MockDriver {
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn block_frames(&self) -> usize {
        self.shared.block_frames
    }

    /// Pull `blocks` device periods through the render callback, returning
    /// the last rendered block (interleaved stereo).
    pub fn render_blocks(&self, blocks: usize) -> Vec<f32> {
        let shared = &self.shared;
        let mut buffer = vec![0.0f32; shared.block_frames * shared.channels];
        if !self.is_running() {
            return buffer;
        }
        let mut slot = shared.render.lock().unwrap();
        if let Some(render) = slot.as_mut() {
            for _ in 0..blocks {
                buffer.fill(0.0);
                render(&mut buffer, shared.block_frames, shared.channels);
                shared
                    .frames
                    .fetch_add(shared.block_frames as u64, Ordering::Relaxed);
            }
        }
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_pulls_blocks_through_the_render_fn() {
        let (mut backend, driver) = MockAudioBackend::new(48_000, 128);
        backend
            .start(Box::new(|buf, frames, channels| {
                assert_eq!(buf.len(), frames * channels);
                buf.fill(0.5);
            }))
            .unwrap();

        let block = driver.render_blocks(3);
        assert!(block.iter().all(|&s| s == 0.5));
        assert_eq!(backend.frames_since_start(), 3 * 128);

        backend.stop().unwrap();
        assert!(!driver.is_running());
    }
}
