//! Device endpoint abstraction for the audio runtime.
//!
//! The engine renders into whatever block size and sample rate the device
//! reports; the backend owns the realtime stream and calls the render
//! function once per device period.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub mod cpal_backend;
pub mod mock_backend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no output device available")]
    DeviceNotFound,
    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to create the output stream: {0}")]
    StreamCreationFailed(String),
    #[error("playback error: {0}")]
    PlaybackError(String),
    #[error("{0}")]
    Other(String),
}

/// The render callback invoked on the realtime thread.
///
/// Fills `buffer` (interleaved f32) with `frames` frames of `channels`
/// channels. Must never block or allocate.
pub type RenderFn = Box<dyn FnMut(&mut [f32], usize, usize) + Send + 'static>;

/// Diagnostics events emitted by the backend outside the realtime path.
#[derive(Debug, Clone)]
pub enum DiagnosticEvent {
    XRun { count: u32 },
    DeviceRemoved,
    BlockSizeChanged { frames: usize },
    Other(String),
}

impl fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticEvent::XRun { count } => write!(f, "XRun(count={count})"),
            DiagnosticEvent::DeviceRemoved => write!(f, "DeviceRemoved"),
            DiagnosticEvent::BlockSizeChanged { frames } => {
                write!(f, "BlockSizeChanged(frames={frames})")
            }
            DiagnosticEvent::Other(s) => write!(f, "Other({s})"),
        }
    }
}

pub type DiagnosticsCb = Arc<dyn Fn(DiagnosticEvent) + Send + Sync + 'static>;

/// Effective configuration of the opened output endpoint.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub sample_rate: u32,
    /// Frames per device period; 0 when the device decides per callback.
    pub block_frames: usize,
    pub channels: u16,
    pub device_name: Option<String>,
}

/// Contract every output backend fulfils.
pub trait AudioBackend: Send {
    fn start(&mut self, render: RenderFn) -> Result<(), BackendError>;
    fn stop(&mut self) -> Result<(), BackendError>;
    fn sample_rate(&self) -> u32;
    fn block_frames(&self) -> usize;
    fn channels(&self) -> u16;
    /// Frames rendered since the stream started. 0 if not running.
    fn frames_since_start(&self) -> u64;
    fn set_diagnostics_callback(&mut self, cb: Option<DiagnosticsCb>);
    fn device_name(&self) -> Option<String>;
}

/// Open the default output device.
#[cfg(not(feature = "mock-audio"))]
pub fn create_audio_backend() -> Result<Box<dyn AudioBackend>, BackendError> {
    let backend = cpal_backend::CpalAudioBackend::new()?;
    tracing::info!(
        target: "audio::backend",
        sample_rate = backend.sample_rate(),
        block_frames = backend.block_frames(),
        channels = backend.channels(),
        device = backend.device_name().as_deref().unwrap_or("<unknown>"),
        "output endpoint opened"
    );
    Ok(Box::new(backend))
}

/// Mock endpoint variant selected by the `mock-audio` feature.
#[cfg(feature = "mock-audio")]
pub fn create_audio_backend() -> Result<Box<dyn AudioBackend>, BackendError> {
    let (backend, _driver) = mock_backend::MockAudioBackend::new(48_000, 480);
    Ok(Box::new(backend))
}

/// Whether the `mock-audio` feature was compiled in.
pub fn is_mock_backend_enabled() -> bool {
    cfg!(feature = "mock-audio")
}
