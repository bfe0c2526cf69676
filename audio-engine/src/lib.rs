//! The audio runtime core: command dispatch on a dedicated audio thread,
//! trigger-driven voice management over a fixed pool, per-voice DSP chains
//! and a master reverb bus, mixed in the device callback.
//!
//! Game code talks to [`AudioEngine`]: register commands, post triggers on
//! objects, submit transform snapshots each scene tick. Everything else
//! happens on the audio thread and in the realtime mixer.

pub mod audio_thread;
pub mod command;
pub mod config;
pub mod engine;
pub mod events;
pub mod listener;
pub mod mixer;
pub mod pool;
pub mod registry;
pub mod resources;
pub mod sources;
pub mod stats;
pub mod voice;

pub use audio_thread::{AudioThread, AudioThreadFence, JobPolicy};
pub use command::{
    ActionContext, ActionKind, CommandId, CommandKind, PlayingEventAction, TriggerAction,
    TriggerCommand,
};
pub use config::{SoundConfig, SourceUpdateData, UserConfig};
pub use engine::{AudioEngine, AudioEngineConfig, PlaybackTarget};
pub use events::{EventId, EventInfo};
pub use registry::CommandRegistry;
pub use stats::Stats;
pub use voice::PlayState;

pub use audio_dsp::{AttenuationModel, SpatializationConfig, Transform};

use thiserror::Error;

/// Number of voice slots in the pool.
pub const MAX_SOURCES: usize = 32;

/// Length of the stop/pause fade ramp.
pub const STOPPING_FADE_MS: u32 = 28;

/// Nominal device period, frames. Used for the audio thread tick pacing;
/// the actual block size is whatever the device reports.
pub const PCM_FRAME_CHUNK_SIZE: usize = 480;

/// Slot index into the voice pool.
pub type SourceId = usize;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Backend(#[from] audio_backend::BackendError),
    #[error(transparent)]
    Bank(#[from] sound_bank::BankError),
    #[error("asset {0:#x} unavailable: not in the bank and no filesystem fallback")]
    ResourceUnavailable(u64),
    #[error("no free voice slot available")]
    NoFreeSlot,
    #[error("{0}")]
    Fatal(String),
}
