//! The resource manager: owns the mounted sound bank, decides streaming
//! versus preloading, and vends data sources and readers to the source
//! manager. Audio-thread only, except construction.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use sound_bank::{
    decode_all, open_stream, probe_info, AssetBackend, PcmBuffer, SoundBank, StreamPump,
    StreamReader,
};
use tracing::{error, info};

use crate::config::UserConfig;
use crate::mixer::VoiceSource;
use crate::registry::CommandRegistry;
use crate::stats::{AllocatorTag, MemoryCounters};
use crate::{command::ActionKind, CommandId, EngineError, SourceId};

/// Ring capacity for streamed voices, frames at the file's native rate.
const STREAM_RING_FRAMES: usize = 32_768;

/// Everything the source manager needs to build a render chain.
pub struct VoiceSourceInit {
    pub source: VoiceSource,
    pub sample_rate: u32,
    pub channels: u16,
    pub total_frames: u64,
}

pub struct ResourceManager {
    bank_path: Option<PathBuf>,
    bank: Option<SoundBank>,
    /// Editor-mode fallback when an asset is not packaged.
    asset_backend: Option<Box<dyn AssetBackend>>,
    /// Preloaded, fully decoded files. Kept alive while registered.
    preloaded: HashMap<u64, Arc<PcmBuffer>>,
    /// Decode pumps of currently streaming voices, keyed by slot.
    pumps: HashMap<SourceId, StreamPump>,
    streaming_threshold: f64,
    mem: Arc<MemoryCounters>,
}

impl ResourceManager {
    pub fn new(
        bank_path: Option<PathBuf>,
        asset_backend: Option<Box<dyn AssetBackend>>,
        user_config: &UserConfig,
        mem: Arc<MemoryCounters>,
    ) -> Self {
        Self {
            bank_path,
            bank: None,
            asset_backend,
            preloaded: HashMap::new(),
            pumps: HashMap::new(),
            streaming_threshold: user_config.file_streaming_duration_threshold,
            mem,
        }
    }

    /// Mount the project's bank if one exists at the configured path.
    /// A present-but-corrupt bank is a fatal initialization error.
    pub fn initialize(&mut self) -> Result<(), EngineError> {
        if self.bank.is_some() || !self.preloaded.is_empty() {
            self.release();
        }

        let Some(path) = self.bank_path.clone() else {
            return Ok(());
        };
        if !path.is_file() {
            info!(target: "audio::resources", path = %path.display(), "no sound bank present");
            return Ok(());
        }

        let bank = SoundBank::open(&path)?;
        self.bank = Some(bank);
        Ok(())
    }

    /// Unregister every preloaded file and drop the bank.
    pub fn release(&mut self) {
        let unloaded_any = !self.preloaded.is_empty();
        for (_, pcm) in self.preloaded.drain() {
            self.mem
                .on_free(AllocatorTag::ResourceManager, pcm_bytes(&pcm));
        }
        self.pumps.clear();

        match self.bank.take() {
            Some(bank) => info!(
                target: "audio::resources",
                path = %bank.path().display(),
                "sound bank unloaded"
            ),
            None if unloaded_any => {
                info!(target: "audio::resources", "preloaded sounds unloaded")
            }
            None => {}
        }
    }

    pub fn bank(&self) -> Option<&SoundBank> {
        self.bank.as_ref()
    }

    pub fn set_streaming_threshold(&mut self, seconds: f64) {
        self.streaming_threshold = seconds;
    }

    /// Whether this file should be streamed rather than held in memory.
    pub fn is_streaming(&self, handle: u64) -> bool {
        if let Some(bank) = &self.bank {
            if let Some(info) = bank.file_info(handle) {
                return info.duration >= self.streaming_threshold;
            }
        }
        if let Some(backend) = &self.asset_backend {
            if let Some(mut reader) = backend.create_reader(handle) {
                let mut bytes = Vec::new();
                if std::io::Read::read_to_end(&mut reader, &mut bytes).is_ok() {
                    if let Ok(info) = probe_info(&bytes) {
                        return info.duration >= self.streaming_threshold;
                    }
                }
            }
        }
        false
    }

    /// Decode a short file into memory ahead of playback. Returns false
    /// when the handle is not in the bank; streaming-length files succeed
    /// without loading anything.
    pub fn preload_audio_file(&mut self, handle: u64) -> bool {
        let Some(bank) = &self.bank else {
            return false;
        };
        if self.preloaded.contains_key(&handle) {
            return true;
        }
        let Some(info) = bank.file_info(handle) else {
            return false;
        };
        if info.duration >= self.streaming_threshold {
            return true;
        }

        let bytes = match bank.read_file_bytes(handle) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(target: "audio::resources", handle, "failed to read blob: {e}");
                return false;
            }
        };
        let pcm = match decode_all(&bytes) {
            Ok(pcm) => Arc::new(pcm),
            Err(e) => {
                error!(target: "audio::resources", handle, "failed to decode blob: {e}");
                return false;
            }
        };

        self.mem
            .on_alloc(AllocatorTag::ResourceManager, pcm_bytes(&pcm));
        self.preloaded.insert(handle, pcm);
        true
    }

    pub fn release_audio_file(&mut self, handle: u64) -> bool {
        if let Some(pcm) = self.preloaded.remove(&handle) {
            self.mem
                .on_free(AllocatorTag::ResourceManager, pcm_bytes(&pcm));
        }
        true
    }

    pub fn is_preloaded(&self, handle: u64) -> bool {
        self.preloaded.contains_key(&handle)
    }

    /// Preload the audio of every Play action of a trigger.
    pub fn preload_event_sources(&mut self, command_id: CommandId, registry: &CommandRegistry) {
        for handle in Self::wave_handles_for_trigger(command_id, registry) {
            self.preload_audio_file(handle);
        }
    }

    pub fn unload_event_sources(&mut self, command_id: CommandId, registry: &CommandRegistry) {
        for handle in Self::wave_handles_for_trigger(command_id, registry) {
            self.release_audio_file(handle);
        }
    }

    fn wave_handles_for_trigger(command_id: CommandId, registry: &CommandRegistry) -> Vec<u64> {
        let Some(trigger) = registry.trigger(command_id) else {
            return Vec::new();
        };
        let mut handles: Vec<u64> = trigger
            .actions
            .iter()
            .filter(|action| action.kind == ActionKind::Play)
            .filter_map(|action| action.target.as_ref())
            .map(|target| target.data_source_asset)
            .collect();
        handles.sort_unstable();
        handles.dedup();
        handles
    }

    /// Bank-backed reader, or the filesystem fallback when available.
    pub fn create_reader_for(&self, handle: u64) -> Option<Box<dyn StreamReader>> {
        if let Some(bank) = &self.bank {
            if let Some(reader) = bank.create_reader_for(handle) {
                return Some(reader);
            }
        }
        self.asset_backend
            .as_ref()
            .and_then(|backend| backend.create_reader(handle))
    }

    pub fn file_size(&self, handle: u64) -> usize {
        if let Some(bank) = &self.bank {
            let size = bank.file_size(handle);
            if size > 0 {
                return size as usize;
            }
        }
        self.asset_backend
            .as_ref()
            .map_or(0, |backend| backend.file_size(handle))
    }

    /// Build the data source for a new voice on `slot`.
    pub fn create_voice_source(
        &mut self,
        slot: SourceId,
        handle: u64,
        looping: bool,
    ) -> Result<VoiceSourceInit, EngineError> {
        // Preloaded files play straight out of the shared buffer.
        if let Some(pcm) = self.preloaded.get(&handle) {
            return Ok(VoiceSourceInit {
                sample_rate: pcm.sample_rate,
                channels: pcm.channels,
                total_frames: pcm.frames(),
                source: VoiceSource::buffer(pcm.clone()),
            });
        }

        if self.is_streaming(handle) {
            let reader = self
                .create_reader_for(handle)
                .ok_or(EngineError::ResourceUnavailable(handle))?;
            let (pump, tap) = open_stream(reader, STREAM_RING_FRAMES, looping)?;
            let total_frames = tap.total_frames().unwrap_or(0);
            let init = VoiceSourceInit {
                sample_rate: tap.sample_rate(),
                channels: tap.channels(),
                total_frames,
                source: VoiceSource::stream(tap),
            };
            self.pumps.insert(slot, pump);
            return Ok(init);
        }

        // Short and not preloaded: decode on the spot.
        let mut reader = self
            .create_reader_for(handle)
            .ok_or(EngineError::ResourceUnavailable(handle))?;
        let mut bytes = Vec::with_capacity(reader.stream_length() as usize);
        std::io::Read::read_to_end(&mut reader, &mut bytes)
            .map_err(|e| EngineError::Fatal(format!("read asset {handle:#x}: {e}")))?;
        let pcm = Arc::new(decode_all(&bytes)?);

        Ok(VoiceSourceInit {
            sample_rate: pcm.sample_rate,
            channels: pcm.channels,
            total_frames: pcm.frames(),
            source: VoiceSource::buffer(pcm),
        })
    }

    /// Drop the pump of a released streaming voice, if any.
    pub fn release_voice_source(&mut self, slot: SourceId) {
        self.pumps.remove(&slot);
    }

    /// Keep every streaming voice's ring topped up. Called once per tick.
    pub fn update_streams(&mut self) {
        for pump in self.pumps.values_mut() {
            pump.pump();
        }
    }

    pub fn streaming_voice_count(&self) -> usize {
        self.pumps.len()
    }
}

fn pcm_bytes(pcm: &PcmBuffer) -> u64 {
    (pcm.samples.len() * std::mem::size_of::<f32>()) as u64
}
