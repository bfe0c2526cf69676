//! Shared fixtures for the end-to-end engine tests: in-memory WAV
//! generation, bank construction, and a deterministically stepped engine
//! on the mock device.

use std::io::Cursor;
use std::sync::Arc;

use audio_backend::mock_backend::{MockAudioBackend, MockDriver};
use audio_engine::{AudioEngine, AudioEngineConfig, SoundConfig, UserConfig};
use sound_bank::{write_bank, BankFileSpec};
use tempfile::TempDir;

pub const SAMPLE_RATE: u32 = 48_000;
pub const BLOCK_FRAMES: usize = 480;

/// Generate a mono 16-bit WAV containing a 440 Hz tone.
pub fn tone_wav(frames: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            let t = i as f32 / SAMPLE_RATE as f32;
            let sample = (2.0 * std::f32::consts::PI * 440.0 * t).sin();
            writer
                .write_sample((sample * i16::MAX as f32 * 0.5) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// One file destined for the test bank.
pub struct TestAsset {
    pub handle: u64,
    pub frames: usize,
}

/// Engine + mock device clock + the bank's backing directory.
pub struct TestRig {
    pub engine: Arc<AudioEngine>,
    pub driver: MockDriver,
    _bank_dir: TempDir,
}

impl TestRig {
    pub fn new(assets: &[TestAsset], max_sources: usize) -> Self {
        let bank_dir = tempfile::tempdir().unwrap();
        let bank_path = bank_dir.path().join("SoundBank.hsb");

        let wavs: Vec<(u64, Vec<u8>)> = assets
            .iter()
            .map(|asset| (asset.handle, tone_wav(asset.frames)))
            .collect();
        let specs: Vec<BankFileSpec> = wavs
            .iter()
            .map(|(handle, bytes)| BankFileSpec {
                handle: *handle,
                bytes,
                duration: sound_bank::probe_info(bytes).unwrap().duration,
                sample_rate: SAMPLE_RATE,
                channels: 1,
            })
            .collect();
        write_bank(&bank_path, &specs).unwrap();

        let (backend, driver) = MockAudioBackend::new(SAMPLE_RATE, BLOCK_FRAMES);
        let engine = AudioEngine::new(
            Box::new(backend),
            AudioEngineConfig {
                bank_path: Some(bank_path),
                asset_backend: None,
                max_sources,
                user: UserConfig::default(),
            },
        )
        .unwrap();

        Self {
            engine,
            driver,
            _bank_dir: bank_dir,
        }
    }

    /// One device block plus one audio-thread tick of the block duration.
    pub fn step(&self) {
        self.driver.render_blocks(1);
        self.engine
            .tick(BLOCK_FRAMES as f32 / SAMPLE_RATE as f32);
    }

    pub fn step_n(&self, ticks: usize) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Render one block and return it for inspection.
    pub fn render_and_capture(&self) -> Vec<f32> {
        let block = self.driver.render_blocks(1);
        self.engine
            .tick(BLOCK_FRAMES as f32 / SAMPLE_RATE as f32);
        block
    }
}

/// A plain, non-spatialized looping or one-shot sound config.
pub fn sound(handle: u64, looping: bool, priority: u8) -> Arc<SoundConfig> {
    Arc::new(SoundConfig {
        data_source_asset: handle,
        looping,
        priority,
        ..Default::default()
    })
}

pub fn rms(block: &[f32]) -> f32 {
    (block.iter().map(|s| s * s).sum::<f32>() / block.len() as f32).sqrt()
}
