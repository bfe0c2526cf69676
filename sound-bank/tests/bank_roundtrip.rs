use std::io::Cursor;

use sound_bank::{
    decode_all, open_stream, probe_info, write_bank, BankFileSpec, SoundBank, BANK_MAGIC,
};

mod fixtures {
    use super::*;

    /// Generate an in-memory 16-bit WAV with a 440 Hz tone.
    pub fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                let t = i as f32 / sample_rate as f32;
                let sample = (2.0 * std::f32::consts::PI * 440.0 * t).sin();
                let value = (sample * i16::MAX as f32 * 0.5) as i16;
                for _ in 0..channels {
                    writer.write_sample(value).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }
}

#[test]
fn probe_reports_duration_and_layout() {
    let bytes = fixtures::wav_bytes(48_000, 2, 4800);
    let info = probe_info(&bytes).unwrap();
    assert_eq!(info.sample_rate, 48_000);
    assert_eq!(info.channels, 2);
    assert!((info.duration - 0.1).abs() < 1e-3);
}

#[test]
fn decode_produces_interleaved_pcm() {
    let bytes = fixtures::wav_bytes(44_100, 1, 1000);
    let pcm = decode_all(&bytes).unwrap();
    assert_eq!(pcm.channels, 1);
    assert_eq!(pcm.sample_rate, 44_100);
    assert_eq!(pcm.frames(), 1000);
    // The tone has energy.
    assert!(pcm.samples.iter().any(|&s| s.abs() > 0.1));
}

#[test]
fn bank_write_open_and_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("SoundBank.hsb");

    let wav_a = fixtures::wav_bytes(48_000, 1, 2400);
    let wav_b = fixtures::wav_bytes(48_000, 2, 9600);

    write_bank(
        &path,
        &[
            BankFileSpec {
                handle: 0xA11CE,
                bytes: &wav_a,
                duration: 0.05,
                sample_rate: 48_000,
                channels: 1,
            },
            BankFileSpec {
                handle: 0xB0B,
                bytes: &wav_b,
                duration: 0.2,
                sample_rate: 48_000,
                channels: 2,
            },
        ],
    )
    .unwrap();

    let bank = SoundBank::open(&path).unwrap();
    assert_eq!(bank.len(), 2);
    assert!(bank.contains(0xA11CE));
    assert!(bank.contains(0xB0B));
    assert!(!bank.contains(0xDEAD));
    assert!(bank.create_reader_for(0xDEAD).is_none());

    let info = bank.file_info(0xB0B).unwrap();
    assert_eq!(info.channels, 2);
    assert_eq!(info.file_size, wav_b.len() as u64);

    // Bytes survive the round trip.
    assert_eq!(bank.read_file_bytes(0xA11CE).unwrap(), wav_a);

    // A windowed reader decodes like the loose file.
    let reader = bank.create_reader_for(0xB0B).unwrap();
    let pcm = sound_bank::decoder::decode_reader(reader).unwrap();
    assert_eq!(pcm.frames(), 9600);
    assert_eq!(pcm.channels, 2);
}

#[test]
fn corrupt_toc_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("SoundBank.hsb");

    let wav = fixtures::wav_bytes(48_000, 1, 480);
    write_bank(
        &path,
        &[BankFileSpec {
            handle: 1,
            bytes: &wav,
            duration: 0.01,
            sample_rate: 48_000,
            channels: 1,
        }],
    )
    .unwrap();

    // Flip a byte in the TOC region at the end of the file.
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    assert!(SoundBank::open(&path).is_err());
}

#[test]
fn truncated_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("SoundBank.hsb");
    std::fs::write(&path, BANK_MAGIC.to_le_bytes()).unwrap();
    assert!(SoundBank::open(&path).is_err());
}

#[test]
fn streaming_delivers_the_whole_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("SoundBank.hsb");

    let frames = 48_000usize; // one second
    let wav = fixtures::wav_bytes(48_000, 1, frames);
    write_bank(
        &path,
        &[BankFileSpec {
            handle: 7,
            bytes: &wav,
            duration: 1.0,
            sample_rate: 48_000,
            channels: 1,
        }],
    )
    .unwrap();

    let bank = SoundBank::open(&path).unwrap();
    let reader = bank.create_reader_for(7).unwrap();
    let (mut pump, mut tap) = open_stream(reader, 4096, false).unwrap();

    assert_eq!(tap.channels(), 1);
    assert_eq!(tap.sample_rate(), 48_000);

    let mut received = 0usize;
    let mut chunk = vec![0.0f32; 1024];
    while !tap.is_finished() {
        pump.pump();
        let n = tap.pop(&mut chunk);
        received += n;
        if n == 0 && tap.available() == 0 && received >= frames {
            break;
        }
    }
    assert_eq!(received, frames);
}
