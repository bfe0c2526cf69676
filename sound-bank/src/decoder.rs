//! Decoding encoded audio blobs into interleaved f32 PCM, and probing
//! their metadata for TOC construction and streaming decisions.

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::reader::{MediaSourceAdapter, MemoryStreamReader, StreamReader};
use crate::BankError;

/// Fully decoded audio: interleaved f32 samples at the file's native rate.
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl PcmBuffer {
    pub fn frames(&self) -> u64 {
        if self.channels == 0 {
            0
        } else {
            (self.samples.len() / self.channels as usize) as u64
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }
}

/// Metadata extracted from an encoded file without keeping the audio.
#[derive(Debug, Clone, Copy)]
pub struct AudioFileInfo {
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

pub(crate) struct DecodeSession {
    pub format: Box<dyn FormatReader>,
    pub decoder: Box<dyn Decoder>,
    pub track_id: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub total_frames: Option<u64>,
}

pub(crate) fn open_session(reader: Box<dyn StreamReader>) -> Result<DecodeSession, BankError> {
    let source = MediaSourceAdapter::new(reader);
    let stream = MediaSourceStream::new(Box::new(source), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| BankError::Decode(format!("probe: {e}")))?;

    let format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| BankError::Unsupported("no decodable track".into()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| BankError::Unsupported("unknown sample rate".into()))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .ok_or_else(|| BankError::Unsupported("unknown channel layout".into()))?;
    let total_frames = track.codec_params.n_frames;

    let decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| BankError::Decode(format!("codec: {e}")))?;

    Ok(DecodeSession {
        format,
        decoder,
        track_id,
        sample_rate,
        channels,
        total_frames,
    })
}

/// Decode an entire reader into a [`PcmBuffer`].
pub fn decode_reader(reader: Box<dyn StreamReader>) -> Result<PcmBuffer, BankError> {
    let mut session = open_session(reader)?;
    let mut samples = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match session.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(BankError::Decode(format!("packet: {e}"))),
        };
        if packet.track_id() != session.track_id {
            continue;
        }

        match session.decoder.decode(&packet) {
            Ok(decoded) => {
                let buf = sample_buf.get_or_insert_with(|| {
                    SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec())
                });
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            // A corrupt packet is recoverable; skip it.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(BankError::Decode(format!("decode: {e}"))),
        }
    }

    Ok(PcmBuffer {
        samples,
        channels: session.channels,
        sample_rate: session.sample_rate,
    })
}

/// Decode an in-memory encoded blob into a [`PcmBuffer`].
pub fn decode_all(bytes: &[u8]) -> Result<PcmBuffer, BankError> {
    decode_reader(Box::new(MemoryStreamReader::new(bytes.to_vec())))
}

/// Probe an encoded blob for duration, rate and channel count.
pub fn probe_info(bytes: &[u8]) -> Result<AudioFileInfo, BankError> {
    let session = open_session(Box::new(MemoryStreamReader::new(bytes.to_vec())))?;

    if let Some(frames) = session.total_frames {
        return Ok(AudioFileInfo {
            duration: frames as f64 / session.sample_rate as f64,
            sample_rate: session.sample_rate,
            channels: session.channels,
        });
    }

    // Containers without a frame count need a full decode to measure.
    let pcm = decode_all(bytes)?;
    Ok(AudioFileInfo {
        duration: pcm.duration_seconds(),
        sample_rate: pcm.sample_rate,
        channels: pcm.channels,
    })
}
