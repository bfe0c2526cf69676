//! Streamed playback of long files: a decode pump running on the audio
//! (control) thread feeds a lock-free SPSC ring the realtime side drains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{SeekMode, SeekTo};
use symphonia::core::units::Time;
use tracing::warn;

use crate::decoder::{open_session, DecodeSession};
use crate::reader::StreamReader;
use crate::BankError;

/// Create a streaming pair for one encoded source. `capacity_frames` sizes
/// the ring in frames of the file's native channel count.
pub fn open_stream(
    reader: Box<dyn StreamReader>,
    capacity_frames: usize,
    looping: bool,
) -> Result<(StreamPump, StreamTap), BankError> {
    let session = open_session(reader)?;
    let channels = session.channels;
    let sample_rate = session.sample_rate;
    let total_frames = session.total_frames;

    let ring = HeapRb::<f32>::new(capacity_frames.max(1024) * channels as usize);
    let (producer, consumer) = ring.split();
    let finished = Arc::new(AtomicBool::new(false));

    let pump = StreamPump {
        session,
        producer,
        stage: Vec::new(),
        stage_pos: 0,
        sample_buf: None,
        looping,
        end_of_stream: false,
        finished: finished.clone(),
    };
    let tap = StreamTap {
        consumer,
        channels,
        sample_rate,
        total_frames,
        finished,
    };
    Ok((pump, tap))
}

/// Control-thread half: decodes ahead of the realtime reader.
pub struct StreamPump {
    session: DecodeSession,
    producer: HeapProd<f32>,
    stage: Vec<f32>,
    stage_pos: usize,
    sample_buf: Option<SampleBuffer<f32>>,
    looping: bool,
    end_of_stream: bool,
    finished: Arc<AtomicBool>,
}

impl StreamPump {
    /// Top up the ring. Call once per update tick.
    pub fn pump(&mut self) {
        loop {
            // Flush staged samples first.
            if self.stage_pos < self.stage.len() {
                let pushed = self.producer.push_slice(&self.stage[self.stage_pos..]);
                self.stage_pos += pushed;
                if self.stage_pos < self.stage.len() {
                    return; // ring is full
                }
            }

            if self.end_of_stream {
                // Everything decoded has been handed over.
                self.finished.store(true, Ordering::Release);
                return;
            }

            if self.producer.vacant_len() == 0 {
                return;
            }

            self.decode_next();
        }
    }

    fn decode_next(&mut self) {
        self.stage.clear();
        self.stage_pos = 0;

        loop {
            let packet = match self.session.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    if self.looping && self.rewind() {
                        continue;
                    }
                    self.end_of_stream = true;
                    return;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.end_of_stream = true;
                    return;
                }
                Err(e) => {
                    warn!(target: "audio::stream", "packet error, ending stream: {e}");
                    self.end_of_stream = true;
                    return;
                }
            };
            if packet.track_id() != self.session.track_id {
                continue;
            }

            match self.session.decoder.decode(&packet) {
                Ok(decoded) => {
                    let buf = self.sample_buf.get_or_insert_with(|| {
                        SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec())
                    });
                    buf.copy_interleaved_ref(decoded);
                    self.stage.extend_from_slice(buf.samples());
                    return;
                }
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => {
                    warn!(target: "audio::stream", "decode error, ending stream: {e}");
                    self.end_of_stream = true;
                    return;
                }
            }
        }
    }

    fn rewind(&mut self) -> bool {
        let seek = self.session.format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time: Time::default(),
                track_id: Some(self.session.track_id),
            },
        );
        match seek {
            Ok(_) => {
                self.session.decoder.reset();
                true
            }
            Err(e) => {
                warn!(target: "audio::stream", "loop rewind failed: {e}");
                false
            }
        }
    }
}

/// Realtime half: pops decoded samples without blocking.
pub struct StreamTap {
    consumer: HeapCons<f32>,
    channels: u16,
    sample_rate: u32,
    total_frames: Option<u64>,
    finished: Arc<AtomicBool>,
}

impl StreamTap {
    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    /// Samples currently buffered.
    pub fn available(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// True when the pump has delivered the last sample of the stream.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire) && self.consumer.is_empty()
    }

    pub fn pop(&mut self, dst: &mut [f32]) -> usize {
        self.consumer.pop_slice(dst)
    }
}
