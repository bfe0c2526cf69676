//! The realtime render graph run by the device callback.
//!
//! The audio thread owns graph topology and sends it over a lock-free SPSC
//! command queue; the mixer owns every voice chain exclusively and renders
//! block by block: read, filter, fade, spatialize, accumulate into the dry
//! and reverb-send buses, reverb mix, write the device buffer. Removed
//! chains travel back over a second queue so nothing is freed on the
//! realtime path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use audio_dsp::reverb::ReverbParameter;
use audio_dsp::{Biquad, Fader, PannerNode, RealtimeCell, ReverbBus};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use sound_bank::{PcmBuffer, StreamTap};
use tracing::warn;

/// Frames of decoded audio staged ahead of a streaming voice.
const STREAM_STAGE_FRAMES: usize = 8192;

/// Upper bound on frames processed per render slice.
pub const MAX_BLOCK_FRAMES: usize = 4096;

/// Dynamic per-voice parameters published from the audio thread.
#[derive(Debug, Clone, Copy)]
pub struct VoiceParams {
    pub volume: f32,
    pub pitch: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pitch: 1.0,
        }
    }
}

/// Shared state between one voice slot's control side and its chain.
pub struct VoiceRt {
    playing: AtomicBool,
    at_end: AtomicBool,
    cursor: AtomicU64,
    total_frames: AtomicU64,
    pub params: RealtimeCell<VoiceParams>,
    pub lp_cutoff: RealtimeCell<f32>,
    pub hp_cutoff: RealtimeCell<f32>,
    pub send_level: RealtimeCell<f32>,
}

impl VoiceRt {
    pub fn new(total_frames: u64, lp: f32, hp: f32, send: f32) -> Self {
        Self {
            playing: AtomicBool::new(false),
            at_end: AtomicBool::new(false),
            cursor: AtomicU64::new(0),
            total_frames: AtomicU64::new(total_frames),
            params: RealtimeCell::new(VoiceParams::default()),
            lp_cutoff: RealtimeCell::new(lp),
            hp_cutoff: RealtimeCell::new(hp),
            send_level: RealtimeCell::new(send),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn is_at_end(&self) -> bool {
        self.at_end.load(Ordering::Acquire)
    }

    pub fn cursor_frames(&self) -> u64 {
        self.cursor.load(Ordering::Relaxed)
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::Relaxed)
    }

    /// Read position as a fraction of the data length.
    pub fn playback_fraction(&self) -> f32 {
        let total = self.total_frames();
        if total == 0 {
            0.0
        } else {
            (self.cursor_frames() as f64 / total as f64) as f32
        }
    }
}

/// Staging buffer between a streaming tap and the resampling reader.
pub struct StreamStage {
    data: Vec<f32>,
    len: usize,
    pos: f64,
    channels: usize,
}

impl StreamStage {
    fn new(channels: usize) -> Self {
        Self {
            data: vec![0.0; STREAM_STAGE_FRAMES * channels],
            len: 0,
            pos: 0.0,
            channels,
        }
    }

    fn frames(&self) -> usize {
        self.len / self.channels
    }

    fn fill(&mut self, tap: &mut StreamTap) {
        if self.len < self.data.len() {
            let popped = tap.pop(&mut self.data[self.len..]);
            self.len += popped;
        }
    }

    /// Drop fully consumed frames, keeping the interpolation tail.
    fn compact(&mut self) {
        let consumed = self.pos.floor() as usize;
        if consumed == 0 {
            return;
        }
        let keep_from = consumed * self.channels;
        self.data.copy_within(keep_from..self.len, 0);
        self.len -= keep_from;
        self.pos -= consumed as f64;
    }
}

/// Frames the mixer reads from: either a fully decoded buffer or a
/// streamed tap.
pub enum VoiceSource {
    Buffer { pcm: Arc<PcmBuffer>, pos: f64 },
    Stream { tap: StreamTap, stage: StreamStage },
}

impl VoiceSource {
    pub fn buffer(pcm: Arc<PcmBuffer>) -> Self {
        VoiceSource::Buffer { pcm, pos: 0.0 }
    }

    pub fn stream(tap: StreamTap) -> Self {
        let channels = tap.channels() as usize;
        VoiceSource::Stream {
            tap,
            stage: StreamStage::new(channels),
        }
    }
}

/// One voice's render chain, owned by the mixer while installed.
pub struct VoiceChain {
    pub slot: usize,
    pub source: VoiceSource,
    pub channels: usize,
    pub source_rate: u32,
    pub looping: bool,
    pub base_volume: f32,
    pub base_pitch: f32,
    pub low_pass: Biquad,
    pub high_pass: Biquad,
    pub fader: Fader,
    pub panner: Option<PannerNode>,
    pub rt: Arc<VoiceRt>,
    running: bool,
    volume: f32,
    pitch: f32,
    send_level: f32,
    natural_pos: f64,
}

impl VoiceChain {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        slot: usize,
        source: VoiceSource,
        channels: usize,
        source_rate: u32,
        looping: bool,
        base_volume: f32,
        base_pitch: f32,
        low_pass: Biquad,
        high_pass: Biquad,
        panner: Option<PannerNode>,
        rt: Arc<VoiceRt>,
    ) -> Self {
        let send_level = *rt.send_level.read();
        Self {
            slot,
            source,
            channels,
            source_rate,
            looping,
            base_volume,
            base_pitch,
            low_pass,
            high_pass,
            fader: Fader::new(),
            panner,
            rt,
            running: false,
            volume: 1.0,
            pitch: 1.0,
            send_level,
            natural_pos: 0.0,
        }
    }
}

/// Topology and control messages from the audio thread to the mixer.
pub enum MixerCommand {
    Install(Box<VoiceChain>),
    Remove { slot: usize },
    Start { slot: usize },
    StopNow { slot: usize, reset: bool },
    Fade {
        slot: usize,
        from: Option<f32>,
        target: f32,
        frames: u64,
    },
    Seek { slot: usize, frame: u64 },
    SetReverbParam { param: ReverbParameter, value: f32 },
}

/// Retired chains returned to the audio thread for disposal.
pub enum MixerGarbage {
    Chain(Box<VoiceChain>),
}

/// Control-thread handle to the mixer.
pub struct MixerCtl {
    commands: HeapProd<MixerCommand>,
    garbage: HeapCons<MixerGarbage>,
}

impl MixerCtl {
    pub fn post(&mut self, command: MixerCommand) {
        if self.commands.try_push(command).is_err() {
            // The queue is sized for multiples of the pool; hitting this
            // means the device callback stalled.
            warn!(target: "audio::mixer", "mixer command queue full, command dropped");
        }
    }

    /// Free retired chains outside the realtime path.
    pub fn collect_garbage(&mut self) {
        while self.garbage.try_pop().is_some() {}
    }
}

/// Build a connected (control, render) pair.
pub fn create_mixer(
    slots: usize,
    sample_rate: u32,
    max_block_frames: usize,
) -> (MixerCtl, Mixer) {
    let max_block = max_block_frames.clamp(64, MAX_BLOCK_FRAMES);
    let (cmd_tx, cmd_rx) = HeapRb::<MixerCommand>::new(slots * 16 + 64).split();
    let (garbage_tx, garbage_rx) = HeapRb::<MixerGarbage>::new(slots * 2 + 8).split();

    let ctl = MixerCtl {
        commands: cmd_tx,
        garbage: garbage_rx,
    };
    let mixer = Mixer {
        slots: (0..slots).map(|_| None).collect(),
        commands: cmd_rx,
        garbage: garbage_tx,
        reverb: ReverbBus::new(sample_rate, max_block),
        sample_rate,
        max_block,
        in_buf: vec![0.0; max_block * audio_dsp::MAX_CHANNELS],
        voice_buf: vec![0.0; max_block * 2],
        dry: vec![0.0; max_block * 2],
        send: vec![0.0; max_block * 2],
    };
    (ctl, mixer)
}

/// The render side. Owned by the device callback closure.
pub struct Mixer {
    slots: Vec<Option<Box<VoiceChain>>>,
    commands: HeapCons<MixerCommand>,
    garbage: HeapProd<MixerGarbage>,
    reverb: ReverbBus,
    sample_rate: u32,
    max_block: usize,
    in_buf: Vec<f32>,
    voice_buf: Vec<f32>,
    dry: Vec<f32>,
    send: Vec<f32>,
}

impl Mixer {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Render `frames` interleaved frames into `out`. `channels` must be
    /// the stereo endpoint the engine was initialized with.
    pub fn render(&mut self, out: &mut [f32], frames: usize, channels: usize) {
        if channels != 2 {
            out.fill(0.0);
            return;
        }

        self.drain_commands();

        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(self.max_block);
            let offset = done * channels;
            self.render_block(&mut out[offset..offset + n * channels], n);
            done += n;
        }
    }

    fn drain_commands(&mut self) {
        while let Some(command) = self.commands.try_pop() {
            match command {
                MixerCommand::Install(chain) => {
                    let slot = chain.slot;
                    if let Some(old) = self.slots[slot].replace(chain) {
                        let _ = self.garbage.try_push(MixerGarbage::Chain(old));
                    }
                }
                MixerCommand::Remove { slot } => {
                    if let Some(chain) = self.slots[slot].take() {
                        if self.garbage.try_push(MixerGarbage::Chain(chain)).is_err() {
                            // Return queue full; the chain drops here. Rare
                            // enough to accept over stalling the callback.
                        }
                    }
                }
                MixerCommand::Start { slot } => {
                    if let Some(chain) = self.slots[slot].as_deref_mut() {
                        chain.running = true;
                        chain.rt.at_end.store(false, Ordering::Release);
                        chain.rt.playing.store(true, Ordering::Release);
                    }
                }
                MixerCommand::StopNow { slot, reset } => {
                    if let Some(chain) = self.slots[slot].as_deref_mut() {
                        chain.running = false;
                        chain.rt.playing.store(false, Ordering::Release);
                        if reset {
                            seek_source(&mut chain.source, 0);
                            chain.natural_pos = 0.0;
                            chain.rt.cursor.store(0, Ordering::Relaxed);
                            chain.rt.at_end.store(false, Ordering::Release);
                            chain.fader.snap_to(1.0);
                        }
                    }
                }
                MixerCommand::Fade {
                    slot,
                    from,
                    target,
                    frames,
                } => {
                    if let Some(chain) = self.slots[slot].as_deref_mut() {
                        chain.fader.set_fade(from, target, frames);
                    }
                }
                MixerCommand::Seek { slot, frame } => {
                    if let Some(chain) = self.slots[slot].as_deref_mut() {
                        seek_source(&mut chain.source, frame);
                        chain.natural_pos = frame as f64;
                        chain.rt.cursor.store(frame, Ordering::Relaxed);
                    }
                }
                MixerCommand::SetReverbParam { param, value } => {
                    self.reverb.set_parameter(param, value);
                }
            }
        }
    }

    fn render_block(&mut self, out: &mut [f32], frames: usize) {
        let stereo = frames * 2;
        self.dry[..stereo].fill(0.0);
        self.send[..stereo].fill(0.0);

        let device_rate = self.sample_rate;
        for slot in self.slots.iter_mut() {
            let Some(chain) = slot.as_deref_mut() else {
                continue;
            };
            if !chain.running {
                continue;
            }
            render_voice(
                chain,
                device_rate,
                frames,
                &mut self.in_buf,
                &mut self.voice_buf,
                &mut self.dry[..stereo],
                &mut self.send[..stereo],
            );
        }

        // Reverb bus consumes the accumulated sends and mixes on top of
        // the dry signal.
        self.reverb.process_mix(&self.send[..stereo], &mut self.dry[..stereo]);

        out.copy_from_slice(&self.dry[..stereo]);
    }
}

fn seek_source(source: &mut VoiceSource, frame: u64) {
    match source {
        VoiceSource::Buffer { pos, .. } => *pos = frame as f64,
        // Streamed data cannot be repositioned from the realtime side; the
        // pump restarts streams when their voice is reused.
        VoiceSource::Stream { stage, .. } => {
            stage.len = 0;
            stage.pos = 0.0;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn render_voice(
    chain: &mut VoiceChain,
    device_rate: u32,
    frames: usize,
    in_buf: &mut [f32],
    voice_buf: &mut [f32],
    dry: &mut [f32],
    send: &mut [f32],
) {
    // Pull the latest published control values.
    if let Some(params) = chain.rt.params.take_if_dirty() {
        chain.volume = params.volume;
        chain.pitch = params.pitch;
    }
    if let Some(lp) = chain.rt.lp_cutoff.take_if_dirty() {
        chain.low_pass.set_cutoff_value(*lp);
    }
    if let Some(hp) = chain.rt.hp_cutoff.take_if_dirty() {
        chain.high_pass.set_cutoff_value(*hp);
    }
    if let Some(level) = chain.rt.send_level.take_if_dirty() {
        chain.send_level = *level;
    }

    let mut doppler = 1.0;
    if let Some(panner) = chain.panner.as_mut() {
        panner.refresh();
        doppler = panner.doppler_pitch();
    }

    let step =
        (chain.source_rate as f64 / device_rate as f64) * (chain.base_pitch * chain.pitch * doppler) as f64;
    let step = step.max(1e-3);

    let channels = chain.channels;
    let in_len = frames * channels;
    in_buf[..in_len].fill(0.0);

    let (written, at_end) = match &mut chain.source {
        VoiceSource::Buffer { pcm, pos } => read_buffer(
            pcm,
            pos,
            &mut in_buf[..in_len],
            frames,
            channels,
            step,
            chain.looping,
        ),
        VoiceSource::Stream { tap, stage } => {
            read_stream(tap, stage, &mut in_buf[..in_len], frames, channels, step)
        }
    };

    chain.natural_pos += written as f64 * step;
    let cursor = match &chain.source {
        VoiceSource::Buffer { pos, .. } => *pos as u64,
        VoiceSource::Stream { .. } => chain.natural_pos as u64,
    };
    chain.rt.cursor.store(cursor, Ordering::Relaxed);

    if written > 0 {
        let gain = chain.base_volume * chain.volume;
        if (gain - 1.0).abs() > f32::EPSILON {
            for sample in &mut in_buf[..written * channels] {
                *sample *= gain;
            }
        }

        chain.low_pass.process_interleaved(&mut in_buf[..written * channels], channels);
        chain
            .high_pass
            .process_interleaved(&mut in_buf[..written * channels], channels);
        chain
            .fader
            .process_interleaved(&mut in_buf[..written * channels], channels);

        let stereo = written * 2;
        voice_buf[..stereo].fill(0.0);

        match chain.panner.as_mut() {
            Some(panner) => {
                panner.process(&in_buf[..written * channels], written, &mut voice_buf[..stereo]);
            }
            None => fold_to_stereo(&in_buf[..written * channels], channels, &mut voice_buf[..stereo]),
        }

        for i in 0..stereo {
            dry[i] += voice_buf[i];
            send[i] += voice_buf[i] * chain.send_level;
        }
    }

    if at_end {
        chain.running = false;
        chain.rt.at_end.store(true, Ordering::Release);
        chain.rt.playing.store(false, Ordering::Release);
    }
}

/// Direct (non-spatialized) routing into the stereo bus.
fn fold_to_stereo(input: &[f32], channels: usize, out: &mut [f32]) {
    let frames = out.len() / 2;
    match channels {
        1 => {
            for i in 0..frames {
                let s = input[i];
                out[i * 2] += s;
                out[i * 2 + 1] += s;
            }
        }
        2 => {
            out.copy_from_slice(&input[..frames * 2]);
        }
        n => {
            // Fold extra channels onto left/right alternately at -3 dB.
            let scale = std::f32::consts::FRAC_1_SQRT_2;
            for i in 0..frames {
                for ch in 0..n {
                    let s = input[i * n + ch] * scale;
                    out[i * 2 + (ch & 1)] += s;
                }
            }
        }
    }
}

/// Linear-interpolating read out of a decoded buffer.
/// Returns `(frames_written, reached_end)`.
fn read_buffer(
    pcm: &PcmBuffer,
    pos: &mut f64,
    dst: &mut [f32],
    frames: usize,
    channels: usize,
    step: f64,
    looping: bool,
) -> (usize, bool) {
    let total = pcm.frames() as f64;
    if total < 1.0 {
        return (0, true);
    }
    let src_channels = pcm.channels as usize;
    let total_usize = pcm.frames() as usize;

    let mut written = 0;
    for frame in 0..frames {
        if *pos >= total {
            if looping {
                *pos %= total;
            } else {
                return (written, true);
            }
        }
        let i0 = *pos as usize;
        let frac = (*pos - i0 as f64) as f32;
        let i1 = if i0 + 1 < total_usize {
            i0 + 1
        } else if looping {
            0
        } else {
            i0
        };

        for ch in 0..channels {
            let src_ch = ch.min(src_channels - 1);
            let s0 = pcm.samples[i0 * src_channels + src_ch];
            let s1 = pcm.samples[i1 * src_channels + src_ch];
            dst[frame * channels + ch] = s0 + (s1 - s0) * frac;
        }

        *pos += step;
        written += 1;
    }

    (written, !looping && *pos >= total)
}

/// Linear-interpolating read out of the stream stage, topping it up from
/// the tap. Underruns pad with silence without ending the voice.
fn read_stream(
    tap: &mut StreamTap,
    stage: &mut StreamStage,
    dst: &mut [f32],
    frames: usize,
    channels: usize,
    step: f64,
) -> (usize, bool) {
    stage.fill(tap);

    let mut written = 0;
    for frame in 0..frames {
        let i0 = stage.pos as usize;
        let have = stage.frames();
        if i0 >= have {
            if tap.is_finished() {
                return (written, true);
            }
            break; // underrun: deliver what we have
        }
        // The interpolation neighbor must be staged too, except at the
        // very end of a finished stream.
        if i0 + 1 >= have && !tap.is_finished() {
            break;
        }

        let frac = (stage.pos - i0 as f64) as f32;
        let i1 = (i0 + 1).min(have - 1);
        for ch in 0..channels {
            let s0 = stage.data[i0 * stage.channels + ch.min(stage.channels - 1)];
            let s1 = stage.data[i1 * stage.channels + ch.min(stage.channels - 1)];
            dst[frame * channels + ch] = s0 + (s1 - s0) * frac;
        }

        stage.pos += step;
        written += 1;
    }

    stage.compact();
    (written, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pcm(frames: usize, channels: u16) -> Arc<PcmBuffer> {
        let samples = (0..frames * channels as usize)
            .map(|i| (i / channels as usize) as f32)
            .collect();
        Arc::new(PcmBuffer {
            samples,
            channels,
            sample_rate: 48_000,
        })
    }

    #[test]
    fn buffer_read_at_unit_step_is_identity() {
        let pcm = test_pcm(16, 1);
        let mut pos = 0.0;
        let mut dst = vec![0.0f32; 8];
        let (written, end) = read_buffer(&pcm, &mut pos, &mut dst, 8, 1, 1.0, false);
        assert_eq!(written, 8);
        assert!(!end);
        assert_eq!(dst, (0..8).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn buffer_read_reports_end_without_looping() {
        let pcm = test_pcm(4, 1);
        let mut pos = 0.0;
        let mut dst = vec![0.0f32; 8];
        let (written, end) = read_buffer(&pcm, &mut pos, &mut dst, 8, 1, 1.0, false);
        assert_eq!(written, 4);
        assert!(end);
    }

    #[test]
    fn looping_buffer_wraps() {
        let pcm = test_pcm(4, 1);
        let mut pos = 0.0;
        let mut dst = vec![0.0f32; 10];
        let (written, end) = read_buffer(&pcm, &mut pos, &mut dst, 10, 1, 1.0, true);
        assert_eq!(written, 10);
        assert!(!end);
        assert_eq!(&dst[..5], &[0.0, 1.0, 2.0, 3.0, 0.0]);
    }

    #[test]
    fn half_step_doubles_duration() {
        let pcm = test_pcm(4, 1);
        let mut pos = 0.0;
        let mut dst = vec![0.0f32; 6];
        let (written, _) = read_buffer(&pcm, &mut pos, &mut dst, 6, 1, 0.5, false);
        assert_eq!(written, 6);
        assert!((dst[1] - 0.5).abs() < 1e-6, "interpolated half sample");
    }

    #[test]
    fn mixer_renders_an_installed_voice() {
        let (mut ctl, mut mixer) = create_mixer(4, 48_000, 256);
        let pcm = test_pcm(1024, 1);
        let rt = Arc::new(VoiceRt::new(1024, 1.0, 0.0, 0.0));
        let chain = VoiceChain::new(
            0,
            VoiceSource::buffer(pcm),
            1,
            48_000,
            false,
            1.0,
            1.0,
            Biquad::low_pass(48_000, 1),
            Biquad::high_pass(48_000, 1),
            None,
            rt.clone(),
        );
        ctl.post(MixerCommand::Install(Box::new(chain)));
        ctl.post(MixerCommand::Start { slot: 0 });

        let mut out = vec![0.0f32; 256 * 2];
        mixer.render(&mut out, 256, 2);
        assert!(rt.is_playing());
        assert!(out.iter().any(|&s| s != 0.0));
        assert_eq!(rt.cursor_frames(), 256);

        // Remove returns the chain through the garbage queue.
        ctl.post(MixerCommand::Remove { slot: 0 });
        mixer.render(&mut out, 64, 2);
        ctl.collect_garbage();
    }

    #[test]
    fn voice_signals_end_of_data() {
        let (mut ctl, mut mixer) = create_mixer(2, 48_000, 128);
        let pcm = test_pcm(100, 1);
        let rt = Arc::new(VoiceRt::new(100, 1.0, 0.0, 0.0));
        let chain = VoiceChain::new(
            0,
            VoiceSource::buffer(pcm),
            1,
            48_000,
            false,
            1.0,
            1.0,
            Biquad::low_pass(48_000, 1),
            Biquad::high_pass(48_000, 1),
            None,
            rt.clone(),
        );
        ctl.post(MixerCommand::Install(Box::new(chain)));
        ctl.post(MixerCommand::Start { slot: 0 });

        let mut out = vec![0.0f32; 128 * 2];
        mixer.render(&mut out, 128, 2);
        assert!(rt.is_at_end());
        assert!(!rt.is_playing());
    }
}
