//! Master reverb bus: a Schroeder/Freeverb model (8 parallel combs and
//! 4 series all-passes per channel) behind a configurable pre-delay line.
//!
//! The comb/all-pass tunings are the reference 44.1 kHz values and are
//! rescaled for the actual stream rate.

use crate::delay_line::DelayLine;

const NUM_COMBS: usize = 8;
const NUM_ALLPASSES: usize = 4;

const MUTED: f32 = 0.0;
const FIXED_GAIN: f32 = 0.015;
const SCALE_WET: f32 = 3.0;
const SCALE_DRY: f32 = 2.0;
const SCALE_DAMP: f32 = 0.4;
const SCALE_ROOM: f32 = 0.28;
const OFFSET_ROOM: f32 = 0.7;
const INITIAL_ROOM: f32 = 0.5;
const INITIAL_DAMP: f32 = 0.5;
const INITIAL_WET: f32 = 1.0 / SCALE_WET;
const INITIAL_DRY: f32 = 0.0;
const INITIAL_WIDTH: f32 = 1.0;
const INITIAL_MODE: f32 = 0.0;
const FREEZE_MODE: f32 = 0.5;
const STEREO_SPREAD: usize = 23;

const COMB_TUNING_L: [usize; NUM_COMBS] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING_L: [usize; NUM_ALLPASSES] = [556, 441, 341, 225];

struct Comb {
    buffer: Vec<f32>,
    index: usize,
    feedback: f32,
    filter_store: f32,
    damp1: f32,
    damp2: f32,
}

impl Comb {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            feedback: 0.0,
            filter_store: 0.0,
            damp1: 0.0,
            damp2: 0.0,
        }
    }

    fn set_damp(&mut self, damp: f32) {
        self.damp1 = damp;
        self.damp2 = 1.0 - damp;
    }

    fn mute(&mut self) {
        self.buffer.fill(0.0);
        self.filter_store = 0.0;
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.index];
        self.filter_store = output * self.damp2 + self.filter_store * self.damp1;
        self.buffer[self.index] = input + self.filter_store * self.feedback;
        self.index += 1;
        if self.index >= self.buffer.len() {
            self.index = 0;
        }
        output
    }
}

struct Allpass {
    buffer: Vec<f32>,
    index: usize,
    feedback: f32,
}

impl Allpass {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            feedback: 0.5,
        }
    }

    fn mute(&mut self) {
        self.buffer.fill(0.0);
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let bufout = self.buffer[self.index];
        let output = -input + bufout;
        self.buffer[self.index] = input + bufout * self.feedback;
        self.index += 1;
        if self.index >= self.buffer.len() {
            self.index = 0;
        }
        output
    }
}

/// The Freeverb core. Stereo in, stereo out, interleaved buffers.
pub struct RevModel {
    gain: f32,
    room_size: f32,
    room_size_active: f32,
    damp: f32,
    damp_active: f32,
    wet: f32,
    wet1: f32,
    wet2: f32,
    dry: f32,
    width: f32,
    mode: f32,
    combs_l: Vec<Comb>,
    combs_r: Vec<Comb>,
    allpasses_l: Vec<Allpass>,
    allpasses_r: Vec<Allpass>,
}

impl RevModel {
    pub fn new(sample_rate: f64) -> Self {
        // Tunings are given for 44.1 kHz; rescale for the stream rate.
        let sr_coef = 44_100.0 / sample_rate;
        let scaled = |len: usize| ((len as f64 / sr_coef) as usize).max(1);

        let mut model = Self {
            gain: FIXED_GAIN,
            room_size: 0.0,
            room_size_active: 0.0,
            damp: 0.0,
            damp_active: 0.0,
            wet: 0.0,
            wet1: 0.0,
            wet2: 0.0,
            dry: 0.0,
            width: 0.0,
            mode: 0.0,
            combs_l: COMB_TUNING_L.iter().map(|&n| Comb::new(scaled(n))).collect(),
            combs_r: COMB_TUNING_L
                .iter()
                .map(|&n| Comb::new(scaled(n + STEREO_SPREAD)))
                .collect(),
            allpasses_l: ALLPASS_TUNING_L
                .iter()
                .map(|&n| Allpass::new(scaled(n)))
                .collect(),
            allpasses_r: ALLPASS_TUNING_L
                .iter()
                .map(|&n| Allpass::new(scaled(n + STEREO_SPREAD)))
                .collect(),
        };

        model.set_wet(INITIAL_WET);
        model.set_room_size(INITIAL_ROOM);
        model.set_dry(INITIAL_DRY);
        model.set_damp(INITIAL_DAMP);
        model.set_width(INITIAL_WIDTH);
        model.set_mode(INITIAL_MODE);

        // The delay buffers start full of garbage in the reference model;
        // they must be muted before the first block.
        model.mute();
        model
    }

    pub fn mute(&mut self) {
        if self.mode() >= FREEZE_MODE {
            return;
        }
        for comb in self.combs_l.iter_mut().chain(self.combs_r.iter_mut()) {
            comb.mute();
        }
        for ap in self.allpasses_l.iter_mut().chain(self.allpasses_r.iter_mut()) {
            ap.mute();
        }
    }

    #[inline]
    fn process_frame(&mut self, in_l: f32, in_r: f32) -> (f32, f32) {
        let input = (in_l + in_r) * self.gain;

        let mut out_l = 0.0;
        let mut out_r = 0.0;

        // Combs in parallel, all-passes in series.
        for comb in &mut self.combs_l {
            out_l += comb.process(input);
        }
        for comb in &mut self.combs_r {
            out_r += comb.process(input);
        }
        for ap in &mut self.allpasses_l {
            out_l = ap.process(out_l);
        }
        for ap in &mut self.allpasses_r {
            out_r = ap.process(out_r);
        }

        (
            out_l * self.wet1 + out_r * self.wet2 + in_l * self.dry,
            out_r * self.wet1 + out_l * self.wet2 + in_r * self.dry,
        )
    }

    /// Process an interleaved stereo block, replacing the output contents.
    pub fn process_replace(&mut self, input: &[f32], output: &mut [f32]) {
        let frames = (input.len() / 2).min(output.len() / 2);
        for i in 0..frames {
            let (l, r) = self.process_frame(input[2 * i], input[2 * i + 1]);
            output[2 * i] = l;
            output[2 * i + 1] = r;
        }
    }

    /// Process an interleaved stereo block, accumulating into the output.
    pub fn process_mix(&mut self, input: &[f32], output: &mut [f32]) {
        let frames = (input.len() / 2).min(output.len() / 2);
        for i in 0..frames {
            let (l, r) = self.process_frame(input[2 * i], input[2 * i + 1]);
            output[2 * i] += l;
            output[2 * i + 1] += r;
        }
    }

    fn update(&mut self) {
        self.wet1 = self.wet * (self.width / 2.0 + 0.5);
        self.wet2 = self.wet * ((1.0 - self.width) / 2.0);

        if self.mode >= FREEZE_MODE {
            self.room_size_active = 1.0;
            self.damp_active = 0.0;
            self.gain = MUTED;
        } else {
            self.room_size_active = self.room_size;
            self.damp_active = self.damp;
            self.gain = FIXED_GAIN;
        }

        for comb in self.combs_l.iter_mut().chain(self.combs_r.iter_mut()) {
            comb.feedback = self.room_size_active;
            comb.set_damp(self.damp_active);
        }
    }

    pub fn set_room_size(&mut self, value: f32) {
        self.room_size = value * SCALE_ROOM + OFFSET_ROOM;
        self.update();
    }

    pub fn room_size(&self) -> f32 {
        (self.room_size - OFFSET_ROOM) / SCALE_ROOM
    }

    pub fn set_damp(&mut self, value: f32) {
        self.damp = value * SCALE_DAMP;
        self.update();
    }

    pub fn damp(&self) -> f32 {
        self.damp / SCALE_DAMP
    }

    pub fn set_wet(&mut self, value: f32) {
        self.wet = value * SCALE_WET;
        self.update();
    }

    pub fn wet(&self) -> f32 {
        self.wet / SCALE_WET
    }

    pub fn set_dry(&mut self, value: f32) {
        self.dry = value * SCALE_DRY;
    }

    pub fn dry(&self) -> f32 {
        self.dry / SCALE_DRY
    }

    pub fn set_width(&mut self, value: f32) {
        self.width = value;
        self.update();
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn set_mode(&mut self, value: f32) {
        self.mode = value;
        self.update();
    }

    pub fn mode(&self) -> f32 {
        if self.mode >= FREEZE_MODE {
            1.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReverbParameter {
    PreDelay,
    Mode,
    RoomSize,
    Damp,
    Width,
    Wet,
    Dry,
}

impl ReverbParameter {
    pub fn name(&self) -> &'static str {
        match self {
            ReverbParameter::PreDelay => "PreDelay",
            ReverbParameter::Mode => "Mode",
            ReverbParameter::RoomSize => "RoomSize",
            ReverbParameter::Damp => "Damp",
            ReverbParameter::Width => "Width",
            ReverbParameter::Wet => "Wet",
            ReverbParameter::Dry => "Dry",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReverbParameter::PreDelay => "ms",
            _ => "",
        }
    }
}

pub const MAX_PRE_DELAY_MS: u32 = 1000;

/// The master reverb bus fed by the per-voice splitter sends: pre-delay
/// line in front of the Freeverb model, stereo only.
pub struct ReverbBus {
    model: RevModel,
    pre_delay: DelayLine,
    pre_delay_ms: f32,
    scratch: Vec<f32>,
}

impl ReverbBus {
    pub fn new(sample_rate: u32, max_block_frames: usize) -> Self {
        let max_delay = (sample_rate as usize * MAX_PRE_DELAY_MS as usize) / 1000;
        let mut pre_delay = DelayLine::new(max_delay);
        pre_delay.configure(2, sample_rate as f64);
        Self {
            model: RevModel::new(sample_rate as f64),
            pre_delay,
            pre_delay_ms: 0.0,
            scratch: vec![0.0; max_block_frames * 2],
        }
    }

    pub fn set_parameter(&mut self, parameter: ReverbParameter, value: f32) {
        match parameter {
            ReverbParameter::PreDelay => {
                self.pre_delay_ms = value.clamp(0.0, MAX_PRE_DELAY_MS as f32);
                self.pre_delay.set_delay_ms(self.pre_delay_ms as u32);
            }
            ReverbParameter::Mode => self.model.set_mode(value),
            ReverbParameter::RoomSize => self.model.set_room_size(value),
            ReverbParameter::Damp => self.model.set_damp(value),
            ReverbParameter::Width => self.model.set_width(value),
            ReverbParameter::Wet => self.model.set_wet(value),
            ReverbParameter::Dry => self.model.set_dry(value),
        }
    }

    pub fn parameter(&self, parameter: ReverbParameter) -> f32 {
        match parameter {
            ReverbParameter::PreDelay => self.pre_delay_ms,
            ReverbParameter::Mode => self.model.mode(),
            ReverbParameter::RoomSize => self.model.room_size(),
            ReverbParameter::Damp => self.model.damp(),
            ReverbParameter::Width => self.model.width(),
            ReverbParameter::Wet => self.model.wet(),
            ReverbParameter::Dry => self.model.dry(),
        }
    }

    /// Run the send bus through pre-delay and reverb, accumulating the
    /// result into `output`. Both buffers are interleaved stereo.
    pub fn process_mix(&mut self, send: &[f32], output: &mut [f32]) {
        let frames = (send.len() / 2).min(output.len() / 2);
        debug_assert!(frames * 2 <= self.scratch.len());

        for i in 0..frames {
            let delayed_l = self.pre_delay.pop_sample(0);
            let delayed_r = self.pre_delay.pop_sample(1);
            self.pre_delay.push_sample(0, send[2 * i]);
            self.pre_delay.push_sample(1, send[2 * i + 1]);
            self.scratch[2 * i] = delayed_l;
            self.scratch[2 * i + 1] = delayed_r;
        }

        let frames2 = frames * 2;
        self.model
            .process_mix(&self.scratch[..frames2], &mut output[..frames2]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_block_is_silent_after_construction() {
        let mut model = RevModel::new(48_000.0);
        let input = vec![0.0f32; 256];
        let mut output = vec![1.0f32; 256];
        model.process_replace(&input, &mut output);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn impulse_produces_a_tail() {
        let mut model = RevModel::new(44_100.0);
        let mut input = vec![0.0f32; 2 * 4096];
        input[0] = 1.0;
        input[1] = 1.0;
        let mut output = vec![0.0f32; 2 * 4096];
        model.process_replace(&input, &mut output);

        let energy: f32 = output.iter().map(|s| s * s).sum();
        assert!(energy > 0.0, "reverb tail expected after an impulse");
    }

    #[test]
    fn freeze_mode_gates_at_half() {
        let mut model = RevModel::new(48_000.0);
        model.set_mode(0.49);
        assert_eq!(model.mode(), 0.0);
        model.set_mode(0.5);
        assert_eq!(model.mode(), 1.0);
    }

    #[test]
    fn parameter_roundtrip_through_bus() {
        let mut bus = ReverbBus::new(48_000, 512);
        bus.set_parameter(ReverbParameter::RoomSize, 0.8);
        assert!((bus.parameter(ReverbParameter::RoomSize) - 0.8).abs() < 1e-5);
        bus.set_parameter(ReverbParameter::PreDelay, 250.0);
        assert!((bus.parameter(ReverbParameter::PreDelay) - 250.0).abs() < 1e-5);
        bus.set_parameter(ReverbParameter::PreDelay, 5000.0);
        assert!(bus.parameter(ReverbParameter::PreDelay) <= MAX_PRE_DELAY_MS as f32);
    }

    #[test]
    fn mix_accumulates_into_existing_content() {
        let mut bus = ReverbBus::new(48_000, 256);
        bus.set_parameter(ReverbParameter::Wet, 1.0);
        let send = vec![0.0f32; 512];
        let mut output = vec![0.25f32; 512];
        bus.process_mix(&send, &mut output);
        // Silent send through a muted model leaves the dry content alone.
        assert!(output.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }
}
