//! A voice: one playing instance bound to a pool slot, its sound config
//! and its render chain. The play-state machine runs on the audio thread;
//! the actual audio moves through the mixer.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error};

use crate::config::SoundConfig;
use crate::events::EventId;
use crate::mixer::{MixerCommand, MixerCtl, VoiceParams, VoiceRt};
use crate::{SourceId, STOPPING_FADE_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    #[default]
    Stopped,
    Starting,
    Playing,
    Pausing,
    Paused,
    Stopping,
    FadingIn,
    FadingOut,
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayState::Stopped => "Stopped",
            PlayState::Starting => "Starting",
            PlayState::Playing => "Playing",
            PlayState::Pausing => "Pausing",
            PlayState::Paused => "Paused",
            PlayState::Stopping => "Stopping",
            PlayState::FadingIn => "FadingIn",
            PlayState::FadingOut => "FadingOut",
        };
        f.write_str(name)
    }
}

/// One slot of the voice pool.
pub struct Voice {
    source_id: SourceId,
    pub object_id: u64,
    pub event_id: EventId,
    pub config: Option<Arc<SoundConfig>>,

    state: PlayState,
    finished: bool,
    ready: bool,
    looping: bool,
    priority: u8,

    /// Fader level to restore when resuming from a pause.
    stored_fader_value: f32,
    /// Remaining stop/pause fade, seconds. The state machine tracks this
    /// itself instead of polling the render side.
    stop_fade_time: f32,
    fade_start_value: f32,

    device_rate: u32,
    rt: Option<Arc<VoiceRt>>,
}

impl Voice {
    pub fn new(source_id: SourceId) -> Self {
        Self {
            source_id,
            object_id: 0,
            event_id: EventId::INVALID,
            config: None,
            state: PlayState::Stopped,
            finished: false,
            ready: false,
            looping: false,
            priority: 64,
            stored_fader_value: 1.0,
            stop_fade_time: 0.0,
            fade_start_value: 1.0,
            device_rate: 48_000,
            rt: None,
        }
    }

    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    pub fn play_state(&self) -> PlayState {
        self.state
    }

    pub fn is_ready_to_play(&self) -> bool {
        self.ready
    }

    pub fn is_playing(&self) -> bool {
        self.state != PlayState::Stopped && self.state != PlayState::Paused
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_stopping(&self) -> bool {
        self.state == PlayState::Stopping
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn rt(&self) -> Option<&Arc<VoiceRt>> {
        self.rt.as_ref()
    }

    /// Bind a freshly initialized render chain to this slot.
    pub fn attach(
        &mut self,
        object_id: u64,
        event_id: EventId,
        config: Arc<SoundConfig>,
        rt: Arc<VoiceRt>,
        device_rate: u32,
    ) {
        self.object_id = object_id;
        self.event_id = event_id;
        self.looping = config.looping;
        self.priority = config.priority;
        self.config = Some(config);
        self.rt = Some(rt);
        self.device_rate = device_rate;
        self.state = PlayState::Stopped;
        self.finished = false;
        self.ready = true;
        self.stored_fader_value = 1.0;
        self.stop_fade_time = 0.0;
        self.fade_start_value = 1.0;
    }

    /// Unbind after release; the slot returns to the pool.
    pub fn reset(&mut self) {
        self.object_id = 0;
        self.event_id = EventId::INVALID;
        self.config = None;
        self.rt = None;
        self.state = PlayState::Stopped;
        self.finished = false;
        self.ready = false;
        self.looping = false;
    }

    fn fade_frames(&self, milliseconds: u32) -> u64 {
        (milliseconds as u64 * self.device_rate as u64) / 1000
    }

    /// Begin the short stop/pause fade and start the countdown.
    fn stop_fade(&mut self, ctl: &mut MixerCtl, milliseconds: u32) {
        // Slight overhang so the render-side ramp always completes first.
        self.stop_fade_time = milliseconds as f32 * 1.1 / 1000.0;
        self.fade_start_value = self.current_fade_volume();
        ctl.post(MixerCommand::Fade {
            slot: self.source_id,
            from: None,
            target: 0.0,
            frames: self.fade_frames(milliseconds),
        });
    }

    /// Hard-stop without fade. `reset_position` false keeps the read
    /// cursor for un-pausing.
    pub fn stop_now(&mut self, ctl: &mut MixerCtl, reset_position: bool) {
        ctl.post(MixerCommand::StopNow {
            slot: self.source_id,
            reset: reset_position,
        });
        if reset_position {
            self.finished = true;
            self.state = PlayState::Stopped;
        }
    }

    pub fn play(&mut self, ctl: &mut MixerCtl) -> bool {
        if !self.ready {
            return false;
        }

        match self.state {
            PlayState::Stopped => {
                self.finished = false;
                ctl.post(MixerCommand::Start {
                    slot: self.source_id,
                });
                self.state = PlayState::Starting;
            }
            PlayState::Starting => {
                error!(target: "audio::voice", slot = self.source_id, "play on a starting voice");
                return false;
            }
            PlayState::Playing => {
                // Restart from the top; hard-stop first to avoid a click.
                self.stop_now(ctl, true);
                self.finished = false;
                ctl.post(MixerCommand::Start {
                    slot: self.source_id,
                });
                self.state = PlayState::Starting;
            }
            PlayState::Pausing => {
                self.stop_now(ctl, false);
                ctl.post(MixerCommand::Start {
                    slot: self.source_id,
                });
                self.state = PlayState::Starting;
            }
            PlayState::Paused => {
                // Short fade-in back to the stored level.
                ctl.post(MixerCommand::Fade {
                    slot: self.source_id,
                    from: Some(0.0),
                    target: self.stored_fader_value,
                    frames: self.fade_frames(STOPPING_FADE_MS / 2),
                });
                ctl.post(MixerCommand::Start {
                    slot: self.source_id,
                });
                self.finished = false;
                self.state = PlayState::Starting;
            }
            PlayState::Stopping => {
                self.stop_now(ctl, true);
                self.finished = false;
                ctl.post(MixerCommand::Start {
                    slot: self.source_id,
                });
                self.state = PlayState::Starting;
            }
            PlayState::FadingOut | PlayState::FadingIn => {}
        }

        debug!(target: "audio::voice", slot = self.source_id, state = %self.state, "play");
        true
    }

    pub fn stop(&mut self, ctl: &mut MixerCtl) -> bool {
        let mut result = true;
        match self.state {
            PlayState::Stopped => {
                self.finished = true;
                result = false;
            }
            PlayState::Starting => {
                self.stop_now(ctl, true);
                self.state = PlayState::Stopping;
            }
            PlayState::Playing => {
                self.stop_fade(ctl, STOPPING_FADE_MS);
                self.state = PlayState::Stopping;
            }
            PlayState::Pausing | PlayState::Paused => {
                self.stop_now(ctl, true);
                self.state = PlayState::Stopping;
            }
            PlayState::Stopping => {
                self.stop_now(ctl, true);
            }
            PlayState::FadingOut | PlayState::FadingIn => {}
        }
        debug!(target: "audio::voice", slot = self.source_id, state = %self.state, "stop");
        result
    }

    pub fn pause(&mut self, ctl: &mut MixerCtl) -> bool {
        match self.state {
            PlayState::Playing => {
                self.stored_fader_value = self.current_fade_volume();
                self.stop_fade(ctl, STOPPING_FADE_MS);
                self.state = PlayState::Pausing;
            }
            PlayState::FadingOut | PlayState::FadingIn => {}
            _ => {
                // Not audible right now; park it as paused immediately.
                self.stop_now(ctl, false);
                self.state = PlayState::Paused;
            }
        }
        debug!(target: "audio::voice", slot = self.source_id, state = %self.state, "pause");
        true
    }

    /// Per-tick state maintenance: observe the render side and complete
    /// pending fades.
    pub fn update(&mut self, dt: f32, ctl: &mut MixerCtl) {
        self.stop_fade_time = (self.stop_fade_time - dt).max(0.0);

        let rt_playing = self.rt.as_ref().is_some_and(|rt| rt.is_playing());

        let rt_at_end = self.rt.as_ref().is_some_and(|rt| rt.is_at_end());

        match self.state {
            PlayState::Starting => {
                if rt_playing {
                    self.state = PlayState::Playing;
                } else if rt_at_end {
                    // The data ran out before the start was ever observed
                    // (very short sounds).
                    self.state = PlayState::Stopped;
                    self.finished = true;
                }
            }
            PlayState::Playing => {
                if !rt_playing {
                    // Ran out of data.
                    self.state = PlayState::Stopped;
                    self.finished = true;
                }
            }
            PlayState::Pausing => {
                if self.stop_fade_time <= 0.0 {
                    self.stop_now(ctl, false);
                    self.state = PlayState::Paused;
                }
            }
            PlayState::Stopping => {
                if self.stop_fade_time <= 0.0 {
                    self.stop_now(ctl, true);
                    self.state = PlayState::Stopped;
                }
            }
            _ => {}
        }
    }

    /// Current level of the stop/pause fade, tracked analytically on the
    /// audio thread.
    pub fn current_fade_volume(&self) -> f32 {
        match self.state {
            PlayState::Pausing | PlayState::Stopping => {
                let total = STOPPING_FADE_MS as f32 * 1.1 / 1000.0;
                if total <= 0.0 {
                    return 0.0;
                }
                let progress = 1.0 - (self.stop_fade_time / total).clamp(0.0, 1.0);
                self.fade_start_value * (1.0 - progress)
            }
            PlayState::Paused => 0.0,
            _ => self.stored_fader_value,
        }
    }

    /// Volume-weighted eviction priority.
    pub fn priority(&self) -> f32 {
        self.current_fade_volume() * (self.priority as f32 / 255.0)
    }

    /// Read position as a fraction of the data length.
    pub fn playback_fraction(&self) -> f32 {
        self.rt.as_ref().map_or(0.0, |rt| rt.playback_fraction())
    }

    /// Dynamic volume multiplier from the game thread.
    pub fn set_volume(&self, volume: f32) {
        if let Some(rt) = &self.rt {
            let pitch = rt.params.read().pitch;
            rt.params.publish(VoiceParams { volume, pitch });
        }
    }

    /// Dynamic pitch multiplier from the game thread.
    pub fn set_pitch(&self, pitch: f32) {
        if let Some(rt) = &self.rt {
            let volume = rt.params.read().volume;
            rt.params.publish(VoiceParams { volume, pitch });
        }
    }

    pub fn set_low_pass(&self, value: f32) {
        if let Some(rt) = &self.rt {
            rt.lp_cutoff.publish(value.clamp(0.0, 1.0));
        }
    }

    pub fn set_high_pass(&self, value: f32) {
        if let Some(rt) = &self.rt {
            rt.hp_cutoff.publish(value.clamp(0.0, 1.0));
        }
    }

    pub fn set_reverb_send(&self, level: f32) {
        if let Some(rt) = &self.rt {
            rt.send_level.publish(level.clamp(0.0, 1.0));
        }
    }

    /// Authored parameter values; recorded per voice, no runtime routing
    /// yet.
    pub fn set_parameter(&self, parameter: crate::CommandId, value: f32) {
        debug!(
            target: "audio::voice",
            slot = self.source_id,
            parameter = %parameter,
            value,
            "parameter set (no runtime binding)"
        );
    }
}
