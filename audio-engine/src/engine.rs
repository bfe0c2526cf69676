//! The engine hub: owns the resource, source and events managers, the
//! voice pool, the listener and the mixer control side; runs the per-tick
//! update on the audio thread and exposes the public playback API.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use audio_backend::AudioBackend;
use audio_dsp::reverb::ReverbParameter;
use audio_dsp::Transform;
use glam::Vec3;
use parking_lot::Mutex;
use sound_bank::AssetBackend;
use tracing::{error, info, warn};

use crate::audio_thread::{AudioThread, AudioThreadFence, JobPolicy, JobQueue, TickTarget};
use crate::command::{CommandId, PlayingEventAction};
use crate::config::{ObjectState, SoundConfig, SourceUpdateData, UserConfig};
use crate::events::{ActionHandler, EventId, EventInfo, EventsManager};
use crate::listener::AudioListener;
use crate::mixer::{create_mixer, MixerCommand, MixerCtl};
use crate::pool::VoicePool;
use crate::registry::CommandRegistry;
use crate::resources::ResourceManager;
use crate::sources::SourceManager;
use crate::stats::{MemoryCounters, Stats};
use crate::voice::PlayState;
use crate::{EngineError, SourceId, MAX_SOURCES};

/// Addressing mode of the parameter and filter setters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackTarget {
    Object(u64),
    Event(EventId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnginePlaybackState {
    Playing,
    Paused,
}

pub struct AudioEngineConfig {
    /// Location of the project's `SoundBank.hsb`, if any.
    pub bank_path: Option<PathBuf>,
    /// Filesystem fallback for unbanked assets (editor mode).
    pub asset_backend: Option<Box<dyn AssetBackend>>,
    pub max_sources: usize,
    pub user: UserConfig,
}

impl Default for AudioEngineConfig {
    fn default() -> Self {
        Self {
            bank_path: None,
            asset_backend: None,
            max_sources: MAX_SOURCES,
            user: UserConfig::default(),
        }
    }
}

/// Audio-thread-owned state: the voice pool, graph topology and per-object
/// bookkeeping. Everything here is mutated under the core lock, which only
/// the audio thread holds for more than a lookup.
struct EngineCore {
    pool: VoicePool,
    active: Vec<SourceId>,
    to_start: Vec<SourceId>,
    sources: SourceManager,
    resources: ResourceManager,
    ctl: MixerCtl,
    object_data: HashMap<u64, ObjectState>,
    event_handles: HashMap<u64, Vec<EventId>>,
    /// (event, source) pairs of voices evicted mid-update, reported to the
    /// events manager at the end of the tick.
    finished_pending: Vec<(EventId, SourceId)>,
    playback_state: EnginePlaybackState,
    device_rate: u32,
}

impl EngineCore {
    fn has_active_events(&self, object_id: u64) -> bool {
        let owned = self
            .active
            .iter()
            .chain(self.to_start.iter())
            .any(|&id| self.pool.voice(id).object_id == object_id);
        owned || self.event_handles.contains_key(&object_id)
    }

    /// Allocate a slot (evicting if needed) and build the voice's chain.
    fn initiate_new_voice(
        &mut self,
        object_id: u64,
        event_id: EventId,
        config: &Arc<SoundConfig>,
    ) -> Option<SourceId> {
        let slot = self.pool.allocate().or_else(|| {
            self.free_lowest_priority_source();
            self.pool.allocate()
        });
        let Some(slot) = slot else {
            // Only possible when every slot is still starting.
            error!(target: "audio::engine", "no voice slot available even after eviction");
            return None;
        };

        match self
            .sources
            .initialize_source(slot, config, &mut self.resources, &mut self.ctl)
        {
            Ok(rt) => {
                self.pool
                    .voice_mut(slot)
                    .attach(object_id, event_id, config.clone(), rt, self.device_rate);
                Some(slot)
            }
            Err(e) => {
                error!(target: "audio::engine", "failed to initialize sound source: {e}");
                self.sources
                    .release_source(slot, &mut self.resources, &mut self.ctl);
                self.pool.release(slot);
                None
            }
        }
    }

    /// Hard-stop and reclaim the least important voice (see the pool's
    /// candidate scan).
    fn free_lowest_priority_source(&mut self) -> Option<SourceId> {
        let candidate = self.pool.find_eviction_candidate(&self.active)?;

        self.pool.voice_mut(candidate).stop_now(&mut self.ctl, true);
        self.to_start.retain(|&id| id != candidate);
        self.release_finished_into_pending();
        Some(candidate)
    }

    /// Release every finished voice, queueing its (event, source) pair for
    /// the events manager.
    fn release_finished_into_pending(&mut self) {
        let mut index = 0;
        while index < self.active.len() {
            let id = self.active[index];
            if self.pool.voice(id).is_finished() {
                self.active.swap_remove(index);
                let event_id = self.pool.voice(id).event_id;
                self.finished_pending.push((event_id, id));
                self.sources
                    .release_source(id, &mut self.resources, &mut self.ctl);
                self.pool.release(id);
            } else {
                index += 1;
            }
        }
    }

    fn take_finished(&mut self) -> Vec<(EventId, SourceId)> {
        self.release_finished_into_pending();
        std::mem::take(&mut self.finished_pending)
    }

    fn start_pending(&mut self) {
        for id in std::mem::take(&mut self.to_start) {
            self.pool.voice_mut(id).play(&mut self.ctl);
            self.active.push(id);
        }
    }

    fn tick_voices(&mut self, dt: f32) {
        for index in 0..self.active.len() {
            let id = self.active[index];
            self.pool.voice_mut(id).update(dt, &mut self.ctl);
        }
    }

    /// While the engine is paused only voices mid-fade keep updating so
    /// their pause/stop fades can complete.
    fn tick_fading_voices(&mut self, dt: f32) {
        let any_fading = self.active.iter().any(|&id| {
            matches!(
                self.pool.voice(id).play_state(),
                PlayState::Pausing | PlayState::Stopping
            )
        });
        if any_fading {
            self.tick_voices(dt);
        }
    }

    /// Pending voices cannot be dropped silently; park them in the active
    /// list so pause/stop bookkeeping and release still run for them.
    fn adopt_pending(&mut self) {
        for id in std::mem::take(&mut self.to_start) {
            self.active.push(id);
        }
    }

    fn stop_all_immediate(&mut self) {
        self.adopt_pending();
        for index in 0..self.active.len() {
            let id = self.active[index];
            self.pool.voice_mut(id).stop_now(&mut self.ctl, true);
        }
    }

    fn objects_without_events(&self) -> Vec<u64> {
        self.object_data
            .keys()
            .copied()
            .filter(|&object| !self.has_active_events(object))
            .collect()
    }
}

impl ActionHandler for EngineCore {
    fn start_playback(
        &mut self,
        object_id: u64,
        event_id: EventId,
        target: &Arc<SoundConfig>,
    ) -> Option<SourceId> {
        let slot = self.initiate_new_voice(object_id, event_id, target)?;
        // Spawn data arrives from the game thread before the start list is
        // processed.
        self.to_start.push(slot);
        Some(slot)
    }

    fn pause_voices_on_object(&mut self, object_id: u64, target: &Arc<SoundConfig>) -> bool {
        let mut handled = false;
        for index in 0..self.active.len() {
            let id = self.active[index];
            let voice = self.pool.voice(id);
            let matches = voice.object_id == object_id
                && voice.config.as_ref().is_some_and(|c| Arc::ptr_eq(c, target));
            if matches {
                self.to_start.retain(|&s| s != id);
                self.pool.voice_mut(id).pause(&mut self.ctl);
                handled = true;
            }
        }
        handled
    }

    fn pause_voices(&mut self, target: &Arc<SoundConfig>) {
        for index in 0..self.active.len() {
            let id = self.active[index];
            let matches = self.pool.voice(id).config.as_ref().is_some_and(|c| Arc::ptr_eq(c, target));
            if matches {
                self.to_start.retain(|&s| s != id);
                self.pool.voice_mut(id).pause(&mut self.ctl);
            }
        }
    }

    fn resume_voices_on_object(&mut self, object_id: u64, target: &Arc<SoundConfig>) -> bool {
        let mut handled = true;
        for index in 0..self.active.len() {
            let id = self.active[index];
            let voice = self.pool.voice(id);
            let matches = voice.object_id == object_id
                && voice.config.as_ref().is_some_and(|c| Arc::ptr_eq(c, target));
            if matches {
                match voice.play_state() {
                    // Only restart voices that were explicitly paused.
                    PlayState::Paused => {
                        self.pool.voice_mut(id).play(&mut self.ctl);
                    }
                    // Mid pause-fade: the caller must retry next tick.
                    PlayState::Pausing => handled = false,
                    _ => {}
                }
            }
        }
        handled
    }

    fn resume_voices(&mut self, target: &Arc<SoundConfig>) -> bool {
        let mut handled = true;
        for index in 0..self.active.len() {
            let id = self.active[index];
            let matches = self.pool.voice(id).config.as_ref().is_some_and(|c| Arc::ptr_eq(c, target));
            if matches {
                match self.pool.voice(id).play_state() {
                    PlayState::Paused => {
                        self.pool.voice_mut(id).play(&mut self.ctl);
                    }
                    PlayState::Pausing => handled = false,
                    _ => {}
                }
            }
        }
        handled
    }

    fn stop_voices_on_object(&mut self, object_id: u64, target: &Arc<SoundConfig>) -> bool {
        let mut handled = false;
        for index in 0..self.active.len() {
            let id = self.active[index];
            let voice = self.pool.voice(id);
            let matches = voice.object_id == object_id
                && voice.config.as_ref().is_some_and(|c| Arc::ptr_eq(c, target));
            if matches {
                self.to_start.retain(|&s| s != id);
                self.pool.voice_mut(id).stop(&mut self.ctl);
                handled = true;
            }
        }
        handled
    }

    fn stop_voices(&mut self, target: &Arc<SoundConfig>) {
        for index in 0..self.active.len() {
            let id = self.active[index];
            let matches = self.pool.voice(id).config.as_ref().is_some_and(|c| Arc::ptr_eq(c, target));
            if matches {
                self.to_start.retain(|&s| s != id);
                self.pool.voice_mut(id).stop(&mut self.ctl);
            }
        }
    }

    fn stop_all_on_object(&mut self, object_id: u64) {
        for index in 0..self.active.len() {
            let id = self.active[index];
            if self.pool.voice(id).object_id == object_id {
                self.to_start.retain(|&s| s != id);
                self.pool.voice_mut(id).stop(&mut self.ctl);
            }
        }
    }

    fn stop_all(&mut self) {
        self.adopt_pending();
        for index in 0..self.active.len() {
            let id = self.active[index];
            self.pool.voice_mut(id).stop(&mut self.ctl);
        }
    }

    fn pause_all_on_object(&mut self, object_id: u64) {
        for index in 0..self.active.len() {
            let id = self.active[index];
            if self.pool.voice(id).object_id == object_id {
                self.to_start.retain(|&s| s != id);
                self.pool.voice_mut(id).pause(&mut self.ctl);
            }
        }
    }

    fn pause_all(&mut self) {
        self.adopt_pending();
        for index in 0..self.active.len() {
            let id = self.active[index];
            self.pool.voice_mut(id).pause(&mut self.ctl);
        }
    }

    fn resume_all_on_object(&mut self, object_id: u64) -> bool {
        let mut handled = true;
        for index in 0..self.active.len() {
            let id = self.active[index];
            if self.pool.voice(id).object_id == object_id {
                match self.pool.voice(id).play_state() {
                    PlayState::Paused => {
                        self.pool.voice_mut(id).play(&mut self.ctl);
                    }
                    PlayState::Pausing => handled = false,
                    _ => {}
                }
            }
        }
        handled
    }

    fn resume_all(&mut self) -> bool {
        let mut handled = true;
        for index in 0..self.active.len() {
            let id = self.active[index];
            match self.pool.voice(id).play_state() {
                PlayState::Paused => {
                    self.pool.voice_mut(id).play(&mut self.ctl);
                }
                PlayState::Pausing => handled = false,
                _ => {}
            }
        }
        handled
    }

    fn execute_on_sources(&mut self, action: PlayingEventAction, sources: &[SourceId]) {
        for &id in sources {
            match action {
                PlayingEventAction::Stop => {
                    self.pool.voice_mut(id).stop(&mut self.ctl);
                }
                PlayingEventAction::Pause => {
                    self.pool.voice_mut(id).pause(&mut self.ctl);
                }
                PlayingEventAction::Resume => {
                    if self.pool.voice(id).play_state() == PlayState::Paused {
                        self.pool.voice_mut(id).play(&mut self.ctl);
                    }
                }
                PlayingEventAction::Break | PlayingEventAction::ReleaseEnvelope => {
                    warn!(target: "audio::engine", ?action, "action not implemented");
                }
            }
        }
    }

    fn on_event_finished(&mut self, event_id: EventId, object_id: u64) {
        if let Some(handles) = self.event_handles.get_mut(&object_id) {
            handles.retain(|&e| e != event_id);
            if handles.is_empty() {
                self.event_handles.remove(&object_id);
            }
        }
    }
}

/// The engine hub. Construct with [`AudioEngine::new`], then either spawn
/// the worker with [`AudioEngine::start_thread`] or drive [`AudioEngine::pump`]
/// manually (tests, embedded tick loops).
pub struct AudioEngine {
    registry: Arc<CommandRegistry>,
    events: EventsManager,
    jobs: JobQueue,
    core: Mutex<EngineCore>,
    listener: AudioListener,
    stats: Mutex<Stats>,
    mem: Arc<MemoryCounters>,
    update_data: Mutex<Vec<SourceUpdateData>>,
    sources_updated: AtomicBool,
    user_config: Mutex<UserConfig>,
    reverb_params: Mutex<HashMap<ReverbParameter, f32>>,
    inactive_objects: Mutex<HashSet<u64>>,
    backend: Mutex<Box<dyn AudioBackend>>,
    thread: Mutex<Option<AudioThread>>,
    last_tick: Mutex<Option<Instant>>,
}

impl AudioEngine {
    /// Open the default output device and bring the engine up on it.
    pub fn with_default_device(config: AudioEngineConfig) -> Result<Arc<Self>, EngineError> {
        let backend = audio_backend::create_audio_backend()?;
        Self::new(backend, config)
    }

    /// Bring the engine up on an already-opened backend.
    pub fn new(
        mut backend: Box<dyn AudioBackend>,
        config: AudioEngineConfig,
    ) -> Result<Arc<Self>, EngineError> {
        let device_rate = backend.sample_rate();
        let block = backend.block_frames();
        let max_block =
            (if block == 0 { 2048 } else { block }).clamp(64, crate::mixer::MAX_BLOCK_FRAMES);

        let (ctl, mut mixer) = create_mixer(config.max_sources, device_rate, max_block);
        backend.start(Box::new(move |buffer, frames, channels| {
            mixer.render(buffer, frames, channels);
        }))?;

        let mem = Arc::new(MemoryCounters::default());
        let mut resources = ResourceManager::new(
            config.bank_path,
            config.asset_backend,
            &config.user,
            mem.clone(),
        );
        // A corrupt bank is fatal; the host decides whether to carry on
        // without audio.
        resources.initialize()?;

        let core = EngineCore {
            pool: VoicePool::new(config.max_sources),
            active: Vec::with_capacity(config.max_sources),
            to_start: Vec::with_capacity(config.max_sources),
            sources: SourceManager::new(device_rate, max_block),
            resources,
            ctl,
            object_data: HashMap::new(),
            event_handles: HashMap::new(),
            finished_pending: Vec::new(),
            playback_state: EnginePlaybackState::Playing,
            device_rate,
        };

        let stats = Stats {
            total_sources: config.max_sources as u32,
            ..Default::default()
        };

        info!(
            target: "audio::engine",
            sample_rate = device_rate,
            block_frames = max_block,
            sources = config.max_sources,
            device = backend.device_name().as_deref().unwrap_or("<unknown>"),
            "audio engine initialized"
        );

        Ok(Arc::new(Self {
            registry: Arc::new(CommandRegistry::new()),
            events: EventsManager::new(),
            jobs: JobQueue::new(),
            core: Mutex::new(core),
            listener: AudioListener::new(),
            stats: Mutex::new(stats),
            mem,
            update_data: Mutex::new(Vec::new()),
            sources_updated: AtomicBool::new(false),
            user_config: Mutex::new(config.user),
            reverb_params: Mutex::new(HashMap::new()),
            inactive_objects: Mutex::new(HashSet::new()),
            backend: Mutex::new(backend),
            thread: Mutex::new(None),
            last_tick: Mutex::new(None),
        }))
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Spawn the dedicated audio worker driving [`AudioEngine::pump`].
    pub fn start_thread(self: &Arc<Self>) -> Result<(), EngineError> {
        let mut slot = self.thread.lock();
        if slot.is_some() {
            return Ok(());
        }
        let thread = AudioThread::start(self.clone() as Arc<dyn TickTarget>)
            .map_err(|e| EngineError::Fatal(format!("failed to spawn audio thread: {e}")))?;
        *slot = Some(thread);
        Ok(())
    }

    /// One audio-thread tick: drain queued jobs, then update with the
    /// measured dt. Call directly when embedding without the worker.
    pub fn pump(&self) {
        let tick_started = Instant::now();
        let dt = {
            let mut last = self.last_tick.lock();
            let dt = last.map_or(0.0, |t| t.elapsed().as_secs_f32());
            *last = Some(tick_started);
            dt
        };
        self.tick(dt);
    }

    /// Like [`AudioEngine::pump`] with an explicit dt. Useful for hosts
    /// that step time themselves and for deterministic tests.
    pub fn tick(&self, dt: f32) {
        if !self.jobs.is_audio_thread() {
            self.jobs.bind_current_thread();
        }
        let tick_started = Instant::now();
        self.jobs.drain();
        self.update(dt);
        self.jobs.publish_frame_time(tick_started.elapsed().as_secs_f32());
    }

    /// Drain outstanding jobs once, stop the worker and the device.
    pub fn shutdown(&self) {
        let thread = self.thread.lock().take();
        match thread {
            Some(mut thread) => {
                let fence = AudioThreadFence::new();
                fence.begin(&self.jobs);
                fence.wait();
                thread.stop();
            }
            None => self.jobs.drain(),
        }

        {
            let mut core = self.core.lock();
            core.stop_all_immediate();
            let finished = core.take_finished();
            for (event_id, source_id) in finished {
                self.events.on_source_finished(event_id, source_id, &mut *core);
            }
            core.resources.release();
            core.ctl.collect_garbage();
        }

        if let Err(e) = self.backend.lock().stop() {
            warn!(target: "audio::engine", "device stop failed: {e}");
        }
        info!(target: "audio::engine", "audio engine shut down");
    }

    fn update(&self, dt: f32) {
        let mut core = self.core.lock();

        match core.playback_state {
            EnginePlaybackState::Playing => {
                self.events.update(&mut *core);
                self.update_listener_state(&mut core);
                self.update_sources(&mut core);
                core.start_pending();
                core.tick_voices(dt);
                core.resources.update_streams();
            }
            EnginePlaybackState::Paused => {
                core.tick_fading_voices(dt);
            }
        }

        let finished = core.take_finished();
        for (event_id, source_id) in finished {
            self.events.on_source_finished(event_id, source_id, &mut *core);
        }

        let idle = core.objects_without_events();
        if !idle.is_empty() {
            self.inactive_objects.lock().extend(idle);
        }

        core.ctl.collect_garbage();
        self.publish_stats(&core);
    }

    fn update_listener_state(&self, core: &mut EngineCore) {
        if !self.listener.has_changed(true) {
            return;
        }
        let transform = self.listener.transform();
        let velocity = self.listener.velocity();
        let (inner, outer, outer_gain) = self.listener.cone();

        let spatializer = core.sources.spatializer_mut();
        spatializer.set_listener_cone(inner, outer, outer_gain);
        spatializer.update_listener(transform, velocity);
    }

    fn update_sources(&self, core: &mut EngineCore) {
        if !self.sources_updated.swap(false, Ordering::AcqRel) {
            return;
        }

        let data = std::mem::take(&mut *self.update_data.lock());

        let EngineCore {
            pool,
            active,
            to_start,
            sources,
            object_data,
            ..
        } = core;

        object_data.clear();
        for entry in &data {
            object_data.insert(
                entry.object_id,
                ObjectState {
                    transform: entry.transform,
                    velocity: entry.velocity,
                },
            );
        }

        // Dynamic volume/pitch multipliers reach initialized voices whether
        // or not they started yet.
        for entry in &data {
            for &id in active.iter().chain(to_start.iter()) {
                let voice = pool.voice(id);
                if voice.object_id == entry.object_id {
                    voice.set_volume(entry.volume_multiplier);
                    voice.set_pitch(entry.pitch_multiplier);
                }
            }
        }

        let spatializer = sources.spatializer_mut();
        for &id in active.iter().chain(to_start.iter()) {
            let voice = pool.voice(id);
            // Game-thread data may lag a freshly created voice.
            if let Some(state) = object_data.get(&voice.object_id) {
                spatializer.update_source_position(id as u32, state.transform, state.velocity);
            }
        }
    }

    fn publish_stats(&self, core: &EngineCore) {
        let mut stats = self.stats.lock();
        stats.active_sounds = core.active.len() as u32;
        stats.active_events = self.events.active_event_count();
        stats.audio_objects = core.object_data.len() as u32;
        stats.total_sources = core.pool.capacity() as u32;
        stats.mem_engine = self.mem.engine_bytes();
        stats.mem_resource_manager = self.mem.resource_bytes();
        stats.frame_time = self.jobs.frame_time();
    }

    //==========================================================================
    // Public playback API. Callable from any thread; work is marshalled to
    // the audio thread.

    /// Execute an authored trigger on an object. Returns the playback
    /// handle, or the invalid id on authoring errors.
    pub fn post_trigger(self: &Arc<Self>, command_id: CommandId, object_id: u64) -> EventId {
        if !command_id.is_valid() {
            error!(target: "audio::engine", "post_trigger with an empty command id");
            return EventId::INVALID;
        }
        if object_id == 0 {
            error!(target: "audio::engine", "post_trigger with an invalid object id");
            return EventId::INVALID;
        }
        let Some(trigger) = self.registry.trigger(command_id) else {
            error!(
                target: "audio::engine",
                command = %command_id,
                "post_trigger: audio command does not exist"
            );
            return EventId::INVALID;
        };

        let mut info = EventInfo::new(command_id, object_id, trigger);
        let event_id = self.events.register_event(&mut info);
        if event_id.is_valid() {
            let engine = self.clone();
            self.jobs.post_or_run(
                JobPolicy::RunNow,
                Box::new(move || {
                    engine
                        .core
                        .lock()
                        .event_handles
                        .entry(object_id)
                        .or_default()
                        .push(event_id);
                    engine.events.post_trigger(info);
                }),
                "post trigger",
            );
        }
        event_id
    }

    pub fn stop_active_sounds(self: &Arc<Self>, object_id: u64) -> bool {
        if object_id == 0 {
            return false;
        }
        let engine = self.clone();
        self.jobs.post_or_run(
            JobPolicy::RunNow,
            Box::new(move || {
                engine.core.lock().stop_all_on_object(object_id);
            }),
            "stop active sounds",
        );
        true
    }

    pub fn pause_active_sounds(self: &Arc<Self>, object_id: u64) -> bool {
        if object_id == 0 {
            return false;
        }
        let engine = self.clone();
        self.jobs.post_or_run(
            JobPolicy::RunNow,
            Box::new(move || {
                engine.core.lock().pause_all_on_object(object_id);
            }),
            "pause active sounds",
        );
        true
    }

    pub fn resume_active_sounds(self: &Arc<Self>, object_id: u64) -> bool {
        if object_id == 0 {
            return false;
        }
        let engine = self.clone();
        self.jobs.post_or_run(
            JobPolicy::RunNow,
            Box::new(move || {
                engine.core.lock().resume_all_on_object(object_id);
            }),
            "resume active sounds",
        );
        true
    }

    pub fn has_active_events(&self, object_id: u64) -> bool {
        self.core.lock().has_active_events(object_id)
    }

    fn execute_on_event(self: &Arc<Self>, event_id: EventId, action: PlayingEventAction) -> bool {
        if self.events.active_source_count(event_id) == 0 {
            warn!(
                target: "audio::engine",
                event = event_id.raw(),
                ?action,
                "action on an event with no active sources"
            );
            return false;
        }
        let engine = self.clone();
        self.jobs.post_or_run(
            JobPolicy::RunNow,
            Box::new(move || {
                let mut core = engine.core.lock();
                engine
                    .events
                    .execute_action_on_playing_event(event_id, action, &mut *core);
            }),
            "execute action on playing event",
        );
        true
    }

    pub fn stop_event(self: &Arc<Self>, event_id: EventId) -> bool {
        self.execute_on_event(event_id, PlayingEventAction::Stop)
    }

    pub fn pause_event(self: &Arc<Self>, event_id: EventId) -> bool {
        self.execute_on_event(event_id, PlayingEventAction::Pause)
    }

    pub fn resume_event(self: &Arc<Self>, event_id: EventId) -> bool {
        self.execute_on_event(event_id, PlayingEventAction::Resume)
    }

    /// Stop everything; with `stop_now` the fade is skipped.
    pub fn stop_all(self: &Arc<Self>, stop_now: bool) {
        let engine = self.clone();
        self.jobs.post_or_run(
            JobPolicy::RunNow,
            Box::new(move || {
                let mut core = engine.core.lock();
                if stop_now {
                    core.stop_all_immediate();
                } else {
                    core.stop_all();
                }
            }),
            "stop all sounds",
        );
    }

    /// Suspend the whole engine (e.g. game minimized). Running voices are
    /// paused with their usual fade.
    pub fn pause_engine(self: &Arc<Self>) {
        let engine = self.clone();
        self.jobs.post_or_run(
            JobPolicy::RunNow,
            Box::new(move || {
                let mut core = engine.core.lock();
                core.pause_all();
                core.playback_state = EnginePlaybackState::Paused;
            }),
            "pause engine",
        );
    }

    pub fn resume_engine(self: &Arc<Self>) {
        let engine = self.clone();
        self.jobs.post_or_run(
            JobPolicy::RunNow,
            Box::new(move || {
                let mut core = engine.core.lock();
                core.playback_state = EnginePlaybackState::Playing;
                core.resume_all();
            }),
            "resume engine",
        );
    }

    fn for_each_target_voice(
        core: &mut EngineCore,
        events: &EventsManager,
        target: PlaybackTarget,
        mut apply: impl FnMut(&crate::voice::Voice),
    ) {
        match target {
            PlaybackTarget::Object(object_id) => {
                for &id in core.active.iter().chain(core.to_start.iter()) {
                    let voice = core.pool.voice(id);
                    if voice.object_id == object_id {
                        apply(voice);
                    }
                }
            }
            PlaybackTarget::Event(event_id) => {
                for id in events.active_sources(event_id) {
                    apply(core.pool.voice(id));
                }
            }
        }
    }

    pub fn set_parameter_float(self: &Arc<Self>, parameter_id: CommandId, target: PlaybackTarget, value: f32) {
        let engine = self.clone();
        self.jobs.post_or_run(
            JobPolicy::RunNow,
            Box::new(move || {
                let mut core = engine.core.lock();
                Self::for_each_target_voice(&mut core, &engine.events, target, |voice| {
                    voice.set_parameter(parameter_id, value);
                });
            }),
            "set sound parameter",
        );
    }

    pub fn set_parameter_int(self: &Arc<Self>, parameter_id: CommandId, target: PlaybackTarget, value: i32) {
        self.set_parameter_float(parameter_id, target, value as f32);
    }

    pub fn set_parameter_bool(self: &Arc<Self>, parameter_id: CommandId, target: PlaybackTarget, value: bool) {
        self.set_parameter_float(parameter_id, target, if value { 1.0 } else { 0.0 });
    }

    pub fn set_low_pass_filter(self: &Arc<Self>, target: PlaybackTarget, value: f32) {
        let engine = self.clone();
        self.jobs.post_or_run(
            JobPolicy::RunNow,
            Box::new(move || {
                let mut core = engine.core.lock();
                Self::for_each_target_voice(&mut core, &engine.events, target, |voice| {
                    voice.set_low_pass(value);
                });
            }),
            "set low pass filter",
        );
    }

    pub fn set_high_pass_filter(self: &Arc<Self>, target: PlaybackTarget, value: f32) {
        let engine = self.clone();
        self.jobs.post_or_run(
            JobPolicy::RunNow,
            Box::new(move || {
                let mut core = engine.core.lock();
                Self::for_each_target_voice(&mut core, &engine.events, target, |voice| {
                    voice.set_high_pass(value);
                });
            }),
            "set high pass filter",
        );
    }

    /// Reverb send level of the addressed voices, `[0, 1]`.
    pub fn set_master_reverb_send(self: &Arc<Self>, target: PlaybackTarget, send_level: f32) {
        let engine = self.clone();
        self.jobs.post_or_run(
            JobPolicy::RunNow,
            Box::new(move || {
                let mut core = engine.core.lock();
                Self::for_each_target_voice(&mut core, &engine.events, target, |voice| {
                    voice.set_reverb_send(send_level);
                });
            }),
            "set master reverb send",
        );
    }

    //==========================================================================
    // Listener & object updates (game thread).

    pub fn update_listener_position(&self, new_transform: Transform) {
        if self.listener.position_needs_update(&new_transform) {
            self.listener.set_position_direction(new_transform);
        }
    }

    pub fn update_listener_velocity(&self, new_velocity: Vec3) {
        debug_assert!(
            new_velocity.abs().max_element() <= audio_dsp::SPEED_OF_SOUND,
            "listener velocity exceeds the speed of sound"
        );
        self.listener.set_velocity(new_velocity);
    }

    pub fn update_listener_cone(&self, inner_angle: f32, outer_angle: f32, outer_gain: f32) {
        self.listener.set_cone(inner_angle, outer_angle, outer_gain);
    }

    /// Bulk-publish per-object transforms, velocities and multipliers for
    /// the next audio tick.
    pub fn submit_source_update_data(&self, update_data: Vec<SourceUpdateData>) {
        {
            let mut pending = self.update_data.lock();
            *pending = update_data;
        }
        self.sources_updated.store(true, Ordering::Release);
    }

    /// Objects that stopped having active events since the last call.
    /// The host uses this to destroy one-shot audio entities.
    pub fn take_inactive_objects(&self) -> HashSet<u64> {
        std::mem::take(&mut *self.inactive_objects.lock())
    }

    //==========================================================================
    // Resources & reverb.

    pub fn preload_event_sources(self: &Arc<Self>, command_id: CommandId) {
        let engine = self.clone();
        self.jobs.post_or_run(
            JobPolicy::RunNow,
            Box::new(move || {
                let mut core = engine.core.lock();
                core.resources
                    .preload_event_sources(command_id, &engine.registry);
            }),
            "preload event sources",
        );
    }

    pub fn unload_event_sources(self: &Arc<Self>, command_id: CommandId) {
        let engine = self.clone();
        self.jobs.post_or_run(
            JobPolicy::RunNow,
            Box::new(move || {
                let mut core = engine.core.lock();
                core.resources
                    .unload_event_sources(command_id, &engine.registry);
            }),
            "unload event sources",
        );
    }

    pub fn set_master_reverb_parameter(self: &Arc<Self>, parameter: ReverbParameter, value: f32) {
        self.reverb_params.lock().insert(parameter, value);
        let engine = self.clone();
        self.jobs.post_or_run(
            JobPolicy::RunNow,
            Box::new(move || {
                engine
                    .core
                    .lock()
                    .ctl
                    .post(MixerCommand::SetReverbParam { param: parameter, value });
            }),
            "set master reverb parameter",
        );
    }

    /// Last value set through [`AudioEngine::set_master_reverb_parameter`].
    pub fn master_reverb_parameter(&self, parameter: ReverbParameter) -> Option<f32> {
        self.reverb_params.lock().get(&parameter).copied()
    }

    pub fn user_config(&self) -> UserConfig {
        *self.user_config.lock()
    }

    pub fn set_user_config(self: &Arc<Self>, new_config: UserConfig) {
        *self.user_config.lock() = new_config;
        let engine = self.clone();
        self.jobs.post_or_run(
            JobPolicy::RunNow,
            Box::new(move || {
                engine
                    .core
                    .lock()
                    .resources
                    .set_streaming_threshold(new_config.file_streaming_duration_threshold);
            }),
            "set user config",
        );
    }

    pub fn stats(&self) -> Stats {
        *self.stats.lock()
    }
}

impl TickTarget for AudioEngine {
    fn pump(&self) {
        AudioEngine::pump(self);
    }
}
