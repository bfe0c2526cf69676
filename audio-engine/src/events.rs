//! Active audio events: the registry of running trigger executions and the
//! queue-driven dispatcher that turns their actions into voice operations.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::command::{
    ActionContext, ActionKind, CommandId, CommandKind, PlayingEventAction, TriggerAction,
    TriggerCommand,
};
use crate::config::SoundConfig;
use crate::SourceId;

/// Identifier of one active execution of a command on one object.
/// Allocated from a process-wide counter; `0` is the invalid sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u32);

static NEXT_EVENT_ID: AtomicU32 = AtomicU32::new(1);

impl EventId {
    pub const INVALID: EventId = EventId(0);

    pub fn next() -> Self {
        Self(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Execution context of one active event.
#[derive(Clone)]
pub struct EventInfo {
    pub event_id: EventId,
    pub command_id: CommandId,
    pub object_id: u64,
    pub active_sources: Vec<SourceId>,
    /// Shared mutable command snapshot tracking per-action `handled` state.
    pub command_state: Arc<Mutex<TriggerCommand>>,
}

impl EventInfo {
    pub fn new(command_id: CommandId, object_id: u64, command: TriggerCommand) -> Self {
        Self {
            event_id: EventId::INVALID,
            command_id,
            object_id,
            active_sources: Vec::new(),
            command_state: Arc::new(Mutex::new(command)),
        }
    }
}

/// Map of all currently active events. Insertions may come from any
/// thread; mutation of source lists happens on the audio thread.
#[derive(Default)]
pub struct EventRegistry {
    events: RwLock<HashMap<EventId, EventInfo>>,
}

impl EventRegistry {
    pub fn count(&self) -> u32 {
        self.events.read().len() as u32
    }

    pub fn source_count(&self, event_id: EventId) -> u32 {
        self.events
            .read()
            .get(&event_id)
            .map_or(0, |info| info.active_sources.len() as u32)
    }

    /// Assigns a fresh id to `info`, installs it and returns the id.
    pub fn add(&self, info: &mut EventInfo) -> EventId {
        let id = EventId::next();
        info.event_id = id;
        self.events.write().insert(id, info.clone());
        id
    }

    pub fn remove(&self, event_id: EventId) -> bool {
        self.events.write().remove(&event_id).is_some()
    }

    pub fn add_source(&self, event_id: EventId, source_id: SourceId) -> bool {
        match self.events.write().get_mut(&event_id) {
            Some(info) => {
                info.active_sources.push(source_id);
                true
            }
            None => false,
        }
    }

    /// Detach a source. Returns true when the event now has no sources.
    pub fn remove_source(&self, event_id: EventId, source_id: SourceId) -> bool {
        match self.events.write().get_mut(&event_id) {
            Some(info) => {
                info.active_sources.retain(|&s| s != source_id);
                info.active_sources.is_empty()
            }
            None => false,
        }
    }

    pub fn get(&self, event_id: EventId) -> Option<EventInfo> {
        self.events.read().get(&event_id).cloned()
    }
}

/// Voice operations the dispatcher invokes on the engine hub. Routing the
/// calls through this table keeps the hub and the dispatcher acyclic.
pub trait ActionHandler {
    /// Start a voice for `target`; `None` when no voice could be created.
    fn start_playback(
        &mut self,
        object_id: u64,
        event_id: EventId,
        target: &Arc<SoundConfig>,
    ) -> Option<SourceId>;

    fn pause_voices_on_object(&mut self, object_id: u64, target: &Arc<SoundConfig>) -> bool;
    fn pause_voices(&mut self, target: &Arc<SoundConfig>);

    fn resume_voices_on_object(&mut self, object_id: u64, target: &Arc<SoundConfig>) -> bool;
    fn resume_voices(&mut self, target: &Arc<SoundConfig>) -> bool;

    fn stop_voices_on_object(&mut self, object_id: u64, target: &Arc<SoundConfig>) -> bool;
    fn stop_voices(&mut self, target: &Arc<SoundConfig>);

    fn stop_all_on_object(&mut self, object_id: u64);
    fn stop_all(&mut self);

    fn pause_all_on_object(&mut self, object_id: u64);
    fn pause_all(&mut self);

    fn resume_all_on_object(&mut self, object_id: u64) -> bool;
    fn resume_all(&mut self) -> bool;

    fn execute_on_sources(&mut self, action: PlayingEventAction, sources: &[SourceId]);

    /// All actions of an event are handled and its last source is gone.
    fn on_event_finished(&mut self, event_id: EventId, object_id: u64);
}

/// Queue-driven dispatcher for posted commands. `update` runs on the audio
/// thread; posting and registration may happen anywhere.
#[derive(Default)]
pub struct EventsManager {
    command_queue: Mutex<VecDeque<(CommandKind, EventInfo)>>,
    registry: EventRegistry,
}

impl EventsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_event_count(&self) -> u32 {
        self.registry.count()
    }

    pub fn active_source_count(&self, event_id: EventId) -> u32 {
        self.registry.source_count(event_id)
    }

    pub fn active_sources(&self, event_id: EventId) -> Vec<SourceId> {
        self.registry
            .get(event_id)
            .map(|info| info.active_sources)
            .unwrap_or_default()
    }

    /// Install the event in the registry, assigning and returning its id.
    pub fn register_event(&self, info: &mut EventInfo) -> EventId {
        self.registry.add(info)
    }

    /// Queue a registered trigger for execution on the next update.
    pub fn post_trigger(&self, info: EventInfo) {
        self.command_queue
            .lock()
            .push_back((CommandKind::Trigger, info));
    }

    /// Drain the command queue once. Commands that cannot complete are
    /// re-enqueued at the tail, preserving relative order.
    pub fn update(&self, handler: &mut dyn ActionHandler) {
        let pending = self.command_queue.lock().len();
        for _ in 0..pending {
            let Some((kind, info)) = self.command_queue.lock().pop_front() else {
                break;
            };

            let handled = match kind {
                CommandKind::Trigger => self.process_trigger_command(&info, handler),
                CommandKind::Switch | CommandKind::State | CommandKind::Parameter => {
                    warn!(
                        target: "audio::events",
                        ?kind,
                        command = %info.command_id,
                        "command kind not implemented"
                    );
                    true
                }
            };

            if !handled {
                self.command_queue.lock().push_back((kind, info));
            }
        }
    }

    fn process_trigger_command(&self, info: &EventInfo, handler: &mut dyn ActionHandler) -> bool {
        let mut command_handled = true;
        let mut trigger = info.command_state.lock();

        if trigger.delay_execution {
            trigger.delay_execution = false;
        }

        let mut delay_rest = false;
        let trigger_name = trigger.debug_name.clone();

        for action in trigger.actions.iter_mut() {
            if action.target.is_none() && !action.kind.is_all() {
                error!(
                    target: "audio::events",
                    trigger = %trigger_name,
                    kind = ?action.kind,
                    "trigger action has no target assigned"
                );
                action.handled = true;
                continue;
            }

            if delay_rest {
                break;
            }
            if action.handled {
                continue;
            }

            match action.kind {
                ActionKind::Play => {
                    self.process_play(info, action, handler);
                }
                ActionKind::Pause => {
                    Self::process_pause(info, action, handler);
                }
                ActionKind::Resume => {
                    Self::process_resume(info, action, handler, &mut command_handled, &mut delay_rest);
                }
                ActionKind::Stop => {
                    Self::process_stop(info, action, handler);
                }
                ActionKind::StopAll => {
                    match action.context {
                        ActionContext::Object => handler.stop_all_on_object(info.object_id),
                        ActionContext::Global => handler.stop_all(),
                    }
                    action.handled = true;
                }
                ActionKind::PauseAll => {
                    match action.context {
                        ActionContext::Object => handler.pause_all_on_object(info.object_id),
                        ActionContext::Global => handler.pause_all(),
                    }
                    action.handled = true;
                }
                ActionKind::ResumeAll => {
                    let resumed = match action.context {
                        ActionContext::Object => handler.resume_all_on_object(info.object_id),
                        ActionContext::Global => handler.resume_all(),
                    };
                    if resumed {
                        action.handled = true;
                    } else {
                        // Voices still pausing; retry next tick.
                        action.handled = false;
                        command_handled = false;
                        delay_rest = true;
                    }
                }
                // Remaining kinds have no runtime implementation yet.
                _ => {
                    debug!(
                        target: "audio::events",
                        kind = ?action.kind,
                        "action kind not implemented"
                    );
                    action.handled = true;
                }
            }
        }

        if delay_rest {
            trigger.delay_execution = true;
        }

        // A Play action stays live while its source plays; every other kind
        // counts when executed. Flipped Play logic lets the queue drop the
        // command while the event itself remains registered.
        let all_actions_handled = trigger.actions.iter().all(|action| {
            if action.kind == ActionKind::Play {
                !action.handled
            } else {
                action.handled
            }
        });

        drop(trigger);

        if all_actions_handled {
            self.registry.remove(info.event_id);
            handler.on_event_finished(info.event_id, info.object_id);
        }

        command_handled
    }

    fn process_play(
        &self,
        info: &EventInfo,
        action: &mut TriggerAction,
        handler: &mut dyn ActionHandler,
    ) {
        let target = action.target.as_ref().expect("checked above");
        match handler.start_playback(info.object_id, info.event_id, target) {
            Some(source_id) => {
                // Bind the source before the voice actually starts so the
                // event owns it from the first tick.
                self.registry.add_source(info.event_id, source_id);
                action.handled = true;
            }
            None => {
                error!(
                    target: "audio::events",
                    object = info.object_id,
                    "failed to initialize new voice for audio object"
                );
                action.handled = false;
            }
        }
    }

    fn process_pause(info: &EventInfo, action: &mut TriggerAction, handler: &mut dyn ActionHandler) {
        let target = action.target.as_ref().expect("checked above");
        match action.context {
            ActionContext::Object => {
                if !handler.pause_voices_on_object(info.object_id, target) {
                    error!(target: "audio::events", "no active sources for object to pause");
                }
            }
            ActionContext::Global => handler.pause_voices(target),
        }
        action.handled = true;
    }

    fn process_resume(
        info: &EventInfo,
        action: &mut TriggerAction,
        handler: &mut dyn ActionHandler,
        command_handled: &mut bool,
        delay_rest: &mut bool,
    ) {
        let target = action.target.as_ref().expect("checked above");
        let resumed = match action.context {
            ActionContext::Object => {
                handler.resume_voices_on_object(info.object_id, target)
            }
            ActionContext::Global => handler.resume_voices(target),
        };
        if resumed {
            action.handled = true;
        } else {
            // The voice is mid pause-fade; let the fade finish first.
            action.handled = false;
            *command_handled = false;
            *delay_rest = true;
        }
    }

    fn process_stop(info: &EventInfo, action: &mut TriggerAction, handler: &mut dyn ActionHandler) {
        let target = action.target.as_ref().expect("checked above");
        match action.context {
            ActionContext::Object => {
                if !handler.stop_voices_on_object(info.object_id, target) {
                    error!(target: "audio::events", "no active sources for object to stop");
                }
            }
            ActionContext::Global => handler.stop_voices(target),
        }
        action.handled = true;
    }

    /// Bind a freshly created source to its event.
    pub fn add_source(&self, event_id: EventId, source_id: SourceId) {
        self.registry.add_source(event_id, source_id);
    }

    /// A voice finished naturally. Detach it; when the Play action was the
    /// event's last pending work, retire the event.
    pub fn on_source_finished(
        &self,
        event_id: EventId,
        source_id: SourceId,
        handler: &mut dyn ActionHandler,
    ) {
        if self.registry.remove_source(event_id, source_id) {
            let Some(info) = self.registry.get(event_id) else {
                return;
            };
            let all_handled = {
                let trigger = info.command_state.lock();
                trigger.actions.iter().all(|action| action.handled)
            };
            if all_handled {
                self.registry.remove(event_id);
                handler.on_event_finished(event_id, info.object_id);
            }
        }
    }

    /// Apply `action` to every active source of a playing event. Returns
    /// false when the event has no sources to act on.
    pub fn execute_action_on_playing_event(
        &self,
        event_id: EventId,
        action: PlayingEventAction,
        handler: &mut dyn ActionHandler,
    ) -> bool {
        if self.registry.source_count(event_id) == 0 {
            warn!(
                target: "audio::events",
                ?action,
                event = event_id.raw(),
                "action on a playing event that is not in the active registry"
            );
            return false;
        }

        if let Some(info) = self.registry.get(event_id) {
            handler.execute_on_sources(action, &info.active_sources);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_monotonic_and_nonzero() {
        let a = EventId::next();
        let b = EventId::next();
        assert!(a.is_valid() && b.is_valid());
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn registry_tracks_sources() {
        let registry = EventRegistry::default();
        let mut info = EventInfo::new(CommandId::from_name("t"), 1, TriggerCommand::default());
        let id = registry.add(&mut info);
        assert!(id.is_valid());
        assert_eq!(info.event_id, id);

        assert!(registry.add_source(id, 3));
        assert!(registry.add_source(id, 4));
        assert_eq!(registry.source_count(id), 2);

        assert!(!registry.remove_source(id, 3));
        assert!(registry.remove_source(id, 4), "last source removal reports empty");
        assert_eq!(registry.source_count(id), 0);

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
    }
}
