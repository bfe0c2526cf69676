//! Dispatcher behavior against a scripted action handler: ordering,
//! delayed execution, failure cleanup.

use std::sync::Arc;

use audio_engine::events::{ActionHandler, EventInfo, EventsManager};
use audio_engine::{
    ActionContext, ActionKind, CommandId, EventId, PlayingEventAction, SoundConfig, SourceId,
    TriggerAction, TriggerCommand,
};

#[derive(Default)]
struct ScriptedHandler {
    /// Next source id to hand out; `None` simulates allocation failure.
    next_source: Option<SourceId>,
    calls: Vec<String>,
    /// Voices currently reported as pausing (forces resume retry).
    resume_blocked: bool,
    finished_events: Vec<(EventId, u64)>,
}

impl ActionHandler for ScriptedHandler {
    fn start_playback(
        &mut self,
        object_id: u64,
        _event_id: EventId,
        _target: &Arc<SoundConfig>,
    ) -> Option<SourceId> {
        self.calls.push(format!("play:{object_id}"));
        self.next_source
    }

    fn pause_voices_on_object(&mut self, object_id: u64, _target: &Arc<SoundConfig>) -> bool {
        self.calls.push(format!("pause:{object_id}"));
        true
    }

    fn pause_voices(&mut self, _target: &Arc<SoundConfig>) {
        self.calls.push("pause:global".into());
    }

    fn resume_voices_on_object(&mut self, object_id: u64, _target: &Arc<SoundConfig>) -> bool {
        self.calls.push(format!("resume:{object_id}"));
        !self.resume_blocked
    }

    fn resume_voices(&mut self, _target: &Arc<SoundConfig>) -> bool {
        self.calls.push("resume:global".into());
        !self.resume_blocked
    }

    fn stop_voices_on_object(&mut self, object_id: u64, _target: &Arc<SoundConfig>) -> bool {
        self.calls.push(format!("stop:{object_id}"));
        true
    }

    fn stop_voices(&mut self, _target: &Arc<SoundConfig>) {
        self.calls.push("stop:global".into());
    }

    fn stop_all_on_object(&mut self, object_id: u64) {
        self.calls.push(format!("stopall:{object_id}"));
    }

    fn stop_all(&mut self) {
        self.calls.push("stopall:global".into());
    }

    fn pause_all_on_object(&mut self, object_id: u64) {
        self.calls.push(format!("pauseall:{object_id}"));
    }

    fn pause_all(&mut self) {
        self.calls.push("pauseall:global".into());
    }

    fn resume_all_on_object(&mut self, object_id: u64) -> bool {
        self.calls.push(format!("resumeall:{object_id}"));
        !self.resume_blocked
    }

    fn resume_all(&mut self) -> bool {
        self.calls.push("resumeall:global".into());
        !self.resume_blocked
    }

    fn execute_on_sources(&mut self, action: PlayingEventAction, sources: &[SourceId]) {
        self.calls.push(format!("on_sources:{action:?}:{sources:?}"));
    }

    fn on_event_finished(&mut self, event_id: EventId, object_id: u64) {
        self.finished_events.push((event_id, object_id));
    }
}

fn config() -> Arc<SoundConfig> {
    Arc::new(SoundConfig {
        data_source_asset: 0xF00D,
        ..Default::default()
    })
}

fn post(
    events: &EventsManager,
    object_id: u64,
    actions: Vec<TriggerAction>,
) -> (EventId, EventInfo) {
    let command = TriggerCommand::new("test-trigger", actions);
    let mut info = EventInfo::new(CommandId::from_name("test-trigger"), object_id, command);
    let id = events.register_event(&mut info);
    events.post_trigger(info.clone());
    (id, info)
}

#[test]
fn play_registers_source_and_keeps_event_alive() {
    let events = EventsManager::new();
    let mut handler = ScriptedHandler {
        next_source: Some(5),
        ..Default::default()
    };

    let (id, _info) = post(
        &events,
        42,
        vec![TriggerAction::new(
            ActionKind::Play,
            Some(config()),
            ActionContext::Object,
        )],
    );

    events.update(&mut handler);
    assert_eq!(handler.calls, vec!["play:42"]);
    assert_eq!(events.active_sources(id), vec![5]);
    assert_eq!(events.active_event_count(), 1, "event lives while playing");
    assert!(handler.finished_events.is_empty());

    // Natural end of the voice retires the event.
    events.on_source_finished(id, 5, &mut handler);
    assert_eq!(events.active_event_count(), 0);
    assert_eq!(handler.finished_events, vec![(id, 42)]);
}

#[test]
fn failed_play_cleans_up_without_retry() {
    let events = EventsManager::new();
    let mut handler = ScriptedHandler {
        next_source: None,
        ..Default::default()
    };

    let (id, _info) = post(
        &events,
        7,
        vec![TriggerAction::new(
            ActionKind::Play,
            Some(config()),
            ActionContext::Object,
        )],
    );

    events.update(&mut handler);
    // The unhandled Play matches the flipped completion rule, so the event
    // is removed instead of looping forever.
    assert_eq!(events.active_event_count(), 0);
    assert_eq!(handler.finished_events, vec![(id, 7)]);

    // No retry on the next tick.
    handler.calls.clear();
    events.update(&mut handler);
    assert!(handler.calls.is_empty());
}

#[test]
fn actions_execute_in_authored_order() {
    let events = EventsManager::new();
    let mut handler = ScriptedHandler {
        next_source: Some(1),
        ..Default::default()
    };

    post(
        &events,
        9,
        vec![
            TriggerAction::new(ActionKind::Stop, Some(config()), ActionContext::Object),
            TriggerAction::new(ActionKind::Play, Some(config()), ActionContext::Object),
            TriggerAction::new(ActionKind::PauseAll, None, ActionContext::Global),
        ],
    );

    events.update(&mut handler);
    assert_eq!(handler.calls, vec!["stop:9", "play:9", "pauseall:global"]);
}

#[test]
fn blocked_resume_delays_and_retries_next_tick() {
    let events = EventsManager::new();
    let mut handler = ScriptedHandler {
        next_source: Some(1),
        resume_blocked: true,
        ..Default::default()
    };

    post(
        &events,
        3,
        vec![
            TriggerAction::new(ActionKind::Resume, Some(config()), ActionContext::Object),
            TriggerAction::new(ActionKind::Stop, Some(config()), ActionContext::Object),
        ],
    );

    events.update(&mut handler);
    // The Stop after the blocked Resume must not run this tick.
    assert_eq!(handler.calls, vec!["resume:3"]);

    // Fade finished: the retry executes the Resume and then the Stop.
    handler.resume_blocked = false;
    events.update(&mut handler);
    assert_eq!(handler.calls, vec!["resume:3", "resume:3", "stop:3"]);
}

#[test]
fn missing_target_is_an_authoring_error_not_a_hang() {
    let events = EventsManager::new();
    let mut handler = ScriptedHandler::default();

    let (_, _info) = post(
        &events,
        2,
        vec![TriggerAction::new(ActionKind::Stop, None, ActionContext::Object)],
    );

    events.update(&mut handler);
    // Action skipped, command fully handled, nothing queued.
    assert!(handler.calls.is_empty());
    events.update(&mut handler);
    assert!(handler.calls.is_empty());
}

#[test]
fn unimplemented_kinds_are_accepted_and_completed() {
    let events = EventsManager::new();
    let mut handler = ScriptedHandler {
        next_source: Some(1),
        ..Default::default()
    };

    post(
        &events,
        4,
        vec![
            TriggerAction::new(ActionKind::Seek, Some(config()), ActionContext::Object),
            TriggerAction::new(ActionKind::PostTrigger, Some(config()), ActionContext::Object),
        ],
    );

    events.update(&mut handler);
    assert!(handler.calls.is_empty(), "no handler invoked for stubs");
    assert_eq!(events.active_event_count(), 0);
}

#[test]
fn execute_on_playing_event_requires_sources() {
    let events = EventsManager::new();
    let mut handler = ScriptedHandler {
        next_source: Some(8),
        ..Default::default()
    };

    let (id, _info) = post(
        &events,
        11,
        vec![TriggerAction::new(
            ActionKind::Play,
            Some(config()),
            ActionContext::Object,
        )],
    );

    assert!(!events.execute_action_on_playing_event(id, PlayingEventAction::Stop, &mut handler));

    events.update(&mut handler);
    assert!(events.execute_action_on_playing_event(id, PlayingEventAction::Stop, &mut handler));
    assert!(handler
        .calls
        .iter()
        .any(|c| c.starts_with("on_sources:Stop")));
}
