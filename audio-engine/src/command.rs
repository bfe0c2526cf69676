//! Authored commands: CRC-32 derived identifiers, trigger bodies and the
//! actions they execute against voices.

use std::fmt;
use std::sync::Arc;

use crate::config::SoundConfig;

/// CRC-32 (IEEE) lookup table, built at compile time.
const fn crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const CRC32_TABLE: [u32; 256] = crc32_table();

pub const fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    let mut i = 0;
    while i < bytes.len() {
        crc = (crc >> 8) ^ CRC32_TABLE[((crc ^ bytes[i] as u32) & 0xFF) as usize];
        i += 1;
    }
    !crc
}

/// Identifier of an authored command: the CRC-32 of its unique name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(u32);

impl CommandId {
    pub const fn from_name(name: &str) -> Self {
        Self(crc32(name.as_bytes()))
    }

    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    pub const fn invalid() -> Self {
        Self::from_name("")
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::invalid()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Trigger,
    Switch,
    State,
    Parameter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Play,
    Stop,
    StopAll,
    Pause,
    PauseAll,
    Resume,
    ResumeAll,
    Break,
    Seek,
    SeekAll,
    PostTrigger,
    ReleaseEnvelope,
}

impl ActionKind {
    /// `*All` kinds act without a target sound config.
    pub fn is_all(self) -> bool {
        matches!(
            self,
            ActionKind::StopAll | ActionKind::PauseAll | ActionKind::ResumeAll | ActionKind::SeekAll
        )
    }
}

/// Scope of one action: the posting object or every object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionContext {
    Object,
    Global,
}

/// Actions applicable to the sources of an already-playing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayingEventAction {
    Stop,
    Pause,
    Resume,
    Break,
    ReleaseEnvelope,
}

/// One primitive operation within a trigger.
#[derive(Debug, Clone)]
pub struct TriggerAction {
    pub kind: ActionKind,
    pub target: Option<Arc<SoundConfig>>,
    pub context: ActionContext,
    /// Mutable execution state, owned by the event's command snapshot.
    pub handled: bool,
}

impl TriggerAction {
    pub fn new(kind: ActionKind, target: Option<Arc<SoundConfig>>, context: ActionContext) -> Self {
        Self {
            kind,
            target,
            context,
            handled: false,
        }
    }
}

/// An authored trigger: an ordered list of actions.
#[derive(Debug, Clone, Default)]
pub struct TriggerCommand {
    pub debug_name: String,
    pub actions: Vec<TriggerAction>,
    /// Set when an action must wait for the next update before the
    /// remaining actions may execute (e.g. resuming a pausing voice).
    pub delay_execution: bool,
}

impl TriggerCommand {
    pub fn new(debug_name: impl Into<String>, actions: Vec<TriggerAction>) -> Self {
        Self {
            debug_name: debug_name.into(),
            actions,
            delay_execution: false,
        }
    }
}
