//! The fixed pool of voice slots and the priority-based eviction scan.

use std::collections::VecDeque;

use crate::voice::Voice;
use crate::SourceId;

/// Fixed array of `N` voices plus a FIFO free-slot queue. Slot identity is
/// stable for the engine lifetime; only slot contents are recycled.
pub struct VoicePool {
    voices: Vec<Voice>,
    free: VecDeque<SourceId>,
}

impl VoicePool {
    pub fn new(slots: usize) -> Self {
        Self {
            voices: (0..slots).map(Voice::new).collect(),
            free: (0..slots).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.voices.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn allocate(&mut self) -> Option<SourceId> {
        self.free.pop_front()
    }

    /// Return a slot to the free queue after its chain was torn down.
    pub fn release(&mut self, id: SourceId) {
        debug_assert!(!self.free.contains(&id), "slot {id} released twice");
        self.voices[id].reset();
        self.free.push_back(id);
    }

    pub fn voice(&self, id: SourceId) -> &Voice {
        &self.voices[id]
    }

    pub fn voice_mut(&mut self, id: SourceId) -> &mut Voice {
        &mut self.voices[id]
    }

    /// Pick the voice to sacrifice when no slot is free, among `active`:
    /// 1. the lowest-priority voice already stopping,
    /// 2. else the lowest-priority non-looping voice, preferring the one
    ///    farther into its data on ties,
    /// 3. else the lowest-priority voice overall.
    pub fn find_eviction_candidate(&self, active: &[SourceId]) -> Option<SourceId> {
        let mut lowest_stopping: Option<SourceId> = None;
        let mut lowest_non_looping: Option<SourceId> = None;
        let mut lowest_overall: Option<SourceId> = None;

        let lower = |a: SourceId, b: Option<SourceId>, check_progress: bool| -> SourceId {
            let Some(b) = b else { return a };
            let pa = self.voices[a].priority();
            let pb = self.voices[b].priority();
            if pa < pb {
                a
            } else if pa > pb {
                b
            } else if check_progress {
                if self.voices[a].playback_fraction() > self.voices[b].playback_fraction() {
                    a
                } else {
                    b
                }
            } else {
                b
            }
        };

        for &id in active {
            let voice = &self.voices[id];
            if voice.is_stopping() {
                lowest_stopping = Some(lower(id, lowest_stopping, false));
            } else if !voice.is_looping() {
                lowest_non_looping = Some(lower(id, lowest_non_looping, true));
            } else {
                lowest_overall = Some(lower(id, lowest_overall, false));
            }
        }

        lowest_stopping.or(lowest_non_looping).or(lowest_overall)
    }
}
