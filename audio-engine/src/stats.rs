//! Telemetry counters published at the end of each audio tick, and the
//! allocation accounting split by subsystem.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot readable at any time by UI/diagnostics code.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub audio_objects: u32,
    pub active_events: u32,
    pub active_sounds: u32,
    pub total_sources: u32,
    pub mem_engine: u64,
    pub mem_resource_manager: u64,
    /// Last audio-thread tick duration, seconds.
    pub frame_time: f32,
}

/// Which subsystem an allocation is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorTag {
    Engine,
    ResourceManager,
}

/// Byte counters fed by the explicit allocation callbacks.
#[derive(Default)]
pub struct MemoryCounters {
    engine: AtomicU64,
    resources: AtomicU64,
}

impl MemoryCounters {
    pub fn on_alloc(&self, tag: AllocatorTag, bytes: u64) {
        match tag {
            AllocatorTag::Engine => self.engine.fetch_add(bytes, Ordering::Relaxed),
            AllocatorTag::ResourceManager => self.resources.fetch_add(bytes, Ordering::Relaxed),
        };
    }

    pub fn on_free(&self, tag: AllocatorTag, bytes: u64) {
        match tag {
            AllocatorTag::Engine => self.engine.fetch_sub(bytes, Ordering::Relaxed),
            AllocatorTag::ResourceManager => self.resources.fetch_sub(bytes, Ordering::Relaxed),
        };
    }

    pub fn engine_bytes(&self) -> u64 {
        self.engine.load(Ordering::Relaxed)
    }

    pub fn resource_bytes(&self) -> u64 {
        self.resources.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_per_tag() {
        let counters = MemoryCounters::default();
        counters.on_alloc(AllocatorTag::Engine, 100);
        counters.on_alloc(AllocatorTag::ResourceManager, 50);
        counters.on_free(AllocatorTag::Engine, 40);
        assert_eq!(counters.engine_bytes(), 60);
        assert_eq!(counters.resource_bytes(), 50);
    }
}
