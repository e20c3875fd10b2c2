//! Live-loop scheduler
//!
//! Tracks a fixed table of buffers that should re-evaluate themselves every `beat_interval`
//! beats of the shared network clock. `tick()` is meant to be called from the same poll loop
//! that drives [`crate::bus::EventBus::dispatch_all`]; its beat-boundary check only does work
//! while [`crate::tempo::TempoSync`] is enabled, since beat position is undefined otherwise, but
//! it always reaps entries whose buffer has since been closed.

use std::sync::{Arc, Mutex};

use crate::bus::EventBus;
use crate::constants::LIVE_LOOP_MAX;
use crate::dispatch::BufferLookup;
use crate::error::RegistryError;
use crate::tempo::TempoSync;

/// One buffer's live-loop state.
struct LiveLoopEntry {
    /// Buffer this loop re-evaluates.
    buffer_id: u32,
    /// Beats between re-evaluations; also used as the Link quantum.
    beat_interval: f64,
    /// Beat position as of the last `tick()`, used to detect a crossed boundary.
    last_beat: f64,
}

/// Registry of active live loops, capped at [`LIVE_LOOP_MAX`] concurrent entries.
pub struct LiveLoopRegistry {
    /// Active loops, capped at [`LIVE_LOOP_MAX`].
    entries: Mutex<Vec<LiveLoopEntry>>,
    /// Source of beat position.
    tempo: Arc<TempoSync>,
    /// Destination for `BeatBoundary` events.
    bus: Arc<EventBus>,
}

impl LiveLoopRegistry {
    /// Construct an empty registry bound to the given tempo source and bus.
    pub fn new(tempo: Arc<TempoSync>, bus: Arc<EventBus>) -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(LIVE_LOOP_MAX)),
            tempo,
            bus,
        }
    }

    /// Start (or restart, at a possibly new interval) a loop on `buffer_id`.
    pub fn start(&self, buffer_id: u32, beats: f64) -> Result<(), RegistryError> {
        if beats <= 0.0 {
            return Err(RegistryError::InvalidInterval);
        }
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.buffer_id == buffer_id) {
            entry.beat_interval = beats;
            return Ok(());
        }
        if entries.len() >= LIVE_LOOP_MAX {
            return Err(RegistryError::Full);
        }
        let last_beat = self.tempo.get_beat(beats);
        entries.push(LiveLoopEntry {
            buffer_id,
            beat_interval: beats,
            last_beat,
        });
        Ok(())
    }

    /// Stop a loop. No-op if `buffer_id` wasn't active.
    pub fn stop(&self, buffer_id: u32) {
        self.entries
            .lock()
            .unwrap()
            .retain(|e| e.buffer_id != buffer_id);
    }

    /// Whether `buffer_id` currently has an active loop.
    pub fn is_active(&self, buffer_id: u32) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.buffer_id == buffer_id)
    }

    /// The beat interval a loop is currently running at, if active.
    pub fn get_interval(&self, buffer_id: u32) -> Option<f64> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.buffer_id == buffer_id)
            .map(|e| e.beat_interval)
    }

    /// Drop every entry whose buffer no longer exists, then check the remaining active loops for
    /// a crossed beat-interval boundary, pushing a [`crate::bus::BusEvent::BeatBoundary`] for each
    /// one that crossed. Boundary checking is a no-op unless the network clock is enabled, but
    /// dead-buffer removal always runs so a closed buffer's slot is freed whether or not tempo
    /// sync happens to be on at the time.
    pub fn tick(&self, buffers: &dyn BufferLookup) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|e| buffers.contains(e.buffer_id));

        if !self.tempo.is_enabled() {
            return;
        }
        for entry in entries.iter_mut() {
            let beat = self.tempo.get_beat(entry.beat_interval);
            let prev_boundary = (entry.last_beat / entry.beat_interval).floor();
            let cur_boundary = (beat / entry.beat_interval).floor();
            if cur_boundary > prev_boundary {
                let _ = self.bus.push_beat(beat, entry.beat_interval, entry.buffer_id);
            }
            entry.last_beat = beat;
        }
    }

    /// Clear every active loop.
    pub fn shutdown(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::NullBufferLookup;

    struct AllBuffers;
    impl BufferLookup for AllBuffers {
        fn contains(&self, _buffer_id: u32) -> bool {
            true
        }
    }

    #[test]
    fn rejects_non_positive_interval() {
        let tempo = Arc::new(TempoSync::new());
        let bus = Arc::new(EventBus::new());
        let registry = LiveLoopRegistry::new(tempo, bus);
        assert_eq!(registry.start(1, 0.0), Err(RegistryError::InvalidInterval));
    }

    #[test]
    fn start_stop_tracks_active_state() {
        let tempo = Arc::new(TempoSync::new());
        let bus = Arc::new(EventBus::new());
        let registry = LiveLoopRegistry::new(tempo, bus);
        registry.start(1, 4.0).unwrap();
        assert!(registry.is_active(1));
        assert_eq!(registry.get_interval(1), Some(4.0));
        registry.stop(1);
        assert!(!registry.is_active(1));
    }

    #[test]
    fn full_registry_rejects_new_buffers() {
        let tempo = Arc::new(TempoSync::new());
        let bus = Arc::new(EventBus::new());
        let registry = LiveLoopRegistry::new(tempo, bus);
        for id in 0..LIVE_LOOP_MAX as u32 {
            registry.start(id, 4.0).unwrap();
        }
        assert_eq!(
            registry.start(LIVE_LOOP_MAX as u32, 4.0),
            Err(RegistryError::Full)
        );
    }

    #[test]
    fn tick_is_noop_while_tempo_disabled() {
        let tempo = Arc::new(TempoSync::new());
        let bus = Arc::new(EventBus::new());
        let registry = LiveLoopRegistry::new(tempo, bus.clone());
        registry.start(1, 4.0).unwrap();
        registry.tick(&AllBuffers);
        assert!(bus.is_empty());
    }

    #[test]
    fn tick_removes_entry_once_buffer_is_gone() {
        let tempo = Arc::new(TempoSync::new());
        let bus = Arc::new(EventBus::new());
        let registry = LiveLoopRegistry::new(tempo, bus);
        registry.start(1, 4.0).unwrap();
        registry.tick(&NullBufferLookup);
        assert!(!registry.is_active(1));
    }

    #[test]
    fn tick_keeps_entry_while_buffer_exists() {
        let tempo = Arc::new(TempoSync::new());
        let bus = Arc::new(EventBus::new());
        let registry = LiveLoopRegistry::new(tempo, bus);
        registry.start(1, 4.0).unwrap();
        registry.tick(&AllBuffers);
        assert!(registry.is_active(1));
    }
}
