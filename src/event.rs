//! Scheduled music events and schedules
//!
//! A [Schedule] is the unit an interpreter hands to [`crate::engine::PlaybackEngine::play`]. It
//! is deep-copied and sorted on submission; nothing in this module is mutated afterwards.

use crate::constants::DEFAULT_TEMPO;

/// Kind of a single scheduled [Event].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EventKind {
    /// Note-on followed, in ms mode, by an automatic note-off after `duration_ms`.
    Note,
    /// Bare note-on, passed through unchanged.
    NoteOn,
    /// Bare note-off, passed through unchanged.
    NoteOff,
    /// Control-change message.
    Cc,
    /// Program-change message.
    Program,
    /// Tempo change; consumed by the engine, never sent to a sink.
    Tempo,
}

impl EventKind {
    /// Tie-break rank used when two events share the same timeline position.
    ///
    /// `NoteOff` sorts first so a zero-duration held note is not silenced by its own new-on.
    fn tie_rank(self) -> u8 {
        match self {
            EventKind::NoteOff => 0,
            _ => 1,
        }
    }
}

/// A single scheduled musical event.
///
/// Only one of `(tick, duration_ticks)` or `(time_ms, duration_ms)` is authoritative, chosen by
/// the enclosing [Schedule]'s `use_ticks` flag. `data1` doubles as BPM when `kind == Tempo`.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct Event {
    /// Position on the tick timeline.
    pub tick: u32,
    /// Position on the millisecond timeline.
    pub time_ms: u32,
    /// What this event does.
    pub kind: EventKind,
    /// MIDI channel, 0..15.
    pub channel: u8,
    /// Pitch / CC number / program number (0..127), or BPM when `kind == Tempo`.
    pub data1: f32,
    /// Velocity / CC value (0..127). Unused for `Program` and `Tempo`.
    pub data2: u8,
    /// Duration on the tick timeline (Note only).
    pub duration_ticks: u32,
    /// Duration on the millisecond timeline (Note only).
    pub duration_ms: u32,
}

impl Event {
    /// Position on the active timeline, chosen by `use_ticks`.
    pub(crate) fn position(&self, use_ticks: bool) -> u32 {
        if use_ticks {
            self.tick
        } else {
            self.time_ms
        }
    }

    /// Duration on the active timeline, chosen by `use_ticks`.
    pub(crate) fn duration(&self, use_ticks: bool) -> u32 {
        if use_ticks {
            self.duration_ticks
        } else {
            self.duration_ms
        }
    }

    /// `(position, tie-break rank)` ordering key used when sorting a schedule.
    fn sort_key(&self, use_ticks: bool) -> (u32, u8) {
        (self.position(use_ticks), self.kind.tie_rank())
    }
}

/// An ordered sequence of [Event]s, produced once by an interpreter and consumed once by the
/// engine.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Schedule {
    /// The events, in any order; [`PlaybackEngine::play`](crate::engine::PlaybackEngine::play)
    /// sorts a copy before running it.
    pub events: Vec<Event>,
    /// Whether `tick`/`duration_ticks` (true) or `time_ms`/`duration_ms` (false) are
    /// authoritative for every event in this schedule.
    pub use_ticks: bool,
    /// Tempo, in BPM, a tick-mode schedule starts at.
    pub initial_tempo: f32,
}

impl Schedule {
    /// Build a new schedule at the default tempo.
    pub fn new(events: Vec<Event>, use_ticks: bool) -> Self {
        Self {
            events,
            use_ticks,
            initial_tempo: DEFAULT_TEMPO,
        }
    }

    /// Override the initial tempo.
    pub fn with_tempo(mut self, bpm: f32) -> Self {
        self.initial_tempo = bpm;
        self
    }

    /// Events sorted by `(position, tie-break)` ascending, per §4.E.Sort.
    pub(crate) fn sorted_events(&self) -> Vec<Event> {
        let mut events = self.events.clone();
        events.sort_by_key(|e| e.sort_key(self.use_ticks));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_off_sorts_before_note_on_at_equal_position() {
        let schedule = Schedule::new(
            vec![
                Event {
                    tick: 0,
                    time_ms: 100,
                    kind: EventKind::NoteOn,
                    channel: 0,
                    data1: 60.0,
                    data2: 100,
                    duration_ticks: 0,
                    duration_ms: 0,
                },
                Event {
                    tick: 0,
                    time_ms: 100,
                    kind: EventKind::NoteOff,
                    channel: 0,
                    data1: 60.0,
                    data2: 0,
                    duration_ticks: 0,
                    duration_ms: 0,
                },
            ],
            false,
        );

        let sorted = schedule.sorted_events();
        assert_eq!(sorted[0].kind, EventKind::NoteOff);
        assert_eq!(sorted[1].kind, EventKind::NoteOn);
    }

    #[test]
    fn tick_mode_ignores_time_ms_for_position() {
        let schedule = Schedule::new(
            vec![
                Event {
                    tick: 10,
                    time_ms: 999,
                    kind: EventKind::NoteOn,
                    channel: 0,
                    data1: 60.0,
                    data2: 100,
                    duration_ticks: 0,
                    duration_ms: 0,
                },
                Event {
                    tick: 5,
                    time_ms: 0,
                    kind: EventKind::NoteOn,
                    channel: 0,
                    data1: 62.0,
                    data2: 100,
                    duration_ticks: 0,
                    duration_ms: 0,
                },
            ],
            true,
        );

        let sorted = schedule.sorted_events();
        assert_eq!(sorted[0].tick, 5);
        assert_eq!(sorted[1].tick, 10);
    }
}
