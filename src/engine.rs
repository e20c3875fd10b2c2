//! Async playback engine
//!
//! Owns a fixed pool of playback slots and one dedicated timer thread. The timer thread is the
//! sole mutator of slot state, mirroring the cooperative-cancellation pattern the existing
//! playback path already used (an `Arc<(Mutex<bool>, Condvar)>` interrupt handle per running
//! job) — generalized here from "one job at a time" to a fixed pool of eight concurrent slots
//! serviced by a single thread via `mpsc::Receiver::recv_timeout`, which doubles as both the
//! timer wheel and the wake channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::bus::EventBus;
use crate::constants::{MAX_ACTIVE_NOTES, MAX_SLOTS, TICKS_PER_QUARTER};
use crate::error::PlayError;
use crate::event::{Event, EventKind, Schedule};
use crate::sink::Sink;

/// How a playback slot finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    /// The schedule ran to completion.
    Finished,
    /// `stop`/`stop_all` ended it early.
    Stopped,
}

/// Opaque handle to a reserved playback slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(pub u8);

/// Convert a tick duration to milliseconds at a given tempo. `480` ticks = one quarter note.
pub fn ticks_to_ms(ticks: u32, bpm: f32) -> f64 {
    ticks as f64 * 60_000.0 / bpm as f64 / TICKS_PER_QUARTER as f64
}

/// A note currently sounding, waiting for its automatic note-off (ms mode only).
struct ActiveNote {
    /// MIDI channel.
    channel: u8,
    /// Pitch.
    pitch: u8,
    /// Position, on the slot's timeline, its note-off is due.
    off_time: u32,
}

/// Request sent from a caller thread to the timer thread.
enum Command {
    /// Reserve a free slot and start running `schedule`.
    Play {
        /// The sorted-on-submission schedule to run.
        schedule: Schedule,
        /// Where to render events.
        sink: Box<dyn Sink + Send>,
        /// Synchronous reply channel back to the caller.
        reply: mpsc::SyncSender<Result<SlotId, PlayError>>,
    },
    /// Stop one slot.
    Stop(SlotId),
    /// Stop every slot.
    StopAll,
    /// End the timer thread.
    Shutdown,
}

/// One slot's worth of playback state, owned exclusively by the timer thread.
struct RunningSlot {
    /// Events, sorted once at construction time.
    events: Vec<Event>,
    /// Whether `events` positions are ticks (true) or milliseconds (false).
    use_ticks: bool,
    /// Index of the next unprocessed event.
    cursor: usize,
    /// Current logical playhead position, on the active timeline.
    current: u32,
    /// Current tempo, mutated by `Tempo` events.
    tempo: f32,
    /// Rendering backend for this slot.
    sink: Box<dyn Sink + Send>,
    /// Notes sounding, awaiting an automatic note-off.
    active_notes: Vec<ActiveNote>,
    /// Set once `stop`/`stop_all` has targeted this slot.
    stop_requested: bool,
    /// Next wall-clock time this slot needs attention.
    deadline: Instant,
}

impl RunningSlot {
    /// Sort the schedule once and set up a fresh slot ready to run from position zero.
    fn new(schedule: Schedule, sink: Box<dyn Sink + Send>) -> Self {
        Self {
            events: schedule.sorted_events(),
            use_ticks: schedule.use_ticks,
            cursor: 0,
            current: 0,
            tempo: schedule.initial_tempo,
            sink,
            active_notes: Vec::with_capacity(MAX_ACTIVE_NOTES.min(16)),
            stop_requested: false,
            deadline: Instant::now(),
        }
    }

    /// Send a note-off for every currently held note; used on stop and shutdown.
    fn flush_all_notes_off(&mut self) {
        for note in self.active_notes.drain(..) {
            self.sink.send_note_off(note.channel, note.pitch);
        }
    }

    /// Send a note-off for every held note whose `off_time` has arrived.
    fn flush_due_note_offs(&mut self) {
        let current = self.current;
        let sink = &mut self.sink;
        self.active_notes.retain(|note| {
            if note.off_time <= current {
                sink.send_note_off(note.channel, note.pitch);
                false
            } else {
                true
            }
        });
    }

    /// Hold a new note, evicting the oldest held note (with its own note-off) if the table is
    /// already at [`MAX_ACTIVE_NOTES`].
    fn insert_active_note(&mut self, channel: u8, pitch: u8, off_time: u32) {
        if self.active_notes.len() >= MAX_ACTIVE_NOTES {
            let oldest = self.active_notes.remove(0);
            self.sink.send_note_off(oldest.channel, oldest.pitch);
        }
        self.active_notes.push(ActiveNote {
            channel,
            pitch,
            off_time,
        });
    }

    /// Render one event to the sink, applying tempo changes and automatic note-off bookkeeping.
    fn emit(&mut self, event: Event) {
        let channel = event.channel;
        match event.kind {
            EventKind::NoteOn => self.sink.send_note_on(channel, event.data1 as u8, event.data2),
            EventKind::NoteOff => self.sink.send_note_off(channel, event.data1 as u8),
            EventKind::Cc => self.sink.send_cc(channel, event.data1 as u8, event.data2),
            EventKind::Program => self.sink.send_program(channel, event.data1 as u8),
            EventKind::Tempo => {
                self.tempo = event.data1;
            }
            EventKind::Note => {
                let pitch = event.data1 as u8;
                self.sink.send_note_on(channel, pitch, event.data2);
                if !self.use_ticks {
                    let off_time = self.current + event.duration(self.use_ticks);
                    self.insert_active_note(channel, pitch, off_time);
                }
                // In tick mode automatic note-off is disabled; the interpreter must schedule its
                // own `NoteOff` event.
            }
        }
    }

    /// Process everything due at `self.current`, rearm for the next target. `None` means the
    /// slot has nothing left to do and should finalize.
    fn step(&mut self) -> Option<u64> {
        while self.cursor < self.events.len()
            && self.events[self.cursor].position(self.use_ticks) <= self.current
        {
            let event = self.events[self.cursor];
            self.emit(event);
            self.cursor += 1;
        }

        if !self.use_ticks {
            self.flush_due_note_offs();
        }

        let next_event_pos = self
            .events
            .get(self.cursor)
            .map(|e| e.position(self.use_ticks));
        let next_off = if self.use_ticks {
            None
        } else {
            self.active_notes.iter().map(|n| n.off_time).min()
        };

        let target = match (next_event_pos, next_off) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }?;

        let delay_units = target.saturating_sub(self.current);
        let delay_ms = if self.use_ticks {
            ticks_to_ms(delay_units, self.tempo)
        } else {
            delay_units as f64
        };
        self.current = target;
        Some(delay_ms.max(0.0) as u64)
    }

    /// Whether every event has been processed and no note is still held.
    fn finished(&self) -> bool {
        self.cursor >= self.events.len() && self.active_notes.is_empty()
    }
}

/// Shared view of which slots are occupied, read by the public query methods without going
/// through the command channel.
#[derive(Default)]
struct ActiveTable {
    /// Per-slot occupancy.
    active: [bool; MAX_SLOTS],
    /// Number of occupied slots.
    count: usize,
}

/// Fixed pool of playback slots, serviced by one background timer thread.
pub struct PlaybackEngine {
    /// Channel to the timer thread, `None` before `init()`/after `cleanup()`.
    command_tx: Mutex<Option<Sender<Command>>>,
    /// Handle to the timer thread, joined by `cleanup()`.
    thread: Mutex<Option<JoinHandle<()>>>,
    /// Shared occupancy table, read without going through the command channel.
    active: Arc<Mutex<ActiveTable>>,
    /// Whether `init()` has already spawned the timer thread.
    started: AtomicBool,
}

impl Default for PlaybackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackEngine {
    /// Construct an engine with no timer thread running yet.
    pub fn new() -> Self {
        Self {
            command_tx: Mutex::new(None),
            thread: Mutex::new(None),
            active: Arc::new(Mutex::new(ActiveTable::default())),
            started: AtomicBool::new(false),
        }
    }

    /// Idempotent: start the timer thread if it isn't already running.
    pub fn init(&self, bus: Arc<EventBus>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let (tx, rx) = mpsc::channel();
        let active = self.active.clone();
        let thread = std::thread::Builder::new()
            .name("playback-timer".into())
            .spawn(move || timer_loop(rx, active, bus))
            .expect("failed to spawn playback timer thread");
        *self.command_tx.lock().unwrap() = Some(tx);
        *self.thread.lock().unwrap() = Some(thread);
    }

    /// Signal shutdown, join the timer thread, and close every slot.
    pub fn cleanup(&self) {
        if let Some(tx) = self.command_tx.lock().unwrap().take() {
            let _ = tx.send(Command::Shutdown);
        }
        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }
        self.started.store(false, Ordering::SeqCst);
    }

    /// Reject empty schedules and unusable sinks up front, then hand the request to the timer
    /// thread and block for its synchronous reply.
    pub fn play(
        &self,
        schedule: Schedule,
        sink: Box<dyn Sink + Send>,
    ) -> Result<SlotId, PlayError> {
        if schedule.events.is_empty() {
            return Err(PlayError::EmptySchedule);
        }
        if !sink.midi_out_open() && !sink.tsf_enabled() && !sink.csound_enabled() {
            return Err(PlayError::SinkUnavailable);
        }

        let tx = self.command_tx.lock().unwrap().clone();
        let Some(tx) = tx else {
            return Err(PlayError::PoolFull);
        };

        let (reply_tx, reply_rx) = mpsc::sync_channel(0);
        if tx
            .send(Command::Play {
                schedule,
                sink,
                reply: reply_tx,
            })
            .is_err()
        {
            return Err(PlayError::PoolFull);
        }

        reply_rx.recv().unwrap_or(Err(PlayError::PoolFull))
    }

    /// Fire-and-forget request to stop one slot.
    pub fn stop(&self, id: SlotId) {
        if let Some(tx) = self.command_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Command::Stop(id));
        }
    }

    /// Fire-and-forget request to stop every active slot.
    pub fn stop_all(&self) {
        if let Some(tx) = self.command_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Command::StopAll);
        }
    }

    /// Number of currently active slots.
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().count
    }

    /// Whether a given slot is currently active.
    pub fn is_slot_playing(&self, id: SlotId) -> bool {
        self.active
            .lock()
            .unwrap()
            .active
            .get(id.0 as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Poll until every slot is idle or `timeout_ms` elapses. Returns `true` if idle was reached.
    pub fn wait_all(&self, timeout_ms: u64) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self.active_count() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Poll until one slot is idle or `timeout_ms` elapses. Returns `true` if idle was reached.
    pub fn wait(&self, id: SlotId, timeout_ms: u64) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if !self.is_slot_playing(id) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

/// Body of the dedicated playback timer thread: services every active slot, then blocks on the
/// command channel until the next slot deadline or an explicit command arrives.
fn timer_loop(rx: Receiver<Command>, active: Arc<Mutex<ActiveTable>>, bus: Arc<EventBus>) {
    let mut slots: [Option<RunningSlot>; MAX_SLOTS] = std::array::from_fn(|_| None);

    loop {
        let now = Instant::now();
        for (idx, slot) in slots.iter_mut().enumerate() {
            let Some(running) = slot else { continue };
            if running.deadline > now {
                continue;
            }

            let finished = if running.stop_requested {
                running.flush_all_notes_off();
                true
            } else {
                match running.step() {
                    Some(delay_ms) => {
                        running.deadline = now + Duration::from_millis(delay_ms);
                        running.finished()
                    }
                    None => true,
                }
            };

            if finished {
                let status = if running.stop_requested {
                    PlaybackStatus::Stopped
                } else {
                    PlaybackStatus::Finished
                };
                let _ = bus.push_lang_callback(idx as u8, status);
                *slot = None;
                let mut table = active.lock().unwrap();
                table.active[idx] = false;
                table.count = table.count.saturating_sub(1);
            }
        }

        let next_deadline = slots
            .iter()
            .filter_map(|s| s.as_ref().map(|s| s.deadline))
            .min();
        let timeout = match next_deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::from_secs(3600),
        };

        match rx.recv_timeout(timeout) {
            Ok(Command::Play {
                schedule,
                sink,
                reply,
            }) => {
                let free = slots.iter().position(|s| s.is_none());
                match free {
                    Some(idx) => {
                        let mut running = RunningSlot::new(schedule, sink);
                        running.deadline = Instant::now();
                        slots[idx] = Some(running);
                        {
                            let mut table = active.lock().unwrap();
                            table.active[idx] = true;
                            table.count += 1;
                        }
                        let _ = reply.send(Ok(SlotId(idx as u8)));
                    }
                    None => {
                        let _ = reply.send(Err(PlayError::PoolFull));
                    }
                }
            }
            Ok(Command::Stop(id)) => {
                if let Some(Some(slot)) = slots.get_mut(id.0 as usize) {
                    slot.stop_requested = true;
                    slot.deadline = Instant::now();
                }
            }
            Ok(Command::StopAll) => {
                for slot in slots.iter_mut().flatten() {
                    slot.stop_requested = true;
                    slot.deadline = Instant::now();
                }
            }
            Ok(Command::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                for (idx, slot) in slots.iter_mut().enumerate() {
                    if let Some(running) = slot {
                        running.flush_all_notes_off();
                        let mut table = active.lock().unwrap();
                        table.active[idx] = false;
                        table.count = table.count.saturating_sub(1);
                    }
                    *slot = None;
                }
                return;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Schedule;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Call {
        On(u8, u8, u8),
        Off(u8, u8),
    }

    struct RecordingSink {
        log: Arc<StdMutex<Vec<Call>>>,
    }

    impl Sink for RecordingSink {
        fn send_note_on(&mut self, channel: u8, pitch: u8, velocity: u8) {
            self.log.lock().unwrap().push(Call::On(channel, pitch, velocity));
        }
        fn send_note_off(&mut self, channel: u8, pitch: u8) {
            self.log.lock().unwrap().push(Call::Off(channel, pitch));
        }
        fn send_cc(&mut self, _channel: u8, _cc: u8, _value: u8) {}
        fn send_program(&mut self, _channel: u8, _program: u8) {}
        fn send_panic(&mut self) {}
        fn midi_out_open(&self) -> bool {
            true
        }
    }

    fn note_event(time_ms: u32, dur_ms: u32) -> Event {
        Event {
            tick: 0,
            time_ms,
            kind: EventKind::Note,
            channel: 0,
            data1: 60.0,
            data2: 100,
            duration_ticks: 0,
            duration_ms: dur_ms,
        }
    }

    #[test]
    fn ticks_to_ms_matches_quarter_note_duration() {
        let ms = ticks_to_ms(480, 120.0);
        assert!((ms - 500.0).abs() < 1.0);
    }

    fn tick_event(kind: EventKind, tick: u32, channel: u8, pitch: f32) -> Event {
        Event {
            tick,
            time_ms: 0,
            kind,
            channel,
            data1: pitch,
            data2: 80,
            duration_ticks: 0,
            duration_ms: 0,
        }
    }

    #[test]
    fn s2_tick_round_trip_with_tempo() {
        let engine = PlaybackEngine::new();
        let bus = Arc::new(EventBus::new());
        engine.init(bus);

        let log = Arc::new(StdMutex::new(Vec::new()));
        let schedule = Schedule::new(
            vec![
                tick_event(EventKind::NoteOn, 0, 0, 60.0),
                tick_event(EventKind::NoteOff, 480, 0, 60.0),
            ],
            true,
        )
        .with_tempo(120.0);

        let start = Instant::now();
        let id = engine
            .play(schedule, Box::new(RecordingSink { log: log.clone() }))
            .unwrap();
        assert!(engine.wait(id, 2000));
        let elapsed = start.elapsed().as_millis() as i64;
        assert!((elapsed - 500).abs() <= 100, "elapsed={elapsed}");

        let calls = log.lock().unwrap();
        assert_eq!(calls[0], Call::On(0, 60, 80));
        assert_eq!(*calls.last().unwrap(), Call::Off(0, 60));
        engine.cleanup();
    }

    #[test]
    fn s3_mid_stream_tempo_change_speeds_up_note_off() {
        let engine = PlaybackEngine::new();
        let bus = Arc::new(EventBus::new());
        engine.init(bus);

        let log = Arc::new(StdMutex::new(Vec::new()));
        let mut tempo_change = tick_event(EventKind::Tempo, 240, 0, 240.0);
        tempo_change.data2 = 0;
        let schedule = Schedule::new(
            vec![
                tick_event(EventKind::NoteOn, 0, 0, 60.0),
                tempo_change,
                tick_event(EventKind::NoteOff, 480, 0, 60.0),
            ],
            true,
        )
        .with_tempo(120.0);

        let start = Instant::now();
        let id = engine
            .play(schedule, Box::new(RecordingSink { log: log.clone() }))
            .unwrap();
        assert!(engine.wait(id, 2000));
        let elapsed = start.elapsed().as_millis() as i64;
        assert!((elapsed - 375).abs() <= 60, "elapsed={elapsed}");
        engine.cleanup();
    }

    #[test]
    fn empty_schedule_is_rejected() {
        let engine = PlaybackEngine::new();
        let bus = Arc::new(EventBus::new());
        engine.init(bus);
        let schedule = Schedule::new(vec![], false);
        let log = Arc::new(StdMutex::new(Vec::new()));
        let err = engine
            .play(schedule, Box::new(RecordingSink { log }))
            .unwrap_err();
        assert_eq!(err, PlayError::EmptySchedule);
        engine.cleanup();
    }

    #[test]
    fn s1_ms_note_round_trip() {
        let engine = PlaybackEngine::new();
        let bus = Arc::new(EventBus::new());
        engine.init(bus);

        let log = Arc::new(StdMutex::new(Vec::new()));
        let schedule = Schedule::new(vec![note_event(0, 250)], false);
        let id = engine
            .play(schedule, Box::new(RecordingSink { log: log.clone() }))
            .unwrap();

        assert!(engine.wait(id, 1000));
        let calls = log.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], Call::On(0, 60, 100));
        assert_eq!(calls[1], Call::Off(0, 60));
        engine.cleanup();
    }

    #[test]
    fn s4_stop_clears_held_notes() {
        let engine = PlaybackEngine::new();
        let bus = Arc::new(EventBus::new());
        engine.init(bus);

        let log = Arc::new(StdMutex::new(Vec::new()));
        let schedule = Schedule::new(vec![note_event(0, 5000)], false);
        let id = engine
            .play(schedule, Box::new(RecordingSink { log: log.clone() }))
            .unwrap();

        std::thread::sleep(Duration::from_millis(50));
        engine.stop(id);
        assert!(engine.wait(id, 1000));

        let calls = log.lock().unwrap();
        let ons = calls.iter().filter(|c| matches!(c, Call::On(..))).count();
        let offs = calls.iter().filter(|c| matches!(c, Call::Off(..))).count();
        assert_eq!(ons, 1);
        assert_eq!(offs, 1);
        engine.cleanup();
    }

    #[test]
    fn pool_full_when_all_slots_busy() {
        let engine = PlaybackEngine::new();
        let bus = Arc::new(EventBus::new());
        engine.init(bus);

        let mut ids = Vec::new();
        for _ in 0..MAX_SLOTS {
            let log = Arc::new(StdMutex::new(Vec::new()));
            let schedule = Schedule::new(vec![note_event(0, 5000)], false);
            ids.push(
                engine
                    .play(schedule, Box::new(RecordingSink { log }))
                    .unwrap(),
            );
        }

        let log = Arc::new(StdMutex::new(Vec::new()));
        let schedule = Schedule::new(vec![note_event(0, 10)], false);
        let err = engine
            .play(schedule, Box::new(RecordingSink { log }))
            .unwrap_err();
        assert_eq!(err, PlayError::PoolFull);

        engine.stop_all();
        for id in ids {
            engine.wait(id, 1000);
        }
        engine.cleanup();
    }
}
