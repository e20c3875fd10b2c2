//! Bus-to-collaborator wiring
//!
//! [`DispatchContext`] is the bundle of borrowed collaborators a [`crate::bus::EventBus`] handler
//! needs for the duration of one [`crate::bus::EventBus::dispatch_all`] call. [`Dispatcher`]
//! owns the default handler set described for the bus: it knows which [`crate::bus::BusEvent`]
//! kind goes where, but never touches the collaborators itself outside of a dispatch call.

use std::sync::Arc;

use crate::bus::{BusEvent, EventBus, EventKindTag};
use crate::engine::PlaybackStatus;
use crate::interpreter::Interpreter;
use crate::tempo::TempoSync;

/// Invocation surface for the callback script runtime that rides alongside an interpreter.
pub trait CallbackRuntime {
    /// Register a callback under a name so later `invoke_*` calls can find it.
    fn register_named_callback(&mut self, name: &str);
    /// Invoke a callback registered for playback completion.
    fn invoke_completion(&mut self, slot_id: u8, status: PlaybackStatus);
    /// Invoke a callback registered for a network peer-count change.
    fn invoke_peers_changed(&mut self, count: u64);
    /// Invoke a callback registered for a network tempo change.
    fn invoke_tempo_changed(&mut self, bpm: f64);
    /// Invoke a callback registered for a beat-interval boundary.
    fn invoke_beat_boundary(&mut self, beat: f64, buffer_id: u32);
}

/// No-op callback runtime used in tests and before a real backend is wired in.
pub struct NullCallbackRuntime;

impl CallbackRuntime for NullCallbackRuntime {
    fn register_named_callback(&mut self, _name: &str) {}
    fn invoke_completion(&mut self, _slot_id: u8, _status: PlaybackStatus) {}
    fn invoke_peers_changed(&mut self, _count: u64) {}
    fn invoke_tempo_changed(&mut self, _bpm: f64) {}
    fn invoke_beat_boundary(&mut self, _beat: f64, _buffer_id: u32) {}
}

/// Resolves a buffer identifier (as carried on [`BusEvent::BeatBoundary`]) to the interpreter
/// context needed to re-evaluate it. A missing buffer (the host closed it since the loop was
/// armed) is not an error: the boundary is simply dropped.
pub trait BufferLookup {
    /// Whether `buffer_id` still refers to a live buffer.
    fn contains(&self, buffer_id: u32) -> bool;
}

/// `BufferLookup` that reports every id as gone; used in tests.
pub struct NullBufferLookup;

impl BufferLookup for NullBufferLookup {
    fn contains(&self, _buffer_id: u32) -> bool {
        false
    }
}

/// Borrowed collaborators available to a handler during one dispatch call.
pub struct DispatchContext<'a> {
    /// The active language backend.
    pub interpreter: &'a mut dyn Interpreter,
    /// The active callback script runtime.
    pub callbacks: &'a mut dyn CallbackRuntime,
    /// Network tempo state.
    pub tempo: &'a TempoSync,
    /// Live buffer lookup, for beat-boundary re-evaluation.
    pub buffers: &'a dyn BufferLookup,
}

/// Owns the bus and installs the default handler for every [`EventKindTag`].
pub struct Dispatcher {
    /// The bus this dispatcher drains on every `dispatch` call.
    bus: Arc<EventBus>,
}

impl Dispatcher {
    /// Wire up default handlers on `bus`. `tempo` is only used to decide whether transport sync
    /// is meaningful to log; the handlers themselves read tempo state from the context passed to
    /// each `dispatch` call.
    pub fn new(bus: Arc<EventBus>, _tempo: &Arc<TempoSync>) -> Self {
        bus.set_handler(
            EventKindTag::LangCallback,
            Box::new(|ctx, event| {
                if let BusEvent::LangCallback { slot_id, status } = event {
                    ctx.interpreter
                        .notify_playback_complete(ctx.callbacks, *slot_id, *status);
                    ctx.callbacks.invoke_completion(*slot_id, *status);
                }
            }),
        );
        bus.set_handler(
            EventKindTag::LinkPeers,
            Box::new(|ctx, event| {
                if let BusEvent::LinkPeers { count } = event {
                    ctx.tempo.check_callbacks();
                    ctx.callbacks.invoke_peers_changed(*count);
                }
            }),
        );
        bus.set_handler(
            EventKindTag::LinkTempo,
            Box::new(|ctx, event| {
                if let BusEvent::LinkTempo { bpm } = event {
                    ctx.tempo.check_callbacks();
                    ctx.callbacks.invoke_tempo_changed(*bpm);
                }
            }),
        );
        bus.set_handler(
            EventKindTag::LinkTransport,
            Box::new(|ctx, _event| {
                ctx.tempo.check_callbacks();
            }),
        );
        bus.set_handler(
            EventKindTag::BeatBoundary,
            Box::new(|ctx, event| {
                if let BusEvent::BeatBoundary {
                    beat, buffer_id, ..
                } = event
                {
                    // The owning loop entry is reaped by `LiveLoopRegistry::tick` itself; this
                    // guard only covers the race where the buffer closed between that tick and
                    // this drain.
                    if ctx.buffers.contains(*buffer_id) {
                        ctx.callbacks.invoke_beat_boundary(*beat, *buffer_id);
                    }
                }
            }),
        );
        // `Timer` and `Custom` have no default handler: a host registers its own via
        // `bus.set_handler` for the kinds it actually uses, and unhandled events are dropped
        // silently by `dispatch_all`.

        Self { bus }
    }

    /// Drain the bus once against a freshly borrowed context.
    pub fn dispatch(
        &self,
        interpreter: &mut dyn Interpreter,
        callbacks: &mut dyn CallbackRuntime,
        tempo: &TempoSync,
        buffers: &dyn BufferLookup,
    ) -> usize {
        let mut ctx = DispatchContext {
            interpreter,
            callbacks,
            tempo,
            buffers,
        };
        self.bus.dispatch_all(&mut ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::NullInterpreter;

    #[test]
    fn beat_boundary_dropped_when_buffer_gone() {
        let bus = Arc::new(EventBus::new());
        let tempo = Arc::new(TempoSync::new());
        let dispatcher = Dispatcher::new(bus.clone(), &tempo);

        bus.push_beat(1.0, 4.0, 7).unwrap();

        let mut interpreter = NullInterpreter;
        let mut callbacks = NullCallbackRuntime;
        let buffers = NullBufferLookup;
        let n = dispatcher.dispatch(&mut interpreter, &mut callbacks, &tempo, &buffers);
        assert_eq!(n, 1);
    }

    #[test]
    fn lang_callback_notifies_interpreter() {
        let bus = Arc::new(EventBus::new());
        let tempo = Arc::new(TempoSync::new());
        let dispatcher = Dispatcher::new(bus.clone(), &tempo);

        bus.push_lang_callback(3, PlaybackStatus::Finished).unwrap();

        let mut interpreter = NullInterpreter;
        let mut callbacks = NullCallbackRuntime;
        let buffers = NullBufferLookup;
        let n = dispatcher.dispatch(&mut interpreter, &mut callbacks, &tempo, &buffers);
        assert_eq!(n, 1);
    }
}
