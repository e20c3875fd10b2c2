//! Top-level runtime host
//!
//! Owns one instance each of the four collaborators and wires them together in the order they
//! depend on each other: bus first (everything else pushes into it), then tempo and the playback
//! engine (both push into the bus), then the live-loop registry and dispatcher (both read from
//! the other two). Teardown runs in the reverse order.

use std::sync::Arc;

use crate::bus::EventBus;
use crate::dispatch::Dispatcher;
use crate::engine::PlaybackEngine;
use crate::live_loop::LiveLoopRegistry;
use crate::tempo::TempoSync;

/// Holds every long-lived collaborator a host needs to drive one playback session.
pub struct Runtime {
    /// Cross-thread event bus.
    pub bus: Arc<EventBus>,
    /// Network tempo synchronization.
    pub tempo: Arc<TempoSync>,
    /// Playback engine.
    pub engine: Arc<PlaybackEngine>,
    /// Live-loop scheduler.
    pub live_loops: Arc<LiveLoopRegistry>,
    /// Bus-to-collaborator dispatcher.
    pub dispatcher: Dispatcher,
}

impl Runtime {
    /// Construct every collaborator and start the playback engine's timer thread. Network
    /// synchronization is left disabled until [`Runtime::enable_tempo_sync`] is called.
    pub fn new() -> Self {
        let bus = Arc::new(EventBus::new());
        let tempo = Arc::new(TempoSync::new());
        let engine = Arc::new(PlaybackEngine::new());
        engine.init(bus.clone());
        let live_loops = Arc::new(LiveLoopRegistry::new(tempo.clone(), bus.clone()));
        let dispatcher = Dispatcher::new(bus.clone(), &tempo);

        Self {
            bus,
            tempo,
            engine,
            live_loops,
            dispatcher,
        }
    }

    /// Bring network tempo synchronization online at `initial_bpm`.
    pub fn enable_tempo_sync(&self, initial_bpm: f64) -> Result<(), crate::error::TempoError> {
        self.tempo.init(initial_bpm, self.bus.clone())
    }

    /// Drain the bus once against the registered interpreter/callback/buffer collaborators, and
    /// check live loops for crossed beat boundaries (reaping any whose buffer has since closed).
    pub fn poll(
        &self,
        interpreter: &mut dyn crate::interpreter::Interpreter,
        callbacks: &mut dyn crate::dispatch::CallbackRuntime,
        buffers: &dyn crate::dispatch::BufferLookup,
    ) -> usize {
        self.live_loops.tick(buffers);
        self.dispatcher
            .dispatch(interpreter, callbacks, &self.tempo, buffers)
    }

    /// Tear down in reverse construction order: live loops, tempo sync, then the engine's timer
    /// thread.
    pub fn shutdown(&self) {
        self.live_loops.shutdown();
        self.tempo.cleanup();
        self.engine.stop_all();
        self.engine.wait_all(2000);
        self.engine.cleanup();
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
