//! Language interpreter boundary
//!
//! Every embedded language backend (and the callback script runtime that rides alongside it)
//! sits behind this trait. The runtime only ever calls `eval`/`eval_buffer`/`stop_all` and reads
//! status back; it never parses or type-checks source itself.

use crate::dispatch::{CallbackRuntime, DispatchContext};
use crate::engine::PlaybackStatus;

/// Outcome of an evaluation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalStatus {
    /// Evaluation completed and any resulting schedule was handed to the engine.
    Ok,
    /// Evaluation failed; call `get_error` for details.
    Error,
    /// Nothing was evaluated because no buffer/source was available.
    Empty,
}

/// A language backend, e.g. a Lua/Tidal-style live-coding interpreter or the bundled callback
/// script runtime.
///
/// Implementations are not required to be thread-safe beyond the single-threaded access the
/// runtime gives them: `eval`/`eval_buffer`/`stop_all` are only ever called from the main thread,
/// while [`notify_playback_complete`](Interpreter::notify_playback_complete) arrives during
/// [`crate::bus::EventBus::dispatch_all`], also main-thread.
pub trait Interpreter {
    /// One-time setup. Called at most once before any other method.
    fn init(&mut self, ctx: &mut DispatchContext<'_>);
    /// Tear down interpreter-owned resources. Idempotent.
    fn cleanup(&mut self, ctx: &mut DispatchContext<'_>);
    /// Whether `init` has completed successfully.
    fn is_initialized(&self) -> bool;
    /// Evaluate a source string.
    fn eval(&mut self, ctx: &mut DispatchContext<'_>, source: &str) -> EvalStatus;
    /// Evaluate whatever buffer is currently selected in the host editor.
    fn eval_buffer(&mut self, ctx: &mut DispatchContext<'_>) -> EvalStatus;
    /// Stop everything this interpreter has scheduled.
    fn stop_all(&mut self, ctx: &mut DispatchContext<'_>);
    /// Whether this interpreter currently has an active playback slot.
    fn is_playing(&self) -> bool;
    /// Last error message, if the previous `eval*` call returned [`EvalStatus::Error`].
    fn get_error(&self) -> Option<&str>;
    /// Called when a slot this interpreter started finishes, whether by running out or by an
    /// explicit stop. Takes the callback runtime rather than a full [`DispatchContext`] since the
    /// caller already holds the interpreter itself mutably borrowed as `self`.
    fn notify_playback_complete(
        &mut self,
        callbacks: &mut dyn CallbackRuntime,
        slot_id: u8,
        status: PlaybackStatus,
    );
    /// Apply a backend-specific configuration string. Most interpreters have nothing to
    /// configure and can use the default no-op.
    fn configure_backend(&mut self, _key: &str, _value: &str) -> bool {
        false
    }
}

/// An interpreter registered by name, for hosts that support more than one language.
pub struct InterpreterRegistration {
    /// Display name, e.g. `"lua"`.
    pub name: &'static str,
    /// File extensions this interpreter claims, without the leading dot.
    pub extensions: &'static [&'static str],
}

/// No-op interpreter used in tests and as a placeholder before a real backend is wired in.
pub struct NullInterpreter;

impl Interpreter for NullInterpreter {
    fn init(&mut self, _ctx: &mut DispatchContext<'_>) {}
    fn cleanup(&mut self, _ctx: &mut DispatchContext<'_>) {}
    fn is_initialized(&self) -> bool {
        true
    }
    fn eval(&mut self, _ctx: &mut DispatchContext<'_>, _source: &str) -> EvalStatus {
        EvalStatus::Empty
    }
    fn eval_buffer(&mut self, _ctx: &mut DispatchContext<'_>) -> EvalStatus {
        EvalStatus::Empty
    }
    fn stop_all(&mut self, _ctx: &mut DispatchContext<'_>) {}
    fn is_playing(&self) -> bool {
        false
    }
    fn get_error(&self) -> Option<&str> {
        None
    }
    fn notify_playback_complete(
        &mut self,
        _callbacks: &mut dyn CallbackRuntime,
        _slot_id: u8,
        _status: PlaybackStatus,
    ) {
    }
}
