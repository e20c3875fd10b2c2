//! Network tempo synchronization
//!
//! Wraps the vendored Ableton Link binding ([`rusty_link`]) the same way the existing playback
//! path and terminal playground already do: construct an [`AblLink`], enable it, and read/write
//! shared state through a scratch [`SessionState`] captured per call. This module adds the
//! subscriber/change-flag machinery the distilled spec asks for on top of that binding.

use std::sync::{Arc, Mutex};

use rusty_link::{AblLink, SessionState};

use crate::bus::EventBus;
use crate::constants::{DEFAULT_QUANTUM, MAX_TEMPO, MIN_TEMPO};
use crate::error::TempoError;

/// A subscriber callback, boxed so it can be stored and invoked without generics leaking into
/// [`TempoSync`]'s public API.
type PeersCallback = Box<dyn FnMut(u64) + Send>;
type TempoCallback = Box<dyn FnMut(f64) + Send>;
type TransportCallback = Box<dyn FnMut(bool) + Send>;

/// Values captured by the network callbacks, read and cleared by [`TempoSync::check_callbacks`].
#[derive(Default)]
struct PendingState {
    /// A peers callback has fired since the last check.
    peers_pending: bool,
    /// A tempo callback has fired since the last check.
    tempo_pending: bool,
    /// A transport callback has fired since the last check.
    transport_pending: bool,
    /// Peer count from the most recent callback.
    peers_value: u64,
    /// Tempo from the most recent callback.
    tempo_value: f64,
    /// Transport state from the most recent callback.
    transport_value: bool,
    /// Peer count as of the last `check_callbacks` call.
    last_peers: u64,
    /// Tempo as of the last `check_callbacks` call.
    last_tempo: f64,
    /// Transport state as of the last `check_callbacks` call.
    last_transport: bool,
}

/// Subscriber closures installed via `set_*_callback`.
#[derive(Default)]
struct Subscribers {
    /// Peers-changed subscriber.
    peers: Option<PeersCallback>,
    /// Tempo-changed subscriber.
    tempo: Option<TempoCallback>,
    /// Transport-changed subscriber.
    transport: Option<TransportCallback>,
}

/// Process-wide singleton providing a view of the network-shared beat clock.
///
/// Network callbacks (fired from the Link binding's own callback thread) only acquire the inner
/// mutex, record pending state, and push a [`crate::bus::BusEvent`]; subscriber invocation happens
/// exclusively via [`TempoSync::check_callbacks`] on the main thread.
pub struct TempoSync {
    /// The network session, `None` before `init()`/after `cleanup()`.
    link: Mutex<Option<Arc<AblLink>>>,
    /// State captured by network callbacks, drained by `check_callbacks`.
    pending: Arc<Mutex<PendingState>>,
    /// User-installed change subscribers.
    subscribers: Mutex<Subscribers>,
    /// Cached transport-sync setting, readable without the session lock.
    start_stop_sync: Mutex<bool>,
}

impl Default for TempoSync {
    fn default() -> Self {
        Self::new()
    }
}

impl TempoSync {
    /// Construct an uninitialized instance. Every accessor on an uninitialized `TempoSync`
    /// returns a benign default per §7's "Uninitialized" taxonomy entry.
    pub fn new() -> Self {
        Self {
            link: Mutex::new(None),
            pending: Arc::new(Mutex::new(PendingState::default())),
            subscribers: Mutex::new(Subscribers::default()),
            start_stop_sync: Mutex::new(false),
        }
    }

    /// Create the network session and register internal callbacks. Fails if already
    /// initialized. `initial_bpm` is clamped to `[20.0, 999.0]`.
    pub fn init(&self, initial_bpm: f64, bus: Arc<EventBus>) -> Result<(), TempoError> {
        let mut slot = self.link.lock().unwrap();
        if slot.is_some() {
            return Err(TempoError::AlreadyInitialized);
        }

        let link = Arc::new(AblLink::new(clamp_tempo(initial_bpm)));

        {
            let pending = self.pending.clone();
            let bus = bus.clone();
            link.set_num_peers_callback(move |count| {
                let mut p = pending.lock().unwrap();
                p.peers_pending = true;
                p.peers_value = count as u64;
                drop(p);
                let _ = bus.push_link_peers(count as u64);
            });
        }
        {
            let pending = self.pending.clone();
            let bus = bus.clone();
            link.set_tempo_callback(move |bpm| {
                let mut p = pending.lock().unwrap();
                p.tempo_pending = true;
                p.tempo_value = bpm;
                drop(p);
                let _ = bus.push_link_tempo(bpm);
            });
        }
        {
            let pending = self.pending.clone();
            link.set_start_stop_callback(move |playing| {
                let mut p = pending.lock().unwrap();
                p.transport_pending = true;
                p.transport_value = playing;
                drop(p);
                let _ = bus.push_link_transport(playing);
            });
        }

        link.enable(true);
        *slot = Some(link);
        Ok(())
    }

    /// Disable networking, drop the session, and clear subscribers.
    pub fn cleanup(&self) {
        if let Some(link) = self.link.lock().unwrap().take() {
            link.enable(false);
        }
        *self.subscribers.lock().unwrap() = Subscribers::default();
    }

    /// Enable or disable network participation.
    pub fn enable(&self, enabled: bool) {
        if let Some(link) = self.link.lock().unwrap().as_ref() {
            link.enable(enabled);
        }
    }

    /// Whether network participation is enabled.
    pub fn is_enabled(&self) -> bool {
        self.link
            .lock()
            .unwrap()
            .as_ref()
            .map(|l| l.is_enabled())
            .unwrap_or(false)
    }

    /// Enable or disable transport (play/stop) synchronization with peers.
    pub fn enable_start_stop_sync(&self, enabled: bool) {
        *self.start_stop_sync.lock().unwrap() = enabled;
        if let Some(link) = self.link.lock().unwrap().as_ref() {
            link.enable_start_stop_sync(enabled);
        }
    }

    /// Whether transport synchronization is enabled.
    pub fn is_start_stop_sync_enabled(&self) -> bool {
        *self.start_stop_sync.lock().unwrap()
    }

    /// Current shared tempo, or `0.0` if uninitialized.
    pub fn get_tempo(&self) -> f64 {
        self.with_session_state(|state| state.tempo()).unwrap_or(0.0)
    }

    /// Propagate a new shared tempo, clamped to `[20.0, 999.0]`.
    pub fn set_tempo(&self, bpm: f64) {
        let bpm = clamp_tempo(bpm);
        let Some(link) = self.link.lock().unwrap().clone() else {
            return;
        };
        let mut state = SessionState::new();
        link.capture_app_session_state(&mut state);
        state.set_tempo(bpm, link.clock_micros());
        link.commit_app_session_state(&state);
    }

    /// `get_tempo()` when initialized and enabled, otherwise `fallback`.
    pub fn effective_tempo(&self, fallback: f64) -> f64 {
        if self.is_initialized() && self.is_enabled() {
            self.get_tempo()
        } else {
            fallback
        }
    }

    /// Beat position at the current network time for the given quantum. Non-positive `quantum`
    /// is replaced with the default of 4.
    pub fn get_beat(&self, quantum: f64) -> f64 {
        let quantum = normalize_quantum(quantum);
        self.with_link_and_state(|link, state| state.beat_at_time(link.clock_micros(), quantum))
            .unwrap_or(0.0)
    }

    /// Phase within the given quantum at the current network time.
    pub fn get_phase(&self, quantum: f64) -> f64 {
        let quantum = normalize_quantum(quantum);
        self.with_link_and_state(|link, state| state.phase_at_time(link.clock_micros(), quantum))
            .unwrap_or(0.0)
    }

    /// Whether the shared transport is playing.
    pub fn is_playing(&self) -> bool {
        self.with_session_state(|state| state.is_playing())
            .unwrap_or(false)
    }

    /// Propagate a transport start/stop.
    pub fn set_playing(&self, playing: bool) {
        let Some(link) = self.link.lock().unwrap().clone() else {
            return;
        };
        let mut state = SessionState::new();
        link.capture_app_session_state(&mut state);
        state.set_is_playing(playing, link.clock_micros());
        link.commit_app_session_state(&state);
    }

    /// Number of peers currently visible on the network.
    pub fn num_peers(&self) -> u64 {
        self.link
            .lock()
            .unwrap()
            .as_ref()
            .map(|l| l.num_peers())
            .unwrap_or(0)
    }

    /// Install the peers-changed subscriber.
    pub fn set_peers_callback(&self, cb: impl FnMut(u64) + Send + 'static) {
        self.subscribers.lock().unwrap().peers = Some(Box::new(cb));
    }

    /// Install the tempo-changed subscriber.
    pub fn set_tempo_callback(&self, cb: impl FnMut(f64) + Send + 'static) {
        self.subscribers.lock().unwrap().tempo = Some(Box::new(cb));
    }

    /// Install the transport-changed subscriber.
    pub fn set_transport_callback(&self, cb: impl FnMut(bool) + Send + 'static) {
        self.subscribers.lock().unwrap().transport = Some(Box::new(cb));
    }

    /// Main-thread-only: for each pending flag, capture the value under the lock, clear the
    /// flag, release the lock, then invoke the subscriber (if any) outside the lock.
    pub fn check_callbacks(&self) {
        let peers = {
            let mut p = self.pending.lock().unwrap();
            if p.peers_pending {
                p.peers_pending = false;
                p.last_peers = p.peers_value;
                Some(p.peers_value)
            } else {
                None
            }
        };
        if let Some(count) = peers {
            if let Some(cb) = self.subscribers.lock().unwrap().peers.as_mut() {
                cb(count);
            }
        }

        let tempo = {
            let mut p = self.pending.lock().unwrap();
            if p.tempo_pending {
                p.tempo_pending = false;
                p.last_tempo = p.tempo_value;
                Some(p.tempo_value)
            } else {
                None
            }
        };
        if let Some(bpm) = tempo {
            if let Some(cb) = self.subscribers.lock().unwrap().tempo.as_mut() {
                cb(bpm);
            }
        }

        let transport = {
            let mut p = self.pending.lock().unwrap();
            if p.transport_pending {
                p.transport_pending = false;
                p.last_transport = p.transport_value;
                Some(p.transport_value)
            } else {
                None
            }
        };
        if let Some(playing) = transport {
            if let Some(cb) = self.subscribers.lock().unwrap().transport.as_mut() {
                cb(playing);
            }
        }
    }

    /// Whether `init()` has succeeded and `cleanup()` hasn't run since.
    fn is_initialized(&self) -> bool {
        self.link.lock().unwrap().is_some()
    }

    /// Capture a scratch session state and run `f` against it, or `None` if uninitialized.
    fn with_session_state<T>(&self, f: impl FnOnce(&SessionState) -> T) -> Option<T> {
        self.with_link_and_state(|_, state| f(state))
    }

    /// Capture a scratch session state and run `f` against both it and the link handle, or
    /// `None` if uninitialized.
    fn with_link_and_state<T>(&self, f: impl FnOnce(&Arc<AblLink>, &SessionState) -> T) -> Option<T> {
        let link = self.link.lock().unwrap().clone()?;
        let mut state = SessionState::new();
        link.capture_app_session_state(&mut state);
        Some(f(&link, &state))
    }
}

/// Clamp a tempo request to `[MIN_TEMPO, MAX_TEMPO]`.
fn clamp_tempo(bpm: f64) -> f64 {
    bpm.clamp(MIN_TEMPO, MAX_TEMPO)
}

/// Replace a non-positive quantum with [`DEFAULT_QUANTUM`].
fn normalize_quantum(quantum: f64) -> f64 {
    if quantum <= 0.0 {
        DEFAULT_QUANTUM
    } else {
        quantum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninitialized_effective_tempo_returns_fallback() {
        let tempo = TempoSync::new();
        assert_eq!(tempo.effective_tempo(140.0), 140.0);
        assert_eq!(tempo.get_beat(4.0), 0.0);
        assert!(!tempo.is_playing());
        assert_eq!(tempo.num_peers(), 0);
    }

    #[test]
    fn clamp_tempo_respects_bounds() {
        assert_eq!(clamp_tempo(5.0), MIN_TEMPO);
        assert_eq!(clamp_tempo(5000.0), MAX_TEMPO);
        assert_eq!(clamp_tempo(120.0), 120.0);
    }

    #[test]
    fn normalize_quantum_substitutes_default() {
        assert_eq!(normalize_quantum(0.0), DEFAULT_QUANTUM);
        assert_eq!(normalize_quantum(-1.0), DEFAULT_QUANTUM);
        assert_eq!(normalize_quantum(2.0), 2.0);
    }
}
