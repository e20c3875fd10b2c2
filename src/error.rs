//! Error taxonomy for the runtime
//!
//! Each public operation that can fail returns one of these small enums rather than a single
//! catch-all error type: transient-capacity, invalid-argument and sink-unavailable failures are
//! meaningfully different to a caller and are kept distinguishable at the type level.

/// Failure to start playback of a [`crate::event::Schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayError {
    /// The schedule contained no events.
    EmptySchedule,
    /// The sink reported no usable backend (`midi_out_open`/`tsf_enabled`/`csound_enabled` all false).
    SinkUnavailable,
    /// All [`crate::constants::MAX_SLOTS`] slots are occupied.
    PoolFull,
}

impl std::fmt::Display for PlayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayError::EmptySchedule => write!(f, "schedule has no events"),
            PlayError::SinkUnavailable => write!(f, "sink has no usable backend"),
            PlayError::PoolFull => write!(f, "no free playback slot"),
        }
    }
}

impl std::error::Error for PlayError {}

/// Failure to push an event onto the [`crate::bus::EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The ring is at capacity (one slot kept open).
    Full,
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusError::Full => write!(f, "event bus is full"),
        }
    }
}

impl std::error::Error for BusError {}

/// Failure from a [`crate::tempo::TempoSync`] operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempoError {
    /// `init()` was called while already initialized.
    AlreadyInitialized,
}

impl std::fmt::Display for TempoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TempoError::AlreadyInitialized => write!(f, "tempo sync is already initialized"),
        }
    }
}

impl std::error::Error for TempoError {}

/// Failure from a [`crate::live_loop::LiveLoopRegistry`] operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// `beats` was not strictly positive.
    InvalidInterval,
    /// The registry already holds [`crate::constants::LIVE_LOOP_MAX`] entries.
    Full,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::InvalidInterval => write!(f, "beats must be > 0"),
            RegistryError::Full => write!(f, "live loop registry is full"),
        }
    }
}

impl std::error::Error for RegistryError {}
