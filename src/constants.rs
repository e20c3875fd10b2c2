//! Observable size limits of the runtime
//!
//! These are the process-wide constants referenced throughout the other modules; they are kept
//! in one place so that the fixed-size pools and arrays documented alongside each type stay
//! consistent with each other.

/// Number of concurrent playback reservations the [`crate::engine::PlaybackEngine`] supports.
pub const MAX_SLOTS: usize = 8;

/// Maximum number of simultaneously held notes tracked per slot for automatic note-off.
pub const MAX_ACTIVE_NOTES: usize = 128;

/// Number of ticks in one quarter note.
pub const TICKS_PER_QUARTER: u32 = 480;

/// Default tempo, in BPM, for a schedule that does not specify one.
pub const DEFAULT_TEMPO: f32 = 120.0;

/// Capacity of the cross-thread event ring, kept as a power of two.
pub const BUS_CAPACITY: usize = 256;

/// Number of per-kind handler slots [`crate::bus::EventBus`] can hold.
pub const MAX_HANDLERS: usize = 16;

/// Size in bytes of a [`crate::bus::BusEvent::Custom`] tag, including the trailing NUL.
pub const CUSTOM_TAG_SIZE: usize = 16;

/// Maximum number of simultaneously registered live loops.
pub const LIVE_LOOP_MAX: usize = 32;

/// Lower bound of the tempo range accepted by [`crate::tempo::TempoSync`].
pub const MIN_TEMPO: f64 = 20.0;

/// Upper bound of the tempo range accepted by [`crate::tempo::TempoSync`].
pub const MAX_TEMPO: f64 = 999.0;

/// Default beat quantum used when a caller passes a non-positive quantum.
pub const DEFAULT_QUANTUM: f64 = 4.0;
