//! Audio/MIDI output endpoints
//!
//! A [Sink] is the collaborator the [`crate::engine::PlaybackEngine`] renders events into; it is
//! the same seam the existing MIDI playback path used (`midir` for the port, `midly` to encode
//! raw bytes), generalized into a trait so the engine never depends on a concrete backend.

use std::collections::HashSet;

use midir::MidiOutputConnection;
use midly::live::LiveEvent;
use midly::{MidiMessage, num::u7};

/// Rendering backend for scheduled events.
///
/// Channel numbering here is 0..15; interpreters using 1..16 must translate before building a
/// [`crate::event::Schedule`].
pub trait Sink: Send {
    /// Start a note.
    fn send_note_on(&mut self, channel: u8, pitch: u8, velocity: u8);
    /// Stop a note.
    fn send_note_off(&mut self, channel: u8, pitch: u8);
    /// Send a control-change message.
    fn send_cc(&mut self, channel: u8, cc: u8, value: u8);
    /// Send a program-change message.
    fn send_program(&mut self, channel: u8, program: u8);
    /// Send a note-off for every `(channel, pitch)` this sink currently considers on.
    fn send_panic(&mut self);
    /// Whether a MIDI output port is open.
    fn midi_out_open(&self) -> bool {
        false
    }
    /// Whether a built-in synth is enabled.
    fn tsf_enabled(&self) -> bool {
        false
    }
    /// Whether a Csound backend is enabled.
    fn csound_enabled(&self) -> bool {
        false
    }
}

/// A sink backed by a real MIDI output port.
///
/// Encodes messages exactly as the existing playback path does: build a [`LiveEvent`], write it
/// into a scratch buffer, send the raw bytes down the connection.
pub struct MidiSink {
    /// Open MIDI output port.
    connection: MidiOutputConnection,
    /// Notes currently sounding, for `send_panic`.
    held: HashSet<(u8, u8)>,
    /// Reused encode buffer.
    buf: Vec<u8>,
}

impl MidiSink {
    /// Wrap an already-open MIDI output connection.
    pub fn new(connection: MidiOutputConnection) -> Self {
        Self {
            connection,
            held: HashSet::new(),
            buf: Vec::with_capacity(8),
        }
    }

    /// Encode `event` into the scratch buffer and send it.
    fn write(&mut self, event: LiveEvent<'_>) {
        self.buf.clear();
        if event.write(&mut self.buf).is_ok() {
            if let Err(err) = self.connection.send(&self.buf) {
                tracing::warn!("failed to send midi message: {err}");
            }
        }
    }
}

impl Sink for MidiSink {
    fn send_note_on(&mut self, channel: u8, pitch: u8, velocity: u8) {
        self.held.insert((channel, pitch));
        self.write(LiveEvent::Midi {
            channel: channel.into(),
            message: MidiMessage::NoteOn {
                key: pitch.into(),
                vel: u7::from(velocity.min(127)),
            },
        });
    }

    fn send_note_off(&mut self, channel: u8, pitch: u8) {
        self.held.remove(&(channel, pitch));
        self.write(LiveEvent::Midi {
            channel: channel.into(),
            message: MidiMessage::NoteOff {
                key: pitch.into(),
                vel: 0.into(),
            },
        });
    }

    fn send_cc(&mut self, channel: u8, cc: u8, value: u8) {
        self.write(LiveEvent::Midi {
            channel: channel.into(),
            message: MidiMessage::Controller {
                controller: cc.into(),
                value: u7::from(value.min(127)),
            },
        });
    }

    fn send_program(&mut self, channel: u8, program: u8) {
        self.write(LiveEvent::Midi {
            channel: channel.into(),
            message: MidiMessage::ProgramChange {
                program: program.into(),
            },
        });
    }

    fn send_panic(&mut self) {
        for (channel, pitch) in std::mem::take(&mut self.held) {
            self.write(LiveEvent::Midi {
                channel: channel.into(),
                message: MidiMessage::NoteOff {
                    key: pitch.into(),
                    vel: 0.into(),
                },
            });
        }
    }

    fn midi_out_open(&self) -> bool {
        true
    }
}

/// A sink that discards everything; used for dry runs and tests.
#[derive(Default)]
pub struct NullSink;

impl Sink for NullSink {
    fn send_note_on(&mut self, _channel: u8, _pitch: u8, _velocity: u8) {}
    fn send_note_off(&mut self, _channel: u8, _pitch: u8) {}
    fn send_cc(&mut self, _channel: u8, _cc: u8, _value: u8) {}
    fn send_program(&mut self, _channel: u8, _program: u8) {}
    fn send_panic(&mut self) {}
    fn midi_out_open(&self) -> bool {
        true
    }
}
