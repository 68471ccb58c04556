//! MIDI utilities and message types
//!
//! Provides the subset of MIDI the Avantis dialect uses (Note, Control Change,
//! Program Change, SysEx), their encodings, and a streaming parser that turns
//! arbitrary TCP chunks back into messages.

use std::fmt;
use thiserror::Error;

/// SysEx frames longer than this are treated as garbage.
///
/// The longest reply the console sends is a name reply (8 header bytes, three
/// addressing bytes, eight characters and the terminator).
pub const MAX_SYSEX_LEN: usize = 128;

/// MIDI message types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },

    /// Note On: channel (0-15), note (0-127), velocity (0-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },

    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },

    /// Program Change: channel (0-15), program (0-127)
    ProgramChange { channel: u8, program: u8 },

    /// System Exclusive, without the F0/F7 framing bytes
    SysEx { data: Vec<u8> },
}

impl MidiMessage {
    /// Parse a complete MIDI message from raw bytes (status byte first)
    ///
    /// Returns `None` for incomplete input and for message families the
    /// console never sends (pressure, pitch bend, system common).
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;

        if status < 0x80 {
            return None;
        }

        if status == 0xF0 {
            let end = rest.iter().position(|&b| b == 0xF7)?;
            return Some(MidiMessage::SysEx {
                data: rest[..end].to_vec(),
            });
        }

        let channel = status & 0x0F;
        match status & 0xF0 {
            0x80 if rest.len() >= 2 => Some(MidiMessage::NoteOff {
                channel,
                note: rest[0] & 0x7F,
                velocity: rest[1] & 0x7F,
            }),
            0x90 if rest.len() >= 2 => {
                let note = rest[0] & 0x7F;
                let velocity = rest[1] & 0x7F;
                // Note On with velocity 0 is a Note Off
                if velocity == 0 {
                    Some(MidiMessage::NoteOff { channel, note, velocity: 0 })
                } else {
                    Some(MidiMessage::NoteOn { channel, note, velocity })
                }
            }
            0xB0 if rest.len() >= 2 => Some(MidiMessage::ControlChange {
                channel,
                cc: rest[0] & 0x7F,
                value: rest[1] & 0x7F,
            }),
            0xC0 if !rest.is_empty() => Some(MidiMessage::ProgramChange {
                channel,
                program: rest[0] & 0x7F,
            }),
            _ => None,
        }
    }

    /// Encode the message to MIDI bytes
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                vec![0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                vec![0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                vec![0xB0 | (channel & 0x0F), cc & 0x7F, value & 0x7F]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
            MidiMessage::SysEx { ref data } => {
                let mut result = Vec::with_capacity(data.len() + 2);
                result.push(0xF0);
                result.extend_from_slice(data);
                result.push(0xF7);
                result
            }
        }
    }

    /// Get the channel for channel messages (0-15), None for SysEx
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOff { channel, .. }
            | MidiMessage::NoteOn { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. } => Some(channel),
            MidiMessage::SysEx { .. } => None,
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                write!(f, "NoteOff ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "ProgramChange ch:{} p:{}", channel + 1, program)
            }
            MidiMessage::SysEx { ref data } => {
                write!(f, "SysEx {} bytes", data.len())
            }
        }
    }
}

/// A frame the stream parser had to throw away
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// A status byte arrived before the SysEx terminator
    #[error("SysEx interrupted by status byte 0x{status:02X} after {len} bytes")]
    UnterminatedSysEx { status: u8, len: usize },

    /// The SysEx body grew past `MAX_SYSEX_LEN`
    #[error("SysEx exceeds {max} bytes without a terminator")]
    SysExOverflow { max: usize },

    /// A SysEx body too short for the vendor addressing bytes
    #[error("SysEx body of {len} bytes is too short")]
    ShortSysEx { len: usize },

    /// A data byte arrived with no status to attach it to
    #[error("data byte 0x{byte:02X} without running status")]
    OrphanData { byte: u8 },
}

/// Incremental MIDI parser for byte streams
///
/// TCP delivers chunks that need not line up with message boundaries, so the
/// parser keeps partial messages and running status between calls to
/// [`MidiStreamParser::feed`].
#[derive(Debug, Default)]
pub struct MidiStreamParser {
    running_status: Option<u8>,
    pending: Vec<u8>,
    sysex: Option<Vec<u8>>,
    /// Drop data bytes until the next status byte
    skipping: bool,
}

impl MidiStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget partial frames and running status (used after a reconnect)
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feed a chunk and collect every message it completes
    ///
    /// Framing errors are reported in order alongside the messages; the
    /// parser always resynchronizes on the next status byte.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<MidiMessage, FramingError>> {
        let mut out = Vec::new();
        for &byte in chunk {
            self.push(byte, &mut out);
        }
        out
    }

    fn push(&mut self, byte: u8, out: &mut Vec<Result<MidiMessage, FramingError>>) {
        // Realtime bytes may appear anywhere, even inside SysEx
        if byte >= 0xF8 {
            return;
        }

        if let Some(buf) = self.sysex.as_mut() {
            if byte == 0xF7 {
                let data = std::mem::take(buf);
                self.sysex = None;
                out.push(Ok(MidiMessage::SysEx { data }));
                return;
            }
            if byte < 0x80 {
                if buf.len() >= MAX_SYSEX_LEN {
                    self.sysex = None;
                    self.skipping = true;
                    out.push(Err(FramingError::SysExOverflow { max: MAX_SYSEX_LEN }));
                } else {
                    buf.push(byte);
                }
                return;
            }
            let len = buf.len();
            self.sysex = None;
            out.push(Err(FramingError::UnterminatedSysEx { status: byte, len }));
            // fall through and treat `byte` as the new status
        }

        match byte {
            0xF0 => {
                self.sysex = Some(Vec::new());
                self.running_status = None;
                self.pending.clear();
                self.skipping = false;
            }
            0xF7 => {
                // Terminator of a frame we already gave up on
                self.skipping = false;
            }
            0xF1..=0xF6 => {
                // System common cancels running status; its data is ignored
                self.running_status = None;
                self.pending.clear();
                self.skipping = true;
            }
            0x80..=0xEF => {
                self.running_status = Some(byte);
                self.pending.clear();
                self.skipping = false;
            }
            _ => self.push_data(byte, out),
        }
    }

    fn push_data(&mut self, byte: u8, out: &mut Vec<Result<MidiMessage, FramingError>>) {
        if self.skipping {
            return;
        }
        let Some(status) = self.running_status else {
            self.skipping = true;
            out.push(Err(FramingError::OrphanData { byte }));
            return;
        };

        self.pending.push(byte);
        if self.pending.len() < data_len(status) {
            return;
        }

        let mut frame = Vec::with_capacity(3);
        frame.push(status);
        frame.append(&mut self.pending);
        // Families the console does not use are consumed silently
        if let Some(message) = MidiMessage::parse(&frame) {
            out.push(Ok(message));
        }
    }
}

/// Number of data bytes following a channel status byte
fn data_len(status: u8) -> usize {
    match status & 0xF0 {
        0xC0 | 0xD0 => 1,
        _ => 2,
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
