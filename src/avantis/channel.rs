//! Channel address map
//!
//! Every logical channel family of the Avantis lives on one of five
//! consecutive MIDI channels starting at the configured base channel. Families
//! sharing a MIDI channel occupy disjoint note bands; a channel's note number
//! is `hex_offset + index`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::ProtocolError;

/// Highest 0-based base MIDI channel (the window needs base+4 <= 15).
pub const MAX_BASE_MIDI_CHANNEL: u8 = 11;

/// Number of MIDI channels the console listens on.
pub const MIDI_CHANNEL_WINDOW: u8 = 5;

/// Number of [`ChannelType`] variants.
pub const CHANNEL_TYPE_COUNT: usize = 14;

/// Channel family on the console
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Input,
    MonoGroup,
    StereoGroup,
    MonoAux,
    StereoAux,
    MonoMatrix,
    StereoMatrix,
    MonoFxSend,
    StereoFxSend,
    FxReturn,
    Main,
    Dca,
    MuteGroup,
    Scene,
}

/// Wire location of a channel family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelAddress {
    /// Offset from the base MIDI channel (0-4)
    pub midi_offset: u8,
    /// Added to the 1-based index to form the note number
    pub hex_offset: u8,
    /// Number of channels in the family
    pub count: u16,
}

impl ChannelAddress {
    const fn new(midi_offset: u8, hex_offset: u8, count: u16) -> Self {
        Self { midi_offset, hex_offset, count }
    }

    /// Whether `note` falls in this family's band
    fn contains_note(&self, note: u8) -> bool {
        let first = self.hex_offset as u16 + 1;
        let last = self.hex_offset as u16 + self.count;
        (first..=last).contains(&(note as u16))
    }
}

impl ChannelType {
    pub const ALL: [ChannelType; CHANNEL_TYPE_COUNT] = [
        ChannelType::Input,
        ChannelType::MonoGroup,
        ChannelType::StereoGroup,
        ChannelType::MonoAux,
        ChannelType::StereoAux,
        ChannelType::MonoMatrix,
        ChannelType::StereoMatrix,
        ChannelType::MonoFxSend,
        ChannelType::StereoFxSend,
        ChannelType::FxReturn,
        ChannelType::Main,
        ChannelType::Dca,
        ChannelType::MuteGroup,
        ChannelType::Scene,
    ];

    /// Address table for the Avantis.
    ///
    /// Boundaries are console data, not derived: the stereo bands start at
    /// 0x40 and the fifth MIDI channel is carved into six bands.
    pub const fn address(self) -> ChannelAddress {
        match self {
            ChannelType::Input => ChannelAddress::new(0, 0x00, 64),
            ChannelType::MonoGroup => ChannelAddress::new(1, 0x00, 40),
            ChannelType::StereoGroup => ChannelAddress::new(1, 0x3F, 20),
            ChannelType::MonoAux => ChannelAddress::new(2, 0x00, 40),
            ChannelType::StereoAux => ChannelAddress::new(2, 0x3F, 20),
            ChannelType::MonoMatrix => ChannelAddress::new(3, 0x00, 40),
            ChannelType::StereoMatrix => ChannelAddress::new(3, 0x3F, 20),
            ChannelType::MonoFxSend => ChannelAddress::new(4, 0x00, 12),
            ChannelType::StereoFxSend => ChannelAddress::new(4, 0x0F, 12),
            ChannelType::FxReturn => ChannelAddress::new(4, 0x1F, 12),
            ChannelType::Main => ChannelAddress::new(4, 0x2F, 3),
            ChannelType::Dca => ChannelAddress::new(4, 0x35, 16),
            ChannelType::MuteGroup => ChannelAddress::new(4, 0x45, 8),
            // Scenes are recalled by bank/program, never by note
            ChannelType::Scene => ChannelAddress::new(0, 0x00, 500),
        }
    }

    /// Number of channels in this family
    pub const fn count(self) -> u16 {
        self.address().count
    }

    /// Stable identifier used in options, signals and the REPL
    pub fn id(self) -> &'static str {
        match self {
            ChannelType::Input => "input",
            ChannelType::MonoGroup => "mono_group",
            ChannelType::StereoGroup => "stereo_group",
            ChannelType::MonoAux => "mono_aux",
            ChannelType::StereoAux => "stereo_aux",
            ChannelType::MonoMatrix => "mono_matrix",
            ChannelType::StereoMatrix => "stereo_matrix",
            ChannelType::MonoFxSend => "mono_fx_send",
            ChannelType::StereoFxSend => "stereo_fx_send",
            ChannelType::FxReturn => "fx_return",
            ChannelType::Main => "main",
            ChannelType::Dca => "dca",
            ChannelType::MuteGroup => "mute_group",
            ChannelType::Scene => "scene",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ChannelType::Input => "Input",
            ChannelType::MonoGroup => "Mono Group",
            ChannelType::StereoGroup => "Stereo Group",
            ChannelType::MonoAux => "Mono Aux",
            ChannelType::StereoAux => "Stereo Aux",
            ChannelType::MonoMatrix => "Mono Matrix",
            ChannelType::StereoMatrix => "Stereo Matrix",
            ChannelType::MonoFxSend => "Mono FX Send",
            ChannelType::StereoFxSend => "Stereo FX Send",
            ChannelType::FxReturn => "FX Return",
            ChannelType::Main => "Main",
            ChannelType::Dca => "DCA",
            ChannelType::MuteGroup => "Mute Group",
            ChannelType::Scene => "Scene",
        }
    }

    /// Position in [`ChannelType::ALL`], used to index per-family storage
    pub(crate) fn slot(self) -> usize {
        self as usize
    }

    /// Families that are addressed by note number on the wire
    pub fn is_note_addressed(self) -> bool {
        self != ChannelType::Scene
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ChannelType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        let kind = match normalized.as_str() {
            // Older option sets used these spellings
            "fx_send" => ChannelType::MonoFxSend,
            "mains" => ChannelType::Main,
            "mutegroup" => ChannelType::MuteGroup,
            other => ChannelType::ALL
                .into_iter()
                .find(|kind| kind.id() == other)
                .ok_or_else(|| ProtocolError::Validation(format!("unknown channel type '{}'", s)))?,
        };
        Ok(kind)
    }
}

/// User-facing channel identity: family plus 1-based index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalChannel {
    pub kind: ChannelType,
    pub index: u16,
}

impl LogicalChannel {
    /// Build a channel, rejecting indices outside `1..=count`
    pub fn new(kind: ChannelType, index: u16) -> Result<Self, ProtocolError> {
        let count = kind.count();
        if index == 0 || index > count {
            return Err(ProtocolError::Validation(format!(
                "{} index {} out of range 1..={}",
                kind, index, count
            )));
        }
        Ok(Self { kind, index })
    }
}

impl fmt::Display for LogicalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.index)
    }
}

/// Wire-level location of a note-addressed channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireAddress {
    /// 0-based MIDI channel
    pub midi_channel: u8,
    pub note: u8,
}

/// Address table entry for a family
pub fn resolve_address(kind: ChannelType) -> ChannelAddress {
    kind.address()
}

/// Map a logical channel to its MIDI channel and note number
pub fn forward_encode(base: u8, channel: LogicalChannel) -> Result<WireAddress, ProtocolError> {
    if !channel.kind.is_note_addressed() {
        return Err(ProtocolError::Validation(format!(
            "{} has no note address",
            channel.kind
        )));
    }
    let channel = LogicalChannel::new(channel.kind, channel.index)?;
    if base > MAX_BASE_MIDI_CHANNEL {
        return Err(ProtocolError::Validation(format!(
            "base MIDI channel {} outside 0..={}",
            base, MAX_BASE_MIDI_CHANNEL
        )));
    }

    let address = channel.kind.address();
    Ok(WireAddress {
        midi_channel: base + address.midi_offset,
        // hex_offset + count never exceeds 0x7F in the table
        note: address.hex_offset + channel.index as u8,
    })
}

/// Map a MIDI channel and note number back to the logical channel
pub fn inverse_decode(base: u8, midi_channel: u8, note: u8) -> Result<LogicalChannel, ProtocolError> {
    let unresolved = || ProtocolError::AddressResolution { midi_channel, note };

    let offset = midi_channel
        .checked_sub(base)
        .filter(|offset| *offset < MIDI_CHANNEL_WINDOW)
        .ok_or_else(unresolved)?;

    ChannelType::ALL
        .into_iter()
        .filter(|kind| kind.is_note_addressed())
        .map(|kind| (kind, kind.address()))
        .find(|(_, address)| address.midi_offset == offset && address.contains_note(note))
        .map(|(kind, address)| LogicalChannel {
            kind,
            index: note as u16 - address.hex_offset as u16,
        })
        .ok_or_else(unresolved)
}
