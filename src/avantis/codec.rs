//! Value codecs: fader levels, names, colors and scene addresses

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::channel::ChannelType;
use super::error::ProtocolError;

/// Floor of the fader scale, shown as -inf on the console
pub const FADER_MIN_DB: f64 = -90.0;
pub const FADER_MAX_DB: f64 = 10.0;

/// Fader law control points, ascending in dB
const FADER_TABLE: [(f64, u8); 13] = [
    (FADER_MIN_DB, 0x00),
    (-45.0, 0x11),
    (-40.0, 0x1B),
    (-35.0, 0x25),
    (-30.0, 0x2F),
    (-25.0, 0x39),
    (-20.0, 0x43),
    (-15.0, 0x4D),
    (-10.0, 0x57),
    (-5.0, 0x61),
    (0.0, 0x6B),
    (5.0, 0x74),
    (FADER_MAX_DB, 0x7F),
];

/// Maximum characters in a channel name
pub const MAX_NAME_LEN: usize = 8;

/// Scenes per bank-select block
pub const SCENES_PER_BANK: u16 = 128;

/// Convert a dB level to the 7-bit fader value
///
/// Levels at or above +10 dB map to 127; -90 dB, -inf and NaN map to 0.
/// Everything else is interpolated linearly on the bracketing table segment.
pub fn db_to_midi(db: f64) -> u8 {
    if db.is_nan() || db <= FADER_MIN_DB {
        return 0;
    }
    if db >= FADER_MAX_DB {
        return 0x7F;
    }

    for pair in FADER_TABLE.windows(2) {
        let (db_lo, midi_lo) = pair[0];
        let (db_hi, midi_hi) = pair[1];
        if db >= db_lo && db <= db_hi {
            let ratio = (db - db_lo) / (db_hi - db_lo);
            let midi = midi_lo as f64 + ratio * (midi_hi as f64 - midi_lo as f64);
            return midi.round() as u8;
        }
    }
    0
}

/// Convert a 7-bit fader value back to dB using the same table
pub fn midi_to_db(value: u8) -> f64 {
    let value = value.min(0x7F);
    if value == 0 {
        return FADER_MIN_DB;
    }

    for pair in FADER_TABLE.windows(2) {
        let (db_lo, midi_lo) = pair[0];
        let (db_hi, midi_hi) = pair[1];
        if value >= midi_lo && value <= midi_hi {
            let ratio = (value - midi_lo) as f64 / (midi_hi - midi_lo) as f64;
            return db_lo + ratio * (db_hi - db_lo);
        }
    }
    FADER_MAX_DB
}

/// Whether the console's name table has an entry for `c`
pub fn is_name_char(c: char) -> bool {
    (' '..='~').contains(&c) && c != '$'
}

fn name_byte(c: char) -> Option<u8> {
    is_name_char(c).then_some(c as u8)
}

fn name_char(byte: u8) -> Option<char> {
    let c = byte as char;
    is_name_char(c).then_some(c)
}

/// Encode the first eight characters of `name`, dropping unmapped ones
pub fn name_to_bytes(name: &str) -> Vec<u8> {
    name.chars().take(MAX_NAME_LEN).filter_map(name_byte).collect()
}

/// Decode name bytes, stopping at the first unmapped byte or terminator
pub fn bytes_to_name(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map_while(|&b| name_char(b))
        .take(MAX_NAME_LEN)
        .collect()
}

/// Channel strip color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Off = 0,
    Red = 1,
    Green = 2,
    Yellow = 3,
    Blue = 4,
    Purple = 5,
    LtBlue = 6,
    White = 7,
}

impl Color {
    pub const ALL: [Color; 8] = [
        Color::Off,
        Color::Red,
        Color::Green,
        Color::Yellow,
        Color::Blue,
        Color::Purple,
        Color::LtBlue,
        Color::White,
    ];

    pub fn from_value(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Color::Off => "Off",
            Color::Red => "Red",
            Color::Green => "Green",
            Color::Yellow => "Yellow",
            Color::Blue => "Blue",
            Color::Purple => "Purple",
            Color::LtBlue => "Lt Blue",
            Color::White => "White",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Color {
    type Err = ProtocolError;

    /// Accepts a label ("Lt Blue", "lt_blue", "light blue") or a value 0-7
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::Validation(format!("unknown color '{}'", s));
        if let Ok(value) = s.trim().parse::<u8>() {
            return Color::from_value(value).ok_or_else(invalid);
        }

        let normalized = s.trim().to_ascii_lowercase().replace(['_', '-', '.'], " ");
        let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.as_str() {
            "light blue" | "lt blue" | "ltblue" => Ok(Color::LtBlue),
            other => Color::ALL
                .into_iter()
                .find(|c| c.label().to_ascii_lowercase() == other)
                .ok_or_else(invalid),
        }
    }
}

/// Bank-select and program numbers for a scene
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneAddress {
    pub bank: u8,
    pub program: u8,
}

impl SceneAddress {
    /// Split a 1-based scene number into its bank and program
    pub fn from_scene(scene: u16) -> Result<Self, ProtocolError> {
        let count = ChannelType::Scene.count();
        if scene == 0 || scene > count {
            return Err(ProtocolError::Validation(format!(
                "scene {} out of range 1..={}",
                scene, count
            )));
        }
        let zero_based = scene - 1;
        Ok(Self {
            bank: (zero_based / SCENES_PER_BANK) as u8,
            program: (zero_based % SCENES_PER_BANK) as u8,
        })
    }

    /// 1-based scene number
    pub fn scene_number(self) -> u16 {
        self.bank as u16 * SCENES_PER_BANK + self.program as u16 + 1
    }
}
