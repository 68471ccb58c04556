//! Protocol error taxonomy

use thiserror::Error;

use crate::midi::FramingError;
use crate::transport::TransportError;

/// Errors raised by the protocol engine
///
/// None of these are fatal: each is scoped to one action or one inbound frame.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// Inbound address outside every known band for its MIDI channel
    #[error("no channel at MIDI channel {} note 0x{note:02X}", .midi_channel + 1)]
    AddressResolution { midi_channel: u8, note: u8 },

    /// Caller-supplied value rejected before any byte was built
    #[error("invalid request: {0}")]
    Validation(String),

    /// Inbound frame that could not be decoded
    #[error("malformed frame: {0}")]
    DecodeFraming(#[from] FramingError),

    /// Write failure or disconnect while sending an action
    #[error(transparent)]
    Transport(#[from] TransportError),
}
