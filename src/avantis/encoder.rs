//! Command encoder
//!
//! Builds the exact byte sequences the console expects for each action. The
//! only state carried between calls is the last scene bank sent, so that
//! bank-select is emitted only when a recall crosses into another bank.

use tracing::trace;

use super::action::ActionRequest;
use super::cache::{CacheUpdate, StateCache};
use super::channel::{forward_encode, ChannelType, LogicalChannel};
use super::codec::{db_to_midi, midi_to_db, name_to_bytes, Color, SceneAddress};
use super::error::ProtocolError;
use crate::midi::{format_hex, MidiMessage};

/// Vendor SysEx header (Allen & Heath, Avantis)
pub const SYSEX_HEADER: [u8; 8] = [0xF0, 0x00, 0x00, 0x1A, 0x50, 0x10, 0x01, 0x00];

/// SysEx message types
pub mod sysex {
    pub const NAME_REQUEST: u8 = 0x01;
    pub const NAME_REPLY: u8 = 0x02;
    pub const NAME_SET: u8 = 0x03;
    pub const COLOR_REQUEST: u8 = 0x04;
    pub const COLOR_REPLY: u8 = 0x05;
    pub const COLOR_SET: u8 = 0x06;
    pub const SCENE_NAME_REQUEST: u8 = 0x07;
    pub const SCENE_NAME_REPLY: u8 = 0x08;
    pub const SEND_LEVEL: u8 = 0x0D;
}

/// NRPN controller numbers and parameters
pub mod nrpn {
    pub const CC_MSB: u8 = 0x63;
    pub const CC_LSB: u8 = 0x62;
    pub const CC_DATA_ENTRY: u8 = 0x06;
    pub const CC_BANK_SELECT: u8 = 0x00;

    pub const PARAM_FADER: u8 = 0x17;
    pub const PARAM_MAIN_ASSIGN: u8 = 0x18;
    pub const PARAM_GROUP_ASSIGN: u8 = 0x40;

    pub const DCA_ASSIGN_ON: u8 = 0x40;
    pub const DCA_ASSIGN_OFF: u8 = 0x00;
    pub const MUTE_GROUP_ASSIGN_ON: u8 = 0x50;
    pub const MUTE_GROUP_ASSIGN_OFF: u8 = 0x10;
}

/// Note velocity for a muted / unmuted strip
pub const VELOCITY_ON: u8 = 0x7F;
pub const VELOCITY_OFF: u8 = 0x3F;

/// Boolean values carried in NRPN data entry (main-mix assign)
pub const NRPN_ON: u8 = 0x7F;
pub const NRPN_OFF: u8 = 0x3F;

/// Encoded action: buffers to write in order, and the cache writes that
/// become true once every buffer has been written
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Outbound {
    pub buffers: Vec<Vec<u8>>,
    pub updates: Vec<CacheUpdate>,
}

impl Outbound {
    fn single(buffer: Vec<u8>, update: Option<CacheUpdate>) -> Self {
        Self {
            buffers: vec![buffer],
            updates: update.into_iter().collect(),
        }
    }
}

/// Stateful command builder
#[derive(Debug, Default)]
pub struct CommandEncoder {
    last_sent_scene_bank: Option<u8>,
}

impl CommandEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sent_scene_bank(&self) -> Option<u8> {
        self.last_sent_scene_bank
    }

    /// Forget the last bank so the next recall always selects its bank
    ///
    /// Called after a failed send and on reconnect, when the console's bank
    /// can no longer be assumed.
    pub fn reset_scene_bank(&mut self) {
        self.last_sent_scene_bank = None;
    }

    /// Encode a request against the current cache (needed for toggles)
    pub fn encode(
        &mut self,
        base: u8,
        request: &ActionRequest,
        cache: &StateCache,
    ) -> Result<Outbound, ProtocolError> {
        request.validate()?;

        let outbound = match request {
            ActionRequest::Mute { channel, state } => {
                let muted = state.resolve(cache.mute(*channel));
                Outbound::single(
                    mute(base, *channel, muted)?,
                    Some(CacheUpdate::Mute { channel: *channel, muted }),
                )
            }
            ActionRequest::Fader { channel, db } => Outbound::single(
                fader(base, *channel, *db)?,
                // The console holds the 7-bit step, not the requested level
                Some(CacheUpdate::Fader { channel: *channel, db: midi_to_db(db_to_midi(*db)) }),
            ),
            ActionRequest::Assign { channel, groups, assign } => {
                let mut outbound = Outbound::default();
                for group in groups {
                    outbound.buffers.push(group_assign(base, *channel, *group, *assign)?);
                    outbound.updates.push(CacheUpdate::GroupAssign {
                        channel: *channel,
                        group: *group,
                        assigned: *assign,
                    });
                }
                outbound
            }
            ActionRequest::MainAssign { channel, assign } => Outbound::single(
                main_assign(base, *channel, *assign)?,
                Some(CacheUpdate::MainAssign { channel: *channel, assigned: *assign }),
            ),
            ActionRequest::SceneRecall { scene } => Outbound {
                buffers: self.scene_recall(base, *scene)?,
                updates: vec![CacheUpdate::Scene { scene: *scene }],
            },
            ActionRequest::SetName { channel, name } => {
                let bytes = name_to_bytes(name);
                // The stored name is what the console will actually show
                let stored: String = bytes.iter().map(|&b| b as char).collect();
                Outbound::single(
                    name_set(base, *channel, &bytes)?,
                    Some(CacheUpdate::Name { channel: *channel, name: stored }),
                )
            }
            ActionRequest::SetColor { channel, color } => Outbound::single(
                color_set(base, *channel, *color)?,
                Some(CacheUpdate::Color { channel: *channel, color: *color }),
            ),
            ActionRequest::SendLevel { source, destination, db } => {
                Outbound::single(send_level(base, *source, *destination, *db)?, None)
            }
        };

        for buffer in &outbound.buffers {
            trace!("Encoded {}: {}", request.kind(), format_hex(buffer));
        }
        Ok(outbound)
    }

    /// Bank select (when the bank changed) followed by program change
    pub fn scene_recall(&mut self, base: u8, scene: u16) -> Result<Vec<Vec<u8>>, ProtocolError> {
        let address = SceneAddress::from_scene(scene)?;
        let mut buffers = Vec::with_capacity(2);

        if self.last_sent_scene_bank != Some(address.bank) {
            buffers.push(
                MidiMessage::ControlChange {
                    channel: base,
                    cc: nrpn::CC_BANK_SELECT,
                    value: address.bank,
                }
                .encode(),
            );
            self.last_sent_scene_bank = Some(address.bank);
        }
        buffers.push(
            MidiMessage::ProgramChange {
                channel: base,
                program: address.program,
            }
            .encode(),
        );
        Ok(buffers)
    }
}

/// Two Note-On frames: the state velocity, then a zero-velocity release
pub fn mute(base: u8, channel: LogicalChannel, muted: bool) -> Result<Vec<u8>, ProtocolError> {
    let wire = forward_encode(base, channel)?;
    let velocity = if muted { VELOCITY_ON } else { VELOCITY_OFF };

    let mut bytes = MidiMessage::NoteOn {
        channel: wire.midi_channel,
        note: wire.note,
        velocity,
    }
    .encode();
    bytes.extend(
        MidiMessage::NoteOn {
            channel: wire.midi_channel,
            note: wire.note,
            velocity: 0,
        }
        .encode(),
    );
    Ok(bytes)
}

/// NRPN triplet: MSB = note, LSB = parameter, data entry = value
pub fn nrpn_sequence(midi_channel: u8, note: u8, param: u8, value: u8) -> Vec<u8> {
    [
        (nrpn::CC_MSB, note),
        (nrpn::CC_LSB, param),
        (nrpn::CC_DATA_ENTRY, value),
    ]
    .into_iter()
    .flat_map(|(cc, value)| {
        MidiMessage::ControlChange {
            channel: midi_channel,
            cc,
            value,
        }
        .encode()
    })
    .collect()
}

pub fn fader(base: u8, channel: LogicalChannel, db: f64) -> Result<Vec<u8>, ProtocolError> {
    let wire = forward_encode(base, channel)?;
    Ok(nrpn_sequence(
        wire.midi_channel,
        wire.note,
        nrpn::PARAM_FADER,
        db_to_midi(db),
    ))
}

/// Membership of `channel` in one DCA or mute group
pub fn group_assign(
    base: u8,
    channel: LogicalChannel,
    group: LogicalChannel,
    assign: bool,
) -> Result<Vec<u8>, ProtocolError> {
    let wire = forward_encode(base, channel)?;
    let offset = match (group.kind, assign) {
        (ChannelType::Dca, true) => nrpn::DCA_ASSIGN_ON,
        (ChannelType::Dca, false) => nrpn::DCA_ASSIGN_OFF,
        (ChannelType::MuteGroup, true) => nrpn::MUTE_GROUP_ASSIGN_ON,
        (ChannelType::MuteGroup, false) => nrpn::MUTE_GROUP_ASSIGN_OFF,
        _ => {
            return Err(ProtocolError::Validation(format!(
                "{} is not a DCA or mute group",
                group
            )))
        }
    };
    let group = LogicalChannel::new(group.kind, group.index)?;
    let value = (group.index - 1) as u8 + offset;
    Ok(nrpn_sequence(
        wire.midi_channel,
        wire.note,
        nrpn::PARAM_GROUP_ASSIGN,
        value,
    ))
}

pub fn main_assign(base: u8, channel: LogicalChannel, assign: bool) -> Result<Vec<u8>, ProtocolError> {
    let wire = forward_encode(base, channel)?;
    Ok(nrpn_sequence(
        wire.midi_channel,
        wire.note,
        nrpn::PARAM_MAIN_ASSIGN,
        if assign { NRPN_ON } else { NRPN_OFF },
    ))
}

/// `HEADER, 0N, type, CH, payload..., F7`
fn sysex_frame(midi_channel: u8, msg_type: u8, note: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(SYSEX_HEADER.len() + 4 + payload.len());
    bytes.extend_from_slice(&SYSEX_HEADER);
    bytes.extend_from_slice(&[midi_channel, msg_type, note]);
    bytes.extend_from_slice(payload);
    bytes.push(0xF7);
    bytes
}

pub fn name_set(base: u8, channel: LogicalChannel, name: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let wire = forward_encode(base, channel)?;
    Ok(sysex_frame(wire.midi_channel, sysex::NAME_SET, wire.note, name))
}

pub fn color_set(base: u8, channel: LogicalChannel, color: Color) -> Result<Vec<u8>, ProtocolError> {
    let wire = forward_encode(base, channel)?;
    Ok(sysex_frame(
        wire.midi_channel,
        sysex::COLOR_SET,
        wire.note,
        &[color.value()],
    ))
}

pub fn send_level(
    base: u8,
    source: LogicalChannel,
    destination: LogicalChannel,
    db: f64,
) -> Result<Vec<u8>, ProtocolError> {
    let src = forward_encode(base, source)?;
    let dest = forward_encode(base, destination)?;
    Ok(sysex_frame(
        src.midi_channel,
        sysex::SEND_LEVEL,
        src.note,
        &[dest.midi_channel, dest.note, db_to_midi(db)],
    ))
}

pub fn name_request(base: u8, channel: LogicalChannel) -> Result<Vec<u8>, ProtocolError> {
    let wire = forward_encode(base, channel)?;
    Ok(sysex_frame(wire.midi_channel, sysex::NAME_REQUEST, wire.note, &[]))
}

pub fn color_request(base: u8, channel: LogicalChannel) -> Result<Vec<u8>, ProtocolError> {
    let wire = forward_encode(base, channel)?;
    Ok(sysex_frame(wire.midi_channel, sysex::COLOR_REQUEST, wire.note, &[]))
}

/// `HEADER, 07, SS_lo, SS_hi, F7` with the 1-based scene number in 7-bit halves
pub fn scene_name_request(scene: SceneAddress) -> Vec<u8> {
    let number = scene.scene_number();
    let mut bytes = Vec::with_capacity(SYSEX_HEADER.len() + 4);
    bytes.extend_from_slice(&SYSEX_HEADER);
    bytes.extend_from_slice(&[
        sysex::SCENE_NAME_REQUEST,
        (number & 0x7F) as u8,
        ((number >> 7) & 0x7F) as u8,
        0xF7,
    ]);
    bytes
}
