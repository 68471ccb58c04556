//! Feedback decoder
//!
//! Turns inbound byte chunks into [`CacheUpdate`]s. Framing is delegated to
//! [`MidiStreamParser`], so chunk boundaries may fall anywhere and running
//! status is honoured. Frames that cannot be framed or addressed are logged
//! and dropped; decoding continues with the next message.

use tracing::{debug, trace, warn};

use super::cache::CacheUpdate;
use super::channel::{inverse_decode, ChannelType, LogicalChannel, MIDI_CHANNEL_WINDOW};
use super::codec::{bytes_to_name, midi_to_db, Color, SceneAddress};
use super::encoder::{nrpn, sysex, SYSEX_HEADER};
use super::error::ProtocolError;
use crate::midi::{format_hex, FramingError, MidiMessage, MidiStreamParser};

/// Velocity at or above which a Note-On reports a muted strip
const MUTE_THRESHOLD: u8 = 0x40;

/// Partially received NRPN on one MIDI channel
#[derive(Debug, Default, Clone, Copy)]
struct NrpnState {
    msb: Option<u8>,
    lsb: Option<u8>,
}

#[derive(Debug, Default)]
pub struct FeedbackDecoder {
    parser: MidiStreamParser,
    nrpn: [NrpnState; 16],
    /// Bank selected by the console ahead of a Program Change
    inbound_bank: u8,
}

impl FeedbackDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop partial frames and NRPN state (after reconnect or base change)
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Decode one chunk into the cache writes it implies
    pub fn decode(&mut self, base: u8, chunk: &[u8]) -> Vec<CacheUpdate> {
        let mut updates = Vec::new();

        for parsed in self.parser.feed(chunk) {
            let message = match parsed {
                Ok(message) => message,
                Err(e) => {
                    warn!("Discarding inbound frame: {}", ProtocolError::from(e));
                    continue;
                }
            };

            match self.decode_message(base, &message) {
                Ok(Some(update)) => updates.push(update),
                Ok(None) => {}
                Err(e @ ProtocolError::AddressResolution { .. }) => {
                    debug!("Ignoring {}: {}", message, e);
                }
                Err(e) => warn!("Discarding {}: {}", message, e),
            }
        }

        updates
    }

    fn decode_message(
        &mut self,
        base: u8,
        message: &MidiMessage,
    ) -> Result<Option<CacheUpdate>, ProtocolError> {
        match *message {
            MidiMessage::NoteOn { channel, note, velocity } => {
                let channel = inverse_decode(base, channel, note)?;
                Ok(Some(CacheUpdate::Mute {
                    channel,
                    muted: velocity >= MUTE_THRESHOLD,
                }))
            }
            // Release half of a mute pair
            MidiMessage::NoteOff { .. } => Ok(None),
            MidiMessage::ControlChange { channel, cc, value } => {
                self.decode_control_change(base, channel, cc, value)
            }
            MidiMessage::ProgramChange { channel, program } => {
                if channel != base {
                    trace!("Program change on foreign channel {}", channel + 1);
                    return Ok(None);
                }
                let scene = SceneAddress {
                    bank: self.inbound_bank,
                    program,
                }
                .scene_number();
                // Bank 3 stops at scene 500
                SceneAddress::from_scene(scene)?;
                Ok(Some(CacheUpdate::Scene { scene }))
            }
            MidiMessage::SysEx { ref data } => self.decode_sysex(base, data),
        }
    }

    fn decode_control_change(
        &mut self,
        base: u8,
        channel: u8,
        cc: u8,
        value: u8,
    ) -> Result<Option<CacheUpdate>, ProtocolError> {
        if !in_window(base, channel) {
            return Ok(None);
        }
        let state = &mut self.nrpn[channel as usize & 0x0F];

        match cc {
            nrpn::CC_MSB => {
                state.msb = Some(value);
                state.lsb = None;
                Ok(None)
            }
            nrpn::CC_LSB => {
                state.lsb = Some(value);
                Ok(None)
            }
            nrpn::CC_DATA_ENTRY => match (state.msb, state.lsb) {
                (Some(note), Some(param)) => decode_nrpn(base, channel, note, param, value),
                _ => {
                    trace!("Data entry without NRPN address on channel {}", channel + 1);
                    Ok(None)
                }
            },
            nrpn::CC_BANK_SELECT if channel == base => {
                self.inbound_bank = value;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn decode_sysex(&mut self, base: u8, data: &[u8]) -> Result<Option<CacheUpdate>, ProtocolError> {
        // `data` excludes F0, so compare against the header without it
        let Some(body) = data.strip_prefix(&SYSEX_HEADER[1..]) else {
            trace!("Ignoring foreign SysEx: {}", format_hex(data));
            return Ok(None);
        };
        let [midi, msg_type, rest @ ..] = body else {
            return Err(FramingError::ShortSysEx { len: data.len() }.into());
        };

        // Scene replies carry a scene number where strip replies carry a note
        if *msg_type == sysex::SCENE_NAME_REPLY {
            if midi & 0x0F != base {
                trace!("Scene name on foreign channel {}", (midi & 0x0F) + 1);
                return Ok(None);
            }
            let [lo, hi, name @ ..] = rest else {
                return Err(FramingError::ShortSysEx { len: data.len() }.into());
            };
            let scene = (*hi as u16) << 7 | *lo as u16;
            SceneAddress::from_scene(scene)?;
            return Ok(Some(CacheUpdate::SceneName {
                scene,
                name: bytes_to_name(name),
            }));
        }

        let [note, payload @ ..] = rest else {
            return Err(FramingError::ShortSysEx { len: data.len() }.into());
        };
        let channel = inverse_decode(base, midi & 0x0F, *note)?;

        match *msg_type {
            sysex::NAME_REPLY => Ok(Some(CacheUpdate::Name {
                channel,
                name: bytes_to_name(payload),
            })),
            sysex::COLOR_REPLY => {
                let value = *payload
                    .first()
                    .ok_or(FramingError::ShortSysEx { len: data.len() })?;
                match Color::from_value(value) {
                    Some(color) => Ok(Some(CacheUpdate::Color { channel, color })),
                    None => Err(ProtocolError::Validation(format!(
                        "unknown color value {} for {}",
                        value, channel
                    ))),
                }
            }
            sysex::SEND_LEVEL => {
                debug!("Send level reply for {}: {}", channel, format_hex(payload));
                Ok(None)
            }
            other => {
                trace!("Unhandled SysEx type 0x{:02X} for {}", other, channel);
                Ok(None)
            }
        }
    }
}

fn in_window(base: u8, channel: u8) -> bool {
    channel
        .checked_sub(base)
        .is_some_and(|offset| offset < MIDI_CHANNEL_WINDOW)
}

fn decode_nrpn(
    base: u8,
    midi_channel: u8,
    note: u8,
    param: u8,
    value: u8,
) -> Result<Option<CacheUpdate>, ProtocolError> {
    let channel = inverse_decode(base, midi_channel, note)?;

    let update = match param {
        nrpn::PARAM_FADER => CacheUpdate::Fader {
            channel,
            db: midi_to_db(value),
        },
        nrpn::PARAM_MAIN_ASSIGN => CacheUpdate::MainAssign {
            channel,
            assigned: value >= MUTE_THRESHOLD,
        },
        nrpn::PARAM_GROUP_ASSIGN => {
            let (group, assigned) = decode_group_value(value).ok_or_else(|| {
                ProtocolError::Validation(format!("group assign value 0x{:02X} out of range", value))
            })?;
            CacheUpdate::GroupAssign {
                channel,
                group,
                assigned,
            }
        }
        other => {
            trace!("Unhandled NRPN parameter 0x{:02X} for {}", other, channel);
            return Ok(None);
        }
    };
    Ok(Some(update))
}

/// Split a group-assign data byte into the group and its on/off state
fn decode_group_value(value: u8) -> Option<(LogicalChannel, bool)> {
    let bands = [
        (ChannelType::Dca, nrpn::DCA_ASSIGN_ON, true),
        (ChannelType::Dca, nrpn::DCA_ASSIGN_OFF, false),
        (ChannelType::MuteGroup, nrpn::MUTE_GROUP_ASSIGN_ON, true),
        (ChannelType::MuteGroup, nrpn::MUTE_GROUP_ASSIGN_OFF, false),
    ];
    bands.into_iter().find_map(|(kind, start, assigned)| {
        let index = value.checked_sub(start)? as u16 + 1;
        LogicalChannel::new(kind, index).ok().map(|group| (group, assigned))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(kind: ChannelType, index: u16) -> LogicalChannel {
        LogicalChannel::new(kind, index).unwrap()
    }

    fn name_reply(midi: u8, note: u8, name: &[u8]) -> Vec<u8> {
        let mut bytes = SYSEX_HEADER.to_vec();
        bytes.extend_from_slice(&[midi, sysex::NAME_REPLY, note]);
        bytes.extend_from_slice(name);
        bytes.push(0xF7);
        bytes
    }

    #[test]
    fn test_mute_block() {
        let mut decoder = FeedbackDecoder::new();
        let updates = decoder.decode(11, &[0x9B, 0x05, 0x7F, 0x9B, 0x05, 0x00]);
        assert_eq!(
            updates,
            vec![CacheUpdate::Mute { channel: ch(ChannelType::Input, 5), muted: true }]
        );
    }

    #[test]
    fn test_mute_block_running_status() {
        let mut decoder = FeedbackDecoder::new();
        let updates = decoder.decode(11, &[0x9C, 0x01, 0x3F, 0x01, 0x00, 0x41, 0x7F]);
        assert_eq!(
            updates,
            vec![
                CacheUpdate::Mute { channel: ch(ChannelType::MonoGroup, 1), muted: false },
                CacheUpdate::Mute { channel: ch(ChannelType::StereoGroup, 2), muted: true },
            ]
        );
    }

    #[test]
    fn test_two_name_replies_in_one_chunk() {
        let mut decoder = FeedbackDecoder::new();
        let mut chunk = name_reply(0x0B, 0x01, b"Kick");
        chunk.extend(name_reply(0x0B, 0x02, b"Snare"));
        let updates = decoder.decode(11, &chunk);
        assert_eq!(
            updates,
            vec![
                CacheUpdate::Name { channel: ch(ChannelType::Input, 1), name: "Kick".into() },
                CacheUpdate::Name { channel: ch(ChannelType::Input, 2), name: "Snare".into() },
            ]
        );
    }

    #[test]
    fn test_reply_split_across_chunks() {
        let mut decoder = FeedbackDecoder::new();
        let reply = name_reply(0x0B, 0x03, b"Bass");
        let (head, tail) = reply.split_at(6);
        assert!(decoder.decode(11, head).is_empty());
        assert_eq!(
            decoder.decode(11, tail),
            vec![CacheUpdate::Name { channel: ch(ChannelType::Input, 3), name: "Bass".into() }]
        );
    }

    #[test]
    fn test_truncated_reply_does_not_corrupt_next() {
        let mut decoder = FeedbackDecoder::new();
        let mut chunk = SYSEX_HEADER.to_vec();
        chunk.push(0x0B);
        // Missing terminator: the next frame starts immediately
        chunk.extend(name_reply(0x0B, 0x02, b"Gtr"));
        let updates = decoder.decode(11, &chunk);
        assert_eq!(
            updates,
            vec![CacheUpdate::Name { channel: ch(ChannelType::Input, 2), name: "Gtr".into() }]
        );
    }

    #[test]
    fn test_scene_name_reply() {
        let mut decoder = FeedbackDecoder::new();
        let mut chunk = SYSEX_HEADER.to_vec();
        chunk.extend_from_slice(&[0x0B, sysex::SCENE_NAME_REPLY, 0x01, 0x01]);
        chunk.extend_from_slice(b"Act 2");
        chunk.push(0xF7);
        assert_eq!(
            decoder.decode(11, &chunk),
            vec![CacheUpdate::SceneName { scene: 129, name: "Act 2".into() }]
        );

        // Scene 0 does not exist and other channels are not ours
        let mut chunk = SYSEX_HEADER.to_vec();
        chunk.extend_from_slice(&[0x0B, sysex::SCENE_NAME_REPLY, 0x00, 0x00, b'X', 0xF7]);
        chunk.extend(SYSEX_HEADER);
        chunk.extend_from_slice(&[0x0C, sysex::SCENE_NAME_REPLY, 0x01, 0x00, b'X', 0xF7]);
        assert!(decoder.decode(11, &chunk).is_empty());
    }

    #[test]
    fn test_short_sysex_body_is_dropped() {
        let mut decoder = FeedbackDecoder::new();
        let mut chunk = SYSEX_HEADER.to_vec();
        chunk.extend_from_slice(&[0x0B, 0x02, 0xF7]);
        assert!(decoder.decode(11, &chunk).is_empty());
    }

    #[test]
    fn test_color_reply() {
        let mut decoder = FeedbackDecoder::new();
        let mut chunk = SYSEX_HEADER.to_vec();
        chunk.extend_from_slice(&[0x0F, sysex::COLOR_REPLY, 0x36, 0x06, 0xF7]);
        chunk.extend(SYSEX_HEADER);
        chunk.extend_from_slice(&[0x0F, sysex::COLOR_REPLY, 0x37, 0x09, 0xF7]);
        assert_eq!(
            decoder.decode(11, &chunk),
            vec![CacheUpdate::Color { channel: ch(ChannelType::Dca, 1), color: Color::LtBlue }]
        );
    }

    #[test]
    fn test_nrpn_fader_echo() {
        let mut decoder = FeedbackDecoder::new();
        let updates = decoder.decode(0, &[0xB0, 0x63, 0x05, 0xB0, 0x62, 0x17, 0xB0, 0x06, 0x6B]);
        assert_eq!(
            updates,
            vec![CacheUpdate::Fader { channel: ch(ChannelType::Input, 5), db: 0.0 }]
        );

        // Running status and a second data entry reuse the NRPN address
        let updates = decoder.decode(0, &[0xB0, 0x06, 0x00]);
        assert_eq!(
            updates,
            vec![CacheUpdate::Fader { channel: ch(ChannelType::Input, 5), db: -90.0 }]
        );
    }

    #[test]
    fn test_nrpn_group_and_main_assign() {
        let mut decoder = FeedbackDecoder::new();
        let updates = decoder.decode(
            0,
            &[0xB0, 0x63, 0x01, 0x62, 0x40, 0x06, 0x51, 0x63, 0x01, 0x62, 0x18, 0x06, 0x3F],
        );
        assert_eq!(
            updates,
            vec![
                CacheUpdate::GroupAssign {
                    channel: ch(ChannelType::Input, 1),
                    group: ch(ChannelType::MuteGroup, 2),
                    assigned: true,
                },
                CacheUpdate::MainAssign { channel: ch(ChannelType::Input, 1), assigned: false },
            ]
        );
    }

    #[test]
    fn test_group_value_bands() {
        assert_eq!(decode_group_value(0x00), Some((ch(ChannelType::Dca, 1), false)));
        assert_eq!(decode_group_value(0x4F), Some((ch(ChannelType::Dca, 16), true)));
        assert_eq!(decode_group_value(0x17), Some((ch(ChannelType::MuteGroup, 8), false)));
        assert_eq!(decode_group_value(0x18), None);
        assert_eq!(decode_group_value(0x60), None);
    }

    #[test]
    fn test_scene_change_uses_inbound_bank() {
        let mut decoder = FeedbackDecoder::new();
        let updates = decoder.decode(11, &[0xBB, 0x00, 0x01, 0xCB, 0x02]);
        assert_eq!(updates, vec![CacheUpdate::Scene { scene: 131 }]);

        // Bank 3 program 120 would be scene 505
        assert!(decoder.decode(11, &[0xBB, 0x00, 0x03, 0xCB, 0x78]).is_empty());
        // Program change outside the base channel is not a scene
        assert!(decoder.decode(11, &[0xCC, 0x02]).is_empty());
    }

    #[test]
    fn test_out_of_window_and_gap_notes_dropped() {
        let mut decoder = FeedbackDecoder::new();
        assert!(decoder.decode(11, &[0x90, 0x05, 0x7F]).is_empty());
        assert!(decoder.decode(11, &[0x9C, 0x30, 0x7F]).is_empty());
        // Decoding resumes after a dropped frame
        assert_eq!(decoder.decode(11, &[0x9B, 0x01, 0x7F]).len(), 1);
    }
}
