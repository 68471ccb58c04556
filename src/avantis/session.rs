//! Mixer session: the protocol engine state for one console connection

use tracing::{debug, info};

use super::action::ActionRequest;
use super::cache::{CacheUpdate, StateCache};
use super::channel::{ChannelType, LogicalChannel, MAX_BASE_MIDI_CHANNEL};
use super::decoder::FeedbackDecoder;
use super::codec::SceneAddress;
use super::encoder::{color_request, name_request, scene_name_request, CommandEncoder, Outbound};
use super::error::ProtocolError;

/// Which queries to issue when a connection comes up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub names: bool,
    pub colors: bool,
    pub families: Vec<ChannelType>,
}

impl Default for SyncPlan {
    fn default() -> Self {
        Self {
            names: true,
            colors: true,
            families: ChannelType::ALL
                .into_iter()
                .filter(|k| k.is_note_addressed())
                .collect(),
        }
    }
}

/// Owns everything the encoder and decoder share
///
/// One session exists per console; it is never global, so tests and multiple
/// consoles each get their own cache and scene-bank tracking.
#[derive(Debug)]
pub struct MixerSession {
    base_midi_channel: u8,
    cache: StateCache,
    encoder: CommandEncoder,
    decoder: FeedbackDecoder,
}

impl MixerSession {
    /// Create a session for a 0-based base MIDI channel (0-11)
    pub fn new(base_midi_channel: u8) -> Result<Self, ProtocolError> {
        validate_base(base_midi_channel)?;
        Ok(Self {
            base_midi_channel,
            cache: StateCache::new(),
            encoder: CommandEncoder::new(),
            decoder: FeedbackDecoder::new(),
        })
    }

    pub fn base_midi_channel(&self) -> u8 {
        self.base_midi_channel
    }

    /// Move to another MIDI channel window
    ///
    /// Everything learned under the old window is addressed differently now,
    /// so the cache and protocol state start over. Returns whether the base
    /// actually changed.
    pub fn set_base_midi_channel(&mut self, base: u8) -> Result<bool, ProtocolError> {
        validate_base(base)?;
        if base == self.base_midi_channel {
            return Ok(false);
        }
        info!(
            "Base MIDI channel {} -> {}",
            self.base_midi_channel + 1,
            base + 1
        );
        self.base_midi_channel = base;
        self.reset_connection();
        Ok(true)
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    /// Build the bytes for an action
    pub fn encode(&mut self, request: &ActionRequest) -> Result<Outbound, ProtocolError> {
        self.encoder
            .encode(self.base_midi_channel, request, &self.cache)
    }

    /// Record the effect of an action whose buffers were all written
    pub fn commit(&mut self, outbound: &Outbound) -> Vec<CacheUpdate> {
        outbound
            .updates
            .iter()
            .filter(|update| self.cache.apply(update))
            .cloned()
            .collect()
    }

    /// The console may have seen part of an action, so bank tracking is void
    pub fn send_failed(&mut self) {
        self.encoder.reset_scene_bank();
    }

    /// Decode inbound bytes and apply them to the cache
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<CacheUpdate> {
        let updates = self.decoder.decode(self.base_midi_channel, chunk);
        updates
            .into_iter()
            .filter(|update| self.cache.apply(update))
            .collect()
    }

    /// Requests prompted by decoded feedback
    ///
    /// A scene change reported by the console is answered with a request for
    /// that scene's name.
    pub fn follow_up_queries(&self, updates: &[CacheUpdate]) -> Vec<Vec<u8>> {
        updates
            .iter()
            .filter_map(|update| match update {
                CacheUpdate::Scene { scene } => SceneAddress::from_scene(*scene).ok(),
                _ => None,
            })
            .map(scene_name_request)
            .collect()
    }

    /// Start from scratch for a new connection
    pub fn reset_connection(&mut self) {
        self.cache.clear();
        self.encoder.reset_scene_bank();
        self.decoder.reset();
        debug!("Session state cleared");
    }

    /// Name and color requests that rebuild the cache after connecting
    pub fn startup_queries(&self, plan: &SyncPlan) -> Vec<Vec<u8>> {
        let mut buffers = Vec::new();
        for &kind in &plan.families {
            if !kind.is_note_addressed() {
                continue;
            }
            for index in 1..=kind.count() {
                let channel = LogicalChannel { kind, index };
                // Every table entry encodes, so errors cannot occur here
                if plan.names {
                    buffers.extend(name_request(self.base_midi_channel, channel).ok());
                }
                if plan.colors {
                    buffers.extend(color_request(self.base_midi_channel, channel).ok());
                }
            }
        }
        buffers
    }
}

fn validate_base(base: u8) -> Result<(), ProtocolError> {
    if base > MAX_BASE_MIDI_CHANNEL {
        return Err(ProtocolError::Validation(format!(
            "base MIDI channel {} outside 1..={}",
            base + 1,
            MAX_BASE_MIDI_CHANNEL + 1
        )));
    }
    Ok(())
}
