//! Avantis MIDI/SysEx protocol engine
//!
//! Layering, leaf first:
//! - [`channel`]: logical channel <-> (MIDI channel, note) address map
//! - [`codec`]: fader law, name charset, colors, scene bank/program
//! - [`encoder`]: outbound byte sequences
//! - [`decoder`] and [`cache`]: inbound stream to state updates
//! - [`session`]: [`MixerSession`] owning all of the above for one console

pub mod action;
pub mod cache;
pub mod channel;
pub mod codec;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod session;


pub use action::{ActionRequest, MuteState};
pub use cache::{CacheUpdate, ChannelState, StateCache};
pub use channel::{ChannelType, LogicalChannel};
pub use codec::{Color, SceneAddress};
pub use encoder::Outbound;
pub use error::ProtocolError;
pub use session::{MixerSession, SyncPlan};

/// Default TCP port of the Avantis MIDI interface
pub const DEFAULT_PORT: u16 = 51325;
