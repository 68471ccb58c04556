//! Allen & Heath Avantis driver
//!
//! Provides host integration with an Avantis console over its MIDI TCP port:
//! - Mute, fader, DCA / mute group and main-mix assignment
//! - Scene recall with bank tracking
//! - Channel names and colors
//! - Indicator signals for every learned value
//! - Name/color re-sync after each (re)connect

mod driver;
pub mod options;
pub mod signals;

pub use driver::AvantisDriver;
pub use options::{parse_action, ACTIONS};
