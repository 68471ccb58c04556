//! Avantis Bridge
//!
//! Drives an Allen & Heath Avantis console over its MIDI TCP port and
//! mirrors the console state for a show-control host.

pub mod avantis;
pub mod cli;
pub mod config;
pub mod drivers;
pub mod midi;
pub mod monitor;
pub mod paths;
pub mod state;
pub mod transport;
