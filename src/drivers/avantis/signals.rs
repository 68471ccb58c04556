//! Cache updates to indicator signals
//!
//! Signal names are `{type}_{index}_{field}` with the snake_case channel type
//! id, plus `current_scene`, `current_scene_name` and `last_recalled_scene`.

use serde_json::{json, Value};

use crate::avantis::codec::FADER_MIN_DB;
use crate::avantis::{CacheUpdate, LogicalChannel};

pub const CURRENT_SCENE: &str = "current_scene";
pub const CURRENT_SCENE_NAME: &str = "current_scene_name";
pub const LAST_RECALLED_SCENE: &str = "last_recalled_scene";

pub fn signal_name(channel: LogicalChannel, field: &str) -> String {
    format!("{}_{}_{}", channel.kind.id(), channel.index, field)
}

pub fn format_level(db: f64) -> String {
    if db <= FADER_MIN_DB {
        "-inf dB".to_string()
    } else {
        format!("{:.1} dB", db)
    }
}

/// Signal emitted for one cache write, if the host has a variable for it
pub fn signal_for(update: &CacheUpdate) -> Option<(String, Value)> {
    let signal = match update {
        CacheUpdate::Mute { channel, muted } => (
            signal_name(*channel, "mute"),
            json!(if *muted { "Muted" } else { "Unmuted" }),
        ),
        CacheUpdate::Fader { channel, db } => (signal_name(*channel, "level"), json!(format_level(*db))),
        CacheUpdate::Name { channel, name } => (signal_name(*channel, "name"), json!(name)),
        CacheUpdate::Color { channel, color } => (signal_name(*channel, "color"), json!(color.label())),
        CacheUpdate::MainAssign { channel, assigned } => (signal_name(*channel, "main"), json!(assigned)),
        // Group membership has no host variable
        CacheUpdate::GroupAssign { .. } => return None,
        CacheUpdate::Scene { scene } => (CURRENT_SCENE.to_string(), json!(scene)),
        CacheUpdate::SceneName { name, .. } => (CURRENT_SCENE_NAME.to_string(), json!(name)),
    };
    Some(signal)
}
