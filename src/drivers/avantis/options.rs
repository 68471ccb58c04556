//! Host option objects to typed action requests
//!
//! Hosts send loosely typed camelCase objects: numbers may arrive as strings
//! (sometimes hex), and most fields have defaults. Everything is resolved
//! here so the protocol engine only sees [`ActionRequest`].

use anyhow::{Context, Result};
use serde_json::Value;

use crate::avantis::{ActionRequest, ChannelType, Color, LogicalChannel, MuteState};

/// Action ids understood by [`parse_action`]
pub const ACTIONS: [&str; 8] = [
    "channel_mute",
    "fader_level",
    "recall_scene",
    "channel_assign",
    "main_assign",
    "channel_name",
    "channel_color",
    "send_level",
];

pub fn parse_action(action: &str, options: &Value) -> Result<ActionRequest> {
    let request = match action {
        "channel_mute" => ActionRequest::Mute {
            channel: channel(options)?,
            state: mute_state_opt(options)?,
        },
        "fader_level" => ActionRequest::Fader {
            channel: channel(options)?,
            db: number_opt(options, "level")?.unwrap_or(0.0),
        },
        "recall_scene" => ActionRequest::SceneRecall {
            scene: index_opt(options, "scene")?.unwrap_or(1),
        },
        "channel_assign" => {
            let kind = kind_opt(options, "destType")?.unwrap_or(ChannelType::Dca);
            let groups = group_list(options.get("groups"))
                .context("Invalid 'groups' option")?
                .into_iter()
                .map(|index| LogicalChannel::new(kind, index))
                .collect::<Result<Vec<_>, _>>()?;
            ActionRequest::Assign {
                channel: channel(options)?,
                groups,
                assign: bool_opt(options, "assign")?.unwrap_or(true),
            }
        }
        "main_assign" => ActionRequest::MainAssign {
            channel: channel(options)?,
            assign: bool_opt(options, "assign")?.unwrap_or(true),
        },
        "channel_name" => ActionRequest::SetName {
            channel: channel(options)?,
            name: string_opt(options, "name").unwrap_or_default(),
        },
        "channel_color" => ActionRequest::SetColor {
            channel: channel(options)?,
            color: color_opt(options)?.unwrap_or(Color::Off),
        },
        "send_level" => {
            let dest_kind = kind_opt(options, "destType")?.unwrap_or(ChannelType::MonoAux);
            let dest = index_opt(options, "dest")?.unwrap_or(1);
            ActionRequest::SendLevel {
                source: channel(options)?,
                destination: LogicalChannel::new(dest_kind, dest)?,
                db: number_opt(options, "level")?.unwrap_or(0.0),
            }
        }
        other => anyhow::bail!("Unknown action '{}'", other),
    };

    request.validate()?;
    Ok(request)
}

/// `channelType` (default input) plus `channel` (default 1)
fn channel(options: &Value) -> Result<LogicalChannel> {
    let kind = kind_opt(options, "channelType")?.unwrap_or(ChannelType::Input);
    let index = index_opt(options, "channel")?.unwrap_or(1);
    Ok(LogicalChannel::new(kind, index)?)
}

fn kind_opt(options: &Value, key: &str) -> Result<Option<ChannelType>> {
    match string_opt(options, key) {
        Some(s) => Ok(Some(s.parse()?)),
        None => Ok(None),
    }
}

fn string_opt(options: &Value, key: &str) -> Option<String> {
    match options.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `muteState`: absent means toggle, booleans are explicit
fn mute_state_opt(options: &Value) -> Result<MuteState> {
    match options.get("muteState") {
        None | Some(Value::Null) => Ok(MuteState::Toggle),
        Some(Value::Bool(true)) => Ok(MuteState::On),
        Some(Value::Bool(false)) => Ok(MuteState::Off),
        Some(Value::String(s)) => Ok(s.parse()?),
        Some(Value::Number(n)) => Ok(n.to_string().parse()?),
        Some(other) => anyhow::bail!("'muteState' must be on, off or toggle, got {}", other),
    }
}

/// Number or numeric string, hex allowed with a 0x prefix
fn number_opt(options: &Value, key: &str) -> Result<Option<f64>> {
    let Some(value) = options.get(key) else {
        return Ok(None);
    };
    parse_number(value).map(Some).with_context(|| format!("Invalid '{}' option", key))
}

fn parse_number(value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("{} is not representable", n)),
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Ok(u32::from_str_radix(hex, 16)
                    .with_context(|| format!("'{}' is not a hex number", s))? as f64)
            } else if s.eq_ignore_ascii_case("-inf") {
                Ok(f64::NEG_INFINITY)
            } else {
                s.parse::<f64>()
                    .with_context(|| format!("'{}' is not a number", s))
            }
        }
        other => anyhow::bail!("expected a number, got {}", other),
    }
}

fn index_opt(options: &Value, key: &str) -> Result<Option<u16>> {
    let Some(n) = number_opt(options, key)? else {
        return Ok(None);
    };
    if n.fract() != 0.0 || !(0.0..=f64::from(u16::MAX)).contains(&n) {
        anyhow::bail!("'{}' must be a whole number, got {}", key, n);
    }
    Ok(Some(n as u16))
}

fn bool_opt(options: &Value, key: &str) -> Result<Option<bool>> {
    match options.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::Number(n)) => Ok(Some(n.as_f64().unwrap_or(0.0) != 0.0)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "yes" | "1" => Ok(Some(true)),
            "false" | "off" | "no" | "0" => Ok(Some(false)),
            _ => anyhow::bail!("'{}' must be a boolean, got '{}'", key, s),
        },
        Some(other) => anyhow::bail!("'{}' must be a boolean, got {}", key, other),
    }
}

/// Color by label ("Lt Blue") or by console value (0-7)
fn color_opt(options: &Value) -> Result<Option<Color>> {
    match options.get("color") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            let value = n.as_u64().context("Invalid 'color' option")?;
            u8::try_from(value)
                .ok()
                .and_then(Color::from_value)
                .map(Some)
                .with_context(|| format!("Unknown color value {}", value))
        }
        Some(Value::String(s)) => Ok(Some(s.parse()?)),
        Some(other) => anyhow::bail!("Invalid 'color' option: {}", other),
    }
}

/// Array of indices, a single index, or a comma-separated string
fn group_list(value: Option<&Value>) -> Result<Vec<u16>> {
    let to_index = |n: f64| -> Result<u16> {
        if n.fract() != 0.0 || !(0.0..=f64::from(u16::MAX)).contains(&n) {
            anyhow::bail!("group {} is not a whole number", n);
        }
        Ok(n as u16)
    };

    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(|v| to_index(parse_number(v)?)).collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| to_index(parse_number(&Value::String(part.to_string()))?))
            .collect(),
        Some(v @ Value::Number(_)) => Ok(vec![to_index(parse_number(v)?)?]),
        Some(other) => anyhow::bail!("expected a list of groups, got {}", other),
    }
}
