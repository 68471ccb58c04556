//! Typed action requests accepted by the protocol engine

use std::fmt;
use std::str::FromStr;

use super::channel::{ChannelType, LogicalChannel};
use super::codec::{Color, SceneAddress};
use super::error::ProtocolError;

/// Requested mute transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteState {
    On,
    Off,
    /// Flip the cached state (unknown counts as unmuted)
    Toggle,
}

impl MuteState {
    /// Resolve against the cached mute state
    pub fn resolve(self, current: Option<bool>) -> bool {
        match self {
            MuteState::On => true,
            MuteState::Off => false,
            MuteState::Toggle => !current.unwrap_or(false),
        }
    }
}

impl FromStr for MuteState {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" | "mute" | "true" | "1" => Ok(MuteState::On),
            "off" | "unmute" | "false" | "0" => Ok(MuteState::Off),
            "toggle" => Ok(MuteState::Toggle),
            other => Err(ProtocolError::Validation(format!(
                "mute state must be on, off or toggle (got '{}')",
                other
            ))),
        }
    }
}

/// One operation a control surface can ask of the console
#[derive(Debug, Clone, PartialEq)]
pub enum ActionRequest {
    Mute {
        channel: LogicalChannel,
        state: MuteState,
    },
    Fader {
        channel: LogicalChannel,
        db: f64,
    },
    /// DCA or mute-group membership for one channel
    Assign {
        channel: LogicalChannel,
        groups: Vec<LogicalChannel>,
        assign: bool,
    },
    MainAssign {
        channel: LogicalChannel,
        assign: bool,
    },
    SceneRecall {
        scene: u16,
    },
    SetName {
        channel: LogicalChannel,
        name: String,
    },
    SetColor {
        channel: LogicalChannel,
        color: Color,
    },
    SendLevel {
        source: LogicalChannel,
        destination: LogicalChannel,
        db: f64,
    },
}

impl ActionRequest {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ActionRequest::Mute { .. } => "mute",
            ActionRequest::Fader { .. } => "fader",
            ActionRequest::Assign { .. } => "assign",
            ActionRequest::MainAssign { .. } => "main_assign",
            ActionRequest::SceneRecall { .. } => "scene_recall",
            ActionRequest::SetName { .. } => "set_name",
            ActionRequest::SetColor { .. } => "set_color",
            ActionRequest::SendLevel { .. } => "send_level",
        }
    }

    /// Check family rules that the address map alone does not enforce
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            ActionRequest::Mute { channel, .. } => require_strip(channel, "muted"),
            ActionRequest::Fader { channel, db } => {
                require_strip(channel, "faded")?;
                if channel.kind == ChannelType::MuteGroup {
                    return Err(reject(channel, "has no fader"));
                }
                require_level(*db)
            }
            ActionRequest::Assign { channel, groups, .. } => {
                require_strip(channel, "assigned")?;
                if matches!(channel.kind, ChannelType::Dca | ChannelType::MuteGroup) {
                    return Err(reject(channel, "cannot join a DCA or mute group"));
                }
                if groups.is_empty() {
                    return Err(ProtocolError::Validation("no groups to assign".to_string()));
                }
                match groups
                    .iter()
                    .find(|g| !matches!(g.kind, ChannelType::Dca | ChannelType::MuteGroup))
                {
                    Some(group) => Err(reject(group, "is not a DCA or mute group")),
                    None => Ok(()),
                }
            }
            ActionRequest::MainAssign { channel, .. } => {
                require_strip(channel, "routed to the main mix")?;
                if matches!(
                    channel.kind,
                    ChannelType::Main | ChannelType::Dca | ChannelType::MuteGroup
                ) {
                    return Err(reject(channel, "cannot be routed to the main mix"));
                }
                Ok(())
            }
            ActionRequest::SceneRecall { scene } => SceneAddress::from_scene(*scene).map(|_| ()),
            ActionRequest::SetName { channel, .. } => require_strip(channel, "named"),
            ActionRequest::SetColor { channel, .. } => require_strip(channel, "colored"),
            ActionRequest::SendLevel { source, destination, db } => {
                require_strip(source, "sent")?;
                if !is_send_destination(destination.kind) {
                    return Err(reject(destination, "is not an aux, FX send or matrix"));
                }
                if source.kind == destination.kind {
                    return Err(reject(source, "cannot send to its own family"));
                }
                require_level(*db)
            }
        }
    }
}

impl fmt::Display for ActionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionRequest::Mute { channel, state } => write!(f, "mute {} {:?}", channel, state),
            ActionRequest::Fader { channel, db } => write!(f, "fader {} {:.1} dB", channel, db),
            ActionRequest::Assign { channel, groups, assign } => {
                let groups: Vec<String> = groups.iter().map(|g| g.to_string()).collect();
                let verb = if *assign { "assign" } else { "unassign" };
                write!(f, "{} {} to [{}]", verb, channel, groups.join(", "))
            }
            ActionRequest::MainAssign { channel, assign } => {
                write!(f, "main {} {}", channel, if *assign { "on" } else { "off" })
            }
            ActionRequest::SceneRecall { scene } => write!(f, "recall scene {}", scene),
            ActionRequest::SetName { channel, name } => write!(f, "name {} '{}'", channel, name),
            ActionRequest::SetColor { channel, color } => write!(f, "color {} {}", channel, color),
            ActionRequest::SendLevel { source, destination, db } => {
                write!(f, "send {} -> {} {:.1} dB", source, destination, db)
            }
        }
    }
}

/// Bus families that accept send levels
pub fn is_send_destination(kind: ChannelType) -> bool {
    matches!(
        kind,
        ChannelType::MonoAux
            | ChannelType::StereoAux
            | ChannelType::MonoFxSend
            | ChannelType::StereoFxSend
            | ChannelType::MonoMatrix
            | ChannelType::StereoMatrix
    )
}

fn require_strip(channel: &LogicalChannel, verb: &str) -> Result<(), ProtocolError> {
    if channel.kind == ChannelType::Scene {
        return Err(ProtocolError::Validation(format!("a scene cannot be {}", verb)));
    }
    Ok(())
}

fn require_level(db: f64) -> Result<(), ProtocolError> {
    if db.is_nan() {
        return Err(ProtocolError::Validation("level is not a number".to_string()));
    }
    Ok(())
}

fn reject(channel: &LogicalChannel, reason: &str) -> ProtocolError {
    ProtocolError::Validation(format!("{} {}", channel, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(kind: ChannelType, index: u16) -> LogicalChannel {
        LogicalChannel::new(kind, index).unwrap()
    }

    #[test]
    fn test_toggle_resolution() {
        assert!(MuteState::Toggle.resolve(None));
        assert!(MuteState::Toggle.resolve(Some(false)));
        assert!(!MuteState::Toggle.resolve(Some(true)));
        assert!(MuteState::On.resolve(Some(true)));
        assert!(!MuteState::Off.resolve(None));
    }

    #[test]
    fn test_assign_requires_group_targets() {
        let request = ActionRequest::Assign {
            channel: ch(ChannelType::Input, 1),
            groups: vec![ch(ChannelType::Dca, 1), ch(ChannelType::MonoAux, 2)],
            assign: true,
        };
        assert!(matches!(request.validate(), Err(ProtocolError::Validation(_))));

        let request = ActionRequest::Assign {
            channel: ch(ChannelType::Input, 1),
            groups: vec![ch(ChannelType::Dca, 1), ch(ChannelType::MuteGroup, 2)],
            assign: true,
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_send_level_destination_rules() {
        let ok = ActionRequest::SendLevel {
            source: ch(ChannelType::Input, 3),
            destination: ch(ChannelType::MonoAux, 1),
            db: -10.0,
        };
        assert!(ok.validate().is_ok());

        let bad = ActionRequest::SendLevel {
            source: ch(ChannelType::Input, 3),
            destination: ch(ChannelType::Dca, 1),
            db: -10.0,
        };
        assert!(bad.validate().is_err());

        let nan = ActionRequest::SendLevel {
            source: ch(ChannelType::Input, 3),
            destination: ch(ChannelType::MonoAux, 1),
            db: f64::NAN,
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_scene_is_not_a_strip() {
        let request = ActionRequest::Mute {
            channel: ch(ChannelType::Scene, 4),
            state: MuteState::On,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_mute_state_parsing() {
        assert_eq!("Toggle".parse::<MuteState>().unwrap(), MuteState::Toggle);
        assert_eq!("on".parse::<MuteState>().unwrap(), MuteState::On);
        assert!("maybe".parse::<MuteState>().is_err());
    }
}
