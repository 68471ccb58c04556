//! Command enum for the session actor
//!
//! Inbound chunks and bookkeeping after a failed send are fire-and-forget.
//! Everything that hands data back uses a oneshot channel.

use std::sync::Arc;
use tokio::sync::oneshot;

use crate::avantis::{
    ActionRequest, CacheUpdate, ChannelState, ChannelType, LogicalChannel, Outbound,
    ProtocolError, SyncPlan,
};

/// Subscriber callback, invoked with every update that changed the cache
pub type SubscriberFn = Arc<dyn Fn(&CacheUpdate) + Send + Sync>;

/// Receives requests the session wants sent in answer to console feedback
pub type QuerySinkFn = Arc<dyn Fn(Vec<Vec<u8>>) + Send + Sync>;

pub enum SessionCommand {
    // -------------------------------------------------------------------------
    // Hot path (no response)
    // -------------------------------------------------------------------------
    /// Raw bytes read from the console
    Inbound { chunk: Vec<u8> },

    /// A send did not complete; scene bank tracking is no longer trustworthy
    SendFailed,

    /// A new connection came up, or the old one is gone
    ResetConnection,

    /// Route follow-up requests (scene names) to `sink`
    SetQuerySink { sink: QuerySinkFn },

    // -------------------------------------------------------------------------
    // Request-response
    // -------------------------------------------------------------------------
    Encode {
        request: ActionRequest,
        response: oneshot::Sender<Result<Outbound, ProtocolError>>,
    },

    /// Apply the updates of a fully written action
    Commit {
        outbound: Outbound,
        response: oneshot::Sender<Vec<CacheUpdate>>,
    },

    StartupQueries {
        plan: SyncPlan,
        response: oneshot::Sender<Vec<Vec<u8>>>,
    },

    /// Change the 0-based base MIDI channel; replies whether it changed
    Reconfigure {
        base_midi_channel: u8,
        response: oneshot::Sender<Result<bool, ProtocolError>>,
    },

    GetChannel {
        channel: LogicalChannel,
        response: oneshot::Sender<Option<ChannelState>>,
    },

    /// Every strip of a family with at least one known field
    ListKnown {
        kind: ChannelType,
        response: oneshot::Sender<Vec<(LogicalChannel, ChannelState)>>,
    },

    CurrentScene {
        response: oneshot::Sender<Option<u16>>,
    },

    CurrentSceneName {
        response: oneshot::Sender<Option<String>>,
    },

    Subscribe {
        listener: SubscriberFn,
        response: oneshot::Sender<usize>,
    },

    Shutdown,
}

// SubscriberFn has no Debug
impl std::fmt::Debug for SessionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionCommand::Inbound { chunk } => f
                .debug_struct("Inbound")
                .field("len", &chunk.len())
                .finish(),
            SessionCommand::SendFailed => write!(f, "SendFailed"),
            SessionCommand::ResetConnection => write!(f, "ResetConnection"),
            SessionCommand::Encode { request, .. } => f
                .debug_struct("Encode")
                .field("request", request)
                .finish_non_exhaustive(),
            SessionCommand::Commit { outbound, .. } => f
                .debug_struct("Commit")
                .field("updates", &outbound.updates.len())
                .finish_non_exhaustive(),
            SessionCommand::StartupQueries { plan, .. } => f
                .debug_struct("StartupQueries")
                .field("plan", plan)
                .finish_non_exhaustive(),
            SessionCommand::Reconfigure {
                base_midi_channel, ..
            } => f
                .debug_struct("Reconfigure")
                .field("base_midi_channel", base_midi_channel)
                .finish_non_exhaustive(),
            SessionCommand::GetChannel { channel, .. } => f
                .debug_struct("GetChannel")
                .field("channel", channel)
                .finish_non_exhaustive(),
            SessionCommand::ListKnown { kind, .. } => f
                .debug_struct("ListKnown")
                .field("kind", kind)
                .finish_non_exhaustive(),
            SessionCommand::CurrentScene { .. } => {
                f.debug_struct("CurrentScene").finish_non_exhaustive()
            }
            SessionCommand::CurrentSceneName { .. } => {
                f.debug_struct("CurrentSceneName").finish_non_exhaustive()
            }
            SessionCommand::SetQuerySink { .. } => f.debug_struct("SetQuerySink").finish_non_exhaustive(),
            SessionCommand::Subscribe { .. } => f.debug_struct("Subscribe").finish_non_exhaustive(),
            SessionCommand::Shutdown => write!(f, "Shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avantis::MuteState;

    #[test]
    fn test_session_command_debug() {
        let cmd = SessionCommand::Inbound {
            chunk: vec![0x9B, 0x00, 0x7F],
        };
        assert_eq!(format!("{:?}", cmd), "Inbound { len: 3 }");

        let (tx, _rx) = oneshot::channel();
        let cmd = SessionCommand::Encode {
            request: ActionRequest::Mute {
                channel: LogicalChannel::new(ChannelType::Dca, 2).unwrap(),
                state: MuteState::Toggle,
            },
            response: tx,
        };
        let debug_str = format!("{:?}", cmd);
        assert!(debug_str.contains("Encode"));
        assert!(debug_str.contains("Dca"));

        assert_eq!(format!("{:?}", SessionCommand::Shutdown), "Shutdown");
    }
}
