//! SessionHandle - public API for the SessionActor
//!
//! Cloneable and cheap. Hot-path methods return immediately; queries await a
//! oneshot reply and fall back to an empty answer once the actor is gone.

use tokio::sync::{mpsc, oneshot};

use super::commands::{QuerySinkFn, SessionCommand, SubscriberFn};
use crate::avantis::{
    ActionRequest, CacheUpdate, ChannelState, ChannelType, LogicalChannel, Outbound,
    ProtocolError, SyncPlan,
};
use crate::transport::TransportError;

#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(cmd_tx: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Spawn a new SessionActor and return its handle
    pub fn spawn(base_midi_channel: u8) -> Result<Self, ProtocolError> {
        super::actor::SessionActor::spawn(base_midi_channel)
    }

    // =========================================================================
    // Hot path methods (fire-and-forget)
    // =========================================================================

    /// Feed bytes read from the console
    pub fn inbound(&self, chunk: Vec<u8>) {
        let _ = self.cmd_tx.send(SessionCommand::Inbound { chunk });
    }

    pub fn send_failed(&self) {
        let _ = self.cmd_tx.send(SessionCommand::SendFailed);
    }

    /// Drop everything learned from the console
    pub fn reset_connection(&self) {
        let _ = self.cmd_tx.send(SessionCommand::ResetConnection);
    }

    // =========================================================================
    // Query methods
    // =========================================================================

    /// Build the bytes for an action without touching the cache
    pub async fn encode(&self, request: ActionRequest) -> Result<Outbound, ProtocolError> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = SessionCommand::Encode {
            request,
            response: response_tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            return Err(ProtocolError::Transport(TransportError::Destroyed));
        }

        response_rx
            .await
            .unwrap_or(Err(ProtocolError::Transport(TransportError::Destroyed)))
    }

    /// Apply the updates of an action whose buffers were all written
    ///
    /// Returns only the updates that changed the cache.
    pub async fn commit(&self, outbound: Outbound) -> Vec<CacheUpdate> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = SessionCommand::Commit {
            outbound,
            response: response_tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            return Vec::new();
        }

        response_rx.await.ok().unwrap_or_default()
    }

    pub async fn startup_queries(&self, plan: SyncPlan) -> Vec<Vec<u8>> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = SessionCommand::StartupQueries {
            plan,
            response: response_tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            return Vec::new();
        }

        response_rx.await.ok().unwrap_or_default()
    }

    /// Move to another base MIDI channel (0-based)
    ///
    /// Returns Ok(true) when the base changed and the session was reset.
    pub async fn reconfigure(&self, base_midi_channel: u8) -> Result<bool, ProtocolError> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = SessionCommand::Reconfigure {
            base_midi_channel,
            response: response_tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            return Err(ProtocolError::Transport(TransportError::Destroyed));
        }

        response_rx
            .await
            .unwrap_or(Err(ProtocolError::Transport(TransportError::Destroyed)))
    }

    pub async fn get_channel(&self, channel: LogicalChannel) -> Option<ChannelState> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = SessionCommand::GetChannel {
            channel,
            response: response_tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            return None;
        }

        response_rx.await.ok().flatten()
    }

    pub async fn list_known(&self, kind: ChannelType) -> Vec<(LogicalChannel, ChannelState)> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = SessionCommand::ListKnown {
            kind,
            response: response_tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            return Vec::new();
        }

        response_rx.await.ok().unwrap_or_default()
    }

    pub async fn current_scene(&self) -> Option<u16> {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionCommand::CurrentScene {
                response: response_tx,
            })
            .is_err()
        {
            return None;
        }

        response_rx.await.ok().flatten()
    }

    pub async fn current_scene_name(&self) -> Option<String> {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionCommand::CurrentSceneName {
                response: response_tx,
            })
            .is_err()
        {
            return None;
        }

        response_rx.await.ok().flatten()
    }

    /// Where to send requests prompted by inbound feedback
    pub fn set_query_sink(&self, sink: QuerySinkFn) {
        let _ = self.cmd_tx.send(SessionCommand::SetQuerySink { sink });
    }

    /// Register a listener for cache changes
    ///
    /// Returns the subscriber id, or None if the actor has stopped.
    pub async fn subscribe(&self, listener: SubscriberFn) -> Option<usize> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = SessionCommand::Subscribe {
            listener,
            response: response_tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            return None;
        }

        response_rx.await.ok()
    }

    // =========================================================================
    // Lifecycle methods
    // =========================================================================

    pub fn is_alive(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avantis::MuteState;
    use std::sync::Arc;

    fn input(index: u16) -> LogicalChannel {
        LogicalChannel::new(ChannelType::Input, index).unwrap()
    }

    #[test]
    fn test_handle_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<SessionHandle>();
    }

    #[tokio::test]
    async fn test_is_alive_when_channel_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let handle = SessionHandle::new(tx);
        assert!(!handle.is_alive());
        assert!(handle.get_channel(input(1)).await.is_none());
        assert_eq!(
            handle.encode(ActionRequest::SceneRecall { scene: 1 }).await,
            Err(ProtocolError::Transport(TransportError::Destroyed))
        );
    }

    #[tokio::test]
    async fn test_spawn_rejects_bad_base() {
        assert!(SessionHandle::spawn(12).is_err());
    }

    #[tokio::test]
    async fn test_inbound_reaches_cache_and_subscribers() {
        let handle = SessionHandle::spawn(11).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle
            .subscribe(Arc::new(move |update: &CacheUpdate| {
                let _ = tx.send(update.clone());
            }))
            .await
            .unwrap();

        handle.inbound(vec![0x9B, 0x03, 0x7F]);
        assert_eq!(
            rx.recv().await,
            Some(CacheUpdate::Mute {
                channel: input(3),
                muted: true
            })
        );
        assert_eq!(
            handle.get_channel(input(3)).await.and_then(|s| s.mute),
            Some(true)
        );

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_encode_commit_round() {
        let handle = SessionHandle::spawn(11).unwrap();
        let toggle = ActionRequest::Mute {
            channel: input(9),
            state: MuteState::Toggle,
        };

        let outbound = handle.encode(toggle.clone()).await.unwrap();
        // Encoding alone leaves the cache untouched
        assert!(handle.list_known(ChannelType::Input).await.is_empty());

        let applied = handle.commit(outbound).await;
        assert_eq!(applied.len(), 1);

        let next = handle.encode(toggle).await.unwrap();
        assert_eq!(next.buffers[0][2], 0x3F);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_scene_and_reset() {
        let handle = SessionHandle::spawn(0).unwrap();
        handle.inbound(vec![0xB0, 0x00, 0x01, 0xC0, 0x04]);
        assert_eq!(handle.current_scene().await, Some(133));

        let mut reply = vec![0xF0, 0x00, 0x00, 0x1A, 0x50, 0x10, 0x01, 0x00, 0x00, 0x08, 0x05, 0x01];
        reply.extend_from_slice(b"Verse");
        reply.push(0xF7);
        handle.inbound(reply);
        assert_eq!(handle.current_scene_name().await.as_deref(), Some("Verse"));

        handle.reset_connection();
        assert_eq!(handle.current_scene().await, None);
        assert_eq!(handle.current_scene_name().await, None);

        assert_eq!(handle.reconfigure(0).await, Ok(false));
        assert_eq!(handle.reconfigure(4).await, Ok(true));
        assert!(handle.reconfigure(20).await.is_err());

        handle.shutdown();
    }
}
