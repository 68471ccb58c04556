//! SessionActor - serializes all access to one console's protocol state
//!
//! The decoder, encoder and cache live inside a single task. Transport
//! callbacks feed inbound chunks without blocking, and the driver asks for
//! encodes and commits through the handle, so the cache is never shared
//! behind a lock.

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::actor_handle::SessionHandle;
use super::commands::{QuerySinkFn, SessionCommand, SubscriberFn};
use crate::avantis::{CacheUpdate, MixerSession, ProtocolError};

pub struct SessionActor {
    session: MixerSession,
    subscribers: Vec<SubscriberFn>,
    query_sink: Option<QuerySinkFn>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    /// Updates delivered to subscribers so far
    update_count: u64,
}

impl SessionActor {
    /// Spawn the actor for a 0-based base MIDI channel
    pub fn spawn(base_midi_channel: u8) -> Result<SessionHandle, ProtocolError> {
        let session = MixerSession::new(base_midi_channel)?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            session,
            subscribers: Vec::new(),
            query_sink: None,
            command_rx: cmd_rx,
            update_count: 0,
        };
        tokio::spawn(actor.run());

        info!(
            base_midi_channel = base_midi_channel + 1,
            "SessionActor spawned"
        );
        Ok(SessionHandle::new(cmd_tx))
    }

    async fn run(mut self) {
        debug!("SessionActor run loop started");

        while let Some(cmd) = self.command_rx.recv().await {
            trace!(?cmd, "Processing command");

            match cmd {
                SessionCommand::Inbound { chunk } => {
                    let updates = self.session.decode(&chunk);
                    self.notify_subscribers(&updates);
                    if let Some(sink) = &self.query_sink {
                        let queries = self.session.follow_up_queries(&updates);
                        if !queries.is_empty() {
                            sink(queries);
                        }
                    }
                }
                SessionCommand::SetQuerySink { sink } => {
                    self.query_sink = Some(sink);
                }
                SessionCommand::SendFailed => {
                    self.session.send_failed();
                }
                SessionCommand::ResetConnection => {
                    self.session.reset_connection();
                }
                SessionCommand::Encode { request, response } => {
                    let result = self.session.encode(&request);
                    if let Err(e) = &result {
                        warn!("Rejected {}: {}", request.kind(), e);
                    }
                    let _ = response.send(result);
                }
                SessionCommand::Commit { outbound, response } => {
                    let updates = self.session.commit(&outbound);
                    self.notify_subscribers(&updates);
                    let _ = response.send(updates);
                }
                SessionCommand::StartupQueries { plan, response } => {
                    let _ = response.send(self.session.startup_queries(&plan));
                }
                SessionCommand::Reconfigure {
                    base_midi_channel,
                    response,
                } => {
                    let _ = response.send(self.session.set_base_midi_channel(base_midi_channel));
                }
                SessionCommand::GetChannel { channel, response } => {
                    let _ = response.send(self.session.cache().get(channel).cloned());
                }
                SessionCommand::ListKnown { kind, response } => {
                    let known = self
                        .session
                        .cache()
                        .known(kind)
                        .map(|(channel, state)| (channel, state.clone()))
                        .collect();
                    let _ = response.send(known);
                }
                SessionCommand::CurrentScene { response } => {
                    let _ = response.send(self.session.cache().current_scene());
                }
                SessionCommand::CurrentSceneName { response } => {
                    let name = self.session.cache().current_scene_name().map(str::to_string);
                    let _ = response.send(name);
                }
                SessionCommand::Subscribe { listener, response } => {
                    self.subscribers.push(listener);
                    let id = self.subscribers.len() - 1;
                    let _ = response.send(id);
                    debug!(subscriber_id = id, "Added subscriber");
                }
                SessionCommand::Shutdown => {
                    info!("SessionActor received shutdown command");
                    break;
                }
            }
        }

        info!(
            update_count = self.update_count,
            "SessionActor run loop terminated"
        );
    }

    fn notify_subscribers(&mut self, updates: &[CacheUpdate]) {
        for update in updates {
            self.update_count += 1;
            trace!(?update, "Cache updated");
            for subscriber in &self.subscribers {
                subscriber(update);
            }
        }
    }
}
