//! Console transport
//!
//! The protocol engine never touches sockets. It hands ordered byte buffers
//! to a [`Transport`] and receives raw chunks back through callbacks. The
//! transport owns connecting, fixed-interval reconnects, MIDI pacing and
//! serialization of concurrent sends.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod tcp;

pub use tcp::TcpTransport;

/// Callback for raw inbound chunks
pub type DataCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Callback for connection status changes
pub type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Connection status for the console link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Socket is up and the send queue is live
    Connected,
    /// No connection and none being attempted
    Disconnected,
    /// Waiting to retry after a failed or lost connection
    Reconnecting { attempt: usize },
}

/// Failures surfaced to the sender of an action
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("not connected to the console")]
    NotConnected,

    /// Buffers before `sent` reached the socket; the rest were abandoned
    #[error("write failed after {sent} of {total} buffers: {reason}")]
    Write {
        sent: usize,
        total: usize,
        reason: String,
    },

    #[error("transport destroyed")]
    Destroyed,
}

/// Timing knobs for a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Minimum gap between two buffers on the wire
    pub pacing: Duration,
    pub reconnect_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            pacing: Duration::from_millis(20),
            reconnect_interval: Duration::from_millis(5000),
            connect_timeout: Duration::from_millis(3000),
        }
    }
}

/// Byte pipe to the console
///
/// Note: all methods take &self so a transport can be shared as
/// `Arc<dyn Transport>`. Implementations use interior mutability.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start connecting (and keep reconnecting) to `host:port`
    fn connect(&self, host: &str, port: u16);

    /// Point the transport at a new address, dropping any live connection
    fn retarget(&self, host: &str, port: u16);

    /// Register a callback for raw inbound chunks
    fn on_data(&self, callback: DataCallback);

    /// Register a callback for every status change
    fn on_status(&self, callback: StatusCallback);

    /// Called each time a connection comes up
    fn on_connect(&self, callback: Arc<dyn Fn() + Send + Sync>) {
        self.on_status(Arc::new(move |status| {
            if status == ConnectionStatus::Connected {
                callback();
            }
        }));
    }

    /// Called each time a live connection is lost
    fn on_disconnect(&self, callback: Arc<dyn Fn() + Send + Sync>) {
        self.on_status(Arc::new(move |status| {
            if status == ConnectionStatus::Disconnected {
                callback();
            }
        }));
    }

    /// Write buffers in order, paced, aborting at the first failure
    ///
    /// Resolves once every buffer has been written or the first error
    /// occurred. Concurrent calls are queued FIFO and never interleave.
    async fn send(&self, buffers: Vec<Vec<u8>>) -> Result<(), TransportError>;

    /// Tear down the connection and fail everything still queued
    async fn destroy(&self);

    fn status(&self) -> ConnectionStatus;
}
