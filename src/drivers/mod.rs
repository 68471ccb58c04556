//! Host bindings
//!
//! A driver turns untyped host actions into console commands and publishes
//! console state back to the host as named indicator signals.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::transport::{ConnectionStatus, StatusCallback};

/// Callback type for indicator emission
///
/// Drivers call this with (signal, value) pairs such as
/// ("input_5_mute", "Muted") or ("current_scene", 12).
pub type IndicatorCallback = Arc<dyn Fn(String, Value) + Send + Sync>;

/// Driver trait - all host integrations implement this
///
/// Note: All methods take &self (not &mut self) to support Arc<dyn Driver>.
/// Drivers should use interior mutability for mutable state.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Get the driver name (e.g., "avantis")
    fn name(&self) -> &str;

    /// Wire up callbacks and start connecting
    async fn init(&self) -> Result<()>;

    /// Execute a named action with a host option object
    ///
    /// # Arguments
    /// * `action` - The action id (e.g., "channel_mute", "recall_scene")
    /// * `options` - camelCase option object from the host
    async fn execute(&self, action: &str, options: &Value) -> Result<()>;

    /// Re-read state from the device (called after reconnect or on demand)
    async fn sync(&self) -> Result<()>;

    /// Shutdown the driver gracefully
    async fn shutdown(&self) -> Result<()>;

    /// Subscribe to indicator signals from this driver
    ///
    /// Default implementation: no-op (driver doesn't emit indicators)
    fn subscribe_indicators(&self, _callback: IndicatorCallback) {}

    /// Get current connection status
    ///
    /// Default implementation: always connected (for drivers without network connections)
    fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::Connected
    }

    /// Subscribe to connection status changes
    ///
    /// Default implementation: no-op (driver doesn't track connection status)
    fn subscribe_connection_status(&self, _callback: StatusCallback) {}
}

pub mod avantis;

pub use avantis::AvantisDriver;
