//! AvantisDriver core: action execution and state publication

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use super::options::parse_action;
use super::signals::{signal_for, LAST_RECALLED_SCENE};
use crate::avantis::{ActionRequest, CacheUpdate, ChannelState, LogicalChannel, ProtocolError, SyncPlan};
use crate::config::{AppConfig, ConsoleConfig};
use crate::drivers::{Driver, IndicatorCallback};
use crate::state::SessionHandle;
use crate::transport::{ConnectionStatus, StatusCallback, Transport};

/// Avantis console driver
pub struct AvantisDriver {
    name: String,
    console: RwLock<ConsoleConfig>,
    sync_plan: Arc<RwLock<SyncPlan>>,
    session: SessionHandle,
    transport: Arc<dyn Transport>,
    indicator_emitters: Arc<RwLock<Vec<IndicatorCallback>>>,
    last_recalled_scene: Mutex<Option<u16>>,
}

impl AvantisDriver {
    /// Create a driver and its session actor
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        console: ConsoleConfig,
        sync_plan: SyncPlan,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let session = SessionHandle::spawn(console.wire_base_channel())
            .with_context(|| format!("Invalid base MIDI channel {}", console.base_midi_channel))?;

        Ok(Self {
            name: "avantis".to_string(),
            console: RwLock::new(console),
            sync_plan: Arc::new(RwLock::new(sync_plan)),
            session,
            transport,
            indicator_emitters: Arc::new(RwLock::new(Vec::new())),
            last_recalled_scene: Mutex::new(None),
        })
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn console(&self) -> ConsoleConfig {
        self.console.read().clone()
    }

    /// Encode, send and commit one typed action
    ///
    /// Returns the cache updates the action produced. A failed send commits
    /// nothing.
    pub async fn perform(&self, request: ActionRequest) -> Result<Vec<CacheUpdate>> {
        let outbound = self
            .session
            .encode(request.clone())
            .await
            .with_context(|| format!("Cannot {}", request))?;

        debug!("🎚️  {} ({} buffer(s))", request, outbound.buffers.len());

        if let Err(e) = self.transport.send(outbound.buffers.clone()).await {
            self.session.send_failed();
            return Err(ProtocolError::from(e)).with_context(|| format!("Failed to send {}", request));
        }

        let applied = self.session.commit(outbound).await;

        if let ActionRequest::SceneRecall { scene } = request {
            *self.last_recalled_scene.lock() = Some(scene);
            emit(&self.indicator_emitters, LAST_RECALLED_SCENE.to_string(), json!(scene));
        }

        Ok(applied)
    }

    pub async fn channel_state(&self, channel: LogicalChannel) -> Option<ChannelState> {
        self.session.get_channel(channel).await
    }

    pub async fn current_scene(&self) -> Option<u16> {
        self.session.current_scene().await
    }

    pub async fn current_scene_name(&self) -> Option<String> {
        self.session.current_scene_name().await
    }

    pub fn last_recalled_scene(&self) -> Option<u16> {
        *self.last_recalled_scene.lock()
    }

    /// Apply a reloaded configuration
    ///
    /// A new host or port reconnects, which resets and re-syncs the session.
    /// A new base channel alone resets the session and re-syncs in place, in
    /// the background.
    pub async fn apply_config(&self, config: &AppConfig) -> Result<()> {
        *self.sync_plan.write() = config.sync.plan();

        let base_changed = self
            .session
            .reconfigure(config.console.wire_base_channel())
            .await
            .context("Failed to apply base MIDI channel")?;

        let moved = {
            let mut current = self.console.write();
            let moved = current.host != config.console.host || current.port != config.console.port;
            *current = config.console.clone();
            moved
        };

        if moved {
            self.transport
                .retarget(&config.console.host, config.console.port);
        } else if base_changed && self.transport.status() == ConnectionStatus::Connected {
            // A full re-sync takes seconds at the pacing interval
            let plan = self.sync_plan.read().clone();
            tokio::spawn(startup_sync(
                self.session.clone(),
                Arc::downgrade(&self.transport),
                plan,
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for AvantisDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self) -> Result<()> {
        let emitters = Arc::clone(&self.indicator_emitters);
        let subscribed = self
            .session
            .subscribe(Arc::new(move |update: &CacheUpdate| {
                if let Some((signal, value)) = signal_for(update) {
                    emit(&emitters, signal, value);
                }
            }))
            .await;
        if subscribed.is_none() {
            anyhow::bail!("Session actor is not running");
        }

        // Scene name requests answer scene changes made on the console
        let transport: Weak<dyn Transport> = Arc::downgrade(&self.transport);
        self.session.set_query_sink(Arc::new(move |queries: Vec<Vec<u8>>| {
            let Some(transport) = transport.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                if let Err(e) = transport.send(queries).await {
                    debug!("Scene name request not sent: {}", e);
                }
            });
        }));

        let session = self.session.clone();
        self.transport
            .on_data(Arc::new(move |chunk: &[u8]| session.inbound(chunk.to_vec())));

        // Weak: the transport owns this callback
        let session = self.session.clone();
        let transport: Weak<dyn Transport> = Arc::downgrade(&self.transport);
        let sync_plan = Arc::clone(&self.sync_plan);
        self.transport.on_status(Arc::new(move |status| {
            if status != ConnectionStatus::Connected {
                return;
            }
            session.reset_connection();
            let plan = sync_plan.read().clone();
            tokio::spawn(startup_sync(session.clone(), transport.clone(), plan));
        }));

        let console = self.console();
        info!(
            "🎛️  Avantis driver on {}:{} (MIDI channel {})",
            console.host, console.port, console.base_midi_channel
        );
        self.transport.connect(&console.host, console.port);
        Ok(())
    }

    async fn execute(&self, action: &str, options: &Value) -> Result<()> {
        let request = parse_action(action, options)
            .with_context(|| format!("Invalid options for '{}'", action))?;
        self.perform(request).await?;
        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        let plan = self.sync_plan.read().clone();
        let queries = self.session.startup_queries(plan).await;
        let count = queries.len();
        if let Err(e) = self.transport.send(queries).await {
            self.session.send_failed();
            return Err(ProtocolError::from(e)).context("Failed to query console state");
        }
        info!("🔄 Sent {} state queries", count);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.transport.destroy().await;
        self.session.shutdown();
        info!("Avantis driver stopped");
        Ok(())
    }

    fn subscribe_indicators(&self, callback: IndicatorCallback) {
        self.indicator_emitters.write().push(callback);
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.transport.status()
    }

    fn subscribe_connection_status(&self, callback: StatusCallback) {
        self.transport.on_status(callback);
    }
}

fn emit(emitters: &RwLock<Vec<IndicatorCallback>>, signal: String, value: Value) {
    for emitter in emitters.read().iter() {
        emitter(signal.clone(), value.clone());
    }
}

/// Rebuild names and colors after a connect
async fn startup_sync(session: SessionHandle, transport: Weak<dyn Transport>, plan: SyncPlan) {
    let queries = session.startup_queries(plan).await;
    if queries.is_empty() {
        return;
    }
    let Some(transport) = transport.upgrade() else {
        return;
    };

    let count = queries.len();
    info!("🔄 Querying console state ({} requests)", count);
    match transport.send(queries).await {
        Ok(()) => debug!("Startup queries sent"),
        Err(e) => {
            warn!("⚠️  Startup sync incomplete: {}", e);
            session.send_failed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avantis::{ChannelType, MuteState};
    use crate::transport::{DataCallback, TransportError};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct MockTransport {
        sent: Mutex<Vec<Vec<u8>>>,
        fail_with: Mutex<Option<TransportError>>,
        send_delay: Mutex<Option<Duration>>,
        status: RwLock<ConnectionStatus>,
        target: Mutex<Option<(String, u16)>>,
        data_callbacks: RwLock<Vec<DataCallback>>,
        status_callbacks: RwLock<Vec<StatusCallback>>,
    }

    impl MockTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail_with: Mutex::new(None),
                send_delay: Mutex::new(None),
                status: RwLock::new(ConnectionStatus::Disconnected),
                target: Mutex::new(None),
                data_callbacks: RwLock::new(Vec::new()),
                status_callbacks: RwLock::new(Vec::new()),
            })
        }

        fn set_status(&self, status: ConnectionStatus) {
            *self.status.write() = status.clone();
            let callbacks = self.status_callbacks.read().clone();
            for callback in callbacks {
                callback(status.clone());
            }
        }

        fn inject(&self, chunk: &[u8]) {
            for callback in self.data_callbacks.read().iter() {
                callback(chunk);
            }
        }

        fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn connect(&self, host: &str, port: u16) {
            *self.target.lock() = Some((host.to_string(), port));
        }

        fn retarget(&self, host: &str, port: u16) {
            *self.target.lock() = Some((host.to_string(), port));
        }

        fn on_data(&self, callback: DataCallback) {
            self.data_callbacks.write().push(callback);
        }

        fn on_status(&self, callback: StatusCallback) {
            self.status_callbacks.write().push(callback);
        }

        async fn send(&self, buffers: Vec<Vec<u8>>) -> Result<(), TransportError> {
            if let Some(e) = self.fail_with.lock().clone() {
                return Err(e);
            }
            if *self.status.read() != ConnectionStatus::Connected {
                return Err(TransportError::NotConnected);
            }
            let delay = *self.send_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.sent.lock().extend(buffers);
            Ok(())
        }

        async fn destroy(&self) {
            *self.status.write() = ConnectionStatus::Disconnected;
        }

        fn status(&self) -> ConnectionStatus {
            self.status.read().clone()
        }
    }

    fn console() -> ConsoleConfig {
        ConsoleConfig {
            host: "desk".to_string(),
            port: 51325,
            base_midi_channel: 12,
        }
    }

    fn no_sync() -> SyncPlan {
        SyncPlan {
            names: false,
            colors: false,
            families: Vec::new(),
        }
    }

    async fn connected_driver(plan: SyncPlan) -> (AvantisDriver, Arc<MockTransport>) {
        let transport = MockTransport::new();
        let driver = AvantisDriver::new(console(), plan, transport.clone()).unwrap();
        driver.init().await.unwrap();
        transport.set_status(ConnectionStatus::Connected);
        (driver, transport)
    }

    fn indicator_channel(driver: &AvantisDriver) -> mpsc::UnboundedReceiver<(String, Value)> {
        let (tx, rx) = mpsc::unbounded_channel();
        driver.subscribe_indicators(Arc::new(move |signal, value| {
            let _ = tx.send((signal, value));
        }));
        rx
    }

    fn input(index: u16) -> LogicalChannel {
        LogicalChannel::new(ChannelType::Input, index).unwrap()
    }

    #[tokio::test]
    async fn test_init_connects_to_configured_console() {
        let (_driver, transport) = connected_driver(no_sync()).await;
        assert_eq!(*transport.target.lock(), Some(("desk".to_string(), 51325)));
    }

    #[tokio::test]
    async fn test_mute_action_sends_and_publishes() {
        let (driver, transport) = connected_driver(no_sync()).await;
        let mut indicators = indicator_channel(&driver);

        driver
            .execute("channel_mute", &json!({"channelType": "input", "channel": 5, "muteState": "on"}))
            .await
            .unwrap();

        assert_eq!(transport.sent(), vec![vec![0x9B, 0x05, 0x7F, 0x9B, 0x05, 0x00]]);
        assert_eq!(
            indicators.recv().await,
            Some(("input_5_mute".to_string(), json!("Muted")))
        );
        assert_eq!(driver.channel_state(input(5)).await.and_then(|s| s.mute), Some(true));
    }

    #[tokio::test]
    async fn test_failed_send_commits_nothing() {
        let (driver, transport) = connected_driver(no_sync()).await;
        driver
            .perform(ActionRequest::SceneRecall { scene: 2 })
            .await
            .unwrap();
        assert_eq!(transport.sent().len(), 2);

        *transport.fail_with.lock() = Some(TransportError::Write {
            sent: 0,
            total: 1,
            reason: "broken pipe".to_string(),
        });

        let err = driver
            .perform(ActionRequest::Mute {
                channel: input(2),
                state: MuteState::On,
            })
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("broken pipe"));
        assert_eq!(driver.channel_state(input(2)).await.and_then(|s| s.mute), None);

        // Bank tracking was invalidated, so the next recall re-sends bank select
        *transport.fail_with.lock() = None;
        driver
            .perform(ActionRequest::SceneRecall { scene: 3 })
            .await
            .unwrap();
        assert_eq!(transport.sent().len(), 4);
    }

    #[tokio::test]
    async fn test_disconnected_send_is_an_error() {
        let (driver, transport) = connected_driver(no_sync()).await;
        transport.set_status(ConnectionStatus::Reconnecting { attempt: 1 });
        assert!(driver
            .execute("fader_level", &json!({"channel": 1, "level": 0}))
            .await
            .is_err());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_inbound_feedback_becomes_indicator() {
        let (driver, transport) = connected_driver(no_sync()).await;
        let mut indicators = indicator_channel(&driver);

        transport.inject(&[0xBB, 0x63, 0x03, 0xBB, 0x62, 0x17, 0xBB, 0x06, 0x6B]);
        let signal = tokio::time::timeout(Duration::from_secs(2), indicators.recv())
            .await
            .unwrap();
        assert_eq!(signal, Some(("input_3_level".to_string(), json!("0.0 dB"))));
    }

    #[tokio::test]
    async fn test_scene_recall_tracks_last_recalled() {
        let (driver, _transport) = connected_driver(no_sync()).await;
        let mut indicators = indicator_channel(&driver);

        driver.execute("recall_scene", &json!({"scene": 12})).await.unwrap();
        assert_eq!(driver.last_recalled_scene(), Some(12));

        let mut seen = Vec::new();
        while let Ok(Some(signal)) =
            tokio::time::timeout(Duration::from_millis(100), indicators.recv()).await
        {
            seen.push(signal);
        }
        assert!(seen.contains(&("last_recalled_scene".to_string(), json!(12))));
        assert!(seen.contains(&("current_scene".to_string(), json!(12))));
    }

    #[tokio::test]
    async fn test_connect_runs_startup_queries() {
        let plan = SyncPlan {
            names: true,
            colors: false,
            families: vec![ChannelType::Dca],
        };
        let (_driver, transport) = connected_driver(plan).await;

        tokio::time::timeout(Duration::from_secs(2), async {
            while transport.sent().len() < 16 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(transport.sent().len(), 16);
    }

    #[tokio::test]
    async fn test_reload_retargets_on_host_change() {
        let (driver, transport) = connected_driver(no_sync()).await;
        let mut config: AppConfig = serde_yaml::from_str("console:\n  host: other-desk\n").unwrap();
        config.sync.query_names = false;
        config.sync.query_colors = false;

        driver.apply_config(&config).await.unwrap();
        assert_eq!(*transport.target.lock(), Some(("other-desk".to_string(), 51325)));
        assert_eq!(driver.console().host, "other-desk");
    }

    async fn wait_for_sent(transport: &MockTransport, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while transport.sent().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_base_change_resyncs_in_background() {
        let (driver, transport) = connected_driver(no_sync()).await;
        *transport.send_delay.lock() = Some(Duration::from_millis(300));

        let mut config: AppConfig = serde_yaml::from_str("console:\n  host: desk\n  base_midi_channel: 4\n").unwrap();
        config.sync.query_colors = false;
        config.sync.families = vec![ChannelType::Dca];

        tokio::time::timeout(Duration::from_millis(100), driver.apply_config(&config))
            .await
            .expect("reload waited for the re-sync")
            .unwrap();
        assert!(transport.sent().is_empty());

        wait_for_sent(&transport, 16).await;
        // DCA 1 name request on the new window: DCAs sit four channels above wire base 3
        assert_eq!(&transport.sent()[0][8..], &[0x07, 0x01, 0x36, 0xF7]);
    }

    #[tokio::test]
    async fn test_console_scene_change_fetches_scene_name() {
        let (driver, transport) = connected_driver(no_sync()).await;
        let mut indicators = indicator_channel(&driver);

        transport.inject(&[0xCB, 0x04]);
        wait_for_sent(&transport, 1).await;
        let mut request = crate::avantis::encoder::SYSEX_HEADER.to_vec();
        request.extend_from_slice(&[0x07, 0x05, 0x00, 0xF7]);
        assert_eq!(transport.sent(), vec![request]);

        let mut reply = crate::avantis::encoder::SYSEX_HEADER.to_vec();
        reply.extend_from_slice(&[0x0B, 0x08, 0x05, 0x00]);
        reply.extend_from_slice(b"Intro");
        reply.push(0xF7);
        transport.inject(&reply);

        let mut seen = Vec::new();
        while let Ok(Some(signal)) =
            tokio::time::timeout(Duration::from_millis(200), indicators.recv()).await
        {
            seen.push(signal);
        }
        assert!(seen.contains(&("current_scene".to_string(), json!(5))));
        assert!(seen.contains(&("current_scene_name".to_string(), json!("Intro"))));
        assert_eq!(driver.current_scene_name().await.as_deref(), Some("Intro"));
    }

    #[tokio::test]
    async fn test_own_recall_does_not_request_scene_name() {
        let (driver, transport) = connected_driver(no_sync()).await;
        driver.perform(ActionRequest::SceneRecall { scene: 5 }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.sent(), vec![vec![0xBB, 0x00, 0x00], vec![0xCB, 0x04]]);
    }

    #[tokio::test]
    async fn test_boolean_mute_state_is_explicit() {
        let (driver, transport) = connected_driver(no_sync()).await;
        transport.inject(&[0x9B, 0x05, 0x7F, 0x9B, 0x05, 0x00]);
        tokio::time::timeout(Duration::from_secs(2), async {
            while driver.channel_state(input(5)).await.and_then(|s| s.mute).is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // Already muted: `true` keeps it muted instead of toggling
        driver
            .execute("channel_mute", &json!({"channel": 5, "muteState": true}))
            .await
            .unwrap();
        assert_eq!(transport.sent(), vec![vec![0x9B, 0x05, 0x7F, 0x9B, 0x05, 0x00]]);
    }
}
