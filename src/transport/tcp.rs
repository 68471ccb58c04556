//! TCP transport for the Avantis MIDI interface
//!
//! A single connection task owns the socket. Sends are queued as whole jobs
//! and written one buffer at a time with a fixed gap between buffers, so a
//! multi-message action never interleaves with another. A lost or refused
//! connection is retried at a fixed interval until [`TcpTransport::destroy`].

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, trace, warn};

use super::{
    ConnectionStatus, DataCallback, StatusCallback, Transport, TransportError, TransportOptions,
};
use crate::midi::format_hex;

const READ_BUFFER_SIZE: usize = 4096;

/// One queued `send` call
struct SendJob {
    buffers: Vec<Vec<u8>>,
    reply: oneshot::Sender<Result<(), TransportError>>,
}

/// State shared between the handle and the connection task
struct Shared {
    options: TransportOptions,
    target: Mutex<Option<(String, u16)>>,
    data_callbacks: RwLock<Vec<DataCallback>>,
    status_callbacks: RwLock<Vec<StatusCallback>>,
    current_status: RwLock<ConnectionStatus>,
    shutdown_flag: Mutex<bool>,
    shutdown: Notify,
    retarget: Notify,
}

impl Shared {
    fn emit_status(&self, status: ConnectionStatus) {
        *self.current_status.write() = status.clone();
        // Clone out so a callback may register another callback
        let callbacks: Vec<StatusCallback> = self.status_callbacks.read().clone();
        for callback in callbacks {
            callback(status.clone());
        }
    }

    fn deliver(&self, chunk: &[u8]) {
        trace!("📥 RX <- {}", format_hex(chunk));
        let callbacks: Vec<DataCallback> = self.data_callbacks.read().clone();
        for callback in callbacks {
            callback(chunk);
        }
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_flag.lock()
    }
}

/// Paced, reconnecting TCP link to a console
pub struct TcpTransport {
    shared: Arc<Shared>,
    job_tx: mpsc::UnboundedSender<SendJob>,
    job_rx: Mutex<Option<mpsc::UnboundedReceiver<SendJob>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    pub fn new(options: TransportOptions) -> Self {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                options,
                target: Mutex::new(None),
                data_callbacks: RwLock::new(Vec::new()),
                status_callbacks: RwLock::new(Vec::new()),
                current_status: RwLock::new(ConnectionStatus::Disconnected),
                shutdown_flag: Mutex::new(false),
                shutdown: Notify::new(),
                retarget: Notify::new(),
            }),
            job_tx,
            job_rx: Mutex::new(Some(job_rx)),
            task: Mutex::new(None),
        }
    }

    pub fn options(&self) -> TransportOptions {
        self.shared.options
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn connect(&self, host: &str, port: u16) {
        *self.shared.target.lock() = Some((host.to_string(), port));

        let Some(job_rx) = self.job_rx.lock().take() else {
            // Connection task already running
            self.shared.retarget.notify_one();
            return;
        };

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(connection_loop(shared, job_rx));
        *self.task.lock() = Some(handle);
    }

    fn retarget(&self, host: &str, port: u16) {
        info!("🔀 Console target -> {}:{}", host, port);
        *self.shared.target.lock() = Some((host.to_string(), port));
        self.shared.retarget.notify_one();
    }

    fn on_data(&self, callback: DataCallback) {
        self.shared.data_callbacks.write().push(callback);
    }

    fn on_status(&self, callback: StatusCallback) {
        self.shared.status_callbacks.write().push(callback);
    }

    async fn send(&self, buffers: Vec<Vec<u8>>) -> Result<(), TransportError> {
        if self.shared.is_shutdown() {
            return Err(TransportError::Destroyed);
        }
        if self.status() != ConnectionStatus::Connected {
            return Err(TransportError::NotConnected);
        }
        if buffers.is_empty() {
            return Ok(());
        }

        let (reply, response) = oneshot::channel();
        self.job_tx
            .send(SendJob { buffers, reply })
            .map_err(|_| TransportError::Destroyed)?;
        response.await.map_err(|_| TransportError::Destroyed)?
    }

    async fn destroy(&self) {
        {
            let mut flag = self.shared.shutdown_flag.lock();
            if *flag {
                return;
            }
            *flag = true;
        }
        self.shared.shutdown.notify_one();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Connection task ended abnormally: {}", e);
            }
        }

        // Never connected: the queue is still ours to fail
        let job_rx = self.job_rx.lock().take();
        if let Some(mut job_rx) = job_rx {
            fail_pending(&mut job_rx);
        }

        self.shared.emit_status(ConnectionStatus::Disconnected);
        info!("🔌 Console transport destroyed");
    }

    fn status(&self) -> ConnectionStatus {
        self.shared.current_status.read().clone()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        *self.shared.shutdown_flag.lock() = true;
        self.shared.shutdown.notify_one();
    }
}

/// Why a live connection ended
enum SessionEnd {
    Lost,
    Retarget,
    Shutdown,
}

async fn connection_loop(shared: Arc<Shared>, mut job_rx: mpsc::UnboundedReceiver<SendJob>) {
    let mut attempt = 0usize;

    loop {
        if shared.is_shutdown() {
            break;
        }

        let Some((host, port)) = shared.target.lock().clone() else {
            break;
        };

        info!("🎛️  Connecting to console at {}:{}", host, port);
        match timeout(
            shared.options.connect_timeout,
            TcpStream::connect((host.as_str(), port)),
        )
        .await
        {
            Ok(Ok(stream)) => {
                attempt = 0;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY not set: {}", e);
                }
                info!("✅ Console connected ({}:{})", host, port);
                shared.emit_status(ConnectionStatus::Connected);

                let end = run_connection(&shared, stream, &mut job_rx).await;
                shared.emit_status(ConnectionStatus::Disconnected);

                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Retarget => continue,
                    SessionEnd::Lost => warn!("⚠️  Console connection lost"),
                }
            }
            Ok(Err(e)) => warn!("Console connect to {}:{} failed: {}", host, port, e),
            Err(_) => warn!(
                "Console connect to {}:{} timed out after {}ms",
                host,
                port,
                shared.options.connect_timeout.as_millis()
            ),
        }

        attempt += 1;
        info!(
            "Console reconnect #{} in {}ms",
            attempt,
            shared.options.reconnect_interval.as_millis()
        );
        shared.emit_status(ConnectionStatus::Reconnecting { attempt });

        if !wait_reconnect(&shared, &mut job_rx).await {
            break;
        }
    }

    job_rx.close();
    fail_pending(&mut job_rx);
    debug!("Connection task stopped");
}

/// Sleep out the reconnect interval, rejecting jobs queued meanwhile
///
/// Returns false when the transport is shutting down.
async fn wait_reconnect(shared: &Shared, job_rx: &mut mpsc::UnboundedReceiver<SendJob>) -> bool {
    let deadline = Instant::now() + shared.options.reconnect_interval;
    loop {
        tokio::select! {
            _ = sleep_until(deadline) => return !shared.is_shutdown(),
            _ = shared.shutdown.notified() => return false,
            _ = shared.retarget.notified() => return !shared.is_shutdown(),
            job = job_rx.recv() => match job {
                Some(job) => {
                    let _ = job.reply.send(Err(TransportError::NotConnected));
                }
                None => return false,
            },
        }
    }
}

async fn run_connection(
    shared: &Arc<Shared>,
    stream: TcpStream,
    job_rx: &mut mpsc::UnboundedReceiver<SendJob>,
) -> SessionEnd {
    let (mut reader, mut writer) = stream.into_split();

    let reader_shared = Arc::clone(shared);
    let mut reader_task = tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!("Console closed the connection");
                    break;
                }
                Ok(n) => reader_shared.deliver(&buf[..n]),
                Err(e) => {
                    warn!("Console read error: {}", e);
                    break;
                }
            }
        }
    });

    let mut last_write: Option<Instant> = None;
    let end = loop {
        tokio::select! {
            _ = shared.shutdown.notified() => break SessionEnd::Shutdown,
            _ = shared.retarget.notified() => break SessionEnd::Retarget,
            _ = &mut reader_task => break SessionEnd::Lost,
            job = job_rx.recv() => {
                let Some(job) = job else {
                    break SessionEnd::Shutdown;
                };
                let paced = write_job(
                    &mut writer,
                    &job.buffers,
                    &mut last_write,
                    shared.options.pacing,
                );
                tokio::select! {
                    result = paced => {
                        let failed = result.is_err();
                        if let Err(e) = &result {
                            warn!("Console write failed: {}", e);
                        }
                        let _ = job.reply.send(result);
                        if failed {
                            break SessionEnd::Lost;
                        }
                    }
                    _ = shared.shutdown.notified() => {
                        let _ = job.reply.send(Err(TransportError::Destroyed));
                        break SessionEnd::Shutdown;
                    }
                }
            }
        }
    };

    reader_task.abort();
    if let Err(e) = writer.shutdown().await {
        debug!("Socket shutdown: {}", e);
    }

    // Jobs queued behind a dead socket cannot be written
    if !matches!(end, SessionEnd::Shutdown) {
        while let Ok(job) = job_rx.try_recv() {
            let _ = job.reply.send(Err(TransportError::NotConnected));
        }
    }
    end
}

/// Write every buffer of a job, keeping `pacing` between consecutive writes
async fn write_job(
    writer: &mut OwnedWriteHalf,
    buffers: &[Vec<u8>],
    last_write: &mut Option<Instant>,
    pacing: Duration,
) -> Result<(), TransportError> {
    let total = buffers.len();
    for (sent, buffer) in buffers.iter().enumerate() {
        if let Some(last) = *last_write {
            sleep_until(last + pacing).await;
        }
        writer
            .write_all(buffer)
            .await
            .map_err(|e| TransportError::Write {
                sent,
                total,
                reason: e.to_string(),
            })?;
        *last_write = Some(Instant::now());
        debug!("📤 TX -> {}", format_hex(buffer));
    }
    Ok(())
}

fn fail_pending(job_rx: &mut mpsc::UnboundedReceiver<SendJob>) {
    let mut failed = 0usize;
    while let Ok(job) = job_rx.try_recv() {
        let _ = job.reply.send(Err(TransportError::Destroyed));
        failed += 1;
    }
    if failed > 0 {
        debug!("Rejected {} queued send(s)", failed);
    }
}
