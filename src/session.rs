//! Stream session: connection lifecycle and the selection interface.
//!
//! A session owns one WebSocket connection, one ingest pipeline and one
//! export writer. Frames are processed strictly in arrival order by a single
//! task; UI-facing readers share the pipeline through a lock.
//!
//! ```text
//! Idle ──▶ Connecting ──▶ Open ──┬──▶ Disconnected   (remote close, transport error)
//!                                └──▶ Closed         (stop, handle dropped)
//! ```
//!
//! Reconnecting is left to the caller: a `Disconnected` session stays
//! disconnected, and a fresh `StreamSession::start` begins a new session
//! with its own clock reference and store.

use crate::config::Config;
use crate::core::{ExportTrigger, Pipeline, Sample};
use crate::export::{self, ExportDispatcher, ExportError, ExportOutcome, ExportQueue, ExportScope};
use crate::stats::{create_shared_log, IngestStats, SharedIngestLog};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::Instrument;
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on the closing handshake once the read loop has ended.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Open,
    /// The remote side closed or the transport failed
    Disconnected,
    /// Stopped by the owner
    Closed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Disconnected | SessionStatus::Closed)
    }
}

/// Connection-level failures.
#[derive(Debug)]
pub enum TransportError {
    /// The endpoint could not be reached or refused the upgrade
    Connect(String),
    /// Connecting took longer than the configured timeout
    Timeout(Duration),
    /// The announcement could not be sent
    Announce(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Connect(e) => write!(f, "Connection failed: {e}"),
            TransportError::Timeout(after) => {
                write!(f, "Connection timed out after {}s", after.as_secs())
            }
            TransportError::Announce(e) => write!(f, "Announcement failed: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors from starting a session.
#[derive(Debug)]
pub enum SessionError {
    Transport(TransportError),
    /// The export writer could not be started
    Export(ExportError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Transport(e) => write!(f, "{e}"),
            SessionError::Export(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        SessionError::Transport(e)
    }
}

impl From<ExportError> for SessionError {
    fn from(e: ExportError) -> Self {
        SessionError::Export(e)
    }
}

/// Announcement sent once right after the connection opens.
#[derive(Debug, Serialize)]
struct Announcement<'a> {
    #[serde(rename = "deviceId")]
    device_id: &'a str,
}

/// State shared between the read task and the handle.
struct Shared {
    id: Uuid,
    pipeline: RwLock<Pipeline>,
    log: SharedIngestLog,
    status: watch::Sender<SessionStatus>,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, Pipeline> {
        self.pipeline.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Pipeline> {
        self.pipeline.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: SessionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            tracing::debug!(session = %self.id, "Session {:?} -> {:?}", previous, status);
        }
    }

    /// Run one inbound frame through the pipeline.
    fn handle_frame(&self, raw: &[u8], exports: &ExportQueue) {
        let received_at = Instant::now();
        let timestamp = Utc::now();
        self.log.record_frame();

        let ingested = self.write().ingest(raw, received_at, timestamp);

        match ingested {
            Ok(ingested) => {
                self.log.record_sample();
                if let Some(event) = ingested.export {
                    match exports.dispatch(event) {
                        Ok(path) => tracing::debug!(
                            session = %self.id,
                            device_id = %ingested.device_id,
                            "Queued automatic export to {}",
                            path.display()
                        ),
                        Err(e) => {
                            self.log.record_export_failure();
                            tracing::error!(session = %self.id, "Could not queue export: {e}");
                        }
                    }
                }
            }
            Err(e) => {
                self.log.record_dropped();
                tracing::debug!(session = %self.id, "Dropping frame: {e}");
            }
        }
    }
}

/// Handle to a running stream session.
pub struct StreamSession {
    shared: Arc<Shared>,
    config: Config,
    outcomes: crossbeam_channel::Receiver<ExportOutcome>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    exporter: Mutex<Option<ExportDispatcher>>,
}

impl StreamSession {
    /// Connect to `config.endpoint`, announce the viewer and start ingesting.
    pub async fn start(config: &Config) -> Result<Self, SessionError> {
        Self::start_with_log(config, create_shared_log()).await
    }

    /// Like [`StreamSession::start`], recording statistics into `log`.
    pub async fn start_with_log(config: &Config, log: SharedIngestLog) -> Result<Self, SessionError> {
        let id = Uuid::new_v4();
        let (status, _) = watch::channel(SessionStatus::Idle);
        let shared = Arc::new(Shared {
            id,
            pipeline: RwLock::new(Pipeline::new(ExportTrigger::new(
                config.export_threshold,
                config.latch_policy,
            ))),
            log: log.clone(),
            status,
        });

        let exporter = ExportDispatcher::spawn(config.export_path.clone(), log)?;
        let exports = exporter.queue()?;
        let outcomes = exporter.outcomes().clone();

        shared.set_status(SessionStatus::Connecting);
        tracing::info!(session = %id, "Connecting to {}", config.endpoint);

        let mut ws = connect(&config.endpoint, config.connect_timeout).await?;
        announce(&mut ws, &config.viewer_id).await?;

        shared.set_status(SessionStatus::Open);
        tracing::info!(session = %id, "Stream open as {}", config.viewer_id);

        let (stop_tx, stop_rx) = oneshot::channel();
        let span = tracing::info_span!("session", id = %id);
        let task = tokio::spawn(read_loop(ws, Arc::clone(&shared), exports, stop_rx).instrument(span));

        Ok(Self {
            shared,
            config: config.clone(),
            outcomes,
            stop_tx: Mutex::new(Some(stop_tx)),
            task: Mutex::new(Some(task)),
            exporter: Mutex::new(Some(exporter)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn status(&self) -> SessionStatus {
        *self.shared.status.borrow()
    }

    /// Subscribe to status changes.
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    /// Wait until the session is `Disconnected` or `Closed`.
    pub async fn wait_for_terminal(&self) -> SessionStatus {
        let mut rx = self.watch_status();
        let status = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        status
    }

    /// Stop the session, close the connection and flush queued exports.
    ///
    /// Safe to call at any point and more than once.
    pub async fn stop(&self) -> SessionStatus {
        if let Some(stop_tx) = take(&self.stop_tx) {
            let _ = stop_tx.send(());
        }

        if let Some(task) = take(&self.task) {
            if let Err(e) = task.await {
                tracing::error!(session = %self.shared.id, "Read task failed: {e}");
                self.shared.set_status(SessionStatus::Closed);
            }
        }

        if let Some(mut exporter) = take(&self.exporter) {
            if tokio::task::spawn_blocking(move || exporter.shutdown())
                .await
                .is_err()
            {
                tracing::error!(session = %self.shared.id, "Export shutdown failed");
            }
        }

        self.status()
    }

    /// Device ids in first-seen order.
    pub fn device_ids(&self) -> Vec<String> {
        self.shared.read().store().device_ids().to_vec()
    }

    /// Select the device shown by `latest` and `window`.
    pub fn select(&self, device_id: &str) {
        self.shared.write().select(device_id);
        tracing::info!(session = %self.shared.id, "Selected device {device_id}");
    }

    pub fn selected(&self) -> Option<String> {
        self.shared.read().selected().map(str::to_string)
    }

    /// Most recent sample of the selected device.
    pub fn latest(&self) -> Option<Sample> {
        self.shared.read().latest().cloned()
    }

    /// Recent window of the selected device.
    pub fn window(&self, k: usize) -> Vec<Sample> {
        self.shared.read().window(k).to_vec()
    }

    /// Recent window of any device.
    pub fn window_for(&self, device_id: &str, k: usize) -> Vec<Sample> {
        self.shared
            .read()
            .store()
            .recent_window(device_id, k)
            .to_vec()
    }

    /// Length of a device's full stream.
    pub fn stream_len(&self, device_id: &str) -> usize {
        self.shared.read().store().len(device_id)
    }

    /// Export a device to the configured manual export file.
    ///
    /// Returns `Ok(None)` when the device has no samples.
    pub fn export_now(&self, device_id: &str) -> Result<Option<PathBuf>, ExportError> {
        let path = self.config.export_path.join(&self.config.manual_export_name);
        self.export_now_to(device_id, &path)
    }

    /// Export a device to `path`. Unlatched and repeatable.
    pub fn export_now_to(
        &self,
        device_id: &str,
        path: &Path,
    ) -> Result<Option<PathBuf>, ExportError> {
        let samples = {
            let pipeline = self.shared.read();
            match self.config.export_scope {
                ExportScope::FullSequence => pipeline.store().stream(device_id).to_vec(),
                ExportScope::RecentWindow => pipeline
                    .store()
                    .recent_window(device_id, self.config.window_size)
                    .to_vec(),
            }
        };

        if samples.is_empty() {
            return Ok(None);
        }

        match export::write_file(path, &samples) {
            Ok(written) => {
                self.shared.log.record_manual_export(device_id);
                tracing::info!(
                    session = %self.shared.id,
                    device_id,
                    samples = samples.len(),
                    "Exported to {}",
                    written.display()
                );
                Ok(Some(written))
            }
            Err(e) => {
                self.shared.log.record_export_failure();
                tracing::error!(session = %self.shared.id, device_id, "Manual export failed: {e}");
                Err(e)
            }
        }
    }

    /// Outcomes of automatic exports.
    pub fn export_outcomes(&self) -> crossbeam_channel::Receiver<ExportOutcome> {
        self.outcomes.clone()
    }

    pub fn stats(&self) -> IngestStats {
        self.shared.log.stats()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

async fn connect(endpoint: &str, timeout: Duration) -> Result<WsStream, TransportError> {
    match tokio::time::timeout(timeout, connect_async(endpoint)).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(TransportError::Connect(e.to_string())),
        Err(_) => Err(TransportError::Timeout(timeout)),
    }
}

async fn announce(ws: &mut WsStream, viewer_id: &str) -> Result<(), TransportError> {
    let text = serde_json::to_string(&Announcement {
        device_id: viewer_id,
    })
    .map_err(|e| TransportError::Announce(e.to_string()))?;

    if let Err(e) = ws.send(Message::Text(text.into())).await {
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await;
        return Err(TransportError::Announce(e.to_string()));
    }
    Ok(())
}

/// Sequential frame handler. Owns the socket and closes it on every exit.
async fn read_loop(
    mut ws: WsStream,
    shared: Arc<Shared>,
    exports: ExportQueue,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let end = loop {
        tokio::select! {
            // A dropped handle counts as a stop.
            _ = &mut stop_rx => break SessionStatus::Closed,
            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => shared.handle_frame(text.as_bytes(), &exports),
                Some(Ok(Message::Binary(data))) => shared.handle_frame(&data, &exports),
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("Stream closed by remote: {:?}", frame);
                    break SessionStatus::Disconnected;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Stream transport error: {e}");
                    break SessionStatus::Disconnected;
                }
                None => {
                    tracing::info!("Stream ended");
                    break SessionStatus::Disconnected;
                }
            },
        }
    };

    let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await;
    shared.set_status(end);
    tracing::info!("{}", shared.log.summary().replace('\n', " "));

    // Only after the terminal status: `stop` joins the export thread, which
    // exits when this last queue is gone.
    drop(exports);
}
