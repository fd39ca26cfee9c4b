//! Sensor Stream - live IMU telemetry viewer core.
//!
//! This library connects to a WebSocket hub that relays accelerometer,
//! gyroscope and magnetometer readings from one or more devices, keeps a
//! per-device history with a bounded recent window for live display, and
//! exports the first full window of every device to CSV exactly once.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           StreamSession                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  WebSocket ──▶ Decoder ──▶ Clock ──▶ DeviceStore ──▶ Latch       │
//! │   (frames)     (sample)   (elapsed)  (per device)    (once @ K)  │
//! │                                          │              │        │
//! │                                          ▼              ▼        │
//! │                              latest / window      Export thread  │
//! │                              (selected device)      (CSV file)   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sensor_stream::{Config, StreamSession};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let session = StreamSession::start(&config).await?;
//!
//! // First device seen is selected automatically.
//! if let Some(sample) = session.latest() {
//!     println!("{} accel={:?}", sample.device_id, sample.accel);
//! }
//!
//! session.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod export;
pub mod session;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use crate::core::{DecodeError, DeviceStore, ExportEvent, LatchPolicy, Pipeline, Sample};
pub use export::{ExportError, ExportOutcome, ExportScope};
pub use session::{SessionError, SessionStatus, StreamSession, TransportError};
pub use stats::{DeviceExports, IngestLog, IngestStats, SharedIngestLog};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
