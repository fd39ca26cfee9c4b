//! Core ingestion logic for the sensor stream viewer.
//!
//! This module contains:
//! - Frame decoding into canonical samples
//! - The session-wide clock reference
//! - Per-device append-only streams with recent-window views
//! - The one-shot automatic export latch
//! - The pipeline tying them together in arrival order

pub mod clock;
pub mod latch;
pub mod pipeline;
pub mod sample;
pub mod store;

// Re-export commonly used types
pub use clock::ClockSync;
pub use latch::{ExportEvent, ExportTrigger, LatchPolicy, DEFAULT_EXPORT_THRESHOLD};
pub use pipeline::{Ingested, Pipeline};
pub use sample::{decode, decode_str, DecodeError, DecodedFrame, Sample, Vector3, UNKNOWN_DEVICE};
pub use store::{DeviceStore, DEFAULT_WINDOW_SIZE};
