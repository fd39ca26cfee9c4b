//! Ingest statistics.
//!
//! Frame counters are bumped from the ingestion task on every frame, so they
//! are plain atomics. Export counts are kept per device and touched at most a
//! handful of times per session, so they sit behind a mutex.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Files written for one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceExports {
    pub automatic: u64,
    pub manual: u64,
}

/// Counters for one viewer process.
#[derive(Debug)]
pub struct IngestLog {
    frames_received: AtomicU64,
    /// Malformed frames
    frames_dropped: AtomicU64,
    samples_appended: AtomicU64,
    export_failures: AtomicU64,
    exports: Mutex<BTreeMap<String, DeviceExports>>,
    started_at: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl IngestLog {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            samples_appended: AtomicU64::new(0),
            export_failures: AtomicU64::new(0),
            exports: Mutex::new(BTreeMap::new()),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log saved to `path`, continuing the totals found there.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();

        match Self::read_snapshot(&path) {
            Ok(Some(previous)) => log.resume_from(previous),
            Ok(None) => {}
            Err(e) => tracing::warn!("Ignoring ingest stats at {}: {e}", path.display()),
        }

        log.persist_path = Some(path);
        log
    }

    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample(&self) {
        self.samples_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auto_export(&self, device_id: &str) {
        self.device_exports(device_id, |counts| counts.automatic += 1);
    }

    pub fn record_manual_export(&self, device_id: &str) {
        self.device_exports(device_id, |counts| counts.manual += 1);
    }

    pub fn record_export_failure(&self) {
        self.export_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn device_exports(&self, device_id: &str, update: impl FnOnce(&mut DeviceExports)) {
        let mut exports = self.exports.lock().unwrap_or_else(PoisonError::into_inner);
        update(exports.entry(device_id.to_string()).or_default());
    }

    pub fn stats(&self) -> IngestStats {
        let devices = self
            .exports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        IngestStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            samples_appended: self.samples_appended.load(Ordering::Relaxed),
            auto_exports: devices.values().map(|d| d.automatic).sum(),
            manual_exports: devices.values().map(|d| d.manual).sum(),
            export_failures: self.export_failures.load(Ordering::Relaxed),
            devices,
            session_start: self.started_at,
            session_duration_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Multi-line report for the terminal.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        let mut out = format!(
            "Ingest: {} frames, {} malformed, {} samples stored in {}s",
            stats.frames_received,
            stats.frames_dropped,
            stats.samples_appended,
            stats.session_duration_secs
        );

        if stats.devices.is_empty() {
            out.push_str("\nExports: none");
        } else {
            out.push_str("\nExports:");
            for (device_id, counts) in &stats.devices {
                out.push_str(&format!(
                    "\n  {device_id}: {} automatic, {} manual",
                    counts.automatic, counts.manual
                ));
            }
        }

        if stats.export_failures > 0 {
            out.push_str(&format!("\nFailed exports: {}", stats.export_failures));
        }
        out
    }

    /// Write the current snapshot, if persistence is enabled.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&self.stats()).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    fn read_snapshot(path: &std::path::Path) -> Result<Option<IngestStats>, std::io::Error> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(std::io::Error::other)
    }

    fn resume_from(&mut self, previous: IngestStats) {
        *self.frames_received.get_mut() = previous.frames_received;
        *self.frames_dropped.get_mut() = previous.frames_dropped;
        *self.samples_appended.get_mut() = previous.samples_appended;
        *self.export_failures.get_mut() = previous.export_failures;
        *self.exports.get_mut().unwrap_or_else(PoisonError::into_inner) = previous.devices;
    }
}

impl Default for IngestLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of ingest statistics. Also the on-disk format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestStats {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub samples_appended: u64,
    /// Sum of `devices[*].automatic`
    pub auto_exports: u64,
    /// Sum of `devices[*].manual`
    pub manual_exports: u64,
    pub export_failures: u64,
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceExports>,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Thread-safe shared ingest log.
pub type SharedIngestLog = Arc<IngestLog>;

pub fn create_shared_log() -> SharedIngestLog {
    Arc::new(IngestLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedIngestLog {
    Arc::new(IngestLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let log = IngestLog::new();
        log.record_frame();
        log.record_frame();
        log.record_dropped();
        log.record_sample();
        log.record_auto_export("ESP1");

        let stats = log.stats();
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.samples_appended, 1);
        assert_eq!(stats.auto_exports, 1);
        assert_eq!(stats.manual_exports, 0);
    }

    #[test]
    fn test_exports_counted_per_device() {
        let log = IngestLog::new();
        log.record_auto_export("ESP1");
        log.record_manual_export("ESP1");
        log.record_manual_export("ESP1");
        log.record_manual_export("ESP2");

        let stats = log.stats();
        assert_eq!(
            stats.devices["ESP1"],
            DeviceExports {
                automatic: 1,
                manual: 2
            }
        );
        assert_eq!(stats.devices["ESP2"].automatic, 0);
        assert_eq!(stats.manual_exports, 3);
        assert_eq!(stats.auto_exports, 1);
    }

    #[test]
    fn test_persistence_continues_totals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats").join("ingest_stats.json");

        let log = IngestLog::with_persistence(path.clone());
        log.record_frame();
        log.record_export_failure();
        log.record_auto_export("A");
        log.save().unwrap();

        let reloaded = IngestLog::with_persistence(path);
        reloaded.record_auto_export("B");
        let stats = reloaded.stats();
        assert_eq!(stats.frames_received, 1);
        assert_eq!(stats.export_failures, 1);
        assert_eq!(stats.auto_exports, 2);
        assert_eq!(stats.devices.keys().collect::<Vec<_>>(), ["A", "B"]);
    }

    #[test]
    fn test_unreadable_snapshot_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest_stats.json");
        std::fs::write(&path, "not json").unwrap();

        let log = IngestLog::with_persistence(path);
        assert_eq!(log.stats().frames_received, 0);
    }

    #[test]
    fn test_summary_lists_devices() {
        let log = IngestLog::new();
        assert!(log.summary().contains("Exports: none"));

        log.record_auto_export("ESP1");
        let summary = log.summary();
        assert!(summary.starts_with("Ingest: 0 frames"));
        assert!(summary.contains("ESP1: 1 automatic, 0 manual"));
        assert!(!summary.contains("Failed exports"));
    }
}
