//! Frame ingestion: decode, timestamp, store, latch check, selection.
//!
//! The pipeline is plain single-owner state. The session feeds it frames in
//! arrival order from one task; readers reach it through the session lock.

use crate::core::clock::ClockSync;
use crate::core::latch::{ExportEvent, ExportTrigger};
use crate::core::sample::{decode, DecodeError, Sample};
use crate::core::store::DeviceStore;
use chrono::{DateTime, Utc};
use std::time::Instant;

/// Result of ingesting one valid frame.
#[derive(Debug)]
pub struct Ingested {
    pub device_id: String,
    /// Length of the device's stream after the append
    pub length: usize,
    /// Set when this append fired the device's automatic export
    pub export: Option<ExportEvent>,
}

/// Ingest state of one session.
#[derive(Debug)]
pub struct Pipeline {
    clock: ClockSync,
    store: DeviceStore,
    trigger: ExportTrigger,
    selected: Option<String>,
    latest: Option<Sample>,
}

impl Pipeline {
    pub fn new(trigger: ExportTrigger) -> Self {
        Self {
            clock: ClockSync::new(),
            store: DeviceStore::new(),
            trigger,
            selected: None,
            latest: None,
        }
    }

    /// Ingest one raw frame received at `received_at`.
    ///
    /// A malformed frame leaves every piece of state untouched, including
    /// the clock reference.
    pub fn ingest(
        &mut self,
        raw: &[u8],
        received_at: Instant,
        timestamp: DateTime<Utc>,
    ) -> Result<Ingested, DecodeError> {
        let frame = decode(raw)?;
        let elapsed_ms = self.clock.elapsed_ms(received_at);
        let device_id = frame.device_id.clone();

        let length = self
            .store
            .append(&device_id, Sample::new(frame, received_at, timestamp, elapsed_ms));
        let export = self
            .trigger
            .on_append(&device_id, self.store.stream(&device_id));
        self.on_sample(&device_id);

        Ok(Ingested {
            device_id,
            length,
            export,
        })
    }

    /// Update the selection view after a sample of `device_id` was stored.
    ///
    /// The first device ever seen becomes the selection; later devices never
    /// replace it.
    fn on_sample(&mut self, device_id: &str) {
        if self.selected.is_none() {
            self.selected = Some(device_id.to_string());
        }

        if self.selected.as_deref() == Some(device_id) {
            self.latest = self.store.last(device_id).cloned();
        }
    }

    /// Select a device for the latest/window view. Store contents are not
    /// affected; `latest` is refreshed from what is already buffered.
    pub fn select(&mut self, device_id: &str) {
        self.selected = Some(device_id.to_string());
        self.latest = self.store.last(device_id).cloned();
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Most recent sample of the selected device.
    pub fn latest(&self) -> Option<&Sample> {
        self.latest.as_ref()
    }

    /// Recent window of the selected device.
    pub fn window(&self, k: usize) -> &[Sample] {
        match self.selected.as_deref() {
            Some(device_id) => self.store.recent_window(device_id, k),
            None => &[],
        }
    }

    pub fn store(&self) -> &DeviceStore {
        &self.store
    }

    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(ExportTrigger::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(device_id: &str, v: f64) -> String {
        format!(
            r#"{{"deviceId":"{device_id}","accel":[{v},0,0],"gyro":[0,{v},0],"mag":[0,0,{v}]}}"#
        )
    }

    #[test]
    fn test_malformed_frame_leaves_state_untouched() {
        let mut pipeline = Pipeline::default();
        let raw = r#"{"deviceId":"A","accel":[1,2],"gyro":[0,0,0],"mag":[0,0,0]}"#;

        assert!(pipeline
            .ingest(raw.as_bytes(), Instant::now(), Utc::now())
            .is_err());
        assert!(pipeline.store().is_empty());
        assert!(pipeline.clock().reference().is_none());
        assert!(pipeline.selected().is_none());
        assert!(pipeline.latest().is_none());
    }

    #[test]
    fn test_elapsed_is_shared_across_devices() {
        let mut pipeline = Pipeline::default();
        let t0 = Instant::now();

        pipeline
            .ingest(frame("A", 1.0).as_bytes(), t0, Utc::now())
            .unwrap();
        pipeline
            .ingest(
                frame("B", 2.0).as_bytes(),
                t0 + Duration::from_millis(40),
                Utc::now(),
            )
            .unwrap();

        assert_eq!(pipeline.store().stream("A")[0].elapsed_ms, 0);
        assert_eq!(pipeline.store().stream("B")[0].elapsed_ms, 40);
        assert_eq!(pipeline.clock().reference(), Some(t0));
    }

    #[test]
    fn test_first_device_selected_and_kept() {
        let mut pipeline = Pipeline::default();
        let t0 = Instant::now();

        pipeline.ingest(frame("A", 1.0).as_bytes(), t0, Utc::now()).unwrap();
        pipeline.ingest(frame("B", 2.0).as_bytes(), t0, Utc::now()).unwrap();

        assert_eq!(pipeline.selected(), Some("A"));
        assert_eq!(pipeline.latest().unwrap().accel[0], 1.0);

        pipeline.ingest(frame("A", 3.0).as_bytes(), t0, Utc::now()).unwrap();
        assert_eq!(pipeline.latest().unwrap().accel[0], 3.0);
    }

    #[test]
    fn test_select_switches_view_only() {
        let mut pipeline = Pipeline::default();
        let t0 = Instant::now();
        for i in 0..3 {
            pipeline
                .ingest(frame("A", i as f64).as_bytes(), t0, Utc::now())
                .unwrap();
        }
        pipeline.ingest(frame("B", 7.0).as_bytes(), t0, Utc::now()).unwrap();

        pipeline.select("B");
        assert_eq!(pipeline.selected(), Some("B"));
        assert_eq!(pipeline.latest().unwrap().device_id, "B");
        assert_eq!(pipeline.window(10).len(), 1);
        assert_eq!(pipeline.store().len("A"), 3);

        pipeline.select("missing");
        assert!(pipeline.latest().is_none());
        assert!(pipeline.window(10).is_empty());
    }

    #[test]
    fn test_export_fires_on_tenth_append_only() {
        let mut pipeline = Pipeline::default();
        let t0 = Instant::now();
        let mut fired = Vec::new();

        for i in 0..50u64 {
            let at = t0 + Duration::from_millis(i * 10);
            let ingested = pipeline
                .ingest(frame("A", i as f64).as_bytes(), at, Utc::now())
                .unwrap();
            if let Some(event) = ingested.export {
                fired.push((ingested.length, event));
            }
        }

        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, 10);
        let elapsed: Vec<u64> = fired[0].1.samples.iter().map(|s| s.elapsed_ms).collect();
        assert_eq!(elapsed, (0..10).map(|i| i * 10).collect::<Vec<u64>>());
    }

    #[test]
    fn test_elapsed_monotonic_after_dropped_frame() {
        let mut pipeline = Pipeline::default();
        let t0 = Instant::now();

        pipeline.ingest(frame("A", 1.0).as_bytes(), t0, Utc::now()).unwrap();
        let bad = r#"{"deviceId":"A","accel":[1,2],"gyro":[0,0,0],"mag":[0,0,0]}"#;
        assert!(pipeline
            .ingest(bad.as_bytes(), t0 + Duration::from_millis(5), Utc::now())
            .is_err());
        pipeline
            .ingest(
                frame("A", 2.0).as_bytes(),
                t0 + Duration::from_millis(10),
                Utc::now(),
            )
            .unwrap();

        let stream = pipeline.store().stream("A");
        assert_eq!(stream.len(), 2);
        assert!(stream[0].elapsed_ms <= stream[1].elapsed_ms);
        assert_eq!(stream[1].elapsed_ms, 10);
    }
}
