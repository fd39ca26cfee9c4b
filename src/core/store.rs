//! Per-device append-only sample streams.
//!
//! Each device id owns the full ordered sequence of its samples. The recent
//! window used for live display is a slice of the tail of that sequence and
//! owns no storage of its own.

use crate::core::sample::Sample;
use std::collections::HashMap;

/// Default number of samples in a recent window.
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Append-only store of device streams.
#[derive(Debug, Default)]
pub struct DeviceStore {
    streams: HashMap<String, Vec<Sample>>,
    /// Device ids in first-seen order
    order: Vec<String>,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample to its device's stream and return the new length.
    pub fn append(&mut self, device_id: &str, sample: Sample) -> usize {
        let stream = match self.streams.get_mut(device_id) {
            Some(stream) => stream,
            None => {
                self.order.push(device_id.to_string());
                self.streams.entry(device_id.to_string()).or_default()
            }
        };
        stream.push(sample);
        stream.len()
    }

    /// The last `k` samples of a device, oldest first.
    ///
    /// Returns fewer than `k` when the stream is shorter, and an empty slice
    /// for unknown devices.
    pub fn recent_window(&self, device_id: &str, k: usize) -> &[Sample] {
        let stream = self.stream(device_id);
        &stream[stream.len().saturating_sub(k)..]
    }

    /// Full sequence of a device in arrival order.
    pub fn stream(&self, device_id: &str) -> &[Sample] {
        self.streams
            .get(device_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Most recent sample of a device.
    pub fn last(&self, device_id: &str) -> Option<&Sample> {
        self.stream(device_id).last()
    }

    pub fn len(&self, device_id: &str) -> usize {
        self.stream(device_id).len()
    }

    /// Device ids in the order they were first seen.
    pub fn device_ids(&self) -> &[String] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
