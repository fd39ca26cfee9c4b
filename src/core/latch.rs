//! One-shot automatic export trigger per device.

use crate::core::sample::Sample;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default stream length at which a device's automatic export fires.
pub const DEFAULT_EXPORT_THRESHOLD: usize = 10;

/// How the stream length is compared against the threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatchPolicy {
    /// Fire only when the length is exactly the threshold. A burst that
    /// skips over the threshold never fires.
    #[default]
    Exact,
    /// Fire the first time the length is at or above the threshold.
    AtLeast,
}

/// Request to export a device's samples to a file.
#[derive(Debug, Clone)]
pub struct ExportEvent {
    pub device_id: String,
    /// Full sequence of the device at the moment the latch fired.
    pub samples: Vec<Sample>,
}

/// Per-device latch that fires at most one automatic export.
#[derive(Debug)]
pub struct ExportTrigger {
    threshold: usize,
    policy: LatchPolicy,
    fired: HashSet<String>,
}

impl ExportTrigger {
    pub fn new(threshold: usize, policy: LatchPolicy) -> Self {
        Self {
            threshold,
            policy,
            fired: HashSet::new(),
        }
    }

    /// Check a device's stream right after an append.
    pub fn on_append(&mut self, device_id: &str, stream: &[Sample]) -> Option<ExportEvent> {
        let len = stream.len();
        let reached = match self.policy {
            LatchPolicy::Exact => len == self.threshold,
            LatchPolicy::AtLeast => len >= self.threshold,
        };

        if !reached || self.threshold == 0 || self.fired.contains(device_id) {
            return None;
        }

        self.fired.insert(device_id.to_string());
        Some(ExportEvent {
            device_id: device_id.to_string(),
            samples: stream.to_vec(),
        })
    }

    /// Whether the latch for a device has already fired.
    pub fn has_fired(&self, device_id: &str) -> bool {
        self.fired.contains(device_id)
    }
}

impl Default for ExportTrigger {
    fn default() -> Self {
        Self::new(DEFAULT_EXPORT_THRESHOLD, LatchPolicy::default())
    }
}
