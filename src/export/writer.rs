//! Background writer for automatic exports.

use crate::core::ExportEvent;
use crate::export::{csv, ExportError};
use crate::stats::SharedIngestLog;
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

/// A queued export with its resolved destination.
struct ExportJob {
    event: ExportEvent,
    path: PathBuf,
}

/// Result of one automatic export.
#[derive(Debug)]
pub struct ExportOutcome {
    pub device_id: String,
    pub sample_count: usize,
    pub result: Result<PathBuf, ExportError>,
}

/// Cloneable handle for queueing automatic exports.
#[derive(Clone)]
pub struct ExportQueue {
    export_dir: PathBuf,
    jobs: Sender<ExportJob>,
    outcomes: Sender<ExportOutcome>,
}

impl ExportQueue {
    /// Queue an automatic export and return its destination. Never blocks.
    ///
    /// When the writer is gone the failure is also reported on the outcome
    /// channel, like any other failed automatic export.
    pub fn dispatch(&self, event: ExportEvent) -> Result<PathBuf, ExportError> {
        let path = self
            .export_dir
            .join(csv::auto_export_filename(&event.device_id, Utc::now()));

        match self.jobs.send(ExportJob {
            event,
            path: path.clone(),
        }) {
            Ok(()) => Ok(path),
            Err(crossbeam_channel::SendError(job)) => {
                let _ = self.outcomes.send(ExportOutcome {
                    device_id: job.event.device_id,
                    sample_count: job.event.samples.len(),
                    result: Err(ExportError::Unavailable),
                });
                Err(ExportError::Unavailable)
            }
        }
    }
}

/// Owns the export thread and the channels around it.
pub struct ExportDispatcher {
    queue: Option<ExportQueue>,
    outcomes: Receiver<ExportOutcome>,
    worker: Option<JoinHandle<()>>,
}

impl ExportDispatcher {
    /// Start the export thread writing into `export_dir`.
    pub fn spawn(export_dir: PathBuf, log: SharedIngestLog) -> Result<Self, ExportError> {
        let (sender, jobs) = unbounded::<ExportJob>();
        let (outcome_tx, outcomes) = unbounded::<ExportOutcome>();

        let worker_outcomes = outcome_tx.clone();
        let worker = thread::Builder::new()
            .name("sensor-stream-export".to_string())
            .spawn(move || run_worker(jobs, worker_outcomes, log))?;

        Ok(Self {
            queue: Some(ExportQueue {
                export_dir,
                jobs: sender,
                outcomes: outcome_tx,
            }),
            outcomes,
            worker: Some(worker),
        })
    }

    /// A queue handle for the ingestion path.
    pub fn queue(&self) -> Result<ExportQueue, ExportError> {
        self.queue.clone().ok_or(ExportError::Unavailable)
    }

    /// Outcomes of automatic exports, in completion order.
    pub fn outcomes(&self) -> &Receiver<ExportOutcome> {
        &self.outcomes
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    ///
    /// Blocks until every outstanding `ExportQueue` clone has been dropped.
    pub fn shutdown(&mut self) {
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Export thread panicked");
            }
        }
    }
}

impl Drop for ExportDispatcher {
    fn drop(&mut self) {
        // Detach rather than join: queue clones may still be alive on a
        // runtime thread, and the worker exits once they are gone.
        self.queue.take();
    }
}

fn run_worker(jobs: Receiver<ExportJob>, outcomes: Sender<ExportOutcome>, log: SharedIngestLog) {
    for ExportJob { event, path } in jobs {
        let result = csv::write_file(&path, &event.samples);

        match &result {
            Ok(path) => {
                log.record_auto_export(&event.device_id);
                tracing::info!(
                    device_id = %event.device_id,
                    samples = event.samples.len(),
                    "Exported first window to {}",
                    path.display()
                );
            }
            Err(e) => {
                log.record_export_failure();
                tracing::error!(device_id = %event.device_id, "Automatic export failed: {e}");
            }
        }

        // Nobody listening is fine; the outcome is already logged.
        let _ = outcomes.send(ExportOutcome {
            device_id: event.device_id,
            sample_count: event.samples.len(),
            result,
        });
    }
}
