//! Fan-out of a batch onto the shared runner.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use hough_protocol::{DetectResponse, RoiRecord, RoiResult, Thresholds};

use crate::pool::{DetectionTask, TaskRunner};

use super::DISPATCH_TARGET;

/// Submits every region of a batch and gathers the results in order.
#[derive(Clone)]
pub struct DispatchEngine {
    runner: Arc<dyn TaskRunner>,
}

impl DispatchEngine {
    /// Wraps the runner shared by all connections.
    #[must_use]
    pub fn new(runner: Arc<dyn TaskRunner>) -> Self {
        Self { runner }
    }

    /// Runs a batch and builds its response.
    ///
    /// All tasks are submitted before any is awaited; outcomes are then
    /// collected in submission order, so `results[i]` always answers
    /// `records[i]`. Task failures become per-item errors and never fail the
    /// batch.
    #[must_use]
    pub fn run(&self, thresholds: Thresholds, records: Vec<RoiRecord>) -> DetectResponse {
        let started = Instant::now();
        let pending: Vec<_> = records
            .into_iter()
            .map(|record| {
                let id = record.spec.id.clone();
                (id, self.runner.submit(DetectionTask::new(record, thresholds)))
            })
            .collect();

        let results: Vec<RoiResult> = pending
            .into_iter()
            .map(|(id, task)| match task.wait() {
                Ok(Some(circle)) => RoiResult::matched(id, circle),
                Ok(None) => RoiResult::no_match(id),
                Err(error) => RoiResult::failed(id, error.to_string()),
            })
            .collect();

        let elapsed = started.elapsed();
        debug!(
            target: DISPATCH_TARGET,
            items = results.len(),
            failed = results.iter().filter(|result| result.error.is_some()).count(),
            elapsed_ms = elapsed.as_millis(),
            "batch complete"
        );
        DetectResponse::success(results, elapsed)
    }
}
