//! Observation port for migration progress.
//!
//! The runner, rebuilder and index advisor report what they do through a
//! [`MigrationObserver`]; production wires [`TracingObserver`], tests can wire
//! [`RecordingObserver`] and assert on the captured events.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::migration_runner::StepOutcome;
use crate::rebuild::RebuildReport;

pub trait MigrationObserver: Send + Sync {
    fn step_started(&self, _version: i64, _description: &str) {}

    fn step_finished(
        &self,
        _version: i64,
        _description: &str,
        _outcome: &StepOutcome,
        _elapsed: Duration,
    ) {
    }

    fn index_created(&self, _table: &str, _index: &str, _elapsed: Duration) {}

    fn index_skipped(&self, _table: &str, _index: &str, _missing: &[String]) {}

    fn table_rebuilt(&self, _report: &RebuildReport, _elapsed: Duration) {}
}

/// Emits every observation as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl MigrationObserver for TracingObserver {
    fn step_started(&self, version: i64, description: &str) {
        debug!(version, description, "Migration step started");
    }

    fn step_finished(
        &self,
        version: i64,
        description: &str,
        outcome: &StepOutcome,
        elapsed: Duration,
    ) {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        match outcome {
            StepOutcome::Degraded { error } => warn!(
                version,
                description,
                elapsed_ms,
                error = %error,
                "Optimization step failed; continuing in degraded mode"
            ),
            StepOutcome::Deferred { reason } => info!(
                version,
                description,
                elapsed_ms,
                reason = %reason,
                "Migration step deferred"
            ),
            StepOutcome::Applied | StepOutcome::AlreadyApplied => info!(
                version,
                description,
                elapsed_ms,
                outcome = outcome.as_str(),
                "Migration step finished"
            ),
        }
    }

    fn index_created(&self, table: &str, index: &str, elapsed: Duration) {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        info!(table, index, elapsed_ms, "Index created");
    }

    fn index_skipped(&self, table: &str, index: &str, missing: &[String]) {
        debug!(table, index, missing = ?missing, "Index skipped, columns not present yet");
    }

    fn table_rebuilt(&self, report: &RebuildReport, elapsed: Duration) {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        info!(
            table = %report.table,
            rows_before = report.rows_before,
            rows_after = report.rows_after,
            remapped_keys = report.remapped_keys,
            elapsed_ms,
            "Table rebuilt"
        );
    }
}

/// A single captured observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    StepStarted { version: i64 },
    StepFinished { version: i64, outcome: StepOutcome },
    IndexCreated { table: String, index: String },
    IndexSkipped { table: String, index: String, missing: Vec<String> },
    TableRebuilt { table: String, rows_before: i64, rows_after: i64 },
}

/// Keeps every observation in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn skipped_indexes(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ObservedEvent::IndexSkipped { index, .. } => Some(index.clone()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ObservedEvent) {
        self.events.lock().push(event);
    }
}

impl MigrationObserver for RecordingObserver {
    fn step_started(&self, version: i64, _description: &str) {
        self.push(ObservedEvent::StepStarted { version });
    }

    fn step_finished(
        &self,
        version: i64,
        _description: &str,
        outcome: &StepOutcome,
        _elapsed: Duration,
    ) {
        self.push(ObservedEvent::StepFinished {
            version,
            outcome: outcome.clone(),
        });
    }

    fn index_created(&self, table: &str, index: &str, _elapsed: Duration) {
        self.push(ObservedEvent::IndexCreated {
            table: table.to_owned(),
            index: index.to_owned(),
        });
    }

    fn index_skipped(&self, table: &str, index: &str, missing: &[String]) {
        self.push(ObservedEvent::IndexSkipped {
            table: table.to_owned(),
            index: index.to_owned(),
            missing: missing.to_vec(),
        });
    }

    fn table_rebuilt(&self, report: &RebuildReport, _elapsed: Duration) {
        self.push(ObservedEvent::TableRebuilt {
            table: report.table.clone(),
            rows_before: report.rows_before,
            rows_after: report.rows_after,
        });
    }
}
