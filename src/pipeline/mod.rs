//! Scan processing pipeline: claim, stage, recognize, aggregate.

pub mod aggregator;
pub mod dispatcher;
pub mod format;

pub use aggregator::{RecognitionOutcome, ResultAggregator};
pub use dispatcher::{DispatchOutcome, ScanDispatcher};

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Record store error: {0}")]
    Store(#[from] StoreError),
}

/// Register pipeline metric descriptions with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "scan_records_claimed_total",
        "Scan records claimed for processing"
    );
    metrics::describe_counter!(
        "scan_records_completed_total",
        "Scan records with all three recognition results written"
    );
    metrics::describe_counter!(
        "scan_records_failed_total",
        "Scan records marked failed by staging or recognition errors"
    );
    metrics::describe_counter!(
        "recognition_failures_total",
        "Failed recognition calls by operation"
    );
    metrics::describe_histogram!(
        "recognition_duration_seconds",
        "Time spent in a single recognition call"
    );
}
