use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::recognition::{Recognition, RecognitionKind};
use crate::models::scan::{ScanRecord, ScanStatus};
use crate::pipeline::format;
use crate::services::recognition::RecognitionError;
use crate::store::{Mutation, RecordStore, StoreError, StoreHandle};

/// Result of one recognition call for one record.
#[derive(Debug)]
pub struct RecognitionOutcome {
    pub kind: RecognitionKind,
    pub result: Result<Recognition, RecognitionError>,
}

/// Writes recognition outcomes into scan records and decides completion.
pub struct ResultAggregator {
    store: Arc<dyn RecordStore>,
}

impl ResultAggregator {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Apply a single outcome in its own transaction.
    ///
    /// A success writes its result field and ready marker, then runs
    /// completion detection in the same transaction. A failure marks the
    /// record `Failed` and writes no field. Successes that arrive after the
    /// record failed are rejected, so `Failed` is never overwritten.
    pub async fn apply(
        &self,
        store: &StoreHandle,
        id: Uuid,
        outcome: RecognitionOutcome,
    ) -> Result<ScanRecord, StoreError> {
        let kind = outcome.kind;
        let mutation: Mutation = match outcome.result {
            Ok(recognition) => {
                let text = format::render(&recognition);
                Box::new(move |record: &mut ScanRecord| write_result(record, kind, text))
            }
            Err(e) => {
                warn!(
                    record_id = %id,
                    store = %store,
                    operation = kind.label(),
                    error = %e,
                    "Recognition failed"
                );
                metrics::counter!("recognition_failures_total", "operation" => kind.label())
                    .increment(1);
                Box::new(mark_failed)
            }
        };

        self.store.transact(store, id, mutation).await
    }

    /// Standalone completion check, safe to repeat on a completed record.
    pub async fn complete_if_ready(
        &self,
        store: &StoreHandle,
        id: Uuid,
    ) -> Result<ScanRecord, StoreError> {
        let current = self
            .store
            .get(store, id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                store: store.clone(),
                id,
            })?;
        if current.status == ScanStatus::Completed || !current.has_all_results() {
            return Ok(current);
        }

        self.store
            .transact(
                store,
                id,
                Box::new(|record: &mut ScanRecord| {
                    record.complete_if_ready();
                    Ok(())
                }),
            )
            .await
    }

    /// Drain every outcome for one record and apply them in arrival order.
    ///
    /// Returns the last committed status, if any write succeeded.
    pub async fn collect(
        &self,
        store: &StoreHandle,
        id: Uuid,
        mut outcomes: mpsc::Receiver<RecognitionOutcome>,
    ) -> Option<ScanStatus> {
        let mut last_status = None;

        while let Some(outcome) = outcomes.recv().await {
            let kind = outcome.kind;
            match self.apply(store, id, outcome).await {
                Ok(record) => {
                    debug!(
                        record_id = %id,
                        operation = kind.label(),
                        status = %record.status,
                        "Recognition result written"
                    );
                    last_status = Some(record.status);
                }
                Err(StoreError::Rejected(reason)) => {
                    debug!(record_id = %id, operation = kind.label(), reason, "Result dropped");
                }
                Err(e) => {
                    error!(
                        record_id = %id,
                        store = %store,
                        operation = kind.label(),
                        error = %e,
                        "Failed to write recognition result"
                    );
                }
            }
        }

        match last_status {
            Some(ScanStatus::Completed) => {
                info!(record_id = %id, store = %store, "Scan completed");
                metrics::counter!("scan_records_completed_total").increment(1);
            }
            Some(ScanStatus::Failed) => {
                info!(record_id = %id, store = %store, "Scan failed");
                metrics::counter!("scan_records_failed_total").increment(1);
            }
            other => {
                warn!(
                    record_id = %id,
                    store = %store,
                    status = ?other,
                    "Scan pipeline ended without a terminal status"
                );
            }
        }
        last_status
    }
}

fn write_result(record: &mut ScanRecord, kind: RecognitionKind, text: String) -> Result<(), StoreError> {
    if record.status == ScanStatus::Failed {
        return Err(StoreError::Rejected(format!(
            "record already failed, dropping {kind} result"
        )));
    }
    let slot = record.result_mut(kind);
    if slot.is_some() {
        return Err(StoreError::Rejected(format!("{kind} result already written")));
    }
    *slot = Some(text);
    record.status = kind.ready_status();
    record.complete_if_ready();
    Ok(())
}

pub(crate) fn mark_failed(record: &mut ScanRecord) -> Result<(), StoreError> {
    if record.status == ScanStatus::Completed {
        return Err(StoreError::Rejected(
            "record already completed".to_string(),
        ));
    }
    record.status = ScanStatus::Failed;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processing() -> ScanRecord {
        let mut record = ScanRecord::new_upload(vec![1]);
        record.status = ScanStatus::Processing;
        record
    }

    #[test]
    fn test_write_sets_ready_marker() {
        let mut record = processing();
        write_result(&mut record, RecognitionKind::Classification, "c".into()).unwrap();
        assert_eq!(record.status, ScanStatus::ClassificationResultReady);
        assert_eq!(record.classification_result.as_deref(), Some("c"));
    }

    #[test]
    fn test_last_write_completes() {
        let mut record = processing();
        write_result(&mut record, RecognitionKind::FaceDetection, String::new()).unwrap();
        write_result(&mut record, RecognitionKind::Text, "t".into()).unwrap();
        assert_eq!(record.status, ScanStatus::TextScanResultReady);
        write_result(&mut record, RecognitionKind::Classification, "c".into()).unwrap();
        assert_eq!(record.status, ScanStatus::Completed);
    }

    #[test]
    fn test_write_after_failure_is_rejected() {
        let mut record = processing();
        mark_failed(&mut record).unwrap();
        let err = write_result(&mut record, RecognitionKind::Text, "t".into()).unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert!(record.text_scan_result.is_none());
    }

    #[test]
    fn test_result_written_at_most_once() {
        let mut record = processing();
        write_result(&mut record, RecognitionKind::Text, "first".into()).unwrap();
        assert!(write_result(&mut record, RecognitionKind::Text, "second".into()).is_err());
        assert_eq!(record.text_scan_result.as_deref(), Some("first"));
    }

    #[test]
    fn test_completed_record_cannot_fail() {
        let mut record = processing();
        for kind in RecognitionKind::ALL {
            write_result(&mut record, kind, String::new()).unwrap();
        }
        assert!(mark_failed(&mut record).is_err());
        assert_eq!(record.status, ScanStatus::Completed);
    }
}
