use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::models::recognition::{Recognition, RecognitionKind};
use crate::models::scan::{ScanRecord, ScanStatus};
use crate::pipeline::aggregator::{mark_failed, RecognitionOutcome, ResultAggregator};
use crate::pipeline::PipelineError;
use crate::services::recognition::{RecognitionError, RecognitionProvider};
use crate::services::staging::{ImageStager, StagedImage};
use crate::store::{ChangeEvent, RecordStore, StoreError, StoreHandle, StoreScope};

/// Default upper bound on a single recognition call.
pub const DEFAULT_RECOGNITION_TIMEOUT: Duration = Duration::from_secs(120);

/// What a change notification led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No record in the store is waiting to be processed.
    Idle,
    /// Another dispatcher claimed the record first.
    ClaimLost(Uuid),
    /// The image could not be staged; the record was marked `Failed`.
    StagingFailed(Uuid),
    /// The record was claimed and its recognition calls launched.
    Dispatched(Uuid),
}

/// Watches a scope of stores and runs every new upload through recognition.
///
/// One dispatcher serves both deployments: a fixed single-tenant store path
/// or a glob across many tenant stores.
pub struct ScanDispatcher {
    store: Arc<dyn RecordStore>,
    recognizer: Arc<dyn RecognitionProvider>,
    stager: Arc<ImageStager>,
    aggregator: Arc<ResultAggregator>,
    scope: StoreScope,
    recognition_timeout: Duration,
}

impl ScanDispatcher {
    pub fn new(
        store: Arc<dyn RecordStore>,
        recognizer: Arc<dyn RecognitionProvider>,
        stager: ImageStager,
        scope: StoreScope,
    ) -> Self {
        Self {
            aggregator: Arc::new(ResultAggregator::new(Arc::clone(&store))),
            store,
            recognizer,
            stager: Arc::new(stager),
            scope,
            recognition_timeout: DEFAULT_RECOGNITION_TIMEOUT,
        }
    }

    pub fn with_recognition_timeout(mut self, timeout: Duration) -> Self {
        self.recognition_timeout = timeout;
        self
    }

    pub fn scope(&self) -> &StoreScope {
        &self.scope
    }

    /// Process change notifications until the subscription fails.
    ///
    /// Losing the store connection is fatal and is returned to the caller;
    /// restarting is left to whoever supervises the process.
    pub async fn run(&self) -> Result<(), PipelineError> {
        let mut subscription = self.store.subscribe(&self.scope).await?;
        info!(
            scope = %self.scope,
            multi_tenant = self.scope.is_multi_tenant(),
            "Listening for scan record changes"
        );

        while let Some(event) = subscription.next().await {
            let event = event?;
            debug!(store = %event.store, kind = ?event.kind, records = event.record_ids.len(), "Change received");

            if let Err(e) = self.handle_change(&event).await {
                error!(store = %event.store, error = %e, "Failed to dispatch change");
            }
        }

        Err(PipelineError::Store(StoreError::SubscriptionClosed))
    }

    /// Claim and launch at most one uploaded record from the changed store.
    pub async fn handle_change(&self, event: &ChangeEvent) -> Result<DispatchOutcome, PipelineError> {
        if !self.scope.matches(&event.store) {
            return Ok(DispatchOutcome::Idle);
        }

        let Some(candidate) = self.store.first_uploading(&event.store).await? else {
            // Typically our own status writes echoing back through the subscription.
            return Ok(DispatchOutcome::Idle);
        };

        let claimed = match self.claim(&event.store, candidate.id).await? {
            Some(record) => record,
            None => return Ok(DispatchOutcome::ClaimLost(candidate.id)),
        };

        info!(record_id = %claimed.id, store = %event.store, "New scan received");
        metrics::counter!("scan_records_claimed_total").increment(1);

        let staged = match self.stager.stage(claimed.id, &claimed.image_data).await {
            Ok(staged) => staged,
            Err(e) => {
                warn!(
                    record_id = %claimed.id,
                    store = %event.store,
                    error = %e,
                    "Failed to stage scan image"
                );
                self.store
                    .transact(&event.store, claimed.id, Box::new(mark_failed))
                    .await?;
                metrics::counter!("scan_records_failed_total").increment(1);
                return Ok(DispatchOutcome::StagingFailed(claimed.id));
            }
        };

        self.launch(event.store.clone(), claimed.id, Arc::new(staged));
        Ok(DispatchOutcome::Dispatched(claimed.id))
    }

    /// Conditional `Uploading -> Processing` inside one transaction.
    async fn claim(&self, store: &StoreHandle, id: Uuid) -> Result<Option<ScanRecord>, StoreError> {
        let claim = Box::new(|record: &mut ScanRecord| {
            if record.status != ScanStatus::Uploading {
                return Err(StoreError::Rejected(format!(
                    "scan is {}, not {}",
                    record.status,
                    ScanStatus::Uploading
                )));
            }
            record.status = ScanStatus::Processing;
            Ok(())
        });

        match self.store.transact(store, id, claim).await {
            Ok(record) => Ok(Some(record)),
            Err(StoreError::Rejected(reason)) => {
                debug!(record_id = %id, reason, "Claim lost");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Spawn the three recognition tasks and the aggregator that joins them.
    fn launch(&self, store: StoreHandle, id: Uuid, staged: Arc<StagedImage>) {
        let (tx, rx) = mpsc::channel(RecognitionKind::ALL.len());
        let span = tracing::info_span!("scan", record_id = %id, store = %store);

        for kind in RecognitionKind::ALL {
            let tx = tx.clone();
            let recognizer = Arc::clone(&self.recognizer);
            let image = Arc::clone(&staged);
            let timeout = self.recognition_timeout;

            tokio::spawn(
                async move {
                    let outcome = recognize(recognizer.as_ref(), kind, &image, timeout).await;
                    // The aggregator only goes away if the runtime is shutting down.
                    let _ = tx.send(outcome).await;
                }
                .instrument(span.clone()),
            );
        }
        drop(tx);

        let aggregator = Arc::clone(&self.aggregator);
        tokio::spawn(
            async move {
                aggregator.collect(&store, id, rx).await;
                staged.discard().await;
            }
            .instrument(span),
        );
    }
}

async fn recognize(
    recognizer: &dyn RecognitionProvider,
    kind: RecognitionKind,
    image: &StagedImage,
    limit: Duration,
) -> RecognitionOutcome {
    let start = Instant::now();
    let call = async {
        match kind {
            RecognitionKind::Text => recognizer.recognize_text(image).await.map(Recognition::Text),
            RecognitionKind::Classification => {
                recognizer.classify(image).await.map(Recognition::Classes)
            }
            RecognitionKind::FaceDetection => {
                recognizer.detect_faces(image).await.map(Recognition::Faces)
            }
        }
    };

    let result = match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RecognitionError::Timeout(limit)),
    };

    let elapsed = start.elapsed();
    metrics::histogram!("recognition_duration_seconds", "operation" => kind.label())
        .record(elapsed.as_secs_f64());
    debug!(
        operation = kind.label(),
        duration_ms = elapsed.as_millis() as u64,
        ok = result.is_ok(),
        "Recognition call finished"
    );

    RecognitionOutcome { kind, result }
}
