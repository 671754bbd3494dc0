//! Test helper utilities for pipeline tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;
use uuid::Uuid;

use scan_pipeline::models::api::UploadLimits;
use scan_pipeline::models::recognition::{DetectedFace, ImageClass};
use scan_pipeline::models::scan::ScanRecord;
use scan_pipeline::pipeline::ScanDispatcher;
use scan_pipeline::services::recognition::{RecognitionError, RecognitionProvider};
use scan_pipeline::services::staging::{ImageStager, StagedImage};
use scan_pipeline::store::{
    ChangeEvent, ChangeKind, MemoryRecordStore, RecordStore, StoreHandle, StoreScope,
};

pub type Reply<T> = Result<T, RecognitionError>;

/// One pending answer, released by the test holding the sender.
struct Gate<T>(Mutex<Option<oneshot::Receiver<Reply<T>>>>);

impl<T> Gate<T> {
    fn new() -> (Self, oneshot::Sender<Reply<T>>) {
        let (tx, rx) = oneshot::channel();
        (Gate(Mutex::new(Some(rx))), tx)
    }

    async fn wait(&self) -> Reply<T> {
        let rx = self.0.lock().unwrap().take();
        match rx {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(RecognitionError::Provider("gate dropped".into()))),
            None => Err(RecognitionError::Provider("operation called twice".into())),
        }
    }
}

/// Senders that decide when and how each recognition call returns.
pub struct Controls {
    pub text: oneshot::Sender<Reply<String>>,
    pub classify: oneshot::Sender<Reply<Vec<ImageClass>>>,
    pub faces: oneshot::Sender<Reply<Vec<DetectedFace>>>,
}

impl Controls {
    /// Release all three calls with successful answers.
    pub fn succeed(self, text: &str, classes: Vec<ImageClass>, faces: Vec<DetectedFace>) {
        let _ = self.text.send(Ok(text.to_string()));
        let _ = self.classify.send(Ok(classes));
        let _ = self.faces.send(Ok(faces));
    }
}

/// Recognition provider whose answers are scripted by the test.
///
/// Every call first reads the staged image back, so a call against a
/// missing or corrupted file fails the way the real client would.
pub struct ScriptedRecognizer {
    text: Gate<String>,
    classify: Gate<Vec<ImageClass>>,
    faces: Gate<Vec<DetectedFace>>,
    calls: AtomicUsize,
    loaded_bytes: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedRecognizer {
    pub fn new() -> (Arc<Self>, Controls) {
        let (text, text_tx) = Gate::new();
        let (classify, classify_tx) = Gate::new();
        let (faces, faces_tx) = Gate::new();
        let recognizer = Arc::new(Self {
            text,
            classify,
            faces,
            calls: AtomicUsize::new(0),
            loaded_bytes: Mutex::new(Vec::new()),
        });
        let controls = Controls {
            text: text_tx,
            classify: classify_tx,
            faces: faces_tx,
        };
        (recognizer, controls)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Image bytes each call saw, in call order.
    pub fn loaded_bytes(&self) -> Vec<Vec<u8>> {
        self.loaded_bytes.lock().unwrap().clone()
    }

    async fn enter(&self, image: &StagedImage) -> Result<(), RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let bytes = image.load().await?;
        self.loaded_bytes.lock().unwrap().push(bytes);
        Ok(())
    }
}

#[async_trait]
impl RecognitionProvider for ScriptedRecognizer {
    async fn recognize_text(&self, image: &StagedImage) -> Result<String, RecognitionError> {
        self.enter(image).await?;
        self.text.wait().await
    }

    async fn classify(&self, image: &StagedImage) -> Result<Vec<ImageClass>, RecognitionError> {
        self.enter(image).await?;
        self.classify.wait().await
    }

    async fn detect_faces(
        &self,
        image: &StagedImage,
    ) -> Result<Vec<DetectedFace>, RecognitionError> {
        self.enter(image).await?;
        self.faces.wait().await
    }
}

/// A dispatcher over a memory store with its own staging directory.
pub struct Harness {
    pub store: Arc<MemoryRecordStore>,
    pub staging: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryRecordStore::new()),
            staging: tempfile::tempdir().expect("Failed to create staging dir"),
        }
    }

    pub fn dispatcher(&self, recognizer: Arc<ScriptedRecognizer>, scope: &str) -> ScanDispatcher {
        let stager = ImageStager::new(self.staging.path(), UploadLimits::default());
        ScanDispatcher::new(
            self.store.clone(),
            recognizer,
            stager,
            StoreScope::parse(scope).expect("Invalid test scope"),
        )
    }

    /// Insert an upload the way a mobile client would.
    pub async fn upload(&self, store: &str, image: &[u8]) -> ScanRecord {
        self.store
            .insert(&StoreHandle::new(store), ScanRecord::new_upload(image.to_vec()))
            .await
            .expect("Failed to insert upload")
    }

    pub async fn record(&self, store: &str, id: Uuid) -> ScanRecord {
        self.store
            .get(&StoreHandle::new(store), id)
            .await
            .expect("Store read failed")
            .expect("Record missing")
    }

    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }
}

pub fn changed(store: &str, id: Uuid) -> ChangeEvent {
    ChangeEvent {
        store: StoreHandle::new(store),
        kind: ChangeKind::RecordsChanged,
        record_ids: vec![id],
    }
}

/// Poll a record until `done` holds (with timeout)
pub async fn wait_for_record<F>(harness: &Harness, store: &str, id: Uuid, done: F) -> ScanRecord
where
    F: Fn(&ScanRecord) -> bool,
{
    for _ in 0..500 {
        let record = harness.record(store, id).await;
        if done(&record) {
            return record;
        }
        sleep(Duration::from_millis(10)).await;
    }
    let record = harness.record(store, id).await;
    panic!("Record {id} never reached the expected state: {record:?}");
}

/// Wait until the aggregator has removed every staged file.
pub async fn wait_for_staging_cleanup(dir: &Path) {
    for _ in 0..500 {
        let empty = match std::fs::read_dir(dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        };
        if empty {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("Staged images were never cleaned up in {}", dir.display());
}
