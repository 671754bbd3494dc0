use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::models::recognition::RecognitionKind;

/// Processing state of a scan record.
///
/// Mobile clients observe this field to drive their UI, so the string forms
/// are a shared contract and are matched case-sensitively on both sides.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, AsRefStr, PartialEq, Eq, Hash,
)]
pub enum ScanStatus {
    Uploading,
    Processing,
    Failed,
    TextScanResultReady,
    ClassificationResultReady,
    FaceDetectionResultReady,
    Completed,
}

impl ScanStatus {
    /// `Failed` and `Completed` are never left once reached.
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Failed | ScanStatus::Completed)
    }
}

/// A scan record as held in a record store.
///
/// Producers create it with `Uploading` status and the raw image. The
/// pipeline only ever writes `status` and the three result fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecord {
    pub id: Uuid,
    pub status: ScanStatus,
    pub image_data: Vec<u8>,
    pub text_scan_result: Option<String>,
    pub classification_result: Option<String>,
    pub face_detection_result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanRecord {
    /// A fresh upload as a producing client would write it.
    pub fn new_upload(image_data: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: ScanStatus::Uploading,
            image_data,
            text_scan_result: None,
            classification_result: None,
            face_detection_result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn result(&self, kind: RecognitionKind) -> Option<&str> {
        match kind {
            RecognitionKind::Text => self.text_scan_result.as_deref(),
            RecognitionKind::Classification => self.classification_result.as_deref(),
            RecognitionKind::FaceDetection => self.face_detection_result.as_deref(),
        }
    }

    pub fn result_mut(&mut self, kind: RecognitionKind) -> &mut Option<String> {
        match kind {
            RecognitionKind::Text => &mut self.text_scan_result,
            RecognitionKind::Classification => &mut self.classification_result,
            RecognitionKind::FaceDetection => &mut self.face_detection_result,
        }
    }

    /// True once every recognition operation has written its field.
    ///
    /// An empty string counts as written: zero faces is a valid result.
    pub fn has_all_results(&self) -> bool {
        RecognitionKind::ALL
            .iter()
            .all(|kind| self.result(*kind).is_some())
    }

    pub fn has_any_result(&self) -> bool {
        RecognitionKind::ALL
            .iter()
            .any(|kind| self.result(*kind).is_some())
    }

    /// Mark the record `Completed` if all three result fields are present.
    ///
    /// Status is last-writer-wins across the per-operation ready markers, so
    /// completion is decided from the fields, never from the status. Calling
    /// this again on a completed record changes nothing. A failed record
    /// stays failed.
    pub fn complete_if_ready(&mut self) -> bool {
        if self.status == ScanStatus::Failed || !self.has_all_results() {
            return false;
        }
        self.status = ScanStatus::Completed;
        true
    }
}
