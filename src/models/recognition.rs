use serde::{Deserialize, Serialize};
use strum::Display;

use crate::models::scan::ScanStatus;

/// The three independent analyses run on every claimed scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq, Hash)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecognitionKind {
    Text,
    Classification,
    FaceDetection,
}

impl RecognitionKind {
    pub const ALL: [RecognitionKind; 3] = [
        RecognitionKind::Text,
        RecognitionKind::Classification,
        RecognitionKind::FaceDetection,
    ];

    /// Status written alongside this operation's result field.
    pub fn ready_status(self) -> ScanStatus {
        match self {
            RecognitionKind::Text => ScanStatus::TextScanResultReady,
            RecognitionKind::Classification => ScanStatus::ClassificationResultReady,
            RecognitionKind::FaceDetection => ScanStatus::FaceDetectionResultReady,
        }
    }

    /// Metric label value.
    pub fn label(self) -> &'static str {
        match self {
            RecognitionKind::Text => "text",
            RecognitionKind::Classification => "classification",
            RecognitionKind::FaceDetection => "face_detection",
        }
    }
}

/// One class returned by image classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageClass {
    pub label: String,
    pub score: f64,
    /// Slash-separated taxonomy path, e.g. `/products/cup`.
    pub type_hierarchy: Option<String>,
}

impl ImageClass {
    pub fn new(label: impl Into<String>, score: f64, type_hierarchy: Option<&str>) -> Self {
        Self {
            label: label.into(),
            score,
            type_hierarchy: type_hierarchy.map(str::to_string),
        }
    }
}

/// A face found by face detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedFace {
    pub gender: String,
    pub age_min: Option<u32>,
    pub age_max: Option<u32>,
}

/// Successful payload of a recognition operation, before formatting.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    Text(String),
    Classes(Vec<ImageClass>),
    Faces(Vec<DetectedFace>),
}
