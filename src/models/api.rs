use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::scan::{ScanRecord, ScanStatus};

/// Size bounds applied to uploaded image payloads.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_image_bytes: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_image_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Raw image bytes checked before they are stored or staged.
#[derive(Debug, Validate)]
#[garde(context(UploadLimits))]
pub struct ImagePayload<'a> {
    #[garde(custom(within_upload_limit))]
    pub bytes: &'a [u8],
}

fn within_upload_limit(bytes: &[u8], limits: &UploadLimits) -> garde::Result {
    if bytes.is_empty() {
        return Err(garde::Error::new("image data is empty"));
    }
    if bytes.len() > limits.max_image_bytes {
        return Err(garde::Error::new(format!(
            "image is {} bytes, limit is {}",
            bytes.len(),
            limits.max_image_bytes
        )));
    }
    Ok(())
}

/// Store path a producer submits a scan into, e.g. `/alice/scanner`.
#[derive(Debug, Deserialize, Validate)]
pub struct StorePath {
    #[garde(length(min = 2, max = 512), custom(is_absolute_store_path))]
    pub store: String,
}

fn is_absolute_store_path(value: &str, _ctx: &()) -> garde::Result {
    if !value.starts_with('/') || value.ends_with('/') || value.contains("//") {
        return Err(garde::Error::new("store path must look like /tenant/scanner"));
    }
    Ok(())
}

/// Response after submitting a scan.
#[derive(Debug, Serialize)]
pub struct SubmitScanResponse {
    pub id: Uuid,
    pub store: String,
    pub status: ScanStatus,
    pub message: String,
}

/// Client-facing view of a scan record. The image itself is never echoed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanView {
    pub id: Uuid,
    pub store: String,
    pub status: ScanStatus,
    pub text_scan_result: Option<String>,
    pub classification_result: Option<String>,
    pub face_detection_result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanView {
    pub fn new(store: &str, record: ScanRecord) -> Self {
        Self {
            id: record.id,
            store: store.to_string(),
            status: record.status,
            text_scan_result: record.text_scan_result,
            classification_result: record.classification_result,
            face_detection_result: record.face_detection_result,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_payload_limits() {
        let limits = UploadLimits { max_image_bytes: 4 };
        assert!(ImagePayload { bytes: b"abcd" }.validate_with(&limits).is_ok());
        assert!(ImagePayload { bytes: b"abcde" }.validate_with(&limits).is_err());
        assert!(ImagePayload { bytes: b"" }.validate_with(&limits).is_err());
    }

    #[test]
    fn test_store_path_validation() {
        let ok = StorePath { store: "/alice/scanner".to_string() };
        assert!(ok.validate().is_ok());

        for bad in ["alice/scanner", "/alice/", "/alice//scanner", "/"] {
            let path = StorePath { store: bad.to_string() };
            assert!(path.validate().is_err(), "{bad} should be rejected");
        }
    }
}
