use garde::Validate;
use image::ImageFormat;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::api::{ImagePayload, UploadLimits};
use crate::services::encryption::{EncryptionError, ImageCipher};

/// Writes scan images to local files for the recognition client to read.
///
/// Each record gets its own file under the staging directory, so concurrent
/// claims never share a path.
pub struct ImageStager {
    dir: PathBuf,
    cipher: Option<Arc<ImageCipher>>,
    limits: UploadLimits,
}

impl ImageStager {
    pub fn new(dir: impl Into<PathBuf>, limits: UploadLimits) -> Self {
        Self {
            dir: dir.into(),
            cipher: None,
            limits,
        }
    }

    /// Encrypt staged files at rest.
    pub fn with_cipher(mut self, cipher: ImageCipher) -> Self {
        self.cipher = Some(Arc::new(cipher));
        self
    }

    /// Persist `image` for `record_id`, replacing any earlier staged file.
    pub async fn stage(&self, record_id: Uuid, image: &[u8]) -> Result<StagedImage, StagingError> {
        ImagePayload { bytes: image }.validate_with(&self.limits)?;
        let format = image::guess_format(image)?;
        let extension = format.extensions_str().first().copied().unwrap_or("img");
        let path = self.dir.join(format!("{record_id}.{extension}"));

        tokio::fs::create_dir_all(&self.dir).await?;
        // The file usually does not exist; only the write below must succeed.
        let _ = tokio::fs::remove_file(&path).await;

        match &self.cipher {
            Some(cipher) => tokio::fs::write(&path, cipher.seal(record_id, image)?).await?,
            None => tokio::fs::write(&path, image).await?,
        }

        tracing::debug!(
            record_id = %record_id,
            path = %path.display(),
            format = ?format,
            bytes = image.len(),
            "Staged scan image"
        );

        Ok(StagedImage {
            record_id,
            path,
            format,
            cipher: self.cipher.clone(),
        })
    }
}

/// Handle to one staged image, shared by the three recognition tasks.
#[derive(Clone)]
pub struct StagedImage {
    record_id: Uuid,
    path: PathBuf,
    format: ImageFormat,
    cipher: Option<Arc<ImageCipher>>,
}

impl StagedImage {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.img", self.record_id))
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    /// Read the staged image back into memory, decrypting if needed.
    pub async fn load(&self) -> Result<Vec<u8>, StagingError> {
        let bytes = tokio::fs::read(&self.path).await?;
        match &self.cipher {
            Some(cipher) => Ok(cipher.open(self.record_id, &bytes)?),
            None => Ok(bytes),
        }
    }

    /// Remove the staged file once every recognition call is done with it.
    pub async fn discard(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            tracing::debug!(
                record_id = %self.record_id,
                error = %e,
                "Staged image already gone"
            );
        }
    }
}

impl fmt::Debug for StagedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedImage")
            .field("record_id", &self.record_id)
            .field("path", &self.path)
            .field("format", &self.format)
            .field("encrypted", &self.cipher.is_some())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Image rejected: {0}")]
    Rejected(#[from] garde::Report),

    #[error("Unrecognized image format: {0}")]
    UnsupportedFormat(#[from] image::ImageError),

    #[error("Staging I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDRpayload";

    #[tokio::test]
    async fn test_stage_writes_per_record_file() {
        let dir = tempfile::tempdir().unwrap();
        let stager = ImageStager::new(dir.path(), UploadLimits::default());
        let id = Uuid::new_v4();

        let staged = stager.stage(id, PNG).await.unwrap();
        assert_eq!(staged.path(), dir.path().join(format!("{id}.png")));
        assert_eq!(staged.mime_type(), "image/png");
        assert_eq!(staged.load().await.unwrap(), PNG);

        staged.discard().await;
        assert!(!staged.path().exists());
        // Discarding twice is harmless.
        staged.discard().await;
    }

    #[tokio::test]
    async fn test_stage_replaces_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let stager = ImageStager::new(dir.path(), UploadLimits::default());
        let id = Uuid::new_v4();
        std::fs::write(dir.path().join(format!("{id}.png")), b"stale").unwrap();

        let staged = stager.stage(id, PNG).await.unwrap();
        assert_eq!(std::fs::read(staged.path()).unwrap(), PNG);
    }

    #[tokio::test]
    async fn test_encrypted_staging() {
        let dir = tempfile::tempdir().unwrap();
        let key = base64::engine::general_purpose::STANDARD.encode([3u8; 32]);
        let stager = ImageStager::new(dir.path(), UploadLimits::default())
            .with_cipher(ImageCipher::from_base64_key(&key).unwrap());

        let staged = stager.stage(Uuid::new_v4(), PNG).await.unwrap();
        assert_ne!(std::fs::read(staged.path()).unwrap(), PNG);
        assert_eq!(staged.load().await.unwrap(), PNG);

        let debug = format!("{staged:?}");
        assert!(debug.contains("encrypted: true"));
        assert!(!debug.contains("cipher"));
    }

    #[tokio::test]
    async fn test_encrypted_file_is_bound_to_its_record() {
        let dir = tempfile::tempdir().unwrap();
        let key = base64::engine::general_purpose::STANDARD.encode([3u8; 32]);
        let stager = ImageStager::new(dir.path(), UploadLimits::default())
            .with_cipher(ImageCipher::from_base64_key(&key).unwrap());

        let first = stager.stage(Uuid::new_v4(), PNG).await.unwrap();
        let second = stager.stage(Uuid::new_v4(), PNG).await.unwrap();
        // Another record's sealed bytes must not open under this record.
        std::fs::copy(first.path(), second.path()).unwrap();

        let err = second.load().await.unwrap_err();
        assert!(matches!(err, StagingError::Encryption(EncryptionError::OpenFailed)));
    }

    #[tokio::test]
    async fn test_stage_rejects_bad_images() {
        let dir = tempfile::tempdir().unwrap();
        let stager = ImageStager::new(dir.path(), UploadLimits { max_image_bytes: 64 });

        let err = stager.stage(Uuid::new_v4(), b"not an image at all").await.unwrap_err();
        assert!(matches!(err, StagingError::UnsupportedFormat(_)));

        let err = stager.stage(Uuid::new_v4(), b"").await.unwrap_err();
        assert!(matches!(err, StagingError::Rejected(_)));

        let big = [PNG, &[0u8; 128]].concat();
        let err = stager.stage(Uuid::new_v4(), &big).await.unwrap_err();
        assert!(matches!(err, StagingError::Rejected(_)));
    }
}
