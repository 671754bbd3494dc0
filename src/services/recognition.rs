use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::models::recognition::{DetectedFace, ImageClass};
use crate::services::staging::{StagedImage, StagingError};

/// Visual recognition operations run against one staged image.
///
/// Implementations must be callable concurrently; the pipeline issues all
/// three operations for a record at the same time.
#[async_trait]
pub trait RecognitionProvider: Send + Sync {
    async fn recognize_text(&self, image: &StagedImage) -> Result<String, RecognitionError>;

    async fn classify(&self, image: &StagedImage) -> Result<Vec<ImageClass>, RecognitionError>;

    async fn detect_faces(&self, image: &StagedImage)
        -> Result<Vec<DetectedFace>, RecognitionError>;
}

/// Client for a Watson-style Visual Recognition v3 HTTP API.
pub struct VisualRecognitionClient {
    http: Client,
    base_url: String,
    api_key: String,
    version: String,
}

#[derive(Deserialize)]
struct VisualResponse {
    #[serde(default)]
    images: Vec<ImageEntry>,
}

#[derive(Deserialize)]
struct ImageEntry {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    classifiers: Vec<ClassifierEntry>,
    #[serde(default)]
    faces: Vec<FaceEntry>,
    #[serde(default)]
    error: Option<ProviderErrorEntry>,
}

#[derive(Deserialize)]
struct ClassifierEntry {
    #[serde(default)]
    classes: Vec<ClassEntry>,
}

#[derive(Deserialize)]
struct ClassEntry {
    class: String,
    score: f64,
    type_hierarchy: Option<String>,
}

#[derive(Deserialize)]
struct FaceEntry {
    gender: Option<GenderEntry>,
    age: Option<AgeEntry>,
}

#[derive(Deserialize)]
struct GenderEntry {
    gender: String,
}

#[derive(Deserialize)]
struct AgeEntry {
    min: Option<u32>,
    max: Option<u32>,
}

#[derive(Deserialize)]
struct ProviderErrorEntry {
    #[serde(default)]
    description: String,
}

impl VisualRecognitionClient {
    pub fn new(base_url: &str, api_key: &str, version: &str) -> Result<Self, RecognitionError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(RecognitionError::Http)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            version: version.to_string(),
        })
    }

    /// Upload the staged image to one endpoint and return the first image entry.
    async fn submit(&self, endpoint: &str, image: &StagedImage) -> Result<ImageEntry, RecognitionError> {
        let bytes = image.load().await?;
        let part = Part::bytes(bytes)
            .file_name(image.file_name())
            .mime_str(image.mime_type())
            .map_err(RecognitionError::Http)?;
        let form = Form::new().part("images_file", part);

        let url = format!("{}/v3/{}", self.base_url, endpoint);
        let response = self
            .http
            .post(&url)
            .query(&[("api_key", self.api_key.as_str()), ("version", self.version.as_str())])
            .multipart(form)
            .send()
            .await
            .map_err(RecognitionError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecognitionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: VisualResponse = response.json().await.map_err(RecognitionError::Http)?;
        let entry = parsed
            .images
            .into_iter()
            .next()
            .ok_or(RecognitionError::EmptyResponse)?;

        if let Some(err) = entry.error {
            return Err(RecognitionError::Provider(err.description));
        }
        Ok(entry)
    }
}

#[async_trait]
impl RecognitionProvider for VisualRecognitionClient {
    async fn recognize_text(&self, image: &StagedImage) -> Result<String, RecognitionError> {
        let entry = self.submit("recognize_text", image).await?;
        Ok(entry.text.unwrap_or_default())
    }

    async fn classify(&self, image: &StagedImage) -> Result<Vec<ImageClass>, RecognitionError> {
        let entry = self.submit("classify", image).await?;
        let classes = entry
            .classifiers
            .into_iter()
            .next()
            .map(|c| c.classes)
            .unwrap_or_default();

        Ok(classes
            .into_iter()
            .map(|c| ImageClass {
                label: c.class,
                score: c.score,
                type_hierarchy: c.type_hierarchy.filter(|t| !t.is_empty()),
            })
            .collect())
    }

    async fn detect_faces(
        &self,
        image: &StagedImage,
    ) -> Result<Vec<DetectedFace>, RecognitionError> {
        let entry = self.submit("detect_faces", image).await?;
        Ok(entry
            .faces
            .into_iter()
            .map(|f| DetectedFace {
                gender: f
                    .gender
                    .map(|g| g.gender)
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
                age_min: f.age.as_ref().and_then(|a| a.min),
                age_max: f.age.as_ref().and_then(|a| a.max),
            })
            .collect())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Recognition service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Recognition service returned no image results")]
    EmptyResponse,

    #[error("Recognition service reported an error: {0}")]
    Provider(String),

    #[error("Could not read staged image: {0}")]
    Staging(#[from] StagingError),

    #[error("Recognition call timed out after {0:?}")]
    Timeout(Duration),
}
