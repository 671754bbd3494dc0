use serde::Deserialize;
use std::time::Duration;

use crate::models::api::UploadLimits;
use crate::store::{StoreError, StoreScope};

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// HTTP API bind address (e.g., "0.0.0.0:3000"). Unused by the notifier.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Prometheus scrape address for the notifier process
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,

    /// PostgreSQL connection string for the record store
    pub database_url: String,

    /// Upper bound on pooled database connections per process
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// Visual recognition service base URL
    #[serde(default = "default_recognition_url")]
    pub recognition_url: String,

    /// Visual recognition API key. Only the notifier calls the service, so
    /// the API server starts without one.
    #[serde(default)]
    pub recognition_api_key: Option<String>,

    /// Visual recognition API version date
    #[serde(default = "default_recognition_version")]
    pub recognition_version: String,

    /// Upper bound on a single recognition call, in seconds
    #[serde(default = "default_recognition_timeout_secs")]
    pub recognition_timeout_secs: u64,

    /// Store path or glob the notifier watches. A glob such as "/*/scanner"
    /// watches every tenant store; a plain path watches a single store.
    #[serde(default = "default_notifier_path")]
    pub notifier_path: String,

    /// Directory for transient staged images
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,

    /// AES-256-GCM key for staged images (base64-encoded, 32 bytes). Staged
    /// files are written in the clear when unset.
    #[serde(default)]
    pub staging_encryption_key: Option<String>,

    /// Largest accepted image payload in bytes
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_recognition_url() -> String {
    "https://gateway-a.watsonplatform.net/visual-recognition/api".to_string()
}

fn default_recognition_version() -> String {
    "2016-05-20".to_string()
}

fn default_recognition_timeout_secs() -> u64 {
    120
}

fn default_notifier_path() -> String {
    "/*/scanner".to_string()
}

fn default_staging_dir() -> String {
    "./staging".to_string()
}

fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn store_scope(&self) -> Result<StoreScope, StoreError> {
        StoreScope::parse(&self.notifier_path)
    }

    /// The recognition key, required by the notifier at startup.
    pub fn require_recognition_api_key(&self) -> Result<&str, envy::Error> {
        self.recognition_api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| envy::Error::Custom("missing value for field recognition_api_key".into()))
    }

    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_secs(self.recognition_timeout_secs)
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            max_image_bytes: self.max_image_bytes,
        }
    }
}
