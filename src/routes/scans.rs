use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{ImagePayload, ScanView, StorePath, SubmitScanResponse};
use crate::models::scan::ScanRecord;
use crate::store::{StoreError, StoreHandle};

/// POST /api/v1/scans — Upload an image into a store as a new scan.
///
/// Multipart fields: `store` (e.g. `/alice/scanner`) and `image`.
pub async fn submit_scan(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitScanResponse>), StatusCode> {
    let mut store: Option<String> = None;
    let mut image_data: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        match field.name() {
            Some("store") => {
                store = Some(field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?);
            }
            Some("image") => {
                let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                image_data = Some(data.to_vec());
            }
            _ => {}
        }
    }

    let store = StorePath {
        store: store.ok_or(StatusCode::BAD_REQUEST)?,
    };
    store.validate().map_err(|_| StatusCode::BAD_REQUEST)?;

    let image_data = image_data
        .filter(|data| !data.is_empty())
        .ok_or(StatusCode::BAD_REQUEST)?;
    ImagePayload { bytes: &image_data }
        .validate_with(&state.limits)
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;
    image::guess_format(&image_data).map_err(|_| StatusCode::UNSUPPORTED_MEDIA_TYPE)?;

    let handle = StoreHandle::new(store.store);
    let record = state
        .store
        .insert(&handle, ScanRecord::new_upload(image_data))
        .await
        .map_err(|e| {
            tracing::error!(store = %handle, error = %e, "Failed to insert scan");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    metrics::counter!("scans_submitted_total").increment(1);
    tracing::info!(record_id = %record.id, store = %handle, "Scan submitted");

    Ok((
        StatusCode::CREATED,
        Json(SubmitScanResponse {
            id: record.id,
            store: handle.to_string(),
            status: record.status,
            message: "Scan submitted for processing".to_string(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    pub store: String,
}

/// GET /api/v1/scans/{id}?store=/alice/scanner — Current status and results.
pub async fn get_scan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ScanQuery>,
) -> Result<Json<ScanView>, StatusCode> {
    let handle = StoreHandle::new(query.store);
    match state.store.get(&handle, id).await {
        Ok(Some(record)) => Ok(Json(ScanView::new(handle.as_str(), record))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(StoreError::NotFound { .. }) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(record_id = %id, store = %handle, error = %e, "Failed to load scan");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
