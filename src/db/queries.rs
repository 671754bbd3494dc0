use sqlx::{postgres::PgRow, PgExecutor, Row};
use uuid::Uuid;

use crate::models::scan::{ScanRecord, ScanStatus};

/// Channel the `scan_records` trigger notifies on every insert and update.
pub const CHANGE_CHANNEL: &str = "scan_record_changes";

fn scan_from_row(row: &PgRow) -> Result<ScanRecord, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<ScanStatus>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(ScanRecord {
        id: row.try_get("id")?,
        status,
        image_data: row.try_get("image_data")?,
        text_scan_result: row.try_get("text_scan_result")?,
        classification_result: row.try_get("classification_result")?,
        face_detection_result: row.try_get("face_detection_result")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new scan record
pub async fn insert_scan<'e, E: PgExecutor<'e>>(
    executor: E,
    store_path: &str,
    record: &ScanRecord,
) -> Result<ScanRecord, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO scan_records (id, store_path, status, image_data)
        VALUES ($1, $2, $3, $4)
        RETURNING id, status, image_data, text_scan_result, classification_result,
                  face_detection_result, created_at, updated_at
        "#,
    )
    .bind(record.id)
    .bind(store_path)
    .bind(record.status.as_ref())
    .bind(&record.image_data)
    .fetch_one(executor)
    .await?;

    scan_from_row(&row)
}

/// Get a scan record by ID within a store
pub async fn get_scan<'e, E: PgExecutor<'e>>(
    executor: E,
    store_path: &str,
    id: Uuid,
) -> Result<Option<ScanRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, status, image_data, text_scan_result, classification_result,
               face_detection_result, created_at, updated_at
        FROM scan_records
        WHERE store_path = $1 AND id = $2
        "#,
    )
    .bind(store_path)
    .bind(id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(scan_from_row).transpose()
}

/// Lock a scan record for the rest of the surrounding transaction
pub async fn lock_scan<'e, E: PgExecutor<'e>>(
    executor: E,
    store_path: &str,
    id: Uuid,
) -> Result<Option<ScanRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, status, image_data, text_scan_result, classification_result,
               face_detection_result, created_at, updated_at
        FROM scan_records
        WHERE store_path = $1 AND id = $2
        FOR UPDATE
        "#,
    )
    .bind(store_path)
    .bind(id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(scan_from_row).transpose()
}

/// All scan records in a store, oldest first
pub async fn list_scans<'e, E: PgExecutor<'e>>(
    executor: E,
    store_path: &str,
) -> Result<Vec<ScanRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, status, image_data, text_scan_result, classification_result,
               face_detection_result, created_at, updated_at
        FROM scan_records
        WHERE store_path = $1
        ORDER BY seq ASC
        "#,
    )
    .bind(store_path)
    .fetch_all(executor)
    .await?;

    rows.iter().map(scan_from_row).collect()
}

/// Oldest upload in a store that nobody has claimed yet.
///
/// Served by the partial `scan_records_uploading_idx` index, so finished
/// records and their images are never read.
pub async fn first_uploading<'e, E: PgExecutor<'e>>(
    executor: E,
    store_path: &str,
) -> Result<Option<ScanRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, status, image_data, text_scan_result, classification_result,
               face_detection_result, created_at, updated_at
        FROM scan_records
        WHERE store_path = $1 AND status = $2
        ORDER BY seq ASC
        LIMIT 1
        "#,
    )
    .bind(store_path)
    .bind(ScanStatus::Uploading.as_ref())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(scan_from_row).transpose()
}

/// Write the pipeline-owned fields of a scan record.
///
/// `image_data` is never rewritten here; it belongs to the producer.
pub async fn update_scan<'e, E: PgExecutor<'e>>(
    executor: E,
    store_path: &str,
    record: &ScanRecord,
) -> Result<ScanRecord, sqlx::Error> {
    let row = sqlx::query(
        r#"
        UPDATE scan_records
        SET status = $1,
            text_scan_result = $2,
            classification_result = $3,
            face_detection_result = $4,
            updated_at = NOW()
        WHERE store_path = $5 AND id = $6
        RETURNING id, status, image_data, text_scan_result, classification_result,
                  face_detection_result, created_at, updated_at
        "#,
    )
    .bind(record.status.as_ref())
    .bind(record.text_scan_result.as_deref())
    .bind(record.classification_result.as_deref())
    .bind(record.face_detection_result.as_deref())
    .bind(store_path)
    .bind(record.id)
    .fetch_one(executor)
    .await?;

    scan_from_row(&row)
}

/// Every store path that currently holds scan records
pub async fn list_store_paths<'e, E: PgExecutor<'e>>(
    executor: E,
) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query("SELECT DISTINCT store_path FROM scan_records ORDER BY store_path")
        .fetch_all(executor)
        .await?;

    rows.iter().map(|r| r.try_get("store_path")).collect()
}
