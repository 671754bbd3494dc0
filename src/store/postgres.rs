use async_trait::async_trait;
use serde::Deserialize;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    check_new_upload, Mutation, RecordStore, ScopeFilter, StoreError, StoreHandle, StoreScope,
    Subscription, SUBSCRIPTION_BUFFER,
};
use crate::db::queries::{self, CHANGE_CHANNEL};
use crate::models::scan::ScanRecord;

/// Payload emitted by the `scan_records` change trigger.
#[derive(Debug, Deserialize)]
struct ChangeNotification {
    store_path: String,
    record_id: Uuid,
}

/// PostgreSQL-backed record store.
///
/// Every store path is a partition of the `scan_records` table. Committed
/// writes are fanned out to subscribers through `LISTEN/NOTIFY`.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn subscribe(&self, scope: &StoreScope) -> Result<Subscription, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;

        // Listen first, then snapshot, so nothing committed in between is lost.
        let existing = queries::list_store_paths(&self.pool).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut filter = ScopeFilter::new(scope.clone());

        tokio::spawn(async move {
            for path in existing {
                if let Some(event) = filter.open(StoreHandle::new(path)) {
                    if tx.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
            }

            loop {
                // try_recv hands connection loss back to us instead of
                // silently reconnecting and dropping notifications.
                match listener.try_recv().await {
                    Ok(Some(notification)) => {
                        let change: ChangeNotification =
                            match serde_json::from_str(notification.payload()) {
                                Ok(change) => change,
                                Err(e) => {
                                    tracing::warn!(
                                        error = %e,
                                        payload = notification.payload(),
                                        "Ignoring malformed change notification"
                                    );
                                    continue;
                                }
                            };
                        let store = StoreHandle::new(change.store_path);
                        for event in filter.route(store, vec![change.record_id]) {
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::error!("Change listener connection lost");
                        let _ = tx.send(Err(StoreError::SubscriptionClosed)).await;
                        return;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Change listener failed");
                        let _ = tx.send(Err(StoreError::Database(e))).await;
                        return;
                    }
                }
            }
        });

        Ok(Subscription::new(rx))
    }

    async fn read_all(&self, store: &StoreHandle) -> Result<Vec<ScanRecord>, StoreError> {
        Ok(queries::list_scans(&self.pool, store.as_str()).await?)
    }

    async fn first_uploading(&self, store: &StoreHandle) -> Result<Option<ScanRecord>, StoreError> {
        Ok(queries::first_uploading(&self.pool, store.as_str()).await?)
    }

    async fn get(&self, store: &StoreHandle, id: Uuid) -> Result<Option<ScanRecord>, StoreError> {
        Ok(queries::get_scan(&self.pool, store.as_str(), id).await?)
    }

    async fn insert(&self, store: &StoreHandle, record: ScanRecord) -> Result<ScanRecord, StoreError> {
        check_new_upload(&record)?;
        Ok(queries::insert_scan(&self.pool, store.as_str(), &record).await?)
    }

    async fn transact(
        &self,
        store: &StoreHandle,
        id: Uuid,
        mutation: Mutation,
    ) -> Result<ScanRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut record = queries::lock_scan(&mut *tx, store.as_str(), id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                store: store.clone(),
                id,
            })?;

        if let Err(e) = mutation(&mut record) {
            tx.rollback().await?;
            return Err(e);
        }

        let committed = queries::update_scan(&mut *tx, store.as_str(), &record).await?;
        tx.commit().await?;
        Ok(committed)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
