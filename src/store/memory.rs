use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

use super::{
    check_new_upload, Mutation, RecordStore, ScopeFilter, StoreError, StoreHandle, StoreScope,
    Subscription, SUBSCRIPTION_BUFFER,
};
use crate::models::scan::{ScanRecord, ScanStatus};

/// In-process record store.
///
/// A write lock over all stores serializes transactions, and every committed
/// insert or mutation is broadcast to subscribers after the lock is released.
pub struct MemoryRecordStore {
    stores: RwLock<HashMap<StoreHandle, Vec<ScanRecord>>>,
    changes: broadcast::Sender<(StoreHandle, Uuid)>,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(SUBSCRIPTION_BUFFER);
        Self {
            stores: RwLock::new(HashMap::new()),
            changes,
        }
    }

    fn publish(&self, store: &StoreHandle, id: Uuid) {
        // No receivers just means nobody is subscribed yet.
        let _ = self.changes.send((store.clone(), id));
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn subscribe(&self, scope: &StoreScope) -> Result<Subscription, StoreError> {
        let mut changes = self.changes.subscribe();
        let existing: Vec<StoreHandle> = self.stores.read().await.keys().cloned().collect();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut filter = ScopeFilter::new(scope.clone());

        tokio::spawn(async move {
            for store in existing {
                if let Some(event) = filter.open(store) {
                    if tx.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
            }

            loop {
                match changes.recv().await {
                    Ok((store, id)) => {
                        for event in filter.route(store, vec![id]) {
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Subscriber lagged behind store changes");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(Subscription::new(rx))
    }

    async fn read_all(&self, store: &StoreHandle) -> Result<Vec<ScanRecord>, StoreError> {
        let stores = self.stores.read().await;
        Ok(stores.get(store).cloned().unwrap_or_default())
    }

    async fn first_uploading(&self, store: &StoreHandle) -> Result<Option<ScanRecord>, StoreError> {
        let stores = self.stores.read().await;
        Ok(stores.get(store).and_then(|records| {
            records
                .iter()
                .find(|r| r.status == ScanStatus::Uploading)
                .cloned()
        }))
    }

    async fn get(&self, store: &StoreHandle, id: Uuid) -> Result<Option<ScanRecord>, StoreError> {
        let stores = self.stores.read().await;
        Ok(stores
            .get(store)
            .and_then(|records| records.iter().find(|r| r.id == id).cloned()))
    }

    async fn insert(&self, store: &StoreHandle, record: ScanRecord) -> Result<ScanRecord, StoreError> {
        check_new_upload(&record)?;
        {
            let mut stores = self.stores.write().await;
            let records = stores.entry(store.clone()).or_default();
            if records.iter().any(|r| r.id == record.id) {
                return Err(StoreError::Rejected(format!(
                    "scan record {} already exists",
                    record.id
                )));
            }
            records.push(record.clone());
        }
        self.publish(store, record.id);
        Ok(record)
    }

    async fn transact(
        &self,
        store: &StoreHandle,
        id: Uuid,
        mutation: Mutation,
    ) -> Result<ScanRecord, StoreError> {
        let committed = {
            let mut stores = self.stores.write().await;
            let slot = stores
                .get_mut(store)
                .and_then(|records| records.iter_mut().find(|r| r.id == id))
                .ok_or_else(|| StoreError::NotFound {
                    store: store.clone(),
                    id,
                })?;

            // Work on a copy so a rejected mutation leaves no trace.
            let mut draft = slot.clone();
            mutation(&mut draft)?;
            draft.updated_at = Utc::now();
            *slot = draft.clone();
            draft
        };
        self.publish(store, id);
        Ok(committed)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
