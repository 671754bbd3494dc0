//! Record store gateway.
//!
//! The pipeline treats the synchronized store as a collaborator that offers
//! change subscriptions scoped to a set of store paths, transactional
//! read-modify-write of single records, and durable writes visible to every
//! connected client. [`PgRecordStore`] backs it with PostgreSQL
//! `LISTEN/NOTIFY`; [`MemoryRecordStore`] keeps everything in process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::scan::{ScanRecord, ScanStatus};

pub mod memory;
pub mod postgres;
pub mod scope;

pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;
pub use scope::StoreScope;

/// Buffered change events per subscription before the producer side waits.
pub(crate) const SUBSCRIPTION_BUFFER: usize = 256;

/// Path identifying one store, e.g. `/alice/scanner`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreHandle(String);

impl StoreHandle {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A matching store was seen for the first time by this subscription.
    StoreOpened,
    /// Records in the store were inserted or updated.
    RecordsChanged,
}

/// Notification that something changed in one store. Consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub store: StoreHandle,
    pub kind: ChangeKind,
    pub record_ids: Vec<Uuid>,
}

/// Mutation run against a locked record inside a store transaction.
///
/// Returning an error aborts the transaction and nothing is applied.
pub type Mutation = Box<dyn FnOnce(&mut ScanRecord) -> Result<(), StoreError> + Send>;

/// Gateway to a synchronized, transactional scan record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Subscribe to changes in every store matched by `scope`.
    ///
    /// A connection failure is delivered as an error item and ends the
    /// subscription. It is not retried.
    async fn subscribe(&self, scope: &StoreScope) -> Result<Subscription, StoreError>;

    /// All scan records of a store, in insertion order.
    async fn read_all(&self, store: &StoreHandle) -> Result<Vec<ScanRecord>, StoreError>;

    /// Oldest record still in `Uploading`, if any.
    async fn first_uploading(&self, store: &StoreHandle) -> Result<Option<ScanRecord>, StoreError>;

    async fn get(&self, store: &StoreHandle, id: Uuid) -> Result<Option<ScanRecord>, StoreError>;

    /// Insert a freshly uploaded record on behalf of a producer.
    async fn insert(&self, store: &StoreHandle, record: ScanRecord) -> Result<ScanRecord, StoreError>;

    /// Apply `mutation` atomically to one record and return the committed state.
    async fn transact(
        &self,
        store: &StoreHandle,
        id: Uuid,
        mutation: Mutation,
    ) -> Result<ScanRecord, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Stream of change events produced by [`RecordStore::subscribe`].
pub struct Subscription {
    events: mpsc::Receiver<Result<ChangeEvent, StoreError>>,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<Result<ChangeEvent, StoreError>>) -> Self {
        Self { events }
    }

    /// Next event, or `None` once the store side has gone away.
    pub async fn next(&mut self) -> Option<Result<ChangeEvent, StoreError>> {
        self.events.recv().await
    }
}

/// Producers may only create records in the initial state.
pub(crate) fn check_new_upload(record: &ScanRecord) -> Result<(), StoreError> {
    if record.status != ScanStatus::Uploading {
        return Err(StoreError::Rejected(format!(
            "new scans must start as {}, got {}",
            ScanStatus::Uploading,
            record.status
        )));
    }
    if record.has_any_result() {
        return Err(StoreError::Rejected(
            "producers must not write result fields".to_string(),
        ));
    }
    Ok(())
}

/// Turns raw (store, ids) changes into scoped [`ChangeEvent`]s for one
/// subscription, emitting `StoreOpened` the first time a store shows up.
pub(crate) struct ScopeFilter {
    scope: StoreScope,
    opened: HashSet<StoreHandle>,
}

impl ScopeFilter {
    pub(crate) fn new(scope: StoreScope) -> Self {
        Self {
            scope,
            opened: HashSet::new(),
        }
    }

    pub(crate) fn open(&mut self, store: StoreHandle) -> Option<ChangeEvent> {
        if !self.scope.matches(&store) || self.opened.contains(&store) {
            return None;
        }
        tracing::info!(store = %store, "New store in scope");
        self.opened.insert(store.clone());
        Some(ChangeEvent {
            store,
            kind: ChangeKind::StoreOpened,
            record_ids: Vec::new(),
        })
    }

    pub(crate) fn route(&mut self, store: StoreHandle, record_ids: Vec<Uuid>) -> Vec<ChangeEvent> {
        if !self.scope.matches(&store) {
            return Vec::new();
        }
        let mut events = Vec::with_capacity(2);
        events.extend(self.open(store.clone()));
        events.push(ChangeEvent {
            store,
            kind: ChangeKind::RecordsChanged,
            record_ids,
        });
        events
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Scan record {id} not found in {store}")]
    NotFound { store: StoreHandle, id: Uuid },

    #[error("Mutation rejected: {0}")]
    Rejected(String),

    #[error("Invalid store pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("Change subscription lost its connection")]
    SubscriptionClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_filter_opens_each_store_once() {
        let scope = StoreScope::parse("/*/scanner").unwrap();
        let mut filter = ScopeFilter::new(scope);
        let id = Uuid::new_v4();

        let first = filter.route(StoreHandle::new("/alice/scanner"), vec![id]);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].kind, ChangeKind::StoreOpened);
        assert_eq!(first[1].kind, ChangeKind::RecordsChanged);
        assert_eq!(first[1].record_ids, vec![id]);

        let second = filter.route(StoreHandle::new("/alice/scanner"), vec![id]);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].kind, ChangeKind::RecordsChanged);
    }

    #[test]
    fn test_scope_filter_drops_out_of_scope_stores() {
        let mut filter = ScopeFilter::new(StoreScope::parse("/*/scanner").unwrap());
        assert!(filter.route(StoreHandle::new("/alice/notes"), vec![]).is_empty());
        assert!(filter.open(StoreHandle::new("/alice/notes")).is_none());
    }

    #[test]
    fn test_new_upload_must_be_pristine() {
        let record = ScanRecord::new_upload(vec![1]);
        assert!(check_new_upload(&record).is_ok());

        let mut processing = record.clone();
        processing.status = ScanStatus::Processing;
        assert!(matches!(check_new_upload(&processing), Err(StoreError::Rejected(_))));

        let mut prefilled = record;
        prefilled.text_scan_result = Some("sneaky".to_string());
        assert!(matches!(check_new_upload(&prefilled), Err(StoreError::Rejected(_))));
    }
}
