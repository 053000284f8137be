use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::capabilities::{KeyNamespace, KvError, KvStore, TypedKvStore};
use crate::model::SosEvent;
use crate::MAX_HISTORY_ENTRIES;

const HISTORY_KEY: &str = "sos_history";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("history storage failed: {0}")]
    Storage(#[from] KvError),
}

/// Newest-first list of triggered alerts, capped at `capacity` entries.
///
/// Every append is a read-modify-write of one serialized array. Concurrent
/// appends are not serialized against each other; the controller only ever
/// appends from its event loop.
#[derive(Clone)]
pub struct EventLog {
    store: TypedKvStore<Vec<SosEvent>>,
    capacity: usize,
}

impl EventLog {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self::with_capacity(kv, MAX_HISTORY_ENTRIES)
    }

    pub fn with_capacity(kv: Arc<dyn KvStore>, capacity: usize) -> Self {
        Self {
            store: TypedKvStore::new(kv, KeyNamespace::History),
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[instrument(skip_all, fields(owner = %event.owner_id))]
    pub async fn append(&self, event: SosEvent) -> Result<(), HistoryError> {
        let mut entries = match self.store.load(HISTORY_KEY).await {
            Ok(stored) => stored.unwrap_or_default(),
            Err(KvError::Serialization { message, .. }) => {
                warn!(%message, "unreadable sos history, starting a new list");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        entries.insert(0, event);
        entries.truncate(self.capacity);
        self.store.save(HISTORY_KEY, &entries).await?;
        debug!(entries = entries.len(), "sos event recorded");
        Ok(())
    }

    /// Stored entries, newest first.
    pub async fn recent(&self) -> Result<Vec<SosEvent>, HistoryError> {
        Ok(self.store.load(HISTORY_KEY).await?.unwrap_or_default())
    }

    pub async fn clear(&self) -> Result<(), HistoryError> {
        self.store.remove(HISTORY_KEY).await?;
        Ok(())
    }
}
