use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;

use super::{SwapRecord, SwapStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("swap already exists: {0}")]
    AlreadyExists(String),

    #[error("swap not found: {0}")]
    NotFound(String),

    #[error("illegal status transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: SwapStatus,
        to: SwapStatus,
    },
}

/// Keyed store of swap records. Mutations of a single record are serialized;
/// distinct records may be mutated in parallel. `update` is the only
/// mutation path and rejects status changes that are not DAG edges, so
/// readers never observe a regression.
pub trait SwapStore: Send + Sync + 'static {
    fn put(&self, record: SwapRecord) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<SwapRecord, StoreError>;

    fn update<F>(&self, id: &str, mutate: F) -> Result<SwapRecord, StoreError>
    where
        F: FnOnce(&mut SwapRecord),
        Self: Sized;

    /// Non-blocking snapshot of every record currently in one of `states`.
    fn list_in_state(&self, states: &[SwapStatus]) -> Vec<SwapRecord>;
}

/// In-memory store: a map of per-record locks behind a map lock. The map
/// lock is held only to look up or insert entries, never across a record
/// mutation.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Arc<Mutex<SwapRecord>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: &str) -> Result<Arc<Mutex<SwapRecord>>, StoreError> {
        self.records
            .read()
            .expect("store map lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

impl SwapStore for MemoryStore {
    fn put(&self, record: SwapRecord) -> Result<(), StoreError> {
        let mut map = self.records.write().expect("store map lock poisoned");
        if map.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        map.insert(record.id.clone(), Arc::new(Mutex::new(record)));
        Ok(())
    }

    fn get(&self, id: &str) -> Result<SwapRecord, StoreError> {
        let entry = self.entry(id)?;
        let record = entry.lock().expect("swap record lock poisoned");
        Ok(record.clone())
    }

    fn update<F>(&self, id: &str, mutate: F) -> Result<SwapRecord, StoreError>
    where
        F: FnOnce(&mut SwapRecord),
    {
        let entry = self.entry(id)?;
        let mut record = entry.lock().expect("swap record lock poisoned");

        let before = record.clone();
        mutate(&mut record);

        let from = before.status;
        let to = record.status;
        if from != to && !from.can_transition_to(to) {
            *record = before;
            return Err(StoreError::IllegalTransition {
                id: id.to_string(),
                from,
                to,
            });
        }
        Ok(record.clone())
    }

    fn list_in_state(&self, states: &[SwapStatus]) -> Vec<SwapRecord> {
        let map = self.records.read().expect("store map lock poisoned");
        map.values()
            .filter_map(|entry| {
                let record = entry.lock().expect("swap record lock poisoned");
                states.contains(&record.status).then(|| record.clone())
            })
            .collect()
    }
}
