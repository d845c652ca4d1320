use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::MetadataPersistency;
use crate::execution::ExecutionMetadata;

/// Process-local store, used for dry runs and tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryMetadataStore {
    executions: Arc<Mutex<BTreeMap<u32, ExecutionMetadata>>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with already-archived executions.
    pub fn with_executions(executions: impl IntoIterator<Item = ExecutionMetadata>) -> Self {
        let map = executions.into_iter().map(|e| (e.id, e)).collect();
        Self {
            executions: Arc::new(Mutex::new(map)),
        }
    }
}

impl MetadataPersistency for MemoryMetadataStore {
    fn add(&self, execution: &ExecutionMetadata) -> Result<()> {
        let mut executions = self
            .executions
            .lock()
            .map_err(|_| anyhow!("metadata store lock poisoned"))?;
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<ExecutionMetadata>> {
        let executions = self
            .executions
            .lock()
            .map_err(|_| anyhow!("metadata store lock poisoned"))?;
        Ok(executions.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_list() {
        let store = MemoryMetadataStore::new();
        store.add(&ExecutionMetadata::new(9, "2020/01/01", false)).unwrap();
        store.add(&ExecutionMetadata::new(2, "2020/01/02", false)).unwrap();

        let ids: Vec<u32> = store.get_all().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 9]);
    }

    #[test]
    fn test_concurrent_adds() {
        let store = MemoryMetadataStore::new();
        let handles: Vec<_> = (0..16)
            .map(|id| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.add(&ExecutionMetadata::new(id, "2020/01/01", false)).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get_all().unwrap().len(), 16);
    }
}
