use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use super::RecordStore;
use crate::error::Result;

/// Keeps the last saved collection in memory. Used for ephemeral fleets and tests.
pub struct InMemoryStore<T> {
    records: RwLock<Vec<T>>,
    saves: AtomicUsize,
}

impl<T> InMemoryStore<T> {
    pub fn new() -> Self {
        Self::with_records(Vec::new())
    }

    pub fn with_records(records: Vec<T>) -> Self {
        Self {
            records: RwLock::new(records),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl<T> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RecordStore<T> for InMemoryStore<T>
where
    T: Clone + Send + Sync,
{
    fn load(&self) -> Result<Vec<T>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.clone())
    }

    fn save(&self, records: &[T]) -> Result<()> {
        let mut stored = self.records.write().unwrap_or_else(|e| e.into_inner());
        *stored = records.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_replaces_collection() {
        let store = InMemoryStore::with_records(vec![1, 2, 3]);
        assert_eq!(store.load().unwrap(), vec![1, 2, 3]);

        store.save(&[7]).unwrap();
        assert_eq!(store.load().unwrap(), vec![7]);
        assert_eq!(store.save_count(), 1);
    }
}
