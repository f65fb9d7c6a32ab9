use std::sync::Arc;

use crate::error::Result;

/// Whole-collection persistence for registry and scheduler records.
///
/// Every save replaces the stored collection, so implementations only need
/// to make a single save atomic.
pub trait RecordStore<T>: Send + Sync {
    fn load(&self) -> Result<Vec<T>>;
    fn save(&self, records: &[T]) -> Result<()>;
    fn describe(&self) -> String;
}

impl<T, S> RecordStore<T> for Arc<S>
where
    S: RecordStore<T> + ?Sized,
{
    fn load(&self) -> Result<Vec<T>> {
        (**self).load()
    }

    fn save(&self, records: &[T]) -> Result<()> {
        (**self).save(records)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
