use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::marker::PhantomData;
use std::path::PathBuf;

use super::RecordStore;
use crate::error::{FleetError, Result};

/// Stores a collection as a pretty-printed JSON array in a single file.
///
/// Writes go to a sibling `.tmp` file that is renamed over the target.
pub struct JsonFileStore<T> {
    path: PathBuf,
    _records: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _records: PhantomData,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl<T> RecordStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            log::debug!("No store at {}, starting empty", self.path.display());
            return Ok(Vec::new());
        }

        let content =
            fs::read_to_string(&self.path).map_err(|e| FleetError::storage(&self.path, e))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, records: &[T]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| FleetError::storage(parent, e))?;
            }
        }

        let content = serde_json::to_string_pretty(records)?;
        let temp = self.temp_path();
        fs::write(&temp, content).map_err(|e| FleetError::storage(&temp, e))?;
        fs::rename(&temp, &self.path).map_err(|e| FleetError::storage(&self.path, e))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
