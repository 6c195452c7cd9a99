use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("Failed to access preferences file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse preferences: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Flat key-value store persisted as a single JSON object. Every write is
/// flushed to disk so separate stores can share nothing but the filesystem.
#[derive(Debug)]
pub struct Preferences {
    path: Option<PathBuf>,
    values: Mutex<BTreeMap<String, Value>>,
}

impl Preferences {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, PrefsError> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: Some(path),
            values: Mutex::new(values),
        })
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, values: &BTreeMap<String, Value>) -> Result<(), PrefsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(values)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values().get(key).cloned()
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.values().get(key).and_then(Value::as_str).map(str::to_string)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values().get(key).and_then(Value::as_bool)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values().get(key).and_then(Value::as_i64)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values().contains_key(key)
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), PrefsError> {
        let mut values = self.values();
        values.insert(key.to_string(), value.into());
        self.persist(&values)
    }

    /// Applies several writes and removals with a single flush.
    pub fn edit(&self, writes: Vec<(String, Option<Value>)>) -> Result<(), PrefsError> {
        let mut values = self.values();
        for (key, value) in writes {
            match value {
                Some(value) => {
                    values.insert(key, value);
                }
                None => {
                    values.remove(&key);
                }
            }
        }
        self.persist(&values)
    }

    pub fn remove(&self, key: &str) -> Result<(), PrefsError> {
        let mut values = self.values();
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.values()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear(&self) -> Result<(), PrefsError> {
        let mut values = self.values();
        values.clear();
        self.persist(&values)
    }
}
