use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const CALENDARS: &str = "calendars";
pub const USER_CALENDARS: &str = "user_calendars";
pub const USERS: &str = "users";
pub const MEETINGS: &str = "meetings";
pub const USER_INVITES: &str = "user_invites";
pub const USER_MEETING_INVITES: &str = "user_meeting_invites";
pub const MEETING_CALENDARS: &str = "meeting_calendars";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Request error: {0}")]
    RequestError(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Failed to decode {path}: {source}")]
    DecodeError {
        path: String,
        source: serde_json::Error,
    },
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::HttpError(_) | StoreError::Unavailable(_))
    }
}

/// Paths and values for one multi-location write. `None` deletes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: BTreeMap<String, Option<Value>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, path: impl AsRef<str>, value: impl Into<Value>) -> &mut Self {
        self.writes.insert(normalize_path(path.as_ref()), Some(value.into()));
        self
    }

    pub fn put_serialized<T: Serialize>(&mut self, path: impl AsRef<str>, value: &T) -> Result<&mut Self, StoreError> {
        let value = serde_json::to_value(value)?;
        Ok(self.put(path, value))
    }

    pub fn delete(&mut self, path: impl AsRef<str>) -> &mut Self {
        self.writes.insert(normalize_path(path.as_ref()), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.writes.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// Body of a root-level multi-path PATCH, deletions as JSON null.
    pub fn to_patch_body(&self) -> Value {
        let map: Map<String, Value> = self
            .writes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone().unwrap_or(Value::Null)))
            .collect();
        Value::Object(map)
    }
}

pub fn normalize_path(path: &str) -> String {
    path.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>().join("/")
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    async fn remove(&self, path: &str) -> Result<(), StoreError>;

    /// Applies every write of the batch or none of them.
    async fn update(&self, batch: WriteBatch) -> Result<(), StoreError>;

    async fn find_by_child(
        &self,
        collection: &str,
        child: &str,
        value: &str,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let Some(Value::Object(entries)) = self.get(collection).await? else {
            return Ok(vec![]);
        };
        Ok(entries
            .into_iter()
            .filter(|(_, v)| v.get(child).and_then(Value::as_str) == Some(value))
            .collect())
    }

    fn push_key(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

pub async fn read<T: DeserializeOwned>(store: &dyn DocumentStore, path: &str) -> Result<Option<T>, StoreError> {
    match store.get(path).await? {
        None => Ok(None),
        Some(value) => decode(path, value).map(Some),
    }
}

pub async fn read_keys(store: &dyn DocumentStore, path: &str) -> Result<Vec<String>, StoreError> {
    match store.get(path).await? {
        Some(Value::Object(map)) => Ok(map.into_iter().map(|(k, _)| k).collect()),
        _ => Ok(vec![]),
    }
}

pub async fn read_children<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    path: &str,
) -> Result<BTreeMap<String, T>, StoreError> {
    let Some(Value::Object(map)) = store.get(path).await? else {
        return Ok(BTreeMap::new());
    };

    let mut children = BTreeMap::new();
    for (key, value) in map {
        let child_path = format!("{}/{}", path, key);
        children.insert(key, decode(&child_path, value)?);
    }
    Ok(children)
}

fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|source| StoreError::DecodeError {
        path: path.to_string(),
        source,
    })
}

/// JSON tree held in process. Used when no database URL is configured and
/// as the store behind the remote-layer tests.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    root: RwLock<Value>,
    offline: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Value::Object(Map::new())),
            offline: AtomicBool::new(false),
        }
    }

    /// Makes every call fail as if the network were down.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> Value {
        self.root.read().await.clone()
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn read_at<'a>(node: &'a Value, segs: &[&str]) -> Option<&'a Value> {
    segs.iter()
        .try_fold(node, |n, s| n.get(*s))
        .filter(|v| !v.is_null())
}

fn is_vacant(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn write_at(node: &mut Value, segs: &[&str], value: Option<Value>) {
    let Some((head, rest)) = segs.split_first() else {
        *node = value.unwrap_or_else(|| Value::Object(Map::new()));
        return;
    };

    if !node.is_object() {
        if value.is_none() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };

    if rest.is_empty() {
        match value {
            Some(v) if !v.is_null() => {
                map.insert(head.to_string(), v);
            }
            _ => {
                map.remove(*head);
            }
        }
        return;
    }

    let vacant = {
        let child = map.entry(head.to_string()).or_insert(Value::Null);
        write_at(child, rest, value);
        is_vacant(child)
    };
    if vacant {
        map.remove(*head);
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.check_online()?;
        let root = self.root.read().await;
        Ok(read_at(&root, &segments(path)).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.check_online()?;
        let mut root = self.root.write().await;
        write_at(&mut root, &segments(path), Some(value));
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.check_online()?;
        let mut root = self.root.write().await;
        write_at(&mut root, &segments(path), None);
        Ok(())
    }

    async fn update(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.check_online()?;
        let mut root = self.root.write().await;
        for (path, value) in batch.writes {
            write_at(&mut root, &segments(&path), value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_nested_path() {
        let store = MemoryDocumentStore::new();

        store.set("users/u1", json!({ "email": "a@b.com" })).await.unwrap();

        assert_eq!(store.get("users/u1/email").await.unwrap(), Some(json!("a@b.com")));
        assert_eq!(store.get("/users/u1/").await.unwrap(), Some(json!({ "email": "a@b.com" })));
        assert_eq!(store.get("users/u2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn removing_last_child_prunes_parents() {
        let store = MemoryDocumentStore::new();
        store.set("user_invites/u1/cal1", json!(true)).await.unwrap();

        store.remove("user_invites/u1/cal1").await.unwrap();

        assert_eq!(store.get("user_invites").await.unwrap(), None);
        assert_eq!(store.snapshot().await, json!({}));
    }

    #[tokio::test]
    async fn batch_applies_sets_and_deletes() {
        let store = MemoryDocumentStore::new();
        store.set("a/x", json!(1)).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.delete("a/x").put("b/y", 2).put("b/z", "three");
        store.update(batch).await.unwrap();

        assert_eq!(store.snapshot().await, json!({ "b": { "y": 2, "z": "three" } }));
    }

    #[tokio::test]
    async fn setting_null_deletes() {
        let store = MemoryDocumentStore::new();
        store.set("a/x", json!(1)).await.unwrap();

        store.set("a/x", Value::Null).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn offline_store_fails_transiently() {
        let store = MemoryDocumentStore::new();
        store.set_offline(true);

        let err = store.get("users").await.unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn find_by_child_matches_exact_value() {
        let store = MemoryDocumentStore::new();
        store.set("users/u1", json!({ "email": "a@b.com" })).await.unwrap();
        store.set("users/u2", json!({ "email": "c@d.com" })).await.unwrap();

        let found = store.find_by_child(USERS, "email", "c@d.com").await.unwrap();

        assert_eq!(found, vec![("u2".to_string(), json!({ "email": "c@d.com" }))]);
    }

    #[tokio::test]
    async fn read_reports_decode_errors_with_path() {
        let store = MemoryDocumentStore::new();
        store.set("meetings/m1", json!("not a meeting")).await.unwrap();

        let err = read::<crate::calendar::Meeting>(&store, "meetings/m1").await.unwrap_err();

        assert!(matches!(err, StoreError::DecodeError { ref path, .. } if path == "meetings/m1"));
    }

    #[tokio::test]
    async fn read_keys_lists_children() {
        let store = MemoryDocumentStore::new();
        store.set("user_calendars/u1/a", json!(true)).await.unwrap();
        store.set("user_calendars/u1/b", json!(true)).await.unwrap();

        let mut keys = read_keys(&store, "user_calendars/u1").await.unwrap();
        keys.sort();

        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn patch_body_encodes_deletes_as_null() {
        let mut batch = WriteBatch::new();
        batch.put("/a/b/", 1).delete("c");

        assert_eq!(batch.to_patch_body(), json!({ "a/b": 1, "c": null }));
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn push_keys_are_unique() {
        let store = MemoryDocumentStore::new();

        assert_ne!(store.push_key(), store.push_key());
    }
}
