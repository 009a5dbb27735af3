use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::ResourceExt;
use serde_json::Value;

use super::{ResourceStore, StoreObject};
use crate::util::errors::{Error, Result, StdError};

type Key = (String, String, String);

/// In-process [`ResourceStore`] holding objects as JSON.
///
/// Counts every successful write so tests can assert that a pass over unchanged state is a
/// no-op.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<Key, Value>>,
    writes: AtomicUsize,
}

fn key<K: StoreObject>(namespace: Option<&str>, name: &str) -> Key {
    (K::kind(&()).to_string(), namespace.unwrap_or_default().to_string(), name.to_string())
}

fn object_key<K: StoreObject>(obj: &K) -> Result<Key> {
    let name = obj
        .meta()
        .name
        .as_deref()
        .ok_or_else(|| Error::StdError(StdError::MetadataMissing(format!("{} without a name", K::kind(&())))))?;
    Ok(key::<K>(obj.namespace().as_deref(), name))
}

/// The error the API server returns for `code`, so callers see the same error class as with
/// [`super::KubeStore`].
fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::StdError(StdError::KubeError(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    })))
}

fn not_found<K: StoreObject>(name: &str) -> Error {
    api_error(404, "NotFound", format!("{} \"{name}\" not found", K::kind(&())))
}

fn labels_match(value: &Value, labels: &BTreeMap<String, String>) -> bool {
    let actual = value.pointer("/metadata/labels");
    labels
        .iter()
        .all(|(k, v)| actual.and_then(|l| l.get(k)).and_then(Value::as_str) == Some(v.as_str()))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful create/apply/delete/status writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Stores an object without counting it as a write.
    pub fn insert<K: StoreObject>(&self, obj: &K) -> Result<()> {
        let key = object_key(obj)?;
        let value = serde_json::to_value(obj)?;
        self.lock()?.insert(key, value);
        Ok(())
    }

    /// Replaces the status of a stored object, as the workload controllers would.
    pub fn set_status<K: StoreObject>(&self, namespace: Option<&str>, name: &str, status: Value) -> Result<()> {
        let mut objects = self.lock()?;
        let obj = objects
            .get_mut(&key::<K>(namespace, name))
            .ok_or_else(|| not_found::<K>(name))?;
        obj["status"] = status;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<Key, Value>>> {
        self.objects
            .lock()
            .map_err(|_| Error::StdError(StdError::InvalidArgument("memory store lock poisoned".to_string())))
    }

    fn written(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        let objects = self.lock()?;
        match objects.get(&key::<K>(namespace, name)) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        let objects = self.lock()?;
        objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && namespace.map_or(true, |n| n == ns))
            .filter(|(_, value)| labels_match(value, labels))
            .map(|(_, value)| serde_json::from_value(value.clone()).map_err(Error::from))
            .collect()
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let key = object_key(obj)?;
        let mut objects = self.lock()?;
        if objects.contains_key(&key) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} \"{}\" already exists", key.0, key.2),
            ));
        }
        objects.insert(key, serde_json::to_value(obj)?);
        self.written();
        Ok(obj.clone())
    }

    async fn apply<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let key = object_key(obj)?;
        let mut value = serde_json::to_value(obj)?;
        let mut objects = self.lock()?;
        // the status sub-resource is never touched by an apply of the main resource
        if let Some(status) = objects.get(&key).and_then(|existing| existing.get("status")).cloned() {
            value["status"] = status;
        } else if let Some(map) = value.as_object_mut() {
            map.remove("status");
        }
        let applied = serde_json::from_value(value.clone())?;
        objects.insert(key, value);
        self.written();
        Ok(applied)
    }

    async fn delete<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<()> {
        if self.lock()?.remove(&key::<K>(namespace, name)).is_some() {
            self.written();
        }
        Ok(())
    }

    async fn patch_status<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
        status: Value,
    ) -> Result<()> {
        let mut objects = self.lock()?;
        let obj = objects
            .get_mut(&key::<K>(namespace, name))
            .ok_or_else(|| not_found::<K>(name))?;
        obj["status"] = status;
        self.written();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use serde_json::json;

    fn cm(name: &str, ns: &str, component: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                labels: Some(BTreeMap::from([("component".to_string(), component.to_string())])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn lists_by_label_and_namespace() {
        let store = MemoryStore::new();
        store.create(&cm("a", "one", "dn")).await.unwrap();
        store.create(&cm("b", "one", "cn")).await.unwrap();
        store.create(&cm("c", "two", "dn")).await.unwrap();

        let dn = BTreeMap::from([("component".to_string(), "dn".to_string())]);
        let all: Vec<ConfigMap> = store.list(None, &dn).await.unwrap();
        let one: Vec<ConfigMap> = store.list(Some("one"), &dn).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].name_any(), "a");
    }

    #[tokio::test]
    async fn counts_writes_only() {
        let store = MemoryStore::new();
        store.insert(&cm("seed", "ns", "dn")).unwrap();
        assert_eq!(store.writes(), 0);

        store.create(&cm("a", "ns", "dn")).await.unwrap();
        let _: Option<ConfigMap> = store.get(Some("ns"), "a").await.unwrap();
        store.delete::<ConfigMap>(Some("ns"), "missing").await.unwrap();
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn create_collision_is_a_retryable_conflict() {
        let store = MemoryStore::new();
        store.create(&cm("a", "ns", "dn")).await.unwrap();

        let err = store.create(&cm("a", "ns", "dn")).await.unwrap_err();
        assert!(!err.is_terminal());
        assert!(matches!(err.inner(), StdError::KubeError(kube::Error::Api(e)) if e.code == 409));
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn apply_keeps_status() {
        let store = MemoryStore::new();
        store.create(&cm("a", "ns", "dn")).await.unwrap();
        store.set_status::<ConfigMap>(Some("ns"), "a", json!({"ok": true})).unwrap();
        store.apply(&cm("a", "ns", "cn")).await.unwrap();

        let objects = store.lock().unwrap();
        let stored = &objects[&key::<ConfigMap>(Some("ns"), "a")];
        assert_eq!(stored["status"], json!({"ok": true}));
        assert_eq!(stored["metadata"]["labels"]["component"], json!("cn"));
    }
}
