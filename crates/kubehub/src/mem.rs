//! In-memory [`ObjectStore`] with the same versioning rules as the API server.
//! Used by tests and offline dry runs; counts writes and can inject faults.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::store::{kind_of, ObjectKey, ObjectStore, StoreError, StoreResult, StoredObject, Versioned};

struct Inner<K> {
    objects: BTreeMap<ObjectKey, K>,
    version: u64,
    writes: u64,
    pending_conflicts: u32,
    unavailable: bool,
}

pub struct MemStore<K> {
    inner: Mutex<Inner<K>>,
}

impl<K: StoredObject> Default for MemStore<K> {
    fn default() -> Self { Self::new() }
}

impl<K: StoredObject> MemStore<K> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                objects: BTreeMap::new(),
                version: 0,
                writes: 0,
                pending_conflicts: 0,
                unavailable: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K>> { self.inner.lock().unwrap_or_else(PoisonError::into_inner) }

    /// Seed an object keyed by its own metadata. Not counted as a write.
    pub fn insert(&self, mut object: K) -> Versioned<K> {
        let mut inner = self.lock();
        inner.version += 1;
        object.meta_mut().resource_version = Some(inner.version.to_string());
        inner.objects.insert(ObjectKey::of(&object), object.clone());
        Versioned::new(object)
    }

    /// Current object at `key`, bypassing fault injection.
    pub fn object(&self, key: &ObjectKey) -> Option<K> { self.lock().objects.get(key).cloned() }

    pub fn len(&self) -> usize { self.lock().objects.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Successful create/replace/delete calls so far.
    pub fn writes(&self) -> u64 { self.lock().writes }

    /// Make the next `n` replace calls fail as if another writer got there first.
    /// Each injected conflict also bumps the stored version.
    pub fn inject_conflicts(&self, n: u32) { self.lock().pending_conflicts = n; }

    /// Fail every call with `Unavailable` until reset.
    pub fn set_unavailable(&self, on: bool) { self.lock().unavailable = on; }

    fn check_available(inner: &Inner<K>) -> StoreResult<()> {
        if inner.unavailable {
            return Err(StoreError::Unavailable(format!("{} store unreachable", kind_of::<K>())));
        }
        Ok(())
    }

    fn describe(key: &ObjectKey) -> String { format!("{} {}", kind_of::<K>(), key) }
}

fn labels_match<K: StoredObject>(obj: &K, labels: &[(&str, &str)]) -> bool {
    let have = obj.meta().labels.as_ref();
    labels.iter().all(|(k, v)| have.and_then(|m| m.get(*k)).map(|x| x == v).unwrap_or(false))
}

#[async_trait]
impl<K: StoredObject> ObjectStore<K> for MemStore<K> {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<Versioned<K>>> {
        let inner = self.lock();
        Self::check_available(&inner)?;
        Ok(inner.objects.get(key).cloned().map(Versioned::new))
    }

    async fn list(&self, namespace: Option<&str>, labels: &[(&str, &str)]) -> StoreResult<Vec<Versioned<K>>> {
        let inner = self.lock();
        Self::check_available(&inner)?;
        Ok(inner
            .objects
            .iter()
            .filter(|(k, _)| namespace.is_none() || k.namespace.as_deref() == namespace)
            .filter(|(_, o)| labels_match(*o, labels))
            .map(|(_, o)| Versioned::new(o.clone()))
            .collect())
    }

    async fn create(&self, key: &ObjectKey, object: &K) -> StoreResult<Versioned<K>> {
        let mut inner = self.lock();
        Self::check_available(&inner)?;
        if inner.objects.contains_key(key) {
            return Err(StoreError::AlreadyExists(Self::describe(key)));
        }
        inner.version += 1;
        let mut obj = object.clone();
        let meta = obj.meta_mut();
        meta.name = Some(key.name.clone());
        meta.namespace = key.namespace.clone();
        meta.resource_version = Some(inner.version.to_string());
        inner.objects.insert(key.clone(), obj.clone());
        inner.writes += 1;
        Ok(Versioned::new(obj))
    }

    async fn replace(&self, key: &ObjectKey, object: &K, version: &str) -> StoreResult<Versioned<K>> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        Self::check_available(inner)?;
        let next = inner.version + 1;
        let current = match inner.objects.get_mut(key) {
            Some(o) => o,
            None => return Err(StoreError::NotFound(Self::describe(key))),
        };
        if inner.pending_conflicts > 0 {
            inner.pending_conflicts -= 1;
            current.meta_mut().resource_version = Some(next.to_string());
            inner.version = next;
            return Err(StoreError::Conflict(format!("{}: injected concurrent write", Self::describe(key))));
        }
        let stored = current.meta().resource_version.clone().unwrap_or_default();
        if stored != version {
            return Err(StoreError::Conflict(format!(
                "{}: version {} is stale (current {})",
                Self::describe(key),
                version,
                stored
            )));
        }
        let mut obj = object.clone();
        obj.meta_mut().resource_version = Some(next.to_string());
        *current = obj.clone();
        inner.version = next;
        inner.writes += 1;
        Ok(Versioned::new(obj))
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<bool> {
        let mut inner = self.lock();
        Self::check_available(&inner)?;
        let removed = inner.objects.remove(key).is_some();
        if removed {
            inner.writes += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn cm(ns: &str, name: &str, labels: &[(&str, &str)]) -> ConfigMap {
        let labels: BTreeMap<String, String> = labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ConfigMap {
            metadata: ObjectMeta { name: Some(name.into()), namespace: Some(ns.into()), labels: Some(labels), ..Default::default() },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn replace_checks_version() {
        let store = MemStore::<ConfigMap>::new();
        let key = ObjectKey::namespaced("liqo", "a");
        let created = store.create(&key, &cm("liqo", "a", &[])).await.unwrap();
        let updated = store.replace(&key, &created.object, &created.version).await.unwrap();
        assert_ne!(updated.version, created.version);
        // Writing again with the old token must be refused.
        let stale = store.replace(&key, &created.object, &created.version).await.unwrap_err();
        assert!(matches!(stale, StoreError::Conflict(_)));
        assert_eq!(store.writes(), 2);
    }

    #[tokio::test]
    async fn create_refuses_existing_and_delete_reports_absence() {
        let store = MemStore::<ConfigMap>::new();
        let key = ObjectKey::namespaced("liqo", "a");
        store.insert(cm("liqo", "a", &[]));
        assert!(matches!(store.create(&key, &cm("liqo", "a", &[])).await, Err(StoreError::AlreadyExists(_))));
        assert!(store.delete(&key).await.unwrap());
        assert!(!store.delete(&key).await.unwrap());
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn list_filters_namespace_and_labels() {
        let store = MemStore::<ConfigMap>::new();
        store.insert(cm("liqo", "a", &[("app", "x")]));
        store.insert(cm("liqo", "b", &[("app", "y")]));
        store.insert(cm("other", "c", &[("app", "x")]));
        assert_eq!(store.list(Some("liqo"), &[("app", "x")]).await.unwrap().len(), 1);
        assert_eq!(store.list(None, &[("app", "x")]).await.unwrap().len(), 2);
        assert_eq!(store.list(Some("liqo"), &[]).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unavailable_fails_every_call() {
        let store = MemStore::<ConfigMap>::new();
        store.set_unavailable(true);
        let key = ObjectKey::namespaced("liqo", "a");
        assert!(matches!(store.get(&key).await, Err(StoreError::Unavailable(_))));
        assert!(matches!(store.delete(&key).await, Err(StoreError::Unavailable(_))));
    }
}
