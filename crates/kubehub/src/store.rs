//! Store capability: keyed get / labeled list / create / version-checked replace / delete.

use std::fmt;

use async_trait::async_trait;
use kube::Resource;
use peerage_core::PeerageError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Bound shared by every object kind a store can hold.
pub trait StoredObject:
    Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static
{
}

impl<T> StoredObject for T where
    T: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static
{
}

/// Kind name of `K`, for logs and error messages.
pub fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).into_owned()
}

/// Address of one object: `name` for cluster-scoped kinds, `namespace/name` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn cluster(name: impl Into<String>) -> Self { Self { namespace: None, name: name.into() } }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: Some(namespace.into()), name: name.into() }
    }

    /// Key of an object as recorded in its own metadata.
    pub fn of<K: Resource>(obj: &K) -> Self {
        let meta = obj.meta();
        Self { namespace: meta.namespace.clone(), name: meta.name.clone().unwrap_or_default() }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// An object together with the version token it was read at.
#[derive(Debug, Clone)]
pub struct Versioned<K> {
    pub object: K,
    pub version: String,
}

impl<K: Resource> Versioned<K> {
    /// Wrap an object, taking the version from `metadata.resourceVersion`.
    pub fn new(object: K) -> Self {
        let version = object.meta().resource_version.clone().unwrap_or_default();
        Self { object, version }
    }

    pub fn key(&self) -> ObjectKey { ObjectKey::of(&self.object) }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("conflict writing {0}")]
    Conflict(String),
    #[error("rejected: {0}")]
    Invalid(String),
    #[error("{0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for PeerageError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => PeerageError::NotFound(format!("{} not found", m)),
            StoreError::AlreadyExists(m) => PeerageError::Conflict(format!("{} already exists", m)),
            StoreError::Conflict(m) => PeerageError::Conflict(m),
            StoreError::Invalid(m) => PeerageError::InvalidArgument(m),
            StoreError::Unavailable(m) => PeerageError::Unavailable(m),
        }
    }
}

/// Declarative object store for one kind.
///
/// `replace` must reject writes whose `version` is not the current one with
/// [`StoreError::Conflict`]; `create` must reject existing keys with
/// [`StoreError::AlreadyExists`].
#[async_trait]
pub trait ObjectStore<K: StoredObject>: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<Versioned<K>>>;

    /// List objects carrying every `(key, value)` label; `namespace = None` spans all namespaces.
    async fn list(&self, namespace: Option<&str>, labels: &[(&str, &str)]) -> StoreResult<Vec<Versioned<K>>>;

    async fn create(&self, key: &ObjectKey, object: &K) -> StoreResult<Versioned<K>>;

    async fn replace(&self, key: &ObjectKey, object: &K, version: &str) -> StoreResult<Versioned<K>>;

    /// Returns `false` when there was nothing to delete.
    async fn delete(&self, key: &ObjectKey) -> StoreResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    #[test]
    fn key_display_and_origin() {
        assert_eq!(ObjectKey::cluster("milan").to_string(), "milan");
        assert_eq!(ObjectKey::namespaced("liqo", "auth-token").to_string(), "liqo/auth-token");
        let cm = ConfigMap {
            metadata: ObjectMeta { name: Some("id".into()), namespace: Some("liqo".into()), resource_version: Some("7".into()), ..Default::default() },
            ..Default::default()
        };
        let v = Versioned::new(cm);
        assert_eq!(v.version, "7");
        assert_eq!(v.key(), ObjectKey::namespaced("liqo", "id"));
    }

    #[test]
    fn store_errors_map_onto_taxonomy() {
        let e: PeerageError = StoreError::AlreadyExists("ForeignCluster milan".into()).into();
        assert!(matches!(e, PeerageError::Conflict(_)));
        let e: PeerageError = StoreError::Unavailable("connection refused".into()).into();
        assert_eq!(e, PeerageError::Unavailable("connection refused".into()));
        let e: PeerageError = StoreError::Invalid("spec.foo".into()).into();
        assert!(matches!(e, PeerageError::InvalidArgument(_)));
    }
}
