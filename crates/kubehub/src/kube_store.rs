//! [`ObjectStore`] over the Kubernetes API.

use async_trait::async_trait;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    Client, Resource,
};
use tracing::debug;

use crate::store::{kind_of, ObjectKey, ObjectStore, StoreError, StoreResult, StoredObject, Versioned};

type ApiFor<K> = fn(Client, Option<&str>) -> Api<K>;

/// Kube-backed store for one kind. Every call goes to the API server; nothing is cached.
pub struct KubeStore<K> {
    client: Client,
    api_for: ApiFor<K>,
}

fn namespaced_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

fn cluster_api<K>(client: Client, _namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = ClusterResourceScope, DynamicType = ()>,
{
    Api::all(client)
}

impl<K> KubeStore<K>
where
    K: StoredObject + Resource<Scope = NamespaceResourceScope>,
{
    pub fn namespaced(client: Client) -> Self { Self { client, api_for: namespaced_api::<K> } }
}

impl<K> KubeStore<K>
where
    K: StoredObject + Resource<Scope = ClusterResourceScope>,
{
    pub fn cluster(client: Client) -> Self { Self { client, api_for: cluster_api::<K> } }
}

impl<K: StoredObject> KubeStore<K> {
    fn api(&self, namespace: Option<&str>) -> Api<K> { (self.api_for)(self.client.clone(), namespace) }

    fn describe(key: &ObjectKey) -> String { format!("{} {}", kind_of::<K>(), key) }
}

/// Map a kube client error onto the store taxonomy.
pub fn map_kube_error(e: kube::Error, what: &str) -> StoreError {
    match e {
        kube::Error::Api(ae) => match ae.code {
            404 => StoreError::NotFound(what.to_string()),
            409 if ae.reason == "AlreadyExists" => StoreError::AlreadyExists(what.to_string()),
            409 => StoreError::Conflict(format!("{}: {}", what, ae.message)),
            400 | 422 => StoreError::Invalid(format!("{}: {}", what, ae.message)),
            code => StoreError::Unavailable(format!("{}: {} ({})", what, ae.message, code)),
        },
        other => StoreError::Unavailable(format!("{}: {}", what, other)),
    }
}

fn label_selector(labels: &[(&str, &str)]) -> String {
    labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",")
}

#[async_trait]
impl<K: StoredObject> ObjectStore<K> for KubeStore<K> {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<Versioned<K>>> {
        debug!(kind = %kind_of::<K>(), key = %key, "store: get");
        self.api(key.namespace.as_deref())
            .get_opt(&key.name)
            .await
            .map(|o| o.map(Versioned::new))
            .map_err(|e| map_kube_error(e, &Self::describe(key)))
    }

    async fn list(&self, namespace: Option<&str>, labels: &[(&str, &str)]) -> StoreResult<Vec<Versioned<K>>> {
        let selector = label_selector(labels);
        debug!(kind = %kind_of::<K>(), ns = ?namespace, selector = %selector, "store: list");
        let mut lp = ListParams::default();
        if !selector.is_empty() {
            lp = lp.labels(&selector);
        }
        let list = self
            .api(namespace)
            .list(&lp)
            .await
            .map_err(|e| map_kube_error(e, &format!("{} list ({})", kind_of::<K>(), selector)))?;
        Ok(list.items.into_iter().map(Versioned::new).collect())
    }

    async fn create(&self, key: &ObjectKey, object: &K) -> StoreResult<Versioned<K>> {
        debug!(kind = %kind_of::<K>(), key = %key, "store: create");
        let mut obj = object.clone();
        let meta = obj.meta_mut();
        meta.name = Some(key.name.clone());
        meta.namespace = key.namespace.clone();
        meta.resource_version = None;
        self.api(key.namespace.as_deref())
            .create(&PostParams::default(), &obj)
            .await
            .map(Versioned::new)
            .map_err(|e| map_kube_error(e, &Self::describe(key)))
    }

    async fn replace(&self, key: &ObjectKey, object: &K, version: &str) -> StoreResult<Versioned<K>> {
        debug!(kind = %kind_of::<K>(), key = %key, version = %version, "store: replace");
        let mut obj = object.clone();
        obj.meta_mut().resource_version = Some(version.to_string());
        self.api(key.namespace.as_deref())
            .replace(&key.name, &PostParams::default(), &obj)
            .await
            .map(Versioned::new)
            .map_err(|e| map_kube_error(e, &Self::describe(key)))
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<bool> {
        debug!(kind = %kind_of::<K>(), key = %key, "store: delete");
        match self.api(key.namespace.as_deref()).delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(map_kube_error(e, &Self::describe(key))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse { status: "Failure".into(), message: "boom".into(), reason: reason.into(), code })
    }

    #[test]
    fn maps_status_codes() {
        assert_eq!(map_kube_error(api_err(404, "NotFound"), "x"), StoreError::NotFound("x".into()));
        assert_eq!(map_kube_error(api_err(409, "AlreadyExists"), "x"), StoreError::AlreadyExists("x".into()));
        assert!(matches!(map_kube_error(api_err(409, "Conflict"), "x"), StoreError::Conflict(_)));
        assert!(matches!(map_kube_error(api_err(422, "Invalid"), "x"), StoreError::Invalid(_)));
        assert!(matches!(map_kube_error(api_err(503, "ServiceUnavailable"), "x"), StoreError::Unavailable(_)));
        assert!(matches!(map_kube_error(api_err(403, "Forbidden"), "x"), StoreError::Unavailable(_)));
    }

    #[test]
    fn selector_is_comma_joined() {
        assert_eq!(label_selector(&[("a", "1"), ("b", "2")]), "a=1,b=2");
        assert_eq!(label_selector(&[]), "");
    }
}
