//! Identity Resolver: the local cluster identity published in a namespace.

use k8s_openapi::api::core::v1::ConfigMap;
use peerage_core::consts::{APP_NAME_LABEL, CLUSTER_ID_CONFIGMAP_APP, CLUSTER_ID_KEY, CLUSTER_NAME_KEY};
use peerage_core::{ClusterIdentity, PeerageError, PeerageResult};
use peerage_kubehub::ObjectStore;
use tracing::debug;

/// Read the identity ConfigMap of `namespace`. The name is returned as stored;
/// callers apply [`ClusterIdentity::display_name`] when presenting it.
pub async fn resolve(config_maps: &dyn ObjectStore<ConfigMap>, namespace: &str) -> PeerageResult<ClusterIdentity> {
    let what = format!("cluster identity in namespace {}", namespace);
    let found = config_maps
        .list(Some(namespace), &[(APP_NAME_LABEL, CLUSTER_ID_CONFIGMAP_APP)])
        .await
        .map_err(|e| PeerageError::from(e).context(&what))?;
    let cm = match found.as_slice() {
        [] => return Err(PeerageError::not_found(format!("{}: no ConfigMap labeled {}={}", what, APP_NAME_LABEL, CLUSTER_ID_CONFIGMAP_APP))),
        [one] => &one.object,
        many => {
            return Err(PeerageError::precondition(format!("{}: {} ConfigMaps labeled {}={}, expected one", what, many.len(), APP_NAME_LABEL, CLUSTER_ID_CONFIGMAP_APP)))
        }
    };
    let data = cm.data.as_ref();
    let field = |k: &str| data.and_then(|d| d.get(k)).map(|s| s.trim().to_string()).unwrap_or_default();
    let cluster_id = field(CLUSTER_ID_KEY);
    if cluster_id.is_empty() {
        return Err(PeerageError::not_found(format!("{}: {} is not set", what, CLUSTER_ID_KEY)));
    }
    let identity = ClusterIdentity::new(cluster_id, field(CLUSTER_NAME_KEY));
    debug!(ns = %namespace, cluster_id = %identity.cluster_id, "identity: resolved");
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::identity_config_map;
    use peerage_kubehub::MemStore;

    #[tokio::test]
    async fn resolves_single_identity() {
        let store = MemStore::<ConfigMap>::new();
        store.insert(identity_config_map("liqo", "local-id", ""));
        let id = resolve(&store, "liqo").await.unwrap();
        assert_eq!(id.cluster_id, "local-id");
        assert_eq!(id.cluster_name, "");
        assert_eq!(id.display_name(), "local-id");
    }

    #[tokio::test]
    async fn missing_identity_is_not_found() {
        let store = MemStore::<ConfigMap>::new();
        store.insert(identity_config_map("other", "x", "rome"));
        assert!(matches!(resolve(&store, "liqo").await, Err(PeerageError::NotFound(_))));
    }

    #[tokio::test]
    async fn ambiguous_identity_is_refused() {
        let store = MemStore::<ConfigMap>::new();
        let mut second = identity_config_map("liqo", "y", "");
        second.metadata.name = Some("clusterid-2".into());
        store.insert(identity_config_map("liqo", "x", ""));
        store.insert(second);
        assert!(matches!(resolve(&store, "liqo").await, Err(PeerageError::FailedPrecondition(_))));
    }

    #[tokio::test]
    async fn unreachable_store_is_unavailable() {
        let store = MemStore::<ConfigMap>::new();
        store.set_unavailable(true);
        assert!(matches!(resolve(&store, "liqo").await, Err(PeerageError::Unavailable(_))));
    }
}
