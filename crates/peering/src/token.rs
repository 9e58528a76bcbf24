//! Token Exchange: upsert the token received from a remote cluster.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use peerage_core::consts::{remote_token_secret_name, AUTH_TOKEN_LABEL, CLUSTER_ID_LABEL, TOKEN_DATA_KEY};
use peerage_core::{PeerageError, PeerageResult};
use peerage_kubehub::{create_or_update, ObjectKey, ObjectStore, Outcome, RetryPolicy};
use tracing::info;

/// Create `remote-token-<id>` in `namespace` or overwrite its token. Labels are re-asserted on every write.
pub async fn store(
    secrets: &dyn ObjectStore<Secret>,
    remote_cluster_id: &str,
    remote_token: &str,
    namespace: &str,
    retry: &RetryPolicy,
) -> PeerageResult<Outcome> {
    let t0 = std::time::Instant::now();
    let key = ObjectKey::namespaced(namespace, remote_token_secret_name(remote_cluster_id));
    let seed = || Secret { metadata: ObjectMeta::default(), ..Default::default() };
    let merge = |s: &mut Secret| -> PeerageResult<()> {
        let labels = s.metadata.labels.get_or_insert_with(BTreeMap::new);
        labels.insert(CLUSTER_ID_LABEL.to_string(), remote_cluster_id.to_string());
        labels.insert(AUTH_TOKEN_LABEL.to_string(), "true".to_string());
        s.data.get_or_insert_with(BTreeMap::new).insert(TOKEN_DATA_KEY.to_string(), ByteString(remote_token.as_bytes().to_vec()));
        Ok(())
    };
    let res = create_or_update(secrets, &key, seed, merge, retry)
        .await
        .map_err(|e: PeerageError| e.context(format!("storing token for {}", remote_cluster_id)))?;
    info!(secret = %key, outcome = res.outcome.as_str(), took_ms = %t0.elapsed().as_millis(), "token: stored");
    Ok(res.outcome)
}
