//! Well-known names, labels and keys shared with the downstream controllers.

/// Namespace used when a declaration does not name one.
pub const DEFAULT_NAMESPACE: &str = "liqo";

/// Label carried by every ForeignCluster and credential Secret: the remote cluster id.
pub const CLUSTER_ID_LABEL: &str = "discovery.liqo.io/cluster-id";
/// Marks a Secret as holding a remote authentication token.
pub const AUTH_TOKEN_LABEL: &str = "discovery.liqo.io/auth-token";

/// Generic app-name label used to locate the identity ConfigMap and auth Service.
pub const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
pub const CLUSTER_ID_CONFIGMAP_APP: &str = "clusterid-configmap";
pub const CLUSTER_ID_KEY: &str = "CLUSTER_ID";
pub const CLUSTER_NAME_KEY: &str = "CLUSTER_NAME";

pub const AUTH_SERVICE_APP: &str = "auth";
pub const OVERRIDE_ADDRESS_ANNOTATION: &str = "liqo.io/override-address";
pub const OVERRIDE_PORT_ANNOTATION: &str = "liqo.io/override-port";

/// Secret holding the local cluster's bearer token.
pub const LOCAL_TOKEN_SECRET: &str = "auth-token";
pub const TOKEN_DATA_KEY: &str = "token";
/// Prefix of the per-remote credential Secret name.
pub const REMOTE_TOKEN_SECRET_PREFIX: &str = "remote-token-";

/// Fixed name of the single NamespaceOffloading object in an offloaded namespace.
pub const NAMESPACE_OFFLOADING_NAME: &str = "offloading";

/// Name of the Secret storing the token received from `cluster_id`.
pub fn remote_token_secret_name(cluster_id: &str) -> String {
    format!("{}{}", REMOTE_TOKEN_SECRET_PREFIX, cluster_id)
}
