//! Fixture objects for exercising the peering flow against in-memory stores.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMap, Node, NodeAddress, NodeCondition, NodeStatus, Secret, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use peerage_core::consts::{
    APP_NAME_LABEL, AUTH_SERVICE_APP, CLUSTER_ID_CONFIGMAP_APP, CLUSTER_ID_KEY, CLUSTER_ID_LABEL, CLUSTER_NAME_KEY,
    LOCAL_TOKEN_SECRET, TOKEN_DATA_KEY,
};
use peerage_core::{ClusterIdentity, ForeignCluster, ForeignClusterSpec, PeeringEnabled, PeeringType};
use peerage_kubehub::MemStores;

fn labels(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
    Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
}

pub fn identity_config_map(namespace: &str, cluster_id: &str, cluster_name: &str) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert(CLUSTER_ID_KEY.to_string(), cluster_id.to_string());
    if !cluster_name.is_empty() {
        data.insert(CLUSTER_NAME_KEY.to_string(), cluster_name.to_string());
    }
    ConfigMap {
        metadata: ObjectMeta {
            name: Some("clusterid-configmap".into()),
            namespace: Some(namespace.into()),
            labels: labels(&[(APP_NAME_LABEL, CLUSTER_ID_CONFIGMAP_APP)]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

pub fn local_token_secret(namespace: &str, token: &str) -> Secret {
    let mut data = BTreeMap::new();
    data.insert(TOKEN_DATA_KEY.to_string(), ByteString(token.as_bytes().to_vec()));
    Secret {
        metadata: ObjectMeta { name: Some(LOCAL_TOKEN_SECRET.into()), namespace: Some(namespace.into()), ..Default::default() },
        data: Some(data),
        ..Default::default()
    }
}

/// Auth Service with cluster IP `10.96.0.10` and a single port.
pub fn auth_service(namespace: &str, service_type: &str, port: i32, node_port: Option<i32>) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some("liqo-auth".into()),
            namespace: Some(namespace.into()),
            labels: labels(&[(APP_NAME_LABEL, AUTH_SERVICE_APP)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(service_type.into()),
            cluster_ip: Some("10.96.0.10".into()),
            ports: Some(vec![ServicePort { name: Some("https".into()), port, node_port, ..Default::default() }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn node(name: &str, ready: bool, external_ip: Option<&str>, internal_ip: &str) -> Node {
    let mut addresses = vec![NodeAddress { type_: "InternalIP".into(), address: internal_ip.into() }];
    if let Some(ext) = external_ip {
        addresses.push(NodeAddress { type_: "ExternalIP".into(), address: ext.into() });
    }
    Node {
        metadata: ObjectMeta { name: Some(name.into()), ..Default::default() },
        status: Some(NodeStatus {
            addresses: Some(addresses),
            conditions: Some(vec![NodeCondition {
                type_: "Ready".into(),
                status: if ready { "True".into() } else { "False".into() },
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A ForeignCluster managed by some other peering flow.
pub fn foreign_cluster(name: &str, cluster_id: &str, peering_type: PeeringType) -> ForeignCluster {
    let mut fc = ForeignCluster::new(
        name,
        ForeignClusterSpec {
            peering_type,
            cluster_identity: ClusterIdentity::new(cluster_id, name),
            foreign_auth_url: "https://10.0.0.1:443".into(),
            outgoing_peering_enabled: PeeringEnabled::Yes,
            ..Default::default()
        },
    );
    fc.metadata.labels = labels(&[(CLUSTER_ID_LABEL, cluster_id)]);
    fc
}

/// In-memory cluster with an identity, a local token and a NodePort auth Service on `172.19.0.3:30615`.
pub fn seeded_cluster(namespace: &str, cluster_id: &str, cluster_name: &str) -> MemStores {
    let mem = MemStores::new();
    mem.config_maps.insert(identity_config_map(namespace, cluster_id, cluster_name));
    mem.secrets.insert(local_token_secret(namespace, "local-token"));
    mem.services.insert(auth_service(namespace, "NodePort", 443, Some(30615)));
    mem.nodes.insert(node("control-plane", true, None, "172.19.0.3"));
    mem
}
