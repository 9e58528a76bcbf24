//! Custom resource kinds consumed by the downstream peering and offloading controllers.
//!
//! Only the fields this crate reads or writes are modelled; any other spec
//! field of a ForeignCluster is kept as-is across read-modify-write cycles.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::NodeSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Identity of a cluster as published by its identity ConfigMap.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ClusterIdentity {
    #[serde(rename = "clusterID", default)]
    pub cluster_id: String,
    #[serde(rename = "clusterName", default)]
    pub cluster_name: String,
}

impl ClusterIdentity {
    pub fn new(cluster_id: impl Into<String>, cluster_name: impl Into<String>) -> Self {
        Self { cluster_id: cluster_id.into(), cluster_name: cluster_name.into() }
    }

    /// Name to present to users: the cluster name, or the id when no name was assigned.
    pub fn display_name(&self) -> &str {
        if self.cluster_name.is_empty() { &self.cluster_id } else { &self.cluster_name }
    }
}

/// How the control plane of a peering reaches the remote cluster.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PeeringType {
    #[default]
    Unknown,
    OutOfBand,
    InBand,
}

impl fmt::Display for PeeringType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeeringType::Unknown => "Unknown",
            PeeringType::OutOfBand => "OutOfBand",
            PeeringType::InBand => "InBand",
        };
        f.write_str(s)
    }
}

/// Tri-state switch for one direction of a peering.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PeeringEnabled {
    Yes,
    No,
    #[default]
    Auto,
}

/// ForeignCluster describes the relationship with one remote cluster.
///
/// Example:
/// ```yaml
/// apiVersion: discovery.liqo.io/v1alpha1
/// kind: ForeignCluster
/// metadata:
///   name: milan
///   labels:
///     discovery.liqo.io/cluster-id: cc38...
/// spec:
///   peeringType: OutOfBand
///   clusterIdentity:
///     clusterID: cc38...
///     clusterName: milan
///   foreignAuthUrl: https://172.19.0.3:30615
///   outgoingPeeringEnabled: Yes
///   incomingPeeringEnabled: Auto
///   insecureSkipTLSVerify: true
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "discovery.liqo.io",
    version = "v1alpha1",
    kind = "ForeignCluster",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.peeringType"}"#,
    printcolumn = r#"{"name":"Outgoing","type":"string","jsonPath":".spec.outgoingPeeringEnabled"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ForeignClusterSpec {
    #[serde(default)]
    pub peering_type: PeeringType,

    #[serde(default)]
    pub cluster_identity: ClusterIdentity,

    #[serde(default)]
    pub foreign_auth_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub foreign_proxy_url: String,

    #[serde(default)]
    pub outgoing_peering_enabled: PeeringEnabled,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incoming_peering_enabled: Option<PeeringEnabled>,

    #[serde(rename = "insecureSkipTLSVerify", default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_tls_verify: Option<bool>,

    /// Fields owned by other controllers (`networkingEnabled`, `ttl`, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Where the pods of an offloaded namespace may be scheduled.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PodOffloadingStrategy {
    Local,
    Remote,
    #[default]
    LocalAndRemote,
}

/// How the remote namespace is named.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum NamespaceMappingStrategy {
    #[default]
    DefaultName,
    EnforceSameName,
}

/// NamespaceOffloading allows the workloads of its namespace to run on the selected remote clusters.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "offloading.liqo.io",
    version = "v1alpha1",
    kind = "NamespaceOffloading",
    namespaced,
    printcolumn = r#"{"name":"Pods","type":"string","jsonPath":".spec.podOffloadingStrategy"}"#,
    printcolumn = r#"{"name":"Mapping","type":"string","jsonPath":".spec.namespaceMappingStrategy"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceOffloadingSpec {
    #[serde(default)]
    pub namespace_mapping_strategy: NamespaceMappingStrategy,

    #[serde(default)]
    pub pod_offloading_strategy: PodOffloadingStrategy,

    /// Disjunction of conjunctions over remote cluster labels.
    #[serde(default)]
    pub cluster_selector: NodeSelector,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_falls_back_to_id() {
        assert_eq!(ClusterIdentity::new("cc38", "").display_name(), "cc38");
        assert_eq!(ClusterIdentity::new("cc38", "milan").display_name(), "milan");
    }

    #[test]
    fn foreign_cluster_spec_uses_wire_names() {
        let spec = ForeignClusterSpec {
            peering_type: PeeringType::OutOfBand,
            cluster_identity: ClusterIdentity::new("cc38", "milan"),
            foreign_auth_url: "https://172.19.0.3:30615".into(),
            outgoing_peering_enabled: PeeringEnabled::Yes,
            insecure_skip_tls_verify: Some(true),
            ..Default::default()
        };
        let v = serde_json::to_value(&spec).unwrap();
        assert_eq!(v["peeringType"], "OutOfBand");
        assert_eq!(v["clusterIdentity"]["clusterID"], "cc38");
        assert_eq!(v["foreignAuthUrl"], "https://172.19.0.3:30615");
        assert_eq!(v["outgoingPeeringEnabled"], "Yes");
        assert_eq!(v["insecureSkipTLSVerify"], true);
        // Unset optional fields stay off the wire so they read back as unset.
        assert!(v.get("foreignProxyUrl").is_none());
        assert!(v.get("incomingPeeringEnabled").is_none());
    }

    #[test]
    fn missing_peering_type_reads_as_unknown() {
        let spec: ForeignClusterSpec = serde_json::from_value(serde_json::json!({
            "clusterIdentity": { "clusterID": "x" }
        }))
        .unwrap();
        assert_eq!(spec.peering_type, PeeringType::Unknown);
        assert_eq!(spec.cluster_identity.cluster_name, "");
        assert_eq!(spec.incoming_peering_enabled, None);
    }

    #[test]
    fn unmodelled_spec_fields_survive_a_round_trip() {
        let raw = serde_json::json!({
            "peeringType": "OutOfBand",
            "clusterIdentity": { "clusterID": "cc38", "clusterName": "milan" },
            "outgoingPeeringEnabled": "Yes",
            "networkingEnabled": "No",
            "ttl": 30
        });
        let spec: ForeignClusterSpec = serde_json::from_value(raw).unwrap();
        assert_eq!(spec.extra.len(), 2);
        assert!(!spec.extra.contains_key("peeringType"));
        let back = serde_json::to_value(&spec).unwrap();
        assert_eq!(back["networkingEnabled"], "No");
        assert_eq!(back["ttl"], 30);
    }
}
