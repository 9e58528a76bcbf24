//! Credential Publisher: what a remote administrator needs to peer with this cluster.

use std::net::IpAddr;

use k8s_openapi::api::core::v1::{Node, Secret, Service};
use peerage_core::consts::{
    APP_NAME_LABEL, AUTH_SERVICE_APP, LOCAL_TOKEN_SECRET, OVERRIDE_ADDRESS_ANNOTATION, OVERRIDE_PORT_ANNOTATION,
    TOKEN_DATA_KEY,
};
use peerage_core::{ClusterIdentity, PeerageError, PeerageResult};
use peerage_kubehub::{ObjectKey, ObjectStore, Stores};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::identity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub identity: ClusterIdentity,
    pub auth_endpoint: String,
    pub token: String,
}

/// Bearer token of the local cluster, from its `auth-token` Secret.
pub async fn local_token(secrets: &dyn ObjectStore<Secret>, namespace: &str) -> PeerageResult<String> {
    let key = ObjectKey::namespaced(namespace, LOCAL_TOKEN_SECRET);
    let secret = secrets
        .get(&key)
        .await
        .map_err(|e| PeerageError::from(e).context("reading local token"))?
        .ok_or_else(|| PeerageError::not_found(format!("token Secret {} not found", key)))?
        .object;
    let from_data = secret.data.as_ref().and_then(|d| d.get(TOKEN_DATA_KEY)).map(|b| String::from_utf8_lossy(&b.0).into_owned());
    let from_string = secret.string_data.as_ref().and_then(|d| d.get(TOKEN_DATA_KEY)).cloned();
    match from_data.or(from_string).filter(|t| !t.is_empty()) {
        Some(t) => Ok(t),
        None => Err(PeerageError::not_found(format!("token Secret {} has no {:?} entry", key, TOKEN_DATA_KEY))),
    }
}

fn format_endpoint(host: &str, port: i32) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("https://[{}]:{}", host, port),
        _ => format!("https://{}:{}", host, port),
    }
}

fn annotation<'a>(svc: &'a Service, key: &str) -> Option<&'a str> {
    svc.metadata.annotations.as_ref().and_then(|a| a.get(key)).map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|cs| cs.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false)
}

fn node_address(node: &Node) -> Option<String> {
    let addrs = node.status.as_ref()?.addresses.as_ref()?;
    ["ExternalIP", "InternalIP"]
        .iter()
        .find_map(|want| addrs.iter().find(|a| a.type_ == *want).map(|a| a.address.clone()))
}

fn ingress_host(svc: &Service) -> Option<String> {
    let ingress = svc.status.as_ref()?.load_balancer.as_ref()?.ingress.as_ref()?;
    let first = ingress.first()?;
    first.ip.clone().or_else(|| first.hostname.clone())
}

fn service_host(svc: &Service, nodes: &[Node]) -> Option<String> {
    if let Some(addr) = annotation(svc, OVERRIDE_ADDRESS_ANNOTATION) {
        return Some(addr.to_string());
    }
    let spec = svc.spec.as_ref()?;
    let ty = spec.type_.as_deref().unwrap_or("ClusterIP");
    if ty == "LoadBalancer" {
        if let Some(h) = ingress_host(svc) {
            return Some(h);
        }
    }
    if ty == "NodePort" || ty == "LoadBalancer" {
        if let Some(addr) = nodes.iter().filter(|n| is_ready(n)).find_map(node_address) {
            return Some(addr);
        }
    }
    spec.cluster_ip.clone().filter(|ip| !ip.is_empty() && ip != "None")
}

fn service_port(svc: &Service) -> PeerageResult<Option<i32>> {
    if let Some(p) = annotation(svc, OVERRIDE_PORT_ANNOTATION) {
        return p
            .parse::<i32>()
            .map(Some)
            .map_err(|_| PeerageError::invalid(format!("annotation {} is not a port: {:?}", OVERRIDE_PORT_ANNOTATION, p)));
    }
    let spec = match svc.spec.as_ref() {
        Some(s) => s,
        None => return Ok(None),
    };
    let first = spec.ports.as_ref().and_then(|p| p.first());
    // A LoadBalancer without ingress is reached through a node, like a NodePort.
    let node_port = match spec.type_.as_deref() {
        Some("NodePort") => true,
        Some("LoadBalancer") => ingress_host(svc).is_none(),
        _ => false,
    };
    Ok(first.map(|p| if node_port { p.node_port.unwrap_or(p.port) } else { p.port }))
}

/// Externally reachable address of the authentication service, as `https://host:port`.
pub fn auth_endpoint_of(svc: &Service, nodes: &[Node]) -> PeerageResult<String> {
    let name = svc.metadata.name.as_deref().unwrap_or_default();
    let host = service_host(svc, nodes).ok_or_else(|| PeerageError::not_found(format!("auth Service {} has no reachable address", name)))?;
    let port = service_port(svc)?.ok_or_else(|| PeerageError::not_found(format!("auth Service {} exposes no port", name)))?;
    Ok(format_endpoint(&host, port))
}

/// Auth endpoint of the cluster, from the auth Service in `namespace`.
pub async fn auth_endpoint(stores: &Stores, namespace: &str) -> PeerageResult<String> {
    let what = format!("auth endpoint in namespace {}", namespace);
    let services = stores
        .services
        .list(Some(namespace), &[(APP_NAME_LABEL, AUTH_SERVICE_APP)])
        .await
        .map_err(|e| PeerageError::from(e).context(&what))?;
    let svc = match services.as_slice() {
        [] => return Err(PeerageError::not_found(format!("{}: no Service labeled {}={}", what, APP_NAME_LABEL, AUTH_SERVICE_APP))),
        [one] => &one.object,
        many => return Err(PeerageError::precondition(format!("{}: {} auth Services, expected one", what, many.len()))),
    };
    let needs_nodes = annotation(svc, OVERRIDE_ADDRESS_ANNOTATION).is_none()
        && matches!(svc.spec.as_ref().and_then(|s| s.type_.as_deref()), Some("NodePort") | Some("LoadBalancer"));
    let nodes: Vec<Node> = if needs_nodes {
        stores.nodes.list(None, &[]).await.map_err(|e| PeerageError::from(e).context(&what))?.into_iter().map(|v| v.object).collect()
    } else {
        Vec::new()
    };
    let url = auth_endpoint_of(svc, &nodes).map_err(|e| e.context(&what))?;
    debug!(ns = %namespace, url = %url, "credentials: auth endpoint");
    Ok(url)
}

/// Identity, auth endpoint and bearer token for `namespace`. Pure reads; no retries.
pub async fn publish(stores: &Stores, namespace: &str) -> PeerageResult<Credentials> {
    let identity = identity::resolve(stores.config_maps.as_ref(), namespace).await?;
    let token = local_token(stores.secrets.as_ref(), namespace).await?;
    let auth_endpoint = auth_endpoint(stores, namespace).await?;
    Ok(Credentials { identity, auth_endpoint, token })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{auth_service, node};

    #[test]
    fn ipv6_hosts_are_bracketed() {
        assert_eq!(format_endpoint("fd00::1", 443), "https://[fd00::1]:443");
        assert_eq!(format_endpoint("172.19.0.3", 30615), "https://172.19.0.3:30615");
        assert_eq!(format_endpoint("auth.example.com", 443), "https://auth.example.com:443");
    }

    #[test]
    fn node_port_uses_ready_node_address() {
        let svc = auth_service("liqo", "NodePort", 443, Some(30615));
        let nodes = vec![node("down", false, Some("10.0.0.9"), "172.19.0.9"), node("up", true, None, "172.19.0.3")];
        assert_eq!(auth_endpoint_of(&svc, &nodes).unwrap(), "https://172.19.0.3:30615");
    }

    #[test]
    fn external_ip_wins_over_internal() {
        let svc = auth_service("liqo", "NodePort", 443, Some(30615));
        let nodes = vec![node("up", true, Some("203.0.113.7"), "172.19.0.3")];
        assert_eq!(auth_endpoint_of(&svc, &nodes).unwrap(), "https://203.0.113.7:30615");
    }

    #[test]
    fn annotations_override_discovery() {
        let mut svc = auth_service("liqo", "NodePort", 443, Some(30615));
        svc.metadata.annotations = Some(
            [(OVERRIDE_ADDRESS_ANNOTATION.to_string(), "auth.example.com".to_string()), (OVERRIDE_PORT_ANNOTATION.to_string(), "8443".to_string())]
                .into_iter()
                .collect(),
        );
        assert_eq!(auth_endpoint_of(&svc, &[]).unwrap(), "https://auth.example.com:8443");
    }

    #[test]
    fn load_balancer_ingress_uses_service_port() {
        use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServiceStatus};
        let mut svc = auth_service("liqo", "LoadBalancer", 443, Some(30615));
        svc.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress { ip: Some("198.51.100.4".into()), ..Default::default() }]),
                ..Default::default()
            }),
            ..Default::default()
        });
        let nodes = vec![node("up", true, None, "172.19.0.3")];
        assert_eq!(auth_endpoint_of(&svc, &nodes).unwrap(), "https://198.51.100.4:443");
        svc.status = None;
        assert_eq!(auth_endpoint_of(&svc, &nodes).unwrap(), "https://172.19.0.3:30615");
    }

    #[test]
    fn cluster_ip_service_uses_service_port() {
        let svc = auth_service("liqo", "ClusterIP", 443, None);
        assert_eq!(auth_endpoint_of(&svc, &[]).unwrap(), "https://10.96.0.10:443");
    }

    #[test]
    fn bad_port_annotation_is_invalid() {
        let mut svc = auth_service("liqo", "ClusterIP", 443, None);
        svc.metadata.annotations = Some([(OVERRIDE_PORT_ANNOTATION.to_string(), "https".to_string())].into_iter().collect());
        assert!(matches!(auth_endpoint_of(&svc, &[]), Err(PeerageError::InvalidArgument(_))));
    }
}
