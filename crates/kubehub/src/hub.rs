//! One connection to a target cluster and the per-kind stores built on it.

use std::sync::Arc;

use anyhow::Result;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret, Service};
use kube::Client;
use peerage_core::{ForeignCluster, NamespaceOffloading, PeerageResult};
use tracing::info;

use crate::config::KubeTarget;
use crate::kube_store::KubeStore;
use crate::mem::MemStore;
use crate::registry::KindRegistry;
use crate::store::ObjectStore;

/// Every store a reconciler may touch.
#[derive(Clone)]
pub struct Stores {
    pub config_maps: Arc<dyn ObjectStore<ConfigMap>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    pub services: Arc<dyn ObjectStore<Service>>,
    pub nodes: Arc<dyn ObjectStore<Node>>,
    pub foreign_clusters: Arc<dyn ObjectStore<ForeignCluster>>,
    pub offloadings: Arc<dyn ObjectStore<NamespaceOffloading>>,
}

impl Stores {
    /// Kube-backed stores; the custom kinds must be present in `registry`.
    pub fn kube(client: Client, registry: &KindRegistry) -> PeerageResult<Self> {
        registry.require::<ForeignCluster>()?;
        registry.require::<NamespaceOffloading>()?;
        Ok(Self {
            config_maps: Arc::new(KubeStore::<ConfigMap>::namespaced(client.clone())),
            secrets: Arc::new(KubeStore::<Secret>::namespaced(client.clone())),
            services: Arc::new(KubeStore::<Service>::namespaced(client.clone())),
            nodes: Arc::new(KubeStore::<Node>::cluster(client.clone())),
            foreign_clusters: Arc::new(KubeStore::<ForeignCluster>::cluster(client.clone())),
            offloadings: Arc::new(KubeStore::<NamespaceOffloading>::namespaced(client)),
        })
    }
}

/// In-memory stores with direct handles kept for seeding and inspection.
#[derive(Clone, Default)]
pub struct MemStores {
    pub config_maps: Arc<MemStore<ConfigMap>>,
    pub secrets: Arc<MemStore<Secret>>,
    pub services: Arc<MemStore<Service>>,
    pub nodes: Arc<MemStore<Node>>,
    pub foreign_clusters: Arc<MemStore<ForeignCluster>>,
    pub offloadings: Arc<MemStore<NamespaceOffloading>>,
}

impl MemStores {
    pub fn new() -> Self { Self::default() }

    pub fn stores(&self) -> Stores {
        Stores {
            config_maps: self.config_maps.clone(),
            secrets: self.secrets.clone(),
            services: self.services.clone(),
            nodes: self.nodes.clone(),
            foreign_clusters: self.foreign_clusters.clone(),
            offloadings: self.offloadings.clone(),
        }
    }

    /// Total successful writes across every kind.
    pub fn writes(&self) -> u64 {
        self.config_maps.writes()
            + self.secrets.writes()
            + self.services.writes()
            + self.nodes.writes()
            + self.foreign_clusters.writes()
            + self.offloadings.writes()
    }
}

pub struct Hub {
    stores: Stores,
}

impl Hub {
    /// Build a client for `target`; with `verify`, also check the registry against discovery.
    pub async fn connect(target: &KubeTarget, registry: KindRegistry, verify: bool) -> Result<Self> {
        let client = target.client().await?;
        if verify {
            registry.verify(client.clone()).await?;
        } else {
            info!("hub: discovery check skipped");
        }
        let stores = Stores::kube(client, &registry)?;
        Ok(Self { stores })
    }

    pub fn stores(&self) -> Stores { self.stores.clone() }
}
