//! Offload: apply on create/update, remove on delete.

use async_trait::async_trait;
use peerage_core::{NamespaceMappingStrategy, OffloadingDeclaration, PeerageError, PodOffloadingStrategy, SelectorTerm};
use peerage_kubehub::Stores;
use peerage_offload::OffloadingReconciler;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{default_namespace, DeclaredResource, ResourceType, Settings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffloadInput {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub pod_offloading_strategy: Option<PodOffloadingStrategy>,
    #[serde(default)]
    pub namespace_mapping_strategy: Option<NamespaceMappingStrategy>,
    #[serde(default)]
    pub cluster_selector_terms: Option<Vec<SelectorTerm>>,
}

impl OffloadInput {
    /// Resolve unset fields to `LocalAndRemote`, `DefaultName` and no selector terms.
    pub fn resolve(self) -> OffloadingDeclaration {
        OffloadingDeclaration {
            namespace: self.namespace,
            pod_offloading_strategy: self.pod_offloading_strategy.unwrap_or_default(),
            namespace_mapping_strategy: self.namespace_mapping_strategy.unwrap_or_default(),
            cluster_selector_terms: self.cluster_selector_terms.unwrap_or_default(),
        }
    }
}

pub struct OffloadResource {
    reconciler: OffloadingReconciler,
}

impl OffloadResource {
    pub fn new(stores: Stores, settings: &Settings) -> Self {
        Self { reconciler: OffloadingReconciler::new(stores.offloadings).with_retry(settings.retry.clone()) }
    }
}

#[async_trait]
impl DeclaredResource for OffloadResource {
    type Input = OffloadInput;
    type State = OffloadingDeclaration;

    const TYPE: ResourceType = ResourceType::Offload;

    fn input_key(input: &OffloadInput) -> String { input.namespace.clone() }

    fn state_key(state: &OffloadingDeclaration) -> String { state.namespace.clone() }

    async fn create(&self, input: OffloadInput) -> Result<OffloadingDeclaration, PeerageError> {
        let decl = input.resolve();
        self.reconciler.apply(&decl).await?;
        Ok(decl)
    }

    async fn read(&self, prior: OffloadingDeclaration) -> Result<OffloadingDeclaration, PeerageError> { Ok(prior) }

    async fn update(&self, prior: OffloadingDeclaration, input: OffloadInput) -> Result<OffloadingDeclaration, PeerageError> {
        let decl = input.resolve();
        decl.validate()?;
        self.reconciler.apply(&decl).await?;
        if decl.namespace != prior.namespace {
            info!(from = %prior.namespace, to = %decl.namespace, "offload: namespace changed, removing old offloading");
            self.reconciler.remove(&prior.namespace).await?;
        }
        Ok(decl)
    }

    async fn delete(&self, prior: OffloadingDeclaration) -> Result<(), PeerageError> {
        self.reconciler.remove(&prior.namespace).await.map(|_| ())
    }
}
