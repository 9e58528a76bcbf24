//! Generate: publish what a remote cluster needs to peer with this one.

use async_trait::async_trait;
use peerage_core::PeerageError;
use peerage_kubehub::Stores;
use peerage_peering::publish;
use serde::{Deserialize, Serialize};

use crate::{default_namespace, DeclaredResource, ResourceType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateInput {
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateState {
    pub namespace: String,
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    pub cluster_name: String,
    pub auth_endpoint: String,
    pub token: String,
}

pub struct GenerateResource {
    stores: Stores,
}

impl GenerateResource {
    pub fn new(stores: Stores) -> Self { Self { stores } }

    async fn generate(&self, namespace: String) -> Result<GenerateState, PeerageError> {
        let creds = publish(&self.stores, &namespace).await?;
        Ok(GenerateState {
            cluster_name: creds.identity.display_name().to_string(),
            cluster_id: creds.identity.cluster_id,
            auth_endpoint: creds.auth_endpoint,
            token: creds.token,
            namespace,
        })
    }
}

#[async_trait]
impl DeclaredResource for GenerateResource {
    type Input = GenerateInput;
    type State = GenerateState;

    const TYPE: ResourceType = ResourceType::Generate;

    fn input_key(input: &GenerateInput) -> String { input.namespace.clone() }

    fn state_key(state: &GenerateState) -> String { state.namespace.clone() }

    async fn create(&self, input: GenerateInput) -> Result<GenerateState, PeerageError> { self.generate(input.namespace).await }

    async fn read(&self, prior: GenerateState) -> Result<GenerateState, PeerageError> { Ok(prior) }

    async fn update(&self, _prior: GenerateState, input: GenerateInput) -> Result<GenerateState, PeerageError> {
        self.generate(input.namespace).await
    }

    /// Nothing was written, so nothing is removed.
    async fn delete(&self, _prior: GenerateState) -> Result<(), PeerageError> { Ok(()) }
}
