//! Peering: establish on create, soft-disable on delete. Never updated in place.

use async_trait::async_trait;
use peerage_core::{PeerageError, PeeringDeclaration};
use peerage_kubehub::Stores;
use peerage_peering::PeeringReconciler;
use serde::{Deserialize, Serialize};

use crate::{default_namespace, DeclaredResource, ResourceType, Settings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeeringInput {
    #[serde(rename = "remoteClusterID")]
    pub remote_cluster_id: String,
    pub remote_cluster_name: String,
    #[serde(rename = "remoteAuthURL")]
    pub remote_auth_url: String,
    pub remote_token: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl From<PeeringInput> for PeeringDeclaration {
    fn from(i: PeeringInput) -> Self {
        PeeringDeclaration {
            remote_cluster_id: i.remote_cluster_id,
            remote_cluster_name: i.remote_cluster_name,
            remote_auth_url: i.remote_auth_url,
            remote_token: i.remote_token,
            namespace: i.namespace,
        }
    }
}

pub struct PeeringResource {
    reconciler: PeeringReconciler,
}

impl PeeringResource {
    pub fn new(stores: Stores, settings: &Settings) -> Self {
        Self { reconciler: PeeringReconciler::new(stores).with_retry(settings.retry.clone()).with_teardown(settings.teardown) }
    }
}

#[async_trait]
impl DeclaredResource for PeeringResource {
    type Input = PeeringInput;
    type State = PeeringDeclaration;

    const TYPE: ResourceType = ResourceType::Peering;

    fn input_key(input: &PeeringInput) -> String { input.remote_cluster_name.clone() }

    fn state_key(state: &PeeringDeclaration) -> String { state.remote_cluster_name.clone() }

    async fn create(&self, input: PeeringInput) -> Result<PeeringDeclaration, PeerageError> {
        let decl = PeeringDeclaration::from(input);
        self.reconciler.establish(&decl).await?;
        Ok(decl)
    }

    async fn read(&self, prior: PeeringDeclaration) -> Result<PeeringDeclaration, PeerageError> { Ok(prior) }

    async fn update(&self, prior: PeeringDeclaration, _input: PeeringInput) -> Result<PeeringDeclaration, PeerageError> {
        Err(PeerageError::UpdateNotPermitted(format!(
            "peering with {} cannot be changed in place; delete and re-create it",
            prior.remote_cluster_name
        )))
    }

    async fn delete(&self, prior: PeeringDeclaration) -> Result<(), PeerageError> {
        self.reconciler.disable(&prior.remote_cluster_name).await.map(|_| ())
    }
}
