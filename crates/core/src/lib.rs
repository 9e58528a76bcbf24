//! Peerage core types: cluster identities, peering and offloading declarations,
//! the custom resource kinds they are reconciled into, and the error taxonomy.

#![forbid(unsafe_code)]

pub mod consts;
pub mod crd;
pub mod decl;
pub mod error;

pub use crd::{
    ClusterIdentity, ForeignCluster, ForeignClusterSpec, NamespaceMappingStrategy, NamespaceOffloading,
    NamespaceOffloadingSpec, PeeringEnabled, PeeringType, PodOffloadingStrategy,
};
pub use decl::{OffloadingDeclaration, PeeringDeclaration, SelectorOperator, SelectorRequirement, SelectorTerm};
pub use error::{PeerageError, PeerageResult};
