//! Peerage kubehub: the remote object store capability and kube client wiring.
//!
//! Reconcilers only see [`ObjectStore`]; production code plugs in [`KubeStore`],
//! tests and dry runs plug in [`MemStore`].

#![forbid(unsafe_code)]

pub mod config;
pub mod hub;
pub mod kube_store;
pub mod mem;
pub mod mutate;
pub mod registry;
pub mod retry;
pub mod store;

pub use config::KubeTarget;
pub use hub::{Hub, MemStores, Stores};
pub use kube_store::KubeStore;
pub use mem::MemStore;
pub use mutate::{create_or_update, delete_if_exists, update_existing, Mutated, Outcome};
pub use registry::KindRegistry;
pub use retry::RetryPolicy;
pub use store::{kind_of, ObjectKey, ObjectStore, StoreError, StoreResult, StoredObject, Versioned};
