//! Peerage peering: everything needed to establish an out-of-band peering
//! from a consumer cluster towards a provider cluster.
//!
//! On the provider, [`credentials::publish`] yields the identity, auth endpoint
//! and token; on the consumer, [`PeeringReconciler::establish`] stores that token
//! and converges the ForeignCluster.

#![forbid(unsafe_code)]

pub mod credentials;
pub mod identity;
pub mod reconciler;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod token;

pub use credentials::{publish, Credentials};
pub use reconciler::{merge_out_of_band, DisableReport, EstablishReport, PeeringReconciler, TeardownPolicy};
