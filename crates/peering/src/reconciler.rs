//! Peering Reconciler: drives the ForeignCluster of a remote cluster towards an
//! out-of-band peering, and soft-disables it on teardown.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use metrics::{counter, histogram};
use peerage_core::consts::CLUSTER_ID_LABEL;
use peerage_core::{
    ClusterIdentity, ForeignCluster, ForeignClusterSpec, PeerageError, PeerageResult, PeeringDeclaration,
    PeeringEnabled, PeeringType,
};
use peerage_kubehub::{create_or_update, update_existing, ObjectKey, Outcome, RetryPolicy, Stores};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{identity, token};

/// What `disable` does when the ForeignCluster is already gone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeardownPolicy {
    /// Absence counts as already torn down.
    #[default]
    Tolerant,
    /// Absence is reported as `NotFound`.
    Strict,
}

impl FromStr for TeardownPolicy {
    type Err = PeerageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tolerant" => Ok(TeardownPolicy::Tolerant),
            "strict" => Ok(TeardownPolicy::Strict),
            other => Err(PeerageError::invalid(format!("unknown teardown policy {:?} (expect tolerant or strict)", other))),
        }
    }
}

impl fmt::Display for TeardownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TeardownPolicy::Tolerant => "tolerant",
            TeardownPolicy::Strict => "strict",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EstablishReport {
    pub local: ClusterIdentity,
    pub foreign_cluster: String,
    pub token: &'static str,
    pub outcome: &'static str,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisableReport {
    Disabled { unchanged: bool },
    AlreadyGone,
}

/// Pure merge applied to the current (or freshly seeded) ForeignCluster.
/// Safe to re-run on every conflict retry.
pub fn merge_out_of_band(fc: &mut ForeignCluster, decl: &PeeringDeclaration) -> PeerageResult<()> {
    let current = fc.spec.peering_type;
    if !matches!(current, PeeringType::Unknown | PeeringType::OutOfBand) {
        return Err(PeerageError::precondition(format!(
            "a peering of type {} already exists towards remote cluster {:?}, cannot be changed to {}",
            current,
            decl.remote_cluster_name,
            PeeringType::OutOfBand
        )));
    }
    let owner = &fc.spec.cluster_identity.cluster_id;
    if !owner.is_empty() && *owner != decl.remote_cluster_id {
        return Err(PeerageError::precondition(format!(
            "ForeignCluster {:?} already tracks remote cluster {}, not {}",
            decl.remote_cluster_name, owner, decl.remote_cluster_id
        )));
    }
    fc.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(CLUSTER_ID_LABEL.to_string(), decl.remote_cluster_id.clone());
    let spec = &mut fc.spec;
    spec.peering_type = PeeringType::OutOfBand;
    spec.cluster_identity.cluster_id = decl.remote_cluster_id.clone();
    if spec.cluster_identity.cluster_name.is_empty() {
        spec.cluster_identity.cluster_name = decl.remote_cluster_name.clone();
    }
    spec.foreign_auth_url = decl.remote_auth_url.clone();
    spec.foreign_proxy_url.clear();
    spec.outgoing_peering_enabled = PeeringEnabled::Yes;
    spec.incoming_peering_enabled.get_or_insert(PeeringEnabled::Auto);
    spec.insecure_skip_tls_verify.get_or_insert(true);
    Ok(())
}

fn seed(name: &str) -> ForeignCluster { ForeignCluster::new(name, ForeignClusterSpec::default()) }

fn record(op: &'static str, t0: Instant, res: &PeerageResult<impl Sized>) {
    let result = match res {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    counter!("peerage_reconcile_total", 1, "op" => op, "result" => result);
    histogram!("peerage_reconcile_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => op);
}

#[derive(Clone)]
pub struct PeeringReconciler {
    stores: Stores,
    retry: RetryPolicy,
    teardown: TeardownPolicy,
}

impl PeeringReconciler {
    pub fn new(stores: Stores) -> Self { Self { stores, retry: RetryPolicy::default(), teardown: TeardownPolicy::default() } }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_teardown(mut self, teardown: TeardownPolicy) -> Self {
        self.teardown = teardown;
        self
    }

    /// Key of the ForeignCluster tracking `decl`: the one labeled with its id, else one named after it.
    async fn locate(&self, decl: &PeeringDeclaration) -> PeerageResult<ObjectKey> {
        let found = self
            .stores
            .foreign_clusters
            .list(None, &[(CLUSTER_ID_LABEL, decl.remote_cluster_id.as_str())])
            .await
            .map_err(|e| PeerageError::from(e).context(format!("looking up ForeignCluster for {}", decl.remote_cluster_id)))?;
        match found.as_slice() {
            [] => Ok(ObjectKey::cluster(decl.remote_cluster_name.clone())),
            [one] => Ok(one.key()),
            many => Err(PeerageError::precondition(format!(
                "{} ForeignClusters carry {}={}: {}",
                many.len(),
                CLUSTER_ID_LABEL,
                decl.remote_cluster_id,
                many.iter().map(|v| v.key().to_string()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    async fn establish_inner(&self, decl: &PeeringDeclaration) -> PeerageResult<EstablishReport> {
        decl.validate()?;
        let local = identity::resolve(self.stores.config_maps.as_ref(), &decl.namespace).await?;
        if local.cluster_id == decl.remote_cluster_id {
            return Err(PeerageError::invalid(format!(
                "self-peering: remote cluster id {} is the id of the local cluster",
                decl.remote_cluster_id
            )));
        }
        let token_outcome =
            token::store(self.stores.secrets.as_ref(), &decl.remote_cluster_id, &decl.remote_token, &decl.namespace, &self.retry)
                .await?;
        let key = self.locate(decl).await?;
        debug!(foreign_cluster = %key, "peering: target located");
        let res = create_or_update(
            self.stores.foreign_clusters.as_ref(),
            &key,
            || seed(&key.name),
            |fc| merge_out_of_band(fc, decl),
            &self.retry,
        )
        .await
        .map_err(|e: PeerageError| e.context(format!("ForeignCluster {}", key)))?;
        Ok(EstablishReport {
            local,
            foreign_cluster: key.name.clone(),
            token: token_outcome.as_str(),
            outcome: res.outcome.as_str(),
            attempts: res.attempts,
        })
    }

    /// Store the remote token, then create or converge the ForeignCluster.
    pub async fn establish(&self, decl: &PeeringDeclaration) -> PeerageResult<EstablishReport> {
        let t0 = Instant::now();
        let res = self.establish_inner(decl).await;
        record("establish", t0, &res);
        match &res {
            Ok(r) => info!(
                cluster = %r.foreign_cluster,
                remote_id = %decl.remote_cluster_id,
                token = r.token,
                outcome = r.outcome,
                attempts = r.attempts,
                took_ms = %t0.elapsed().as_millis(),
                "peering: establish ok"
            ),
            Err(e) => warn!(cluster = %decl.remote_cluster_name, error = %e, "peering: establish failed"),
        }
        res
    }

    async fn disable_inner(&self, remote_cluster_name: &str) -> PeerageResult<DisableReport> {
        let key = ObjectKey::cluster(remote_cluster_name);
        let res = update_existing(
            self.stores.foreign_clusters.as_ref(),
            &key,
            |fc: &mut ForeignCluster| {
                if fc.spec.peering_type != PeeringType::OutOfBand {
                    return Err(PeerageError::precondition(format!(
                        "ForeignCluster {} has peering type {}, only {} peerings can be disabled here",
                        remote_cluster_name,
                        fc.spec.peering_type,
                        PeeringType::OutOfBand
                    )));
                }
                fc.spec.outgoing_peering_enabled = PeeringEnabled::No;
                Ok(())
            },
            &self.retry,
        )
        .await
        .map_err(|e: PeerageError| e.context(format!("disabling peering with {}", remote_cluster_name)))?;
        match (res, self.teardown) {
            (Some(m), _) => Ok(DisableReport::Disabled { unchanged: m.outcome == Outcome::Unchanged }),
            (None, TeardownPolicy::Tolerant) => Ok(DisableReport::AlreadyGone),
            (None, TeardownPolicy::Strict) => {
                Err(PeerageError::not_found(format!("ForeignCluster {} not found", remote_cluster_name)))
            }
        }
    }

    /// Flip `outgoingPeeringEnabled` to `No`; the object itself is kept.
    pub async fn disable(&self, remote_cluster_name: &str) -> PeerageResult<DisableReport> {
        let t0 = Instant::now();
        let res = self.disable_inner(remote_cluster_name).await;
        record("disable", t0, &res);
        match &res {
            Ok(r) => info!(cluster = %remote_cluster_name, report = ?r, took_ms = %t0.elapsed().as_millis(), "peering: disable ok"),
            Err(e) => warn!(cluster = %remote_cluster_name, error = %e, "peering: disable failed"),
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl() -> PeeringDeclaration {
        PeeringDeclaration {
            remote_cluster_id: "cc38".into(),
            remote_cluster_name: "milan".into(),
            remote_auth_url: "https://172.19.0.3:30615".into(),
            remote_token: "a0a8".into(),
            namespace: "liqo".into(),
        }
    }

    #[test]
    fn merge_keeps_preexisting_defaults() {
        let mut fc = seed("milan");
        fc.spec.cluster_identity.cluster_name = "milano".into();
        fc.spec.incoming_peering_enabled = Some(PeeringEnabled::No);
        fc.spec.insecure_skip_tls_verify = Some(false);
        fc.spec.foreign_proxy_url = "https://proxy:8118".into();
        merge_out_of_band(&mut fc, &decl()).unwrap();
        assert_eq!(fc.spec.peering_type, PeeringType::OutOfBand);
        assert_eq!(fc.spec.cluster_identity.cluster_name, "milano");
        assert_eq!(fc.spec.incoming_peering_enabled, Some(PeeringEnabled::No));
        assert_eq!(fc.spec.insecure_skip_tls_verify, Some(false));
        assert_eq!(fc.spec.foreign_proxy_url, "");
        assert_eq!(fc.metadata.labels.unwrap().get(CLUSTER_ID_LABEL).map(String::as_str), Some("cc38"));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut once = seed("milan");
        merge_out_of_band(&mut once, &decl()).unwrap();
        let mut twice = once.clone();
        merge_out_of_band(&mut twice, &decl()).unwrap();
        assert_eq!(once.spec, twice.spec);
        assert_eq!(once.metadata.labels, twice.metadata.labels);
    }

    #[test]
    fn merge_refuses_in_band() {
        let mut fc = seed("milan");
        fc.spec.peering_type = PeeringType::InBand;
        let err = merge_out_of_band(&mut fc, &decl()).unwrap_err();
        assert!(matches!(err, PeerageError::FailedPrecondition(_)));
        assert!(err.to_string().contains("InBand"), "{}", err);
    }

    #[test]
    fn merge_refuses_a_cluster_tracking_another_id() {
        let mut fc = seed("milan");
        fc.spec.peering_type = PeeringType::OutOfBand;
        fc.spec.cluster_identity.cluster_id = "other-id".into();
        let before = fc.clone();
        let err = merge_out_of_band(&mut fc, &decl()).unwrap_err();
        assert!(matches!(err, PeerageError::FailedPrecondition(_)));
        assert!(err.to_string().contains("other-id"), "{}", err);
        assert_eq!(fc.spec, before.spec);
        assert_eq!(fc.metadata.labels, before.metadata.labels);
    }

    #[test]
    fn teardown_policy_parses() {
        assert_eq!("Strict".parse::<TeardownPolicy>().unwrap(), TeardownPolicy::Strict);
        assert_eq!(" tolerant ".parse::<TeardownPolicy>().unwrap(), TeardownPolicy::Tolerant);
        assert!("lenient".parse::<TeardownPolicy>().is_err());
    }
}
