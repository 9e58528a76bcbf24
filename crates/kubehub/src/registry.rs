//! Kinds the reconcilers read and write, and a startup check that the
//! target cluster actually serves them.

use kube::{
    core::ApiResource,
    discovery::{Discovery, Scope},
    Client, Resource,
};
use peerage_core::{ForeignCluster, NamespaceOffloading, PeerageError, PeerageResult};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RegisteredKind {
    pub resource: ApiResource,
    pub namespaced: bool,
}

impl RegisteredKind {
    pub fn gvk_key(&self) -> String {
        let ar = &self.resource;
        if ar.group.is_empty() { format!("{}/{}", ar.version, ar.kind) } else { format!("{}/{}/{}", ar.group, ar.version, ar.kind) }
    }
}

#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: Vec<RegisteredKind>,
}

impl KindRegistry {
    /// The two custom kinds every reconciler depends on.
    pub fn standard() -> Self {
        Self::default().register::<ForeignCluster>(false).register::<NamespaceOffloading>(true)
    }

    pub fn register<K: Resource<DynamicType = ()>>(mut self, namespaced: bool) -> Self {
        let kind = RegisteredKind { resource: ApiResource::erase::<K>(&()), namespaced };
        if !self.kinds.iter().any(|k| k.gvk_key() == kind.gvk_key()) {
            self.kinds.push(kind);
        }
        self
    }

    pub fn kinds(&self) -> &[RegisteredKind] { &self.kinds }

    fn groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = self.kinds.iter().map(|k| k.resource.group.as_str()).collect();
        groups.sort_unstable();
        groups.dedup();
        groups
    }

    /// The registered entry for `K`; stores for unregistered kinds are never built.
    pub fn require<K: Resource<DynamicType = ()>>(&self) -> PeerageResult<&RegisteredKind> {
        let want = ApiResource::erase::<K>(&());
        self.kinds
            .iter()
            .find(|k| k.resource.group == want.group && k.resource.version == want.version && k.resource.kind == want.kind)
            .ok_or_else(|| PeerageError::precondition(format!("kind {}/{} is not registered", want.api_version, want.kind)))
    }

    /// Compare the registry with what the cluster serves: `(resource, namespaced)` pairs.
    pub fn check<'a>(&self, served: impl IntoIterator<Item = (&'a ApiResource, bool)>) -> PeerageResult<()> {
        let served: Vec<(&ApiResource, bool)> = served.into_iter().collect();
        let mut missing = Vec::new();
        for want in &self.kinds {
            let found = served.iter().find(|(ar, _)| {
                ar.group == want.resource.group && ar.version == want.resource.version && ar.kind == want.resource.kind
            });
            match found {
                Some((_, namespaced)) => {
                    if *namespaced != want.namespaced {
                        return Err(PeerageError::precondition(format!(
                            "{} is served {} but expected {}",
                            want.gvk_key(),
                            scope_name(*namespaced),
                            scope_name(want.namespaced)
                        )));
                    }
                    debug!(gvk = %want.gvk_key(), "registry: served");
                }
                None => missing.push(want.gvk_key()),
            }
        }
        if !missing.is_empty() {
            return Err(PeerageError::unavailable(format!(
                "kinds not served by the cluster (is the peering control plane installed?): {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Fail unless every registered kind is served with the expected scope.
    pub async fn verify(&self, client: Client) -> PeerageResult<()> {
        let t0 = std::time::Instant::now();
        let groups = self.groups();
        let discovery = Discovery::new(client)
            .filter(&groups)
            .run()
            .await
            .map_err(|e| PeerageError::unavailable(format!("discovery of {}: {}", groups.join(", "), e)))?;
        let served: Vec<(ApiResource, bool)> = discovery
            .groups()
            .flat_map(|g| g.recommended_resources())
            .map(|(ar, caps)| (ar, matches!(caps.scope, Scope::Namespaced)))
            .collect();
        self.check(served.iter().map(|(ar, ns)| (ar, *ns)))?;
        info!(kinds = self.kinds.len(), took_ms = %t0.elapsed().as_millis(), "registry: verified");
        Ok(())
    }
}

fn scope_name(namespaced: bool) -> &'static str {
    if namespaced { "namespaced" } else { "cluster-scoped" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_kinds() {
        let reg = KindRegistry::standard();
        let keys: Vec<String> = reg.kinds().iter().map(|k| k.gvk_key()).collect();
        assert_eq!(keys, vec!["discovery.liqo.io/v1alpha1/ForeignCluster", "offloading.liqo.io/v1alpha1/NamespaceOffloading"]);
        assert!(!reg.kinds()[0].namespaced);
        assert!(reg.kinds()[1].namespaced);
    }

    #[test]
    fn register_is_idempotent() {
        let reg = KindRegistry::standard().register::<ForeignCluster>(false);
        assert_eq!(reg.kinds().len(), 2);
        assert_eq!(reg.groups(), vec!["discovery.liqo.io", "offloading.liqo.io"]);
    }

    #[test]
    fn missing_kind_is_unavailable_and_named() {
        let reg = KindRegistry::standard();
        let fc = ApiResource::erase::<ForeignCluster>(&());
        let err = reg.check([(&fc, false)]).unwrap_err();
        assert!(matches!(err, PeerageError::Unavailable(_)), "{err}");
        assert!(err.to_string().contains("offloading.liqo.io/v1alpha1/NamespaceOffloading"), "{err}");
        assert!(!err.to_string().contains("ForeignCluster"), "{err}");
    }

    #[test]
    fn wrong_scope_is_a_precondition() {
        let reg = KindRegistry::standard();
        let fc = ApiResource::erase::<ForeignCluster>(&());
        let no = ApiResource::erase::<NamespaceOffloading>(&());
        assert!(reg.check([(&fc, false), (&no, true)]).is_ok());
        let err = reg.check([(&fc, true), (&no, true)]).unwrap_err();
        assert!(matches!(err, PeerageError::FailedPrecondition(_)), "{err}");
    }

    #[test]
    fn require_rejects_unregistered_kinds() {
        let reg = KindRegistry::default().register::<ForeignCluster>(false);
        assert!(reg.require::<ForeignCluster>().is_ok());
        assert!(matches!(reg.require::<NamespaceOffloading>(), Err(PeerageError::FailedPrecondition(_))));
    }
}
