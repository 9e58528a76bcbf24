//! Peerage offload: reconcile the single NamespaceOffloading object of a namespace.
//!
//! Unlike peering, the object is fully owned here: every apply overwrites both
//! strategies and the whole selector.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::core::v1::{NodeSelector, NodeSelectorRequirement, NodeSelectorTerm};
use metrics::{counter, histogram};
use peerage_core::consts::NAMESPACE_OFFLOADING_NAME;
use peerage_core::{
    NamespaceOffloading, NamespaceOffloadingSpec, OffloadingDeclaration, PeerageError, PeerageResult, SelectorTerm,
};
use peerage_kubehub::{create_or_update, delete_if_exists, ObjectKey, ObjectStore, Outcome, RetryPolicy};
use tracing::{info, warn};

/// Structural mapping onto native selector terms; order and grouping are preserved.
pub fn translate(terms: &[SelectorTerm]) -> Vec<NodeSelectorTerm> {
    terms
        .iter()
        .map(|t| NodeSelectorTerm {
            match_expressions: Some(
                t.match_expressions
                    .iter()
                    .map(|r| NodeSelectorRequirement {
                        key: r.key.clone(),
                        operator: r.operator.as_str().to_string(),
                        values: if r.values.is_empty() { None } else { Some(r.values.clone()) },
                    })
                    .collect(),
            ),
            match_fields: None,
        })
        .collect()
}

/// Desired spec for `decl`.
pub fn desired_spec(decl: &OffloadingDeclaration) -> NamespaceOffloadingSpec {
    NamespaceOffloadingSpec {
        namespace_mapping_strategy: decl.namespace_mapping_strategy,
        pod_offloading_strategy: decl.pod_offloading_strategy,
        cluster_selector: NodeSelector { node_selector_terms: translate(&decl.cluster_selector_terms) },
    }
}

pub fn offloading_key(namespace: &str) -> ObjectKey { ObjectKey::namespaced(namespace, NAMESPACE_OFFLOADING_NAME) }

fn record(op: &'static str, t0: Instant, res: &PeerageResult<Outcome>) {
    let result = match res {
        Ok(o) => o.as_str(),
        Err(e) => e.code(),
    };
    counter!("peerage_offload_total", 1, "op" => op, "result" => result);
    histogram!("peerage_offload_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => op);
}

#[derive(Clone)]
pub struct OffloadingReconciler {
    offloadings: Arc<dyn ObjectStore<NamespaceOffloading>>,
    retry: RetryPolicy,
}

impl OffloadingReconciler {
    pub fn new(offloadings: Arc<dyn ObjectStore<NamespaceOffloading>>) -> Self {
        Self { offloadings, retry: RetryPolicy::default() }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn apply_inner(&self, decl: &OffloadingDeclaration) -> PeerageResult<Outcome> {
        decl.validate()?;
        let key = offloading_key(&decl.namespace);
        let spec = desired_spec(decl);
        let res = create_or_update(
            self.offloadings.as_ref(),
            &key,
            || NamespaceOffloading::new(NAMESPACE_OFFLOADING_NAME, NamespaceOffloadingSpec::default()),
            |o: &mut NamespaceOffloading| -> PeerageResult<()> {
                o.spec = spec.clone();
                Ok(())
            },
            &self.retry,
        )
        .await
        .map_err(|e: PeerageError| e.context(format!("NamespaceOffloading {}", key)))?;
        Ok(res.outcome)
    }

    /// Create or fully overwrite the NamespaceOffloading of `decl.namespace`.
    pub async fn apply(&self, decl: &OffloadingDeclaration) -> PeerageResult<Outcome> {
        let t0 = Instant::now();
        let res = self.apply_inner(decl).await;
        record("apply", t0, &res);
        match &res {
            Ok(o) => info!(
                ns = %decl.namespace,
                terms = decl.cluster_selector_terms.len(),
                outcome = o.as_str(),
                took_ms = %t0.elapsed().as_millis(),
                "offload: apply ok"
            ),
            Err(e) => warn!(ns = %decl.namespace, error = %e, "offload: apply failed"),
        }
        res
    }

    /// Delete the NamespaceOffloading of `namespace`; absence is success. Returns whether it existed.
    pub async fn remove(&self, namespace: &str) -> PeerageResult<bool> {
        let t0 = Instant::now();
        let key = offloading_key(namespace);
        let res = delete_if_exists::<NamespaceOffloading, _>(self.offloadings.as_ref(), &key)
            .await
            .map_err(|e| PeerageError::from(e).context(format!("deleting NamespaceOffloading {}", key)));
        let result = match &res {
            Ok(true) => "deleted",
            Ok(false) => "absent",
            Err(e) => e.code(),
        };
        counter!("peerage_offload_total", 1, "op" => "remove", "result" => result);
        match &res {
            Ok(existed) => info!(ns = %namespace, existed = *existed, took_ms = %t0.elapsed().as_millis(), "offload: remove ok"),
            Err(e) => warn!(ns = %namespace, error = %e, "offload: remove failed"),
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerage_core::{SelectorOperator, SelectorRequirement};

    #[test]
    fn two_terms_stay_two_terms_in_order() {
        let terms = vec![
            SelectorTerm { match_expressions: vec![SelectorRequirement::new("region", SelectorOperator::In, vec!["eu".into(), "us".into()])] },
            SelectorTerm { match_expressions: vec![SelectorRequirement::new("liqo.io/provider", SelectorOperator::Exists, vec![])] },
        ];
        let native = translate(&terms);
        assert_eq!(native.len(), 2);
        let first = native[0].match_expressions.as_ref().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].key, "region");
        assert_eq!(first[0].operator, "In");
        assert_eq!(first[0].values, Some(vec!["eu".to_string(), "us".to_string()]));
        let second = native[1].match_expressions.as_ref().unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].operator, "Exists");
        assert_eq!(second[0].values, None);
    }

    #[test]
    fn empty_terms_give_empty_selector() {
        assert!(translate(&[]).is_empty());
    }
}
