use std::sync::Arc;

use peerage_core::{
    NamespaceMappingStrategy, NamespaceOffloading, OffloadingDeclaration, PeerageError, PodOffloadingStrategy,
    SelectorOperator, SelectorRequirement, SelectorTerm,
};
use peerage_kubehub::{MemStore, Outcome, RetryPolicy};
use peerage_offload::{offloading_key, OffloadingReconciler};

fn term(key: &str, op: SelectorOperator, values: &[&str]) -> SelectorTerm {
    SelectorTerm { match_expressions: vec![SelectorRequirement::new(key, op, values.iter().map(|v| v.to_string()).collect())] }
}

fn decl(terms: Vec<SelectorTerm>) -> OffloadingDeclaration {
    OffloadingDeclaration {
        namespace: "demo".into(),
        pod_offloading_strategy: PodOffloadingStrategy::Remote,
        namespace_mapping_strategy: NamespaceMappingStrategy::EnforceSameName,
        cluster_selector_terms: terms,
    }
}

fn setup() -> (Arc<MemStore<NamespaceOffloading>>, OffloadingReconciler) {
    let store = Arc::new(MemStore::<NamespaceOffloading>::new());
    let r = OffloadingReconciler::new(store.clone()).with_retry(RetryPolicy::immediate(3));
    (store, r)
}

#[tokio::test]
async fn apply_creates_fixed_name_object() {
    let (store, r) = setup();
    let d = decl(vec![term("region", SelectorOperator::In, &["eu"]), term("liqo.io/provider", SelectorOperator::Exists, &[])]);
    assert_eq!(r.apply(&d).await.unwrap(), Outcome::Created);
    let obj = store.object(&offloading_key("demo")).unwrap();
    assert_eq!(obj.metadata.name.as_deref(), Some("offloading"));
    assert_eq!(obj.metadata.namespace.as_deref(), Some("demo"));
    assert_eq!(obj.spec.pod_offloading_strategy, PodOffloadingStrategy::Remote);
    assert_eq!(obj.spec.namespace_mapping_strategy, NamespaceMappingStrategy::EnforceSameName);
    assert_eq!(obj.spec.cluster_selector.node_selector_terms.len(), 2);
    assert_eq!(r.apply(&d).await.unwrap(), Outcome::Unchanged);
}

#[tokio::test]
async fn second_apply_replaces_terms_entirely() {
    let (store, r) = setup();
    r.apply(&decl(vec![term("region", SelectorOperator::In, &["eu"]), term("zone", SelectorOperator::Exists, &[])]))
        .await
        .unwrap();
    let mut next = decl(vec![term("tier", SelectorOperator::NotIn, &["edge"])]);
    next.pod_offloading_strategy = PodOffloadingStrategy::LocalAndRemote;
    assert_eq!(r.apply(&next).await.unwrap(), Outcome::Updated);

    let obj = store.object(&offloading_key("demo")).unwrap();
    let terms = obj.spec.cluster_selector.node_selector_terms;
    assert_eq!(terms.len(), 1);
    let reqs = terms[0].match_expressions.as_ref().unwrap();
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].key, "tier");
    assert_eq!(reqs[0].operator, "NotIn");
    assert_eq!(obj.spec.pod_offloading_strategy, PodOffloadingStrategy::LocalAndRemote);
}

#[tokio::test]
async fn malformed_selector_is_rejected_without_write() {
    let (store, r) = setup();
    let err = r.apply(&decl(vec![term("region", SelectorOperator::In, &[])])).await.unwrap_err();
    assert!(matches!(err, PeerageError::InvalidArgument(_)), "{err}");
    assert!(store.is_empty());
}

#[tokio::test]
async fn remove_tolerates_absence() {
    let (store, r) = setup();
    assert!(!r.remove("liqo").await.unwrap());
    r.apply(&decl(vec![])).await.unwrap();
    assert!(r.remove("demo").await.unwrap());
    assert!(store.is_empty());
}

#[tokio::test]
async fn remove_surfaces_store_failure() {
    let (store, r) = setup();
    store.set_unavailable(true);
    assert!(matches!(r.remove("demo").await, Err(PeerageError::Unavailable(_))));
}
