//! Read-merge-write helpers over an [`ObjectStore`].
//!
//! Each write is guarded by the version it was read at. A conflicting write
//! re-reads and re-applies the merge, up to the policy's attempt budget.

use metrics::counter;
use tracing::{debug, warn};

use crate::retry::RetryPolicy;
use crate::store::{kind_of, ObjectKey, ObjectStore, StoreError, StoredObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    /// The merge produced an identical object; nothing was written.
    Unchanged,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Mutated<K> {
    pub object: K,
    pub outcome: Outcome,
    pub attempts: u32,
}

fn same<K: StoredObject>(a: &K, b: &K) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

fn is_retryable(e: &StoreError) -> bool { matches!(e, StoreError::Conflict(_) | StoreError::AlreadyExists(_)) }

/// Create the object at `key` from `seed()` if absent, otherwise apply `merge`
/// to the current object and replace it. `merge` also runs on the seed.
pub async fn create_or_update<K, S, Seed, Merge, E>(
    store: &S,
    key: &ObjectKey,
    seed: Seed,
    mut merge: Merge,
    policy: &RetryPolicy,
) -> Result<Mutated<K>, E>
where
    K: StoredObject,
    S: ObjectStore<K> + ?Sized,
    Seed: Fn() -> K,
    Merge: FnMut(&mut K) -> Result<(), E>,
    E: From<StoreError>,
{
    let kind = kind_of::<K>();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let current = store.get(key).await.map_err(E::from)?;
        let written = match current {
            None => {
                let mut obj = seed();
                merge(&mut obj)?;
                store.create(key, &obj).await.map(|v| (v.object, Outcome::Created))
            }
            Some(cur) => {
                let mut obj = cur.object.clone();
                merge(&mut obj)?;
                if same(&obj, &cur.object) {
                    debug!(kind = %kind, key = %key, "mutate: unchanged");
                    return Ok(Mutated { object: cur.object, outcome: Outcome::Unchanged, attempts: attempt });
                }
                store.replace(key, &obj, &cur.version).await.map(|v| (v.object, Outcome::Updated))
            }
        };
        match written {
            Ok((object, outcome)) => {
                debug!(kind = %kind, key = %key, outcome = outcome.as_str(), attempts = attempt, "mutate: written");
                return Ok(Mutated { object, outcome, attempts: attempt });
            }
            Err(e) if is_retryable(&e) => {
                counter!("peerage_write_conflicts_total", 1, "kind" => kind.clone());
                if attempt >= policy.max_attempts {
                    warn!(kind = %kind, key = %key, attempts = attempt, error = %e, "mutate: giving up");
                    return Err(E::from(conflict_after(&kind, key, attempt, e)));
                }
                warn!(kind = %kind, key = %key, attempt, error = %e, "mutate: conflict, retrying");
                policy.pause(attempt).await;
            }
            Err(e) => return Err(E::from(e)),
        }
    }
}

/// Apply `merge` to the object at `key` if it exists. Returns `None` when absent.
pub async fn update_existing<K, S, Merge, E>(
    store: &S,
    key: &ObjectKey,
    mut merge: Merge,
    policy: &RetryPolicy,
) -> Result<Option<Mutated<K>>, E>
where
    K: StoredObject,
    S: ObjectStore<K> + ?Sized,
    Merge: FnMut(&mut K) -> Result<(), E>,
    E: From<StoreError>,
{
    let kind = kind_of::<K>();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let cur = match store.get(key).await.map_err(E::from)? {
            Some(cur) => cur,
            None => return Ok(None),
        };
        let mut obj = cur.object.clone();
        merge(&mut obj)?;
        if same(&obj, &cur.object) {
            return Ok(Some(Mutated { object: cur.object, outcome: Outcome::Unchanged, attempts: attempt }));
        }
        match store.replace(key, &obj, &cur.version).await {
            Ok(v) => return Ok(Some(Mutated { object: v.object, outcome: Outcome::Updated, attempts: attempt })),
            // Deleted between read and write.
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) if is_retryable(&e) => {
                counter!("peerage_write_conflicts_total", 1, "kind" => kind.clone());
                if attempt >= policy.max_attempts {
                    warn!(kind = %kind, key = %key, attempts = attempt, error = %e, "mutate: giving up");
                    return Err(E::from(conflict_after(&kind, key, attempt, e)));
                }
                warn!(kind = %kind, key = %key, attempt, error = %e, "mutate: conflict, retrying");
                policy.pause(attempt).await;
            }
            Err(e) => return Err(E::from(e)),
        }
    }
}

/// Delete the object at `key`; absence is not an error. Returns whether something was removed.
pub async fn delete_if_exists<K, S>(store: &S, key: &ObjectKey) -> Result<bool, StoreError>
where
    K: StoredObject,
    S: ObjectStore<K> + ?Sized,
{
    let removed = store.delete(key).await?;
    debug!(kind = %kind_of::<K>(), key = %key, removed, "mutate: delete");
    Ok(removed)
}

fn conflict_after(kind: &str, key: &ObjectKey, attempts: u32, last: StoreError) -> StoreError {
    StoreError::Conflict(format!("{} {} after {} attempts: {}", kind, key, attempts, last))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemStore;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn seed() -> ConfigMap { ConfigMap { metadata: ObjectMeta::default(), ..Default::default() } }

    fn set(k: &'static str, v: &'static str) -> impl FnMut(&mut ConfigMap) -> Result<(), StoreError> {
        move |cm| {
            cm.data.get_or_insert_with(BTreeMap::new).insert(k.into(), v.into());
            Ok(())
        }
    }

    #[tokio::test]
    async fn creates_then_updates_then_skips() {
        let store = MemStore::<ConfigMap>::new();
        let key = ObjectKey::namespaced("liqo", "a");
        let p = RetryPolicy::immediate(3);
        let m = create_or_update(&store, &key, seed, set("x", "1"), &p).await.unwrap();
        assert_eq!(m.outcome, Outcome::Created);
        let m = create_or_update(&store, &key, seed, set("x", "2"), &p).await.unwrap();
        assert_eq!(m.outcome, Outcome::Updated);
        let m = create_or_update(&store, &key, seed, set("x", "2"), &p).await.unwrap();
        assert_eq!(m.outcome, Outcome::Unchanged);
        assert_eq!(store.writes(), 2);
    }

    #[tokio::test]
    async fn retries_through_conflicts() {
        let store = MemStore::<ConfigMap>::new();
        let key = ObjectKey::namespaced("liqo", "a");
        let p = RetryPolicy::immediate(3);
        create_or_update(&store, &key, seed, set("x", "1"), &p).await.unwrap();
        store.inject_conflicts(2);
        let m = create_or_update(&store, &key, seed, set("x", "2"), &p).await.unwrap();
        assert_eq!(m.attempts, 3);
        let data = store.object(&key).unwrap().data.unwrap();
        assert_eq!(data.get("x").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn persistent_conflict_exhausts_budget() {
        let store = MemStore::<ConfigMap>::new();
        let key = ObjectKey::namespaced("liqo", "a");
        let p = RetryPolicy::immediate(2);
        create_or_update(&store, &key, seed, set("x", "1"), &p).await.unwrap();
        store.inject_conflicts(5);
        let err = create_or_update(&store, &key, seed, set("x", "2"), &p).await.unwrap_err();
        match err {
            StoreError::Conflict(m) => assert!(m.contains("after 2 attempts"), "{m}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn merge_error_aborts_before_write() {
        let store = MemStore::<ConfigMap>::new();
        let key = ObjectKey::namespaced("liqo", "a");
        let res = create_or_update(&store, &key, seed, |_cm: &mut ConfigMap| Err(StoreError::Invalid("no".into())), &RetryPolicy::immediate(1)).await;
        assert!(res.is_err());
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn update_existing_ignores_absent() {
        let store = MemStore::<ConfigMap>::new();
        let key = ObjectKey::namespaced("liqo", "a");
        let res: Option<Mutated<ConfigMap>> = update_existing(&store, &key, set("x", "1"), &RetryPolicy::immediate(1)).await.unwrap();
        assert!(res.is_none());
        assert!(!delete_if_exists::<ConfigMap, _>(&store, &key).await.unwrap());
    }
}
