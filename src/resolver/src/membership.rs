use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::tree::MembershipMap;

/// Current members of one service.
///
/// Readers take an `Arc` snapshot without locking; every mutation builds a new
/// map and swaps it in (read-copy-update), so a reader sees either the map
/// before or after a mutation and never anything in between.
#[derive(Debug)]
pub struct MembershipStore {
    members: ArcSwap<MembershipMap>,
}

impl Default for MembershipStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MembershipStore {
    pub fn new() -> Self {
        Self {
            members: ArcSwap::from_pointee(MembershipMap::new()),
        }
    }

    pub fn snapshot(&self) -> Arc<MembershipMap> {
        self.members.load_full()
    }

    pub fn len(&self) -> usize {
        self.members.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.load().is_empty()
    }

    /// Insert or overwrite one instance. Empty endpoints are refused.
    /// Returns whether membership changed.
    pub fn upsert(&self, key: &str, endpoint: &str) -> bool {
        if endpoint.is_empty() {
            return false;
        }
        if self.members.load().get(key).map(String::as_str) == Some(endpoint) {
            return false;
        }

        self.members.rcu(|current| {
            let mut next = MembershipMap::clone(current);
            next.insert(key.to_string(), endpoint.to_string());
            next
        });
        true
    }

    /// Remove one instance; absent keys are a no-op
    pub fn remove(&self, key: &str) -> bool {
        if !self.members.load().contains_key(key) {
            return false;
        }

        let mut removed = false;
        self.members.rcu(|current| {
            let mut next = MembershipMap::clone(current);
            removed = next.remove(key).is_some();
            next
        });
        removed
    }

    /// Remove `key` and every instance stored below it. Returns how many
    /// instances were dropped.
    pub fn remove_tree(&self, key: &str) -> usize {
        let dir = format!("{}/", key.trim_end_matches('/'));
        let covered = |candidate: &String| candidate == key || candidate.starts_with(&dir);

        if !self.members.load().keys().any(covered) {
            return 0;
        }

        let mut removed = 0;
        self.members.rcu(|current| {
            let mut next = MembershipMap::clone(current);
            next.retain(|candidate, _| !covered(candidate));
            removed = current.len() - next.len();
            next
        });
        removed
    }

    /// Upsert every entry of `members` in a single step
    pub fn merge(&self, members: MembershipMap) -> bool {
        let current = self.members.load();
        let fresh = members
            .iter()
            .any(|(key, endpoint)| !endpoint.is_empty() && current.get(key) != Some(endpoint));
        if !fresh {
            return false;
        }
        drop(current);

        self.members.rcu(|current| {
            let mut next = MembershipMap::clone(current);
            for (key, endpoint) in &members {
                if !endpoint.is_empty() {
                    next.insert(key.clone(), endpoint.clone());
                }
            }
            next
        });
        true
    }

    /// Swap in a complete membership. Returns whether it differs from the
    /// previous one.
    pub fn replace(&self, mut members: MembershipMap) -> bool {
        members.retain(|_, endpoint| !endpoint.is_empty());
        let next = Arc::new(members);
        let previous = self.members.swap(Arc::clone(&next));
        *previous != *next
    }

    /// All endpoints in map iteration order
    pub fn endpoints(&self) -> Vec<String> {
        self.members.load().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> MembershipMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = MembershipStore::new();
        assert!(store.upsert("/svc/a", "tcp://a:1"));
        assert!(!store.upsert("/svc/a", "tcp://a:1"));
        assert_eq!(store.len(), 1);

        // Overwrite with a new endpoint
        assert!(store.upsert("/svc/a", "tcp://a:2"));
        assert_eq!(store.endpoints(), vec!["tcp://a:2".to_string()]);
    }

    #[test]
    fn test_upsert_refuses_empty_endpoint() {
        let store = MembershipStore::new();
        assert!(!store.upsert("/svc/a", ""));
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_unknown_key_is_noop() {
        let store = MembershipStore::new();
        store.upsert("/svc/a", "tcp://a:1");

        assert!(!store.remove("/svc/missing"));
        assert_eq!(store.len(), 1);

        assert!(store.remove("/svc/a"));
        assert!(store.is_empty());
        assert!(!store.remove("/svc/a"));
    }

    #[test]
    fn test_remove_tree_drops_descendants_only() {
        let store = MembershipStore::new();
        store.merge(map(&[
            ("/svc/prod/h1/c1", "tcp://1:1"),
            ("/svc/prod/h1/c2", "tcp://1:2"),
            ("/svc/prod/h2/c1", "tcp://2:1"),
            ("/svc/prod/h10/c1", "tcp://10:1"),
        ]));

        assert_eq!(store.remove_tree("/svc/prod/h1"), 2);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_key("/svc/prod/h10/c1"));

        assert_eq!(store.remove_tree("/svc/prod/h1"), 0);
        assert_eq!(store.remove_tree("/svc/prod/h2/c1"), 1);
    }

    #[test]
    fn test_replace_discards_absent_members() {
        let store = MembershipStore::new();
        store.merge(map(&[("/svc/a", "tcp://a:1"), ("/svc/b", "tcp://b:1")]));

        assert!(store.replace(map(&[("/svc/b", "tcp://b:1"), ("/svc/c", "tcp://c:1")])));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot.contains_key("/svc/a"));

        assert!(!store.replace(map(&[("/svc/b", "tcp://b:1"), ("/svc/c", "tcp://c:1")])));
    }

    #[test]
    fn test_merge_keeps_existing_members() {
        let store = MembershipStore::new();
        store.upsert("/svc/a", "tcp://a:1");

        assert!(store.merge(map(&[("/svc/b", "tcp://b:1"), ("/svc/c", "")])));
        assert_eq!(store.len(), 2);
        assert!(!store.merge(map(&[("/svc/b", "tcp://b:1")])));
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_mutations() {
        let store = MembershipStore::new();
        store.upsert("/svc/a", "tcp://a:1");

        let before = store.snapshot();
        store.upsert("/svc/b", "tcp://b:1");
        store.remove("/svc/a");

        assert_eq!(*before, map(&[("/svc/a", "tcp://a:1")]));
        assert_eq!(*store.snapshot(), map(&[("/svc/b", "tcp://b:1")]));
    }

    #[test]
    fn test_concurrent_writers_do_not_lose_updates() {
        let store = MembershipStore::new();

        std::thread::scope(|scope| {
            for writer in 0..4 {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..50 {
                        store.upsert(&format!("/svc/{writer}/{i}"), "tcp://x:1");
                    }
                });
            }
            let store = &store;
            scope.spawn(move || {
                for _ in 0..100 {
                    let snapshot = store.snapshot();
                    assert!(snapshot.values().all(|endpoint| !endpoint.is_empty()));
                }
            });
        });

        assert_eq!(store.len(), 200);
    }
}
