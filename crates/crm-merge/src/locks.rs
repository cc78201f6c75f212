use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crm_types::ContactId;

use crate::error::{MergeError, MergeResult};

/// A set of keys currently held by in-flight actions.
///
/// Cloning shares the underlying set.
pub struct LockRegistry<K> {
    held: Arc<Mutex<HashSet<K>>>,
}

impl<K> LockRegistry<K>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    pub fn new() -> Self {
        Self {
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Take `key`, or fail with [`MergeError::ItemBusy`] if already held.
    ///
    /// The key is released when the returned guard drops.
    pub fn try_acquire(&self, key: K) -> MergeResult<LockGuard<K>> {
        if !self.set().insert(key.clone()) {
            return Err(MergeError::ItemBusy(key.to_string()));
        }
        Ok(LockGuard {
            held: Arc::clone(&self.held),
            key,
        })
    }

    /// Release `key` explicitly. Returns whether it was held.
    pub fn release(&self, key: &K) -> bool {
        self.set().remove(key)
    }

    pub fn is_held(&self, key: &K) -> bool {
        self.set().contains(key)
    }

    pub fn len(&self) -> usize {
        self.set().len()
    }

    pub fn is_empty(&self) -> bool {
        self.set().is_empty()
    }

    fn set(&self) -> MutexGuard<'_, HashSet<K>> {
        // The set is never left half-updated, so a poisoned lock is still usable.
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K> Clone for LockRegistry<K> {
    fn clone(&self) -> Self {
        Self {
            held: Arc::clone(&self.held),
        }
    }
}

impl<K> Default for LockRegistry<K>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for LockRegistry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let held = self
            .held
            .lock()
            .map(|s| s.len())
            .unwrap_or_else(|e| e.into_inner().len());
        f.debug_struct("LockRegistry").field("held", &held).finish()
    }
}

/// Holds one key of a [`LockRegistry`] until dropped.
pub struct LockGuard<K>
where
    K: Eq + Hash,
{
    held: Arc<Mutex<HashSet<K>>>,
    key: K,
}

impl<K: Eq + Hash> LockGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for LockGuard<K> {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl<K: Eq + Hash + fmt::Debug> fmt::Debug for LockGuard<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LockGuard").field(&self.key).finish()
    }
}

/// Process-wide registry of duplicates that have an open merge session.
#[derive(Clone, Debug, Default)]
pub struct SessionClaims {
    claims: LockRegistry<ContactId>,
}

impl SessionClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `duplicate` for one session.
    pub fn claim(&self, duplicate: &ContactId) -> MergeResult<LockGuard<ContactId>> {
        self.claims
            .try_acquire(duplicate.clone())
            .map_err(|_| MergeError::DuplicateClaimed(duplicate.clone()))
    }

    pub fn is_claimed(&self, duplicate: &ContactId) -> bool {
        self.claims.is_held(duplicate)
    }

    pub fn active(&self) -> usize {
        self.claims.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_busy() {
        let locks: LockRegistry<String> = LockRegistry::new();
        let _guard = locks.try_acquire("emails:1".into()).unwrap();
        let err = locks.try_acquire("emails:1".into()).unwrap_err();
        assert!(matches!(err, MergeError::ItemBusy(ref k) if k == "emails:1"));
        assert!(locks.try_acquire("emails:2".into()).is_ok());
    }

    #[test]
    fn guard_drop_releases() {
        let locks: LockRegistry<String> = LockRegistry::new();
        {
            let guard = locks.try_acquire("tags:7".into()).unwrap();
            assert_eq!(guard.key(), "tags:7");
            assert!(locks.is_held(&"tags:7".to_string()));
        }
        assert!(locks.is_empty());
        assert!(locks.try_acquire("tags:7".into()).is_ok());
    }

    #[test]
    fn explicit_release() {
        let locks: LockRegistry<String> = LockRegistry::new();
        let guard = locks.try_acquire("k".into()).unwrap();
        assert!(locks.release(&"k".to_string()));
        assert!(!locks.release(&"k".to_string()));
        drop(guard);
        assert!(locks.is_empty());
    }

    #[test]
    fn clones_share_state() {
        let a: LockRegistry<String> = LockRegistry::new();
        let b = a.clone();
        let _guard = a.try_acquire("x".into()).unwrap();
        assert!(b.try_acquire("x".into()).is_err());
    }

    #[test]
    fn claims_map_to_duplicate_claimed() {
        let claims = SessionClaims::new();
        let dup = ContactId::parse("c2").unwrap();
        let guard = claims.claim(&dup).unwrap();
        assert!(claims.is_claimed(&dup));
        let err = claims.claim(&dup).unwrap_err();
        assert!(matches!(err, MergeError::DuplicateClaimed(ref id) if *id == dup));
        drop(guard);
        assert_eq!(claims.active(), 0);
    }
}
