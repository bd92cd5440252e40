//! Per-document mutual exclusion.
//!
//! The existence check and the insert that follows it must not interleave
//! with another attempt on the same filename, so every indexing path holds
//! a [`DocumentGuard`] from before the check until after the ledger update.
//!
//! Locks are created on demand and held weakly by the map; entries whose
//! lock is no longer referenced are pruned on the next acquire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::OwnedMutexGuard;

/// Map of filename to async lock.
#[derive(Default)]
pub struct DocumentLocks {
    locks: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

/// Exclusive hold on one document identity. Released on drop.
pub struct DocumentGuard {
    identity: String,
    _guard: OwnedMutexGuard<()>,
}

impl DocumentGuard {
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl std::fmt::Debug for DocumentGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentGuard")
            .field("identity", &self.identity)
            .finish()
    }
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `identity`.
    pub async fn acquire(&self, identity: &str) -> DocumentGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, weak| weak.strong_count() > 0);
            match locks.get(identity).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(tokio::sync::Mutex::new(()));
                    locks.insert(identity.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        DocumentGuard {
            identity: identity.to_string(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of identities with a live lock.
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_identity_is_exclusive() {
        let locks = Arc::new(DocumentLocks::new());
        let guard = locks.acquire("a.pdf").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.acquire("a.pdf").await.identity().to_string() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        assert_eq!(contender.await.unwrap(), "a.pdf");
    }

    #[tokio::test]
    async fn different_identities_do_not_block() {
        let locks = DocumentLocks::new();
        let _a = locks.acquire("a.pdf").await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.acquire("b.pdf")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn released_locks_are_pruned() {
        let locks = DocumentLocks::new();
        drop(locks.acquire("a.pdf").await);
        drop(locks.acquire("b.pdf").await);
        assert_eq!(locks.active(), 0);

        let _c = locks.acquire("c.pdf").await;
        assert_eq!(locks.active(), 1);
        assert_eq!(locks.locks.lock().unwrap().len(), 1);
    }
}
