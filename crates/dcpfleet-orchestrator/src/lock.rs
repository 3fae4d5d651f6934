//! Per-deployment exclusive locks
//!
//! Every lifecycle operation and every reconciliation pass holds the lock of
//! the deployment it touches. Holders register a cancellation token so that
//! `destroy()` can interrupt an in-flight deploy instead of waiting for it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    holder: Option<(u64, CancellationToken)>,
}

#[derive(Default)]
pub struct DeploymentLocks {
    slots: Mutex<HashMap<String, Slot>>,
    next_id: AtomicU64,
}

impl DeploymentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn mutex(&self, name: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(&self.slots().entry(name.to_string()).or_default().mutex)
    }

    /// Take the lock only if it is free.
    pub fn try_acquire(self: &Arc<Self>, name: &str) -> Option<DeploymentGuard> {
        let guard = self.mutex(name).try_lock_owned().ok()?;
        Some(self.register(name, guard))
    }

    /// Take the lock, waiting at most `wait` for the current holder.
    pub async fn acquire(self: &Arc<Self>, name: &str, wait: Duration) -> Option<DeploymentGuard> {
        if wait.is_zero() {
            return self.try_acquire(name);
        }
        let mutex = self.mutex(name);
        let guard = tokio::time::timeout(wait, mutex.lock_owned()).await.ok()?;
        Some(self.register(name, guard))
    }

    fn register(self: &Arc<Self>, name: &str, guard: OwnedMutexGuard<()>) -> DeploymentGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.slots()
            .entry(name.to_string())
            .or_default()
            .holder = Some((id, token.clone()));
        DeploymentGuard {
            locks: Arc::clone(self),
            name: name.to_string(),
            id,
            token,
            _guard: guard,
        }
    }

    /// Signal the current holder to stop. Returns whether anyone held the lock.
    pub fn cancel(&self, name: &str) -> bool {
        match self.slots().get(name).and_then(|slot| slot.holder.as_ref()) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.slots()
            .get(name)
            .is_some_and(|slot| slot.mutex.try_lock().is_err())
    }
}

/// Exclusive access to one deployment; released on drop
pub struct DeploymentGuard {
    locks: Arc<DeploymentLocks>,
    name: String,
    id: u64,
    token: CancellationToken,
    _guard: OwnedMutexGuard<()>,
}

impl DeploymentGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fires when another operation asks this holder to stop
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for DeploymentGuard {
    fn drop(&mut self) {
        let mut slots = self.locks.slots();
        let Some(slot) = slots.get_mut(&self.name) else {
            return;
        };
        if slot.holder.as_ref().is_some_and(|(holder, _)| *holder == self.id) {
            slot.holder = None;
        }
        // the slot and this guard are the only references: nobody is waiting
        if Arc::strong_count(&slot.mutex) <= 2 {
            slots.remove(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exclusive_per_name() {
        let locks = Arc::new(DeploymentLocks::new());
        let first = locks.try_acquire("a").unwrap();
        assert!(locks.try_acquire("a").is_none());
        assert!(locks.try_acquire("b").is_some());
        assert!(locks.is_locked("a"));

        drop(first);
        assert!(!locks.is_locked("a"));
        assert!(locks.try_acquire("a").is_some());
    }

    #[tokio::test]
    async fn test_bounded_wait() {
        let locks = Arc::new(DeploymentLocks::new());
        let held = locks.try_acquire("a").unwrap();
        assert!(locks.acquire("a", Duration::from_millis(20)).await.is_none());

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.acquire("a", Duration::from_secs(5)).await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_reaches_holder() {
        let locks = Arc::new(DeploymentLocks::new());
        assert!(!locks.cancel("a"));

        let guard = locks.try_acquire("a").unwrap();
        assert!(locks.cancel("a"));
        assert!(guard.is_cancelled());
        drop(guard);

        // a new holder starts with a fresh token
        let guard = locks.try_acquire("a").unwrap();
        assert!(!guard.is_cancelled());
    }

    #[tokio::test]
    async fn test_slots_pruned() {
        let locks = Arc::new(DeploymentLocks::new());
        assert!(!locks.cancel("unknown"));
        assert!(!locks.is_locked("unknown"));
        assert!(locks.slots().is_empty());

        let held = locks.try_acquire("a").unwrap();
        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let guard = locks.acquire("a", Duration::from_secs(5)).await;
                guard.is_some()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        // a waiter keeps the slot alive across the hand-over
        drop(held);
        assert!(waiter.await.unwrap());
        assert!(locks.slots().is_empty());
    }
}
