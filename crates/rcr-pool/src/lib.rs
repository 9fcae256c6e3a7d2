// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! The shared-node pool: a process-wide, reference-counted, lazily
//! initialized resource table.
//!
//! Used by broker-backed nodes (MQTT, etc.): a resource is keyed by the
//! parts of its configuration that determine identity (e.g. the broker
//! address), created once under a once-barrier the first time any node asks
//! for it, and torn down via a close hook exactly when the last holder
//! releases it.
//!
//! The pool is typed per resource kind (`SharedNodePool<R>`) rather than a
//! single process-wide table of erased `any` values keyed by
//! `(nodeType, resourceKey)` — each node type owns (or is handed) one
//! `SharedNodePool<R>` for its own resource type `R`, and the `resourceKey`
//! axis alone is sufficient because the type parameter already separates
//! node types. See `DESIGN.md`.

use rcr_core::RuleError;
use std::collections::HashMap;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::OnceCell;

struct Slot<R: Send + Sync + 'static> {
    once: OnceCell<R>,
    refcount: AtomicUsize,
    closer: Box<dyn Fn(&R) + Send + Sync>,
}

type EntryMap<R> = Arc<RwLock<HashMap<String, Arc<Slot<R>>>>>;

/// A process-wide table of lazily initialized, reference-counted resources
/// of type `R`, keyed by resource identity string.
pub struct SharedNodePool<R: Send + Sync + 'static> {
    entries: EntryMap<R>,
}

impl<R: Send + Sync + 'static> Default for SharedNodePool<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Send + Sync + 'static> Clone for SharedNodePool<R> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<R: Send + Sync + 'static> SharedNodePool<R> {
    /// An empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the resource registered under `key`, initializing it via `init`
    /// under a once-barrier if this is the first request for that key.
    /// `close` runs exactly once, when the refcount returns to zero.
    ///
    /// Returns a [`PoolHandle`] that decrements the refcount (and may run
    /// `close`) when dropped.
    pub async fn get_or_init<F, Fut>(
        &self,
        key: &str,
        init: F,
        close: impl Fn(&R) + Send + Sync + 'static,
    ) -> Result<PoolHandle<R>, RuleError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, RuleError>>,
    {
        let slot = {
            let mut guard = self.entries.write().expect("pool lock poisoned");
            guard
                .entry(key.to_string())
                .or_insert_with(|| {
                    Arc::new(Slot {
                        once: OnceCell::new(),
                        refcount: AtomicUsize::new(0),
                        closer: Box::new(close),
                    })
                })
                .clone()
        };

        slot.once.get_or_try_init(init).await?;
        slot.refcount.fetch_add(1, Ordering::SeqCst);

        Ok(PoolHandle {
            entries: self.entries.clone(),
            key: key.to_string(),
            slot,
        })
    }

    /// The number of distinct keys currently resident in the pool.
    #[must_use]
    pub fn resident_keys(&self) -> usize {
        self.entries.read().expect("pool lock poisoned").len()
    }
}

/// A held reference into a [`SharedNodePool`]. Dereferences to the
/// underlying resource; dropping it releases one reference, running the
/// pool's close hook and evicting the entry if this was the last one.
pub struct PoolHandle<R: Send + Sync + 'static> {
    entries: EntryMap<R>,
    key: String,
    slot: Arc<Slot<R>>,
}

impl<R: Send + Sync + 'static> Deref for PoolHandle<R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.slot.once.get().expect("slot initialized before handle is constructed")
    }
}

impl<R: Send + Sync + 'static> Drop for PoolHandle<R> {
    fn drop(&mut self) {
        if self.slot.refcount.fetch_sub(1, Ordering::SeqCst) == 1 {
            let mut guard = self.entries.write().expect("pool lock poisoned");
            // Re-check under the lock: another `get_or_init` may have raced
            // in and bumped the refcount back up before we could evict.
            if self.slot.refcount.load(Ordering::SeqCst) == 0 {
                guard.remove(&self.key);
                if let Some(resource) = self.slot.once.get() {
                    tracing::debug!(key = %self.key, "shared-node pool entry released, closing");
                    (self.slot.closer)(resource);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize as StdAtomicUsize, Ordering as StdOrdering};
    use std::sync::Arc as StdArc;

    #[tokio::test]
    async fn concurrent_gets_with_same_key_share_one_resource() {
        let pool: SharedNodePool<String> = SharedNodePool::new();
        let init_calls = StdArc::new(StdAtomicUsize::new(0));
        let calls = init_calls.clone();
        let h1 = pool
            .get_or_init(
                "broker:1883",
                || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, StdOrdering::SeqCst);
                        Ok("client".to_string())
                    }
                },
                |_| {},
            )
            .await
            .unwrap();
        let h2 = pool
            .get_or_init(
                "broker:1883",
                || async { Ok("client".to_string()) },
                |_| {},
            )
            .await
            .unwrap();
        assert_eq!(init_calls.load(StdOrdering::SeqCst), 1);
        assert_eq!(*h1, "client");
        assert_eq!(*h2, "client");
        assert_eq!(pool.resident_keys(), 1);
    }

    #[tokio::test]
    async fn different_keys_get_independent_resources() {
        let pool: SharedNodePool<String> = SharedNodePool::new();
        let h1 = pool
            .get_or_init("a", || async { Ok("A".to_string()) }, |_| {})
            .await
            .unwrap();
        let h2 = pool
            .get_or_init("b", || async { Ok("B".to_string()) }, |_| {})
            .await
            .unwrap();
        assert_eq!(*h1, "A");
        assert_eq!(*h2, "B");
        assert_eq!(pool.resident_keys(), 2);
    }

    #[tokio::test]
    async fn close_hook_runs_only_when_last_handle_drops() {
        let pool: SharedNodePool<String> = SharedNodePool::new();
        let closed = StdArc::new(StdAtomicUsize::new(0));
        let closed_for_hook = closed.clone();
        let h1 = pool
            .get_or_init(
                "k",
                || async { Ok("v".to_string()) },
                move |_| {
                    closed_for_hook.fetch_add(1, StdOrdering::SeqCst);
                },
            )
            .await
            .unwrap();
        let h2 = pool
            .get_or_init("k", || async { Ok("v".to_string()) }, |_| {})
            .await
            .unwrap();
        drop(h1);
        assert_eq!(closed.load(StdOrdering::SeqCst), 0, "still one live handle");
        assert_eq!(pool.resident_keys(), 1);
        drop(h2);
        assert_eq!(closed.load(StdOrdering::SeqCst), 1);
        assert_eq!(pool.resident_keys(), 0);
    }

    #[tokio::test]
    async fn key_can_be_reacquired_after_full_release() {
        let pool: SharedNodePool<String> = SharedNodePool::new();
        let init_calls = StdArc::new(StdAtomicUsize::new(0));

        let calls1 = init_calls.clone();
        let h1 = pool
            .get_or_init(
                "k",
                move || async move {
                    calls1.fetch_add(1, StdOrdering::SeqCst);
                    Ok("v1".to_string())
                },
                |_| {},
            )
            .await
            .unwrap();
        drop(h1);

        let calls2 = init_calls.clone();
        let h2 = pool
            .get_or_init(
                "k",
                move || async move {
                    calls2.fetch_add(1, StdOrdering::SeqCst);
                    Ok("v2".to_string())
                },
                |_| {},
            )
            .await
            .unwrap();
        assert_eq!(init_calls.load(StdOrdering::SeqCst), 2);
        assert_eq!(*h2, "v2");
    }
}
