//! In-flight render registry.
//!
//! At most one render per cache key runs in this process at a time. The
//! first request to claim a key becomes its owner; everyone else receives a
//! signal that resolves when the owner's [`RenderGuard`] is dropped, whether
//! the render succeeded, failed or panicked.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::{FutureExt, Shared};
use tokio::sync::oneshot;

use crate::cache::CacheKey;

type Signal = Shared<oneshot::Receiver<()>>;

#[derive(Clone, Default)]
pub struct PendingRenders {
    inner: Arc<DashMap<CacheKey, Signal>>,
}

pub enum Claim {
    Owner(RenderGuard),
    Waiter(PendingSignal),
}

impl PendingRenders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, key: &CacheKey) -> Claim {
        match self.inner.entry(key.clone()) {
            Entry::Occupied(entry) => Claim::Waiter(PendingSignal(entry.get().clone())),
            Entry::Vacant(slot) => {
                let (done, signal) = oneshot::channel();
                slot.insert(signal.shared());
                Claim::Owner(RenderGuard {
                    key: key.clone(),
                    pending: Arc::clone(&self.inner),
                    _done: done,
                })
            }
        }
    }

    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Ownership of one key's render slot.
pub struct RenderGuard {
    key: CacheKey,
    pending: Arc<DashMap<CacheKey, Signal>>,
    _done: oneshot::Sender<()>,
}

impl RenderGuard {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for RenderGuard {
    fn drop(&mut self) {
        // The entry goes first; waiters are woken when `_done` drops after
        // this body returns, and must find the slot free.
        self.pending.remove(&self.key);
    }
}

pub struct PendingSignal(Signal);

impl PendingSignal {
    pub async fn wait(self) {
        let _ = self.0.await;
    }
}
