//! ExpansionLatch - "expand on click, load once" guard
//!
//! Wraps an asynchronous population routine with a per-key idempotency latch:
//!
//! ```text
//! Unloaded ──run──▶ Loading ──ok──▶ Loaded
//!     ▲                │
//!     └─────err────────┘
//! ```
//!
//! While a key is `Loading`, further `run` calls await the in-flight routine instead of starting
//! a new one. After `Loaded`, `run` is a no-op. A failed routine returns the key to `Unloaded`
//! so the next request retries. The transition out of `Loading` happens inside the shared
//! future itself, so it happens exactly once even if every caller is dropped mid-flight.

use crate::Result;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lazy-load state of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LoadState {
    /// Collapsed and not loaded (never requested, or last attempt failed)
    Unloaded,
    Loading,
    Loaded,
}

type InFlight = Shared<BoxFuture<'static, Result<()>>>;

enum Slot {
    /// `ticket` identifies the run, so a run detached by `clear` never settles a newer one
    Loading { ticket: u64, in_flight: InFlight },
    Loaded,
}

type Observer<K> = Arc<dyn Fn(&K, LoadState) + Send + Sync>;

/// Per-key load-once latch
pub struct ExpansionLatch<K> {
    slots: Arc<DashMap<K, Slot>>,
    tickets: AtomicU64,
    observer: Option<Observer<K>>,
}

impl<K> Default for ExpansionLatch<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> ExpansionLatch<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            tickets: AtomicU64::new(0),
            observer: None,
        }
    }

    /// Call `observer` on every state transition (never while the latch is locked)
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&K, LoadState) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Current state of `key`
    pub fn state(&self, key: &K) -> LoadState {
        match self.slots.get(key).as_deref() {
            Some(Slot::Loading { .. }) => LoadState::Loading,
            Some(Slot::Loaded) => LoadState::Loaded,
            None => LoadState::Unloaded,
        }
    }

    /// Run `populate` for `key` unless it is already loading or loaded
    ///
    /// Concurrent callers for the same key all receive the outcome of the single in-flight run.
    pub async fn run<F, Fut>(&self, key: K, populate: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (in_flight, started) = match self.slots.entry(key.clone()) {
            Entry::Occupied(entry) => match entry.get() {
                Slot::Loaded => return Ok(()),
                Slot::Loading { in_flight, .. } => (in_flight.clone(), false),
            },
            Entry::Vacant(entry) => {
                let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
                let in_flight = self.settle_after(key.clone(), ticket, populate());
                entry.insert(Slot::Loading {
                    ticket,
                    in_flight: in_flight.clone(),
                });
                (in_flight, true)
            }
        };

        if started {
            self.notify(&key, LoadState::Loading);
        }
        in_flight.await
    }

    /// Forget every key (used when the owner reloads from scratch)
    ///
    /// Routines still in flight complete normally but no longer update any slot.
    pub fn clear(&self) {
        self.slots.clear();
    }

    fn settle_after<Fut>(&self, key: K, ticket: u64, populate: Fut) -> InFlight
    where
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let slots = Arc::clone(&self.slots);
        let observer = self.observer.clone();
        let owns =
            move |slot: &Slot| matches!(slot, Slot::Loading { ticket: t, .. } if *t == ticket);

        async move {
            let outcome = populate.await;

            let next = match outcome {
                Ok(()) => LoadState::Loaded,
                Err(_) => LoadState::Unloaded,
            };
            let settled = match next {
                LoadState::Loaded => match slots.get_mut(&key) {
                    Some(mut slot) if owns(&slot) => {
                        *slot = Slot::Loaded;
                        true
                    }
                    _ => false,
                },
                _ => slots.remove_if(&key, |_, slot| owns(slot)).is_some(),
            };

            if settled && let Some(observer) = observer {
                observer(&key, next);
            }
            outcome
        }
        .boxed()
        .shared()
    }

    fn notify(&self, key: &K, state: LoadState) {
        if let Some(observer) = &self.observer {
            observer(key, state);
        }
    }
}
