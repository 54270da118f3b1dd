//! Test Harness
//!
//! [`TestContext`] plays the part of a view: it watches atoms through its own
//! subscription, counts how often a propagating pass reached it, and lets
//! async tests wait for the next update.
//!
//! ```rust,ignore
//! #[tokio::test(start_paused = true)]
//! async fn loads_profile() {
//!     let context = TestContext::new();
//!     assert!(context.watch(&Profile).is_running());
//!
//!     assert!(context.wait_for_update(Duration::from_secs(1)).await);
//!     assert!(context.watch(&Profile).is_success());
//! }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::atom::{Atom, StateAtom};
use crate::context::Context;
use crate::scope::Scope;
use crate::subscription::SubscriptionContainer;

/// A scope plus a subscription standing in for an external consumer.
pub struct TestContext {
    scope: Scope,
    subscription: SubscriptionContainer,
    updates: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl TestContext {
    /// A context on a fresh root scope.
    #[track_caller]
    pub fn new() -> Self {
        Self::with_scope(Scope::new())
    }

    /// A context watching atoms in an existing scope.
    #[track_caller]
    pub fn with_scope(scope: Scope) -> Self {
        let subscription = scope.subscribe();
        let updates = Arc::new(AtomicUsize::new(0));
        let notify = Arc::new(Notify::new());

        let (counter, waiters) = (updates.clone(), notify.clone());
        subscription.on_update(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            waiters.notify_waiters();
        });

        Self {
            scope,
            subscription,
            updates,
            notify,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// A context whose watches are recorded on this harness' subscription.
    pub fn context(&self) -> Context {
        self.subscription.context()
    }

    pub fn watch<A, K>(&self, atom: &A) -> A::Produced
    where
        A: Atom<K>,
    {
        self.context().watch(atom)
    }

    pub fn read<A, K>(&self, atom: &A) -> A::Produced
    where
        A: Atom<K>,
    {
        self.scope.read(atom)
    }

    pub fn lookup<A, K>(&self, atom: &A) -> Option<A::Produced>
    where
        A: Atom<K>,
    {
        self.scope.lookup(atom)
    }

    pub fn set<A: StateAtom>(&self, atom: &A, value: A::Value) {
        self.scope.set(atom, value);
    }

    pub fn modify<A: StateAtom>(&self, atom: &A, f: impl FnOnce(&mut A::Value)) {
        self.scope.modify(atom, f);
    }

    pub fn refresh<A, K>(&self, atom: &A)
    where
        A: Atom<K>,
    {
        self.scope.refresh(atom);
    }

    pub fn reset<A, K>(&self, atom: &A)
    where
        A: Atom<K>,
    {
        self.scope.reset(atom);
    }

    pub fn unwatch<A, K>(&self, atom: &A)
    where
        A: Atom<K>,
    {
        self.context().unwatch(atom);
    }

    pub fn override_atom<A, K>(
        &self,
        atom: &A,
        replacement: impl Fn(&A, &Context) -> A::Output + Send + Sync + 'static,
    ) where
        A: Atom<K>,
        K: 'static,
    {
        self.scope.override_atom(atom, replacement);
    }

    /// Propagating passes that reached a watched atom so far.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Wait for the next update. Returns `false` if none arrives in time.
    pub async fn wait_for_update(&self, timeout: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        tokio::time::timeout(timeout, notified).await.is_ok()
    }

    /// Wait until `condition` holds, re-checking after every update.
    /// Returns `false` if it still does not hold when `timeout` expires.
    pub async fn wait_until(&self, timeout: Duration, mut condition: impl FnMut(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if condition(self) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return condition(self);
            }
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
