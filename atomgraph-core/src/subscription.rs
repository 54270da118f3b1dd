//! Subscriptions
//!
//! A subscription is the store's record of one external consumer, such as a
//! view that calls `watch` while rendering. It holds exactly the edges that
//! consumer created during its most recent evaluation pass.
//!
//! # Lifecycle
//!
//! 1. [`Scope::subscribe`] registers the consumer under a fresh id and the
//!    caller's source location.
//!
//! 2. [`SubscriptionContainer::evaluate`] runs one pass. Edges created in the
//!    pass replace the previous set; atoms that were not watched again lose
//!    this subscriber and become eligible for eviction.
//!
//! 3. When a pass reaches the subscription, its `on_update` callback runs.
//!
//! 4. Dropping the container (or calling `unsubscribe`) removes every edge.

use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::context::Context;
use crate::graph::Consumer;
use crate::scope::Scope;

/// Unique identifier for a subscriber.
///
/// Each external consumer gets a unique ID when it subscribes. The store
/// uses it to attribute edges and to avoid duplicate subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Edge bookkeeping for one external consumer of a scope.
pub struct SubscriptionContainer {
    scope: Scope,
    id: SubscriberId,
    location: &'static Location<'static>,
}

impl SubscriptionContainer {
    pub(crate) fn new(scope: Scope, location: &'static Location<'static>) -> Self {
        let id = SubscriberId::new();
        scope.store().register(id, location);
        Self {
            scope,
            id,
            location,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Where the consumer subscribed.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Run one evaluation pass. Afterwards the subscription watches exactly
    /// the atoms `pass` watched.
    pub fn evaluate<R>(&self, pass: impl FnOnce(&Context) -> R) -> R {
        let context = self.context();
        self.scope
            .store()
            .subscriber_pass(&self.scope, self.id, self.location, || pass(&context))
    }

    /// A context whose watches add to the current edge set without
    /// replacing it.
    pub fn context(&self) -> Context {
        Context::new(self.scope.clone(), Some(Consumer::Subscriber(self.id)))
    }

    /// Call `callback` once per propagating pass that reaches an atom this
    /// subscription watches. Replaces any previous callback.
    pub fn on_update(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.scope
            .store()
            .set_update_callback(self.id, Some(Arc::new(callback)));
    }

    /// Number of atoms currently watched.
    pub fn watch_count(&self) -> usize {
        self.scope.store().watch_count(self.id)
    }

    /// Remove every edge of this subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for SubscriptionContainer {
    fn drop(&mut self) {
        self.scope.store().unsubscribe(&self.scope, self.id);
    }
}

impl fmt::Debug for SubscriptionContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionContainer")
            .field("id", &self.id)
            .field("location", &format_args!("{}", self.location))
            .field("scope", &self.scope.token())
            .finish()
    }
}
