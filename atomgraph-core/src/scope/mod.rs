//! Scopes
//!
//! A scope is an isolated instance of the atom graph: its own store, its own
//! override table and an identity token. Scopes nest. A child scope computes
//! its own cells, but when it resolves which producer to run for an atom it
//! walks its override tables from the innermost scope outward, falling back
//! to the atom's own producer.
//!
//! # How Scopes Work
//!
//! 1. A consumer calls `watch` through a [`Context`] bound to one scope.
//!
//! 2. The scope's store fetches or computes the cell. While computing, the
//!    atom's driver asks the scope chain for an override.
//!
//! 3. Mutations (`set`, `modify`, `refresh`, `reset`) only ever touch the
//!    store of the scope they are issued on. Nothing crosses scopes.
//!
//! 4. After each propagating pass the scope's change listeners fire once,
//!    which is the hook an external render loop uses to re-watch.
//!
//! # The Global Scope
//!
//! [`Scope::global`] is a process-wide root created on first use. It is an
//! ordinary scope; nothing in the crate reaches for it implicitly.

mod overrides;
mod services;

use std::any::TypeId;
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::Notify;

use crate::atom::{kind, state_driver, Atom, AtomKey, StateAtom};
use crate::config::{EvictionPolicy, ScopeConfig};
use crate::context::{cast, fatal, Context};
use crate::error::Result;
use crate::graph::AtomStore;
use crate::snapshot::{self, Snapshot};
use crate::subscription::SubscriptionContainer;

pub(crate) use overrides::OverrideFn;
use overrides::OverrideTable;
pub use services::{Services, ServicesBuilder};

/// Unique identifier of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeToken(u64);

impl ScopeToken {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ScopeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

type Listener = Arc<dyn Fn(u64) + Send + Sync>;

pub(crate) struct ScopeInner {
    token: ScopeToken,
    parent: Option<Scope>,
    config: ScopeConfig,
    runtime: Option<Handle>,
    services: Services,
    overrides: RwLock<OverrideTable>,
    store: AtomStore,
    listeners: DashMap<u64, Listener>,

    /// Woken whenever an async result is committed.
    settled: Notify,
}

/// A nestable, isolated atom graph.
///
/// Cloning a scope is cheap and yields another handle to the same graph.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// A root scope with default configuration.
    pub fn new() -> Self {
        ScopeBuilder::new().build()
    }

    pub fn builder() -> ScopeBuilder {
        ScopeBuilder::new()
    }

    /// The process-wide root scope, created on first use.
    pub fn global() -> &'static Scope {
        static GLOBAL: OnceLock<Scope> = OnceLock::new();
        GLOBAL.get_or_init(|| ScopeBuilder::new().label("global").build())
    }

    /// A child scope inheriting this scope's overrides, runtime and
    /// services, with a store of its own.
    pub fn child(&self) -> Scope {
        ScopeBuilder::new().parent(self).build()
    }

    pub fn token(&self) -> ScopeToken {
        self.inner.token
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }

    pub fn config(&self) -> &ScopeConfig {
        &self.inner.config
    }

    /// Runtime async atoms are spawned on: the configured one, else the
    /// runtime of the calling thread.
    pub fn runtime(&self) -> Option<Handle> {
        self.inner
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Current value of `atom`, without subscribing to it.
    ///
    /// An atom that was not alive is computed for this read and released
    /// again right after.
    pub fn read<A, K>(&self, atom: &A) -> A::Produced
    where
        A: Atom<K>,
    {
        fatal(self.try_read(atom))
    }

    pub fn try_read<A, K>(&self, atom: &A) -> Result<A::Produced>
    where
        A: Atom<K>,
    {
        let key = atom.atom_key();
        let value = self.store().read(self, key, || atom.driver().0)?;
        cast::<A, K>(key, &value)
    }

    /// Cached value, if the atom is alive in this scope.
    pub fn lookup<A, K>(&self, atom: &A) -> Option<A::Produced>
    where
        A: Atom<K>,
    {
        let key = atom.atom_key();
        let value = fatal(self.store().lookup(self, key))?;
        Some(fatal(cast::<A, K>(key, &value)))
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    /// Write a state atom and propagate the change. Writing the current
    /// value again does nothing.
    pub fn set<A: StateAtom>(&self, atom: &A, value: A::Value) {
        let key = StateAtom::key(atom);
        fatal(
            self.store()
                .set(self, key, || state_driver(atom), Arc::new(value)),
        );
    }

    /// Update a state atom in place. Runs as one store operation, so no one
    /// observes the value between the read and the write.
    pub fn modify<A: StateAtom>(&self, atom: &A, f: impl FnOnce(&mut A::Value)) {
        let key = StateAtom::key(atom);
        let store = self.store();
        let result = store.batch(self, || {
            let current = store.peek(self, key, || state_driver(atom))?;
            let mut value = cast::<A, kind::State>(key, &current)?;
            f(&mut value);
            store.set(self, key, || state_driver(atom), Arc::new(value))
        });
        fatal(result);
    }

    /// Cancel the atom's in-flight operation and run its producer again,
    /// whether or not it is dirty.
    pub fn refresh<A, K>(&self, atom: &A)
    where
        A: Atom<K>,
    {
        fatal(
            self.store()
                .reevaluate(self, atom.atom_key(), || atom.driver().0, true),
        );
    }

    /// Restore a cached atom to its producer's value, propagating like
    /// `set`. An atom that is not alive is left alone.
    pub fn reset<A, K>(&self, atom: &A)
    where
        A: Atom<K>,
    {
        fatal(
            self.store()
                .reevaluate(self, atom.atom_key(), || atom.driver().0, false),
        );
    }

    /// Refresh `atom` and wait until its new operation has settled.
    pub async fn refreshed<A, K>(&self, atom: &A) -> A::Produced
    where
        A: Atom<K>,
    {
        let key = atom.atom_key();
        let subscription = self.subscribe();

        // Watching an atom that is not alive yet already starts it.
        let cached = self.store().contains(key);
        subscription.context().watch(atom);
        if cached {
            self.refresh(atom);
        }

        loop {
            let settled = self.inner.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            if self.store().is_settled(key) {
                break;
            }
            settled.await;
        }

        subscription.context().read(atom)
    }

    // ------------------------------------------------------------------
    // Overrides
    // ------------------------------------------------------------------

    /// Replace the producer of one atom in this scope and its children.
    ///
    /// A cell already alive in this scope is re-evaluated with the new
    /// producer.
    pub fn override_atom<A, K>(
        &self,
        atom: &A,
        replacement: impl Fn(&A, &Context) -> A::Output + Send + Sync + 'static,
    ) where
        A: Atom<K>,
        K: 'static,
    {
        let key = atom.atom_key();
        self.inner
            .overrides
            .write()
            .insert_key::<A, K>(key, Arc::new(replacement));
        tracing::debug!(scope = %self.token(), %key, "installed atom override");

        self.store()
            .reevaluate_where(self, |driver| driver.key() == key);
    }

    /// Replace the producer of every atom of type `A` in this scope and its
    /// children. Per-atom overrides take precedence within a scope.
    pub fn override_type<A, K>(
        &self,
        replacement: impl Fn(&A, &Context) -> A::Output + Send + Sync + 'static,
    ) where
        A: Atom<K>,
        K: 'static,
    {
        self.inner
            .overrides
            .write()
            .insert_type::<A, K>(Arc::new(replacement));
        tracing::debug!(
            scope = %self.token(),
            atom = std::any::type_name::<A>(),
            "installed type override",
        );

        let atom_type = TypeId::of::<A>();
        self.store()
            .reevaluate_where(self, |driver| driver.atom_type() == atom_type);
    }

    /// Innermost override for `key`, walking up the scope chain.
    pub(crate) fn find_override<A, K>(&self, key: AtomKey) -> Option<OverrideFn<A, K>>
    where
        A: Atom<K>,
        K: 'static,
    {
        let mut current = Some(self);
        while let Some(scope) = current {
            if let Some(found) = scope.inner.overrides.read().find::<A, K>(key) {
                return Some(found);
            }
            current = scope.parent();
        }
        None
    }

    pub(crate) fn override_count(&self) -> usize {
        self.inner.overrides.read().len()
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Register the "value changed" notification. The listener receives
    /// the revision of the pass that fired it, once per propagating pass.
    pub fn on_change(&self, listener: impl Fn(u64) + Send + Sync + 'static) -> ListenerHandle {
        static NEXT_LISTENER: AtomicU64 = AtomicU64::new(0);

        let id = NEXT_LISTENER.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.insert(id, Arc::new(listener));
        ListenerHandle {
            scope: self.downgrade(),
            id: Some(id),
        }
    }

    /// Start tracking an external consumer, identified by the caller's
    /// source location.
    #[track_caller]
    pub fn subscribe(&self) -> SubscriptionContainer {
        SubscriptionContainer::new(self.clone(), Location::caller())
    }

    /// Serializable picture of the cells alive in this scope.
    pub fn snapshot(&self) -> Snapshot {
        snapshot::capture(self)
    }

    /// Evict every unobserved cell that is not keep-alive. Returns how many
    /// were removed. Useful with [`EvictionPolicy::Retain`] or after `set`
    /// on atoms nobody watches.
    pub fn collect_unobserved(&self) -> usize {
        let evicted = self.store().collect_unobserved(self);
        tracing::debug!(scope = %self.token(), evicted, "collected unobserved cells");
        evicted
    }

    /// A service supplied at construction, looked up through the parents.
    pub fn service<S: Send + Sync + 'static>(&self) -> Option<Arc<S>> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if let Some(service) = scope.inner.services.get::<S>() {
                return Some(service);
            }
            current = scope.parent();
        }
        None
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    pub(crate) fn store(&self) -> &AtomStore {
        &self.inner.store
    }

    pub(crate) fn downgrade(&self) -> Weak<ScopeInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<ScopeInner>) -> Option<Scope> {
        weak.upgrade().map(|inner| Scope { inner })
    }

    pub(crate) fn notify_listeners(&self, revision: u64) {
        // Collected first so a listener may drop its own handle.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for listener in listeners {
            listener(revision);
        }
    }

    pub(crate) fn notify_settled(&self) {
        self.inner.settled.notify_waiters();
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("token", &self.inner.token)
            .field("label", &self.inner.config.label)
            .field("parent", &self.parent().map(Scope::token))
            .finish()
    }
}

/// Builder for [`Scope`].
#[derive(Default)]
pub struct ScopeBuilder {
    config: ScopeConfig,
    runtime: Option<Handle>,
    services: Services,
    parent: Option<Scope>,
}

impl ScopeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ScopeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.label = Some(label.into());
        self
    }

    pub fn eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.config.eviction = eviction;
        self
    }

    /// Runtime to spawn async atoms on. Without one, the runtime of the
    /// thread that evaluates the atom is used.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    pub fn parent(mut self, parent: &Scope) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn build(self) -> Scope {
        let runtime = self
            .runtime
            .or_else(|| self.parent.as_ref().and_then(|parent| parent.inner.runtime.clone()));

        let inner = ScopeInner {
            token: ScopeToken::next(),
            parent: self.parent,
            config: self.config,
            runtime,
            services: self.services,
            overrides: RwLock::new(OverrideTable::default()),
            store: AtomStore::new(),
            listeners: DashMap::new(),
            settled: Notify::new(),
        };
        tracing::debug!(
            scope = %inner.token,
            label = ?inner.config.label,
            parent = ?inner.parent.as_ref().map(Scope::token),
            "created scope",
        );

        Scope {
            inner: Arc::new(inner),
        }
    }
}

/// Keeps a change listener registered. Dropping it removes the listener.
#[must_use = "the listener is removed when the handle is dropped"]
pub struct ListenerHandle {
    scope: Weak<ScopeInner>,
    id: Option<u64>,
}

impl ListenerHandle {
    /// Keep the listener for the scope's whole lifetime.
    pub fn detach(mut self) {
        self.id = None;
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let (Some(id), Some(scope)) = (self.id, self.scope.upgrade()) {
            scope.listeners.remove(&id);
        }
    }
}
