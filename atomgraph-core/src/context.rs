//! Evaluation Context
//!
//! A [`Context`] is the handle a consumer uses to talk to the graph during
//! one evaluation pass. It is bound to exactly one scope and, optionally,
//! one consumer: the cell whose producer is running, or an external
//! subscription. Every `watch` made through it records a dependency edge
//! for that consumer.
//!
//! # Cycle Detection
//!
//! While a producer runs, its key sits in the store's set of in-progress
//! evaluations. Watching a key that is already in the set means the
//! producer transitively depends on itself. The `try_*` methods report
//! this as [`AtomError::Cycle`]; the plain methods treat it as the fatal
//! configuration error it is and panic with the evaluation path.
//!
//! [`UpdateContext`] is the narrower handle given to `updated` hooks. It can
//! read and write but cannot watch, so side effects never add edges.

use std::any::type_name;
use std::cell::RefCell;
use std::sync::Arc;

use crate::atom::{Atom, AtomKey, StateAtom};
use crate::error::{AtomError, Result};
use crate::graph::{downcast, AnyValue, Consumer, Graph};
use crate::scope::Scope;

/// Per-evaluation handle onto a scope.
pub struct Context {
    scope: Scope,
    consumer: Option<Consumer>,
}

impl Context {
    pub(crate) fn new(scope: Scope, consumer: Option<Consumer>) -> Self {
        Self { scope, consumer }
    }

    /// The scope this context is bound to.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Current value without creating a dependency edge.
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
        self.scope.try_read(atom)
    }

    /// Current value, recording a dependency of this consumer on `atom`.
    ///
    /// # Panics
    ///
    /// If `atom` is still being evaluated, i.e. the dependency is cyclic.
    pub fn watch<A, K>(&self, atom: &A) -> A::Produced
    where
        A: Atom<K>,
    {
        fatal(self.try_watch(atom))
    }

    pub fn try_watch<A, K>(&self, atom: &A) -> Result<A::Produced>
    where
        A: Atom<K>,
    {
        let key = atom.atom_key();
        let value = self
            .scope
            .store()
            .watch(&self.scope, self.consumer, key, || atom.driver().0)?;
        cast::<A, K>(key, &value)
    }

    /// Cached value, if the atom is alive in this scope. Never computes a
    /// missing atom and records no edge.
    pub fn lookup<A, K>(&self, atom: &A) -> Option<A::Produced>
    where
        A: Atom<K>,
    {
        self.scope.lookup(atom)
    }

    /// Drop this consumer's edge to `atom` before the pass ends.
    pub fn unwatch<A, K>(&self, atom: &A)
    where
        A: Atom<K>,
    {
        if let Some(consumer) = self.consumer {
            self.scope
                .store()
                .unwatch(&self.scope, consumer, atom.atom_key());
        }
    }

    pub fn set<A: StateAtom>(&self, atom: &A, value: A::Value) {
        self.scope.set(atom, value);
    }

    pub fn modify<A: StateAtom>(&self, atom: &A, f: impl FnOnce(&mut A::Value)) {
        self.scope.modify(atom, f);
    }

    /// Cancel the atom's current operation and run its producer again.
    pub fn refresh<A, K>(&self, atom: &A)
    where
        A: Atom<K>,
    {
        self.scope.refresh(atom);
    }

    /// Return a cached atom to the value of its producer.
    pub fn reset<A, K>(&self, atom: &A)
    where
        A: Atom<K>,
    {
        self.scope.reset(atom);
    }

    /// Replace the producer of `atom` within this context's scope.
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

    /// Replace the producer of every atom of type `A` within this scope.
    pub fn override_type<A, K>(
        &self,
        replacement: impl Fn(&A, &Context) -> A::Output + Send + Sync + 'static,
    ) where
        A: Atom<K>,
        K: 'static,
    {
        self.scope.override_type(replacement);
    }

    /// Look up a service supplied when the scope was built.
    pub fn service<S: Send + Sync + 'static>(&self) -> Option<Arc<S>> {
        self.scope.service::<S>()
    }
}

/// Handle passed to `updated` hooks.
pub struct UpdateContext {
    scope: Scope,
}

impl UpdateContext {
    pub(crate) fn new(scope: Scope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
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

    pub fn service<S: Send + Sync + 'static>(&self) -> Option<Arc<S>> {
        self.scope.service::<S>()
    }
}

/// Guard that marks a key as being evaluated.
///
/// The key is removed again when the guard drops, including when the
/// producer panics.
pub(crate) struct EvaluationMarker<'a> {
    graph: &'a RefCell<Graph>,
    key: AtomKey,
}

impl<'a> EvaluationMarker<'a> {
    pub(crate) fn enter(graph: &'a RefCell<Graph>, key: AtomKey) -> Self {
        graph.borrow_mut().evaluating.insert(key);
        Self { graph, key }
    }
}

impl Drop for EvaluationMarker<'_> {
    fn drop(&mut self) {
        if let Ok(mut graph) = self.graph.try_borrow_mut() {
            let popped = graph.evaluating.pop();

            // Evaluations nest, so markers must unwind in order.
            debug_assert_eq!(
                popped,
                Some(self.key),
                "EvaluationMarker mismatch: expected {}",
                self.key
            );
        }
    }
}

/// Downcast a cell value to the type the caller's atom produces.
pub(crate) fn cast<A, K>(key: AtomKey, value: &AnyValue) -> Result<A::Produced>
where
    A: Atom<K>,
{
    downcast::<A::Produced>(value)
        .cloned()
        .ok_or(AtomError::TypeMismatch {
            key,
            expected: type_name::<A::Produced>(),
        })
}

/// Configuration errors are not recoverable through the plain accessors.
pub(crate) fn fatal<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => panic!("{error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::ValueAtom;

    #[derive(Clone, Hash)]
    struct SelfReferencing;

    impl ValueAtom for SelfReferencing {
        type Value = Result<i32>;

        fn value(&self, context: &Context) -> Result<i32> {
            context.try_watch(self).and_then(|inner| inner)
        }
    }

    #[derive(Clone, Hash)]
    struct Loop(u8);

    impl ValueAtom for Loop {
        type Value = u8;

        fn value(&self, context: &Context) -> u8 {
            context.watch(&Loop((self.0 + 1) % 3))
        }
    }

    #[test]
    fn try_watch_reports_self_reference() {
        let scope = Scope::new();
        let error = scope.read(&SelfReferencing).unwrap_err();

        let AtomError::Cycle { path } = error else {
            panic!("expected a cycle, got {error:?}");
        };
        let key = AtomKey::of(&SelfReferencing);
        assert_eq!(path, vec![key, key]);
    }

    #[test]
    #[should_panic(expected = "cyclic dependency")]
    fn watch_panics_on_cycle() {
        let scope = Scope::new();
        scope.read(&Loop(0));
    }

    #[test]
    fn markers_unwind_after_panic() {
        let scope = Scope::new();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            scope.read(&Loop(0));
        }));
        assert!(outcome.is_err());

        scope
            .store()
            .with_graph(|graph| assert!(graph.evaluating.is_empty()));
    }

    #[test]
    fn evaluation_marker_tracks_key() {
        let graph = RefCell::new(Graph::default());
        let key = AtomKey::named("marker");

        {
            let _marker = EvaluationMarker::enter(&graph, key);
            assert!(graph.borrow().evaluating.contains(&key));
        }

        // Marker should be cleaned up after drop
        assert!(graph.borrow().evaluating.is_empty());
    }
}
