//! Atom Store
//!
//! The store owns every cell of one scope and implements the graph
//! algorithms: fetch-or-compute on watch, commit-and-propagate on set,
//! cancellation of superseded async work, and eviction of unobserved cells.
//!
//! # Serialization
//!
//! All graph state sits behind a `parking_lot::ReentrantMutex`. Holding the
//! lock is the single execution context the graph is mutated on. The thread
//! that holds it may re-enter, which is what lets a producer call `watch`
//! while its own evaluation is in progress. Other threads, including tokio
//! workers delivering async results, queue up on the lock.
//!
//! The inner `RefCell` is only ever borrowed for short, non-reentrant
//! sections. No borrow is held while user code (producers, hooks, listeners)
//! runs.
//!
//! # Deferred work
//!
//! `updated` hooks and change notifications are queued while an operation is
//! in progress and flushed when the outermost operation finishes, so they
//! always observe a consistent graph.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::panic::Location;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::atom::AtomKey;
use crate::config::EvictionPolicy;
use crate::context::{Context, EvaluationMarker, UpdateContext};
use crate::error::{AtomError, Result};
use crate::scope::Scope;
use crate::subscription::SubscriberId;

use super::cell::{Cell, CellId, Consumer};
use super::driver::{AnyValue, Driver, Job, PhaseSink};

/// Callback registered by an external subscription.
pub(crate) type UpdateCallback = Arc<dyn Fn() + Send + Sync>;

/// Bookkeeping for one external consumer.
pub(crate) struct SubscriptionEntry {
    pub(crate) location: &'static Location<'static>,
    pub(crate) watching: IndexSet<CellId>,
    pub(crate) on_update: Option<UpdateCallback>,
}

/// Work that runs once the outermost operation completes.
pub(crate) enum Deferred {
    Updated {
        driver: Arc<dyn Driver>,
        new: AnyValue,
        old: AnyValue,
    },
    Notify {
        revision: u64,
        subscribers: Vec<SubscriberId>,
    },
}

/// Mutable graph state.
#[derive(Default)]
pub(crate) struct Graph {
    pub(crate) cells: SlotMap<CellId, Cell>,
    pub(crate) index: HashMap<AtomKey, CellId>,
    pub(crate) subscriptions: HashMap<SubscriberId, SubscriptionEntry>,

    /// Keys whose producer is currently running.
    pub(crate) evaluating: IndexSet<AtomKey>,

    /// Incremented once per propagating pass.
    pub(crate) revision: u64,
    pub(crate) propagating: bool,
    pub(crate) queued: VecDeque<CellId>,

    pub(crate) deferred: VecDeque<Deferred>,
    depth: usize,
}

/// One lock acquisition. Tracks nesting so deferred work runs exactly when
/// the outermost operation ends.
struct Operation<'a> {
    guard: ReentrantMutexGuard<'a, RefCell<Graph>>,
    open: bool,
}

impl Operation<'_> {
    fn graph(&self) -> &RefCell<Graph> {
        &self.guard
    }

    /// Leave the operation. Returns true if it was the outermost one.
    fn leave(&mut self) -> bool {
        self.open = false;
        let mut graph = self.guard.borrow_mut();
        graph.depth -= 1;
        graph.depth == 0
    }
}

impl Drop for Operation<'_> {
    fn drop(&mut self) {
        // Only reached with `open` set when a producer panicked.
        if self.open {
            if let Ok(mut graph) = self.guard.try_borrow_mut() {
                graph.depth = graph.depth.saturating_sub(1);
            }
        }
    }
}

/// The cell store of one scope.
#[derive(Default)]
pub(crate) struct AtomStore {
    graph: ReentrantMutex<RefCell<Graph>>,
}

impl AtomStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn enter(&self) -> Operation<'_> {
        let guard = self.graph.lock();
        guard.borrow_mut().depth += 1;
        Operation { guard, open: true }
    }

    fn finish(&self, mut operation: Operation<'_>, scope: &Scope) {
        if operation.leave() {
            self.flush(scope, operation.graph());
        }
    }

    /// Run `f` as a single operation. Nested store calls made by `f` are
    /// serialized with it, and deferred work runs after `f` returns.
    pub(crate) fn batch<R>(&self, scope: &Scope, f: impl FnOnce() -> R) -> R {
        let operation = self.enter();
        let result = f();
        self.finish(operation, scope);
        result
    }

    /// Read with an optional dependency edge.
    pub(crate) fn watch(
        &self,
        scope: &Scope,
        consumer: Option<Consumer>,
        key: AtomKey,
        driver: impl FnOnce() -> Arc<dyn Driver>,
    ) -> Result<AnyValue> {
        let operation = self.enter();
        let graph = operation.graph();

        let result = self.resolve(scope, graph, key, driver).and_then(|id| {
            if let Some(consumer) = consumer {
                link(graph, consumer, id);
            }
            current_value(graph, key, id)
        });

        self.finish(operation, scope);
        result
    }

    /// Read without an edge. A cell created only for this read is released
    /// again straight away.
    pub(crate) fn read(
        &self,
        scope: &Scope,
        key: AtomKey,
        driver: impl FnOnce() -> Arc<dyn Driver>,
    ) -> Result<AnyValue> {
        let operation = self.enter();
        let graph = operation.graph();

        let cached = graph.borrow().index.contains_key(&key);
        let result = self.resolve(scope, graph, key, driver).and_then(|id| {
            let value = current_value(graph, key, id);
            if !cached {
                self.release(scope, graph, [id]);
            }
            value
        });

        self.finish(operation, scope);
        result
    }

    /// Cached value only. Recomputes a dirty cell but never creates one.
    pub(crate) fn lookup(&self, scope: &Scope, key: AtomKey) -> Result<Option<AnyValue>> {
        let operation = self.enter();
        let graph = operation.graph();

        let existing = graph.borrow().index.get(&key).copied();
        let result = match existing {
            Some(id) => self
                .resolve(scope, graph, key, || unreachable_driver(key))
                .and_then(|_| current_value(graph, key, id))
                .map(Some),
            None => Ok(None),
        };

        self.finish(operation, scope);
        result
    }

    pub(crate) fn contains(&self, key: AtomKey) -> bool {
        self.graph.lock().borrow().index.contains_key(&key)
    }

    /// Current value, computing the cell if needed, without creating an edge
    /// or releasing it. Used by `modify`.
    pub(crate) fn peek(
        &self,
        scope: &Scope,
        key: AtomKey,
        driver: impl FnOnce() -> Arc<dyn Driver>,
    ) -> Result<AnyValue> {
        let operation = self.enter();
        let graph = operation.graph();
        let result = self
            .resolve(scope, graph, key, driver)
            .and_then(|id| current_value(graph, key, id));
        self.finish(operation, scope);
        result
    }

    /// Write a new value and propagate it, unless it equals the current one.
    pub(crate) fn set(
        &self,
        scope: &Scope,
        key: AtomKey,
        driver: impl FnOnce() -> Arc<dyn Driver>,
        value: AnyValue,
    ) -> Result<()> {
        let operation = self.enter();
        let graph = operation.graph();

        let result = self.resolve(scope, graph, key, driver).map(|id| {
            let changed = {
                let mut graph = graph.borrow_mut();
                let cell = &mut graph.cells[id];
                let driver = cell.driver().clone();
                let unchanged = cell
                    .value()
                    .is_some_and(|old| driver.same_value(old, &value));

                if unchanged {
                    false
                } else {
                    let old = cell.replace_value(value.clone());
                    cell.mark_clean();
                    if let Some(old) = old {
                        graph.deferred.push_back(Deferred::Updated {
                            driver,
                            new: value,
                            old,
                        });
                    }
                    true
                }
            };

            if changed {
                tracing::trace!(%key, "state committed");
                self.propagate(scope, graph, id);
            }
        });

        self.finish(operation, scope);
        result
    }

    /// Re-run an atom's producer, cancelling its in-flight work first.
    ///
    /// With `create` set, an uncached atom is computed (and released again if
    /// nothing watches it). Otherwise an uncached atom is left alone.
    pub(crate) fn reevaluate(
        &self,
        scope: &Scope,
        key: AtomKey,
        driver: impl FnOnce() -> Arc<dyn Driver>,
        create: bool,
    ) -> Result<()> {
        let operation = self.enter();
        let graph = operation.graph();

        let existing = graph.borrow().index.get(&key).copied();
        let result = match existing {
            Some(id) => self.reevaluate_cell(scope, graph, id),
            None if create => self
                .resolve(scope, graph, key, driver)
                .map(|id| self.release(scope, graph, [id])),
            None => Ok(()),
        };

        self.finish(operation, scope);
        result
    }

    /// Re-evaluate every cached cell matching `filter`. Used after an
    /// override is installed.
    pub(crate) fn reevaluate_where(&self, scope: &Scope, filter: impl Fn(&dyn Driver) -> bool) {
        let operation = self.enter();
        let graph = operation.graph();

        let matching: Vec<CellId> = {
            let graph = graph.borrow();
            graph
                .cells
                .iter()
                .filter(|(_, cell)| !graph.evaluating.contains(&cell.key()))
                .filter(|(_, cell)| filter(cell.driver().as_ref()))
                .map(|(id, _)| id)
                .collect()
        };

        for id in matching {
            // An earlier re-evaluation may have evicted it.
            if !graph.borrow().cells.contains_key(id) {
                continue;
            }
            if let Err(error) = self.reevaluate_cell(scope, graph, id) {
                tracing::error!(%error, "failed to re-evaluate overridden atom");
            }
        }

        self.finish(operation, scope);
    }

    fn reevaluate_cell(&self, scope: &Scope, graph: &RefCell<Graph>, id: CellId) -> Result<()> {
        let old = graph.borrow().cells.get(id).and_then(|cell| cell.value().cloned());
        self.evaluate(scope, graph, id)?;

        let changed = {
            let graph = graph.borrow();
            match (graph.cells.get(id), old) {
                (Some(cell), Some(old)) => cell
                    .value()
                    .map_or(true, |new| !cell.driver().same_value(&old, new)),
                (Some(_), None) => true,
                (None, _) => false,
            }
        };

        if changed {
            self.propagate(scope, graph, id);
        }
        Ok(())
    }

    /// Remove a single edge between `consumer` and the atom's cell.
    pub(crate) fn unwatch(&self, scope: &Scope, consumer: Consumer, key: AtomKey) {
        let operation = self.enter();
        let graph = operation.graph();

        let id = graph.borrow().index.get(&key).copied();
        if let Some(id) = id {
            unlink(graph, consumer, id);
            self.release(scope, graph, [id]);
        }

        self.finish(operation, scope);
    }

    /// Deliver a result from an async job. Rejected unless the job is still
    /// the cell's current operation.
    pub(crate) fn commit(
        &self,
        scope: &Scope,
        key: AtomKey,
        id: CellId,
        generation: u64,
        value: Option<AnyValue>,
    ) -> bool {
        let operation = self.enter();
        let graph = operation.graph();

        let accepted = {
            let mut graph = graph.borrow_mut();
            let current = graph
                .cells
                .get(id)
                .is_some_and(|cell| cell.key() == key && cell.generation() == generation);

            if current {
                if let Some(value) = value {
                    let cell = &mut graph.cells[id];
                    let driver = cell.driver().clone();
                    if let Some(old) = cell.replace_value(value.clone()) {
                        graph.deferred.push_back(Deferred::Updated {
                            driver,
                            new: value,
                            old,
                        });
                    }
                }
            }
            current
        };

        if accepted {
            self.propagate(scope, graph, id);
        } else {
            tracing::debug!(%key, generation, "discarding result of superseded operation");
        }

        self.finish(operation, scope);
        scope.notify_settled();
        accepted
    }

    /// Clear the task handle of a job that returned on its own.
    pub(crate) fn finish_task(&self, key: AtomKey, id: CellId, generation: u64) {
        let guard = self.graph.lock();
        let mut graph = guard.borrow_mut();
        if let Some(cell) = graph.cells.get_mut(id) {
            if cell.key() == key && cell.generation() == generation {
                cell.finish_task();
            }
        }
    }

    /// Whether the atom's cached value is a final result.
    pub(crate) fn is_settled(&self, key: AtomKey) -> bool {
        let guard = self.graph.lock();
        let graph = guard.borrow();
        graph
            .index
            .get(&key)
            .and_then(|id| graph.cells.get(*id))
            .is_some_and(|cell| {
                cell.is_clean() && cell.value().is_some_and(|value| cell.driver().is_settled(value))
            })
    }

    /// Evict every unobserved, non-keep-alive cell.
    pub(crate) fn collect_unobserved(&self, scope: &Scope) -> usize {
        let operation = self.enter();
        let graph = operation.graph();

        let candidates: Vec<CellId> = graph.borrow().cells.keys().collect();
        let evicted = evict(graph, candidates);

        self.finish(operation, scope);
        evicted
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    pub(crate) fn register(&self, id: SubscriberId, location: &'static Location<'static>) {
        let guard = self.graph.lock();
        guard
            .borrow_mut()
            .subscriptions
            .entry(id)
            .or_insert_with(|| SubscriptionEntry {
                location,
                watching: IndexSet::new(),
                on_update: None,
            });
    }

    pub(crate) fn set_update_callback(&self, id: SubscriberId, callback: Option<UpdateCallback>) {
        let guard = self.graph.lock();
        let mut graph = guard.borrow_mut();
        if let Some(entry) = graph.subscriptions.get_mut(&id) {
            entry.on_update = callback;
        }
    }

    pub(crate) fn watch_count(&self, id: SubscriberId) -> usize {
        let guard = self.graph.lock();
        let graph = guard.borrow();
        graph.subscriptions.get(&id).map_or(0, |entry| entry.watching.len())
    }

    /// Run one evaluation pass for an external consumer. The edges it holds
    /// afterwards are exactly the ones `pass` touched.
    pub(crate) fn subscriber_pass<R>(
        &self,
        scope: &Scope,
        id: SubscriberId,
        location: &'static Location<'static>,
        pass: impl FnOnce() -> R,
    ) -> R {
        let operation = self.enter();
        let graph = operation.graph();

        let previous = {
            let mut graph = graph.borrow_mut();
            let entry = graph.subscriptions.entry(id).or_insert_with(|| SubscriptionEntry {
                location,
                watching: IndexSet::new(),
                on_update: None,
            });
            std::mem::take(&mut entry.watching)
        };

        let result = pass();

        let stale: SmallVec<[CellId; 8]> = {
            let graph = graph.borrow();
            let current = graph.subscriptions.get(&id).map(|entry| &entry.watching);
            previous
                .into_iter()
                .filter(|cell| current.map_or(true, |current| !current.contains(cell)))
                .collect()
        };
        {
            let mut graph = graph.borrow_mut();
            for cell in &stale {
                if let Some(cell) = graph.cells.get_mut(*cell) {
                    cell.subscribers.shift_remove(&Consumer::Subscriber(id));
                }
            }
        }
        self.release(scope, graph, stale);

        self.finish(operation, scope);
        result
    }

    /// Drop every edge of an external consumer and forget it.
    pub(crate) fn unsubscribe(&self, scope: &Scope, id: SubscriberId) {
        let operation = self.enter();
        let graph = operation.graph();

        let watched: Vec<CellId> = {
            let mut graph = graph.borrow_mut();
            let watched: Vec<CellId> = graph
                .subscriptions
                .remove(&id)
                .map(|entry| entry.watching.into_iter().collect())
                .unwrap_or_default();
            for cell in &watched {
                if let Some(cell) = graph.cells.get_mut(*cell) {
                    cell.subscribers.shift_remove(&Consumer::Subscriber(id));
                }
            }
            watched
        };
        self.release(scope, graph, watched);

        self.finish(operation, scope);
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    pub(crate) fn with_graph<R>(&self, f: impl FnOnce(&Graph) -> R) -> R {
        let guard = self.graph.lock();
        let graph = guard.borrow();
        f(&graph)
    }

    /// Fetch the cell for `key`, creating or recomputing it as needed.
    fn resolve(
        &self,
        scope: &Scope,
        graph: &RefCell<Graph>,
        key: AtomKey,
        driver: impl FnOnce() -> Arc<dyn Driver>,
    ) -> Result<CellId> {
        let existing = {
            let graph = graph.borrow();
            if graph.evaluating.contains(&key) {
                let mut path: Vec<AtomKey> = graph
                    .evaluating
                    .iter()
                    .skip_while(|evaluating| **evaluating != key)
                    .copied()
                    .collect();
                path.push(key);
                return Err(AtomError::Cycle { path });
            }
            graph
                .index
                .get(&key)
                .map(|id| (*id, graph.cells[*id].is_clean()))
        };

        match existing {
            Some((id, true)) => Ok(id),
            Some((id, false)) => {
                self.evaluate(scope, graph, id)?;
                Ok(id)
            }
            None => {
                let id = {
                    let mut graph = graph.borrow_mut();
                    let id = graph.cells.insert(Cell::new(key, driver()));
                    graph.index.insert(key, id);
                    id
                };
                tracing::trace!(%key, "created cell");

                if let Err(error) = self.evaluate(scope, graph, id) {
                    self.release(scope, graph, [id]);
                    return Err(error);
                }
                Ok(id)
            }
        }
    }

    /// Run a cell's producer and replace its dependency edges with the ones
    /// touched during this run.
    pub(super) fn evaluate(&self, scope: &Scope, graph: &RefCell<Graph>, id: CellId) -> Result<()> {
        let (key, driver, previous) = {
            let mut graph = graph.borrow_mut();
            let Some(cell) = graph.cells.get_mut(id) else {
                return Ok(());
            };
            cell.cancel_task();
            let previous = std::mem::take(&mut cell.dependencies);
            (cell.key(), cell.driver().clone(), previous)
        };

        let evaluation = {
            let _marker = EvaluationMarker::enter(graph, key);
            let context = Context::new(scope.clone(), Some(Consumer::Cell(id)));
            driver.evaluate(&context)
        };

        let (generation, stale) = {
            let mut graph = graph.borrow_mut();
            let Some(cell) = graph.cells.get_mut(id) else {
                return Ok(());
            };

            let old = cell.replace_value(evaluation.value.clone());
            cell.mark_clean();
            let generation = cell.generation();
            let stale: SmallVec<[CellId; 8]> = previous
                .into_iter()
                .filter(|dependency| !cell.dependencies.contains(dependency))
                .collect();

            for dependency in &stale {
                if let Some(upstream) = graph.cells.get_mut(*dependency) {
                    upstream.subscribers.shift_remove(&Consumer::Cell(id));
                }
            }
            if let Some(old) = old {
                graph.deferred.push_back(Deferred::Updated {
                    driver,
                    new: evaluation.value,
                    old,
                });
            }
            (generation, stale)
        };
        tracing::trace!(%key, generation, "evaluated cell");

        let started = match evaluation.job {
            Some(job) => self.spawn(scope, graph, key, id, generation, job),
            None => Ok(()),
        };
        self.release(scope, graph, stale);

        if started.is_err() {
            if let Some(cell) = graph.borrow_mut().cells.get_mut(id) {
                cell.mark_dirty();
            }
        }
        started
    }

    fn spawn(
        &self,
        scope: &Scope,
        graph: &RefCell<Graph>,
        key: AtomKey,
        id: CellId,
        generation: u64,
        job: Job,
    ) -> Result<()> {
        let runtime = scope.runtime().ok_or(AtomError::NoRuntime { key })?;
        let sink = PhaseSink::new(scope, key, id, generation);
        let done = PhaseSink::new(scope, key, id, generation);
        let task = runtime.spawn(async move {
            job(sink).await;
            done.finish();
        });

        if let Some(cell) = graph.borrow_mut().cells.get_mut(id) {
            cell.attach_task(task.abort_handle());
        }
        Ok(())
    }

    /// Release cells that may have lost their last subscriber.
    pub(super) fn release(
        &self,
        scope: &Scope,
        graph: &RefCell<Graph>,
        candidates: impl IntoIterator<Item = CellId>,
    ) {
        if scope.config().eviction == EvictionPolicy::Retain {
            return;
        }
        evict(graph, candidates);
    }

    /// Run deferred hooks and notifications in commit order.
    fn flush(&self, scope: &Scope, graph: &RefCell<Graph>) {
        loop {
            let next = graph.borrow_mut().deferred.pop_front();
            let Some(deferred) = next else {
                break;
            };

            match deferred {
                Deferred::Updated { driver, new, old } => {
                    let context = UpdateContext::new(scope.clone());
                    driver.updated(&new, &old, &context);
                }
                Deferred::Notify {
                    revision,
                    subscribers,
                } => {
                    let callbacks: Vec<UpdateCallback> = {
                        let graph = graph.borrow();
                        subscribers
                            .iter()
                            .filter_map(|id| graph.subscriptions.get(id))
                            .filter_map(|entry| entry.on_update.clone())
                            .collect()
                    };
                    for callback in callbacks {
                        callback();
                    }
                    scope.notify_listeners(revision);
                }
            }
        }
    }
}

impl Drop for AtomStore {
    fn drop(&mut self) {
        for cell in self.graph.get_mut().get_mut().cells.values_mut() {
            cell.cancel_task();
        }
    }
}

/// Register the bidirectional edge between a consumer and a cell.
fn link(graph: &RefCell<Graph>, consumer: Consumer, id: CellId) {
    let mut graph = graph.borrow_mut();
    let registered = match consumer {
        Consumer::Cell(owner) => match graph.cells.get_mut(owner) {
            Some(owner) => {
                owner.dependencies.insert(id);
                true
            }
            None => false,
        },
        Consumer::Subscriber(subscriber) => match graph.subscriptions.get_mut(&subscriber) {
            Some(entry) => {
                entry.watching.insert(id);
                true
            }
            None => false,
        },
    };

    if registered {
        if let Some(cell) = graph.cells.get_mut(id) {
            cell.subscribers.insert(consumer);
        }
    }
}

fn unlink(graph: &RefCell<Graph>, consumer: Consumer, id: CellId) {
    let mut graph = graph.borrow_mut();
    if let Some(cell) = graph.cells.get_mut(id) {
        cell.subscribers.shift_remove(&consumer);
    }
    match consumer {
        Consumer::Cell(owner) => {
            if let Some(owner) = graph.cells.get_mut(owner) {
                owner.dependencies.shift_remove(&id);
            }
        }
        Consumer::Subscriber(subscriber) => {
            if let Some(entry) = graph.subscriptions.get_mut(&subscriber) {
                entry.watching.shift_remove(&id);
            }
        }
    }
}

/// Evict candidates that have no subscribers and are not keep-alive,
/// cascading to dependencies that lose their last subscriber. Returns the
/// number of evicted cells.
fn evict(graph: &RefCell<Graph>, candidates: impl IntoIterator<Item = CellId>) -> usize {
    let mut pending: SmallVec<[CellId; 8]> = candidates.into_iter().collect();
    let mut evicted = Vec::new();
    {
        let mut graph = graph.borrow_mut();
        while let Some(id) = pending.pop() {
            let Some(cell) = graph.cells.get(id) else {
                continue;
            };
            if !cell.subscribers.is_empty()
                || cell.keep_alive()
                || graph.evaluating.contains(&cell.key())
            {
                continue;
            }

            let Some(mut cell) = graph.cells.remove(id) else {
                continue;
            };
            if graph.index.get(&cell.key()) == Some(&id) {
                graph.index.remove(&cell.key());
            }
            cell.cancel_task();

            for dependency in &cell.dependencies {
                if let Some(upstream) = graph.cells.get_mut(*dependency) {
                    upstream.subscribers.shift_remove(&Consumer::Cell(id));
                    pending.push(*dependency);
                }
            }
            tracing::trace!(key = %cell.key(), "evicted cell");
            evicted.push(cell);
        }
    }

    // Values are dropped outside the borrow in case their destructors
    // call back into the scope.
    let count = evicted.len();
    drop(evicted);
    count
}

fn current_value(graph: &RefCell<Graph>, key: AtomKey, id: CellId) -> Result<AnyValue> {
    // A cell without a value is still running its first evaluation, which
    // can only be observed from inside that evaluation.
    graph
        .borrow()
        .cells
        .get(id)
        .and_then(|cell| cell.value().cloned())
        .ok_or_else(|| AtomError::Cycle {
            path: vec![key, key],
        })
}

/// `lookup` only resolves cells that already exist, so it never needs a
/// driver to create one.
fn unreachable_driver(key: AtomKey) -> Arc<dyn Driver> {
    unreachable!("lookup of {key} tried to create a cell")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicI32, Ordering};

    use futures_util::FutureExt;

    use crate::atom::{Atom, BoxFuture, StateAtom, TaskAtom, ValueAtom};
    use crate::phase::AsyncPhase;

    type Phase = AsyncPhase<i32, Infallible>;

    static SOURCE_EVALS: AtomicI32 = AtomicI32::new(0);

    #[derive(Clone, Hash)]
    struct Source;

    impl StateAtom for Source {
        type Value = i32;

        fn default_value(&self, _context: &Context) -> i32 {
            SOURCE_EVALS.fetch_add(1, Ordering::SeqCst);
            1
        }
    }

    #[derive(Clone, Hash)]
    struct Plus(i32);

    impl ValueAtom for Plus {
        type Value = i32;

        fn value(&self, context: &Context) -> i32 {
            context.watch(&Source) + self.0
        }
    }

    /// Task whose operation never finishes on its own.
    #[derive(Clone, Hash)]
    struct Pending;

    impl TaskAtom for Pending {
        type Value = i32;

        fn task(&self, _context: &Context) -> BoxFuture<'static, i32> {
            futures_util::future::pending().boxed()
        }
    }

    fn driver_of<A: Atom<K>, K>(atom: &A) -> impl FnOnce() -> Arc<dyn Driver> + '_ {
        move || atom.driver().0
    }

    #[test]
    fn read_of_uncached_atom_is_released() {
        let scope = Scope::new();
        let store = scope.store();

        let value = store
            .read(&scope, Plus(1).atom_key(), driver_of(&Plus(1)))
            .unwrap();
        assert_eq!(value.downcast_ref::<i32>(), Some(&2));

        // Neither the derived cell nor its dependency survive the read.
        store.with_graph(|graph| assert!(graph.cells.is_empty()));
    }

    #[test]
    fn watch_links_both_directions() {
        let scope = Scope::new();
        let store = scope.store();
        let subscriber = SubscriberId::new();
        store.register(subscriber, Location::caller());

        store
            .watch(
                &scope,
                Some(Consumer::Subscriber(subscriber)),
                Plus(2).atom_key(),
                driver_of(&Plus(2)),
            )
            .unwrap();

        store.with_graph(|graph| {
            assert_eq!(graph.cells.len(), 2);
            let derived = graph.index[&Plus(2).atom_key()];
            let source = graph.index[&Source.atom_key()];
            assert!(graph.cells[derived].dependencies.contains(&source));
            assert!(graph.cells[source]
                .subscribers
                .contains(&Consumer::Cell(derived)));
            assert!(graph.subscriptions[&subscriber].watching.contains(&derived));
        });
    }

    #[test]
    fn unsubscribe_cascades_eviction() {
        let scope = Scope::new();
        let store = scope.store();
        let subscriber = SubscriberId::new();
        store.register(subscriber, Location::caller());

        store
            .watch(
                &scope,
                Some(Consumer::Subscriber(subscriber)),
                Plus(3).atom_key(),
                driver_of(&Plus(3)),
            )
            .unwrap();
        store.unsubscribe(&scope, subscriber);

        store.with_graph(|graph| {
            assert!(graph.cells.is_empty());
            assert!(graph.index.is_empty());
            assert!(graph.subscriptions.is_empty());
        });
    }

    #[test]
    fn lookup_never_creates() {
        let scope = Scope::new();
        let store = scope.store();

        assert!(store.lookup(&scope, Source.atom_key()).unwrap().is_none());
        store.with_graph(|graph| assert!(graph.cells.is_empty()));
    }

    #[test]
    fn operations_leave_no_evaluation_markers() {
        let scope = Scope::new();
        let store = scope.store();

        store
            .peek(&scope, Plus(4).atom_key(), driver_of(&Plus(4)))
            .unwrap();
        store.with_graph(|graph| {
            assert!(graph.evaluating.is_empty());
            assert_eq!(graph.depth, 0);
        });
    }

    fn current_phase(store: &AtomStore, scope: &Scope, key: AtomKey) -> Option<Phase> {
        store
            .lookup(scope, key)
            .unwrap()
            .and_then(|value| value.downcast_ref::<Phase>().cloned())
    }

    #[tokio::test]
    async fn superseded_generation_is_discarded() {
        let scope = Scope::new();
        let store = scope.store();
        let subscriber = SubscriberId::new();
        store.register(subscriber, Location::caller());
        let key = Pending.atom_key();

        store
            .watch(
                &scope,
                Some(Consumer::Subscriber(subscriber)),
                key,
                driver_of(&Pending),
            )
            .unwrap();
        let (id, generation) = store.with_graph(|graph| {
            let id = graph.index[&key];
            (id, graph.cells[id].generation())
        });
        let late = PhaseSink::new(&scope, key, id, generation);

        store.reevaluate(&scope, key, driver_of(&Pending), false).unwrap();

        assert!(!late.commit(Phase::Success(99)));
        assert_eq!(current_phase(store, &scope, key), Some(Phase::Running));

        // The operation started by the re-evaluation still commits
        let generation = store.with_graph(|graph| graph.cells[id].generation());
        let current = PhaseSink::new(&scope, key, id, generation);
        assert!(current.commit(Phase::Success(5)));
        assert_eq!(current_phase(store, &scope, key), Some(Phase::Success(5)));
    }

    #[tokio::test]
    async fn result_for_recreated_cell_is_discarded() {
        let scope = Scope::new();
        let store = scope.store();
        let key = Pending.atom_key();

        let first = SubscriberId::new();
        store.register(first, Location::caller());
        store
            .watch(&scope, Some(Consumer::Subscriber(first)), key, driver_of(&Pending))
            .unwrap();
        let (old_id, generation) = store.with_graph(|graph| {
            let id = graph.index[&key];
            (id, graph.cells[id].generation())
        });
        let late = PhaseSink::new(&scope, key, old_id, generation);

        // Evict the cell, then bring the atom back under a new cell
        store.unsubscribe(&scope, first);
        store.with_graph(|graph| assert!(graph.cells.get(old_id).is_none()));

        let second = SubscriberId::new();
        store.register(second, Location::caller());
        store
            .watch(&scope, Some(Consumer::Subscriber(second)), key, driver_of(&Pending))
            .unwrap();
        let new_id = store.with_graph(|graph| graph.index[&key]);
        assert_ne!(new_id, old_id);

        assert!(!late.commit(Phase::Success(99)));
        assert_eq!(current_phase(store, &scope, key), Some(Phase::Running));
    }
}
