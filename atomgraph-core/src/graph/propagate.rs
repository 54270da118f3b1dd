//! Change Propagation
//!
//! When a cell commits a new value, every transitive consumer has to learn
//! about it. Propagation runs in two phases:
//!
//! 1. **Invalidate.** Walk the consumer edges breadth-first from the changed
//!    cell. Every downstream cell is marked dirty. Cells whose kind reacts by
//!    restarting (async tasks, sequences, publishers) are collected, and so
//!    are the external subscriptions reached by the walk.
//! 2. **Restart.** The collected push cells are re-evaluated in dependency
//!    order, so a push cell that reads another push cell sees it restarted
//!    first. Pull cells stay dirty until someone watches them.
//!
//! Subscribers and scope listeners are notified once per pass, after the
//! outermost store operation completes.
//!
//! A commit that happens while a pass is running (a producer or a hook
//! setting another atom) is queued and becomes its own pass afterwards.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexSet;

use crate::scope::Scope;
use crate::subscription::SubscriberId;

use super::cell::{CellId, Consumer};
use super::driver::Propagation;
use super::store::{AtomStore, Deferred, Graph};

/// Everything one invalidation pass reached.
#[derive(Debug, Default)]
pub(crate) struct Invalidation {
    /// Cells to restart, dependencies before dependents.
    pub(crate) restart: Vec<CellId>,

    /// External subscriptions to notify.
    pub(crate) subscribers: Vec<SubscriberId>,

    pub(crate) revision: u64,
}

impl Graph {
    /// Mark every transitive consumer of `source` dirty.
    pub(crate) fn invalidate(&mut self, source: CellId) -> Invalidation {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut push = Vec::new();
        let mut subscribers = IndexSet::new();

        // Start with the source's direct consumers
        if let Some(cell) = self.cells.get(source) {
            queue.extend(cell.subscribers.iter().copied());
        }

        while let Some(consumer) = queue.pop_front() {
            let id = match consumer {
                Consumer::Subscriber(subscriber) => {
                    subscribers.insert(subscriber);
                    continue;
                }
                Consumer::Cell(id) => id,
            };

            if id == source || !visited.insert(id) {
                continue;
            }

            if let Some(cell) = self.cells.get_mut(id) {
                cell.mark_dirty();
                if cell.driver().propagation() == Propagation::Push {
                    push.push(id);
                }
                queue.extend(cell.subscribers.iter().copied());
            }
        }

        self.revision += 1;
        Invalidation {
            restart: self.topological_sort(push),
            subscribers: subscribers.into_iter().collect(),
            revision: self.revision,
        }
    }

    /// Order `cells` so that dependencies come before dependents.
    ///
    /// Only edges between members of `cells` count. Edges through pull cells
    /// in between are irrelevant here since those are recomputed on demand.
    fn topological_sort(&self, cells: Vec<CellId>) -> Vec<CellId> {
        let members: HashSet<_> = cells.iter().copied().collect();
        let mut in_degree: HashMap<CellId, usize> = HashMap::new();
        let mut sorted = Vec::with_capacity(cells.len());
        let mut queue = VecDeque::new();

        for &id in &cells {
            if let Some(cell) = self.cells.get(id) {
                let degree = cell
                    .dependencies
                    .iter()
                    .filter(|dependency| members.contains(dependency))
                    .count();
                in_degree.insert(id, degree);
                if degree == 0 {
                    queue.push_back(id);
                }
            }
        }

        // Kahn's algorithm
        while let Some(id) = queue.pop_front() {
            sorted.push(id);

            if let Some(cell) = self.cells.get(id) {
                for consumer in &cell.subscribers {
                    let Consumer::Cell(dependent) = consumer else {
                        continue;
                    };
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(*dependent);
                        }
                    }
                }
            }
        }

        sorted
    }
}

/// Clears the propagating flag, including when a producer panics mid-pass.
struct PassGuard<'a> {
    graph: &'a RefCell<Graph>,
}

impl<'a> PassGuard<'a> {
    fn begin(graph: &'a RefCell<Graph>) -> Option<Self> {
        let mut state = graph.borrow_mut();
        if state.propagating {
            return None;
        }
        state.propagating = true;
        Some(Self { graph })
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut graph) = self.graph.try_borrow_mut() {
            graph.propagating = false;
            graph.queued.clear();
        }
    }
}

impl AtomStore {
    /// Propagate a committed change of `source` to its consumers.
    ///
    /// Must be called with the store lock held.
    pub(super) fn propagate(&self, scope: &Scope, graph: &RefCell<Graph>, source: CellId) {
        let Some(_pass) = PassGuard::begin(graph) else {
            graph.borrow_mut().queued.push_back(source);
            return;
        };

        let mut next = Some(source);
        while let Some(source) = next {
            self.propagate_once(scope, graph, source);
            next = graph.borrow_mut().queued.pop_front();
        }
    }

    fn propagate_once(&self, scope: &Scope, graph: &RefCell<Graph>, source: CellId) {
        let invalidation = graph.borrow_mut().invalidate(source);
        tracing::trace!(
            revision = invalidation.revision,
            restart = invalidation.restart.len(),
            subscribers = invalidation.subscribers.len(),
            "invalidated consumers",
        );

        for id in invalidation.restart {
            // Already recomputed by an earlier restart that watched it.
            let (dirty, evaluating) = {
                let graph = graph.borrow();
                match graph.cells.get(id) {
                    Some(cell) => (!cell.is_clean(), graph.evaluating.contains(&cell.key())),
                    None => (false, false),
                }
            };
            if !dirty || evaluating {
                continue;
            }

            if let Err(error) = self.evaluate(scope, graph, id) {
                tracing::error!(%error, "failed to restart async atom");
            }
        }

        graph.borrow_mut().deferred.push_back(Deferred::Notify {
            revision: invalidation.revision,
            subscribers: invalidation.subscribers,
        });
    }
}
