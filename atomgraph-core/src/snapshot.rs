//! Graph Snapshots
//!
//! A snapshot is a read-only, serializable picture of one scope's store:
//! which cells are alive, what they depend on, who watches them. It is
//! meant for debugging tools and tests, not for restoring state; values are
//! not included.

use serde::Serialize;

use crate::atom::AtomKey;
use crate::graph::{Consumer, DirtyState};
use crate::scope::Scope;

/// Serializable state of one scope's graph.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub scope: String,
    pub label: Option<String>,

    /// Propagation passes run so far.
    pub revision: u64,

    /// Number of overrides installed directly on this scope.
    pub overrides: usize,

    pub cells: Vec<CellSnapshot>,
    pub subscriptions: Vec<SubscriptionSnapshot>,
}

/// One live cell.
#[derive(Debug, Clone, Serialize)]
pub struct CellSnapshot {
    pub key: String,
    pub kind: &'static str,
    pub dirty: bool,
    pub keep_alive: bool,

    /// Whether an async operation of the cell is still in flight.
    pub running: bool,

    pub dependencies: Vec<String>,
    pub dependents: usize,
    pub subscribers: usize,
}

/// One external consumer.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionSnapshot {
    pub location: String,
    pub watching: Vec<String>,
}

impl Snapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn cell(&self, key: &AtomKey) -> Option<&CellSnapshot> {
        let key = key.to_string();
        self.cells.iter().find(|cell| cell.key == key)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

pub(crate) fn capture(scope: &Scope) -> Snapshot {
    let overrides = scope.override_count();

    scope.store().with_graph(|graph| {
        let key_of = |id| graph.cells.get(id).map(|cell| cell.key().to_string());

        let cells = graph
            .cells
            .values()
            .map(|cell| {
                let (dependents, subscribers) =
                    cell.subscribers
                        .iter()
                        .fold((0, 0), |(cells, external), consumer| match consumer {
                            Consumer::Cell(_) => (cells + 1, external),
                            Consumer::Subscriber(_) => (cells, external + 1),
                        });

                CellSnapshot {
                    key: cell.key().to_string(),
                    kind: cell.driver().kind(),
                    dirty: cell.dirty_state() == DirtyState::Dirty,
                    keep_alive: cell.keep_alive(),
                    running: cell.has_task(),
                    dependencies: cell.dependencies.iter().filter_map(|id| key_of(*id)).collect(),
                    dependents,
                    subscribers,
                }
            })
            .collect();

        let subscriptions = graph
            .subscriptions
            .values()
            .map(|entry| SubscriptionSnapshot {
                location: entry.location.to_string(),
                watching: entry.watching.iter().filter_map(|id| key_of(*id)).collect(),
            })
            .collect();

        Snapshot {
            scope: scope.token().to_string(),
            label: scope.config().label.clone(),
            revision: graph.revision,
            overrides,
            cells,
            subscriptions,
        }
    })
}
