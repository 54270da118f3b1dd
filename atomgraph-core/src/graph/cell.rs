//! Graph Cells
//!
//! This module defines the live record the store keeps for each atom.

use std::sync::Arc;

use indexmap::IndexSet;
use tokio::task::AbortHandle;

use crate::atom::AtomKey;
use crate::subscription::SubscriberId;

use super::driver::{AnyValue, Driver};

slotmap::new_key_type! {
    /// Arena index of a cell.
    ///
    /// Ids are generational: once a cell is evicted its id never resolves
    /// again, even if the same atom is later recreated.
    pub struct CellId;
}

/// Something that watches a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Consumer {
    /// Another cell, whose producer watched this one.
    Cell(CellId),

    /// An external subscription, such as a view.
    Subscriber(SubscriberId),
}

/// Dirty state of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency changed. The value is recomputed on the next watch.
    Dirty,
}

/// A live atom instance in the store.
pub(crate) struct Cell {
    key: AtomKey,

    /// Producer snapshot used to (re)compute the value.
    driver: Arc<dyn Driver>,

    /// Current value. `None` only while the first evaluation is running.
    value: Option<AnyValue>,

    state: DirtyState,

    /// Cells this cell read during its latest evaluation.
    pub(crate) dependencies: IndexSet<CellId>,

    /// Consumers currently watching this cell.
    pub(crate) subscribers: IndexSet<Consumer>,

    /// Bumped every time the in-flight operation is cancelled.
    generation: u64,

    task: Option<AbortHandle>,
}

impl Cell {
    /// Create an empty cell. It starts dirty so the first watch evaluates it.
    pub(crate) fn new(key: AtomKey, driver: Arc<dyn Driver>) -> Self {
        Self {
            key,
            driver,
            value: None,
            state: DirtyState::Dirty,
            dependencies: IndexSet::new(),
            subscribers: IndexSet::new(),
            generation: 0,
            task: None,
        }
    }

    pub(crate) fn key(&self) -> AtomKey {
        self.key
    }

    pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub(crate) fn value(&self) -> Option<&AnyValue> {
        self.value.as_ref()
    }

    /// Replace the value, returning the previous one.
    pub(crate) fn replace_value(&mut self, value: AnyValue) -> Option<AnyValue> {
        self.value.replace(value)
    }

    pub(crate) fn dirty_state(&self) -> DirtyState {
        self.state
    }

    pub(crate) fn is_clean(&self) -> bool {
        self.state == DirtyState::Clean
    }

    pub(crate) fn mark_clean(&mut self) {
        self.state = DirtyState::Clean;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.state = DirtyState::Dirty;
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn keep_alive(&self) -> bool {
        self.driver.keep_alive()
    }

    pub(crate) fn has_task(&self) -> bool {
        self.task.is_some()
    }

    pub(crate) fn attach_task(&mut self, task: AbortHandle) {
        self.task = Some(task);
    }

    /// Drop the handle of an operation that ran to completion.
    pub(crate) fn finish_task(&mut self) {
        self.task = None;
    }

    /// Abort the in-flight operation, if any, and start a new generation so
    /// a late result from it is rejected.
    pub(crate) fn cancel_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation += 1;
    }
}
