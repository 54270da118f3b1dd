//! Type-Erased Producers
//!
//! The store never sees concrete atom types. Each atom kind wraps its atom in
//! a driver that knows how to evaluate it, compare its values and run its
//! `updated` hook over type-erased values.
//!
//! Async kinds return an [`Evaluation`] carrying a job. The store spawns the
//! job with a [`PhaseSink`] bound to the cell's current generation, so the job
//! can only commit while it is still the cell's live operation.

use std::any::{Any, TypeId};
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;

use crate::atom::AtomKey;
use crate::context::{Context, UpdateContext};
use crate::scope::{Scope, ScopeInner};

use super::cell::CellId;

/// A cell value with its type erased.
pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;

/// Work started by an async evaluation. Receives the sink it commits through.
pub(crate) type Job = Box<dyn FnOnce(PhaseSink) -> BoxFuture<'static, ()> + Send>;

/// How a cell reacts when one of its dependencies changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Propagation {
    /// Marked dirty, recomputed on the next watch.
    Pull,

    /// Restarted immediately.
    Push,
}

/// Result of running a producer once.
pub(crate) struct Evaluation {
    pub(crate) value: AnyValue,
    pub(crate) job: Option<Job>,
}

impl Evaluation {
    pub(crate) fn value<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            job: None,
        }
    }

    pub(crate) fn with_job<T: Send + Sync + 'static>(value: T, job: Job) -> Self {
        Self {
            value: Arc::new(value),
            job: Some(job),
        }
    }
}

/// Kind specific behavior of one atom, as seen by the store.
pub(crate) trait Driver: Send + Sync + 'static {
    fn key(&self) -> AtomKey;

    /// `TypeId` of the atom type, used for type-wide overrides.
    fn atom_type(&self) -> TypeId;

    fn kind(&self) -> &'static str;

    fn keep_alive(&self) -> bool;

    fn propagation(&self) -> Propagation {
        Propagation::Pull
    }

    fn evaluate(&self, context: &Context) -> Evaluation;

    /// Whether two committed values are equal. Only state atoms dedup.
    fn same_value(&self, _old: &AnyValue, _new: &AnyValue) -> bool {
        false
    }

    /// Whether the value is a final result rather than an in-flight phase.
    fn is_settled(&self, _value: &AnyValue) -> bool {
        true
    }

    fn updated(&self, _new: &AnyValue, _old: &AnyValue, _context: &UpdateContext) {}
}

/// Opaque handle to an atom's driver.
#[doc(hidden)]
#[derive(Clone)]
pub struct DriverHandle(pub(crate) Arc<dyn Driver>);

impl DriverHandle {
    pub(crate) fn new(driver: impl Driver) -> Self {
        Self(Arc::new(driver))
    }
}

/// Write end handed to an async job.
pub(crate) struct PhaseSink {
    scope: Weak<ScopeInner>,
    key: AtomKey,
    cell: CellId,
    generation: u64,
}

impl PhaseSink {
    pub(crate) fn new(scope: &Scope, key: AtomKey, cell: CellId, generation: u64) -> Self {
        Self {
            scope: scope.downgrade(),
            key,
            cell,
            generation,
        }
    }

    /// Commit a new phase. Returns `false` once the operation is superseded,
    /// after which the job should stop.
    pub(crate) fn commit<T: Send + Sync + 'static>(&self, value: T) -> bool {
        self.deliver(Some(Arc::new(value)))
    }

    /// Invalidate dependents without replacing the value.
    pub(crate) fn touch(&self) -> bool {
        self.deliver(None)
    }

    /// Mark the operation as finished so the cell no longer reports it as
    /// running. No-op once the operation is superseded.
    pub(crate) fn finish(&self) {
        if let Some(scope) = Scope::upgrade(&self.scope) {
            scope
                .store()
                .finish_task(self.key, self.cell, self.generation);
        }
    }

    fn deliver(&self, value: Option<AnyValue>) -> bool {
        match Scope::upgrade(&self.scope) {
            Some(scope) => scope
                .store()
                .commit(&scope, self.key, self.cell, self.generation, value),
            None => false,
        }
    }
}

/// Downcast helper shared by the drivers.
pub(crate) fn downcast<T: 'static>(value: &AnyValue) -> Option<&T> {
    (**value).downcast_ref::<T>()
}
