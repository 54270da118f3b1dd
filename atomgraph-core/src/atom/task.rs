//! Task Atoms
//!
//! A task atom runs a future and exposes its progress as an [`AsyncPhase`].
//! Evaluating the cell commits `Running` and spawns the future on the
//! scope's tokio runtime. When it resolves, the result is committed as
//! `Success` or `Failure`, unless the cell has started a newer operation in
//! the meantime, in which case the result is dropped.
//!
//! Task cells are restarted as soon as something they watched changes, so
//! dependents see `Running` right away instead of a stale success.

use std::any::TypeId;
use std::convert::Infallible;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::context::{Context, UpdateContext};
use crate::graph::{downcast, AnyValue, Driver, DriverHandle, Evaluation, PhaseSink, Propagation};
use crate::phase::AsyncPhase;

use super::{kind, produce, Atom, AtomIdentity, AtomKey};

/// An atom backed by a future that cannot fail.
pub trait TaskAtom: AtomIdentity {
    type Value: Clone + Send + Sync + 'static;

    /// Start the operation. Watch inputs synchronously, before the future
    /// is returned.
    fn task(&self, context: &Context) -> BoxFuture<'static, Self::Value>;

    fn key(&self) -> AtomKey {
        AtomKey::of(self)
    }

    fn keep_alive(&self) -> bool {
        false
    }

    /// Called after every phase transition past the first evaluation.
    fn updated(
        &self,
        _new: &AsyncPhase<Self::Value, Infallible>,
        _old: &AsyncPhase<Self::Value, Infallible>,
        _context: &UpdateContext,
    ) {
    }
}

/// An atom backed by a future that resolves to a `Result`.
pub trait ThrowingTaskAtom: AtomIdentity {
    type Success: Clone + Send + Sync + 'static;
    type Failure: Clone + Send + Sync + 'static;

    fn task(&self, context: &Context) -> BoxFuture<'static, Result<Self::Success, Self::Failure>>;

    fn key(&self) -> AtomKey {
        AtomKey::of(self)
    }

    fn keep_alive(&self) -> bool {
        false
    }

    fn updated(
        &self,
        _new: &AsyncPhase<Self::Success, Self::Failure>,
        _old: &AsyncPhase<Self::Success, Self::Failure>,
        _context: &UpdateContext,
    ) {
    }
}

impl<A: TaskAtom> Atom<kind::Task> for A {
    type Produced = AsyncPhase<A::Value, Infallible>;
    type Output = BoxFuture<'static, A::Value>;

    fn atom_key(&self) -> AtomKey {
        TaskAtom::key(self)
    }

    fn is_keep_alive(&self) -> bool {
        TaskAtom::keep_alive(self)
    }

    fn driver(&self) -> DriverHandle {
        DriverHandle::new(TaskDriver { atom: self.clone() })
    }
}

impl<A: ThrowingTaskAtom> Atom<kind::ThrowingTask> for A {
    type Produced = AsyncPhase<A::Success, A::Failure>;
    type Output = BoxFuture<'static, Result<A::Success, A::Failure>>;

    fn atom_key(&self) -> AtomKey {
        ThrowingTaskAtom::key(self)
    }

    fn is_keep_alive(&self) -> bool {
        ThrowingTaskAtom::keep_alive(self)
    }

    fn driver(&self) -> DriverHandle {
        DriverHandle::new(ThrowingTaskDriver { atom: self.clone() })
    }
}

/// Commit `Running` now and the future's result once it resolves.
fn future_evaluation<S, F>(future: BoxFuture<'static, Result<S, F>>) -> Evaluation
where
    S: Send + Sync + 'static,
    F: Send + Sync + 'static,
{
    let job = Box::new(move |sink: PhaseSink| {
        async move {
            let result = future.await;
            sink.commit(AsyncPhase::from(result));
        }
        .boxed()
    });
    Evaluation::with_job(AsyncPhase::<S, F>::Running, job)
}

fn phase_settled<S: 'static, F: 'static>(value: &AnyValue) -> bool {
    downcast::<AsyncPhase<S, F>>(value).is_some_and(AsyncPhase::is_settled)
}

struct TaskDriver<A> {
    atom: A,
}

impl<A: TaskAtom> Driver for TaskDriver<A> {
    fn key(&self) -> AtomKey {
        TaskAtom::key(&self.atom)
    }

    fn atom_type(&self) -> TypeId {
        TypeId::of::<A>()
    }

    fn kind(&self) -> &'static str {
        "task"
    }

    fn keep_alive(&self) -> bool {
        TaskAtom::keep_alive(&self.atom)
    }

    fn propagation(&self) -> Propagation {
        Propagation::Push
    }

    fn evaluate(&self, context: &Context) -> Evaluation {
        let future = produce::<A, kind::Task>(&self.atom, context, |atom, context| atom.task(context));
        future_evaluation(future.map(Ok::<_, Infallible>).boxed())
    }

    fn is_settled(&self, value: &AnyValue) -> bool {
        phase_settled::<A::Value, Infallible>(value)
    }

    fn updated(&self, new: &AnyValue, old: &AnyValue, context: &UpdateContext) {
        let new = downcast::<AsyncPhase<A::Value, Infallible>>(new);
        let old = downcast::<AsyncPhase<A::Value, Infallible>>(old);
        if let (Some(new), Some(old)) = (new, old) {
            self.atom.updated(new, old, context);
        }
    }
}

struct ThrowingTaskDriver<A> {
    atom: A,
}

impl<A: ThrowingTaskAtom> Driver for ThrowingTaskDriver<A> {
    fn key(&self) -> AtomKey {
        ThrowingTaskAtom::key(&self.atom)
    }

    fn atom_type(&self) -> TypeId {
        TypeId::of::<A>()
    }

    fn kind(&self) -> &'static str {
        "throwing_task"
    }

    fn keep_alive(&self) -> bool {
        ThrowingTaskAtom::keep_alive(&self.atom)
    }

    fn propagation(&self) -> Propagation {
        Propagation::Push
    }

    fn evaluate(&self, context: &Context) -> Evaluation {
        let future = produce::<A, kind::ThrowingTask>(&self.atom, context, |atom, context| {
            atom.task(context)
        });
        future_evaluation(future)
    }

    fn is_settled(&self, value: &AnyValue) -> bool {
        phase_settled::<A::Success, A::Failure>(value)
    }

    fn updated(&self, new: &AnyValue, old: &AnyValue, context: &UpdateContext) {
        let new = downcast::<AsyncPhase<A::Success, A::Failure>>(new);
        let old = downcast::<AsyncPhase<A::Success, A::Failure>>(old);
        if let (Some(new), Some(old)) = (new, old) {
            self.atom.updated(new, old, context);
        }
    }
}
