//! State Atoms
//!
//! A state atom holds a value that can be written from outside. Its producer
//! only supplies the initial value; after that, `set` and `modify` replace
//! it. Writing a value equal to the current one is a no-op: no dependent is
//! invalidated and no notification fires.

use std::any::TypeId;
use std::sync::Arc;

use crate::context::{Context, UpdateContext};
use crate::graph::{downcast, AnyValue, Driver, DriverHandle, Evaluation};

use super::{kind, produce, Atom, AtomIdentity, AtomKey};

/// An atom with a settable value.
pub trait StateAtom: AtomIdentity {
    /// Value type. `PartialEq` powers write deduplication.
    type Value: Clone + PartialEq + Send + Sync + 'static;

    /// The value the atom starts with, and returns to on `reset`.
    fn default_value(&self, context: &Context) -> Self::Value;

    fn key(&self) -> AtomKey {
        AtomKey::of(self)
    }

    /// Keep the cell when nothing watches it.
    fn keep_alive(&self) -> bool {
        false
    }

    /// Called after a new value is committed.
    fn updated(&self, _new: &Self::Value, _old: &Self::Value, _context: &UpdateContext) {}
}

impl<A: StateAtom> Atom<kind::State> for A {
    type Produced = A::Value;
    type Output = A::Value;

    fn atom_key(&self) -> AtomKey {
        StateAtom::key(self)
    }

    fn is_keep_alive(&self) -> bool {
        StateAtom::keep_alive(self)
    }

    fn driver(&self) -> DriverHandle {
        DriverHandle::new(StateDriver { atom: self.clone() })
    }
}

/// Driver of a state atom, for `set`/`modify` paths that only know `A`.
pub(crate) fn state_driver<A: StateAtom>(atom: &A) -> Arc<dyn Driver> {
    Arc::new(StateDriver { atom: atom.clone() })
}

struct StateDriver<A> {
    atom: A,
}

impl<A: StateAtom> Driver for StateDriver<A> {
    fn key(&self) -> AtomKey {
        StateAtom::key(&self.atom)
    }

    fn atom_type(&self) -> TypeId {
        TypeId::of::<A>()
    }

    fn kind(&self) -> &'static str {
        "state"
    }

    fn keep_alive(&self) -> bool {
        StateAtom::keep_alive(&self.atom)
    }

    fn evaluate(&self, context: &Context) -> Evaluation {
        let value = produce::<A, kind::State>(&self.atom, context, |atom, context| {
            atom.default_value(context)
        });
        Evaluation::value(value)
    }

    fn same_value(&self, old: &AnyValue, new: &AnyValue) -> bool {
        match (downcast::<A::Value>(old), downcast::<A::Value>(new)) {
            (Some(old), Some(new)) => old == new,
            _ => false,
        }
    }

    fn updated(&self, new: &AnyValue, old: &AnyValue, context: &UpdateContext) {
        if let (Some(new), Some(old)) = (downcast::<A::Value>(new), downcast::<A::Value>(old)) {
            self.atom.updated(new, old, context);
        }
    }
}
