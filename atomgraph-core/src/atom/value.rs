//! Value Atoms
//!
//! A value atom is a pure function of the atoms it watches. It is computed
//! lazily: when a dependency changes the cell is only marked dirty, and the
//! function runs again the next time someone watches it.

use std::any::TypeId;

use crate::context::{Context, UpdateContext};
use crate::graph::{downcast, AnyValue, Driver, DriverHandle, Evaluation};

use super::{kind, produce, Atom, AtomIdentity, AtomKey};

/// A derived, read-only atom.
pub trait ValueAtom: AtomIdentity {
    type Value: Clone + Send + Sync + 'static;

    /// Compute the value. Must give equal results for equal watched inputs.
    fn value(&self, context: &Context) -> Self::Value;

    fn key(&self) -> AtomKey {
        AtomKey::of(self)
    }

    fn keep_alive(&self) -> bool {
        false
    }

    /// Called after a recomputation replaced the cached value.
    fn updated(&self, _new: &Self::Value, _old: &Self::Value, _context: &UpdateContext) {}
}

impl<A: ValueAtom> Atom<kind::Value> for A {
    type Produced = A::Value;
    type Output = A::Value;

    fn atom_key(&self) -> AtomKey {
        ValueAtom::key(self)
    }

    fn is_keep_alive(&self) -> bool {
        ValueAtom::keep_alive(self)
    }

    fn driver(&self) -> DriverHandle {
        DriverHandle::new(ValueDriver { atom: self.clone() })
    }
}

struct ValueDriver<A> {
    atom: A,
}

impl<A: ValueAtom> Driver for ValueDriver<A> {
    fn key(&self) -> AtomKey {
        ValueAtom::key(&self.atom)
    }

    fn atom_type(&self) -> TypeId {
        TypeId::of::<A>()
    }

    fn kind(&self) -> &'static str {
        "value"
    }

    fn keep_alive(&self) -> bool {
        ValueAtom::keep_alive(&self.atom)
    }

    fn evaluate(&self, context: &Context) -> Evaluation {
        let value = produce::<A, kind::Value>(&self.atom, context, |atom, context| atom.value(context));
        Evaluation::value(value)
    }

    fn updated(&self, new: &AnyValue, old: &AnyValue, context: &UpdateContext) {
        if let (Some(new), Some(old)) = (downcast::<A::Value>(new), downcast::<A::Value>(old)) {
            self.atom.updated(new, old, context);
        }
    }
}
