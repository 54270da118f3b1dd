//! Atoms
//!
//! An atom is an immutable definition of one unit of state or derived
//! computation. It is a plain Rust value: its type picks the producer, its
//! fields parametrize it, and its key decides which cell it addresses.
//!
//! # Kinds
//!
//! Each kind is a trait with one producer method:
//!
//! | Trait | Producer | Value in the store | On upstream change |
//! |---|---|---|---|
//! | [`StateAtom`] | `default_value` | `Value` (settable) | marked dirty |
//! | [`ValueAtom`] | `value` | `Value` | marked dirty |
//! | [`TaskAtom`] | `task` | `AsyncPhase<Value, Infallible>` | restarted |
//! | [`ThrowingTaskAtom`] | `task` | `AsyncPhase<Success, Failure>` | restarted |
//! | [`SequenceAtom`] | `sequence` | `AsyncPhase<Item, Failure>` | restarted |
//! | [`PublisherAtom`] | `publisher` | `AsyncPhase<Item, Failure>` | restarted |
//! | [`ObjectAtom`] | `object` | `Arc<Object>` | marked dirty |
//!
//! # How Kinds Reach the Store
//!
//! Every kind trait has a blanket implementation of [`Atom<K>`], where `K` is
//! a marker from [`kind`]. The marker only exists so the blanket impls do
//! not overlap; callers never name it; `context.watch(&atom)` infers it.
//!
//! ```rust,ignore
//! #[derive(Clone, Hash)]
//! struct Counter;
//!
//! impl StateAtom for Counter {
//!     type Value = i32;
//!
//!     fn default_value(&self, _context: &Context) -> i32 {
//!         0
//!     }
//! }
//!
//! #[derive(Clone, Hash)]
//! struct Doubled;
//!
//! impl ValueAtom for Doubled {
//!     type Value = i32;
//!
//!     fn value(&self, context: &Context) -> i32 {
//!         context.watch(&Counter) * 2
//!     }
//! }
//! ```

mod key;
mod object;
mod state;
mod stream;
mod task;
mod value;

use std::hash::Hash;

pub use futures_util::future::BoxFuture;
pub use futures_util::stream::BoxStream;

pub use crate::graph::DriverHandle;
pub use key::AtomKey;
pub use object::{ChangeNotifier, ObjectAtom, ObservableObject};
pub use state::StateAtom;
pub(crate) use state::state_driver;
pub use stream::{push_channel, PublisherAtom, PushSender, PushSource, SequenceAtom};
pub use task::{TaskAtom, ThrowingTaskAtom};
pub use value::ValueAtom;

use crate::context::Context;

/// Kind markers selecting the blanket [`Atom`] implementation.
pub mod kind {
    /// [`StateAtom`](super::StateAtom)
    pub enum State {}

    /// [`ValueAtom`](super::ValueAtom)
    pub enum Value {}

    /// [`TaskAtom`](super::TaskAtom)
    pub enum Task {}

    /// [`ThrowingTaskAtom`](super::ThrowingTaskAtom)
    pub enum ThrowingTask {}

    /// [`SequenceAtom`](super::SequenceAtom)
    pub enum Sequence {}

    /// [`PublisherAtom`](super::PublisherAtom)
    pub enum Publisher {}

    /// [`ObjectAtom`](super::ObjectAtom)
    pub enum Object {}
}

/// Bounds every atom type satisfies.
///
/// `Hash` feeds the structural key, `Clone` lets the store keep its own
/// copy of the definition, and `Send + Sync` lets async jobs carry it.
pub trait AtomIdentity: Clone + Hash + Send + Sync + 'static {}

impl<T> AtomIdentity for T where T: Clone + Hash + Send + Sync + 'static {}

/// The kind-independent view of an atom.
///
/// Implemented automatically for every type implementing one of the kind
/// traits. Accepting `A: Atom<K>` is how an API takes "any atom".
pub trait Atom<K>: AtomIdentity {
    /// What `watch` and `read` return.
    type Produced: Clone + Send + Sync + 'static;

    /// What the producer returns. Overrides substitute a function with this
    /// return type for the atom's own producer.
    type Output: 'static;

    fn atom_key(&self) -> AtomKey;

    fn is_keep_alive(&self) -> bool;

    #[doc(hidden)]
    fn driver(&self) -> DriverHandle;
}

/// Run the effective producer of `atom`: the innermost override if one is
/// installed along the scope chain, the atom's own producer otherwise.
pub(crate) fn produce<A, K>(
    atom: &A,
    context: &Context,
    producer: impl FnOnce(&A, &Context) -> A::Output,
) -> A::Output
where
    A: Atom<K>,
    K: 'static,
{
    match context.scope().find_override::<A, K>(atom.atom_key()) {
        Some(replacement) => replacement(atom, context),
        None => producer(atom, context),
    }
}
