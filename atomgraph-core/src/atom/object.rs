//! Object Atoms
//!
//! An object atom owns a long-lived, internally mutable object and re-runs
//! nothing when the object changes. Instead the object announces changes
//! through a [`ChangeNotifier`], and the store invalidates everything that
//! watched the atom so dependents re-read the object's current state.

use std::any::TypeId;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::watch;

use crate::context::Context;
use crate::graph::{Driver, DriverHandle, Evaluation, PhaseSink};

use super::{kind, produce, Atom, AtomIdentity, AtomKey};

/// An object that can announce its own mutations.
pub trait ObservableObject: Send + Sync + 'static {
    /// A receiver that changes whenever the object does.
    fn changes(&self) -> watch::Receiver<u64>;
}

/// Version counter an [`ObservableObject`] bumps after each mutation.
#[derive(Debug)]
pub struct ChangeNotifier {
    sender: watch::Sender<u64>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self {
            sender: watch::Sender::new(0),
        }
    }

    /// Announce a change.
    pub fn notify(&self) {
        self.sender.send_modify(|version| *version = version.wrapping_add(1));
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.sender.subscribe()
    }

    /// Number of changes announced so far.
    pub fn version(&self) -> u64 {
        *self.sender.borrow()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// An atom whose value is a shared observable object.
pub trait ObjectAtom: AtomIdentity {
    type Object: ObservableObject;

    fn object(&self, context: &Context) -> Arc<Self::Object>;

    fn key(&self) -> AtomKey {
        AtomKey::of(self)
    }

    fn keep_alive(&self) -> bool {
        false
    }
}

impl<A: ObjectAtom> Atom<kind::Object> for A {
    type Produced = Arc<A::Object>;
    type Output = Arc<A::Object>;

    fn atom_key(&self) -> AtomKey {
        ObjectAtom::key(self)
    }

    fn is_keep_alive(&self) -> bool {
        ObjectAtom::keep_alive(self)
    }

    fn driver(&self) -> DriverHandle {
        DriverHandle::new(ObjectDriver { atom: self.clone() })
    }
}

struct ObjectDriver<A> {
    atom: A,
}

impl<A: ObjectAtom> Driver for ObjectDriver<A> {
    fn key(&self) -> AtomKey {
        ObjectAtom::key(&self.atom)
    }

    fn atom_type(&self) -> TypeId {
        TypeId::of::<A>()
    }

    fn kind(&self) -> &'static str {
        "object"
    }

    fn keep_alive(&self) -> bool {
        ObjectAtom::keep_alive(&self.atom)
    }

    fn evaluate(&self, context: &Context) -> Evaluation {
        let object = produce::<A, kind::Object>(&self.atom, context, |atom, context| {
            atom.object(context)
        });

        let mut changes = object.changes();
        changes.borrow_and_update();

        let job = Box::new(move |sink: PhaseSink| {
            async move {
                while changes.changed().await.is_ok() {
                    if !sink.touch() {
                        break;
                    }
                }
            }
            .boxed()
        });
        Evaluation::with_job(object, job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifier_counts_changes() {
        let notifier = ChangeNotifier::new();
        let mut receiver = notifier.subscribe();

        notifier.notify();
        notifier.notify();

        assert_eq!(notifier.version(), 2);
        assert!(receiver.has_changed().unwrap());
        assert_eq!(*receiver.borrow_and_update(), 2);
    }
}
