//! Sequence and Publisher Atoms
//!
//! Both kinds bridge an external push source into phase transitions. The
//! source is subscribed to once per evaluation. Each emission replaces the
//! phase with `Success(item)`, a failure commits `Failure(error)` and ends
//! the subscription. Only the latest emission is kept.
//!
//! - A [`SequenceAtom`] returns a `futures` stream.
//! - A [`PublisherAtom`] returns a [`PushSource`], the receiving half of a
//!   channel whose [`PushSender`] the producer hands to whatever pushes
//!   values (a callback, a socket reader, another task).
//!
//! If the source ends without emitting anything the phase stays `Running`.

use std::any::TypeId;
use std::fmt;

use futures_util::stream::{BoxStream, StreamExt};
use futures_util::FutureExt;
use tokio::sync::mpsc;

use crate::context::{Context, UpdateContext};
use crate::graph::{downcast, AnyValue, Driver, DriverHandle, Evaluation, PhaseSink, Propagation};
use crate::phase::AsyncPhase;

use super::{kind, produce, Atom, AtomIdentity, AtomKey};

/// An atom that follows the latest item of a stream.
pub trait SequenceAtom: AtomIdentity {
    type Item: Clone + Send + Sync + 'static;
    type Failure: Clone + Send + Sync + 'static;

    fn sequence(&self, context: &Context) -> BoxStream<'static, Result<Self::Item, Self::Failure>>;

    fn key(&self) -> AtomKey {
        AtomKey::of(self)
    }

    fn keep_alive(&self) -> bool {
        false
    }

    fn updated(
        &self,
        _new: &AsyncPhase<Self::Item, Self::Failure>,
        _old: &AsyncPhase<Self::Item, Self::Failure>,
        _context: &UpdateContext,
    ) {
    }
}

/// An atom that follows the latest value pushed into a channel.
pub trait PublisherAtom: AtomIdentity {
    type Item: Clone + Send + Sync + 'static;
    type Failure: Clone + Send + Sync + 'static;

    fn publisher(&self, context: &Context) -> PushSource<Self::Item, Self::Failure>;

    fn key(&self) -> AtomKey {
        AtomKey::of(self)
    }

    fn keep_alive(&self) -> bool {
        false
    }

    fn updated(
        &self,
        _new: &AsyncPhase<Self::Item, Self::Failure>,
        _old: &AsyncPhase<Self::Item, Self::Failure>,
        _context: &UpdateContext,
    ) {
    }
}

/// Create a connected sender/source pair.
pub fn push_channel<T, F>() -> (PushSender<T, F>, PushSource<T, F>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (PushSender { sender }, PushSource { receiver })
}

/// Sending half of a push channel.
pub struct PushSender<T, F> {
    sender: mpsc::UnboundedSender<Result<T, F>>,
}

impl<T, F> PushSender<T, F> {
    /// Push a value. Returns `false` once the atom stopped listening.
    pub fn send(&self, value: T) -> bool {
        self.sender.send(Ok(value)).is_ok()
    }

    /// Push a failure. The atom stops listening after it.
    pub fn fail(&self, error: F) -> bool {
        self.sender.send(Err(error)).is_ok()
    }

    /// Whether the receiving atom operation is gone (cancelled or evicted).
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<T, F> Clone for PushSender<T, F> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T, F> fmt::Debug for PushSender<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushSender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receiving half of a push channel, returned by a publisher producer.
pub struct PushSource<T, F> {
    receiver: mpsc::UnboundedReceiver<Result<T, F>>,
}

impl<T, F> PushSource<T, F>
where
    T: Send + 'static,
    F: Send + 'static,
{
    fn into_stream(self) -> BoxStream<'static, Result<T, F>> {
        futures_util::stream::unfold(self.receiver, |mut receiver| async move {
            receiver.recv().await.map(|next| (next, receiver))
        })
        .boxed()
    }
}

impl<T, F> fmt::Debug for PushSource<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushSource").finish_non_exhaustive()
    }
}

impl<A: SequenceAtom> Atom<kind::Sequence> for A {
    type Produced = AsyncPhase<A::Item, A::Failure>;
    type Output = BoxStream<'static, Result<A::Item, A::Failure>>;

    fn atom_key(&self) -> AtomKey {
        SequenceAtom::key(self)
    }

    fn is_keep_alive(&self) -> bool {
        SequenceAtom::keep_alive(self)
    }

    fn driver(&self) -> DriverHandle {
        DriverHandle::new(SequenceDriver { atom: self.clone() })
    }
}

impl<A: PublisherAtom> Atom<kind::Publisher> for A {
    type Produced = AsyncPhase<A::Item, A::Failure>;
    type Output = PushSource<A::Item, A::Failure>;

    fn atom_key(&self) -> AtomKey {
        PublisherAtom::key(self)
    }

    fn is_keep_alive(&self) -> bool {
        PublisherAtom::keep_alive(self)
    }

    fn driver(&self) -> DriverHandle {
        DriverHandle::new(PublisherDriver { atom: self.clone() })
    }
}

/// Commit `Running`, then every item until the stream ends or fails.
fn stream_evaluation<T, F>(mut stream: BoxStream<'static, Result<T, F>>) -> Evaluation
where
    T: Send + Sync + 'static,
    F: Send + Sync + 'static,
{
    let job = Box::new(move |sink: PhaseSink| {
        async move {
            while let Some(next) = stream.next().await {
                let failed = next.is_err();
                if !sink.commit(AsyncPhase::from(next)) || failed {
                    break;
                }
            }
        }
        .boxed()
    });
    Evaluation::with_job(AsyncPhase::<T, F>::Running, job)
}

fn emission_settled<T: 'static, F: 'static>(value: &AnyValue) -> bool {
    downcast::<AsyncPhase<T, F>>(value).is_some_and(AsyncPhase::is_settled)
}

struct SequenceDriver<A> {
    atom: A,
}

impl<A: SequenceAtom> Driver for SequenceDriver<A> {
    fn key(&self) -> AtomKey {
        SequenceAtom::key(&self.atom)
    }

    fn atom_type(&self) -> TypeId {
        TypeId::of::<A>()
    }

    fn kind(&self) -> &'static str {
        "sequence"
    }

    fn keep_alive(&self) -> bool {
        SequenceAtom::keep_alive(&self.atom)
    }

    fn propagation(&self) -> Propagation {
        Propagation::Push
    }

    fn evaluate(&self, context: &Context) -> Evaluation {
        let stream = produce::<A, kind::Sequence>(&self.atom, context, |atom, context| {
            atom.sequence(context)
        });
        stream_evaluation(stream)
    }

    fn is_settled(&self, value: &AnyValue) -> bool {
        emission_settled::<A::Item, A::Failure>(value)
    }

    fn updated(&self, new: &AnyValue, old: &AnyValue, context: &UpdateContext) {
        let new = downcast::<AsyncPhase<A::Item, A::Failure>>(new);
        let old = downcast::<AsyncPhase<A::Item, A::Failure>>(old);
        if let (Some(new), Some(old)) = (new, old) {
            self.atom.updated(new, old, context);
        }
    }
}

struct PublisherDriver<A> {
    atom: A,
}

impl<A: PublisherAtom> Driver for PublisherDriver<A> {
    fn key(&self) -> AtomKey {
        PublisherAtom::key(&self.atom)
    }

    fn atom_type(&self) -> TypeId {
        TypeId::of::<A>()
    }

    fn kind(&self) -> &'static str {
        "publisher"
    }

    fn keep_alive(&self) -> bool {
        PublisherAtom::keep_alive(&self.atom)
    }

    fn propagation(&self) -> Propagation {
        Propagation::Push
    }

    fn evaluate(&self, context: &Context) -> Evaluation {
        let source = produce::<A, kind::Publisher>(&self.atom, context, |atom, context| {
            atom.publisher(context)
        });
        stream_evaluation(source.into_stream())
    }

    fn is_settled(&self, value: &AnyValue) -> bool {
        emission_settled::<A::Item, A::Failure>(value)
    }

    fn updated(&self, new: &AnyValue, old: &AnyValue, context: &UpdateContext) {
        let new = downcast::<AsyncPhase<A::Item, A::Failure>>(new);
        let old = downcast::<AsyncPhase<A::Item, A::Failure>>(old);
        if let (Some(new), Some(old)) = (new, old) {
            self.atom.updated(new, old, context);
        }
    }
}
