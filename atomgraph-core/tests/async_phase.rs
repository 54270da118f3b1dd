//! Integration Tests for Async Atoms
//!
//! Task, sequence, publisher and object atoms run on the tokio runtime.
//! These tests use a paused clock so timing is deterministic.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use futures_util::FutureExt;
use parking_lot::Mutex;

use atomgraph_core::testing::TestContext;
use atomgraph_core::{
    push_channel, AsyncPhase, AtomKey, BoxFuture, BoxStream, ChangeNotifier, Context, ObjectAtom,
    ObservableObject, PublisherAtom, PushSender, PushSource, Scope, SequenceAtom, StateAtom,
    TaskAtom, ThrowingTaskAtom, UpdateContext, ValueAtom,
};

/// Shared counter carried by atoms. Does not take part in the atom key.
#[derive(Clone, Default)]
struct Tally(Arc<AtomicI32>);

impl Tally {
    fn count(&self) -> i32 {
        self.0.load(Ordering::SeqCst)
    }
}

impl Hash for Tally {
    fn hash<H: Hasher>(&self, _state: &mut H) {}
}

#[derive(Clone, Hash)]
struct Slow(Tally);

impl TaskAtom for Slow {
    type Value = i32;

    fn task(&self, _context: &Context) -> BoxFuture<'static, i32> {
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            7
        }
        .boxed()
    }

    fn updated(
        &self,
        new: &AsyncPhase<i32, std::convert::Infallible>,
        _old: &AsyncPhase<i32, std::convert::Infallible>,
        _context: &UpdateContext,
    ) {
        if new.is_success() {
            self.0 .0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Test that a superseded operation never commits its result.
#[tokio::test(start_paused = true)]
async fn refresh_cancels_previous_operation() {
    let context = TestContext::new();
    let successes = Tally::default();

    assert_eq!(context.watch(&Slow(successes.clone())), AsyncPhase::Running);

    tokio::time::sleep(Duration::from_millis(10)).await;
    context.refresh(&Slow(successes.clone()));
    assert_eq!(context.watch(&Slow(successes.clone())), AsyncPhase::Running);

    // Long enough for both operations to have finished
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(context.watch(&Slow(successes.clone())), AsyncPhase::Success(7));
    assert_eq!(successes.count(), 1);
}

/// Test that of several refreshes in quick succession only the last
/// operation commits, and watchers hear about exactly one success.
#[tokio::test(start_paused = true)]
async fn rapid_refreshes_commit_only_latest() {
    let context = TestContext::new();
    let successes = Tally::default();
    let atom = Slow(successes.clone());

    assert_eq!(context.watch(&atom), AsyncPhase::Running);

    tokio::time::sleep(Duration::from_millis(10)).await;
    context.refresh(&atom);
    tokio::time::sleep(Duration::from_millis(10)).await;
    context.refresh(&atom);
    let before = context.update_count();

    // The first two operations would have finished by now
    tokio::time::sleep(Duration::from_millis(95)).await;
    assert_eq!(context.watch(&atom), AsyncPhase::Running);
    assert_eq!(context.update_count(), before);
    assert_eq!(successes.count(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(context.watch(&atom), AsyncPhase::Success(7));
    assert_eq!(context.update_count(), before + 1);
    assert_eq!(successes.count(), 1);
}

/// Test that a task stops being reported as running once it settles.
#[tokio::test(start_paused = true)]
async fn settled_task_is_not_running() {
    let context = TestContext::new();
    let atom = Slow(Tally::default());
    let key = AtomKey::of(&atom);

    context.watch(&atom);
    assert!(context.scope().snapshot().cell(&key).unwrap().running);

    assert!(context.wait_for_update(Duration::from_secs(1)).await);
    assert_eq!(context.watch(&atom), AsyncPhase::Success(7));
    assert!(!context.scope().snapshot().cell(&key).unwrap().running);

    context.refresh(&atom);
    assert!(context.scope().snapshot().cell(&key).unwrap().running);
}

/// Test that the phase moves from running to success and notifies watchers.
#[tokio::test(start_paused = true)]
async fn task_settles_into_success() {
    let context = TestContext::new();
    let tally = Tally::default();

    assert!(context.watch(&Slow(tally.clone())).is_running());
    assert_eq!(context.update_count(), 0);

    assert!(context.wait_for_update(Duration::from_secs(1)).await);
    assert_eq!(context.watch(&Slow(tally)), AsyncPhase::Success(7));
    assert_eq!(context.update_count(), 1);
}

/// Refreshing a settled task goes back through running.
#[tokio::test(start_paused = true)]
async fn refresh_restarts_settled_task() {
    let context = TestContext::new();
    let tally = Tally::default();
    context.watch(&Slow(tally.clone()));
    assert!(context.wait_for_update(Duration::from_secs(1)).await);

    context.refresh(&Slow(tally.clone()));
    assert!(context.watch(&Slow(tally.clone())).is_running());

    assert!(context.wait_for_update(Duration::from_secs(1)).await);
    assert_eq!(context.watch(&Slow(tally.clone())), AsyncPhase::Success(7));
    assert_eq!(tally.count(), 2);
}

/// `refreshed` waits for the new operation instead of the cached result.
#[tokio::test(start_paused = true)]
async fn refreshed_waits_for_settled_phase() {
    let scope = Scope::new();
    let tally = Tally::default();

    let phase = scope.refreshed(&Slow(tally.clone())).await;
    assert_eq!(phase, AsyncPhase::Success(7));

    // Nothing keeps the atom alive once the call returns
    assert!(scope.lookup(&Slow(tally)).is_none());
}

#[derive(Clone, Hash)]
struct Fetch {
    online: bool,
}

impl ThrowingTaskAtom for Fetch {
    type Success = String;
    type Failure = String;

    fn task(&self, _context: &Context) -> BoxFuture<'static, Result<String, String>> {
        let online = self.online;
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if online {
                Ok("payload".to_string())
            } else {
                Err("offline".to_string())
            }
        }
        .boxed()
    }
}

/// Test that an error from a throwing task becomes a failure phase.
#[tokio::test(start_paused = true)]
async fn throwing_task_commits_failure() {
    let context = TestContext::new();
    context.watch(&Fetch { online: false });
    context.watch(&Fetch { online: true });

    let settled = context
        .wait_until(Duration::from_secs(1), |context| {
            context.watch(&Fetch { online: false }).is_settled()
                && context.watch(&Fetch { online: true }).is_settled()
        })
        .await;
    assert!(settled);

    assert_eq!(
        context.watch(&Fetch { online: false }),
        AsyncPhase::Failure("offline".to_string())
    );
    assert_eq!(
        context.watch(&Fetch { online: true }),
        AsyncPhase::Success("payload".to_string())
    );
}

#[derive(Clone, Hash)]
struct Multiplier;

impl StateAtom for Multiplier {
    type Value = i32;

    fn default_value(&self, _context: &Context) -> i32 {
        1
    }
}

#[derive(Clone, Hash)]
struct Scaled;

impl TaskAtom for Scaled {
    type Value = i32;

    fn task(&self, context: &Context) -> BoxFuture<'static, i32> {
        let factor = context.watch(&Multiplier);
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            factor * 10
        }
        .boxed()
    }
}

#[derive(Clone, Hash)]
struct Status;

impl ValueAtom for Status {
    type Value = String;

    fn value(&self, context: &Context) -> String {
        match context.watch(&Scaled) {
            AsyncPhase::Success(value) => format!("ready: {value}"),
            AsyncPhase::Failure(never) => match never {},
            _ => "loading".to_string(),
        }
    }
}

/// Test that a dependency change restarts a task and its dependents see
/// the running phase immediately.
#[tokio::test(start_paused = true)]
async fn dependency_change_restarts_task() {
    let context = TestContext::new();
    assert_eq!(context.watch(&Status), "loading");

    assert!(context.wait_for_update(Duration::from_secs(1)).await);
    assert_eq!(context.watch(&Status), "ready: 10");

    context.set(&Multiplier, 4);
    assert_eq!(context.watch(&Status), "loading");

    assert!(context.wait_for_update(Duration::from_secs(1)).await);
    assert_eq!(context.watch(&Status), "ready: 40");
}

#[derive(Clone, Hash)]
struct Countdown {
    fail_at: Option<u32>,
}

impl SequenceAtom for Countdown {
    type Item = u32;
    type Failure = String;

    fn sequence(&self, _context: &Context) -> BoxStream<'static, Result<u32, String>> {
        let fail_at = self.fail_at;
        stream::iter([3, 2, 1])
            .then(move |n| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                match fail_at {
                    Some(at) if at == n => Err(format!("failed at {n}")),
                    _ => Ok(n),
                }
            })
            .boxed()
    }
}

/// Test that a sequence atom keeps only the latest emission.
#[tokio::test(start_paused = true)]
async fn sequence_keeps_latest_item() {
    let context = TestContext::new();
    assert!(context.watch(&Countdown { fail_at: None }).is_running());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(context.watch(&Countdown { fail_at: None }), AsyncPhase::Success(1));
    assert_eq!(context.update_count(), 3);
}

/// Test that a failing sequence stops at the failure.
#[tokio::test(start_paused = true)]
async fn sequence_stops_after_failure() {
    let context = TestContext::new();
    context.watch(&Countdown { fail_at: Some(2) });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        context.watch(&Countdown { fail_at: Some(2) }),
        AsyncPhase::Failure("failed at 2".to_string())
    );
    assert_eq!(context.update_count(), 2);
}

/// Slot a publisher hands its sender to.
#[derive(Clone, Default)]
struct Outlet(Arc<Mutex<Option<PushSender<i32, String>>>>);

impl Hash for Outlet {
    fn hash<H: Hasher>(&self, _state: &mut H) {}
}

#[derive(Clone, Hash)]
struct Ticker(Outlet);

impl PublisherAtom for Ticker {
    type Item = i32;
    type Failure = String;

    fn publisher(&self, _context: &Context) -> PushSource<i32, String> {
        let (sender, source) = push_channel();
        *self.0 .0.lock() = Some(sender);
        source
    }
}

/// Test that values pushed into a publisher reach watchers, and that the
/// channel closes once the atom is evicted.
#[tokio::test(start_paused = true)]
async fn publisher_follows_pushed_values() {
    let outlet = Outlet::default();
    let context = TestContext::new();
    assert!(context.watch(&Ticker(outlet.clone())).is_running());

    let sender = outlet.0.lock().clone().unwrap();

    assert!(sender.send(1));
    assert!(context.wait_for_update(Duration::from_secs(1)).await);
    assert_eq!(context.watch(&Ticker(outlet.clone())), AsyncPhase::Success(1));

    assert!(sender.send(5));
    assert!(context.wait_for_update(Duration::from_secs(1)).await);
    assert_eq!(context.watch(&Ticker(outlet.clone())), AsyncPhase::Success(5));

    assert!(sender.fail("disconnected".to_string()));
    assert!(context.wait_for_update(Duration::from_secs(1)).await);
    assert_eq!(
        context.watch(&Ticker(outlet.clone())),
        AsyncPhase::Failure("disconnected".to_string())
    );

    drop(context);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(sender.is_closed());
}

#[derive(Default)]
struct Cart {
    items: Mutex<Vec<String>>,
    notifier: ChangeNotifier,
}

impl Cart {
    fn add(&self, item: &str) {
        self.items.lock().push(item.to_string());
        self.notifier.notify();
    }
}

impl ObservableObject for Cart {
    fn changes(&self) -> tokio::sync::watch::Receiver<u64> {
        self.notifier.subscribe()
    }
}

#[derive(Clone, Hash)]
struct CartAtom;

impl ObjectAtom for CartAtom {
    type Object = Cart;

    fn object(&self, _context: &Context) -> Arc<Cart> {
        Arc::new(Cart::default())
    }
}

#[derive(Clone, Hash)]
struct ItemCount;

impl ValueAtom for ItemCount {
    type Value = usize;

    fn value(&self, context: &Context) -> usize {
        context.watch(&CartAtom).items.lock().len()
    }
}

/// Test that mutating an observable object invalidates its dependents
/// while the object itself stays the same instance.
#[tokio::test(start_paused = true)]
async fn object_changes_invalidate_dependents() {
    let context = TestContext::new();
    assert_eq!(context.watch(&ItemCount), 0);

    let cart = context.read(&CartAtom);
    cart.add("apple");
    assert!(context.wait_for_update(Duration::from_secs(1)).await);
    assert_eq!(context.watch(&ItemCount), 1);

    cart.add("pear");
    assert!(context.wait_for_update(Duration::from_secs(1)).await);
    assert_eq!(context.watch(&ItemCount), 2);

    assert!(Arc::ptr_eq(&cart, &context.read(&CartAtom)));
}

/// Evaluating an async atom outside a runtime is a configuration error.
#[test]
#[should_panic(expected = "no tokio runtime available")]
fn task_without_runtime_panics() {
    let scope = Scope::new();
    scope.read(&Slow(Tally::default()));
}
