//! Atomgraph Core
//!
//! This crate provides the core engine for the Atomgraph reactive state
//! graph. It implements:
//!
//! - Atoms: typed, keyed definitions of state and derived computations
//! - A per-scope store with automatic dependency tracking and invalidation
//! - The async phase lifecycle (pending, running, success, failure) with
//!   cancellation of superseded operations
//! - Nested scopes with per-atom and per-type overrides
//! - Subscription bookkeeping for external consumers such as views
//!
//! The crate does not render anything. A UI layer calls `watch` while it
//! renders and re-renders when the scope reports a change.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `atom`: Atom kinds, keys, and the glue trait the store works with
//! - `graph`: Cell arena, watch/set/evict algorithms, change propagation
//! - `scope`: Scopes, overrides, services, the global root scope
//! - `phase`: The `AsyncPhase` result type and its combinators
//! - `subscription`: Edge bookkeeping for external consumers
//! - `testing`: A harness for exercising atoms in tests
//!
//! # Example
//!
//! ```rust,ignore
//! use atomgraph_core::{Context, Scope, StateAtom, ValueAtom};
//!
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
//!
//! let scope = Scope::new();
//! let view = scope.subscribe();
//! view.on_update(|| println!("re-render"));
//!
//! assert_eq!(view.evaluate(|context| context.watch(&Doubled)), 0);
//!
//! // Prints "re-render" once
//! scope.set(&Counter, 5);
//! assert_eq!(view.evaluate(|context| context.watch(&Doubled)), 10);
//!
//! // Same value, nothing is invalidated and nothing prints
//! scope.set(&Counter, 5);
//! ```

pub mod atom;
pub mod config;
mod context;
pub mod error;
mod graph;
pub mod phase;
pub mod scope;
pub mod snapshot;
pub mod subscription;
pub mod testing;

pub use atom::{
    kind, push_channel, Atom, AtomKey, BoxFuture, BoxStream, ChangeNotifier, ObjectAtom,
    ObservableObject, PublisherAtom, PushSender, PushSource, SequenceAtom, StateAtom, TaskAtom,
    ThrowingTaskAtom, ValueAtom,
};
pub use config::{EvictionPolicy, ScopeConfig};
pub use context::{Context, UpdateContext};
pub use error::{AtomError, Result};
pub use graph::DirtyState;
pub use phase::AsyncPhase;
pub use scope::{ListenerHandle, Scope, ScopeBuilder, ScopeToken, Services};
pub use snapshot::Snapshot;
pub use subscription::{SubscriberId, SubscriptionContainer};
