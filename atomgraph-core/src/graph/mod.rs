//! Dependency Graph
//!
//! This module implements the per-scope store that caches atom values and
//! tracks the relationships between them.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Cells represent live atom instances
//! - Edges represent dependencies: if A watched B during its latest
//!   evaluation, there is an edge from B to A
//! - External subscriptions (views, test contexts) are leaf consumers
//!
//! When a cell commits a new value, we traverse the graph to find all
//! affected cells and mark them as dirty. Pull cells recompute on their next
//! watch, push cells restart immediately.
//!
//! # Design Decisions
//!
//! 1. Cells live in a generational arena. An async job holding the id of an
//!    evicted cell can never write into a cell created later for the same
//!    atom.
//!
//! 2. Each evaluation replaces the cell's dependency set, so edges always
//!    reflect the latest run of the producer.
//!
//! 3. We maintain both forward (dependencies) and reverse (subscribers) edges
//!    so that eviction can walk upstream and invalidation downstream.

mod cell;
mod driver;
mod propagate;
mod store;

pub use cell::DirtyState;
pub use driver::DriverHandle;

pub(crate) use cell::Consumer;
pub(crate) use driver::{downcast, AnyValue, Driver, Evaluation, PhaseSink, Propagation};
pub(crate) use store::{AtomStore, Graph};
