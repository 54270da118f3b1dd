//! Engine Errors
//!
//! Only configuration mistakes are represented here. Failures produced by
//! async atoms never become an [`AtomError`]; they are committed as
//! [`AsyncPhase::Failure`](crate::AsyncPhase::Failure) so dependents can
//! branch on them.

use crate::atom::AtomKey;

/// A fatal configuration error detected by the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AtomError {
    /// A producer transitively watched an atom that was still being evaluated.
    #[error("cyclic dependency detected: {}", render_path(.path))]
    Cycle {
        /// Evaluation path, starting and ending with the re-entered atom.
        path: Vec<AtomKey>,
    },

    /// Two atom types share one key but produce different value types.
    #[error("atom {key} does not produce a value of type `{expected}`")]
    TypeMismatch {
        key: AtomKey,
        expected: &'static str,
    },

    /// An async atom was evaluated with no tokio runtime to run it on.
    #[error("no tokio runtime available to start async atom {key}")]
    NoRuntime { key: AtomKey },
}

/// Result alias used across the crate.
pub type Result<T, E = AtomError> = std::result::Result<T, E>;

fn render_path(path: &[AtomKey]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
