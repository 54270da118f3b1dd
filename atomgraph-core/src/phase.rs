//! Async Phase
//!
//! [`AsyncPhase`] is the value every async-backed atom produces. It is a
//! four-state tag:
//!
//! ```text
//!   Pending --start--> Running --resolve--> Success(S) | Failure(F)
//!      ^                  ^                        |
//!      |                  +-------- refresh -------+
//! ```
//!
//! Any state returns to `Running` when the owning cell is refreshed or one
//! of its dependencies changes. The store cancels the previous operation
//! before that transition, and a result that arrives from a cancelled
//! operation is never committed.

/// Result lifecycle of an async atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsyncPhase<S, F> {
    /// No operation has been started.
    Pending,

    /// An operation is in flight.
    Running,

    /// The latest operation resolved with a value.
    Success(S),

    /// The latest operation resolved with an error.
    Failure(F),
}

impl<S, F> Default for AsyncPhase<S, F> {
    fn default() -> Self {
        Self::Pending
    }
}

impl<S, F> AsyncPhase<S, F> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// True once the phase holds a resolved result.
    pub fn is_settled(&self) -> bool {
        self.is_success() || self.is_failure()
    }

    /// The success value, if any.
    pub fn value(&self) -> Option<&S> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    /// The failure, if any.
    pub fn error(&self) -> Option<&F> {
        match self {
            Self::Failure(error) => Some(error),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<S> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_error(self) -> Option<F> {
        match self {
            Self::Failure(error) => Some(error),
            _ => None,
        }
    }

    /// The settled result, or `None` while pending or running.
    pub fn into_result(self) -> Option<Result<S, F>> {
        match self {
            Self::Success(value) => Some(Ok(value)),
            Self::Failure(error) => Some(Err(error)),
            Self::Pending | Self::Running => None,
        }
    }

    pub fn as_ref(&self) -> AsyncPhase<&S, &F> {
        match self {
            Self::Pending => AsyncPhase::Pending,
            Self::Running => AsyncPhase::Running,
            Self::Success(value) => AsyncPhase::Success(value),
            Self::Failure(error) => AsyncPhase::Failure(error),
        }
    }

    /// Transform the success value. Other states pass through.
    pub fn map<T>(self, f: impl FnOnce(S) -> T) -> AsyncPhase<T, F> {
        match self {
            Self::Pending => AsyncPhase::Pending,
            Self::Running => AsyncPhase::Running,
            Self::Success(value) => AsyncPhase::Success(f(value)),
            Self::Failure(error) => AsyncPhase::Failure(error),
        }
    }

    /// Transform the failure. Other states pass through.
    pub fn map_err<G>(self, f: impl FnOnce(F) -> G) -> AsyncPhase<S, G> {
        match self {
            Self::Pending => AsyncPhase::Pending,
            Self::Running => AsyncPhase::Running,
            Self::Success(value) => AsyncPhase::Success(value),
            Self::Failure(error) => AsyncPhase::Failure(f(error)),
        }
    }

    /// Chain a phase-producing function onto the success value.
    pub fn flat_map<T>(self, f: impl FnOnce(S) -> AsyncPhase<T, F>) -> AsyncPhase<T, F> {
        match self {
            Self::Pending => AsyncPhase::Pending,
            Self::Running => AsyncPhase::Running,
            Self::Success(value) => f(value),
            Self::Failure(error) => AsyncPhase::Failure(error),
        }
    }

    /// Combine two phases.
    ///
    /// A failure on either side wins, the left one first. Otherwise the
    /// first unsettled side decides between `Pending` and `Running`, again
    /// checking the left side first. Only two successes pair up.
    pub fn merge<T>(self, other: AsyncPhase<T, F>) -> AsyncPhase<(S, T), F> {
        match (self, other) {
            (Self::Failure(error), _) => AsyncPhase::Failure(error),
            (_, AsyncPhase::Failure(error)) => AsyncPhase::Failure(error),
            (Self::Success(left), AsyncPhase::Success(right)) => AsyncPhase::Success((left, right)),
            (Self::Pending, _) => AsyncPhase::Pending,
            (Self::Running, _) => AsyncPhase::Running,
            (Self::Success(_), AsyncPhase::Pending) => AsyncPhase::Pending,
            (Self::Success(_), AsyncPhase::Running) => AsyncPhase::Running,
        }
    }
}

impl<S, F> From<Result<S, F>> for AsyncPhase<S, F> {
    fn from(result: Result<S, F>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::Failure(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Phase = AsyncPhase<i32, &'static str>;

    #[test]
    fn default_is_pending() {
        assert!(Phase::default().is_pending());
    }

    #[test]
    fn map_only_touches_success() {
        assert_eq!(Phase::Success(2).map(|v| v * 10), AsyncPhase::Success(20));
        assert_eq!(Phase::Failure("boom").map(|v| v * 10), AsyncPhase::Failure("boom"));
        assert_eq!(Phase::Running.map(|v| v * 10), AsyncPhase::Running);
    }

    #[test]
    fn map_err_only_touches_failure() {
        assert_eq!(Phase::Failure("boom").map_err(str::len), AsyncPhase::Failure(4));
        assert_eq!(Phase::Success(1).map_err(str::len), AsyncPhase::Success(1));
    }

    #[test]
    fn flat_map_propagates_unsettled_and_failure() {
        let half = |v: i32| {
            if v % 2 == 0 {
                AsyncPhase::Success(v / 2)
            } else {
                AsyncPhase::Failure("odd")
            }
        };

        assert_eq!(Phase::Success(8).flat_map(half), AsyncPhase::Success(4));
        assert_eq!(Phase::Success(3).flat_map(half), AsyncPhase::Failure("odd"));
        assert_eq!(Phase::Pending.flat_map(half), AsyncPhase::Pending);
        assert_eq!(Phase::Failure("early").flat_map(half), AsyncPhase::Failure("early"));
    }

    #[test]
    fn merge_prefers_left_failure() {
        let merged = Phase::Failure("left").merge(Phase::Failure("right"));
        assert_eq!(merged, AsyncPhase::Failure("left"));

        let merged = Phase::Running.merge(Phase::Failure("right"));
        assert_eq!(merged, AsyncPhase::Failure("right"));
    }

    #[test]
    fn merge_waits_for_both_successes() {
        assert_eq!(Phase::Success(1).merge(Phase::Running), AsyncPhase::Running);
        assert_eq!(Phase::Pending.merge(Phase::Success(2)), AsyncPhase::Pending);
        assert_eq!(Phase::Running.merge(Phase::Pending), AsyncPhase::Running);
        assert_eq!(Phase::Success(1).merge(Phase::Success(2)), AsyncPhase::Success((1, 2)));
    }

    #[test]
    fn converts_from_result() {
        assert_eq!(Phase::from(Ok(5)), AsyncPhase::Success(5));
        assert_eq!(Phase::from(Err("no")).into_result(), Some(Err("no")));
        assert_eq!(Phase::Running.into_result(), None);
    }
}
