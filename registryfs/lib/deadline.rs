use std::time::{Duration, Instant};

use reqwest::RequestBuilder;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A shared time budget for one logical operation.
///
/// Every sub-operation recomputes the remaining budget from the same absolute
/// deadline, so no HTTP request ever outlives the deadline of the operation
/// that issued it. A deadline built from `None` is unbounded.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Deadline {
    /// Starts a deadline `timeout` from now, or an unbounded one for `None`.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            expires_at: timeout.map(|timeout| Instant::now() + timeout),
        }
    }

    /// Returns the remaining budget, or `None` when unbounded.
    ///
    /// An exhausted deadline reports a zero remainder.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Returns true once the budget is spent.
    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(rest) if rest.is_zero())
    }

    /// Clamps `request` to the remaining budget.
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self.remaining() {
            Some(rest) => request.timeout(rest),
            None => request,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
