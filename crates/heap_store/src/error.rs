//! Host error reporting.
//!
//! Failing host primitives record their error in the store's error state
//! before returning it, the way an `ereport` pushes onto the error data stack.
//! Callers that intercept the error must flush that state before making the
//! next call on the same thread; primitives refuse to run while stale error
//! data of the calling thread is pending.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

/// SQLSTATE of a canceled statement.
pub const SQLSTATE_QUERY_CANCELED: &str = "57014";
/// SQLSTATE of an undefined table.
pub const SQLSTATE_UNDEFINED_TABLE: &str = "42P01";
/// SQLSTATE of an internal error.
pub const SQLSTATE_INTERNAL_ERROR: &str = "XX000";
/// SQLSTATE of a datatype mismatch.
pub const SQLSTATE_DATATYPE_MISMATCH: &str = "42804";

/// Error raised by the row-store host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    pub sqlstate: String,
    pub message: String,
}

impl HostError {
    pub fn new(sqlstate: &str, message: impl Into<String>) -> Self {
        Self {
            sqlstate: sqlstate.to_string(),
            message: message.into(),
        }
    }

    pub fn query_canceled() -> Self {
        Self::new(
            SQLSTATE_QUERY_CANCELED,
            "canceling statement due to user request",
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(SQLSTATE_INTERNAL_ERROR, message)
    }

    pub fn is_cancellation(&self) -> bool {
        self.sqlstate == SQLSTATE_QUERY_CANCELED
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (SQLSTATE {})", self.message, self.sqlstate)
    }
}

impl std::error::Error for HostError {}

/// Error data raised but not yet flushed, kept per calling thread.
///
/// Each thread plays the role of one backend: a raise is only visible to
/// `ensure_clean`, `depth` and `flush` on the thread that raised it, so one
/// session's pending error never blocks or gets cleared by another.
#[derive(Debug, Default)]
pub struct ErrorState {
    stacks: Mutex<HashMap<ThreadId, Vec<HostError>>>,
}

impl ErrorState {
    /// Records `err` for the calling thread and hands it back for returning
    /// to the caller.
    pub fn raise(&self, err: HostError) -> HostError {
        self.lock()
            .entry(thread::current().id())
            .or_default()
            .push(err.clone());
        err
    }

    /// Pending records of the calling thread.
    pub fn depth(&self) -> usize {
        self.lock()
            .get(&thread::current().id())
            .map_or(0, Vec::len)
    }

    /// Pending records across every thread.
    pub fn total_depth(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    /// Drops every pending record of the calling thread.
    pub fn flush(&self) {
        self.lock().remove(&thread::current().id());
    }

    /// Fails when the calling thread never flushed a previous error.
    pub fn ensure_clean(&self) -> Result<(), HostError> {
        let guard = self.lock();
        match guard
            .get(&thread::current().id())
            .and_then(|stack| stack.last())
        {
            Some(pending) => Err(HostError::internal(format!(
                "error state not reset after: {}",
                pending.message
            ))),
            None => Ok(()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ThreadId, Vec<HostError>>> {
        self.stacks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn pending_error_blocks_until_flushed() {
        let state = ErrorState::default();
        assert!(state.ensure_clean().is_ok());
        let err = state.raise(HostError::query_canceled());
        assert!(err.is_cancellation());
        assert_eq!(state.depth(), 1);
        assert!(state.ensure_clean().is_err());
        state.flush();
        assert_eq!(state.depth(), 0);
        assert!(state.ensure_clean().is_ok());
    }

    #[test]
    fn pending_error_is_private_to_the_raising_thread() {
        let state = Arc::new(ErrorState::default());
        state.raise(HostError::internal("boom"));

        let other = Arc::clone(&state);
        let seen = thread::spawn(move || {
            let clean = other.ensure_clean().is_ok();
            let depth = other.depth();
            other.flush();
            (clean, depth)
        })
        .join()
        .expect("worker thread");
        assert_eq!(seen, (true, 0));

        assert_eq!(state.depth(), 1);
        assert_eq!(state.total_depth(), 1);
        assert!(state.ensure_clean().is_err());
        state.flush();
        assert_eq!(state.total_depth(), 0);
    }
}
