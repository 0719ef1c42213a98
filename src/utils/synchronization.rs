//! Synchronization utilities for multi-threaded graph construction.
//!
//! This module provides the cooperative cancellation primitive shared by top-level and
//! nested graph builds.
//!
//! # Key Components
//!
//! - [`CancellationToken`] - A cloneable flag that requests a build to stop lowering promptly
//!
//! # Design Principles
//!
//! - **Cooperative**: cancellation is advisory; the builder polls the token at block
//!   boundaries and aborts with [`Error::Cancelled`](crate::Error::Cancelled)
//! - **Shared**: clones observe the same underlying flag, so one token can cover a whole
//!   family of graph builds running on different threads
//! - **Non-publishing**: a cancelled construction never installs a partially built graph
//!   into any cache slot

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{Error, Result};

/// A cooperative cancellation token observed by graph construction.
///
/// The token wraps a shared atomic flag. Cloning produces another handle to the same flag;
/// calling [`cancel`](Self::cancel) on any handle is visible to all of them. Construction
/// checks the token at block-creation boundaries, so a pending request stops the lowering
/// walk promptly rather than immediately.
///
/// # Examples
///
/// ```rust
/// use flowscope::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// assert!(!worker_token.is_cancelled());
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    /// Shared flag; `true` once cancellation has been requested.
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a new token with no pending cancellation request.
    ///
    /// # Returns
    ///
    /// A fresh `CancellationToken` whose flag is unset.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Requests cancellation.
    ///
    /// All clones of this token observe the request. The call is idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` if cancellation has been requested on this token or any clone of it.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns [`Error::Cancelled`] if cancellation has been requested.
    ///
    /// This is the polling entry point used by the builder at block boundaries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when the token has been cancelled.
    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_token_starts_unset() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_cancel_is_visible_to_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();

        token.cancel();

        assert!(clone.is_cancelled());
        assert!(matches!(clone.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_crosses_threads() {
        let token = CancellationToken::new();
        let observer = token.clone();

        let handle = thread::spawn(move || {
            while !observer.is_cancelled() {
                thread::yield_now();
            }
            true
        });

        token.cancel();
        assert!(handle.join().unwrap());
    }
}
