// crates/tenancy-core/src/runtime/scope.rs
// ============================================================================
// Module: Request Scope
// Description: Deadline and cancellation carried by one logical request.
// Purpose: Bound blocking tenancy operations by the caller's context.
// Dependencies: std
// ============================================================================

//! ## Overview
//! A [`RequestScope`] travels with one request through resolution and
//! binding. Blocking steps consult it before starting and bound their waits
//! by [`RequestScope::remaining`]. Cleanup never consults it: a cancelled or
//! expired scope still gets its connection reset.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use thiserror::Error;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Reason a scope refuses further work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScopeInterrupt {
    /// Caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
    /// Request deadline passed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

/// Deadline and cancellation state for one request.
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    /// Absolute deadline, if any.
    deadline: Option<Instant>,
    /// Shared cancellation flag.
    cancelled: Arc<AtomicBool>,
}

impl RequestScope {
    /// Creates a scope with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scope that expires after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a scope that expires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a handle that cancels this scope and every clone of it.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Returns the absolute deadline.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true once the scope was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns the time left before the deadline; `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Clamps `limit` to the remaining time.
    #[must_use]
    pub fn clamp(&self, limit: Duration) -> Duration {
        self.remaining().map_or(limit, |remaining| remaining.min(limit))
    }

    /// Fails when the scope is cancelled or expired.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeInterrupt`] describing why work must not start.
    pub fn check(&self) -> Result<(), ScopeInterrupt> {
        if self.is_cancelled() {
            return Err(ScopeInterrupt::Cancelled);
        }
        if self.remaining().is_some_and(|remaining| remaining.is_zero()) {
            return Err(ScopeInterrupt::DeadlineExceeded);
        }
        Ok(())
    }
}

/// Cancels a [`RequestScope`] from another thread.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    /// Flag shared with the scope.
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Marks the scope cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
