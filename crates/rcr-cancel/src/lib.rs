// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Cancellation tokens shared by every [`RuleContext`] in the runtime.
//!
//! A token starts live, can be cancelled exactly once in effect (repeat
//! cancels are no-ops), and lets any number of cloned holders wait
//! asynchronously for cancellation via [`CancellationToken::cancelled`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// A cheaply cloneable, shared cancellation signal.
///
/// Cloning a token does not create independent state: all clones observe the
/// same cancellation, matching the relationship between a [`RuleContext`] and
/// the child contexts it spawns for `TellNext`/aggregator fan-out.
///
/// [`RuleContext`]: https://docs.rs/rcr-runtime
#[derive(Clone, Debug)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug)]
struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
    reason: Mutex<Option<CancellationReason>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Create a new, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                reason: Mutex::new(None),
            }),
        }
    }

    /// Cancel this token and wake every waiter. Idempotent: only the first
    /// call's `reason` is recorded.
    pub fn cancel(&self, reason: CancellationReason) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            *self.inner.reason.lock().expect("cancellation reason lock poisoned") = Some(reason);
            self.inner.notify.notify_waiters();
        }
    }

    /// Why this token was cancelled, if it has been.
    #[must_use]
    pub fn reason(&self) -> Option<CancellationReason> {
        *self.inner.reason.lock().expect("cancellation reason lock poisoned")
    }

    /// Whether this token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled. Returns immediately if already
    /// cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }

    /// Derive a child token: cancelling the child never cancels the parent,
    /// but cancelling the parent cancels the child. Used when an aggregator
    /// needs to cancel its children without reaching back into the caller's
    /// own token.
    #[must_use]
    pub fn child(&self) -> CancellationToken {
        let child = CancellationToken::new();
        let parent = self.clone();
        let child_for_task = child.clone();
        tokio::spawn(async move {
            parent.cancelled().await;
            let reason = parent.reason().unwrap_or(CancellationReason::ExplicitRequest);
            child_for_task.cancel(reason);
        });
        child
    }
}

/// Why a [`CancellationToken`] was cancelled. Recorded by callers that need
/// to distinguish graceful shutdown from a failure path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CancellationReason {
    /// The owning chain instance was unloaded or the process is shutting down.
    ChainShutdown,
    /// A group-action aggregator reached its match quorum; remaining
    /// children are no longer needed.
    AggregatorQuorumMet,
    /// A group-action aggregator's configured timeout elapsed.
    AggregatorTimeout,
    /// Cancellation was requested explicitly through the admin/API surface.
    ExplicitRequest,
}

impl CancellationReason {
    /// A short human-readable description, suitable for log fields.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::ChainShutdown => "chain shut down",
            Self::AggregatorQuorumMet => "aggregator quorum already satisfied",
            Self::AggregatorTimeout => "aggregator timed out",
            Self::ExplicitRequest => "cancellation requested explicitly",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn token_starts_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_flips_state() {
        let token = CancellationToken::new();
        token.cancel(CancellationReason::ExplicitRequest);
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_records_the_reason() {
        let token = CancellationToken::new();
        token.cancel(CancellationReason::AggregatorTimeout);
        assert_eq!(token.reason(), Some(CancellationReason::AggregatorTimeout));
    }

    #[test]
    fn clone_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel(CancellationReason::ChainShutdown);
        assert!(token.is_cancelled());
    }

    #[test]
    fn multiple_cancels_are_idempotent_and_keep_the_first_reason() {
        let token = CancellationToken::new();
        token.cancel(CancellationReason::AggregatorQuorumMet);
        token.cancel(CancellationReason::ChainShutdown);
        token.cancel(CancellationReason::ExplicitRequest);
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some(CancellationReason::AggregatorQuorumMet));
    }

    #[test]
    fn default_impl_is_not_cancelled() {
        assert!(!CancellationToken::default().is_cancelled());
        assert_eq!(CancellationToken::default().reason(), None);
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel(CancellationReason::ExplicitRequest);
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("cancelled() should resolve without waiting");
    }

    #[tokio::test]
    async fn cancelled_wakes_waiters_on_later_cancel() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel(CancellationReason::ExplicitRequest);
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("waiter should be woken")
            .expect("task should not panic");
    }

    #[tokio::test]
    async fn child_token_is_cancelled_when_parent_is() {
        let parent = CancellationToken::new();
        let child = parent.child();
        parent.cancel(CancellationReason::AggregatorTimeout);
        tokio::time::timeout(Duration::from_millis(200), child.cancelled())
            .await
            .expect("child should observe parent cancellation");
    }

    #[tokio::test]
    async fn child_token_inherits_the_parent_reason() {
        let parent = CancellationToken::new();
        let child = parent.child();
        parent.cancel(CancellationReason::AggregatorTimeout);
        tokio::time::timeout(Duration::from_millis(200), child.cancelled())
            .await
            .expect("child should observe parent cancellation");
        assert_eq!(child.reason(), Some(CancellationReason::AggregatorTimeout));
    }

    #[test]
    fn child_cancel_does_not_cancel_parent() {
        let parent = CancellationToken::new();
        let child = parent.child();
        child.cancel(CancellationReason::ExplicitRequest);
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn all_reasons_have_descriptions() {
        for reason in [
            CancellationReason::ChainShutdown,
            CancellationReason::AggregatorQuorumMet,
            CancellationReason::AggregatorTimeout,
            CancellationReason::ExplicitRequest,
        ] {
            assert!(!reason.description().is_empty());
        }
    }
}
