//! Auto-close timer for the single open gate.
//!
//! At most one close is pending. Opening a gate replaces whatever was
//! scheduled; a tick past the deadline clears the schedule and sends
//! `CloseAll` exactly once, whether or not that send succeeds.

use crate::command::{Category, Command};
use crate::dispatcher::CommandDispatcher;
use crate::error::LinkError;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A scheduled close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingClose {
    /// When the close is due
    pub deadline: Instant,
    /// Gate that was opened
    pub category: Category,
}

/// What a tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing scheduled.
    Idle,
    /// A close is scheduled but not yet due.
    Waiting {
        /// Time left until the deadline
        remaining: Duration,
    },
    /// `CloseAll` was sent.
    Closed,
    /// The close was due but the send failed; it is not retried.
    CloseFailed(LinkError),
}

/// Gate state for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateStatus {
    /// Gate currently believed open
    pub open_category: Option<Category>,
    /// Time until it closes
    #[serde(with = "humantime_serde")]
    pub closes_in: Option<Duration>,
    /// Configured dwell
    #[serde(with = "humantime_serde")]
    pub dwell: Duration,
}

/// Holds the pending auto-close.
#[derive(Debug)]
pub struct GateTimer {
    pending: Option<PendingClose>,
    dwell: Duration,
    deadline_tx: watch::Sender<Option<Instant>>,
}

impl GateTimer {
    /// Create an idle timer with the given dwell.
    pub fn new(dwell: Duration) -> Self {
        let (deadline_tx, _) = watch::channel(None);
        Self {
            pending: None,
            dwell,
            deadline_tx,
        }
    }

    /// Configured dwell.
    pub fn dwell(&self) -> Duration {
        self.dwell
    }

    /// Pending close, if any.
    pub fn pending(&self) -> Option<PendingClose> {
        self.pending
    }

    /// Deadline of the pending close, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.deadline)
    }

    /// Schedule a close `dwell` after `opened_at`, replacing any earlier one.
    pub fn schedule(&mut self, category: Category, opened_at: Instant) -> Instant {
        let deadline = opened_at + self.dwell;
        if let Some(previous) = self.pending.replace(PendingClose { deadline, category }) {
            debug!(previous = %previous.category, next = %category, "Replacing pending gate close");
        }
        self.publish();
        deadline
    }

    /// Drop the pending close without sending anything.
    pub fn cancel(&mut self) {
        if self.pending.take().is_some() {
            self.publish();
        }
    }

    /// Watch the current deadline; used by the background closer.
    pub fn subscribe(&self) -> watch::Receiver<Option<Instant>> {
        self.deadline_tx.subscribe()
    }

    /// Status relative to `now`.
    pub fn status_at(&self, now: Instant) -> GateStatus {
        GateStatus {
            open_category: self.pending.map(|p| p.category),
            closes_in: self.pending.map(|p| p.deadline.saturating_duration_since(now)),
            dwell: self.dwell,
        }
    }

    /// Close the gates if the deadline has passed.
    ///
    /// The schedule is cleared before the send so a failed close is never
    /// retried by a later tick.
    pub async fn tick(&mut self, dispatcher: &mut CommandDispatcher) -> TickOutcome {
        let now = Instant::now();
        let Some(pending) = self.pending else {
            return TickOutcome::Idle;
        };
        if now < pending.deadline {
            return TickOutcome::Waiting {
                remaining: pending.deadline - now,
            };
        }

        self.pending = None;
        self.publish();

        match dispatcher.send(Command::CloseAll).await {
            Ok(()) => {
                info!(gate = pending.category.gate(), "Closed gates after dwell");
                TickOutcome::Closed
            }
            Err(e) => {
                warn!(error = %e, "Failed to close gates; not retrying");
                TickOutcome::CloseFailed(e)
            }
        }
    }

    fn publish(&self) {
        // send_replace keeps the value even with no subscribers
        self.deadline_tx.send_replace(self.deadline());
    }
}
