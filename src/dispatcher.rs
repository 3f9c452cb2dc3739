//! Command dispatcher: labels in, single bytes out.
//!
//! A send reconnects on demand, writes the byte with a bounded number of
//! attempts and, once those are exhausted, invalidates the connection so the
//! next send starts with a fresh `connect()`.

use crate::command::{normalize_label, Category, Command};
use crate::config::DispatchConfig;
use crate::connection::ConnectionManager;
use crate::error::LinkError;
use crate::gate::GateTimer;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Retry and timing policy for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Total write attempts per command
    pub write_attempts: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
    /// Pause after a successful write
    pub post_write_delay: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for DispatchPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            write_attempts: config.write_attempts.max(1),
            retry_delay: config.retry_delay,
            post_write_delay: config.post_write_delay,
        }
    }
}

/// Result of routing one label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The gate was opened and will close at `close_at`.
    Opened {
        /// Category routed
        category: Category,
        /// Scheduled auto-close deadline
        close_at: Instant,
    },
    /// The label is not in the category table (or is `None`); nothing sent.
    NoAction {
        /// Normalized label
        label: String,
    },
}

/// Writes commands through the connection manager.
pub struct CommandDispatcher {
    connection: ConnectionManager,
    policy: DispatchPolicy,
}

impl CommandDispatcher {
    /// Create a dispatcher owning `connection`.
    pub fn new(connection: ConnectionManager, policy: DispatchPolicy) -> Self {
        Self { connection, policy }
    }

    /// The underlying connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Mutable access for reconnect and teardown.
    pub fn connection_mut(&mut self) -> &mut ConnectionManager {
        &mut self.connection
    }

    /// Send one command.
    ///
    /// Reconnects first when needed; a failed reconnect returns without any
    /// write. Exhausted write attempts mark the link disconnected.
    pub async fn send(&mut self, command: Command) -> Result<(), LinkError> {
        if !self.connection.is_connected() {
            self.connection.connect().await?;
        }

        let byte = command.to_byte();
        let attempts = self.policy.write_attempts;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.connection.write_byte(byte).await {
                Ok(()) => {
                    info!(byte = %char::from(byte), %command, "Sent command to gate controller");
                    sleep(self.policy.post_write_delay).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, attempts, %command, error = %e, "Write attempt failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }

        self.connection.mark_disconnected();
        Err(LinkError::WriteFailed {
            attempts,
            reason: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// Route a classifier label to its gate.
    ///
    /// Only a successful open schedules the auto-close (replacing any
    /// pending one). Labels outside the table are a no-op, not an error.
    pub async fn dispatch_category(
        &mut self,
        label: &str,
        gate: &mut GateTimer,
    ) -> Result<DispatchOutcome, LinkError> {
        let label = normalize_label(label);
        let Some(category) = Category::from_label(label) else {
            debug!(label, "No command sent - unknown category");
            return Ok(DispatchOutcome::NoAction {
                label: label.to_string(),
            });
        };

        let command = Command::OpenGate(category);
        match self.send(command).await {
            Ok(()) => {
                let close_at = gate.schedule(category, Instant::now());
                Ok(DispatchOutcome::Opened { category, close_at })
            }
            Err(e) => {
                if e.is_absent() {
                    debug!(
                        byte = %char::from(command.to_byte()),
                        %category,
                        "Would send command to gate controller (but it is not connected)"
                    );
                }
                Err(e)
            }
        }
    }
}
