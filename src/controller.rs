//! The actuation context object.
//!
//! [`ActuationController`] owns every piece of mutable actuation state: the
//! connection (inside the dispatcher) and the pending auto-close. It is
//! created once at startup and shared as a [`SharedController`]; holding the
//! mutex for the duration of an operation is what serializes the trigger
//! points (classification, manual test, reconnect, status, auto-close).

use crate::command::Command;
use crate::config::SortgateConfig;
use crate::connection::{ConnectionManager, ConnectionStatus};
use crate::discovery::PortScanner;
use crate::dispatcher::{CommandDispatcher, DispatchOutcome, DispatchPolicy};
use crate::error::LinkError;
use crate::gate::{GateStatus, GateTimer, TickOutcome};
use crate::link::PortOpener;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

/// Controller shared between triggers and the auto-close task.
pub type SharedController = Arc<Mutex<ActuationController>>;

/// Combined status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerStatus {
    /// Serial link
    pub connection: ConnectionStatus,
    /// Gates
    pub gate: GateStatus,
}

/// Connection, dispatcher and gate timer under one owner.
pub struct ActuationController {
    dispatcher: CommandDispatcher,
    gate: GateTimer,
}

impl ActuationController {
    /// Build a disconnected controller from configuration.
    pub fn new(
        config: &SortgateConfig,
        opener: Arc<dyn PortOpener>,
        scanner: Arc<dyn PortScanner>,
    ) -> Self {
        let connection = ConnectionManager::from_config(opener, scanner, &config.serial);
        Self {
            dispatcher: CommandDispatcher::new(connection, DispatchPolicy::from(&config.dispatch)),
            gate: GateTimer::new(config.dispatch.dwell),
        }
    }

    /// Wrap for sharing.
    pub fn into_shared(self) -> SharedController {
        Arc::new(Mutex::new(self))
    }

    /// Reconnect (subject to the rate limit).
    pub async fn connect(&mut self) -> Result<(), LinkError> {
        self.dispatcher.connection_mut().connect().await
    }

    /// Close the port and drop any pending close.
    pub async fn disconnect(&mut self) {
        self.gate.cancel();
        self.dispatcher.connection_mut().disconnect().await;
    }

    /// Send a raw command.
    pub async fn send(&mut self, command: Command) -> Result<(), LinkError> {
        self.dispatcher.send(command).await
    }

    /// Route a label to its gate and schedule the close.
    pub async fn dispatch_category(&mut self, label: &str) -> Result<DispatchOutcome, LinkError> {
        self.dispatcher.dispatch_category(label, &mut self.gate).await
    }

    /// Fire the pending close if it is due.
    pub async fn tick(&mut self) -> TickOutcome {
        self.gate.tick(&mut self.dispatcher).await
    }

    /// Deadline of the pending close.
    pub fn close_deadline(&self) -> Option<Instant> {
        self.gate.deadline()
    }

    /// Subscribe to deadline changes.
    pub fn subscribe_deadline(&self) -> watch::Receiver<Option<Instant>> {
        self.gate.subscribe()
    }

    /// Connection and gate status.
    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            connection: self.dispatcher.connection().status(),
            gate: self.gate.status_at(Instant::now()),
        }
    }
}
