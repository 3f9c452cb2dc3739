//! Gate service: the application context.
//!
//! Created once at startup with the collaborators injected (port opener,
//! scanner, notification sink) and torn down with [`GateService::shutdown`].
//! There is no global state; everything hangs off this value.
//!
//! # Auto-close
//!
//! With [`AutoCloseMode::Background`] a task sleeps until the pending
//! deadline, fed by the gate timer's `watch` channel, then locks the
//! controller and ticks. Opening another gate moves the deadline and the task
//! re-arms. With [`AutoCloseMode::Opportunistic`] only explicit
//! [`tick`](GateService::tick) calls and new classifications close the gates.

use crate::command::{Category, Command};
use crate::config::{AutoCloseMode, SortgateConfig};
use crate::connection::ConnectionState;
use crate::controller::{ActuationController, ControllerStatus, SharedController};
use crate::discovery::PortScanner;
use crate::dispatcher::DispatchOutcome;
use crate::error::{ClassifierError, LinkError};
use crate::gate::TickOutcome;
use crate::link::PortOpener;
use crate::notify::NotificationSink;
use crate::trigger::{ClassificationTrigger, Classifier, ClassifierInput, TriggerReport};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

/// Running actuation service.
pub struct GateService {
    controller: SharedController,
    trigger: ClassificationTrigger,
    auto_close: Option<JoinHandle<()>>,
}

impl GateService {
    /// Build the controller and, in background mode, spawn the auto-close task.
    ///
    /// Must be called inside a Tokio runtime. No connection is attempted
    /// here; the first command (or [`reconnect`](Self::reconnect)) connects.
    pub fn start(
        config: &SortgateConfig,
        opener: Arc<dyn PortOpener>,
        scanner: Arc<dyn PortScanner>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let controller = ActuationController::new(config, opener, scanner);
        let deadline_rx = controller.subscribe_deadline();
        let controller = controller.into_shared();

        let auto_close = match config.dispatch.auto_close {
            AutoCloseMode::Background => {
                Some(tokio::spawn(auto_close_loop(controller.clone(), deadline_rx)))
            }
            AutoCloseMode::Opportunistic => None,
        };

        info!(
            dwell = ?config.dispatch.dwell,
            auto_close = ?config.dispatch.auto_close,
            "Gate service started"
        );

        Self {
            trigger: ClassificationTrigger::new(controller.clone(), sink),
            controller,
            auto_close,
        }
    }

    /// Shared controller, for callers that need direct access.
    pub fn controller(&self) -> SharedController {
        self.controller.clone()
    }

    /// Classification trigger bound to this service.
    pub fn trigger(&self) -> &ClassificationTrigger {
        &self.trigger
    }

    /// Handle a classifier label (dispatch, then notify).
    pub async fn handle_label(&self, label: &str, text: Option<&str>) -> TriggerReport {
        self.trigger.on_classification(label, text).await
    }

    /// Classify an input and handle the result.
    pub async fn classify(
        &self,
        classifier: &dyn Classifier,
        input: &ClassifierInput,
    ) -> Result<TriggerReport, ClassifierError> {
        self.trigger.classify_and_handle(classifier, input).await
    }

    /// Manual test: open one gate directly, without notifying the inventory.
    pub async fn test_category(&self, category: Category) -> Result<DispatchOutcome, LinkError> {
        let mut controller = self.controller.lock().await;
        controller.tick().await;
        controller.dispatch_category(category.label()).await
    }

    /// Operator-requested reconnect (subject to the rate limit).
    pub async fn reconnect(&self) -> Result<(), LinkError> {
        self.controller.lock().await.connect().await
    }

    /// Close the pending gate if due.
    pub async fn tick(&self) -> TickOutcome {
        self.controller.lock().await.tick().await
    }

    /// Status snapshot.
    pub async fn status(&self) -> ControllerStatus {
        self.controller.lock().await.status()
    }

    /// Stop the auto-close task, close any open gate and release the port.
    ///
    /// The close is attempted only while connected; shutdown never
    /// reconnects.
    pub async fn shutdown(mut self) {
        if let Some(task) = self.auto_close.take() {
            task.abort();
        }

        let mut controller = self.controller.lock().await;
        let status = controller.status();
        if status.gate.open_category.is_some()
            && status.connection.state == ConnectionState::Connected
        {
            if let Err(e) = controller.send(Command::CloseAll).await {
                debug!(error = %e, "Could not close gates during shutdown");
            }
        }
        controller.disconnect().await;
        info!("Gate service stopped");
    }
}

impl Drop for GateService {
    fn drop(&mut self) {
        if let Some(task) = self.auto_close.take() {
            task.abort();
        }
    }
}

/// Sleep until the pending deadline, then tick. Re-arms on every change.
async fn auto_close_loop(
    controller: SharedController,
    mut deadline_rx: watch::Receiver<Option<Instant>>,
) {
    loop {
        let deadline = *deadline_rx.borrow_and_update();
        match deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = sleep_until(deadline) => {
                        let outcome = controller.lock().await.tick().await;
                        debug!(?outcome, "Auto-close fired");
                    }
                    changed = deadline_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            None => {
                if deadline_rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Auto-close task stopped");
}
