//! Classification trigger.
//!
//! Entry point for every classifier result. A label that normalizes to
//! `None` (or nothing) ends here. Anything else is dispatched to the gates
//! and then, whatever the dispatch outcome, reported to the notification
//! sink. The two outcomes are returned side by side.
//!
//! The controller lock is held for the dispatch only. The notification runs
//! after it is released so a slow inventory service cannot hold up the
//! auto-close.

use crate::command::{is_none_label, normalize_label};
use crate::controller::SharedController;
use crate::dispatcher::DispatchOutcome;
use crate::error::{ClassifierError, LinkError, NotifyError};
use crate::gate::TickOutcome;
use crate::notify::{NotificationSink, NotifyReceipt};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the classifier is asked about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierInput {
    /// A JPEG-encoded photo of the container
    Image {
        /// Encoded image bytes
        jpeg: Vec<u8>,
    },
    /// Text already extracted from the label
    Text(String),
}

impl ClassifierInput {
    /// Text to report alongside the result, if the input carries any.
    pub fn extracted_text(&self) -> Option<&str> {
        match self {
            ClassifierInput::Text(text) => Some(text.as_str()),
            ClassifierInput::Image { .. } => None,
        }
    }
}

/// External classifier: image or text in, one category label out.
///
/// The label is free text; it is normalized before use.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify one input.
    async fn classify(&self, input: &ClassifierInput) -> Result<String, ClassifierError>;
}

/// Outcome of one classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerReport {
    /// The label was `None`; nothing was sent or posted.
    Skipped {
        /// Normalized label
        label: String,
    },
    /// Dispatch and notification were both attempted.
    Handled {
        /// Normalized label
        label: String,
        /// Serial side
        dispatch: Result<DispatchOutcome, LinkError>,
        /// Inventory side
        notification: Result<NotifyReceipt, NotifyError>,
    },
}

impl TriggerReport {
    /// Normalized label.
    pub fn label(&self) -> &str {
        match self {
            TriggerReport::Skipped { label } | TriggerReport::Handled { label, .. } => label,
        }
    }

    /// Whether a gate was opened.
    pub fn opened_gate(&self) -> bool {
        matches!(
            self,
            TriggerReport::Handled {
                dispatch: Ok(DispatchOutcome::Opened { .. }),
                ..
            }
        )
    }
}

/// Routes classifier results to the gates and the inventory.
#[derive(Clone)]
pub struct ClassificationTrigger {
    controller: SharedController,
    sink: Arc<dyn NotificationSink>,
}

impl ClassificationTrigger {
    /// Create a trigger over a shared controller.
    pub fn new(controller: SharedController, sink: Arc<dyn NotificationSink>) -> Self {
        Self { controller, sink }
    }

    /// Handle one classifier label and the text it was derived from.
    pub async fn on_classification(&self, raw_label: &str, text: Option<&str>) -> TriggerReport {
        let label = normalize_label(raw_label).to_string();
        if is_none_label(&label) {
            debug!(raw = raw_label, "No actionable classification");
            return TriggerReport::Skipped { label };
        }

        let dispatch = {
            let mut controller = self.controller.lock().await;
            // a close that fell due while idle goes out before the next open
            if let TickOutcome::CloseFailed(e) = controller.tick().await {
                debug!(error = %e, "Overdue close failed before dispatch");
            }
            controller.dispatch_category(&label).await
        };

        match &dispatch {
            Ok(DispatchOutcome::Opened { category, .. }) => {
                info!(%category, "Gate opened for classification")
            }
            Ok(DispatchOutcome::NoAction { .. }) => {
                debug!(label = %label, "Classification has no gate")
            }
            Err(e) => warn!(label = %label, error = %e, "Could not actuate gate"),
        }

        let notification = self.sink.notify(&label, text).await;
        match &notification {
            Ok(receipt) => debug!(url = %receipt.url, "Inventory notified"),
            Err(NotifyError::NotConfigured) => {}
            Err(e) => warn!(error = %e, "Failed to send result to inventory"),
        }

        TriggerReport::Handled {
            label,
            dispatch,
            notification,
        }
    }

    /// Run the classifier, then handle its label.
    ///
    /// A classifier failure is returned as-is: no gate moves and nothing is
    /// posted.
    pub async fn classify_and_handle(
        &self,
        classifier: &dyn Classifier,
        input: &ClassifierInput,
    ) -> Result<TriggerReport, ClassifierError> {
        let label = classifier.classify(input).await.map_err(|e| {
            warn!(error = %e, "Classification failed");
            e
        })?;
        Ok(self.on_classification(&label, input.extracted_text()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SortgateConfig;
    use crate::controller::ActuationController;
    use crate::mock::MockPortOpener;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(
            &self,
            category: &str,
            text: Option<&str>,
        ) -> Result<NotifyReceipt, NotifyError> {
            self.calls
                .lock()
                .push((category.to_string(), text.map(str::to_string)));
            Ok(NotifyReceipt {
                url: format!("mock://{category}"),
                status: 200,
            })
        }
    }

    struct FixedClassifier(Result<String, ClassifierError>);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, _input: &ClassifierInput) -> Result<String, ClassifierError> {
            self.0.clone()
        }
    }

    fn setup(bench: &MockPortOpener) -> (ClassificationTrigger, Arc<RecordingSink>) {
        let controller = ActuationController::new(
            &SortgateConfig::default(),
            Arc::new(bench.clone()),
            Arc::new(bench.clone()),
        )
        .into_shared();
        let sink = Arc::new(RecordingSink::default());
        (ClassificationTrigger::new(controller, sink.clone()), sink)
    }

    #[tokio::test(start_paused = true)]
    async fn none_label_does_nothing() {
        let bench = MockPortOpener::new();
        let board = bench.attach("/dev/ttyUSB0");
        let (trigger, sink) = setup(&bench);

        let report = trigger.on_classification("None.", Some("water")).await;

        assert_eq!(report, TriggerReport::Skipped { label: "None".into() });
        assert!(board.written().is_empty());
        assert!(sink.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn notification_follows_failed_dispatch() {
        let bench = MockPortOpener::new();
        let (trigger, sink) = setup(&bench);

        let report = trigger.on_classification("Flammable", Some("ethanol")).await;

        match report {
            TriggerReport::Handled {
                dispatch,
                notification,
                ..
            } => {
                assert!(dispatch.is_err());
                assert!(notification.is_ok());
            }
            other => panic!("unexpected report {other:?}"),
        }
        assert_eq!(
            *sink.calls.lock(),
            vec![("Flammable".to_string(), Some("ethanol".to_string()))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_label_is_still_reported() {
        let bench = MockPortOpener::new();
        let board = bench.attach("/dev/ttyUSB0");
        let (trigger, sink) = setup(&bench);

        let report = trigger.on_classification("Explosive!", None).await;

        assert!(!report.opened_gate());
        assert!(board.written().is_empty());
        assert_eq!(sink.calls.lock()[0].0, "Explosive");
    }

    #[tokio::test(start_paused = true)]
    async fn classifier_error_skips_everything() {
        let bench = MockPortOpener::new();
        let board = bench.attach("/dev/ttyUSB0");
        let (trigger, sink) = setup(&bench);
        let classifier = FixedClassifier(Err(ClassifierError("model timed out".into())));

        let result = trigger
            .classify_and_handle(&classifier, &ClassifierInput::Image { jpeg: vec![0xff, 0xd8] })
            .await;

        assert_eq!(result, Err(ClassifierError("model timed out".into())));
        assert!(board.written().is_empty());
        assert!(sink.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn text_input_is_forwarded_as_name() {
        let bench = MockPortOpener::new();
        let board = bench.attach("/dev/ttyUSB0");
        let (trigger, sink) = setup(&bench);
        let classifier = FixedClassifier(Ok("Corrosive.".into()));

        let report = trigger
            .classify_and_handle(
                &classifier,
                &ClassifierInput::Text("Hydrochloric acid 37%".into()),
            )
            .await
            .unwrap();

        assert!(report.opened_gate());
        assert_eq!(board.commands(), b"3".to_vec());
        assert_eq!(
            sink.calls.lock()[0],
            ("Corrosive".to_string(), Some("Hydrochloric acid 37%".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_close_goes_out_before_next_open() {
        let bench = MockPortOpener::new();
        let board = bench.attach("/dev/ttyUSB0");
        let (trigger, _sink) = setup(&bench);

        trigger.on_classification("Flammable", None).await;
        tokio::time::advance(std::time::Duration::from_secs(6)).await;
        trigger.on_classification("Corrosive", None).await;

        assert_eq!(board.commands(), b"103".to_vec());
    }
}
