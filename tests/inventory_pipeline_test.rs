//! Classifier label -> gate byte -> inventory POST, against a local HTTP
//! endpoint that records what it receives.

use axum::{extract::Path, extract::State, http::StatusCode, routing::post, Json, Router};
use parking_lot::Mutex;
use serde_json::Value;
use sortgate::config::SortgateConfig;
use sortgate::dispatcher::DispatchOutcome;
use sortgate::error::{ClassifierError, NotifyError};
use sortgate::mock::MockPortOpener;
use sortgate::notify::InventoryNotifier;
use sortgate::service::GateService;
use sortgate::trigger::{Classifier, ClassifierInput, TriggerReport};
use std::sync::Arc;
use std::time::Duration;

type Received = Arc<Mutex<Vec<(String, Value)>>>;

/// Inventory stand-in. Category `reject` answers 500.
async fn start_inventory() -> (String, Received) {
    let received: Received = Arc::default();

    async fn create_item(
        State(received): State<Received>,
        Path(category): Path<String>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        let status = if category == "reject" {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::CREATED
        };
        received.lock().push((category, body));
        status
    }

    let app = Router::new()
        .route("/api/items/create/:category", post(create_item))
        .with_state(received.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), received)
}

fn fast_config(base_url: &str) -> SortgateConfig {
    let mut config = SortgateConfig::default();
    config.serial.settle_delay = Duration::from_millis(5);
    config.serial.release_delay = Duration::from_millis(5);
    config.dispatch.post_write_delay = Duration::from_millis(1);
    config.dispatch.retry_delay = Duration::from_millis(5);
    config.dispatch.dwell = Duration::from_secs(2);
    config.notification.base_url = Some(base_url.to_string());
    config.notification.timeout = Duration::from_secs(5);
    config
}

fn start_service(config: &SortgateConfig, bench: &MockPortOpener) -> GateService {
    let notifier = InventoryNotifier::new(&config.notification).unwrap();
    GateService::start(
        config,
        Arc::new(bench.clone()),
        Arc::new(bench.clone()),
        Arc::new(notifier),
    )
}

#[tokio::test]
async fn test_corrosive_with_punctuation() {
    let (base, received) = start_inventory().await;
    let bench = MockPortOpener::new();
    let board = bench.attach("/dev/ttyUSB0");
    let svc = start_service(&fast_config(&base), &bench);

    let report = svc.handle_label("Corrosive!", None).await;

    assert_eq!(report.label(), "Corrosive");
    assert!(report.opened_gate());
    assert_eq!(board.commands(), b"3".to_vec());

    let received = received.lock().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, "corrosive");
    assert_eq!(received[0].1, serde_json::json!({ "name": "corrosive" }));
    svc.shutdown().await;
}

#[tokio::test]
async fn test_cold_storage_is_filed_as_toxic() {
    let (base, received) = start_inventory().await;
    let bench = MockPortOpener::new();
    let board = bench.attach("/dev/ttyUSB0");
    let svc = start_service(&fast_config(&base), &bench);

    let report = svc.handle_label("Cold storage", Some("Liquid nitrogen")).await;

    match report {
        TriggerReport::Handled { notification, .. } => {
            let receipt = notification.unwrap();
            assert!(receipt.url.ends_with("/api/items/create/toxic"));
            assert_eq!(receipt.status, 201);
        }
        other => panic!("unexpected report {other:?}"),
    }
    assert_eq!(board.commands(), b"2".to_vec());
    assert_eq!(
        received.lock()[0],
        (
            "toxic".to_string(),
            serde_json::json!({ "name": "Liquid nitrogen" })
        )
    );
    svc.shutdown().await;
}

#[tokio::test]
async fn test_other_chemicals_is_filed_as_others() {
    let (base, received) = start_inventory().await;
    let bench = MockPortOpener::new();
    bench.attach("/dev/ttyUSB0");
    let svc = start_service(&fast_config(&base), &bench);

    svc.handle_label("Other chemicals.", None).await;

    assert_eq!(received.lock()[0].0, "others");
    svc.shutdown().await;
}

#[tokio::test]
async fn test_notification_sent_without_board() {
    let (base, received) = start_inventory().await;
    let bench = MockPortOpener::new();
    let svc = start_service(&fast_config(&base), &bench);

    let report = svc.handle_label("Flammable", Some("Acetone")).await;

    match report {
        TriggerReport::Handled {
            dispatch,
            notification,
            ..
        } => {
            assert!(dispatch.unwrap_err().is_absent());
            assert!(notification.is_ok());
        }
        other => panic!("unexpected report {other:?}"),
    }
    assert_eq!(received.lock()[0].0, "flammable");
    svc.shutdown().await;
}

#[tokio::test]
async fn test_server_error_is_reported_not_fatal() {
    let (base, _received) = start_inventory().await;
    let bench = MockPortOpener::new();
    let board = bench.attach("/dev/ttyUSB0");
    let svc = start_service(&fast_config(&base), &bench);

    let report = svc.handle_label("Reject", None).await;

    match report {
        TriggerReport::Handled {
            dispatch,
            notification,
            ..
        } => {
            assert!(matches!(dispatch, Ok(DispatchOutcome::NoAction { .. })));
            assert!(matches!(
                notification,
                Err(NotifyError::Status { status: 500, .. })
            ));
        }
        other => panic!("unexpected report {other:?}"),
    }
    assert!(board.written().is_empty());
    svc.shutdown().await;
}

#[tokio::test]
async fn test_background_close_after_real_dwell() {
    let (base, _received) = start_inventory().await;
    let bench = MockPortOpener::new();
    let board = bench.attach("/dev/ttyUSB0");
    let mut config = fast_config(&base);
    config.dispatch.dwell = Duration::from_millis(200);
    let svc = start_service(&config, &bench);

    svc.handle_label("Flammable", None).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(board.commands(), b"10".to_vec());
    svc.shutdown().await;
}

struct TextEcho;

#[async_trait::async_trait]
impl Classifier for TextEcho {
    async fn classify(&self, input: &ClassifierInput) -> Result<String, ClassifierError> {
        match input {
            ClassifierInput::Text(text) if text.contains("acid") => Ok("Corrosive.".into()),
            ClassifierInput::Text(_) => Ok("None".into()),
            ClassifierInput::Image { .. } => Err(ClassifierError("no vision model".into())),
        }
    }
}

#[tokio::test]
async fn test_classifier_front_end() {
    let (base, received) = start_inventory().await;
    let bench = MockPortOpener::new();
    let board = bench.attach("/dev/ttyUSB0");
    let svc = start_service(&fast_config(&base), &bench);

    let report = svc
        .classify(&TextEcho, &ClassifierInput::Text("Sulfuric acid 98%".into()))
        .await
        .unwrap();
    assert!(report.opened_gate());

    let skipped = svc
        .classify(&TextEcho, &ClassifierInput::Text("distilled water".into()))
        .await
        .unwrap();
    assert!(matches!(skipped, TriggerReport::Skipped { .. }));

    assert!(svc
        .classify(&TextEcho, &ClassifierInput::Image { jpeg: vec![] })
        .await
        .is_err());

    assert_eq!(board.commands(), b"3".to_vec());
    assert_eq!(
        *received.lock(),
        vec![(
            "corrosive".to_string(),
            serde_json::json!({ "name": "Sulfuric acid 98%" })
        )]
    );
    svc.shutdown().await;
}
