//! HTTP tests of the accounts router over the in-memory store

use std::sync::{Arc, Mutex};

use accounts::{
    credentials::SecureCredentialTools,
    models::RegistrationReceipt,
    notifier::ConfirmationNotifier,
    repositories::{FailurePoint, MemoryStore},
    routes::{AppState, MessageResponse, create_router},
    service::RegistrationService,
};
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use common::{AppError, AppResult};
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

const BASE_URL: &str = "http://localhost/user/confirm";

#[derive(Debug, Clone)]
struct Delivery {
    confirmation_code: Uuid,
    security_code: String,
    link: String,
}

/// Notifier that remembers what it was asked to deliver
#[derive(Clone, Default)]
struct RecordingNotifier {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
    fail: bool,
}

impl RecordingNotifier {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfirmationNotifier for RecordingNotifier {
    async fn send_confirmation(
        &self,
        receipt: &RegistrationReceipt,
        confirmation_link: &str,
    ) -> AppResult<()> {
        if self.fail {
            return Err(AppError::repository(
                "Mail server unreachable",
                "RecordingNotifier::send_confirmation",
            ));
        }
        self.deliveries.lock().unwrap().push(Delivery {
            confirmation_code: receipt.confirmation_code,
            security_code: receipt.security_code.expose_secret().clone(),
            link: confirmation_link.to_string(),
        });
        Ok(())
    }
}

fn app(store: &MemoryStore, notifier: &RecordingNotifier) -> Router {
    let service = RegistrationService::new(store.clone(), SecureCredentialTools::new());
    create_router(AppState::new(service, notifier.clone(), BASE_URL, None))
}

fn registration(username: &str, email: &str) -> Value {
    json!({
        "username": username,
        "email": email,
        "confirm_email": email,
        "password": "!hardPassw0rd.",
        "confirm_password": "!hardPassw0rd.",
        "phone_number": "+48123456789"
    })
}

async fn post(app: &Router, uri: &str, body: String) -> (StatusCode, MessageResponse) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, MessageResponse) {
    post(app, uri, body.to_string()).await
}

#[tokio::test]
async fn test_create_user_returns_created_and_delivers_challenge() {
    let store = MemoryStore::new();
    let notifier = RecordingNotifier::default();
    let app = app(&store, &notifier);

    let (status, body) = post_json(&app, "/user/create", registration("wojciech96", "a@b.com")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body.message, "user created successfully");

    let deliveries = notifier.deliveries();
    assert_eq!(deliveries.len(), 1);
    let delivery = &deliveries[0];
    assert_eq!(
        delivery.link,
        format!("{}/{}", BASE_URL, delivery.confirmation_code)
    );
    assert_eq!(delivery.security_code.len(), 6);
    assert_eq!(store.users().await.len(), 1);
}

#[tokio::test]
async fn test_create_user_validation_errors() {
    let store = MemoryStore::new();
    let notifier = RecordingNotifier::default();
    let app = app(&store, &notifier);

    let (status, body) = post_json(&app, "/user/create", registration("wojciech96", "not-an-email")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.message, "Invalid email format");

    let mut weak = registration("wojciech96", "a@b.com");
    weak["password"] = json!("hard1234");
    weak["confirm_password"] = json!("hard1234");
    let (status, body) = post_json(&app, "/user/create", weak).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body.message,
        "Password must contain at least one digit and one special character"
    );

    assert!(store.users().await.is_empty());
    assert!(notifier.deliveries().is_empty());
}

#[tokio::test]
async fn test_create_user_malformed_body_is_bad_request() {
    let store = MemoryStore::new();
    let notifier = RecordingNotifier::default();
    let app = app(&store, &notifier);

    let (status, body) = post(&app, "/user/create", "{\"username\":".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.message, "Invalid request body");
}

#[tokio::test]
async fn test_create_user_conflicts() {
    let store = MemoryStore::new();
    let notifier = RecordingNotifier::default();
    let app = app(&store, &notifier);

    let (status, _) = post_json(&app, "/user/create", registration("wojciech96", "a@b.com")).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = post_json(&app, "/user/create", registration("otheruser", "a@b.com")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body.message, "email already in use");

    let (status, body) = post_json(&app, "/user/create", registration("wojciech96", "c@d.com")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body.message, "username already in use");

    assert_eq!(store.users().await.len(), 1);
}

#[tokio::test]
async fn test_create_user_storage_failure_hides_details() {
    let store = MemoryStore::new();
    store.fail_on(FailurePoint::CreateAccountConfirmation).await;
    let notifier = RecordingNotifier::default();
    let app = app(&store, &notifier);

    let (status, body) = post_json(&app, "/user/create", registration("wojciech96", "a@b.com")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body.message, "internal server error");
    assert!(store.users().await.is_empty());
    assert!(store.account_confirmations().await.is_empty());
}

#[tokio::test]
async fn test_delivery_failure_does_not_fail_registration() {
    let store = MemoryStore::new();
    let notifier = RecordingNotifier::failing();
    let app = app(&store, &notifier);

    let (status, body) = post_json(&app, "/user/create", registration("wojciech96", "a@b.com")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body.message, "user created successfully");
    assert_eq!(store.users().await.len(), 1);
}

#[tokio::test]
async fn test_confirm_account_flow() {
    let store = MemoryStore::new();
    let notifier = RecordingNotifier::default();
    let app = app(&store, &notifier);

    post_json(&app, "/user/create", registration("wojciech96", "a@b.com")).await;
    let delivery = notifier.deliveries().remove(0);
    let confirmation = json!({
        "confirmation_code": delivery.confirmation_code.to_string(),
        "security_code": delivery.security_code,
    });

    let (status, body) = post_json(&app, "/user/confirm", confirmation.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.message, "account confirmed");
    assert!(store.users().await[0].is_account_confirmed);

    let (status, body) = post_json(&app, "/user/confirm", confirmation).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.message, "account already confirmed");
}

#[tokio::test]
async fn test_confirm_failures_look_the_same() {
    let store = MemoryStore::new();
    let notifier = RecordingNotifier::default();
    let app = app(&store, &notifier);

    post_json(&app, "/user/create", registration("wojciech96", "a@b.com")).await;
    let delivery = notifier.deliveries().remove(0);
    let wrong_code = if delivery.security_code == "000000" {
        "000001"
    } else {
        "000000"
    };

    let attempts = [
        json!({ "confirmation_code": "not-a-uuid", "security_code": delivery.security_code }),
        json!({ "confirmation_code": Uuid::now_v7().to_string(), "security_code": delivery.security_code }),
        json!({ "confirmation_code": delivery.confirmation_code.to_string(), "security_code": wrong_code }),
    ];

    for attempt in attempts {
        let (status, body) = post_json(&app, "/user/confirm", attempt).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.message, "content not found");
    }
    assert!(!store.users().await[0].is_account_confirmed);
}

#[tokio::test]
async fn test_health_without_database() {
    let store = MemoryStore::new();
    let notifier = RecordingNotifier::default();
    let app = app(&store, &notifier);

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, MessageResponse) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_delivered_link_confirms_the_account() {
    let store = MemoryStore::new();
    let notifier = RecordingNotifier::default();
    let app = app(&store, &notifier);

    post_json(&app, "/user/create", registration("wojciech96", "a@b.com")).await;
    let delivery = notifier.deliveries().remove(0);
    let path = delivery
        .link
        .strip_prefix("http://localhost")
        .expect("link must use the configured base url")
        .to_string();

    let body = json!({ "security_code": delivery.security_code });
    let (status, response) = send(&app, "POST", &path, Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.message, "account confirmed");
    assert!(store.users().await[0].is_account_confirmed);

    let (status, response) = send(&app, "POST", &path, Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.message, "account already confirmed");
}

#[tokio::test]
async fn test_delivered_link_with_wrong_security_code_is_not_found() {
    let store = MemoryStore::new();
    let notifier = RecordingNotifier::default();
    let app = app(&store, &notifier);

    post_json(&app, "/user/create", registration("wojciech96", "a@b.com")).await;
    let delivery = notifier.deliveries().remove(0);
    let path = format!("/user/confirm/{}", delivery.confirmation_code);
    let wrong_code = if delivery.security_code == "000000" {
        "000001"
    } else {
        "000000"
    };

    let (status, response) =
        send(&app, "POST", &path, Some(json!({ "security_code": wrong_code }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response.message, "content not found");

    let (status, response) = send(
        &app,
        "POST",
        "/user/confirm/not-a-uuid",
        Some(json!({ "security_code": delivery.security_code })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response.message, "content not found");
}

#[tokio::test]
async fn test_confirm_with_codes_in_path() {
    let store = MemoryStore::new();
    let notifier = RecordingNotifier::default();
    let app = app(&store, &notifier);

    post_json(&app, "/user/create", registration("wojciech96", "a@b.com")).await;
    let delivery = notifier.deliveries().remove(0);
    let path = format!(
        "/user/confirm-account/{}/{}",
        delivery.confirmation_code, delivery.security_code
    );

    let (status, response) = send(&app, "PUT", &path, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.message, "account confirmed");
}

/// Log sink shared with the subscriber under test
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_client_errors_are_logged_with_status_and_route() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let store = MemoryStore::new();
    let notifier = RecordingNotifier::default();
    let app = app(&store, &notifier);

    let secret_path = "/user/confirm-account/not-a-uuid/424242";
    let (status, _) = send(&app, "PUT", secret_path, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let output = logs.contents();
    assert!(output.contains("Request rejected"), "{output}");
    assert!(output.contains("status=404"), "{output}");
    assert!(
        output.contains("/user/confirm-account/:confirmation_code/:security_code"),
        "{output}"
    );
    assert!(!output.contains("424242"), "{output}");
}
