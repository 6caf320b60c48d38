//! Accounts service routes
//!
//! Handlers stay thin: they translate requests into service calls and
//! [`AppError`]s into `{"message": ...}` responses.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{MatchedPath, Path, Request, State, rejection::JsonRejection},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use common::AppError;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::credentials::CredentialTools;
use crate::models::{ConfirmAccount, NewUser};
use crate::notifier::{ConfirmationNotifier, confirmation_link};
use crate::service::{CONFIRMATION_NOT_FOUND, RegistrationService};
use crate::unit_of_work::UnitOfWorkFactory;

/// Application state shared across handlers
pub struct AppState<F, T, N> {
    pub service: RegistrationService<F, T>,
    pub notifier: Arc<N>,
    pub confirmation_base_url: Arc<str>,
    /// Checked by `/health`; absent when running on the in-memory store.
    pub db_pool: Option<PgPool>,
}

impl<F, T, N> Clone for AppState<F, T, N> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            notifier: Arc::clone(&self.notifier),
            confirmation_base_url: Arc::clone(&self.confirmation_base_url),
            db_pool: self.db_pool.clone(),
        }
    }
}

impl<F, T, N> AppState<F, T, N> {
    pub fn new(
        service: RegistrationService<F, T>,
        notifier: N,
        confirmation_base_url: &str,
        db_pool: Option<PgPool>,
    ) -> Self {
        Self {
            service,
            notifier: Arc::new(notifier),
            confirmation_base_url: Arc::from(confirmation_base_url),
            db_pool,
        }
    }
}

/// Body of every response of this service
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Confirmation request as received; the code is parsed by the handler so a
/// malformed code fails like an unknown one.
#[derive(Deserialize)]
pub struct ConfirmAccountRequest {
    pub confirmation_code: String,
    pub security_code: SecretString,
}

/// Body posted to the delivered confirmation link
#[derive(Deserialize)]
pub struct SecurityCodeRequest {
    pub security_code: SecretString,
}

/// [`AppError`] as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = StatusCode::from_u16(err.status().as_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if err.should_log() {
            err.log();
        } else {
            debug!(status = status.as_u16(), "Request rejected: {}", err.message());
        }

        (status, Json(MessageResponse::new(err.public_message()))).into_response()
    }
}

/// Create the router for the accounts service
pub fn create_router<F, T, N>(state: AppState<F, T, N>) -> Router
where
    F: UnitOfWorkFactory,
    T: CredentialTools,
    N: ConfirmationNotifier,
{
    Router::new()
        .route("/health", get(health_check::<F, T, N>))
        .route("/user/create", post(create_user::<F, T, N>))
        .route("/user/confirm", post(confirm_account::<F, T, N>))
        .route(
            "/user/confirm/:confirmation_code",
            post(confirm_account_link::<F, T, N>),
        )
        .route(
            "/user/confirm-account/:confirmation_code/:security_code",
            put(confirm_account_path::<F, T, N>),
        )
        .route_layer(middleware::from_fn(log_client_errors))
        .with_state(state)
}

/// One info line per 4xx response. The route template is logged rather than
/// the request path, which may carry confirmation and security codes.
async fn log_client_errors(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_default();

    let response = next.run(request).await;
    let status = response.status();
    if status.is_client_error() {
        info!(status = status.as_u16(), %method, path = %path, "Request rejected");
    }
    response
}

/// Health check endpoint
pub async fn health_check<F, T, N>(State(state): State<AppState<F, T, N>>) -> impl IntoResponse
where
    F: UnitOfWorkFactory,
    T: CredentialTools,
    N: ConfirmationNotifier,
{
    let database_up = match &state.db_pool {
        Some(pool) => common::database::health_check(pool).await.unwrap_or(false),
        None => true,
    };

    let status = if database_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = Json(serde_json::json!({
        "status": if database_up { "ok" } else { "unavailable" },
        "service": "accounts-service"
    }));
    (status, body)
}

/// User registration endpoint
pub async fn create_user<F, T, N>(
    State(state): State<AppState<F, T, N>>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    F: UnitOfWorkFactory,
    T: CredentialTools,
    N: ConfirmationNotifier,
{
    let Json(new_user) = payload.map_err(|rejection| {
        AppError::validation("Invalid request body", "routes::create_user")
            .with_argument(rejection.body_text())
    })?;

    let receipt = state.service.register(new_user).await?;

    let link = confirmation_link(&state.confirmation_base_url, receipt.confirmation_code);
    if let Err(err) = state.notifier.send_confirmation(&receipt, &link).await {
        warn!(user_id = %receipt.user_id, "Confirmation delivery failed");
        err.log();
    }

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("user created successfully")),
    ))
}

/// Account confirmation endpoint taking both codes in the body
pub async fn confirm_account<F, T, N>(
    State(state): State<AppState<F, T, N>>,
    payload: Result<Json<ConfirmAccountRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    F: UnitOfWorkFactory,
    T: CredentialTools,
    N: ConfirmationNotifier,
{
    const CONTEXT: &str = "routes::confirm_account";

    let Json(request) = payload.map_err(|rejection| {
        AppError::validation("Invalid request body", CONTEXT).with_argument(rejection.body_text())
    })?;

    confirm(&state, &request.confirmation_code, request.security_code, CONTEXT).await
}

/// Target of the delivered confirmation link; the security code arrives
/// through the second channel and is posted in the body.
pub async fn confirm_account_link<F, T, N>(
    State(state): State<AppState<F, T, N>>,
    Path(confirmation_code): Path<String>,
    payload: Result<Json<SecurityCodeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    F: UnitOfWorkFactory,
    T: CredentialTools,
    N: ConfirmationNotifier,
{
    const CONTEXT: &str = "routes::confirm_account_link";

    let Json(request) = payload.map_err(|rejection| {
        AppError::validation("Invalid request body", CONTEXT).with_argument(rejection.body_text())
    })?;

    confirm(&state, &confirmation_code, request.security_code, CONTEXT).await
}

/// Account confirmation with both codes in the path
pub async fn confirm_account_path<F, T, N>(
    State(state): State<AppState<F, T, N>>,
    Path((confirmation_code, security_code)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError>
where
    F: UnitOfWorkFactory,
    T: CredentialTools,
    N: ConfirmationNotifier,
{
    confirm(
        &state,
        &confirmation_code,
        SecretString::new(security_code),
        "routes::confirm_account_path",
    )
    .await
}

async fn confirm<F, T, N>(
    state: &AppState<F, T, N>,
    confirmation_code: &str,
    security_code: SecretString,
    context: &'static str,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError>
where
    F: UnitOfWorkFactory,
    T: CredentialTools,
    N: ConfirmationNotifier,
{
    let confirmation_code = Uuid::parse_str(confirmation_code.trim()).map_err(|_| {
        AppError::not_found(CONFIRMATION_NOT_FOUND, context)
            .with_argument(format!("confirmationCode: {}", confirmation_code))
    })?;

    let outcome = state
        .service
        .confirm(ConfirmAccount {
            confirmation_code,
            security_code,
        })
        .await?;

    Ok((StatusCode::OK, Json(MessageResponse::new(outcome.message()))))
}
