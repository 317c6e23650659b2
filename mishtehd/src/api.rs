//! HTTP API for the Mishteh daemon.
//!
//! Provides REST endpoints for:
//! - Health check
//! - Payment capture (records the donation)
//! - Request creation and funding totals
//! - Donation, ledger line and notification history

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use mishteh_domain::{
    Currency, Donation, Money, Notification, Request, RequestId, Transaction, UserId,
};
use mishteh_ledger::{
    LedgerError, LedgerResult, LedgerWriter, NotificationSink, PaymentCapturePort,
    RecordDonation, RequestTotals,
};
use mishteh_store::Store;

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState<S: Store + 'static, N: NotificationSink + 'static, P: PaymentCapturePort + 'static> {
    pub writer: Arc<LedgerWriter<S, N>>,
    pub capture: Arc<P>,
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Request to capture an approved order and record the donation.
#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
    pub order_id: String,
    pub request_id: RequestId,
    pub donor_id: UserId,
    #[serde(default)]
    pub donor_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub anonymous: bool,
}

/// Request to open a new funding request (starts PENDING).
#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub owner_id: UserId,
    pub title: String,
    pub currency: String,
    #[serde(default)]
    pub target_amount: Option<Decimal>,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router<S, N, P>(state: Arc<ApiState<S, N, P>>) -> Router
where
    S: Store + 'static,
    N: NotificationSink + 'static,
    P: PaymentCapturePort + 'static,
{
    Router::new()
        .route("/health", get(health_handler))
        .route("/payments/capture", post(capture_handler))
        .route("/payments/:payment_id/transactions", get(payment_transactions_handler))
        .route("/requests", post(create_request_handler))
        .route("/requests/:id", get(request_totals_handler))
        .route("/requests/:id/donations", get(request_donations_handler))
        .route("/donors/:id/donations", get(donor_donations_handler))
        .route("/donations/:id", get(donation_handler))
        .route("/transactions/:id", get(transaction_handler))
        .route("/users/:id/notifications", get(notifications_handler))
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Capture an approved order at the gateway and record the donation.
///
/// Returns 201 for a newly recorded donation and 200 when the payment had
/// already been applied (same records, `replayed = true`).
async fn capture_handler<S, N, P>(
    State(state): State<Arc<ApiState<S, N, P>>>,
    Json(req): Json<CaptureRequest>,
) -> Result<(StatusCode, Json<LedgerResult>), ApiError>
where
    S: Store + 'static,
    N: NotificationSink + 'static,
    P: PaymentCapturePort + 'static,
{
    if req.order_id.trim().is_empty() {
        return Err(to_error_response(LedgerError::InvalidCommand(
            "order_id must not be empty".to_string(),
        )));
    }

    let capture = state.capture.capture(&req.order_id).await.map_err(to_error_response)?;

    if !capture.is_completed() {
        warn!(order_id = %req.order_id, status = %capture.status, "Capture not completed");
        return Err(to_error_response(LedgerError::PaymentNotCompleted {
            order_id: req.order_id,
            status: capture.status.to_string(),
        }));
    }

    // The captured amount is authoritative, never the client's order
    let gross_amount = Money::new(capture.gross_amount, capture.currency)
        .map_err(|e| to_error_response(e.into()))?;

    let donor_name = req
        .donor_name
        .filter(|name| !name.trim().is_empty())
        .or_else(|| capture.payer.name.clone())
        .unwrap_or_default();

    let cmd = RecordDonation {
        request_id: req.request_id,
        donor_id: req.donor_id,
        donor_name,
        gross_amount,
        message: req.message,
        anonymous: req.anonymous,
        external_payment_id: capture.external_payment_id,
        payer_id: capture.payer.payer_id,
        payment_gateway: state.capture.gateway().to_string(),
    };

    // Runs to completion even if the client goes away mid-request
    let writer = Arc::clone(&state.writer);
    let result = tokio::spawn(async move { writer.record_completed_donation(cmd).await })
        .await
        .map_err(|e| {
            error!(error = %e, "Ledger write task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Ledger write task failed".to_string(),
                }),
            )
        })?
        .map_err(to_error_response)?;

    let status = if result.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    Ok((status, Json(result)))
}

/// Open a new funding request.
async fn create_request_handler<S, N, P>(
    State(state): State<Arc<ApiState<S, N, P>>>,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<Request>), ApiError>
where
    S: Store + 'static,
    N: NotificationSink + 'static,
    P: PaymentCapturePort + 'static,
{
    let currency: Currency = body.currency.parse().map_err(|e| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                error: format!("Invalid currency: {}", e),
            }),
        )
    })?;

    let target_amount = body
        .target_amount
        .map(|amount| Money::new(amount, currency))
        .transpose()
        .map_err(|e| to_error_response(e.into()))?;

    let request = Request::new(body.owner_id, body.title, currency, target_amount)
        .map_err(|e| to_error_response(e.into()))?;

    state
        .writer
        .store()
        .requests()
        .save(&request)
        .await
        .map_err(|e| to_error_response(e.into()))?;

    info!(request_id = %request.id, owner_id = %request.owner_id, "Request created");

    Ok((StatusCode::CREATED, Json(request)))
}

/// Funding totals of one request.
async fn request_totals_handler<S, N, P>(
    State(state): State<Arc<ApiState<S, N, P>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RequestTotals>, ApiError>
where
    S: Store + 'static,
    N: NotificationSink + 'static,
    P: PaymentCapturePort + 'static,
{
    let totals = state.writer.reader().request_totals(id).await.map_err(to_error_response)?;
    Ok(Json(totals))
}

/// Donations to a request, oldest first.
async fn request_donations_handler<S, N, P>(
    State(state): State<Arc<ApiState<S, N, P>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Donation>>, ApiError>
where
    S: Store + 'static,
    N: NotificationSink + 'static,
    P: PaymentCapturePort + 'static,
{
    let donations = state
        .writer
        .reader()
        .donations_for_request(id)
        .await
        .map_err(to_error_response)?;
    Ok(Json(donations))
}

/// Donations made by a donor, newest first.
async fn donor_donations_handler<S, N, P>(
    State(state): State<Arc<ApiState<S, N, P>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Donation>>, ApiError>
where
    S: Store + 'static,
    N: NotificationSink + 'static,
    P: PaymentCapturePort + 'static,
{
    let donations = state
        .writer
        .reader()
        .donations_by_donor(id)
        .await
        .map_err(to_error_response)?;
    Ok(Json(donations))
}

/// A single donation.
async fn donation_handler<S, N, P>(
    State(state): State<Arc<ApiState<S, N, P>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Donation>, ApiError>
where
    S: Store + 'static,
    N: NotificationSink + 'static,
    P: PaymentCapturePort + 'static,
{
    state
        .writer
        .reader()
        .donation(id)
        .await
        .map_err(to_error_response)?
        .map(Json)
        .ok_or_else(|| not_found("Donation", id))
}

/// A single ledger line.
async fn transaction_handler<S, N, P>(
    State(state): State<Arc<ApiState<S, N, P>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Transaction>, ApiError>
where
    S: Store + 'static,
    N: NotificationSink + 'static,
    P: PaymentCapturePort + 'static,
{
    state
        .writer
        .reader()
        .transaction(id)
        .await
        .map_err(to_error_response)?
        .map(Json)
        .ok_or_else(|| not_found("Transaction", id))
}

/// Both ledger lines (DONATION and FEE) of one gateway payment.
async fn payment_transactions_handler<S, N, P>(
    State(state): State<Arc<ApiState<S, N, P>>>,
    Path(payment_id): Path<String>,
) -> Result<Json<Vec<Transaction>>, ApiError>
where
    S: Store + 'static,
    N: NotificationSink + 'static,
    P: PaymentCapturePort + 'static,
{
    let lines = state
        .writer
        .reader()
        .transactions_by_payment_id(&payment_id)
        .await
        .map_err(to_error_response)?;
    Ok(Json(lines))
}

/// Notifications addressed to a user, newest first.
async fn notifications_handler<S, N, P>(
    State(state): State<Arc<ApiState<S, N, P>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Notification>>, ApiError>
where
    S: Store + 'static,
    N: NotificationSink + 'static,
    P: PaymentCapturePort + 'static,
{
    let notifications = state
        .writer
        .reader()
        .notifications_for_user(id)
        .await
        .map_err(to_error_response)?;
    Ok(Json(notifications))
}

// =============================================================================
// Helpers
// =============================================================================

/// HTTP status for a ledger error.
pub fn status_for(error: &LedgerError) -> StatusCode {
    match error {
        LedgerError::RequestNotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::RequestNotAcceptingFunds { .. }
        | LedgerError::DuplicatePayment { .. }
        | LedgerError::StorageConflict(_) => StatusCode::CONFLICT,
        LedgerError::InvalidAmount(_)
        | LedgerError::CurrencyMismatch { .. }
        | LedgerError::InvalidCommand(_)
        | LedgerError::PaymentNotCompleted { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::PaymentGateway(_) => StatusCode::BAD_GATEWAY,
        LedgerError::StorageUnavailable(_) | LedgerError::NotificationDelivery(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        },
    }
}

fn to_error_response(error: LedgerError) -> ApiError {
    let status = status_for(&error);
    if status.is_server_error() {
        error!(error = %error, "Request failed");
    }

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

fn not_found(kind: &str, id: Uuid) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("{} not found: {}", kind, id),
        }),
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use http_body_util::BodyExt;
    use mishteh_domain::RequestStatus;
    use mishteh_ledger::{CaptureStatus, LedgerConfig, MemoryNotificationSink, StubPaymentCapture};
    use mishteh_store::{MemoryStore, RequestRepository};
    use rust_decimal_macros::dec;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        store: Arc<MemoryStore>,
        capture: Arc<StubPaymentCapture>,
    }

    fn create_test_app() -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(MemoryNotificationSink::new());
        let capture = Arc::new(StubPaymentCapture::new());
        let writer = Arc::new(LedgerWriter::new(Arc::clone(&store), sink, LedgerConfig::default()));

        let state = Arc::new(ApiState {
            writer,
            capture: Arc::clone(&capture),
        });

        TestApp {
            router: create_router(state),
            store,
            capture,
        }
    }

    async fn seed_request(store: &MemoryStore, target: Option<Decimal>) -> Request {
        let target = target.map(|t| Money::new(t, Currency::Zar).unwrap());
        let mut request = Request::new(Uuid::now_v7(), "School Fees", Currency::Zar, target).unwrap();
        request.approve().unwrap();
        store.save(&request).await.unwrap();
        request
    }

    fn capture_body(order_id: &str, request_id: RequestId) -> Body {
        let body = serde_json::json!({
            "order_id": order_id,
            "request_id": request_id,
            "donor_id": Uuid::now_v7(),
            "donor_name": "Lerato Molefe",
        });
        Body::from(body.to_string())
    }

    fn post(uri: &str, body: Body) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap()
    }

    fn get_req(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app();

        let response = app.router.oneshot(get_req("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let health: HealthResponse = body_json(response).await;
        assert_eq!(health.status, "healthy");
    }

    #[tokio::test]
    async fn test_capture_records_donation() {
        let app = create_test_app();
        let request = seed_request(&app.store, Some(dec!(1000))).await;
        app.capture.register("ORDER-1", dec!(100), Currency::Zar);

        let response = app
            .router
            .oneshot(post("/payments/capture", capture_body("ORDER-1", request.id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let result: LedgerResult = body_json(response).await;
        assert!(!result.replayed);
        assert_eq!(result.donation_transaction.fee_amount.amount(), dec!(5.00));
        assert_eq!(result.donation_transaction.net_amount.amount(), dec!(95.00));
        assert_eq!(result.donation_transaction.payer_id.as_deref(), Some("PAYER-ORDER-1"));
        assert_eq!(result.request.status, RequestStatus::PartiallyFunded);
    }

    #[tokio::test]
    async fn test_capture_replay_returns_ok() {
        let app = create_test_app();
        let request = seed_request(&app.store, None).await;
        app.capture.register("ORDER-1", dec!(50), Currency::Zar);

        let first = app
            .router
            .clone()
            .oneshot(post("/payments/capture", capture_body("ORDER-1", request.id)))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        let first: LedgerResult = body_json(first).await;

        let second = app
            .router
            .oneshot(post("/payments/capture", capture_body("ORDER-1", request.id)))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        let second: LedgerResult = body_json(second).await;

        assert!(second.replayed);
        assert_eq!(second.donation.id, first.donation.id);
        assert_eq!(app.store.donation_count(), 1);
    }

    #[tokio::test]
    async fn test_capture_not_completed() {
        let app = create_test_app();
        let request = seed_request(&app.store, None).await;
        app.capture
            .register_with_status("ORDER-1", dec!(50), Currency::Zar, CaptureStatus::Declined);

        let response = app
            .router
            .oneshot(post("/payments/capture", capture_body("ORDER-1", request.id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(app.store.donation_count(), 0);
    }

    #[tokio::test]
    async fn test_capture_gateway_failure() {
        let app = create_test_app();
        let request = seed_request(&app.store, None).await;

        let response = app
            .router
            .oneshot(post("/payments/capture", capture_body("UNKNOWN", request.id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_capture_unknown_request() {
        let app = create_test_app();
        app.capture.register("ORDER-1", dec!(50), Currency::Zar);

        let response = app
            .router
            .oneshot(post("/payments/capture", capture_body("ORDER-1", Uuid::now_v7())))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_capture_withdrawn_request_conflict() {
        let app = create_test_app();
        let mut request = seed_request(&app.store, None).await;
        request.withdraw().unwrap();
        app.store.save(&request).await.unwrap();
        app.capture.register("ORDER-1", dec!(50), Currency::Zar);

        let response = app
            .router
            .oneshot(post("/payments/capture", capture_body("ORDER-1", request.id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_create_request() {
        let app = create_test_app();
        let body = serde_json::json!({
            "owner_id": Uuid::now_v7(),
            "title": "Laptop for Online Studies",
            "currency": "ZAR",
            "target_amount": "6000",
        });

        let response = app
            .router
            .oneshot(post("/requests", Body::from(body.to_string())))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let request: Request = body_json(response).await;
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(app.store.request_count(), 1);
    }

    #[tokio::test]
    async fn test_create_request_invalid_currency() {
        let app = create_test_app();
        let body = serde_json::json!({
            "owner_id": Uuid::now_v7(),
            "title": "Rent",
            "currency": "XYZ",
        });

        let response = app
            .router
            .oneshot(post("/requests", Body::from(body.to_string())))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_get_donation_not_found() {
        let app = create_test_app();

        let response = app
            .router
            .oneshot(get_req(&format!("/donations/{}", Uuid::now_v7())))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&LedgerError::RequestNotFound {
                request_id: Uuid::nil()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&LedgerError::StorageConflict("busy".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&LedgerError::CurrencyMismatch {
                expected: Currency::Zar,
                actual: Currency::Usd
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&LedgerError::StorageUnavailable(mishteh_store::StoreError::Unavailable(
                "down".to_string()
            ))),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
