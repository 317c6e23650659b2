//! End-to-end API flow: open a request, capture donations, read the ledger.
//!
//! Run with: `cargo test -p mishtehd --test api_flow`

use axum::body::{Body, Bytes};
use axum::http::{Request as HttpRequest, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use mishteh_domain::{Currency, Donation, Notification, Request, RequestStatus, Transaction, TransactionType};
use mishteh_ledger::{
    LedgerConfig, LedgerResult, LedgerWriter, MemoryNotificationSink, RequestTotals,
    StubPaymentCapture,
};
use mishteh_store::MemoryStore;
use mishtehd::{create_router, ApiState};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

struct App {
    router: Router,
    store: Arc<MemoryStore>,
    sink: Arc<MemoryNotificationSink>,
    capture: Arc<StubPaymentCapture>,
}

fn app() -> App {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemoryNotificationSink::new());
    let capture = Arc::new(StubPaymentCapture::new());
    let config = LedgerConfig {
        max_conflict_retries: 1_000,
        ..LedgerConfig::default()
    };
    let writer = Arc::new(LedgerWriter::new(Arc::clone(&store), Arc::clone(&sink), config));
    let router = create_router(Arc::new(ApiState {
        writer,
        capture: Arc::clone(&capture),
    }));

    App {
        router,
        store,
        sink,
        capture,
    }
}

async fn send(router: &Router, request: HttpRequest<Body>) -> (StatusCode, Bytes) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

fn post_json(uri: &str, body: serde_json::Value) -> HttpRequest<Body> {
    HttpRequest::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> HttpRequest<Body> {
    HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn open_request(app: &App, owner_id: Uuid, target: &str) -> Request {
    let (status, body) = send(
        &app.router,
        post_json(
            "/requests",
            serde_json::json!({
                "owner_id": owner_id,
                "title": "Wheelchair for Disabled Son",
                "currency": "ZAR",
                "target_amount": target,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    serde_json::from_slice(&body).unwrap()
}

fn capture(order_id: &str, request_id: Uuid, donor_id: Uuid, anonymous: bool) -> HttpRequest<Body> {
    post_json(
        "/payments/capture",
        serde_json::json!({
            "order_id": order_id,
            "request_id": request_id,
            "donor_id": donor_id,
            "donor_name": "David Chen",
            "message": "Good luck",
            "anonymous": anonymous,
        }),
    )
}

#[tokio::test]
async fn test_request_funded_through_api() {
    let app = app();
    let owner_id = Uuid::now_v7();
    let donor_id = Uuid::now_v7();
    let request = open_request(&app, owner_id, "1000").await;
    assert_eq!(request.status, RequestStatus::Pending);

    let donations = [("ORDER-A", dec!(400)), ("ORDER-B", dec!(600)), ("ORDER-C", dec!(50))];
    for (order_id, gross) in donations {
        app.capture.register(order_id, gross, Currency::Zar);
        let (status, _) = send(&app.router, capture(order_id, request.id, donor_id, false)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(&app.router, get(&format!("/requests/{}", request.id))).await;
    assert_eq!(status, StatusCode::OK);
    let totals: RequestTotals = serde_json::from_slice(&body).unwrap();
    assert_eq!(totals.current_amount.amount(), dec!(1050));
    assert_eq!(totals.status, RequestStatus::Funded);
    assert_eq!(totals.donation_count, 3);

    let (_, body) = send(&app.router, get(&format!("/requests/{}/donations", request.id))).await;
    let for_request: Vec<Donation> = serde_json::from_slice(&body).unwrap();
    assert_eq!(for_request.len(), 3);
    assert_eq!(for_request[0].amount.amount(), dec!(400));

    let (_, body) = send(&app.router, get(&format!("/donors/{}/donations", donor_id))).await;
    let by_donor: Vec<Donation> = serde_json::from_slice(&body).unwrap();
    assert_eq!(by_donor.len(), 3);
    assert_eq!(by_donor[0].amount.amount(), dec!(50));

    let (_, body) = send(&app.router, get("/payments/ORDER-B/transactions")).await;
    let lines: Vec<Transaction> = serde_json::from_slice(&body).unwrap();
    assert_eq!(lines.len(), 2);
    let donation_line = lines.iter().find(|t| t.tx_type == TransactionType::Donation).unwrap();
    let fee_line = lines.iter().find(|t| t.tx_type == TransactionType::Fee).unwrap();
    // 2.00 + 3% of 600
    assert_eq!(donation_line.fee_amount.amount(), dec!(20.00));
    assert_eq!(donation_line.net_amount.amount(), dec!(580.00));
    assert_eq!(fee_line.amount.amount(), dec!(20.00));
    assert_eq!(fee_line.payment_id, "ORDER-B-fee");

    let (_, body) = send(&app.router, get(&format!("/users/{}/notifications", owner_id))).await;
    let notifications: Vec<Notification> = serde_json::from_slice(&body).unwrap();
    assert_eq!(notifications.len(), 3);
    assert_eq!(app.sink.delivery_count(), 3);
}

#[tokio::test]
async fn test_repeated_capture_is_replayed() {
    let app = app();
    let request = open_request(&app, Uuid::now_v7(), "500").await;
    let donor_id = Uuid::now_v7();
    app.capture.register("ORDER-1", dec!(100), Currency::Zar);

    let (first_status, first_body) =
        send(&app.router, capture("ORDER-1", request.id, donor_id, false)).await;
    let (second_status, second_body) =
        send(&app.router, capture("ORDER-1", request.id, donor_id, false)).await;

    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(second_status, StatusCode::OK);

    let first: LedgerResult = serde_json::from_slice(&first_body).unwrap();
    let second: LedgerResult = serde_json::from_slice(&second_body).unwrap();
    assert_eq!(first.donation.id, second.donation.id);
    assert_eq!(first.fee_transaction.id, second.fee_transaction.id);
    assert!(second.replayed);

    assert_eq!(app.store.donation_count(), 1);
    assert_eq!(app.store.transaction_count(), 2);
    assert_eq!(app.sink.delivery_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_captures_keep_totals_exact() {
    let app = app();
    let request = open_request(&app, Uuid::now_v7(), "100000").await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let order_id = format!("ORDER-{}", i);
        app.capture.register(&order_id, dec!(25), Currency::Zar);
        let router = app.router.clone();
        let req = capture(&order_id, request.id, Uuid::now_v7(), i % 2 == 0);
        handles.push(tokio::spawn(async move { send(&router, req).await.0 }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::CREATED);
    }

    let (_, body) = send(&app.router, get(&format!("/requests/{}", request.id))).await;
    let totals: RequestTotals = serde_json::from_slice(&body).unwrap();
    assert_eq!(totals.current_amount.amount(), dec!(500));
    assert_eq!(totals.status, RequestStatus::PartiallyFunded);
    assert_eq!(app.store.transaction_count(), 40);
}

#[tokio::test]
async fn test_anonymous_capture_hides_donor_on_ledger() {
    let app = app();
    let request = open_request(&app, Uuid::now_v7(), "500").await;
    app.capture.register("ORDER-ANON", dec!(100), Currency::Zar);

    let (status, body) =
        send(&app.router, capture("ORDER-ANON", request.id, Uuid::now_v7(), true)).await;
    assert_eq!(status, StatusCode::CREATED);

    let result: LedgerResult = serde_json::from_slice(&body).unwrap();
    assert!(result.donation.anonymous);
    assert_eq!(result.donation_transaction.donor_name, "Anonymous");
    assert_eq!(result.fee_transaction.donor_name, "David Chen");

    let delivered = app.sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].message.contains("anonymous donor"));
}

#[tokio::test]
async fn test_currency_mismatch_rejected() {
    let app = app();
    let request = open_request(&app, Uuid::now_v7(), "500").await;
    app.capture.register("ORDER-USD", dec!(100), Currency::Usd);

    let (status, _) = send(&app.router, capture("ORDER-USD", request.id, Uuid::now_v7(), false)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(app.store.donation_count(), 0);
}
