use actix_web::{http::StatusCode, web, web::ServiceConfig};
use escrow_engine::{
    db_types::{Amount, BookingId, EscrowId, EscrowStatus, NewBooking},
    events::EventProducers,
    fees::FeeSchedule,
    test_utils::prepare_env::{prepare_test_env, random_db_path, tear_down},
    EscrowApi,
    LedgerApi,
    PaymentFlowApi,
    SqliteDatabase,
};
use payment_providers::PaymentProviders;
use serde_json::{json, Value};
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock,
    MockServer,
    ResponseTemplate,
};

use super::helpers::{api_request, post, reference_providers, user_token, with_token};
use crate::routes::{CancelRoute, ConfirmRoute, PaymentIntentRoute, IDEMPOTENCY_KEY_HEADER};

struct Harness {
    db: SqliteDatabase,
    providers: PaymentProviders,
    server: MockServer,
}

impl Harness {
    async fn new() -> Self {
        let db = prepare_test_env(&random_db_path()).await;
        let booking = NewBooking::new(BookingId::from("bk_1"), "client_1", "supplier_1", Amount::from(150_000))
            .with_currency("NGN");
        LedgerApi::new(db.clone()).upsert_booking(booking).await.expect("Could not create booking");
        let server = MockServer::start().await;
        let providers = reference_providers(&server.uri());
        Self { db, providers, server }
    }

    fn escrows(&self) -> EscrowApi<SqliteDatabase> {
        EscrowApi::new(self.db.clone(), FeeSchedule::default(), EventProducers::default())
    }

    fn configure(&self) -> impl FnOnce(&mut ServiceConfig) {
        let payments = PaymentFlowApi::new(self.escrows());
        let providers = self.providers.clone();
        move |cfg: &mut ServiceConfig| {
            cfg.service(PaymentIntentRoute::<SqliteDatabase>::new())
                .service(ConfirmRoute::<SqliteDatabase>::new())
                .service(CancelRoute::<SqliteDatabase>::new())
                .app_data(web::Data::new(payments))
                .app_data(web::Data::new(providers));
        }
    }

    async fn mock_create_reference(&self, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/references"))
            .and(body_partial_json(json!({ "amount": 150_000, "currency": "NGN", "customerId": "client_1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ref_123",
                "reference": "MEG-7781",
                "paymentUrl": "https://pay.example.com/ref_123"
            })))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    async fn open_intent(&self, user: &str, key: Option<&str>) -> (StatusCode, Value) {
        let mut req = with_token(post("/api/payments/intent"), &user_token(user));
        if let Some(key) = key {
            req = req.insert_header((IDEMPOTENCY_KEY_HEADER, key));
        }
        let req = req.set_json(json!({ "booking_id": "bk_1", "method": "reference" }));
        api_request(req, self.configure()).await
    }

    async fn finish(self) {
        self.server.verify().await;
        tear_down(self.db).await;
    }
}

#[actix_web::test]
async fn client_opens_a_payment_intent() {
    let harness = Harness::new().await;
    harness.mock_create_reference(1).await;
    let (status, body) = harness.open_intent("client_1", None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["existing"], false);
    assert_eq!(body["reference"], "MEG-7781");
    assert_eq!(body["checkout_url"], "https://pay.example.com/ref_123");
    assert_eq!(body["payment"]["status"], "pending");
    assert_eq!(body["payment"]["provider"], "reference");
    assert_eq!(body["payment"]["provider_payment_id"], "ref_123");
    assert_eq!(body["payment"]["amount"], 150_000);

    let escrow_id = body["escrow_id"].as_str().expect("Intent should name its escrow");
    let escrow = harness.escrows().fetch_escrow(&EscrowId::from(escrow_id)).await.unwrap();
    assert_eq!(escrow.status, EscrowStatus::PendingPayment);
    assert_eq!(escrow.platform_fee, Amount::from(15_000));
    assert_eq!(escrow.supplier_payout, Amount::from(135_000));
    harness.finish().await;
}

#[actix_web::test]
async fn repeated_idempotency_key_reuses_the_payment() {
    let harness = Harness::new().await;
    harness.mock_create_reference(1).await;
    let (status, first) = harness.open_intent("client_1", Some("checkout-bk_1-1")).await;
    assert_eq!(status, StatusCode::OK, "{first}");
    let (status, second) = harness.open_intent("client_1", Some("checkout-bk_1-1")).await;
    assert_eq!(status, StatusCode::OK, "{second}");
    assert_eq!(second["existing"], true);
    assert_eq!(first["payment"]["id"], second["payment"]["id"]);
    assert_eq!(first["escrow_id"], second["escrow_id"]);
    harness.finish().await;
}

#[actix_web::test]
async fn idempotency_key_cannot_be_reused_by_someone_else() {
    let harness = Harness::new().await;
    harness.mock_create_reference(1).await;
    let (status, _) = harness.open_intent("client_1", Some("shared-key")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = harness.open_intent("mallory", Some("shared-key")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid-argument");
    harness.finish().await;
}

#[actix_web::test]
async fn strangers_cannot_pay_for_a_booking() {
    let harness = Harness::new().await;
    harness.mock_create_reference(0).await;
    let (status, body) = harness.open_intent("mallory", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "permission-denied");
    harness.finish().await;
}

#[actix_web::test]
async fn unknown_booking_is_not_found() {
    let harness = Harness::new().await;
    let req = with_token(post("/api/payments/intent"), &user_token("client_1"))
        .set_json(json!({ "booking_id": "bk_missing", "method": "reference" }));
    let (status, body) = api_request(req, harness.configure()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not-found");
    harness.finish().await;
}

#[actix_web::test]
async fn unconfigured_provider_fails_precondition() {
    let harness = Harness::new().await;
    let req = with_token(post("/api/payments/intent"), &user_token("client_1"))
        .set_json(json!({ "booking_id": "bk_1", "method": "hosted_checkout" }));
    let (status, body) = api_request(req, harness.configure()).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["code"], "failed-precondition");
    harness.finish().await;
}

#[actix_web::test]
async fn only_the_payer_can_cancel() {
    let harness = Harness::new().await;
    harness.mock_create_reference(1).await;
    let (_, body) = harness.open_intent("client_1", None).await;
    let payment_id = body["payment"]["id"].as_str().unwrap().to_string();
    let cancel_path = format!("/api/payments/{payment_id}/cancel");

    let (status, body) = api_request(with_token(post(&cancel_path), &user_token("supplier_1")), harness.configure()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "permission-denied");

    let (status, body) = api_request(with_token(post(&cancel_path), &user_token("client_1")), harness.configure()).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["payment"]["status"], "cancelled");

    let (status, body) = api_request(with_token(post(&cancel_path), &user_token("client_1")), harness.configure()).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["code"], "failed-precondition");
    harness.finish().await;
}

#[actix_web::test]
async fn confirmation_funds_the_escrow() {
    let harness = Harness::new().await;
    harness.mock_create_reference(1).await;
    Mock::given(method("GET"))
        .and(path("/references/ref_123"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "accepted", "amount": 150_000 })))
        .mount(&harness.server)
        .await;
    let (_, body) = harness.open_intent("client_1", None).await;
    let payment_id = body["payment"]["id"].as_str().unwrap().to_string();
    let confirm_path = format!("/api/payments/{payment_id}/confirm");

    let (status, body) = api_request(with_token(post(&confirm_path), &user_token("client_1")), harness.configure()).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["changed"], true);
    assert_eq!(body["payment"]["status"], "completed");
    assert_eq!(body["escrow"]["status"], "funded");
    assert_eq!(body["booking"]["paid_amount"], 150_000);
    assert_eq!(body["booking"]["payment_status"], "paid");
    assert_eq!(body["booking"]["escrow_status"], "escrow_funded");

    // Confirming again re-applies the completion without crediting the booking twice
    let (status, body) = api_request(with_token(post(&confirm_path), &user_token("client_1")), harness.configure()).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["changed"], false);
    assert_eq!(body["booking"]["paid_amount"], 150_000);

    // A second intent for the same booking is refused now that its escrow is funded
    let (status, body) = harness.open_intent("client_1", None).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["code"], "failed-precondition");
    harness.finish().await;
}

#[actix_web::test]
async fn suppliers_cannot_confirm_the_clients_payment() {
    let harness = Harness::new().await;
    harness.mock_create_reference(1).await;
    let (_, body) = harness.open_intent("client_1", None).await;
    let payment_id = body["payment"]["id"].as_str().unwrap().to_string();
    let req = with_token(post(&format!("/api/payments/{payment_id}/confirm")), &user_token("supplier_1"));
    let (status, body) = api_request(req, harness.configure()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "permission-denied");
    harness.finish().await;
}
