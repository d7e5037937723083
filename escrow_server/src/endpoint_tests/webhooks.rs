use actix_web::{http::StatusCode, test::TestRequest, web, web::ServiceConfig};
use chrono::Utc;
use escrow_engine::{
    db_types::{Amount, BookingId, EscrowStatus, NewBooking, NewPayment, Payment, PaymentRecordStatus},
    events::EventProducers,
    fees::FeeSchedule,
    test_utils::prepare_env::{prepare_test_env, random_db_path, tear_down},
    traits::EscrowManagement,
    Caller,
    EscrowApi,
    LedgerApi,
    PaymentFlowApi,
    PaymentIntent,
    SqliteDatabase,
};
use payment_providers::{
    signature::{sign_hex, TimestampedSignature},
    PaymentProviders,
    CHECKOUT_SIGNATURE_HEADER,
    REFERENCE_SIGNATURE_HEADER,
};
use serde_json::{json, Value};

use super::helpers::{all_providers, open_request, post, CHECKOUT_WEBHOOK_SECRET, REFERENCE_WEBHOOK_SECRET};
use crate::routes::WebhookRoute;

struct Harness {
    db: SqliteDatabase,
    payments: PaymentFlowApi<SqliteDatabase>,
    providers: PaymentProviders,
}

impl Harness {
    /// A booking for 150,000 NGN with a pending reference payment, `ref_123`, against its escrow.
    async fn with_pending_payment() -> (Self, Payment) {
        Self::with_payment("reference", "ref_123").await
    }

    /// The same booking, paid through a checkout session, `cs_1`.
    async fn with_checkout_session() -> (Self, Payment) {
        Self::with_payment("hosted_checkout", "cs_1").await
    }

    async fn with_payment(provider: &str, provider_payment_id: &str) -> (Self, Payment) {
        let db = prepare_test_env(&random_db_path()).await;
        let booking = NewBooking::new(BookingId::from("bk_1"), "client_1", "supplier_1", Amount::from(150_000))
            .with_currency("NGN");
        LedgerApi::new(db.clone()).upsert_booking(booking).await.expect("Could not create booking");
        let escrows = EscrowApi::new(db.clone(), FeeSchedule::default(), EventProducers::default());
        let payments = PaymentFlowApi::new(escrows);
        let intent = payments
            .prepare_payment_intent(&Caller::user("client_1"), &BookingId::from("bk_1"), None)
            .await
            .expect("Could not prepare intent");
        let PaymentIntent::New(plan) = intent else {
            panic!("Expected a new payment intent");
        };
        let payment = NewPayment::new(provider, BookingId::from("bk_1"), "client_1", plan.amount)
            .with_escrow(&plan.escrow.id)
            .with_provider_payment_id(provider_payment_id)
            .with_currency("NGN");
        let payment = payments.record_payment(payment).await.expect("Could not record payment");
        // The providers are never called while handling webhooks
        let providers = all_providers("http://127.0.0.1:1");
        (Self { db, payments, providers }, payment)
    }

    fn configure(&self) -> impl FnOnce(&mut ServiceConfig) {
        let payments = self.payments.clone();
        let providers = self.providers.clone();
        move |cfg: &mut ServiceConfig| {
            cfg.service(WebhookRoute::<SqliteDatabase>::new())
                .app_data(web::Data::new(payments))
                .app_data(web::Data::new(providers));
        }
    }

    async fn deliver(&self, req: TestRequest) -> (StatusCode, Value) {
        open_request(req, self.configure()).await
    }

    async fn paid_amount(&self) -> Amount {
        LedgerApi::new(self.db.clone()).fetch_booking(&BookingId::from("bk_1")).await.unwrap().paid_amount
    }
}

fn reference_event(payment_id: &str, status: &str) -> Vec<u8> {
    json!({
        "eventId": "evt_001",
        "paymentId": payment_id,
        "reference": "MEG-7781",
        "status": status,
        "amount": 150_000,
        "currency": "NGN",
        "timestamp": "2026-03-01T10:15:00Z"
    })
    .to_string()
    .into_bytes()
}

fn signed(path: &str, body: Vec<u8>) -> TestRequest {
    let signature = sign_hex(REFERENCE_WEBHOOK_SECRET, &body);
    post(path)
        .insert_header(("content-type", "application/json"))
        .insert_header((REFERENCE_SIGNATURE_HEADER, signature))
        .set_payload(body)
}

fn checkout_event(id: &str, event_type: &str, object: Value) -> Vec<u8> {
    json!({ "id": id, "type": event_type, "created": Utc::now().timestamp(), "data": { "object": object } })
        .to_string()
        .into_bytes()
}

fn signed_checkout(body: Vec<u8>) -> TestRequest {
    let header = TimestampedSignature::header_for(CHECKOUT_WEBHOOK_SECRET, Utc::now().timestamp(), &body);
    post("/webhooks/hosted_checkout")
        .insert_header(("content-type", "application/json"))
        .insert_header((CHECKOUT_SIGNATURE_HEADER, header))
        .set_payload(body)
}

#[actix_web::test]
async fn invalid_signatures_are_rejected() {
    let (harness, payment) = Harness::with_pending_payment().await;
    let req = post("/webhooks/reference")
        .insert_header(("content-type", "application/json"))
        .insert_header((REFERENCE_SIGNATURE_HEADER, "00deadbeef"))
        .set_payload(reference_event("ref_123", "accepted"));
    let (status, body) = harness.deliver(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");

    let req = post("/webhooks/reference").set_payload(reference_event("ref_123", "accepted"));
    let (status, _) = harness.deliver(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let stored = harness.payments.fetch_payment(&payment.id).await.unwrap();
    assert_eq!(stored.status, PaymentRecordStatus::Pending);
    tear_down(harness.db).await;
}

#[actix_web::test]
async fn unknown_payments_are_acknowledged_and_ignored() {
    let (harness, _) = Harness::with_pending_payment().await;
    let (status, body) = harness.deliver(signed("/webhooks/reference", reference_event("ref_999", "accepted"))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "ignored");
    assert!(body["payment_id"].is_null());
    tear_down(harness.db).await;
}

#[actix_web::test]
async fn unknown_methods_are_bad_requests() {
    let (harness, _) = Harness::with_pending_payment().await;
    let (status, body) = harness.deliver(signed("/webhooks/carrier_pigeon", reference_event("ref_123", "accepted"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid-argument");
    tear_down(harness.db).await;
}

#[actix_web::test]
async fn malformed_payloads_are_bad_requests() {
    let (harness, _) = Harness::with_pending_payment().await;
    let (status, body) = harness.deliver(signed("/webhooks/reference", b"{\"eventId\":1}".to_vec())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid-argument");
    tear_down(harness.db).await;
}

#[actix_web::test]
async fn completion_funds_the_escrow_once() {
    let (harness, payment) = Harness::with_pending_payment().await;
    let event = reference_event("ref_123", "accepted");
    let (status, body) = harness.deliver(signed("/webhooks/reference", event.clone())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "processed");
    assert_eq!(body["payment_id"], payment.id.to_string());

    // Providers retry deliveries. The second one must not credit the booking again.
    let (status, body) = harness.deliver(signed("/webhooks/reference", event)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "processed");

    let stored = harness.payments.fetch_payment(&payment.id).await.unwrap();
    assert_eq!(stored.status, PaymentRecordStatus::Completed);
    let booking = LedgerApi::new(harness.db.clone()).fetch_booking(&BookingId::from("bk_1")).await.unwrap();
    assert_eq!(booking.paid_amount, Amount::from(150_000));
    assert_eq!(booking.effective_payment_status(), "escrow_funded");
    let escrow_id = payment.escrow_id().unwrap();
    let escrows = EscrowApi::new(harness.db.clone(), FeeSchedule::default(), EventProducers::default());
    let escrow = escrows.fetch_escrow(&escrow_id).await.unwrap();
    assert_eq!(escrow.status, EscrowStatus::Funded);
    assert_eq!(escrow.payment_id.as_deref(), Some(payment.id.as_str()));
    tear_down(harness.db).await;
}

#[actix_web::test]
async fn failure_after_completion_is_ignored() {
    let (harness, payment) = Harness::with_pending_payment().await;
    let (status, _) = harness.deliver(signed("/webhooks/reference", reference_event("ref_123", "accepted"))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = harness.deliver(signed("/webhooks/reference", reference_event("ref_123", "failed"))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let stored = harness.payments.fetch_payment(&payment.id).await.unwrap();
    assert_eq!(stored.status, PaymentRecordStatus::Completed);
    tear_down(harness.db).await;
}

#[actix_web::test]
async fn checkout_refunds_find_the_session_through_its_payment_intent() {
    let (harness, payment) = Harness::with_checkout_session().await;
    let completed = checkout_event(
        "evt_cs_1",
        "checkout.session.completed",
        json!({
            "id": "cs_1",
            "payment_intent": "pi_1",
            "payment_status": "paid",
            "amount_total": 150_000,
            "currency": "ngn",
            "client_reference_id": payment.id.as_str()
        }),
    );
    let (status, body) = harness.deliver(signed_checkout(completed)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "processed");
    let stored = harness.payments.fetch_payment(&payment.id).await.unwrap();
    assert_eq!(stored.status, PaymentRecordStatus::Completed);
    assert_eq!(stored.provider_intent_id.as_deref(), Some("pi_1"));
    assert_eq!(harness.paid_amount().await, Amount::from(150_000));

    // The charge only knows the payment intent, never the session
    let refunded = checkout_event(
        "evt_ch_1",
        "charge.refunded",
        json!({ "id": "ch_1", "payment_intent": "pi_1", "amount_refunded": 150_000, "currency": "ngn" }),
    );
    let (status, body) = harness.deliver(signed_checkout(refunded)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "processed");
    assert_eq!(body["payment_id"], payment.id.to_string());
    let stored = harness.payments.fetch_payment(&payment.id).await.unwrap();
    assert_eq!(stored.status, PaymentRecordStatus::Refunded);
    tear_down(harness.db).await;
}

#[actix_web::test]
async fn checkout_refunds_for_unknown_intents_are_ignored() {
    let (harness, payment) = Harness::with_checkout_session().await;
    let refunded = checkout_event(
        "evt_ch_2",
        "charge.refunded",
        json!({ "id": "ch_2", "payment_intent": "pi_unknown", "amount_refunded": 150_000, "currency": "ngn" }),
    );
    let (status, body) = harness.deliver(signed_checkout(refunded)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "ignored");
    let stored = harness.payments.fetch_payment(&payment.id).await.unwrap();
    assert_eq!(stored.status, PaymentRecordStatus::Pending);
    tear_down(harness.db).await;
}

#[actix_web::test]
async fn capture_after_cancellation_is_acknowledged_and_flagged() {
    let (harness, payment) = Harness::with_pending_payment().await;
    harness.payments.cancel_payment(&Caller::user("client_1"), &payment.id).await.expect("Could not cancel");

    // The payer completed the transfer anyway. The provider must not be told to retry.
    let (status, body) = harness.deliver(signed("/webhooks/reference", reference_event("ref_123", "accepted"))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "flagged");
    assert_eq!(body["payment_id"], payment.id.to_string());

    let stored = harness.payments.fetch_payment(&payment.id).await.unwrap();
    assert_eq!(stored.status, PaymentRecordStatus::Cancelled);
    assert_eq!(harness.paid_amount().await, Amount::from(0));
    let escrows = EscrowApi::new(harness.db.clone(), FeeSchedule::default(), EventProducers::default());
    let escrow = escrows.fetch_escrow(&payment.escrow_id().unwrap()).await.unwrap();
    assert_eq!(escrow.status, EscrowStatus::PendingPayment);

    let log = harness.db.fetch_audit_log(payment.id.as_str()).await.unwrap();
    let flags = log.iter().filter(|e| e.event_type == "payment_captured_after_close").collect::<Vec<_>>();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].category, "finance");
    assert_eq!(flags[0].actor, "reference");
    assert_eq!(flags[0].previous_value.0["status"], "cancelled");
    assert_eq!(flags[0].metadata.0["reportedAmount"], 150_000);
    tear_down(harness.db).await;
}
