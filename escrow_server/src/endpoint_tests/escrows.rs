use actix_web::{http::StatusCode, web, web::ServiceConfig};
use chrono::{Duration, Utc};
use escrow_engine::{
    db_types::{Amount, BookingId, Escrow, EscrowId, EscrowStatus, Payout, SettlementStatus},
    events::EventProducers,
    fees::FeeSchedule,
    traits::{EscrowTransition, ReleaseResult},
    EscrowApi,
};
use serde_json::json;

use super::{
    helpers::{admin_token, api_request, get, post, user_token, with_token},
    mocks::MockEscrowManager,
};
use crate::routes::{AutoReleaseRoute, CompleteServiceRoute, DisputeRoute, EscrowRoute, ReleaseRoute};

#[actix_web::test]
async fn requests_without_a_token_are_rejected() {
    let _ = env_logger::try_init().ok();
    let (status, body) = api_request(get("/api/escrows/esc_1"), configure(MockEscrowManager::new())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "unauthenticated");
}

#[actix_web::test]
async fn forged_tokens_are_rejected() {
    let _ = env_logger::try_init().ok();
    let mut token = user_token("client_1");
    token.replace_range(token.len() - 10..token.len() - 5, "00000");
    let req = with_token(get("/api/escrows/esc_1"), &token);
    let (status, body) = api_request(req, configure(MockEscrowManager::new())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");
}

#[actix_web::test]
async fn parties_can_view_their_escrow() {
    let _ = env_logger::try_init().ok();
    let mut db = MockEscrowManager::new();
    db.expect_fetch_escrow().returning(|_| Ok(Some(escrow(EscrowStatus::Funded))));
    db.expect_fetch_payout_for_escrow().returning(|_| Ok(None));
    db.expect_fetch_refund_for_escrow().returning(|_| Ok(None));
    let req = with_token(get("/api/escrows/esc_1"), &user_token("supplier_1"));
    let (status, body) = api_request(req, configure(db)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["escrow"]["status"], "funded");
    assert_eq!(body["escrow"]["supplier_payout"], 135_000);
    assert!(body["payout"].is_null());
}

#[actix_web::test]
async fn strangers_cannot_view_an_escrow() {
    let _ = env_logger::try_init().ok();
    let mut db = MockEscrowManager::new();
    db.expect_fetch_escrow().returning(|_| Ok(Some(escrow(EscrowStatus::Funded))));
    let req = with_token(get("/api/escrows/esc_1"), &user_token("mallory"));
    let (status, body) = api_request(req, configure(db)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "permission-denied");
}

#[actix_web::test]
async fn unknown_escrow_is_not_found() {
    let _ = env_logger::try_init().ok();
    let mut db = MockEscrowManager::new();
    db.expect_fetch_escrow().returning(|_| Ok(None));
    let req = with_token(get("/api/escrows/esc_missing"), &user_token("client_1"));
    let (status, body) = api_request(req, configure(db)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not-found");
}

#[actix_web::test]
async fn supplier_cannot_release() {
    let _ = env_logger::try_init().ok();
    let mut db = MockEscrowManager::new();
    db.expect_fetch_escrow().returning(|_| Ok(Some(escrow(EscrowStatus::ServiceCompleted))));
    db.expect_release_escrow().never();
    let req = with_token(post("/api/escrows/esc_1/release"), &user_token("supplier_1"));
    let (status, body) = api_request(req, configure(db)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "permission-denied");
}

#[actix_web::test]
async fn client_releases_the_payout() {
    let _ = env_logger::try_init().ok();
    let mut db = MockEscrowManager::new();
    db.expect_fetch_escrow().returning(|_| Ok(Some(escrow(EscrowStatus::ServiceCompleted))));
    db.expect_fetch_supplier_profile().returning(|_| Ok(None));
    db.expect_release_escrow()
        .withf(|id, by, recipient, notes| {
            id.as_str() == "esc_1" &&
                by == "client_1" &&
                recipient == "supplier_1" &&
                notes.as_deref() == Some("Great job")
        })
        .times(1)
        .returning(|_, _, _, _| {
            Ok(ReleaseResult { escrow: escrow(EscrowStatus::Released), payout: payout(), already_released: false })
        });
    let req = with_token(post("/api/escrows/esc_1/release"), &user_token("client_1"))
        .set_json(json!({ "notes": "Great job" }));
    let (status, body) = api_request(req, configure(db)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["escrow"]["status"], "released");
    assert_eq!(body["payout"]["amount"], 135_000);
    assert_eq!(body["already_released"], false);
}

#[actix_web::test]
async fn releasing_a_disputed_escrow_fails_precondition() {
    let _ = env_logger::try_init().ok();
    let mut db = MockEscrowManager::new();
    db.expect_fetch_escrow().returning(|_| Ok(Some(escrow(EscrowStatus::Disputed))));
    db.expect_fetch_supplier_profile().returning(|_| Ok(None));
    db.expect_release_escrow().returning(|id, _, _, _| {
        Err(escrow_engine::EngineError::invalid_state(id, "release", EscrowStatus::Disputed))
    });
    let req = with_token(post("/api/escrows/esc_1/release"), &admin_token("ops"));
    let (status, body) = api_request(req, configure(db)).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["code"], "failed-precondition");
}

#[actix_web::test]
async fn completing_without_a_body_uses_the_default_window() {
    let _ = env_logger::try_init().ok();
    let mut db = MockEscrowManager::new();
    db.expect_fetch_escrow().returning(|_| Ok(Some(escrow(EscrowStatus::Funded))));
    db.expect_mark_service_completed()
        .withf(|_, at, actor| {
            let expected = Utc::now() + Duration::hours(48);
            actor == "supplier_1" && (*at - expected).num_seconds().abs() < 60
        })
        .times(1)
        .returning(|_, at, _| {
            let mut escrow = escrow(EscrowStatus::ServiceCompleted);
            escrow.auto_release_at = Some(at);
            Ok(EscrowTransition { escrow, previous_status: EscrowStatus::Funded, changed: true })
        });
    let req = with_token(post("/api/escrows/esc_1/complete"), &user_token("supplier_1"));
    let (status, body) = api_request(req, configure(db)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);
    assert_eq!(body["escrow"]["status"], "service_completed");
}

#[actix_web::test]
async fn disputes_need_a_reason() {
    let _ = env_logger::try_init().ok();
    let mut db = MockEscrowManager::new();
    db.expect_dispute_escrow().never();
    let req = with_token(post("/api/escrows/esc_1/dispute"), &user_token("client_1")).set_json(json!({ "reason": " " }));
    let (status, body) = api_request(req, configure(db)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid-argument");

    let req = with_token(post("/api/escrows/esc_1/dispute"), &user_token("client_1")).set_json(json!({}));
    let (status, body) = api_request(req, configure(MockEscrowManager::new())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid-argument");
}

#[actix_web::test]
async fn auto_release_is_for_admins_only() {
    let _ = env_logger::try_init().ok();
    let mut db = MockEscrowManager::new();
    db.expect_fetch_due_auto_releases().never();
    let req = with_token(post("/api/admin/auto_release"), &user_token("client_1"));
    let (status, body) = api_request(req, configure(db)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "permission-denied");

    let mut db = MockEscrowManager::new();
    db.expect_fetch_due_auto_releases().times(1).returning(|_| Ok(vec![]));
    let req = with_token(post("/api/admin/auto_release"), &admin_token("ops"));
    let (status, body) = api_request(req, configure(db)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], 0);
}

fn configure(db: MockEscrowManager) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg: &mut ServiceConfig| {
        let api = EscrowApi::new(db, FeeSchedule::default(), EventProducers::default());
        cfg.service(EscrowRoute::<MockEscrowManager>::new())
            .service(CompleteServiceRoute::<MockEscrowManager>::new())
            .service(ReleaseRoute::<MockEscrowManager>::new())
            .service(DisputeRoute::<MockEscrowManager>::new())
            .service(AutoReleaseRoute::<MockEscrowManager>::new())
            .app_data(web::Data::new(api));
    }
}

fn escrow(status: EscrowStatus) -> Escrow {
    let now = Utc::now();
    Escrow {
        id: EscrowId::from("esc_1"),
        booking_id: BookingId::from("bk_1"),
        payment_id: Some("pay_1".into()),
        client_id: "client_1".into(),
        supplier_id: "supplier_1".into(),
        total_amount: Amount::from(150_000),
        platform_fee: Amount::from(15_000),
        platform_fee_bps: 1_000,
        supplier_payout: Amount::from(135_000),
        currency: "NGN".into(),
        status,
        created_at: now,
        funded_at: Some(now),
        service_completed_at: None,
        auto_release_at: None,
        released_at: None,
        released_by: None,
        release_notes: None,
        disputed_at: None,
        dispute_reason: None,
        refunded_at: None,
        refunded_by: None,
        refund_reason: None,
        updated_at: now,
    }
}

fn payout() -> Payout {
    let now = Utc::now();
    Payout {
        id: 1,
        escrow_id: EscrowId::from("esc_1"),
        booking_id: BookingId::from("bk_1"),
        recipient_id: "supplier_1".into(),
        amount: Amount::from(135_000),
        currency: "NGN".into(),
        status: SettlementStatus::Pending,
        created_at: now,
        updated_at: now,
    }
}
