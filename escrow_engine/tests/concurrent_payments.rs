use escrow_engine::{
    db_types::{Amount, BookingEscrowStatus, BookingId, NewBooking, NewPayment, PaymentRecordStatus, PaymentStatus},
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
use futures_util::future::join_all;
use log::*;

struct System {
    db: SqliteDatabase,
    escrows: EscrowApi<SqliteDatabase>,
    ledger: LedgerApi<SqliteDatabase>,
    payments: PaymentFlowApi<SqliteDatabase>,
}

async fn setup() -> System {
    let url = random_db_path();
    let db = prepare_test_env(&url).await;
    let escrows = EscrowApi::new(db.clone(), FeeSchedule::default(), EventProducers::default());
    let ledger = LedgerApi::new(db.clone());
    let payments = PaymentFlowApi::new(escrows.clone());
    System { db, escrows, ledger, payments }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_completions_credit_once() {
    let sys = setup().await;
    let booking_id = BookingId::from("b-burst");
    let booking = NewBooking::new(booking_id.clone(), "alice", "bob", Amount::from(150_000));
    sys.ledger.upsert_booking(booking).await.expect("Error storing booking");
    let alice = Caller::user("alice");
    let PaymentIntent::New(plan) =
        sys.payments.prepare_payment_intent(&alice, &booking_id, None).await.expect("Error preparing intent")
    else {
        panic!("Expected a new intent");
    };
    let payment = NewPayment::new("hosted_checkout", booking_id.clone(), "alice", plan.amount)
        .with_escrow(&plan.escrow.id)
        .with_provider_payment_id("cs_burst");
    let payment = sys.payments.record_payment(payment).await.expect("Error recording payment");

    let deliveries = (0..10).map(|_| {
        let api = sys.payments.clone();
        let id = payment.id.clone();
        tokio::spawn(async move {
            api.apply_provider_status(&id, PaymentRecordStatus::Completed, None, None).await
        })
    });
    let results = join_all(deliveries).await;
    let mut changed = 0;
    for result in results {
        let outcome = result.expect("Task panicked").expect("Delivery failed");
        if outcome.changed {
            changed += 1;
        }
    }
    assert_eq!(changed, 1, "Exactly one delivery should complete the payment");

    let booking = sys.ledger.fetch_booking(&booking_id).await.expect("Booking not found");
    assert_eq!(booking.paid_amount, Amount::from(150_000));
    assert_eq!(booking.payment_status, PaymentStatus::Paid);
    assert_eq!(booking.escrow_status, BookingEscrowStatus::EscrowFunded);
    assert_eq!(sys.ledger.applied_payments(&booking_id).await.expect("Error fetching credits").len(), 1);

    let releases = (0..5).map(|_| {
        let api = sys.escrows.clone();
        let id = plan.escrow.id.clone();
        tokio::spawn(async move { api.release(&Caller::user("alice"), &id, None).await })
    });
    let results = join_all(releases).await;
    let mut payout_ids = results
        .into_iter()
        .map(|r| r.expect("Task panicked").expect("Release failed").payout.id)
        .collect::<Vec<_>>();
    payout_ids.dedup();
    assert_eq!(payout_ids.len(), 1, "Every release must return the same payout");
    let payout = sys.escrows.fetch_payout(&plan.escrow.id).await.expect("Error fetching payout").expect("No payout");
    assert_eq!(payout.amount, Amount::from(135_000));
    info!("🚀️ Burst test complete");
    tear_down(sys.db).await;
}

#[tokio::test]
async fn recompute_repairs_the_balance() {
    let sys = setup().await;
    let booking_id = BookingId::from("b-repair");
    let booking = NewBooking::new(booking_id.clone(), "alice", "bob", Amount::from(1_000));
    sys.ledger.upsert_booking(booking).await.expect("Error storing booking");
    let extras = Default::default();
    sys.ledger.apply_payment(&booking_id, "p1", Amount::from(300), extras).await.expect("Error applying payment");
    sqlx::query("UPDATE bookings SET paid_amount = 999 WHERE id = $1")
        .bind(booking_id.as_str())
        .execute(sys.db.pool())
        .await
        .expect("Error corrupting balance");
    let repaired = sys.ledger.recompute_balance(&booking_id).await.expect("Error recomputing");
    assert_eq!(repaired.paid_amount, Amount::from(300));
    assert_eq!(repaired.payment_status, PaymentStatus::PartiallyPaid);
    tear_down(sys.db).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_intent_links_keep_the_first() {
    let sys = setup().await;
    let booking_id = BookingId::from("b-intent");
    let booking = NewBooking::new(booking_id.clone(), "alice", "bob", Amount::from(150_000));
    sys.ledger.upsert_booking(booking).await.expect("Error storing booking");
    let payment = NewPayment::new("hosted_checkout", booking_id.clone(), "alice", Amount::from(150_000))
        .with_provider_payment_id("cs_intent");
    let payment = sys.payments.record_payment(payment).await.expect("Error recording payment");

    let links = (0..6).map(|i| {
        let api = sys.payments.clone();
        let id = payment.id.clone();
        tokio::spawn(async move { api.link_provider_intent(&id, &format!("pi_{i}")).await })
    });
    let mut linked = join_all(links)
        .await
        .into_iter()
        .map(|r| r.expect("Task panicked").expect("Link failed").provider_intent_id)
        .collect::<Vec<_>>();
    linked.dedup();
    assert_eq!(linked.len(), 1, "Every delivery must see the same intent");
    let intent = linked[0].clone().expect("No intent was linked");
    let found = sys
        .payments
        .fetch_payment_by_provider_intent("hosted_checkout", &intent)
        .await
        .expect("Error fetching payment")
        .expect("Payment not found by intent");
    assert_eq!(found.id, payment.id);
    assert!(sys.payments.fetch_payment_by_provider_intent("reference", &intent).await.unwrap().is_none());
    tear_down(sys.db).await;
}

#[tokio::test]
async fn completion_after_cancellation_is_flagged_not_credited() {
    let sys = setup().await;
    let booking_id = BookingId::from("b-late");
    let booking = NewBooking::new(booking_id.clone(), "alice", "bob", Amount::from(150_000));
    sys.ledger.upsert_booking(booking).await.expect("Error storing booking");
    let alice = Caller::user("alice");
    let PaymentIntent::New(plan) =
        sys.payments.prepare_payment_intent(&alice, &booking_id, None).await.expect("Error preparing intent")
    else {
        panic!("Expected a new intent");
    };
    let payment = NewPayment::new("reference", booking_id.clone(), "alice", plan.amount)
        .with_escrow(&plan.escrow.id)
        .with_provider_payment_id("ref-late");
    let payment = sys.payments.record_payment(payment).await.expect("Error recording payment");
    sys.payments.cancel_payment(&alice, &payment.id).await.expect("Error cancelling");

    let outcome = sys
        .payments
        .apply_provider_status(&payment.id, PaymentRecordStatus::Completed, Some(Amount::from(150_000)), None)
        .await
        .expect("A late capture must not be an error");
    assert!(!outcome.changed);
    assert_eq!(outcome.payment.status, PaymentRecordStatus::Cancelled);
    let booking = sys.ledger.fetch_booking(&booking_id).await.expect("Booking not found");
    assert_eq!(booking.paid_amount, Amount::from(0));
    assert!(sys.ledger.applied_payments(&booking_id).await.expect("Error fetching credits").is_empty());
    let log = sys.db.fetch_audit_log(payment.id.as_str()).await.expect("Error fetching audit log");
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].event_type, "payment_captured_after_close");
    tear_down(sys.db).await;
}
