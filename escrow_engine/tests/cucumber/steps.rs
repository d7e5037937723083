use std::str::FromStr;

use chrono::{Duration, Utc};
use cucumber::{given, then, when};
use escrow_engine::{
    db_types::{
        Amount,
        BookingEscrowStatus,
        BookingId,
        EscrowStatus,
        NewBooking,
        NewEscrow,
        NewPayment,
        NewSupplierProfile,
        PaymentRecordStatus,
        PaymentStatus,
        SettlementStatus,
        SupplierTier,
    },
    fees::FeeRate,
    traits::LedgerExtras,
    EngineError,
    PaymentIntent,
};

use crate::cucumber::{
    escrow_world::{caller, EscrowSystem},
    EscrowWorld,
};

#[given("a fresh escrow system")]
async fn fresh_system(world: &mut EscrowWorld) {
    world.system = Some(EscrowSystem::new().await);
}

#[given(expr = "a booking {word} from client '{word}' to supplier '{word}' for {int} NGN")]
async fn booking(world: &mut EscrowWorld, id: String, client: String, supplier: String, total: i64) {
    let booking = NewBooking::new(BookingId::from(id), client, supplier, Amount::from(total));
    world.system().ledger.upsert_booking(booking).await.expect("Error storing booking");
}

#[given(expr = "supplier '{word}' is a {word} tier supplier paid to '{word}'")]
async fn supplier_profile(world: &mut EscrowWorld, supplier: String, tier: String, user: String) {
    let tier = SupplierTier::from_str(&tier).expect("Unknown tier");
    let profile = NewSupplierProfile { supplier_id: supplier, user_id: user, tier };
    world.system().escrows.upsert_supplier_profile(profile).await.expect("Error storing supplier profile");
}

#[given(expr = "supplier '{word}' has a custom fee of {float} percent")]
async fn custom_fee(world: &mut EscrowWorld, supplier: String, percent: f64) {
    let rate = FeeRate::from_percent(percent);
    world.system().escrows.set_fee_override(&supplier, rate, Some("negotiated".into())).await.expect("Error storing override");
}

#[when(expr = "an escrow {word} is created for booking {word}")]
async fn create_escrow(world: &mut EscrowWorld, alias: String, booking_id: String) {
    let system = world.system();
    let booking = system.ledger.fetch_booking(&BookingId::from(booking_id)).await.expect("Booking not found");
    let new_escrow = NewEscrow {
        booking_id: booking.id.clone(),
        client_id: booking.client_id.clone(),
        supplier_id: booking.supplier_id.clone(),
        total_amount: booking.total_amount,
        currency: booking.currency.clone(),
    };
    let escrow = system.escrows.create_escrow(new_escrow, &booking.client_id).await.expect("Error creating escrow");
    world.escrows.insert(alias, escrow.id);
}

#[when(expr = "escrow {word} is funded by payment {word}")]
async fn fund_escrow(world: &mut EscrowWorld, alias: String, payment_id: String) {
    let id = world.escrow_id(&alias);
    let result = world.system().escrows.fund_escrow(&id, &payment_id).await;
    world.record(result);
}

#[when(expr = "'{word}' marks escrow {word} as service completed")]
async fn mark_completed(world: &mut EscrowWorld, who: String, alias: String) {
    let id = world.escrow_id(&alias);
    let result = world.system().escrows.mark_service_completed(&caller(&who), &id, None).await;
    world.record(result);
}

#[when(expr = "'{word}' marks escrow {word} as service completed with a {int} hour window")]
async fn mark_completed_with_window(world: &mut EscrowWorld, who: String, alias: String, hours: i64) {
    let id = world.escrow_id(&alias);
    let result = world.system().escrows.mark_service_completed(&caller(&who), &id, Some(hours)).await;
    world.record(result);
}

#[when(expr = "'{word}' releases escrow {word}")]
async fn release(world: &mut EscrowWorld, who: String, alias: String) {
    let id = world.escrow_id(&alias);
    let result = world.system().escrows.release(&caller(&who), &id, None).await;
    world.record(result);
}

#[when(expr = "'{word}' refunds escrow {word} because {string}")]
async fn refund(world: &mut EscrowWorld, who: String, alias: String, reason: String) {
    let id = world.escrow_id(&alias);
    let result = world.system().escrows.refund(&caller(&who), &id, Some(reason)).await;
    world.record(result);
}

#[when(expr = "'{word}' disputes escrow {word} because {string}")]
async fn dispute(world: &mut EscrowWorld, who: String, alias: String, reason: String) {
    let id = world.escrow_id(&alias);
    let result = world.system().escrows.dispute(&caller(&who), &id, &reason).await;
    world.record(result);
}

#[when("the auto-release sweep runs")]
async fn sweep(world: &mut EscrowWorld) {
    let released = world.system().escrows.process_auto_releases().await.expect("Auto-release sweep failed");
    world.last_sweep = Some(released);
}

#[when(expr = "payment {word} for {int} NGN is applied to booking {word}")]
async fn apply_payment(world: &mut EscrowWorld, payment_id: String, amount: i64, booking_id: String) {
    let extras = LedgerExtras::for_method("reference", Utc::now());
    let result =
        world.system().ledger.apply_payment(&BookingId::from(booking_id), &payment_id, Amount::from(amount), extras).await;
    world.record(result);
}

#[when(expr = "'{word}' starts paying for booking {word} as payment {word} of escrow {word}")]
async fn start_payment(world: &mut EscrowWorld, who: String, booking_id: String, payment: String, alias: String) {
    let booking_id = BookingId::from(booking_id);
    let key = Some(format!("intent-{payment}"));
    let intent = world.system().payments.prepare_payment_intent(&caller(&who), &booking_id, key).await;
    let Some(intent) = world.record(intent) else {
        return;
    };
    let PaymentIntent::New(plan) = intent else {
        panic!("Expected a new payment intent");
    };
    let new_payment = NewPayment::new("reference", booking_id, who.as_str(), plan.amount)
        .with_escrow(&plan.escrow.id)
        .with_provider_payment_id(format!("ref-{payment}"));
    let new_payment = NewPayment { idempotency_key: plan.idempotency_key.clone(), ..new_payment };
    let stored = world.system().payments.record_payment(new_payment).await.expect("Error recording payment");
    world.escrows.insert(alias, plan.escrow.id);
    world.payments.insert(payment, stored.id);
}

#[when(expr = "the provider reports payment {word} as {word}")]
async fn provider_reports(world: &mut EscrowWorld, payment: String, status: String) {
    let id = world.payment_id(&payment);
    let status = PaymentRecordStatus::from_str(&status).expect("Unknown payment status");
    let result = world.system().payments.apply_provider_status(&id, status, None, None).await;
    world.record(result);
}

#[when(expr = "'{word}' cancels payment {word}")]
async fn cancel_payment(world: &mut EscrowWorld, who: String, payment: String) {
    let id = world.payment_id(&payment);
    let result = world.system().payments.cancel_payment(&caller(&who), &id).await;
    world.record(result);
}

#[then(expr = "escrow {word} has a platform fee of {int} and a supplier payout of {int}")]
async fn check_split(world: &mut EscrowWorld, alias: String, fee: i64, payout: i64) {
    let escrow = world.system().escrows.fetch_escrow(&world.escrow_id(&alias)).await.expect("Escrow not found");
    assert_eq!(escrow.platform_fee, Amount::from(fee), "Platform fee is incorrect");
    assert_eq!(escrow.supplier_payout, Amount::from(payout), "Supplier payout is incorrect");
    assert_eq!(escrow.platform_fee + escrow.supplier_payout, escrow.total_amount);
}

#[then(expr = "escrow {word} has a fee rate of {float} percent")]
async fn check_rate(world: &mut EscrowWorld, alias: String, percent: f64) {
    let escrow = world.system().escrows.fetch_escrow(&world.escrow_id(&alias)).await.expect("Escrow not found");
    assert_eq!(escrow.fee_rate(), FeeRate::from_percent(percent));
}

#[then(expr = "escrow {word} is {word}")]
async fn check_status(world: &mut EscrowWorld, alias: String, status: String) {
    let escrow = world.system().escrows.fetch_escrow(&world.escrow_id(&alias)).await.expect("Escrow not found");
    let expected = EscrowStatus::from_str(&status).expect("Unknown escrow status");
    assert_eq!(escrow.status, expected);
}

#[then(expr = "escrow {word} auto-releases in about {int} hours")]
async fn check_deadline(world: &mut EscrowWorld, alias: String, hours: i64) {
    let escrow = world.system().escrows.fetch_escrow(&world.escrow_id(&alias)).await.expect("Escrow not found");
    let deadline = escrow.auto_release_at.expect("auto_release_at is not set");
    let expected = Utc::now() + Duration::hours(hours);
    let drift = (deadline - expected).num_seconds().abs();
    assert!(drift < 60, "auto_release_at is {deadline}, expected about {expected}");
}

#[then(expr = "escrow {word} has a payout of {int} NGN to '{word}'")]
async fn check_payout(world: &mut EscrowWorld, alias: String, amount: i64, recipient: String) {
    let payout = world.system().escrows.fetch_payout(&world.escrow_id(&alias)).await.expect("Error fetching payout");
    let payout = payout.expect("No payout was created");
    assert_eq!(payout.amount, Amount::from(amount));
    assert_eq!(payout.recipient_id, recipient);
    assert_eq!(payout.status, SettlementStatus::Pending);
}

#[then(expr = "escrow {word} has no payout")]
async fn check_no_payout(world: &mut EscrowWorld, alias: String) {
    let payout = world.system().escrows.fetch_payout(&world.escrow_id(&alias)).await.expect("Error fetching payout");
    assert!(payout.is_none(), "Unexpected payout: {payout:?}");
}

#[then(expr = "escrow {word} has a refund of {int} NGN to '{word}'")]
async fn check_refund(world: &mut EscrowWorld, alias: String, amount: i64, client: String) {
    let refund = world.system().escrows.fetch_refund_for_escrow(&world.escrow_id(&alias)).await.expect("Error fetching refund");
    let refund = refund.expect("No refund was created");
    assert_eq!(refund.amount, Amount::from(amount));
    assert_eq!(refund.client_id, client);
}

#[then(expr = "the audit log for escrow {word} has {int} entries")]
async fn check_audit(world: &mut EscrowWorld, alias: String, count: usize) {
    let log = world.system().escrows.audit_log(&world.escrow_id(&alias)).await.expect("Error fetching audit log");
    assert_eq!(log.len(), count, "Audit log: {log:?}");
    assert!(log.iter().all(|e| e.category == "finance"));
}

#[then(expr = "booking {word} has escrow status {word}")]
async fn check_booking_escrow_status(world: &mut EscrowWorld, booking_id: String, status: String) {
    let booking = world.system().ledger.fetch_booking(&BookingId::from(booking_id)).await.expect("Booking not found");
    let expected = BookingEscrowStatus::from_str(&status).expect("Unknown booking escrow status");
    assert_eq!(booking.escrow_status, expected);
}

#[then(expr = "booking {word} has paid {int} NGN and is {word}")]
async fn check_booking_balance(world: &mut EscrowWorld, booking_id: String, paid: i64, status: String) {
    let booking = world.system().ledger.fetch_booking(&BookingId::from(booking_id)).await.expect("Booking not found");
    let expected = PaymentStatus::from_str(&status).expect("Unknown payment status");
    assert_eq!(booking.paid_amount, Amount::from(paid));
    assert_eq!(booking.payment_status, expected);
}

#[then(expr = "booking {word} has been refunded {int} NGN")]
async fn check_booking_refund(world: &mut EscrowWorld, booking_id: String, amount: i64) {
    let booking = world.system().ledger.fetch_booking(&BookingId::from(booking_id)).await.expect("Booking not found");
    assert_eq!(booking.refunded_amount, Amount::from(amount));
    assert_eq!(booking.escrow_status, BookingEscrowStatus::Refunded);
}

#[then(expr = "payment {word} is {word}")]
async fn check_payment_status(world: &mut EscrowWorld, payment: String, status: String) {
    let id = world.payment_id(&payment);
    let stored = world.system().payments.fetch_payment(&id).await.expect("Payment not found");
    let expected = PaymentRecordStatus::from_str(&status).expect("Unknown payment status");
    assert_eq!(stored.status, expected);
}

#[then(expr = "the sweep released {int} escrows")]
async fn check_sweep(world: &mut EscrowWorld, count: usize) {
    assert_eq!(world.last_sweep, Some(count));
}

#[then("the request is denied")]
async fn check_denied(world: &mut EscrowWorld) {
    match &world.last_error {
        Some(EngineError::PermissionDenied(_)) => {},
        other => panic!("Expected a permission error, got {other:?}"),
    }
}

#[then(expr = "the request fails because the escrow is {word}")]
async fn check_invalid_state(world: &mut EscrowWorld, status: String) {
    let expected = EscrowStatus::from_str(&status).expect("Unknown escrow status");
    match &world.last_error {
        Some(EngineError::InvalidState { status, .. }) => assert_eq!(*status, expected),
        other => panic!("Expected an invalid state error, got {other:?}"),
    }
}

#[then("the request fails a precondition")]
async fn check_precondition(world: &mut EscrowWorld) {
    match &world.last_error {
        Some(EngineError::FailedPrecondition(_)) => {},
        other => panic!("Expected a failed precondition, got {other:?}"),
    }
}

#[then("the request succeeds")]
async fn check_success(world: &mut EscrowWorld) {
    assert!(world.last_error.is_none(), "Unexpected error: {:?}", world.last_error);
}
