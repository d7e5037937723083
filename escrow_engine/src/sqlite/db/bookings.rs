use chrono::Utc;
use log::{debug, trace};
use sqlx::SqliteConnection;

use crate::{
    db_types::{Amount, AppliedPayment, Booking, BookingEscrowStatus, BookingId, NewBooking},
    helpers::derive_payment_status,
    traits::{EngineError, LedgerExtras},
};

/// Inserts or refreshes the booking projection, leaving the balance and escrow markers alone.
pub async fn upsert_booking(booking: NewBooking, conn: &mut SqliteConnection) -> Result<Booking, EngineError> {
    let now = Utc::now();
    let booking: Booking = sqlx::query_as(
        r#"
            INSERT INTO bookings (id, client_id, supplier_id, total_amount, currency, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (id) DO UPDATE SET
                client_id = excluded.client_id,
                supplier_id = excluded.supplier_id,
                total_amount = excluded.total_amount,
                currency = excluded.currency,
                updated_at = excluded.updated_at
            RETURNING *;
        "#,
    )
    .bind(booking.id)
    .bind(booking.client_id)
    .bind(booking.supplier_id)
    .bind(booking.total_amount)
    .bind(booking.currency)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    // The total may have changed, so the derived status may have too
    sync_payment_status(booking, conn).await
}

pub async fn fetch_booking(id: &BookingId, conn: &mut SqliteConnection) -> Result<Option<Booking>, EngineError> {
    let booking = sqlx::query_as("SELECT * FROM bookings WHERE id = $1").bind(id.as_str()).fetch_optional(conn).await?;
    Ok(booking)
}

/// Adds the `(booking, payment)` pair to the applied set. Returns `false` if the pair was already present.
///
/// This is the idempotency guard for ledger credits and must be the first write of the crediting transaction.
pub async fn insert_applied_payment(
    booking_id: &BookingId,
    payment_id: &str,
    amount: Amount,
    conn: &mut SqliteConnection,
) -> Result<bool, EngineError> {
    let result = sqlx::query(
        r#"
            INSERT INTO booking_applied_payments (booking_id, payment_id, amount, applied_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (booking_id, payment_id) DO NOTHING;
        "#,
    )
    .bind(booking_id.as_str())
    .bind(payment_id)
    .bind(amount)
    .bind(Utc::now())
    .execute(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_foreign_key_violation() => EngineError::BookingNotFound(booking_id.clone()),
        _ => EngineError::from(e),
    })?;
    Ok(result.rows_affected() == 1)
}

/// Increments the booking's paid amount, writes the extras and re-derives the payment status.
///
/// Not idempotent on its own. Only call this after [`insert_applied_payment`] returned `true` in the same
/// transaction.
pub async fn credit_booking(
    booking_id: &BookingId,
    amount: Amount,
    extras: LedgerExtras,
    conn: &mut SqliteConnection,
) -> Result<Booking, EngineError> {
    let booking: Booking = sqlx::query_as(
        r#"
            UPDATE bookings SET
                paid_amount = paid_amount + $1,
                last_payment_method = COALESCE($2, last_payment_method),
                last_payment_at = COALESCE($3, last_payment_at),
                updated_at = $4
            WHERE id = $5
            RETURNING *;
        "#,
    )
    .bind(amount)
    .bind(extras.last_payment_method)
    .bind(extras.last_payment_at)
    .bind(Utc::now())
    .bind(booking_id.as_str())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| EngineError::BookingNotFound(booking_id.clone()))?;
    debug!("🗃️ Booking {booking_id} credited with {amount}. Paid so far: {}", booking.paid_amount);
    sync_payment_status(booking, conn).await
}

/// Sets `paid_amount` to the sum of the applied set and re-derives the payment status.
pub async fn recompute_paid_amount(booking_id: &BookingId, conn: &mut SqliteConnection) -> Result<Booking, EngineError> {
    let booking: Booking = sqlx::query_as(
        r#"
            UPDATE bookings SET
                paid_amount = (SELECT COALESCE(SUM(amount), 0) FROM booking_applied_payments WHERE booking_id = $1),
                updated_at = $2
            WHERE id = $1
            RETURNING *;
        "#,
    )
    .bind(booking_id.as_str())
    .bind(Utc::now())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| EngineError::BookingNotFound(booking_id.clone()))?;
    sync_payment_status(booking, conn).await
}

async fn sync_payment_status(booking: Booking, conn: &mut SqliteConnection) -> Result<Booking, EngineError> {
    let status = derive_payment_status(booking.paid_amount, booking.total_amount);
    if status == booking.payment_status {
        return Ok(booking);
    }
    trace!("🗃️ Booking {} payment status {} -> {status}", booking.id, booking.payment_status);
    let booking = sqlx::query_as("UPDATE bookings SET payment_status = $1 WHERE id = $2 RETURNING *")
        .bind(status.as_str())
        .bind(booking.id.as_str())
        .fetch_one(conn)
        .await?;
    Ok(booking)
}

pub async fn fetch_applied_payments(
    booking_id: &BookingId,
    conn: &mut SqliteConnection,
) -> Result<Vec<AppliedPayment>, EngineError> {
    let rows = sqlx::query_as("SELECT * FROM booking_applied_payments WHERE booking_id = $1 ORDER BY applied_at ASC")
        .bind(booking_id.as_str())
        .fetch_all(conn)
        .await?;
    Ok(rows)
}

pub async fn mark_escrow_funded(booking_id: &BookingId, conn: &mut SqliteConnection) -> Result<(), EngineError> {
    set_escrow_marker(booking_id, BookingEscrowStatus::EscrowFunded, conn).await
}

pub async fn mark_supplier_paid(booking_id: &BookingId, conn: &mut SqliteConnection) -> Result<(), EngineError> {
    set_escrow_marker(booking_id, BookingEscrowStatus::Released, &mut *conn).await?;
    sqlx::query("UPDATE bookings SET supplier_paid = 1 WHERE id = $1").bind(booking_id.as_str()).execute(conn).await?;
    Ok(())
}

pub async fn mark_refunded(
    booking_id: &BookingId,
    amount: Amount,
    conn: &mut SqliteConnection,
) -> Result<(), EngineError> {
    set_escrow_marker(booking_id, BookingEscrowStatus::Refunded, &mut *conn).await?;
    sqlx::query("UPDATE bookings SET refunded_amount = $1 WHERE id = $2")
        .bind(amount)
        .bind(booking_id.as_str())
        .execute(conn)
        .await?;
    Ok(())
}

async fn set_escrow_marker(
    booking_id: &BookingId,
    marker: BookingEscrowStatus,
    conn: &mut SqliteConnection,
) -> Result<(), EngineError> {
    let result = sqlx::query("UPDATE bookings SET escrow_status = $1, updated_at = $2 WHERE id = $3")
        .bind(marker.as_str())
        .bind(Utc::now())
        .bind(booking_id.as_str())
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(EngineError::BookingNotFound(booking_id.clone()));
    }
    trace!("🗃️ Booking {booking_id} escrow marker set to {marker}");
    Ok(())
}
