use chrono::Utc;
use log::{debug, trace};
use sqlx::{types::Json, SqliteConnection};

use crate::{
    db_types::{Amount, NewPayment, Payment, PaymentId, PaymentRecordStatus},
    traits::EngineError,
};

pub async fn insert_payment(payment: NewPayment, conn: &mut SqliteConnection) -> Result<Payment, EngineError> {
    let key = payment.idempotency_key.clone();
    let booking_id = payment.booking_id.clone();
    let now = Utc::now();
    let payment: Payment = sqlx::query_as(
        r#"
            INSERT INTO payments (
                id,
                provider,
                provider_payment_id,
                booking_id,
                payer_id,
                amount,
                currency,
                status,
                checkout_url,
                metadata,
                idempotency_key,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $10, $11, $11)
            RETURNING *;
        "#,
    )
    .bind(payment.id)
    .bind(payment.provider)
    .bind(payment.provider_payment_id)
    .bind(payment.booking_id)
    .bind(payment.payer_id)
    .bind(payment.amount)
    .bind(payment.currency)
    .bind(payment.checkout_url)
    .bind(Json(payment.metadata))
    .bind(payment.idempotency_key)
    .bind(now)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => {
            EngineError::PaymentAlreadyExists(key.unwrap_or_else(|| err.message().to_string()))
        },
        sqlx::Error::Database(err) if err.is_foreign_key_violation() => EngineError::BookingNotFound(booking_id),
        _ => EngineError::from(e),
    })?;
    debug!("🗃️ Payment {} for {} via {} inserted", payment.id, payment.amount, payment.provider);
    Ok(payment)
}

pub async fn fetch_payment(id: &PaymentId, conn: &mut SqliteConnection) -> Result<Option<Payment>, EngineError> {
    let payment = sqlx::query_as("SELECT * FROM payments WHERE id = $1").bind(id.as_str()).fetch_optional(conn).await?;
    Ok(payment)
}

pub async fn fetch_payment_by_provider_id(
    provider: &str,
    provider_payment_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, EngineError> {
    let payment = sqlx::query_as("SELECT * FROM payments WHERE provider = $1 AND provider_payment_id = $2")
        .bind(provider)
        .bind(provider_payment_id)
        .fetch_optional(conn)
        .await?;
    Ok(payment)
}

pub async fn fetch_payment_by_provider_intent(
    provider: &str,
    provider_intent_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, EngineError> {
    let payment = sqlx::query_as("SELECT * FROM payments WHERE provider = $1 AND provider_intent_id = $2")
        .bind(provider)
        .bind(provider_intent_id)
        .fetch_optional(conn)
        .await?;
    Ok(payment)
}

/// Records the provider's intent id. An id that is already set is never overwritten.
pub async fn link_provider_intent(
    id: &PaymentId,
    provider_intent_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, EngineError> {
    let payment = sqlx::query_as(
        r#"
            UPDATE payments SET provider_intent_id = $1, updated_at = $2
            WHERE id = $3 AND provider_intent_id IS NULL
            RETURNING *;
        "#,
    )
    .bind(provider_intent_id)
    .bind(Utc::now())
    .bind(id.as_str())
    .fetch_optional(conn)
    .await?;
    if payment.is_some() {
        trace!("🗃️ Payment {id} linked to provider intent {provider_intent_id}");
    }
    Ok(payment)
}

pub async fn fetch_payment_by_idempotency_key(
    key: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, EngineError> {
    let payment =
        sqlx::query_as("SELECT * FROM payments WHERE idempotency_key = $1").bind(key).fetch_optional(conn).await?;
    Ok(payment)
}

/// Moves the payment from `from` to `to` if, and only if, it is currently in `from`.
pub async fn transition_payment(
    id: &PaymentId,
    from: PaymentRecordStatus,
    to: PaymentRecordStatus,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, EngineError> {
    trace!("🗃️ Payment {id}: {from} -> {to}");
    let payment = sqlx::query_as(
        "UPDATE payments SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4 RETURNING *",
    )
    .bind(to.as_str())
    .bind(Utc::now())
    .bind(id.as_str())
    .bind(from.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(payment)
}

/// `pending -> completed`, optionally replacing the recorded amount with the provider-confirmed one.
pub async fn complete_pending_payment(
    id: &PaymentId,
    confirmed_amount: Option<Amount>,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, EngineError> {
    let payment = sqlx::query_as(
        r#"
            UPDATE payments SET status = 'completed', amount = COALESCE($1, amount), updated_at = $2
            WHERE id = $3 AND status = 'pending'
            RETURNING *;
        "#,
    )
    .bind(confirmed_amount)
    .bind(Utc::now())
    .bind(id.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(payment)
}
