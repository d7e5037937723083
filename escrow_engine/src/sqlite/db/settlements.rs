//! Payout and refund records. Both are created once per escrow (enforced by a unique index on `escrow_id`) and start
//! out `pending`.
use chrono::Utc;
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{Escrow, EscrowId, Payout, Refund},
    traits::EngineError,
};

pub async fn insert_payout(
    escrow: &Escrow,
    recipient_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Payout, EngineError> {
    let now = Utc::now();
    let payout: Payout = sqlx::query_as(
        r#"
            INSERT INTO payouts (escrow_id, booking_id, recipient_id, amount, currency, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $6)
            RETURNING *;
        "#,
    )
    .bind(escrow.id.as_str())
    .bind(escrow.booking_id.as_str())
    .bind(recipient_id)
    .bind(escrow.supplier_payout)
    .bind(escrow.currency.as_str())
    .bind(now)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Payout #{} of {} created for {recipient_id}", payout.id, payout.amount);
    Ok(payout)
}

pub async fn fetch_payout_for_escrow(id: &EscrowId, conn: &mut SqliteConnection) -> Result<Option<Payout>, EngineError> {
    let payout =
        sqlx::query_as("SELECT * FROM payouts WHERE escrow_id = $1").bind(id.as_str()).fetch_optional(conn).await?;
    Ok(payout)
}

pub async fn insert_refund(
    escrow: &Escrow,
    requested_by: &str,
    reason: Option<String>,
    conn: &mut SqliteConnection,
) -> Result<Refund, EngineError> {
    let now = Utc::now();
    let refund: Refund = sqlx::query_as(
        r#"
            INSERT INTO refunds (
                escrow_id, booking_id, payment_id, client_id, amount, currency, reason, requested_by, status,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9, $9)
            RETURNING *;
        "#,
    )
    .bind(escrow.id.as_str())
    .bind(escrow.booking_id.as_str())
    .bind(escrow.payment_id.as_deref())
    .bind(escrow.client_id.as_str())
    .bind(escrow.total_amount)
    .bind(escrow.currency.as_str())
    .bind(reason)
    .bind(requested_by)
    .bind(now)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Refund #{} of {} created for {}", refund.id, refund.amount, refund.client_id);
    Ok(refund)
}

pub async fn fetch_refund_for_escrow(id: &EscrowId, conn: &mut SqliteConnection) -> Result<Option<Refund>, EngineError> {
    let refund =
        sqlx::query_as("SELECT * FROM refunds WHERE escrow_id = $1").bind(id.as_str()).fetch_optional(conn).await?;
    Ok(refund)
}

pub async fn fetch_refund(refund_id: i64, conn: &mut SqliteConnection) -> Result<Option<Refund>, EngineError> {
    let refund = sqlx::query_as("SELECT * FROM refunds WHERE id = $1").bind(refund_id).fetch_optional(conn).await?;
    Ok(refund)
}

pub async fn mark_refund_processing(
    refund_id: i64,
    provider_refund_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Refund>, EngineError> {
    let refund = sqlx::query_as(
        r#"
            UPDATE refunds SET status = 'processing', provider_refund_id = $1, updated_at = $2
            WHERE id = $3 AND status = 'pending'
            RETURNING *;
        "#,
    )
    .bind(provider_refund_id)
    .bind(Utc::now())
    .bind(refund_id)
    .fetch_optional(conn)
    .await?;
    Ok(refund)
}
