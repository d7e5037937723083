use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db_types::{BookingId, Escrow, EscrowId, EscrowStatus, EscrowTerms},
    traits::EngineError,
};

/// Inserts a priced escrow in the `pending_payment` state.
pub async fn insert_escrow(terms: EscrowTerms, conn: &mut SqliteConnection) -> Result<Escrow, EngineError> {
    let EscrowTerms { id, escrow, fee_rate, platform_fee, supplier_payout } = terms;
    let now = Utc::now();
    let escrow: Escrow = sqlx::query_as(
        r#"
            INSERT INTO escrows (
                id,
                booking_id,
                client_id,
                supplier_id,
                total_amount,
                platform_fee,
                platform_fee_bps,
                supplier_payout,
                currency,
                status,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending_payment', $10, $10)
            RETURNING *;
        "#,
    )
    .bind(id)
    .bind(escrow.booking_id.clone())
    .bind(escrow.client_id)
    .bind(escrow.supplier_id)
    .bind(escrow.total_amount)
    .bind(platform_fee)
    .bind(fee_rate.bps())
    .bind(supplier_payout)
    .bind(escrow.currency)
    .bind(now)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_foreign_key_violation() => EngineError::BookingNotFound(escrow.booking_id),
        _ => EngineError::from(e),
    })?;
    debug!("🗃️ Escrow {} inserted for booking {}", escrow.id, escrow.booking_id);
    Ok(escrow)
}

pub async fn fetch_escrow(id: &EscrowId, conn: &mut SqliteConnection) -> Result<Option<Escrow>, EngineError> {
    let escrow = sqlx::query_as("SELECT * FROM escrows WHERE id = $1").bind(id.as_str()).fetch_optional(conn).await?;
    Ok(escrow)
}

/// Like [`fetch_escrow`], but a missing escrow is an error.
pub async fn fetch_existing_escrow(id: &EscrowId, conn: &mut SqliteConnection) -> Result<Escrow, EngineError> {
    fetch_escrow(id, conn).await?.ok_or_else(|| EngineError::EscrowNotFound(id.clone()))
}

pub async fn fetch_open_escrow_for_booking(
    booking_id: &BookingId,
    conn: &mut SqliteConnection,
) -> Result<Option<Escrow>, EngineError> {
    let escrow = sqlx::query_as(
        "SELECT * FROM escrows WHERE booking_id = $1 AND status <> 'refunded' ORDER BY created_at DESC, rowid DESC LIMIT 1",
    )
    .bind(booking_id.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(escrow)
}

/// Fields written alongside a status change. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct EscrowChanges {
    pub payment_id: Option<String>,
    pub funded_at: Option<DateTime<Utc>>,
    pub service_completed_at: Option<DateTime<Utc>>,
    pub auto_release_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub released_by: Option<String>,
    pub release_notes: Option<String>,
    pub disputed_at: Option<DateTime<Utc>>,
    pub dispute_reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refunded_by: Option<String>,
    pub refund_reason: Option<String>,
}

/// Compare-and-set transition. The escrow moves to `to` only if its current status is one of `from`.
///
/// Returns `None` when the escrow does not exist or was not in an allowed state. Nothing is written in that case,
/// but the statement still takes SQLite's write lock, so reads that follow in the same transaction see the latest
/// committed state.
pub async fn transition_escrow(
    id: &EscrowId,
    from: &[EscrowStatus],
    to: EscrowStatus,
    changes: EscrowChanges,
    conn: &mut SqliteConnection,
) -> Result<Option<Escrow>, EngineError> {
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE escrows SET status = ");
    builder.push_bind(to.as_str());
    builder.push(", updated_at = ");
    builder.push_bind(Utc::now());
    macro_rules! set_if_some {
        ($field:ident) => {
            if let Some(v) = changes.$field {
                builder.push(concat!(", ", stringify!($field), " = "));
                builder.push_bind(v);
            }
        };
    }
    set_if_some!(payment_id);
    set_if_some!(funded_at);
    set_if_some!(service_completed_at);
    set_if_some!(auto_release_at);
    set_if_some!(released_at);
    set_if_some!(released_by);
    set_if_some!(release_notes);
    set_if_some!(disputed_at);
    set_if_some!(dispute_reason);
    set_if_some!(refunded_at);
    set_if_some!(refunded_by);
    set_if_some!(refund_reason);
    builder.push(" WHERE id = ");
    builder.push_bind(id.as_str());
    builder.push(" AND status IN (");
    let mut statuses = builder.separated(", ");
    for status in from {
        statuses.push_bind(status.as_str());
    }
    builder.push(") RETURNING *");
    trace!("🗃️ Executing query: {}", builder.sql());
    let escrow = builder.build_query_as::<Escrow>().fetch_optional(conn).await?;
    if let Some(e) = &escrow {
        debug!("🗃️ Escrow {id} is now {}", e.status);
    }
    Ok(escrow)
}

/// Service-completed escrows whose `auto_release_at` is at or before `now`, oldest deadline first.
pub async fn fetch_due_auto_releases(
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Escrow>, EngineError> {
    let escrows = sqlx::query_as(
        r#"
            SELECT * FROM escrows
            WHERE status = 'service_completed'
              AND auto_release_at IS NOT NULL
              AND julianday(auto_release_at) <= julianday($1)
            ORDER BY julianday(auto_release_at) ASC
        "#,
    )
    .bind(now)
    .fetch_all(conn)
    .await?;
    Ok(escrows)
}
