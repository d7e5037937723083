use chrono::Utc;
use log::trace;
use sqlx::{types::Json, SqliteConnection};

use crate::{
    db_types::{AuditLogEntry, NewAuditEntry, AUDIT_CATEGORY_FINANCE},
    traits::EngineError,
};

/// Appends an entry to the finance audit log. Call this inside the transaction that performs the change being
/// audited.
pub async fn insert_audit_entry(entry: NewAuditEntry, conn: &mut SqliteConnection) -> Result<AuditLogEntry, EngineError> {
    trace!("🗃️ Audit: {} on {} by {}", entry.event_type, entry.resource_id, entry.actor);
    let row = sqlx::query_as(
        r#"
            INSERT INTO audit_log (category, event_type, actor, resource_id, previous_value, new_value, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *;
        "#,
    )
    .bind(AUDIT_CATEGORY_FINANCE)
    .bind(entry.event_type)
    .bind(entry.actor)
    .bind(entry.resource_id)
    .bind(Json(entry.previous_value))
    .bind(Json(entry.new_value))
    .bind(Json(entry.metadata))
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    Ok(row)
}

pub async fn fetch_audit_log(resource_id: &str, conn: &mut SqliteConnection) -> Result<Vec<AuditLogEntry>, EngineError> {
    let entries = sqlx::query_as("SELECT * FROM audit_log WHERE resource_id = $1 ORDER BY id ASC")
        .bind(resource_id)
        .fetch_all(conn)
        .await?;
    Ok(entries)
}
