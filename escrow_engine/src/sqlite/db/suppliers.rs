use chrono::Utc;
use sqlx::SqliteConnection;

use crate::{
    db_types::{FeeOverride, NewSupplierProfile, SupplierProfile},
    fees::FeeRate,
    traits::EngineError,
};

pub async fn fetch_supplier_profile(
    supplier_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<SupplierProfile>, EngineError> {
    let profile = sqlx::query_as("SELECT * FROM supplier_profiles WHERE supplier_id = $1")
        .bind(supplier_id)
        .fetch_optional(conn)
        .await?;
    Ok(profile)
}

pub async fn upsert_supplier_profile(
    profile: NewSupplierProfile,
    conn: &mut SqliteConnection,
) -> Result<SupplierProfile, EngineError> {
    let now = Utc::now();
    let profile = sqlx::query_as(
        r#"
            INSERT INTO supplier_profiles (supplier_id, user_id, tier, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (supplier_id) DO UPDATE SET
                user_id = excluded.user_id,
                tier = excluded.tier,
                updated_at = excluded.updated_at
            RETURNING *;
        "#,
    )
    .bind(profile.supplier_id)
    .bind(profile.user_id)
    .bind(profile.tier.as_str())
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(profile)
}

pub async fn fetch_fee_override(
    supplier_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<FeeOverride>, EngineError> {
    let fee = sqlx::query_as("SELECT * FROM supplier_fee_overrides WHERE supplier_id = $1")
        .bind(supplier_id)
        .fetch_optional(conn)
        .await?;
    Ok(fee)
}

pub async fn upsert_fee_override(
    supplier_id: &str,
    rate: FeeRate,
    reason: Option<String>,
    conn: &mut SqliteConnection,
) -> Result<FeeOverride, EngineError> {
    let now = Utc::now();
    let fee = sqlx::query_as(
        r#"
            INSERT INTO supplier_fee_overrides (supplier_id, fee_bps, reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (supplier_id) DO UPDATE SET
                fee_bps = excluded.fee_bps,
                reason = excluded.reason,
                updated_at = excluded.updated_at
            RETURNING *;
        "#,
    )
    .bind(supplier_id)
    .bind(rate.bps())
    .bind(reason)
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(fee)
}
