use chrono::{DateTime, Duration, Utc};

use crate::db_types::{Amount, PaymentStatus};

/// Default length of the dispute window that follows service completion.
pub const DEFAULT_AUTO_RELEASE_HOURS: i64 = 48;

/// Derives a booking's payment status from its running balance.
///
/// Nothing paid (or a non-positive balance) is `unpaid`; paying the full total or more is `paid`; anything in between
/// is `partially_paid`.
pub fn derive_payment_status(paid: Amount, total: Amount) -> PaymentStatus {
    if paid.value() <= 0 {
        PaymentStatus::Unpaid
    } else if paid >= total {
        PaymentStatus::Paid
    } else {
        PaymentStatus::PartiallyPaid
    }
}

/// The moment an escrow marked as service-completed at `now` becomes eligible for automatic release.
pub fn auto_release_deadline(now: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    now + Duration::hours(hours.max(0))
}
