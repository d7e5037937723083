use crate::data_objects::ProviderStatus;

/// Maps the reference provider's status vocabulary. Unknown values are treated as still pending.
pub fn map_reference_status(status: &str) -> ProviderStatus {
    match status.trim().to_ascii_lowercase().as_str() {
        "accepted" | "completed" | "paid" => ProviderStatus::Completed,
        "rejected" | "failed" | "error" => ProviderStatus::Failed,
        "cancelled" | "canceled" => ProviderStatus::Cancelled,
        "expired" => ProviderStatus::Expired,
        "refunded" => ProviderStatus::Refunded,
        _ => ProviderStatus::Pending,
    }
}

/// Joins a base URL and a path without doubling or dropping the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
