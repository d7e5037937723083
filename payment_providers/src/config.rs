use std::time::Duration;

use log::*;
use meg_common::{parse_env_var, Secret};

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(15);

/// Settings for the bank-reference / instant-payment provider.
#[derive(Debug, Clone, Default)]
pub struct ReferenceConfig {
    pub api_url: String,
    pub api_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    /// Where the provider should send payment notifications.
    pub callback_url: Option<String>,
    pub timeout: Duration,
}

impl ReferenceConfig {
    /// Returns `None` if the provider's API URL is not configured.
    pub fn new_from_env() -> Option<Self> {
        let api_url = std::env::var("MEG_REFERENCE_API_URL").ok().filter(|s| !s.trim().is_empty())?;
        let api_key = Secret::new(std::env::var("MEG_REFERENCE_API_KEY").unwrap_or_else(|_| {
            warn!("🪛️ MEG_REFERENCE_API_KEY not set. Requests to the reference provider will be rejected.");
            String::default()
        }));
        let webhook_secret = Secret::new(std::env::var("MEG_REFERENCE_WEBHOOK_SECRET").unwrap_or_else(|_| {
            warn!("🪛️ MEG_REFERENCE_WEBHOOK_SECRET not set. All reference webhooks will be rejected.");
            String::default()
        }));
        let callback_url = std::env::var("MEG_REFERENCE_CALLBACK_URL").ok();
        Some(Self { api_url, api_key, webhook_secret, callback_url, timeout: provider_timeout() })
    }
}

/// Settings for the hosted-checkout provider.
#[derive(Debug, Clone, Default)]
pub struct CheckoutConfig {
    pub api_url: String,
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub timeout: Duration,
}

impl CheckoutConfig {
    /// Returns `None` if the provider's secret key is not configured.
    pub fn new_from_env() -> Option<Self> {
        let secret_key = std::env::var("MEG_CHECKOUT_SECRET_KEY").ok().filter(|s| !s.trim().is_empty())?;
        let api_url = std::env::var("MEG_CHECKOUT_API_URL").unwrap_or_else(|_| {
            info!("🪛️ MEG_CHECKOUT_API_URL not set, using https://api.stripe.com");
            "https://api.stripe.com".to_string()
        });
        let webhook_secret = Secret::new(std::env::var("MEG_CHECKOUT_WEBHOOK_SECRET").unwrap_or_else(|_| {
            warn!("🪛️ MEG_CHECKOUT_WEBHOOK_SECRET not set. All hosted-checkout webhooks will be rejected.");
            String::default()
        }));
        let success_url = std::env::var("MEG_CHECKOUT_SUCCESS_URL").unwrap_or_else(|_| {
            warn!("🪛️ MEG_CHECKOUT_SUCCESS_URL not set, using (probably useless) default");
            "https://example.com/payments/success".to_string()
        });
        let cancel_url = std::env::var("MEG_CHECKOUT_CANCEL_URL").unwrap_or_else(|_| {
            warn!("🪛️ MEG_CHECKOUT_CANCEL_URL not set, using (probably useless) default");
            "https://example.com/payments/cancelled".to_string()
        });
        Some(Self {
            api_url,
            secret_key: Secret::new(secret_key),
            webhook_secret,
            success_url,
            cancel_url,
            timeout: provider_timeout(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProvidersConfig {
    pub reference: Option<ReferenceConfig>,
    pub checkout: Option<CheckoutConfig>,
}

impl ProvidersConfig {
    pub fn new_from_env() -> Self {
        let reference = ReferenceConfig::new_from_env();
        if reference.is_none() {
            warn!("🪛️ MEG_REFERENCE_API_URL not set. Reference and instant payments are disabled.");
        }
        let checkout = CheckoutConfig::new_from_env();
        if checkout.is_none() {
            warn!("🪛️ MEG_CHECKOUT_SECRET_KEY not set. Hosted checkout payments are disabled.");
        }
        Self { reference, checkout }
    }
}

fn provider_timeout() -> Duration {
    match parse_env_var::<u64>("MEG_PROVIDER_TIMEOUT") {
        Ok(Some(secs)) if secs > 0 => Duration::from_secs(secs),
        Ok(_) => DEFAULT_PROVIDER_TIMEOUT,
        Err(e) => {
            warn!("🪛️ {e}. Using the default provider timeout of {}s", DEFAULT_PROVIDER_TIMEOUT.as_secs());
            DEFAULT_PROVIDER_TIMEOUT
        },
    }
}
