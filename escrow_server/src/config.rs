use std::{env, time::Duration};

use escrow_engine::fees::{FeeRate, FeeSchedule};
use log::*;
use meg_common::{is_valid_currency_code, parse_env_var, Secret, DEFAULT_CURRENCY_CODE};
use payment_providers::ProvidersConfig;
use rand::{distributions::Alphanumeric, thread_rng, Rng};

use crate::errors::ServerError;

const DEFAULT_MEG_HOST: &str = "127.0.0.1";
const DEFAULT_MEG_PORT: u16 = 8460;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/meg_store.db";
const DEFAULT_AUTO_RELEASE_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_AUTO_RELEASE_HOURS: i64 = 48;
const MIN_JWT_SECRET_LENGTH: usize = 32;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub auth: AuthConfig,
    /// How often the auto-release worker sweeps for escrows whose dispute window has closed.
    pub auto_release_interval: Duration,
    /// The default length of the dispute window, in hours.
    pub auto_release_hours: i64,
    pub fees: FeeSchedule,
    pub providers: ProvidersConfig,
    /// If set, notifications are POSTed here as JSON. Otherwise they are only logged.
    pub notification_url: Option<String>,
    pub default_currency: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_MEG_HOST.to_string(),
            port: DEFAULT_MEG_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            auth: AuthConfig::default(),
            auto_release_interval: DEFAULT_AUTO_RELEASE_INTERVAL,
            auto_release_hours: DEFAULT_AUTO_RELEASE_HOURS,
            fees: FeeSchedule::default(),
            providers: ProvidersConfig::default(),
            notification_url: None,
            default_currency: DEFAULT_CURRENCY_CODE.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("MEG_HOST").ok().unwrap_or_else(|| DEFAULT_MEG_HOST.into());
        let port = env::var("MEG_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for MEG_PORT. {e} Using the default, {DEFAULT_MEG_PORT}, instead."
                    );
                    DEFAULT_MEG_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_MEG_PORT);
        let database_url = env::var("MEG_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ MEG_DATABASE_URL is not set. Using {DEFAULT_DATABASE_URL}");
            DEFAULT_DATABASE_URL.to_string()
        });
        let auth = AuthConfig::try_from_env().unwrap_or_else(|e| {
            warn!(
                "🪛️ Could not load the authentication configuration from environment variables. {e}. Reverting to the \
                 default configuration."
            );
            AuthConfig::default()
        });
        let auto_release_interval = env_or_default("MEG_AUTO_RELEASE_INTERVAL", DEFAULT_AUTO_RELEASE_INTERVAL.as_secs());
        let auto_release_interval = Duration::from_secs(auto_release_interval.max(1));
        let auto_release_hours = env_or_default("MEG_AUTO_RELEASE_HOURS", DEFAULT_AUTO_RELEASE_HOURS).max(0);
        let fees = configure_fees();
        let providers = ProvidersConfig::new_from_env();
        let notification_url = env::var("MEG_NOTIFICATION_URL").ok().filter(|s| !s.trim().is_empty());
        if notification_url.is_none() {
            info!("🪛️ MEG_NOTIFICATION_URL is not set. Notifications will only be logged.");
        }
        let default_currency = match env::var("MEG_DEFAULT_CURRENCY") {
            Ok(c) if is_valid_currency_code(&c) => c,
            Ok(c) => {
                warn!("🪛️ {c} is not a valid currency code for MEG_DEFAULT_CURRENCY. Using {DEFAULT_CURRENCY_CODE}");
                DEFAULT_CURRENCY_CODE.to_string()
            },
            Err(_) => DEFAULT_CURRENCY_CODE.to_string(),
        };
        Self {
            host,
            port,
            database_url,
            auth,
            auto_release_interval,
            auto_release_hours,
            fees,
            providers,
            notification_url,
            default_currency,
        }
    }
}

fn env_or_default<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match parse_env_var::<T>(name) {
        Ok(Some(v)) => v,
        Ok(None) => {
            info!("🪛️ {name} is not set. Using the default value of {default}.");
            default
        },
        Err(e) => {
            warn!("🪛️ Invalid configuration value for {name}. {e}. Using the default value of {default}.");
            default
        },
    }
}

fn fee_rate(name: &str, default: FeeRate) -> FeeRate {
    match parse_env_var::<f64>(name) {
        Ok(Some(percent)) => {
            let rate = FeeRate::from_percent(percent);
            if rate.percent() != percent {
                warn!("🪛️ {name}={percent} is outside the allowed range. Using {rate}");
            }
            rate
        },
        Ok(None) => default,
        Err(e) => {
            warn!("🪛️ Invalid configuration value for {name}. {e}. Using {default}");
            default
        },
    }
}

/// Reads the platform fee settings. Every rate is clamped to the allowed range.
pub fn configure_fees() -> FeeSchedule {
    let defaults = FeeSchedule::default();
    let fees = FeeSchedule {
        default_rate: fee_rate("MEG_DEFAULT_FEE_PERCENT", defaults.default_rate),
        bronze: fee_rate("MEG_FEE_TIER_BRONZE", defaults.bronze),
        silver: fee_rate("MEG_FEE_TIER_SILVER", defaults.silver),
        gold: fee_rate("MEG_FEE_TIER_GOLD", defaults.gold),
        platinum: fee_rate("MEG_FEE_TIER_PLATINUM", defaults.platinum),
    };
    info!(
        "🪛️ Platform fees. Default: {}, bronze: {}, silver: {}, gold: {}, platinum: {}",
        fees.default_rate, fees.bronze, fees.silver, fees.gold, fees.platinum
    );
    fees
}

//-------------------------------------------------  AuthConfig  -------------------------------------------------------
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// The shared secret used to sign and verify HS256 access tokens.
    pub jwt_secret: Secret<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        warn!(
            "🚨️🚨️🚨️ The JWT secret has not been set. I'm using a random value for this session. No token issued \
             elsewhere will be accepted. DO NOT operate on production like this. 🚨️🚨️🚨️"
        );
        let secret = thread_rng().sample_iter(&Alphanumeric).take(48).map(char::from).collect::<String>();
        Self { jwt_secret: Secret::new(secret) }
    }
}

impl AuthConfig {
    pub fn try_from_env() -> Result<Self, ServerError> {
        let secret =
            env::var("MEG_JWT_SECRET").map_err(|e| ServerError::ConfigurationError(format!("{e} [MEG_JWT_SECRET]")))?;
        if secret.trim().is_empty() {
            return Err(ServerError::ConfigurationError("MEG_JWT_SECRET is empty".to_string()));
        }
        if secret.len() < MIN_JWT_SECRET_LENGTH {
            warn!("🪛️ MEG_JWT_SECRET is shorter than {MIN_JWT_SECRET_LENGTH} characters. Consider a longer secret.");
        }
        Ok(Self { jwt_secret: Secret::new(secret) })
    }
}

//-------------------------------------------------  ServerOptions  ----------------------------------------------------
/// A subset of the server configuration that handlers need. Keep secrets out of here.
#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub default_currency: String,
    pub auto_release_hours: i64,
}

impl ServerOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self { default_currency: config.default_currency.clone(), auto_release_hours: config.auto_release_hours }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self { default_currency: DEFAULT_CURRENCY_CODE.to_string(), auto_release_hours: DEFAULT_AUTO_RELEASE_HOURS }
    }
}
