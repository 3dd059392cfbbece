use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::models::Cents;

#[derive(Clone, Debug, Deserialize)]
pub struct Http {
    pub listen: String,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Store {
    pub backend: StoreBackend,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Identity {
    pub url: String,
    pub api_key: String,
    pub email_domain: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PaymentGateway {
    pub url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

/// Money limits in cents; the fee rate is in basis points.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Limits {
    pub min_deposit_in_cents: Cents,
    pub max_deposit_in_cents: Cents,
    pub min_withdrawal_in_cents: Cents,
    pub max_withdrawal_in_cents: Cents,
    pub withdrawal_fee_bps: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            min_deposit_in_cents: 10_000,
            max_deposit_in_cents: 15_000_000,
            min_withdrawal_in_cents: 10_000,
            max_withdrawal_in_cents: 7_000_000,
            withdrawal_fee_bps: 100,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Bonuses {
    /// Bonus ids made available to every new account.
    #[serde(default)]
    pub on_registration: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub http: Http,
    pub store: Store,
    pub postgres: Option<Postgres>,
    pub identity: Identity,
    pub payment_gateway: PaymentGateway,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub bonuses: Bonuses,
}

fn default_max_connections() -> u32 {
    5
}

fn default_poll_interval_secs() -> u64 {
    6
}

fn default_max_poll_attempts() -> u32 {
    30
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("SURVEY_REWARDS").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
