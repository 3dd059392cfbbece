use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub mod bonuses;
pub mod gateway;
pub mod identity;
pub mod memory;
pub mod packages;
pub mod payments;
pub mod postgres;
pub mod store;
pub mod surveys;
pub mod transactions;
pub mod users;
pub mod withdrawals;

pub const USERS: &str = "users";
pub const TRANSACTIONS: &str = "transactions";
pub const SURVEYS: &str = "surveys";
pub const SURVEY_COMPLETIONS: &str = "surveyCompletions";
pub const PACKAGES: &str = "packages";
pub const USER_PACKAGES: &str = "userPackages";
pub const BONUSES: &str = "bonuses";
pub const USER_BONUSES: &str = "userBonuses";
pub const WITHDRAWALS: &str = "withdrawals";
pub const PAYMENTS: &str = "payments";

fn from_document<T: DeserializeOwned>(document: Value) -> Result<T, anyhow::Error> {
    Ok(serde_json::from_value(document)?)
}

fn from_documents<T: DeserializeOwned>(documents: Vec<Value>) -> Result<Vec<T>, anyhow::Error> {
    documents.into_iter().map(from_document).collect()
}

fn to_document<T: Serialize>(model: &T) -> Result<Value, anyhow::Error> {
    Ok(serde_json::to_value(model)?)
}

/// Timestamps are stored as epoch milliseconds so they order numerically.
pub fn timestamp(at: DateTime<Utc>) -> Value {
    Value::from(at.timestamp_millis())
}
