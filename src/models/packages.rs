use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::transactions::PackageFunding;
use super::Cents;

/// Longest validity a package may be sold with.
pub const MAX_PACKAGE_DURATION_DAYS: u32 = 3_650;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub price: Cents,
    /// Survey credits granted on purchase.
    pub surveys: i64,
    /// Validity in days.
    pub duration: u32,
    pub is_active: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPackage {
    pub name: String,
    pub price: Cents,
    pub surveys: i64,
    pub duration: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserPackage {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    pub package_id: String,
    pub package_name: String,
    pub price: Cents,
    pub surveys: i64,
    pub duration: u32,
    pub funding: PackageFunding,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub purchased_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagePurchaseRequest {
    pub amount: Cents,
}

/// The catalog package joined with the user's live entitlement.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivePackage {
    #[serde(flatten)]
    pub package: Package,
    pub available_surveys: i64,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub package_expiry: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseReceipt {
    pub package: Package,
    pub user_package: UserPackage,
    pub new_balance: Cents,
}
