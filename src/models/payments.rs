use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Cents;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Mpesa,
    Card,
    Paypal,
}

/// What a confirmed payment is spent on.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PaymentPurpose {
    Deposit,
    Package { package_id: String },
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Paid,
    Failed,
    TimedOut,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "pending",
            PaymentState::Paid => "paid",
            PaymentState::Failed => "failed",
            PaymentState::TimedOut => "timed_out",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            PaymentState::Pending => "Waiting for payment authorization.",
            PaymentState::Paid => "Payment received.",
            PaymentState::Failed => "Payment not completed. You can try again.",
            PaymentState::TimedOut => {
                "Payment monitoring timed out. Please check your transaction history."
            }
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    #[serde(default)]
    pub id: String,
    pub reference: String,
    pub user_id: String,
    pub amount: Cents,
    pub method: PaymentMethod,
    pub purpose: PaymentPurpose,
    pub status: PaymentState,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPayment {
    pub amount: Option<Cents>,
    pub method: PaymentMethod,
    pub purpose: PaymentPurpose,
}

/// Gateway answer to a payment initialization.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PaymentInitialization {
    pub reference: String,
    pub requires_authorization: bool,
}

/// Gateway answer to a status poll.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PaymentStatus {
    pub paid: bool,
    pub can_retry: bool,
}

/// Terminal result of watching a payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid,
    CanRetry,
    TimedOut,
}

impl PaymentOutcome {
    pub fn state(&self) -> PaymentState {
        match self {
            PaymentOutcome::Paid => PaymentState::Paid,
            PaymentOutcome::CanRetry => PaymentState::Failed,
            PaymentOutcome::TimedOut => PaymentState::TimedOut,
        }
    }
}

/// Normalizes a Kenyan phone number to the `254XXXXXXXXX` form the gateway expects.
pub fn normalize_phone(phone: &str) -> Option<String> {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();

    let normalized = if let Some(rest) = digits.strip_prefix('0') {
        format!("254{}", rest)
    } else if digits.starts_with('7') || digits.starts_with('1') {
        format!("254{}", digits)
    } else if digits.starts_with("254") {
        digits
    } else {
        return None;
    };

    if normalized.len() == 12 {
        Some(normalized)
    } else {
        None
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub payment: Payment,
    pub message: &'static str,
    /// Balance after the payment was applied; absent while it is pending.
    pub new_balance: Option<Cents>,
}
