use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::transactions::Transaction;
use super::{Cents, CENTS_PER_UNIT};

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl WithdrawalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Completed | WithdrawalStatus::Failed | WithdrawalStatus::Cancelled
        )
    }

    /// Statuses a withdrawal may be in right before moving to `self`.
    pub fn predecessors(&self) -> &'static [WithdrawalStatus] {
        match self {
            WithdrawalStatus::Pending => &[],
            WithdrawalStatus::Processing => &[WithdrawalStatus::Pending],
            WithdrawalStatus::Completed
            | WithdrawalStatus::Failed
            | WithdrawalStatus::Cancelled => {
                &[WithdrawalStatus::Pending, WithdrawalStatus::Processing]
            }
        }
    }

    pub fn can_transition_to(&self, next: WithdrawalStatus) -> bool {
        next.predecessors().contains(self)
    }

    /// Whether reaching this status hands the debited funds back to the user.
    pub fn refunds_user(&self) -> bool {
        matches!(self, WithdrawalStatus::Failed | WithdrawalStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Failed => "failed",
            WithdrawalStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub id: String,
    pub user_id: String,
    pub amount: Cents,
    pub service_fee: Cents,
    pub net_amount: Cents,
    pub phone: String,
    pub transaction_id: String,
    pub status: WithdrawalStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Withdrawal {
    /// Everything that left the balance when the withdrawal was requested.
    pub fn total_debit(&self) -> Cents {
        self.amount + self.service_fee
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWithdrawal {
    pub amount: Cents,
    pub phone: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WithdrawalStatusUpdate {
    pub status: WithdrawalStatus,
}

/// Fee charged on top of a withdrawal, rounded half-up to a whole currency unit.
pub fn service_fee(amount_in_cents: Cents, fee_bps: i64) -> Cents {
    let scale = 10_000 * CENTS_PER_UNIT;
    let units = (amount_in_cents * fee_bps + scale / 2) / scale;

    units * CENTS_PER_UNIT
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalReceipt {
    pub withdrawal: Withdrawal,
    pub transaction: Transaction,
    pub new_balance: Cents,
}
