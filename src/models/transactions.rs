use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::payments::PaymentMethod;
use super::withdrawals::WithdrawalStatus;
use super::Cents;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    SurveyEarning,
    PackagePurchase,
    Bonus,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::SurveyEarning => "survey_earning",
            TransactionType::PackagePurchase => "package_purchase",
            TransactionType::Bonus => "bonus",
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "survey_earning" => Ok(TransactionType::SurveyEarning),
            "package_purchase" => Ok(TransactionType::PackagePurchase),
            "bonus" => Ok(TransactionType::Bonus),
            _ => Err(anyhow::anyhow!("Invalid transaction type: {}", s)),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
    Pending,
}

/// How an externally or internally funded package was paid for.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "source", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PackageFunding {
    Balance,
    External {
        method: PaymentMethod,
        reference: String,
    },
}

/// Per-kind audit details. The variant decides the transaction type.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TransactionMetadata {
    Deposit {
        method: PaymentMethod,
        reference: Option<String>,
    },
    Withdrawal {
        withdrawal_id: String,
        phone: String,
        service_fee: Cents,
        net_amount: Cents,
    },
    WithdrawalReversal {
        withdrawal_id: String,
        status: WithdrawalStatus,
    },
    SurveyEarning {
        survey_id: String,
        survey_title: String,
        category: String,
        duration: u32,
    },
    PackagePurchase {
        package_id: String,
        package_name: String,
        surveys: i64,
        duration: u32,
        amount_paid: Cents,
        funding: PackageFunding,
    },
    Bonus {
        bonus_id: String,
        bonus_name: String,
        bonus_type: String,
    },
}

impl TransactionMetadata {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            TransactionMetadata::Deposit { .. } => TransactionType::Deposit,
            TransactionMetadata::Withdrawal { .. }
            | TransactionMetadata::WithdrawalReversal { .. } => TransactionType::Withdrawal,
            TransactionMetadata::SurveyEarning { .. } => TransactionType::SurveyEarning,
            TransactionMetadata::PackagePurchase { .. } => TransactionType::PackagePurchase,
            TransactionMetadata::Bonus { .. } => TransactionType::Bonus,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: Cents,
    pub previous_balance: Cents,
    pub new_balance: Cents,
    pub status: TransactionStatus,
    pub metadata: TransactionMetadata,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TransactionFilter {
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    pub limit: Option<usize>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DepositReceipt {
    pub transaction: Transaction,
    pub new_balance: Cents,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_decides_the_transaction_type() {
        let reversal = TransactionMetadata::WithdrawalReversal {
            withdrawal_id: "w1".to_string(),
            status: WithdrawalStatus::Failed,
        };
        assert_eq!(reversal.transaction_type(), TransactionType::Withdrawal);

        let bonus = TransactionMetadata::Bonus {
            bonus_id: "welcome_bonus".to_string(),
            bonus_name: "Welcome".to_string(),
            bonus_type: "welcome".to_string(),
        };
        assert_eq!(bonus.transaction_type(), TransactionType::Bonus);
    }

    #[test]
    fn metadata_serializes_with_kind_tag() {
        let metadata = TransactionMetadata::Withdrawal {
            withdrawal_id: "w1".to_string(),
            phone: "254712345678".to_string(),
            service_fee: 1000,
            net_amount: 99000,
        };

        assert_eq!(
            serde_json::to_value(&metadata).unwrap(),
            json!({
                "kind": "withdrawal",
                "withdrawalId": "w1",
                "phone": "254712345678",
                "serviceFee": 1000,
                "netAmount": 99000
            })
        );
    }

    #[test]
    fn transaction_type_parses_query_values() {
        assert_eq!(
            "survey_earning".parse::<TransactionType>().unwrap(),
            TransactionType::SurveyEarning
        );
        assert!("refund".parse::<TransactionType>().is_err());
    }
}
