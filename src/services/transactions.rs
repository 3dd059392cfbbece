use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::ledger::Ledger;
use super::{RequestHandler, Service, ServiceError};
use crate::models::payments::{normalize_phone, PaymentMethod};
use crate::models::transactions::{
    DepositReceipt, Transaction, TransactionMetadata, TransactionStatus, TransactionType,
};
use crate::models::withdrawals::{service_fee, Withdrawal, WithdrawalReceipt, WithdrawalStatus};
use crate::models::{Cents, CENTS_PER_UNIT};
use crate::repositories::store::{DocumentStore, Update};
use crate::repositories::transactions::TransactionRepository;
use crate::repositories::users::UserRepository;
use crate::repositories::withdrawals::WithdrawalRepository;
use crate::settings::Limits;

const DEFAULT_HISTORY_LIMIT: usize = 50;

pub enum TransactionRequest {
    CreateDeposit {
        user_id: String,
        amount: Cents,
        method: PaymentMethod,
        reference: Option<String>,
        response: oneshot::Sender<Result<DepositReceipt, ServiceError>>,
    },
    CreateWithdrawal {
        user_id: String,
        amount: Cents,
        phone: String,
        response: oneshot::Sender<Result<WithdrawalReceipt, ServiceError>>,
    },
    GetTransactions {
        user_id: String,
        transaction_type: Option<TransactionType>,
        limit: Option<usize>,
        response: oneshot::Sender<Result<Vec<Transaction>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct TransactionRequestHandler {
    users: UserRepository,
    transactions: TransactionRepository,
    withdrawals: WithdrawalRepository,
    ledger: Ledger,
    limits: Limits,
}

impl TransactionRequestHandler {
    pub fn new(store: Arc<dyn DocumentStore>, ledger: Ledger, limits: Limits) -> Self {
        TransactionRequestHandler {
            users: UserRepository::new(store.clone()),
            transactions: TransactionRepository::new(store.clone()),
            withdrawals: WithdrawalRepository::new(store),
            ledger,
            limits,
        }
    }

    async fn create_deposit(
        &self,
        user_id: &str,
        amount: Cents,
        method: PaymentMethod,
        reference: Option<String>,
    ) -> Result<DepositReceipt, ServiceError> {
        if amount <= 0 {
            return Err(ServiceError::Validation(
                "Deposit amount must be positive".to_string(),
            ));
        }

        let guard = self.ledger.lock(user_id).await;
        self.users
            .get_user_by_id(user_id)
            .await
            .map_err(|e| ServiceError::Repository("TransactionService".to_string(), e.to_string()))?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        let entry = self
            .ledger
            .apply_balance_delta(
                &guard,
                amount,
                TransactionMetadata::Deposit { method, reference },
                TransactionStatus::Completed,
                Update::new(),
            )
            .await?
            .ok_or_else(|| ServiceError::Internal("Deposit write was rejected".to_string()))?;

        log::info!(
            "Deposit of {} credited to {}, balance {}",
            amount,
            user_id,
            entry.new_balance
        );

        Ok(DepositReceipt {
            transaction: entry.transaction,
            new_balance: entry.new_balance,
        })
    }

    async fn create_withdrawal(
        &self,
        user_id: &str,
        amount: Cents,
        phone: &str,
    ) -> Result<WithdrawalReceipt, ServiceError> {
        if amount < self.limits.min_withdrawal_in_cents {
            return Err(ServiceError::Validation(format!(
                "Minimum withdrawal is KSh {}",
                self.limits.min_withdrawal_in_cents / CENTS_PER_UNIT
            )));
        }
        if amount > self.limits.max_withdrawal_in_cents {
            return Err(ServiceError::Validation(format!(
                "Maximum withdrawal is KSh {}",
                self.limits.max_withdrawal_in_cents / CENTS_PER_UNIT
            )));
        }
        let phone = normalize_phone(phone)
            .ok_or_else(|| ServiceError::Validation("Invalid phone number".to_string()))?;

        let fee = service_fee(amount, self.limits.withdrawal_fee_bps);
        let net_amount = amount - fee;
        let total_debit = amount + fee;

        let guard = self.ledger.lock(user_id).await;
        let user = self
            .users
            .get_user_by_id(user_id)
            .await
            .map_err(|e| ServiceError::Repository("TransactionService".to_string(), e.to_string()))?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;
        if !user.is_active {
            return Err(ServiceError::AccountDisabled);
        }
        if user.balance < total_debit {
            log::warn!(
                "Withdrawal of {} by {} refused, balance {} below {}",
                amount,
                user_id,
                user.balance,
                total_debit
            );
            return Err(ServiceError::InsufficientBalance);
        }

        let withdrawal_id = Uuid::new_v4().hyphenated().to_string();
        let metadata = TransactionMetadata::Withdrawal {
            withdrawal_id: withdrawal_id.clone(),
            phone: phone.clone(),
            service_fee: fee,
            net_amount,
        };

        let entry = self
            .ledger
            .apply_balance_delta(
                &guard,
                -total_debit,
                metadata,
                TransactionStatus::Pending,
                Update::new(),
            )
            .await?
            .ok_or(ServiceError::InsufficientBalance)?;

        let now = Utc::now();
        let withdrawal = Withdrawal {
            id: withdrawal_id,
            user_id: user_id.to_string(),
            amount,
            service_fee: fee,
            net_amount,
            phone,
            transaction_id: entry.transaction.id.clone(),
            status: WithdrawalStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        self.withdrawals
            .insert_withdrawal(&withdrawal)
            .await
            .map_err(|e| {
                log::error!(
                    "Debited {} from {} for withdrawal {} but could not record it: {}",
                    total_debit,
                    user_id,
                    withdrawal.id,
                    e
                );
                ServiceError::Repository("TransactionService".to_string(), e.to_string())
            })?;

        log::info!(
            "Withdrawal {} of {} (fee {}) requested by {}",
            withdrawal.id,
            amount,
            fee,
            user_id
        );

        Ok(WithdrawalReceipt {
            withdrawal,
            transaction: entry.transaction,
            new_balance: entry.new_balance,
        })
    }

    async fn get_transactions(
        &self,
        user_id: &str,
        transaction_type: Option<TransactionType>,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>, ServiceError> {
        self.transactions
            .get_user_transactions(
                user_id,
                transaction_type,
                limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
            )
            .await
            .map_err(|e| ServiceError::Repository("TransactionService".to_string(), e.to_string()))
    }
}

#[async_trait]
impl RequestHandler<TransactionRequest> for TransactionRequestHandler {
    async fn handle_request(&self, request: TransactionRequest) {
        match request {
            TransactionRequest::CreateDeposit {
                user_id,
                amount,
                method,
                reference,
                response,
            } => {
                let result = self
                    .create_deposit(&user_id, amount, method, reference)
                    .await;
                let _ = response.send(result);
            }
            TransactionRequest::CreateWithdrawal {
                user_id,
                amount,
                phone,
                response,
            } => {
                let result = self.create_withdrawal(&user_id, amount, &phone).await;
                let _ = response.send(result);
            }
            TransactionRequest::GetTransactions {
                user_id,
                transaction_type,
                limit,
                response,
            } => {
                let result = self
                    .get_transactions(&user_id, transaction_type, limit)
                    .await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct TransactionService;

impl TransactionService {
    pub fn new() -> Self {
        TransactionService {}
    }
}

#[async_trait]
impl Service<TransactionRequest, TransactionRequestHandler> for TransactionService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing;
    use rstest::rstest;

    fn handler(store: &Arc<dyn DocumentStore>) -> TransactionRequestHandler {
        TransactionRequestHandler::new(
            store.clone(),
            Ledger::new(store.clone()),
            Limits::default(),
        )
    }

    #[rstest]
    #[case(10_000)]
    #[case(100)]
    #[case(15_000_000)]
    #[tokio::test]
    async fn deposits_add_exactly_the_amount(#[case] amount: Cents) {
        let store = testing::store();
        testing::user_with_balance(&store, "u1", 2_500).await;

        let receipt = handler(&store)
            .create_deposit("u1", amount, PaymentMethod::Mpesa, Some("ref".to_string()))
            .await
            .unwrap();

        assert_eq!(receipt.new_balance, 2_500 + amount);
        assert_eq!(receipt.transaction.amount, amount);
        assert_eq!(receipt.transaction.previous_balance, 2_500);
        assert_eq!(testing::user(&store, "u1").await.balance, 2_500 + amount);
    }

    #[rstest]
    #[case(0)]
    #[case(-100)]
    #[tokio::test]
    async fn non_positive_deposits_are_rejected(#[case] amount: Cents) {
        let store = testing::store();
        testing::user_with_balance(&store, "u1", 0).await;

        let result = handler(&store)
            .create_deposit("u1", amount, PaymentMethod::Card, None)
            .await;

        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn deposit_for_unknown_user_is_not_found() {
        let store = testing::store();

        let result = handler(&store)
            .create_deposit("ghost", 100, PaymentMethod::Card, None)
            .await;

        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[rstest]
    #[case(100_000, 1_000, 99_000, 101_000)]
    #[case(10_000, 100, 9_900, 10_100)]
    #[tokio::test]
    async fn withdrawal_charges_the_service_fee(
        #[case] amount: Cents,
        #[case] fee: Cents,
        #[case] net: Cents,
        #[case] debit: Cents,
    ) {
        let store = testing::store();
        testing::user_with_balance(&store, "u1", 200_000).await;

        let receipt = handler(&store)
            .create_withdrawal("u1", amount, "0712345678")
            .await
            .unwrap();

        assert_eq!(receipt.withdrawal.service_fee, fee);
        assert_eq!(receipt.withdrawal.net_amount, net);
        assert_eq!(receipt.withdrawal.phone, "254712345678");
        assert_eq!(receipt.transaction.amount, -debit);
        assert_eq!(receipt.transaction.status, TransactionStatus::Pending);
        assert_eq!(receipt.new_balance, 200_000 - debit);
    }

    #[tokio::test]
    async fn withdrawal_needs_amount_plus_fee() {
        let store = testing::store();
        testing::user_with_balance(&store, "u1", 100_000).await;

        let result = handler(&store)
            .create_withdrawal("u1", 100_000, "0712345678")
            .await;

        assert!(matches!(result, Err(ServiceError::InsufficientBalance)));
        assert_eq!(testing::user(&store, "u1").await.balance, 100_000);
        assert!(WithdrawalRepository::new(store.clone())
            .list_withdrawals()
            .await
            .unwrap()
            .is_empty());
    }

    #[rstest]
    #[case(9_900, "0712345678")]
    #[case(7_000_100, "0712345678")]
    #[case(10_000, "12345")]
    #[tokio::test]
    async fn withdrawal_validates_limits_and_phone(#[case] amount: Cents, #[case] phone: &str) {
        let store = testing::store();
        testing::user_with_balance(&store, "u1", 10_000_000).await;

        let result = handler(&store).create_withdrawal("u1", amount, phone).await;

        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn concurrent_withdrawals_never_overdraw() {
        let store = testing::store();
        testing::user_with_balance(&store, "u1", 25_000).await;
        let handler = handler(&store);

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let handler = handler.clone();
                tokio::spawn(async move {
                    handler.create_withdrawal("u1", 10_000, "0712345678").await
                })
            })
            .collect();

        let mut succeeded = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 2);
        assert_eq!(testing::user(&store, "u1").await.balance, 25_000 - 2 * 10_100);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_filterable() {
        let store = testing::store();
        testing::user_with_balance(&store, "u1", 0).await;
        let handler = handler(&store);

        handler
            .create_deposit("u1", 50_000, PaymentMethod::Mpesa, None)
            .await
            .unwrap();
        handler
            .create_withdrawal("u1", 10_000, "0712345678")
            .await
            .unwrap();

        let all = handler.get_transactions("u1", None, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].transaction_type, TransactionType::Withdrawal);

        let deposits = handler
            .get_transactions("u1", Some(TransactionType::Deposit), None)
            .await
            .unwrap();
        assert_eq!(deposits.len(), 1);
        assert_eq!(deposits[0].amount, 50_000);

        let limited = handler.get_transactions("u1", None, Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
