use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::ServiceError;
use crate::models::transactions::{
    Transaction, TransactionMetadata, TransactionStatus, TransactionType,
};
use crate::models::users::User;
use crate::models::Cents;
use crate::repositories::store::{DocumentStore, Guard, Update};
use crate::repositories::transactions::TransactionRepository;
use crate::repositories::users::UserRepository;

type LockRegistry = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Exclusive right to move one user's balance within this process.
pub struct UserGuard {
    user_id: String,
    lock: OwnedMutexGuard<()>,
    locks: LockRegistry,
}

impl UserGuard {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl Drop for UserGuard {
    /// Unregisters the user's mutex once nobody else holds or awaits it.
    /// Lookups clone under the same shard lock, so no waiter can appear mid-check.
    fn drop(&mut self) {
        let mutex = OwnedMutexGuard::mutex(&self.lock);
        self.locks.remove_if(self.user_id.as_str(), |_, registered| {
            Arc::ptr_eq(registered, mutex) && Arc::strong_count(registered) == 2
        });
    }
}

#[derive(Debug)]
pub struct LedgerEntry {
    pub new_balance: Cents,
    pub transaction: Transaction,
    pub user: User,
}

/// Applies balance changes together with their audit record.
#[derive(Clone)]
pub struct Ledger {
    users: UserRepository,
    transactions: TransactionRepository,
    locks: LockRegistry,
}

impl Ledger {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Ledger {
            users: UserRepository::new(store.clone()),
            transactions: TransactionRepository::new(store),
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Waits until no other flow holds this user, then holds it until the guard drops.
    pub async fn lock(&self, user_id: &str) -> UserGuard {
        let mutex = self
            .locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        UserGuard {
            user_id: user_id.to_string(),
            lock: mutex.lock_owned().await,
            locks: self.locks.clone(),
        }
    }

    /// Moves the balance by `delta` and records the transaction.
    ///
    /// `extra` carries flow-specific field changes and guards that must land in
    /// the same write. Returns `None` when a guard rejected the write; nothing
    /// was changed in that case.
    pub async fn apply_balance_delta(
        &self,
        guard: &UserGuard,
        delta: Cents,
        metadata: TransactionMetadata,
        status: TransactionStatus,
        extra: Update,
    ) -> Result<Option<LedgerEntry>, ServiceError> {
        let transaction_type = metadata.transaction_type();

        let mut update = Update::new().increment("balance", delta);
        if transaction_type == TransactionType::SurveyEarning {
            update = update
                .increment("totalEarnings", delta)
                .increment("surveysCompleted", 1);
        }
        if delta < 0 {
            update = update.guard(Guard::AtLeast("balance".to_string(), -delta));
        }

        let user = self
            .users
            .update_user(guard.user_id(), update.merge(extra))
            .await
            .map_err(|e| ServiceError::Repository("Ledger".to_string(), e.to_string()))?;
        let Some(user) = user else {
            return Ok(None);
        };

        let new_balance = user.balance;
        let transaction = Transaction {
            id: String::new(),
            user_id: user.id.clone(),
            transaction_type,
            amount: delta,
            previous_balance: new_balance - delta,
            new_balance,
            status,
            metadata,
            created_at: Utc::now(),
        };

        let transaction = self
            .transactions
            .new_transaction(transaction)
            .await
            .map_err(|e| {
                log::error!(
                    "Balance of {} moved by {} ({}) without a transaction record: {}",
                    user.id,
                    delta,
                    transaction_type.as_str(),
                    e
                );
                ServiceError::UnrecordedBalanceChange(e.to_string())
            })?;

        Ok(Some(LedgerEntry {
            new_balance,
            transaction,
            user,
        }))
    }
}
