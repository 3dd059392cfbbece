use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use super::store::{Direction, DocumentStore, Guard, Query, Update};
use super::{from_document, from_documents, timestamp, to_document, WITHDRAWALS};
use crate::models::withdrawals::{Withdrawal, WithdrawalStatus};

#[derive(Clone)]
pub struct WithdrawalRepository {
    store: Arc<dyn DocumentStore>,
}

impl WithdrawalRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        WithdrawalRepository { store }
    }

    pub async fn insert_withdrawal(&self, withdrawal: &Withdrawal) -> Result<(), anyhow::Error> {
        if !self
            .store
            .create(WITHDRAWALS, &withdrawal.id, to_document(withdrawal)?)
            .await?
        {
            anyhow::bail!("Withdrawal {} already exists", withdrawal.id);
        }

        Ok(())
    }

    pub async fn get_withdrawal(
        &self,
        withdrawal_id: &str,
    ) -> Result<Option<Withdrawal>, anyhow::Error> {
        self.store
            .get(WITHDRAWALS, withdrawal_id)
            .await?
            .map(from_document)
            .transpose()
    }

    /// Moves the withdrawal to `status` only if it is still in one of the
    /// allowed predecessor statuses. `None` means another update won.
    pub async fn update_status(
        &self,
        withdrawal_id: &str,
        status: WithdrawalStatus,
    ) -> Result<Option<Withdrawal>, anyhow::Error> {
        let allowed = status
            .predecessors()
            .iter()
            .map(|status| Value::from(status.as_str()))
            .collect();

        let update = Update::new()
            .set("status", status.as_str())
            .set("updatedAt", timestamp(Utc::now()))
            .guard(Guard::OneOf("status".to_string(), allowed));

        self.store
            .update(WITHDRAWALS, withdrawal_id, update)
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn list_withdrawals(&self) -> Result<Vec<Withdrawal>, anyhow::Error> {
        let documents = self
            .store
            .query(
                WITHDRAWALS,
                Query::new().order_by("createdAt", Direction::Descending),
            )
            .await?;

        from_documents(documents)
    }
}
