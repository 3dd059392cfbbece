use std::sync::Arc;

use super::store::{Direction, DocumentStore, Query};
use super::{from_documents, to_document, TRANSACTIONS};
use crate::models::transactions::{Transaction, TransactionType};

#[derive(Clone)]
pub struct TransactionRepository {
    store: Arc<dyn DocumentStore>,
}

impl TransactionRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        TransactionRepository { store }
    }

    /// Appends an immutable transaction record and returns it with its id.
    pub async fn new_transaction(
        &self,
        mut transaction: Transaction,
    ) -> Result<Transaction, anyhow::Error> {
        let id = self
            .store
            .add(TRANSACTIONS, to_document(&transaction)?)
            .await?;
        transaction.id = id;

        Ok(transaction)
    }

    pub async fn get_user_transactions(
        &self,
        user_id: &str,
        transaction_type: Option<TransactionType>,
        limit: usize,
    ) -> Result<Vec<Transaction>, anyhow::Error> {
        let mut query = Query::new().filter("userId", user_id);
        if let Some(transaction_type) = transaction_type {
            query = query.filter("type", transaction_type.as_str());
        }

        let documents = self
            .store
            .query(
                TRANSACTIONS,
                query
                    .order_by("createdAt", Direction::Descending)
                    .limit(limit),
            )
            .await?;

        from_documents(documents)
    }
}
