use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use super::store::{DocumentStore, Guard, Update};
use super::{from_document, timestamp, to_document, PAYMENTS};
use crate::models::payments::{Payment, PaymentState};

#[derive(Clone)]
pub struct PaymentRepository {
    store: Arc<dyn DocumentStore>,
}

impl PaymentRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        PaymentRepository { store }
    }

    /// Payments are keyed by the gateway reference.
    pub async fn insert_payment(&self, payment: &Payment) -> Result<bool, anyhow::Error> {
        self.store
            .create(PAYMENTS, &payment.reference, to_document(payment)?)
            .await
    }

    pub async fn get_payment(&self, reference: &str) -> Result<Option<Payment>, anyhow::Error> {
        self.store
            .get(PAYMENTS, reference)
            .await?
            .map(from_document)
            .transpose()
    }

    /// Sets the state if the payment is currently in one of `from`.
    pub async fn transition(
        &self,
        reference: &str,
        from: &[PaymentState],
        to: PaymentState,
    ) -> Result<Option<Payment>, anyhow::Error> {
        let allowed = from
            .iter()
            .map(|state| Value::from(state.as_str()))
            .collect();

        let update = Update::new()
            .set("status", to.as_str())
            .set("updatedAt", timestamp(Utc::now()))
            .guard(Guard::OneOf("status".to_string(), allowed));

        self.store
            .update(PAYMENTS, reference, update)
            .await?
            .map(from_document)
            .transpose()
    }
}
