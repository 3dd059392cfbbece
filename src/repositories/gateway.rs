use anyhow::bail;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::models::payments::{PaymentInitialization, PaymentMethod, PaymentStatus};
use crate::models::{Cents, CENTS_PER_UNIT};

/// Port to the external payment processor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    /// Starts a payment of `amount` cents. M-Pesa payments come back needing
    /// authorization on the payer's phone.
    async fn initialize(
        &self,
        amount: Cents,
        method: PaymentMethod,
        phone: &str,
        email: &str,
    ) -> Result<PaymentInitialization, anyhow::Error>;

    async fn poll_status(&self, reference: &str) -> Result<PaymentStatus, anyhow::Error>;
}

#[derive(Deserialize)]
struct InitializeResponse {
    success: bool,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    requires_authorization: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    success: bool,
    #[serde(default)]
    paid: bool,
    #[serde(default)]
    can_retry: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Client for the M-Pesa STK push relay. Card and PayPal payments are
/// settled by the processor at checkout and need no authorization step.
pub struct HttpPaymentGateway {
    url: String,
    client: reqwest::Client,
}

impl HttpPaymentGateway {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn initialize(
        &self,
        amount: Cents,
        method: PaymentMethod,
        phone: &str,
        email: &str,
    ) -> Result<PaymentInitialization, anyhow::Error> {
        if method != PaymentMethod::Mpesa {
            let prefix = match method {
                PaymentMethod::Card => "CARD",
                _ => "PAYPAL",
            };

            return Ok(PaymentInitialization {
                reference: format!("{}_{}", prefix, Uuid::new_v4().simple()),
                requires_authorization: false,
            });
        }

        let payload = json!({
            "email": email,
            "amount": amount / CENTS_PER_UNIT,
            "phone": phone,
        });

        let response: InitializeResponse = self
            .client
            .post(format!("{}/api/initialize", self.url))
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;

        match (response.success, response.reference) {
            (true, Some(reference)) => Ok(PaymentInitialization {
                reference,
                requires_authorization: response.requires_authorization,
            }),
            _ => bail!(
                "Gateway: {}",
                response
                    .message
                    .unwrap_or_else(|| "Payment initialization failed".to_string())
            ),
        }
    }

    async fn poll_status(&self, reference: &str) -> Result<PaymentStatus, anyhow::Error> {
        let response: StatusResponse = self
            .client
            .get(format!("{}/api/status/{}", self.url, reference))
            .send()
            .await?
            .json()
            .await?;

        if !response.success {
            bail!(
                "Gateway: {}",
                response
                    .message
                    .unwrap_or_else(|| "Bad status response.".to_string())
            );
        }

        Ok(PaymentStatus {
            paid: response.paid,
            can_retry: response.can_retry,
        })
    }
}
