use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use super::packages::PackageRequest;
use super::transactions::TransactionRequest;
use super::{RequestHandler, Service, ServiceError};
use crate::models::payments::{
    normalize_phone, NewPayment, Payment, PaymentOutcome, PaymentPurpose, PaymentReceipt,
    PaymentState,
};
use crate::models::transactions::PackageFunding;
use crate::models::{Cents, CENTS_PER_UNIT};
use crate::repositories::gateway::PaymentGateway;
use crate::repositories::packages::PackageRepository;
use crate::repositories::payments::PaymentRepository;
use crate::repositories::store::DocumentStore;
use crate::repositories::users::UserRepository;
use crate::settings::Limits;

pub enum PaymentRequest {
    InitiatePayment {
        user_id: String,
        payment: NewPayment,
        response: oneshot::Sender<Result<PaymentReceipt, ServiceError>>,
    },
    ConfirmPayment {
        reference: String,
        response: oneshot::Sender<Result<PaymentReceipt, ServiceError>>,
    },
    GetPayment {
        reference: String,
        response: oneshot::Sender<Result<Payment, ServiceError>>,
    },
}

#[derive(Clone, Copy, Debug)]
pub struct PollSchedule {
    pub interval: Duration,
    pub max_attempts: u32,
}

/// Polls the gateway until the payment settles or the attempts run out.
/// The first check happens one interval after the call. Failed checks are
/// logged and count as an attempt.
pub async fn await_payment(
    gateway: &dyn PaymentGateway,
    reference: &str,
    schedule: PollSchedule,
) -> PaymentOutcome {
    for attempt in 1..=schedule.max_attempts {
        tokio::time::sleep(schedule.interval).await;

        match gateway.poll_status(reference).await {
            Ok(status) if status.paid => return PaymentOutcome::Paid,
            Ok(status) if status.can_retry => return PaymentOutcome::CanRetry,
            Ok(_) => log::debug!("Payment {} still pending after check {}", reference, attempt),
            Err(e) => log::warn!("Status check {} for payment {} failed: {}", attempt, reference, e),
        }
    }

    PaymentOutcome::TimedOut
}

#[derive(Clone)]
pub struct PaymentRequestHandler {
    users: UserRepository,
    packages: PackageRepository,
    payments: PaymentRepository,
    gateway: Arc<dyn PaymentGateway>,
    transaction_channel: mpsc::Sender<TransactionRequest>,
    package_channel: mpsc::Sender<PackageRequest>,
    limits: Limits,
    schedule: PollSchedule,
}

fn repository_error(e: anyhow::Error) -> ServiceError {
    ServiceError::Repository("PaymentService".to_string(), e.to_string())
}

fn channel_error(service: &str, e: impl ToString) -> ServiceError {
    ServiceError::ExternalService(
        "PaymentService".to_string(),
        service.to_string(),
        e.to_string(),
    )
}

impl PaymentRequestHandler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        gateway: Arc<dyn PaymentGateway>,
        transaction_channel: mpsc::Sender<TransactionRequest>,
        package_channel: mpsc::Sender<PackageRequest>,
        limits: Limits,
        schedule: PollSchedule,
    ) -> Self {
        PaymentRequestHandler {
            users: UserRepository::new(store.clone()),
            packages: PackageRepository::new(store.clone()),
            payments: PaymentRepository::new(store),
            gateway,
            transaction_channel,
            package_channel,
            limits,
            schedule,
        }
    }

    async fn payment_amount(&self, payment: &NewPayment) -> Result<Cents, ServiceError> {
        match &payment.purpose {
            PaymentPurpose::Deposit => {
                let amount = payment
                    .amount
                    .ok_or_else(|| ServiceError::Validation("Amount is required".to_string()))?;
                if amount < self.limits.min_deposit_in_cents {
                    return Err(ServiceError::Validation(format!(
                        "Minimum deposit is KSh {}",
                        self.limits.min_deposit_in_cents / CENTS_PER_UNIT
                    )));
                }
                if amount > self.limits.max_deposit_in_cents {
                    return Err(ServiceError::Validation(format!(
                        "Maximum deposit is KSh {}",
                        self.limits.max_deposit_in_cents / CENTS_PER_UNIT
                    )));
                }

                Ok(amount)
            }
            PaymentPurpose::Package { package_id } => self
                .packages
                .get_package(package_id)
                .await
                .map_err(repository_error)?
                .filter(|package| package.is_active)
                .map(|package| package.price)
                .ok_or_else(|| ServiceError::NotFound("Package".to_string())),
        }
    }

    async fn initiate_payment(
        &self,
        user_id: &str,
        request: NewPayment,
    ) -> Result<PaymentReceipt, ServiceError> {
        let user = self
            .users
            .get_user_by_id(user_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;
        let amount = self.payment_amount(&request).await?;
        let phone = normalize_phone(&user.phone)
            .ok_or_else(|| ServiceError::Validation("Invalid phone number".to_string()))?;

        let initialization = self
            .gateway
            .initialize(amount, request.method, &phone, &user.email)
            .await
            .map_err(|e| {
                log::error!("Payment initialization for {} failed: {}", user_id, e);
                channel_error("PaymentGateway", e)
            })?;

        let now = Utc::now();
        let payment = Payment {
            id: initialization.reference.clone(),
            reference: initialization.reference.clone(),
            user_id: user_id.to_string(),
            amount,
            method: request.method,
            purpose: request.purpose,
            status: PaymentState::Pending,
            created_at: now,
            updated_at: now,
        };
        if !self
            .payments
            .insert_payment(&payment)
            .await
            .map_err(repository_error)?
        {
            return Err(ServiceError::Conflict(
                "Duplicate payment reference".to_string(),
            ));
        }

        log::info!(
            "Payment {} of {} initiated by {}",
            payment.reference,
            amount,
            user_id
        );

        if !initialization.requires_authorization {
            return self.settle_payment(&payment.reference).await;
        }

        let handler = self.clone();
        let reference = payment.reference.clone();
        tokio::spawn(async move {
            handler.watch_payment(&reference).await;
        });

        Ok(PaymentReceipt {
            payment,
            message: PaymentState::Pending.message(),
            new_balance: None,
        })
    }

    async fn watch_payment(&self, reference: &str) {
        let outcome = await_payment(self.gateway.as_ref(), reference, self.schedule).await;

        if outcome == PaymentOutcome::Paid {
            if let Err(e) = self.settle_payment(reference).await {
                log::error!("Paid payment {} could not be confirmed: {}", reference, e);
            }
            return;
        }

        log::warn!("Payment {} ended as {}", reference, outcome.state().as_str());
        if let Err(e) = self
            .payments
            .transition(reference, &[PaymentState::Pending], outcome.state())
            .await
        {
            log::error!("Could not record outcome of payment {}: {}", reference, e);
        }
    }

    /// Settles an open payment only once the gateway reports it paid.
    async fn confirm_payment(&self, reference: &str) -> Result<PaymentReceipt, ServiceError> {
        let payment = self.get_payment(reference).await?;
        if !matches!(
            payment.status,
            PaymentState::Pending | PaymentState::TimedOut
        ) {
            return Err(ServiceError::Conflict(
                "Payment already processed".to_string(),
            ));
        }

        let status = self.gateway.poll_status(reference).await.map_err(|e| {
            log::warn!("Status check for payment {} failed: {}", reference, e);
            channel_error("PaymentGateway", e)
        })?;
        if !status.paid {
            log::warn!("Confirmation of unpaid payment {} refused", reference);
            return Err(ServiceError::Conflict(
                "Payment has not been completed".to_string(),
            ));
        }

        self.settle_payment(reference).await
    }

    /// Marks the payment paid and applies it. A reference is applied at most once.
    async fn settle_payment(&self, reference: &str) -> Result<PaymentReceipt, ServiceError> {
        let payment = self
            .payments
            .transition(
                reference,
                &[PaymentState::Pending, PaymentState::TimedOut],
                PaymentState::Paid,
            )
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ServiceError::Conflict("Payment already processed".to_string()))?;

        let new_balance = self.apply_payment(&payment).await.map_err(|e| {
            log::error!(
                "Payment {} marked paid but not applied for {}: {}",
                payment.reference,
                payment.user_id,
                e
            );
            e
        })?;

        Ok(PaymentReceipt {
            payment,
            message: PaymentState::Paid.message(),
            new_balance: Some(new_balance),
        })
    }

    async fn apply_payment(&self, payment: &Payment) -> Result<Cents, ServiceError> {
        match &payment.purpose {
            PaymentPurpose::Deposit => {
                let (deposit_tx, deposit_rx) = oneshot::channel();
                self.transaction_channel
                    .send(TransactionRequest::CreateDeposit {
                        user_id: payment.user_id.clone(),
                        amount: payment.amount,
                        method: payment.method,
                        reference: Some(payment.reference.clone()),
                        response: deposit_tx,
                    })
                    .await
                    .map_err(|e| {
                        ServiceError::Communication("PaymentService".to_string(), e.to_string())
                    })?;

                let receipt = deposit_rx
                    .await
                    .map_err(|e| channel_error("TransactionService", e))??;
                Ok(receipt.new_balance)
            }
            PaymentPurpose::Package { package_id } => {
                let (purchase_tx, purchase_rx) = oneshot::channel();
                self.package_channel
                    .send(PackageRequest::PurchasePackage {
                        user_id: payment.user_id.clone(),
                        package_id: package_id.clone(),
                        amount_paid: payment.amount,
                        funding: PackageFunding::External {
                            method: payment.method,
                            reference: payment.reference.clone(),
                        },
                        response: purchase_tx,
                    })
                    .await
                    .map_err(|e| {
                        ServiceError::Communication("PaymentService".to_string(), e.to_string())
                    })?;

                let receipt = purchase_rx
                    .await
                    .map_err(|e| channel_error("PackageService", e))??;
                Ok(receipt.new_balance)
            }
        }
    }

    async fn get_payment(&self, reference: &str) -> Result<Payment, ServiceError> {
        self.payments
            .get_payment(reference)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ServiceError::NotFound("Payment".to_string()))
    }
}

#[async_trait]
impl RequestHandler<PaymentRequest> for PaymentRequestHandler {
    async fn handle_request(&self, request: PaymentRequest) {
        match request {
            PaymentRequest::InitiatePayment {
                user_id,
                payment,
                response,
            } => {
                let result = self.initiate_payment(&user_id, payment).await;
                let _ = response.send(result);
            }
            PaymentRequest::ConfirmPayment {
                reference,
                response,
            } => {
                let result = self.confirm_payment(&reference).await;
                let _ = response.send(result);
            }
            PaymentRequest::GetPayment {
                reference,
                response,
            } => {
                let result = self.get_payment(&reference).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct PaymentService;

impl PaymentService {
    pub fn new() -> Self {
        PaymentService {}
    }
}

#[async_trait]
impl Service<PaymentRequest, PaymentRequestHandler> for PaymentService {}
