use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::repositories::gateway::PaymentGateway;
use crate::repositories::identity::IdentityProvider;
use crate::repositories::store::DocumentStore;
use crate::settings::Settings;

pub mod admin;
pub mod bonuses;
pub mod http;
pub mod ledger;
pub mod packages;
pub mod payments;
pub mod surveys;
pub mod transactions;
pub mod users;

const CHANNEL_CAPACITY: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Insufficient balance")]
    InsufficientBalance,
    #[error("Survey already completed")]
    AlreadyCompleted,
    #[error("Bonus already claimed")]
    AlreadyClaimed,
    #[error("No active package. Purchase a package to take surveys.")]
    NoActivePackage,
    #[error("Account is disabled")]
    AccountDisabled,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Authentication(String),
    #[error("Internal error: {0}")]
    Internal(String),
    /// The balance moved but its transaction record could not be written.
    #[error("Balance applied without a transaction record: {0}")]
    UnrecordedBalanceChange(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Repository error: {0} - {1}")]
    Repository(String, String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
    #[error("External service error: {0} -> {1} => {2}")]
    ExternalService(String, String, String),
}

impl ServiceError {
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            ServiceError::Internal(_)
                | ServiceError::UnrecordedBalanceChange(_)
                | ServiceError::Database(_)
                | ServiceError::Repository(..)
                | ServiceError::Communication(..)
                | ServiceError::ExternalService(..)
        )
    }

    /// Text safe to return to the account owner. Collaborator details stay in the logs.
    pub fn user_message(&self) -> String {
        if self.is_collaborator_failure() {
            "Operation failed, please try again.".to_string()
        } else {
            self.to_string()
        }
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Senders for every running service.
#[derive(Clone)]
pub struct ServiceChannels {
    pub admin: mpsc::Sender<admin::AdminRequest>,
    pub bonuses: mpsc::Sender<bonuses::BonusRequest>,
    pub packages: mpsc::Sender<packages::PackageRequest>,
    pub payments: mpsc::Sender<payments::PaymentRequest>,
    pub surveys: mpsc::Sender<surveys::SurveyRequest>,
    pub transactions: mpsc::Sender<transactions::TransactionRequest>,
    pub users: mpsc::Sender<users::UserRequest>,
}

pub fn start_services(
    store: Arc<dyn DocumentStore>,
    gateway: Arc<dyn PaymentGateway>,
    identity: Arc<dyn IdentityProvider>,
    settings: &Settings,
) -> ServiceChannels {
    let (admin_tx, mut admin_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (bonus_tx, mut bonus_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (package_tx, mut package_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (payment_tx, mut payment_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (survey_tx, mut survey_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (transaction_tx, mut transaction_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (user_tx, mut user_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let mut admin_service = admin::AdminService::new();
    let mut bonus_service = bonuses::BonusService::new();
    let mut package_service = packages::PackageService::new();
    let mut payment_service = payments::PaymentService::new();
    let mut survey_service = surveys::SurveyService::new();
    let mut transaction_service = transactions::TransactionService::new();
    let mut user_service = users::UserService::new();

    let ledger = ledger::Ledger::new(store.clone());

    log::info!("Starting transaction service.");
    let handler = transactions::TransactionRequestHandler::new(
        store.clone(),
        ledger.clone(),
        settings.limits.clone(),
    );
    tokio::spawn(async move {
        transaction_service.run(handler, &mut transaction_rx).await;
    });

    log::info!("Starting survey service.");
    let handler = surveys::SurveyRequestHandler::new(store.clone(), ledger.clone());
    tokio::spawn(async move {
        survey_service.run(handler, &mut survey_rx).await;
    });

    log::info!("Starting package service.");
    let handler = packages::PackageRequestHandler::new(store.clone(), ledger.clone());
    tokio::spawn(async move {
        package_service.run(handler, &mut package_rx).await;
    });

    log::info!("Starting bonus service.");
    let handler = bonuses::BonusRequestHandler::new(store.clone(), ledger.clone());
    tokio::spawn(async move {
        bonus_service.run(handler, &mut bonus_rx).await;
    });

    log::info!("Starting payment service.");
    let handler = payments::PaymentRequestHandler::new(
        store.clone(),
        gateway,
        transaction_tx.clone(),
        package_tx.clone(),
        settings.limits.clone(),
        payments::PollSchedule {
            interval: Duration::from_secs(settings.payment_gateway.poll_interval_secs),
            max_attempts: settings.payment_gateway.max_poll_attempts,
        },
    );
    tokio::spawn(async move {
        payment_service.run(handler, &mut payment_rx).await;
    });

    log::info!("Starting user service.");
    let handler = users::UserRequestHandler::new(
        store.clone(),
        identity.clone(),
        settings.bonuses.on_registration.clone(),
    );
    let sessions = identity.subscribe();
    let session_handler = handler.clone();
    tokio::spawn(async move {
        session_handler.watch_sessions(sessions).await;
    });
    tokio::spawn(async move {
        user_service.run(handler, &mut user_rx).await;
    });

    log::info!("Starting admin service.");
    let handler = admin::AdminRequestHandler::new(store, ledger);
    tokio::spawn(async move {
        admin_service.run(handler, &mut admin_rx).await;
    });

    ServiceChannels {
        admin: admin_tx,
        bonuses: bonus_tx,
        packages: package_tx,
        payments: payment_tx,
        surveys: survey_tx,
        transactions: transaction_tx,
        users: user_tx,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use serde_json::Value;

    use crate::models::packages::Package;
    use crate::models::surveys::Survey;
    use crate::models::users::{User, UserProfile};
    use crate::models::Cents;
    use crate::repositories::memory::MemoryStore;
    use crate::repositories::store::{DocumentStore, Query, Update};
    use crate::repositories::users::UserRepository;
    use crate::repositories::{PACKAGES, SURVEYS, TRANSACTIONS};

    pub fn store() -> Arc<dyn DocumentStore> {
        Arc::new(MemoryStore::new())
    }

    /// Memory store whose next `failures` transaction inserts fail.
    pub fn failing_transaction_store(failures: usize) -> Arc<dyn DocumentStore> {
        Arc::new(FailingTransactionStore {
            inner: MemoryStore::new(),
            failures: AtomicUsize::new(failures),
        })
    }

    struct FailingTransactionStore {
        inner: MemoryStore,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore for FailingTransactionStore {
        async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, anyhow::Error> {
            self.inner.get(collection, id).await
        }

        async fn set(
            &self,
            collection: &str,
            id: &str,
            document: Value,
        ) -> Result<(), anyhow::Error> {
            self.inner.set(collection, id, document).await
        }

        async fn create(
            &self,
            collection: &str,
            id: &str,
            document: Value,
        ) -> Result<bool, anyhow::Error> {
            if collection == TRANSACTIONS
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                anyhow::bail!("connection lost");
            }
            self.inner.create(collection, id, document).await
        }

        async fn update(
            &self,
            collection: &str,
            id: &str,
            update: Update,
        ) -> Result<Option<Value>, anyhow::Error> {
            self.inner.update(collection, id, update).await
        }

        async fn delete(&self, collection: &str, id: &str) -> Result<(), anyhow::Error> {
            self.inner.delete(collection, id).await
        }

        async fn query(&self, collection: &str, query: Query) -> Result<Vec<Value>, anyhow::Error> {
            self.inner.query(collection, query).await
        }
    }

    pub async fn user_with_balance(store: &Arc<dyn DocumentStore>, id: &str, balance: Cents) {
        let profile = UserProfile {
            phone: "0712345678".to_string(),
            full_name: "Jane Wanjiku".to_string(),
            email: "0712345678@surveyrewards.com".to_string(),
        };
        let mut user = User::new(id.to_string(), profile, Utc::now());
        user.balance = balance;

        UserRepository::new(store.clone())
            .insert_user(&user)
            .await
            .unwrap();
    }

    pub async fn grant_package(store: &Arc<dyn DocumentStore>, id: &str, surveys: i64, days: i64) {
        let expiry = Utc::now() + Duration::days(days);
        UserRepository::new(store.clone())
            .update_user(
                id,
                Update::new()
                    .set("currentPackageId", "basic")
                    .set("availableSurveys", surveys)
                    .set("packageExpiry", expiry.timestamp_millis()),
            )
            .await
            .unwrap();
    }

    pub async fn user(store: &Arc<dyn DocumentStore>, id: &str) -> User {
        UserRepository::new(store.clone())
            .get_user_by_id(id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn survey(store: &Arc<dyn DocumentStore>, id: &str, reward: Cents, is_active: bool) {
        let now = Utc::now();
        let survey = Survey {
            id: id.to_string(),
            title: format!("Survey {}", id),
            description: "Tell us about your shopping habits".to_string(),
            reward,
            category: "Consumer".to_string(),
            duration: 10,
            is_active,
            created_at: now,
            updated_at: now,
        };
        store
            .set(SURVEYS, id, serde_json::to_value(&survey).unwrap())
            .await
            .unwrap();
    }

    pub async fn package(
        store: &Arc<dyn DocumentStore>,
        id: &str,
        price: Cents,
        surveys: i64,
        duration: u32,
    ) {
        let now = Utc::now();
        let package = Package {
            id: id.to_string(),
            name: format!("{} package", id),
            price,
            surveys,
            duration,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        store
            .set(PACKAGES, id, serde_json::to_value(&package).unwrap())
            .await
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::payments::{
        NewPayment, PaymentInitialization, PaymentMethod, PaymentPurpose, PaymentState,
    };
    use crate::models::withdrawals::WithdrawalStatus;
    use crate::repositories::gateway::MockPaymentGateway;
    use crate::repositories::identity::MockIdentityProvider;
    use crate::repositories::withdrawals::WithdrawalRepository;
    use crate::settings::{Bonuses, Http, Identity, Limits, Store, StoreBackend};
    use tokio::sync::{oneshot, watch};

    fn settings() -> Settings {
        Settings {
            http: Http {
                listen: "127.0.0.1:0".to_string(),
            },
            store: Store {
                backend: StoreBackend::Memory,
            },
            postgres: None,
            identity: Identity {
                url: String::new(),
                api_key: String::new(),
                email_domain: "surveyrewards.com".to_string(),
            },
            payment_gateway: crate::settings::PaymentGateway {
                url: String::new(),
                poll_interval_secs: 6,
                max_poll_attempts: 30,
            },
            limits: Limits::default(),
            bonuses: Bonuses::default(),
        }
    }

    fn identity() -> MockIdentityProvider {
        let (_session, receiver) = watch::channel(None);

        let mut identity = MockIdentityProvider::new();
        identity.expect_subscribe().return_once(move || receiver);
        identity
    }

    #[tokio::test]
    async fn deposit_package_survey_withdrawal_flow() {
        let store = testing::store();
        testing::user_with_balance(&store, "u1", 0).await;
        testing::package(&store, "starter", 30_000, 10, 7).await;
        testing::survey(&store, "s1", 5_000, true).await;

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_initialize()
            .times(1)
            .returning(|_, _, _, _| {
                Ok(PaymentInitialization {
                    reference: "CARD_1".to_string(),
                    requires_authorization: false,
                })
            });

        let channels = start_services(
            store.clone(),
            Arc::new(gateway),
            Arc::new(identity()),
            &settings(),
        );

        let (tx, rx) = oneshot::channel();
        channels
            .payments
            .send(payments::PaymentRequest::InitiatePayment {
                user_id: "u1".to_string(),
                payment: NewPayment {
                    amount: Some(50_000),
                    method: PaymentMethod::Card,
                    purpose: PaymentPurpose::Deposit,
                },
                response: tx,
            })
            .await
            .unwrap();
        let receipt = rx.await.unwrap().unwrap();
        assert_eq!(receipt.payment.status, PaymentState::Paid);
        assert_eq!(receipt.new_balance, Some(50_000));

        let (tx, rx) = oneshot::channel();
        channels
            .packages
            .send(packages::PackageRequest::PurchasePackage {
                user_id: "u1".to_string(),
                package_id: "starter".to_string(),
                amount_paid: 30_000,
                funding: crate::models::transactions::PackageFunding::Balance,
                response: tx,
            })
            .await
            .unwrap();
        let purchase = rx.await.unwrap().unwrap();
        assert_eq!(purchase.new_balance, 20_000);

        let (tx, rx) = oneshot::channel();
        channels
            .surveys
            .send(surveys::SurveyRequest::CompleteSurvey {
                user_id: "u1".to_string(),
                survey_id: "s1".to_string(),
                response: tx,
            })
            .await
            .unwrap();
        let reward = rx.await.unwrap().unwrap();
        assert_eq!(reward.new_balance, 25_000);

        let (tx, rx) = oneshot::channel();
        channels
            .transactions
            .send(transactions::TransactionRequest::CreateWithdrawal {
                user_id: "u1".to_string(),
                amount: 10_000,
                phone: "0712345678".to_string(),
                response: tx,
            })
            .await
            .unwrap();
        let withdrawal = rx.await.unwrap().unwrap();

        assert_eq!(withdrawal.withdrawal.service_fee, 100);
        assert_eq!(withdrawal.withdrawal.net_amount, 9_900);
        assert_eq!(withdrawal.withdrawal.status, WithdrawalStatus::Pending);
        assert_eq!(withdrawal.new_balance, 14_900);

        let user = testing::user(&store, "u1").await;
        assert_eq!(user.balance, 14_900);
        assert_eq!(user.available_surveys, 9);
        assert_eq!(user.surveys_completed, 1);
        assert_eq!(user.total_earnings, 5_000);

        let stored = WithdrawalRepository::new(store.clone())
            .get_withdrawal(&withdrawal.withdrawal.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.transaction_id, withdrawal.transaction.id);

        let (tx, rx) = oneshot::channel();
        channels
            .transactions
            .send(transactions::TransactionRequest::GetTransactions {
                user_id: "u1".to_string(),
                transaction_type: None,
                limit: None,
                response: tx,
            })
            .await
            .unwrap();
        let history = rx.await.unwrap().unwrap();
        assert_eq!(history.len(), 4);
        for transaction in &history {
            assert_eq!(
                transaction.new_balance - transaction.previous_balance,
                transaction.amount
            );
        }
    }

    #[test]
    fn collaborator_failures_get_a_generic_message() {
        let error = ServiceError::Repository("Ledger".to_string(), "connection reset".to_string());
        assert_eq!(error.user_message(), "Operation failed, please try again.");
        assert_eq!(
            error.to_string(),
            "Repository error: Ledger - connection reset"
        );

        assert_eq!(
            ServiceError::AlreadyCompleted.user_message(),
            "Survey already completed"
        );
        assert_eq!(
            ServiceError::NotFound("User data".to_string()).user_message(),
            "User data not found"
        );
    }
}
