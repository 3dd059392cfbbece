use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::oneshot;

use super::ledger::Ledger;
use super::{RequestHandler, Service, ServiceError};
use crate::models::bonuses::{Bonus, NewBonus};
use crate::models::packages::{NewPackage, Package, MAX_PACKAGE_DURATION_DAYS};
use crate::models::surveys::{NewSurvey, Survey};
use crate::models::transactions::{TransactionMetadata, TransactionStatus};
use crate::models::users::User;
use crate::models::withdrawals::{Withdrawal, WithdrawalStatus};
use crate::repositories::bonuses::BonusRepository;
use crate::repositories::packages::PackageRepository;
use crate::repositories::store::{DocumentStore, Update};
use crate::repositories::surveys::SurveyRepository;
use crate::repositories::users::UserRepository;
use crate::repositories::withdrawals::WithdrawalRepository;

pub enum AdminRequest {
    UpdateWithdrawalStatus {
        withdrawal_id: String,
        status: WithdrawalStatus,
        response: oneshot::Sender<Result<Withdrawal, ServiceError>>,
    },
    UpdateUserStatus {
        user_id: String,
        is_active: bool,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    AddSurvey {
        survey: NewSurvey,
        response: oneshot::Sender<Result<Survey, ServiceError>>,
    },
    AddPackage {
        package: NewPackage,
        response: oneshot::Sender<Result<Package, ServiceError>>,
    },
    AddBonus {
        bonus: NewBonus,
        response: oneshot::Sender<Result<Bonus, ServiceError>>,
    },
    ListUsers {
        response: oneshot::Sender<Result<Vec<User>, ServiceError>>,
    },
    ListWithdrawals {
        response: oneshot::Sender<Result<Vec<Withdrawal>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct AdminRequestHandler {
    users: UserRepository,
    withdrawals: WithdrawalRepository,
    surveys: SurveyRepository,
    packages: PackageRepository,
    bonuses: BonusRepository,
    ledger: Ledger,
}

fn repository_error(e: anyhow::Error) -> ServiceError {
    ServiceError::Repository("AdminService".to_string(), e.to_string())
}

fn require(condition: bool, message: &str) -> Result<(), ServiceError> {
    if condition {
        Ok(())
    } else {
        Err(ServiceError::Validation(message.to_string()))
    }
}

impl AdminRequestHandler {
    pub fn new(store: Arc<dyn DocumentStore>, ledger: Ledger) -> Self {
        AdminRequestHandler {
            users: UserRepository::new(store.clone()),
            withdrawals: WithdrawalRepository::new(store.clone()),
            surveys: SurveyRepository::new(store.clone()),
            packages: PackageRepository::new(store.clone()),
            bonuses: BonusRepository::new(store),
            ledger,
        }
    }

    /// Moves a withdrawal along its lifecycle. Failing or cancelling it hands
    /// the amount and the fee back to the user.
    async fn update_withdrawal_status(
        &self,
        withdrawal_id: &str,
        status: WithdrawalStatus,
    ) -> Result<Withdrawal, ServiceError> {
        let current = self
            .withdrawals
            .get_withdrawal(withdrawal_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ServiceError::NotFound("Withdrawal".to_string()))?;
        if !current.status.can_transition_to(status) {
            return Err(ServiceError::Conflict(format!(
                "Cannot move withdrawal from {} to {}",
                current.status.as_str(),
                status.as_str()
            )));
        }

        let withdrawal = self
            .withdrawals
            .update_status(withdrawal_id, status)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| {
                ServiceError::Conflict("Withdrawal status changed concurrently".to_string())
            })?;

        if status.refunds_user() {
            let guard = self.ledger.lock(&withdrawal.user_id).await;
            let metadata = TransactionMetadata::WithdrawalReversal {
                withdrawal_id: withdrawal.id.clone(),
                status,
            };

            let refund = self
                .ledger
                .apply_balance_delta(
                    &guard,
                    withdrawal.total_debit(),
                    metadata,
                    TransactionStatus::Completed,
                    Update::new(),
                )
                .await;
            match refund {
                Ok(Some(entry)) => log::info!(
                    "Withdrawal {} {}, refunded {} to {}, balance {}",
                    withdrawal.id,
                    status.as_str(),
                    withdrawal.total_debit(),
                    withdrawal.user_id,
                    entry.new_balance
                ),
                Ok(None) => {
                    log::error!("Refund of withdrawal {} was rejected", withdrawal.id);
                    return Err(ServiceError::Internal("Refund was rejected".to_string()));
                }
                Err(e) => {
                    log::error!(
                        "Withdrawal {} is {} but {} was not refunded: {}",
                        withdrawal.id,
                        status.as_str(),
                        withdrawal.total_debit(),
                        e
                    );
                    return Err(e);
                }
            }
        } else {
            log::info!("Withdrawal {} is now {}", withdrawal.id, status.as_str());
        }

        Ok(withdrawal)
    }

    async fn update_user_status(&self, user_id: &str, is_active: bool) -> Result<User, ServiceError> {
        self.users
            .get_user_by_id(user_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        let user = self
            .users
            .update_user(user_id, Update::new().set("isActive", is_active))
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ServiceError::Internal("Status update was rejected".to_string()))?;

        log::info!("Account {} active: {}", user_id, is_active);
        Ok(user)
    }

    async fn add_survey(&self, survey: NewSurvey) -> Result<Survey, ServiceError> {
        require(!survey.title.trim().is_empty(), "Title is required")?;
        require(survey.reward > 0, "Reward must be positive")?;
        require(survey.duration > 0, "Duration must be positive")?;

        let now = Utc::now();
        self.surveys
            .new_survey(Survey {
                id: String::new(),
                title: survey.title,
                description: survey.description,
                reward: survey.reward,
                category: survey.category,
                duration: survey.duration,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .map_err(repository_error)
    }

    async fn add_package(&self, package: NewPackage) -> Result<Package, ServiceError> {
        require(!package.name.trim().is_empty(), "Name is required")?;
        require(package.price > 0, "Price must be positive")?;
        require(package.surveys > 0, "Survey count must be positive")?;
        require(package.duration > 0, "Duration must be positive")?;
        require(
            package.duration <= MAX_PACKAGE_DURATION_DAYS,
            "Duration cannot exceed ten years",
        )?;

        let now = Utc::now();
        self.packages
            .new_package(Package {
                id: String::new(),
                name: package.name,
                price: package.price,
                surveys: package.surveys,
                duration: package.duration,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .map_err(repository_error)
    }

    async fn add_bonus(&self, bonus: NewBonus) -> Result<Bonus, ServiceError> {
        require(!bonus.id.trim().is_empty(), "Bonus id is required")?;
        require(bonus.amount >= 0, "Amount cannot be negative")?;

        let now = Utc::now();
        let bonus = Bonus {
            id: bonus.id,
            name: bonus.name,
            amount: bonus.amount,
            bonus_type: bonus.bonus_type,
            created_at: now,
            updated_at: now,
        };
        self.bonuses
            .put_bonus(&bonus)
            .await
            .map_err(repository_error)?;

        Ok(bonus)
    }

    async fn list_users(&self) -> Result<Vec<User>, ServiceError> {
        self.users.list_users().await.map_err(repository_error)
    }

    async fn list_withdrawals(&self) -> Result<Vec<Withdrawal>, ServiceError> {
        self.withdrawals
            .list_withdrawals()
            .await
            .map_err(repository_error)
    }
}

#[async_trait]
impl RequestHandler<AdminRequest> for AdminRequestHandler {
    async fn handle_request(&self, request: AdminRequest) {
        match request {
            AdminRequest::UpdateWithdrawalStatus {
                withdrawal_id,
                status,
                response,
            } => {
                let result = self.update_withdrawal_status(&withdrawal_id, status).await;
                let _ = response.send(result);
            }
            AdminRequest::UpdateUserStatus {
                user_id,
                is_active,
                response,
            } => {
                let result = self.update_user_status(&user_id, is_active).await;
                let _ = response.send(result);
            }
            AdminRequest::AddSurvey { survey, response } => {
                let _ = response.send(self.add_survey(survey).await);
            }
            AdminRequest::AddPackage { package, response } => {
                let _ = response.send(self.add_package(package).await);
            }
            AdminRequest::AddBonus { bonus, response } => {
                let _ = response.send(self.add_bonus(bonus).await);
            }
            AdminRequest::ListUsers { response } => {
                let _ = response.send(self.list_users().await);
            }
            AdminRequest::ListWithdrawals { response } => {
                let _ = response.send(self.list_withdrawals().await);
            }
        }
    }
}

pub struct AdminService;

impl AdminService {
    pub fn new() -> Self {
        AdminService {}
    }
}

#[async_trait]
impl Service<AdminRequest, AdminRequestHandler> for AdminService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bonuses::BonusType;
    use crate::models::transactions::TransactionType;
    use crate::repositories::transactions::TransactionRepository;
    use crate::services::testing;
    use crate::services::transactions::TransactionRequestHandler;
    use crate::settings::Limits;
    use rstest::rstest;

    async fn setup() -> (Arc<dyn DocumentStore>, AdminRequestHandler, Withdrawal) {
        let store = testing::store();
        testing::user_with_balance(&store, "u1", 50_000).await;
        let ledger = Ledger::new(store.clone());

        let transactions =
            TransactionRequestHandler::new(store.clone(), ledger.clone(), Limits::default());
        let (tx, rx) = oneshot::channel();
        transactions
            .handle_request(crate::services::transactions::TransactionRequest::CreateWithdrawal {
                user_id: "u1".to_string(),
                amount: 10_000,
                phone: "0712345678".to_string(),
                response: tx,
            })
            .await;
        let withdrawal = rx.await.unwrap().unwrap().withdrawal;

        (store.clone(), AdminRequestHandler::new(store, ledger), withdrawal)
    }

    #[rstest]
    #[case(WithdrawalStatus::Failed)]
    #[case(WithdrawalStatus::Cancelled)]
    #[tokio::test]
    async fn failed_withdrawal_refunds_once(#[case] status: WithdrawalStatus) {
        let (store, admin, withdrawal) = setup().await;
        assert_eq!(testing::user(&store, "u1").await.balance, 39_900);

        let updated = admin
            .update_withdrawal_status(&withdrawal.id, status)
            .await
            .unwrap();
        assert_eq!(updated.status, status);
        assert_eq!(testing::user(&store, "u1").await.balance, 50_000);

        let again = admin.update_withdrawal_status(&withdrawal.id, status).await;
        assert!(matches!(again, Err(ServiceError::Conflict(_))));
        assert_eq!(testing::user(&store, "u1").await.balance, 50_000);

        let history = TransactionRepository::new(store.clone())
            .get_user_transactions("u1", Some(TransactionType::Withdrawal), 50)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].amount, 10_100);
    }

    #[tokio::test]
    async fn completed_withdrawal_keeps_the_debit() {
        let (store, admin, withdrawal) = setup().await;

        admin
            .update_withdrawal_status(&withdrawal.id, WithdrawalStatus::Processing)
            .await
            .unwrap();
        admin
            .update_withdrawal_status(&withdrawal.id, WithdrawalStatus::Completed)
            .await
            .unwrap();

        assert_eq!(testing::user(&store, "u1").await.balance, 39_900);
        assert!(matches!(
            admin
                .update_withdrawal_status(&withdrawal.id, WithdrawalStatus::Failed)
                .await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_failures_refund_once() {
        let (store, admin, withdrawal) = setup().await;

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let admin = admin.clone();
                let id = withdrawal.id.clone();
                tokio::spawn(async move {
                    admin
                        .update_withdrawal_status(&id, WithdrawalStatus::Failed)
                        .await
                })
            })
            .collect();
        for task in tasks {
            let _ = task.await.unwrap();
        }

        assert_eq!(testing::user(&store, "u1").await.balance, 50_000);
    }

    #[tokio::test]
    async fn disabling_a_user_blocks_withdrawals() {
        let (store, admin, _) = setup().await;

        let user = admin.update_user_status("u1", false).await.unwrap();
        assert!(!user.is_active);

        let handler =
            TransactionRequestHandler::new(store.clone(), Ledger::new(store.clone()), Limits::default());
        let (tx, rx) = oneshot::channel();
        handler
            .handle_request(crate::services::transactions::TransactionRequest::CreateWithdrawal {
                user_id: "u1".to_string(),
                amount: 10_000,
                phone: "0712345678".to_string(),
                response: tx,
            })
            .await;
        assert!(matches!(rx.await.unwrap(), Err(ServiceError::AccountDisabled)));
    }

    #[rstest]
    #[case(0)]
    #[case(MAX_PACKAGE_DURATION_DAYS + 1)]
    #[case(u32::MAX)]
    #[tokio::test]
    async fn package_duration_must_be_in_range(#[case] duration: u32) {
        let (_store, admin, _) = setup().await;

        let result = admin
            .add_package(NewPackage {
                name: "Forever".to_string(),
                price: 30_000,
                surveys: 10,
                duration,
            })
            .await;

        assert!(matches!(result, Err(ServiceError::Validation(_))));
        assert!(admin.packages.list_packages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn catalog_entries_are_validated_and_stored() {
        let (_store, admin, _) = setup().await;

        let survey = admin
            .add_survey(NewSurvey {
                title: "Mobile money habits".to_string(),
                description: "Ten questions".to_string(),
                reward: 5_000,
                category: "Finance".to_string(),
                duration: 10,
            })
            .await
            .unwrap();
        assert!(!survey.id.is_empty());
        assert!(survey.is_active);

        assert!(matches!(
            admin
                .add_package(NewPackage {
                    name: "Free".to_string(),
                    price: 0,
                    surveys: 5,
                    duration: 7,
                })
                .await,
            Err(ServiceError::Validation(_))
        ));

        admin
            .add_bonus(NewBonus {
                id: "welcome_bonus".to_string(),
                name: "Welcome Bonus".to_string(),
                amount: 5_000,
                bonus_type: BonusType::Welcome,
            })
            .await
            .unwrap();
        let stored = admin.bonuses.get_bonus("welcome_bonus").await.unwrap().unwrap();
        assert_eq!(stored.amount, 5_000);
        assert_eq!(stored.bonus_type, BonusType::Welcome);

        assert_eq!(admin.list_users().await.unwrap().len(), 1);
        assert_eq!(admin.list_withdrawals().await.unwrap().len(), 1);
    }
}
