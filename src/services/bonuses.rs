use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::ledger::Ledger;
use super::{RequestHandler, Service, ServiceError};
use crate::models::bonuses::{BonusClaim, UserBonuses};
use crate::models::transactions::{TransactionMetadata, TransactionStatus};
use crate::repositories::bonuses::BonusRepository;
use crate::repositories::store::{DocumentStore, Update};
use crate::repositories::users::UserRepository;

pub enum BonusRequest {
    ClaimBonus {
        user_id: String,
        bonus_id: String,
        response: oneshot::Sender<Result<BonusClaim, ServiceError>>,
    },
    GetUserBonuses {
        user_id: String,
        response: oneshot::Sender<Result<UserBonuses, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct BonusRequestHandler {
    bonuses: BonusRepository,
    users: UserRepository,
    ledger: Ledger,
}

fn repository_error(e: anyhow::Error) -> ServiceError {
    ServiceError::Repository("BonusService".to_string(), e.to_string())
}

impl BonusRequestHandler {
    pub fn new(store: Arc<dyn DocumentStore>, ledger: Ledger) -> Self {
        BonusRequestHandler {
            bonuses: BonusRepository::new(store.clone()),
            users: UserRepository::new(store),
            ledger,
        }
    }

    async fn claim_bonus(&self, user_id: &str, bonus_id: &str) -> Result<BonusClaim, ServiceError> {
        let bonus = self
            .bonuses
            .get_bonus(bonus_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ServiceError::NotFound("Bonus".to_string()))?;

        let guard = self.ledger.lock(user_id).await;
        let user = self
            .users
            .get_user_by_id(user_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;
        if !user.is_active {
            return Err(ServiceError::AccountDisabled);
        }

        let record = self
            .bonuses
            .get_user_bonuses(user_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ServiceError::NotFound("User bonuses".to_string()))?;
        if record.has_claimed(bonus_id) {
            return Err(ServiceError::AlreadyClaimed);
        }

        if self
            .bonuses
            .claim(user_id, bonus_id, bonus.amount)
            .await
            .map_err(repository_error)?
            .is_none()
        {
            return Err(ServiceError::AlreadyClaimed);
        }

        let mut new_balance = None;
        if bonus.amount > 0 {
            let metadata = TransactionMetadata::Bonus {
                bonus_id: bonus.id.clone(),
                bonus_name: bonus.name.clone(),
                bonus_type: bonus.bonus_type.as_str().to_string(),
            };

            let entry = self
                .ledger
                .apply_balance_delta(
                    &guard,
                    bonus.amount,
                    metadata,
                    TransactionStatus::Completed,
                    Update::new(),
                )
                .await
                .map_err(|e| {
                    log::error!(
                        "Bonus {} marked claimed by {} but not credited: {}",
                        bonus_id,
                        user_id,
                        e
                    );
                    e
                })?
                .ok_or_else(|| ServiceError::Internal("Bonus credit was rejected".to_string()))?;
            new_balance = Some(entry.new_balance);
        }

        log::info!("{} claimed bonus {} worth {}", user_id, bonus_id, bonus.amount);

        Ok(BonusClaim {
            amount: bonus.amount,
            bonus,
            new_balance,
        })
    }

    async fn get_user_bonuses(&self, user_id: &str) -> Result<UserBonuses, ServiceError> {
        self.bonuses
            .get_user_bonuses(user_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ServiceError::NotFound("User bonuses".to_string()))
    }
}

#[async_trait]
impl RequestHandler<BonusRequest> for BonusRequestHandler {
    async fn handle_request(&self, request: BonusRequest) {
        match request {
            BonusRequest::ClaimBonus {
                user_id,
                bonus_id,
                response,
            } => {
                let result = self.claim_bonus(&user_id, &bonus_id).await;
                let _ = response.send(result);
            }
            BonusRequest::GetUserBonuses { user_id, response } => {
                let result = self.get_user_bonuses(&user_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct BonusService;

impl BonusService {
    pub fn new() -> Self {
        BonusService {}
    }
}

#[async_trait]
impl Service<BonusRequest, BonusRequestHandler> for BonusService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bonuses::{Bonus, BonusType};
    use crate::models::Cents;
    use crate::services::testing;
    use chrono::Utc;

    async fn setup(amount: Cents) -> (Arc<dyn DocumentStore>, BonusRequestHandler) {
        let store = testing::store();
        testing::user_with_balance(&store, "u1", 1_000).await;
        let handler = BonusRequestHandler::new(store.clone(), Ledger::new(store.clone()));

        let now = Utc::now();
        handler
            .bonuses
            .put_bonus(&Bonus {
                id: "welcome_bonus".to_string(),
                name: "Welcome Bonus".to_string(),
                amount,
                bonus_type: BonusType::Welcome,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        handler
            .bonuses
            .insert_user_bonuses(&UserBonuses {
                user_id: "u1".to_string(),
                available_bonuses: vec!["welcome_bonus".to_string()],
                claimed_bonuses: vec![],
                total_bonus_earned: 0,
                referral_code: "ABCD1234".to_string(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        (store, handler)
    }

    #[tokio::test]
    async fn bonus_is_claimed_once() {
        let (store, handler) = setup(5_000).await;

        let claim = handler.claim_bonus("u1", "welcome_bonus").await.unwrap();
        assert_eq!(claim.amount, 5_000);
        assert_eq!(claim.new_balance, Some(6_000));

        let again = handler.claim_bonus("u1", "welcome_bonus").await;
        assert!(matches!(again, Err(ServiceError::AlreadyClaimed)));

        let record = handler.get_user_bonuses("u1").await.unwrap();
        assert_eq!(record.claimed_bonuses, vec!["welcome_bonus".to_string()]);
        assert!(record.available_bonuses.is_empty());
        assert_eq!(record.total_bonus_earned, 5_000);
        assert_eq!(testing::user(&store, "u1").await.balance, 6_000);
    }

    #[tokio::test]
    async fn concurrent_claims_credit_once() {
        let (store, handler) = setup(5_000).await;

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let handler = handler.clone();
                tokio::spawn(async move { handler.claim_bonus("u1", "welcome_bonus").await })
            })
            .collect();
        let mut credited = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                credited += 1;
            }
        }

        assert_eq!(credited, 1);
        assert_eq!(testing::user(&store, "u1").await.balance, 6_000);
    }

    #[tokio::test]
    async fn zero_amount_bonus_skips_the_ledger() {
        let (store, handler) = setup(0).await;

        let claim = handler.claim_bonus("u1", "welcome_bonus").await.unwrap();

        assert_eq!(claim.new_balance, None);
        assert_eq!(testing::user(&store, "u1").await.balance, 1_000);
    }

    #[tokio::test]
    async fn unknown_bonus_is_not_found() {
        let (_store, handler) = setup(5_000).await;

        assert!(matches!(
            handler.claim_bonus("u1", "jackpot").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
