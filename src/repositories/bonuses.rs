use std::sync::Arc;

use chrono::Utc;

use super::store::{DocumentStore, Guard, Update};
use super::{from_document, timestamp, to_document, BONUSES, USER_BONUSES};
use crate::models::bonuses::{Bonus, UserBonuses};
use crate::models::Cents;

#[derive(Clone)]
pub struct BonusRepository {
    store: Arc<dyn DocumentStore>,
}

impl BonusRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        BonusRepository { store }
    }

    pub async fn get_bonus(&self, bonus_id: &str) -> Result<Option<Bonus>, anyhow::Error> {
        self.store
            .get(BONUSES, bonus_id)
            .await?
            .map(from_document)
            .transpose()
    }

    /// Bonuses are addressed by stable ids, so adding one overwrites any previous definition.
    pub async fn put_bonus(&self, bonus: &Bonus) -> Result<(), anyhow::Error> {
        self.store.set(BONUSES, &bonus.id, to_document(bonus)?).await
    }

    pub async fn insert_user_bonuses(&self, bonuses: &UserBonuses) -> Result<bool, anyhow::Error> {
        self.store
            .create(USER_BONUSES, &bonuses.user_id, to_document(bonuses)?)
            .await
    }

    pub async fn get_user_bonuses(
        &self,
        user_id: &str,
    ) -> Result<Option<UserBonuses>, anyhow::Error> {
        self.store
            .get(USER_BONUSES, user_id)
            .await?
            .map(from_document)
            .transpose()
    }

    /// Moves the bonus from available to claimed in one guarded write.
    /// Returns `None` if the bonus had already been claimed.
    pub async fn claim(
        &self,
        user_id: &str,
        bonus_id: &str,
        amount: Cents,
    ) -> Result<Option<UserBonuses>, anyhow::Error> {
        let update = Update::new()
            .array_union("claimedBonuses", bonus_id)
            .array_remove("availableBonuses", bonus_id)
            .increment("totalBonusEarned", amount)
            .set("updatedAt", timestamp(Utc::now()))
            .guard(Guard::NotContains(
                "claimedBonuses".to_string(),
                bonus_id.into(),
            ));

        self.store
            .update(USER_BONUSES, user_id, update)
            .await?
            .map(from_document)
            .transpose()
    }
}
