use std::sync::Arc;

use chrono::Utc;

use super::store::{Direction, DocumentStore, Query, Update};
use super::{from_document, from_documents, timestamp, to_document, USERS};
use crate::models::users;

#[derive(Clone)]
pub struct UserRepository {
    store: Arc<dyn DocumentStore>,
}

impl UserRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Returns false when an account already exists for this id.
    pub async fn insert_user(&self, user: &users::User) -> Result<bool, anyhow::Error> {
        self.store.create(USERS, &user.id, to_document(user)?).await
    }

    pub async fn get_user_by_id(&self, user_id: &str) -> Result<Option<users::User>, anyhow::Error> {
        self.store
            .get(USERS, user_id)
            .await?
            .map(from_document)
            .transpose()
    }

    /// Applies an atomic update and stamps `updatedAt`. `None` means a guard rejected it.
    pub async fn update_user(
        &self,
        user_id: &str,
        update: Update,
    ) -> Result<Option<users::User>, anyhow::Error> {
        let update = update.set("updatedAt", timestamp(Utc::now()));

        self.store
            .update(USERS, user_id, update)
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn touch_last_login(&self, user_id: &str) -> Result<(), anyhow::Error> {
        self.store
            .update(
                USERS,
                user_id,
                Update::new().set("lastLogin", timestamp(Utc::now())),
            )
            .await?;

        Ok(())
    }

    pub async fn list_users(&self) -> Result<Vec<users::User>, anyhow::Error> {
        let documents = self
            .store
            .query(USERS, Query::new().order_by("createdAt", Direction::Descending))
            .await?;

        from_documents(documents)
    }
}
