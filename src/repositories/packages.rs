use std::sync::Arc;

use super::store::{Direction, DocumentStore, Query};
use super::{from_document, from_documents, to_document, PACKAGES, USER_PACKAGES};
use crate::models::packages::{Package, UserPackage};

#[derive(Clone)]
pub struct PackageRepository {
    store: Arc<dyn DocumentStore>,
}

impl PackageRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        PackageRepository { store }
    }

    pub async fn get_package(&self, package_id: &str) -> Result<Option<Package>, anyhow::Error> {
        self.store
            .get(PACKAGES, package_id)
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn new_package(&self, mut package: Package) -> Result<Package, anyhow::Error> {
        package.id = self.store.add(PACKAGES, to_document(&package)?).await?;
        Ok(package)
    }

    pub async fn list_packages(&self) -> Result<Vec<Package>, anyhow::Error> {
        let documents = self
            .store
            .query(
                PACKAGES,
                Query::new().order_by("price", Direction::Ascending),
            )
            .await?;

        from_documents(documents)
    }

    pub async fn new_user_package(
        &self,
        mut user_package: UserPackage,
    ) -> Result<UserPackage, anyhow::Error> {
        user_package.id = self
            .store
            .add(USER_PACKAGES, to_document(&user_package)?)
            .await?;

        Ok(user_package)
    }

    pub async fn get_user_packages(&self, user_id: &str) -> Result<Vec<UserPackage>, anyhow::Error> {
        let documents = self
            .store
            .query(
                USER_PACKAGES,
                Query::new()
                    .filter("userId", user_id)
                    .order_by("purchasedAt", Direction::Descending),
            )
            .await?;

        from_documents(documents)
    }
}
