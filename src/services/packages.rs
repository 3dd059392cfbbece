use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::oneshot;

use super::ledger::Ledger;
use super::{RequestHandler, Service, ServiceError};
use crate::models::packages::{ActivePackage, Package, PurchaseReceipt, UserPackage};
use crate::models::transactions::{PackageFunding, TransactionMetadata, TransactionStatus};
use crate::models::Cents;
use crate::repositories::packages::PackageRepository;
use crate::repositories::store::{DocumentStore, Update};
use crate::repositories::timestamp;
use crate::repositories::users::UserRepository;

pub enum PackageRequest {
    PurchasePackage {
        user_id: String,
        package_id: String,
        amount_paid: Cents,
        funding: PackageFunding,
        response: oneshot::Sender<Result<PurchaseReceipt, ServiceError>>,
    },
    ListPackages {
        response: oneshot::Sender<Result<Vec<Package>, ServiceError>>,
    },
    GetActivePackage {
        user_id: String,
        response: oneshot::Sender<Result<Option<ActivePackage>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct PackageRequestHandler {
    packages: PackageRepository,
    users: UserRepository,
    ledger: Ledger,
}

fn repository_error(e: anyhow::Error) -> ServiceError {
    ServiceError::Repository("PackageService".to_string(), e.to_string())
}

impl PackageRequestHandler {
    pub fn new(store: Arc<dyn DocumentStore>, ledger: Ledger) -> Self {
        PackageRequestHandler {
            packages: PackageRepository::new(store.clone()),
            users: UserRepository::new(store),
            ledger,
        }
    }

    async fn purchase_package(
        &self,
        user_id: &str,
        package_id: &str,
        amount_paid: Cents,
        funding: PackageFunding,
    ) -> Result<PurchaseReceipt, ServiceError> {
        let package = self
            .packages
            .get_package(package_id)
            .await
            .map_err(repository_error)?
            .filter(|package| package.is_active)
            .ok_or_else(|| ServiceError::NotFound("Package".to_string()))?;
        if amount_paid < package.price {
            return Err(ServiceError::Validation(format!(
                "Amount paid does not cover the package price of {}",
                package.price
            )));
        }

        let guard = self.ledger.lock(user_id).await;
        let user = self
            .users
            .get_user_by_id(user_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;
        // An external payment has already been taken, so it is honoured even
        // if the account was disabled in the meantime.
        if !user.is_active && funding == PackageFunding::Balance {
            return Err(ServiceError::AccountDisabled);
        }

        let now = Utc::now();
        let expires_at = Duration::try_days(i64::from(package.duration))
            .and_then(|validity| now.checked_add_signed(validity))
            .ok_or_else(|| {
                ServiceError::Validation(format!(
                    "Package {} has an invalid duration of {} days",
                    package.id, package.duration
                ))
            })?;
        let entitlement = Update::new()
            .set("currentPackageId", package.id.as_str())
            .increment("availableSurveys", package.surveys)
            .set("packageExpiry", timestamp(expires_at));

        let delta = match funding {
            PackageFunding::Balance => -amount_paid,
            PackageFunding::External { .. } => 0,
        };
        let metadata = TransactionMetadata::PackagePurchase {
            package_id: package.id.clone(),
            package_name: package.name.clone(),
            surveys: package.surveys,
            duration: package.duration,
            amount_paid,
            funding: funding.clone(),
        };

        let entry = self
            .ledger
            .apply_balance_delta(
                &guard,
                delta,
                metadata,
                TransactionStatus::Completed,
                entitlement,
            )
            .await?
            .ok_or(ServiceError::InsufficientBalance)?;

        let user_package = UserPackage {
            id: String::new(),
            user_id: user_id.to_string(),
            package_id: package.id.clone(),
            package_name: package.name.clone(),
            price: package.price,
            surveys: package.surveys,
            duration: package.duration,
            funding,
            purchased_at: now,
            expires_at,
            is_active: true,
        };
        let user_package = self
            .packages
            .new_user_package(user_package)
            .await
            .map_err(|e| {
                log::error!(
                    "Package {} granted to {} without a purchase record: {}",
                    package.id,
                    user_id,
                    e
                );
                repository_error(e)
            })?;

        log::info!(
            "{} bought package {} for {}, {} credits until {}",
            user_id,
            package.id,
            amount_paid,
            entry.user.available_surveys,
            expires_at
        );

        Ok(PurchaseReceipt {
            package,
            user_package,
            new_balance: entry.new_balance,
        })
    }

    async fn list_packages(&self) -> Result<Vec<Package>, ServiceError> {
        self.packages.list_packages().await.map_err(repository_error)
    }

    async fn get_active_package(&self, user_id: &str) -> Result<Option<ActivePackage>, ServiceError> {
        let user = self
            .users
            .get_user_by_id(user_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        let Some(package_id) = user.current_package_id.as_deref() else {
            return Ok(None);
        };
        let package = self
            .packages
            .get_package(package_id)
            .await
            .map_err(repository_error)?;

        Ok(package.map(|package| ActivePackage {
            package,
            available_surveys: user.available_surveys,
            package_expiry: user.package_expiry,
        }))
    }
}

#[async_trait]
impl RequestHandler<PackageRequest> for PackageRequestHandler {
    async fn handle_request(&self, request: PackageRequest) {
        match request {
            PackageRequest::PurchasePackage {
                user_id,
                package_id,
                amount_paid,
                funding,
                response,
            } => {
                let result = self
                    .purchase_package(&user_id, &package_id, amount_paid, funding)
                    .await;
                let _ = response.send(result);
            }
            PackageRequest::ListPackages { response } => {
                let _ = response.send(self.list_packages().await);
            }
            PackageRequest::GetActivePackage { user_id, response } => {
                let result = self.get_active_package(&user_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct PackageService;

impl PackageService {
    pub fn new() -> Self {
        PackageService {}
    }
}

#[async_trait]
impl Service<PackageRequest, PackageRequestHandler> for PackageService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::payments::PaymentMethod;
    use crate::models::transactions::TransactionType;
    use crate::repositories::transactions::TransactionRepository;
    use crate::services::testing;

    fn handler(store: &Arc<dyn DocumentStore>) -> PackageRequestHandler {
        PackageRequestHandler::new(store.clone(), Ledger::new(store.clone()))
    }

    #[tokio::test]
    async fn balance_purchase_grants_the_entitlement() {
        let store = testing::store();
        testing::user_with_balance(&store, "u1", 100_000).await;
        testing::package(&store, "gold", 80_000, 35, 30).await;

        let before = Utc::now();
        let receipt = handler(&store)
            .purchase_package("u1", "gold", 80_000, PackageFunding::Balance)
            .await
            .unwrap();

        assert_eq!(receipt.new_balance, 20_000);
        assert_eq!(receipt.user_package.surveys, 35);
        assert!(!receipt.user_package.id.is_empty());

        let user = testing::user(&store, "u1").await;
        assert_eq!(user.current_package_id.as_deref(), Some("gold"));
        assert_eq!(user.available_surveys, 35);
        let expiry = user.package_expiry.unwrap();
        assert!(expiry >= before + Duration::days(30) - Duration::seconds(1));
        assert!(expiry <= Utc::now() + Duration::days(30));
    }

    #[tokio::test]
    async fn repurchase_stacks_credits_and_resets_expiry() {
        let store = testing::store();
        testing::user_with_balance(&store, "u1", 100_000).await;
        testing::package(&store, "basic", 30_000, 10, 7).await;
        let handler = handler(&store);

        handler
            .purchase_package("u1", "basic", 30_000, PackageFunding::Balance)
            .await
            .unwrap();
        handler
            .purchase_package("u1", "basic", 30_000, PackageFunding::Balance)
            .await
            .unwrap();

        let user = testing::user(&store, "u1").await;
        assert_eq!(user.available_surveys, 20);
        assert!(user.package_expiry.unwrap() <= Utc::now() + Duration::days(7));
    }

    #[tokio::test]
    async fn insufficient_balance_changes_nothing() {
        let store = testing::store();
        testing::user_with_balance(&store, "u1", 10_000).await;
        testing::package(&store, "basic", 30_000, 10, 7).await;

        let result = handler(&store)
            .purchase_package("u1", "basic", 30_000, PackageFunding::Balance)
            .await;

        assert!(matches!(result, Err(ServiceError::InsufficientBalance)));
        let user = testing::user(&store, "u1").await;
        assert_eq!(user.balance, 10_000);
        assert_eq!(user.available_surveys, 0);
        assert!(user.current_package_id.is_none());
    }

    #[tokio::test]
    async fn unrepresentable_duration_is_rejected_without_mutation() {
        let store = testing::store();
        testing::user_with_balance(&store, "u1", 50_000).await;
        testing::package(&store, "forever", 30_000, 10, u32::MAX).await;

        let result = handler(&store)
            .purchase_package("u1", "forever", 30_000, PackageFunding::Balance)
            .await;

        assert!(matches!(result, Err(ServiceError::Validation(_))));
        let user = testing::user(&store, "u1").await;
        assert_eq!(user.balance, 50_000);
        assert!(user.current_package_id.is_none());
    }

    #[tokio::test]
    async fn external_purchase_records_a_zero_amount_entry() {
        let store = testing::store();
        testing::user_with_balance(&store, "u1", 5_000).await;
        testing::package(&store, "basic", 30_000, 10, 7).await;
        let funding = PackageFunding::External {
            method: PaymentMethod::Mpesa,
            reference: "ref-1".to_string(),
        };

        let receipt = handler(&store)
            .purchase_package("u1", "basic", 30_000, funding)
            .await
            .unwrap();
        assert_eq!(receipt.new_balance, 5_000);

        let history = TransactionRepository::new(store.clone())
            .get_user_transactions("u1", Some(TransactionType::PackagePurchase), 50)
            .await
            .unwrap();
        assert_eq!(history[0].amount, 0);
        assert!(matches!(
            history[0].metadata,
            TransactionMetadata::PackagePurchase { amount_paid: 30_000, .. }
        ));
    }

    #[tokio::test]
    async fn underpayment_and_unknown_packages_are_rejected() {
        let store = testing::store();
        testing::user_with_balance(&store, "u1", 100_000).await;
        testing::package(&store, "basic", 30_000, 10, 7).await;
        let handler = handler(&store);

        assert!(matches!(
            handler
                .purchase_package("u1", "basic", 29_900, PackageFunding::Balance)
                .await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            handler
                .purchase_package("u1", "platinum", 30_000, PackageFunding::Balance)
                .await,
            Err(ServiceError::NotFound(_))
        ));
        assert_eq!(testing::user(&store, "u1").await.balance, 100_000);
    }

    #[tokio::test]
    async fn active_package_joins_catalog_and_entitlement() {
        let store = testing::store();
        testing::user_with_balance(&store, "u1", 100_000).await;
        testing::package(&store, "basic", 30_000, 10, 7).await;
        testing::package(&store, "gold", 80_000, 35, 30).await;
        let handler = handler(&store);

        assert!(handler.get_active_package("u1").await.unwrap().is_none());

        handler
            .purchase_package("u1", "basic", 30_000, PackageFunding::Balance)
            .await
            .unwrap();
        let active = handler.get_active_package("u1").await.unwrap().unwrap();
        assert_eq!(active.package.id, "basic");
        assert_eq!(active.available_surveys, 10);

        let catalog = handler.list_packages().await.unwrap();
        let ids: Vec<_> = catalog.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["basic", "gold"]);
    }
}
