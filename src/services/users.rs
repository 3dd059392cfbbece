use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{oneshot, watch};

use super::{RequestHandler, Service, ServiceError};
use crate::models::bonuses::{generate_referral_code, UserBonuses};
use crate::models::payments::normalize_phone;
use crate::models::users::{Credential, NewUser, ProfileUpdate, User};
use crate::repositories::bonuses::BonusRepository;
use crate::repositories::identity::{IdentityError, IdentityProvider};
use crate::repositories::store::{DocumentStore, Update};
use crate::repositories::users::UserRepository;

const MIN_PASSWORD_LENGTH: usize = 6;

pub enum UserRequest {
    Register {
        user: NewUser,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    SignIn {
        credential: Credential,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    SignOut,
    GetUser {
        id: String,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    UpdateProfile {
        id: String,
        update: ProfileUpdate,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct UserRequestHandler {
    users: UserRepository,
    bonuses: BonusRepository,
    identity: Arc<dyn IdentityProvider>,
    registration_bonuses: Vec<String>,
}

fn repository_error(e: anyhow::Error) -> ServiceError {
    ServiceError::Repository("UserService".to_string(), e.to_string())
}

fn identity_error(e: IdentityError) -> ServiceError {
    match e {
        IdentityError::Rejected(message) => ServiceError::Authentication(message),
        IdentityError::Unavailable(e) => ServiceError::ExternalService(
            "UserService".to_string(),
            "IdentityProvider".to_string(),
            e.to_string(),
        ),
    }
}

fn validate_phone(phone: &str) -> Result<(), ServiceError> {
    normalize_phone(phone)
        .map(|_| ())
        .ok_or_else(|| ServiceError::Validation("Invalid phone number format".to_string()))
}

impl UserRequestHandler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        registration_bonuses: Vec<String>,
    ) -> Self {
        UserRequestHandler {
            users: UserRepository::new(store.clone()),
            bonuses: BonusRepository::new(store),
            identity,
            registration_bonuses,
        }
    }

    async fn register(&self, new_user: NewUser) -> Result<User, ServiceError> {
        let full_name = new_user.full_name.trim().to_string();
        if full_name.is_empty() {
            return Err(ServiceError::Validation("Full name is required".to_string()));
        }
        validate_phone(&new_user.phone)?;
        if new_user.password.len() < MIN_PASSWORD_LENGTH {
            return Err(ServiceError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }

        let credential = Credential {
            phone: new_user.phone,
            password: new_user.password,
        };
        let identity = self
            .identity
            .register(credential, full_name)
            .await
            .map_err(identity_error)?;

        let now = Utc::now();
        let user = User::new(identity.user_id, identity.profile, now);
        if !self.users.insert_user(&user).await.map_err(repository_error)? {
            return Err(ServiceError::Conflict(
                "Phone number already registered".to_string(),
            ));
        }

        let bonuses = UserBonuses {
            user_id: user.id.clone(),
            available_bonuses: self.registration_bonuses.clone(),
            claimed_bonuses: vec![],
            total_bonus_earned: 0,
            referral_code: generate_referral_code(),
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.bonuses.insert_user_bonuses(&bonuses).await {
            log::error!("Account {} created without a bonus record: {}", user.id, e);
            return Err(repository_error(e));
        }

        log::info!("Registered account {}", user.id);
        Ok(user)
    }

    async fn sign_in(&self, credential: Credential) -> Result<User, ServiceError> {
        let identity = self
            .identity
            .authenticate(credential)
            .await
            .map_err(identity_error)?;

        let user = self
            .users
            .get_user_by_id(&identity.user_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ServiceError::NotFound("User data".to_string()))?;
        if !user.is_active {
            log::warn!("Disabled account {} tried to sign in", user.id);
            return Err(ServiceError::AccountDisabled);
        }

        self.users
            .touch_last_login(&user.id)
            .await
            .map_err(repository_error)?;

        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<User, ServiceError> {
        self.users
            .get_user_by_id(id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))
    }

    async fn update_profile(&self, id: &str, update: ProfileUpdate) -> Result<User, ServiceError> {
        let mut changes = Update::new();
        if let Some(full_name) = update.full_name {
            let full_name = full_name.trim().to_string();
            if full_name.is_empty() {
                return Err(ServiceError::Validation("Full name is required".to_string()));
            }
            changes = changes.set("fullName", full_name);
        }
        if let Some(phone) = update.phone {
            validate_phone(&phone)?;
            changes = changes.set("phone", phone);
        }

        self.get_user(id).await?;
        self.users
            .update_user(id, changes)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ServiceError::Internal("Profile update was rejected".to_string()))
    }

    /// Refreshes `lastLogin` whenever a user session starts.
    pub async fn watch_sessions(&self, mut sessions: watch::Receiver<Option<String>>) {
        while sessions.changed().await.is_ok() {
            let user_id = sessions.borrow_and_update().clone();
            if let Some(user_id) = user_id {
                if let Err(e) = self.users.touch_last_login(&user_id).await {
                    log::warn!("Could not refresh last login of {}: {}", user_id, e);
                }
            }
        }
    }
}

#[async_trait]
impl RequestHandler<UserRequest> for UserRequestHandler {
    async fn handle_request(&self, request: UserRequest) {
        match request {
            UserRequest::Register { user, response } => {
                let result = self.register(user).await;
                let _ = response.send(result);
            }
            UserRequest::SignIn {
                credential,
                response,
            } => {
                let result = self.sign_in(credential).await;
                let _ = response.send(result);
            }
            UserRequest::SignOut => self.identity.sign_out(),
            UserRequest::GetUser { id, response } => {
                let user = self.get_user(&id).await;
                let _ = response.send(user);
            }
            UserRequest::UpdateProfile {
                id,
                update,
                response,
            } => {
                let user = self.update_profile(&id, update).await;
                let _ = response.send(user);
            }
        }
    }
}

pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        UserService {}
    }
}

#[async_trait]
impl Service<UserRequest, UserRequestHandler> for UserService {}
