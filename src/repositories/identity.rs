use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;

use crate::models::users::{Credential, Identity, UserProfile};

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The provider refused the credential; the message is safe to show.
    #[error("{0}")]
    Rejected(String),
    #[error("Identity provider unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

/// Port to the authentication backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    async fn register(
        &self,
        credential: Credential,
        full_name: String,
    ) -> Result<Identity, IdentityError>;

    async fn authenticate(&self, credential: Credential) -> Result<Identity, IdentityError>;

    fn sign_out(&self);

    /// Yields the signed-in user id on every session transition.
    fn subscribe(&self) -> watch::Receiver<Option<String>>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    email: String,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Maps identity toolkit error codes to messages for the account owner.
fn rejection_message(code: &str) -> &'static str {
    // Codes may carry a suffix, e.g. "WEAK_PASSWORD : Password should be ...".
    match code.split(' ').next().unwrap_or_default() {
        "EMAIL_EXISTS" => "Phone number already registered",
        "WEAK_PASSWORD" => "Password is too weak",
        "INVALID_EMAIL" => "Invalid phone number format",
        "EMAIL_NOT_FOUND" => "Phone number not registered",
        "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => "Incorrect password",
        "TOO_MANY_ATTEMPTS_TRY_LATER" => "Too many attempts. Try again later",
        "USER_DISABLED" => "Account is disabled",
        _ => "Authentication failed",
    }
}

/// Firebase Authentication over the identity toolkit REST API. Phone numbers
/// are mapped onto synthetic e-mail addresses under `email_domain`.
pub struct FirebaseIdentityProvider {
    url: String,
    api_key: String,
    email_domain: String,
    client: reqwest::Client,
    session: watch::Sender<Option<String>>,
}

impl FirebaseIdentityProvider {
    pub fn new(url: String, api_key: String, email_domain: String) -> Self {
        let (session, _) = watch::channel(None);

        Self {
            url,
            api_key,
            email_domain,
            client: reqwest::Client::new(),
            session,
        }
    }

    fn email_for(&self, phone: &str) -> String {
        format!("{}@{}", phone, self.email_domain)
    }

    async fn call(
        &self,
        endpoint: &str,
        payload: serde_json::Value,
        phone: &str,
    ) -> Result<Identity, IdentityError> {
        let response = self
            .client
            .post(format!("{}/v1/accounts:{}", self.url, endpoint))
            .query(&[("key", &self.api_key)])
            .json(&payload)
            .send()
            .await
            .map_err(anyhow::Error::from)?;

        if !response.status().is_success() {
            let body: ErrorBody = response.json().await.map_err(anyhow::Error::from)?;
            log::warn!("Identity provider rejected {}: {}", endpoint, body.error.message);
            return Err(IdentityError::Rejected(
                rejection_message(&body.error.message).to_string(),
            ));
        }

        let account: AccountResponse = response.json().await.map_err(anyhow::Error::from)?;
        let identity = Identity {
            user_id: account.local_id,
            profile: UserProfile {
                phone: phone.to_string(),
                full_name: account.display_name.unwrap_or_default(),
                email: account.email,
            },
        };

        self.session.send_replace(Some(identity.user_id.clone()));
        Ok(identity)
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentityProvider {
    async fn register(
        &self,
        credential: Credential,
        full_name: String,
    ) -> Result<Identity, IdentityError> {
        let payload = json!({
            "email": self.email_for(&credential.phone),
            "password": credential.password,
            "displayName": full_name,
            "returnSecureToken": true,
        });

        let mut identity = self.call("signUp", payload, &credential.phone).await?;
        identity.profile.full_name = full_name;

        Ok(identity)
    }

    async fn authenticate(&self, credential: Credential) -> Result<Identity, IdentityError> {
        let payload = json!({
            "email": self.email_for(&credential.phone),
            "password": credential.password,
            "returnSecureToken": true,
        });

        self.call("signInWithPassword", payload, &credential.phone)
            .await
    }

    fn sign_out(&self) {
        self.session.send_replace(None);
    }

    fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.session.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("EMAIL_EXISTS", "Phone number already registered")]
    #[case(
        "WEAK_PASSWORD : Password should be at least 6 characters",
        "Password is too weak"
    )]
    #[case("EMAIL_NOT_FOUND", "Phone number not registered")]
    #[case("INVALID_LOGIN_CREDENTIALS", "Incorrect password")]
    #[case("SOMETHING_NEW", "Authentication failed")]
    fn maps_provider_codes_to_messages(#[case] code: &str, #[case] message: &str) {
        assert_eq!(rejection_message(code), message);
    }

    #[test]
    fn phones_map_to_synthetic_emails() {
        let provider = FirebaseIdentityProvider::new(
            "https://identitytoolkit.googleapis.com".to_string(),
            "key".to_string(),
            "surveyrewards.com".to_string(),
        );

        assert_eq!(
            provider.email_for("0712345678"),
            "0712345678@surveyrewards.com"
        );
    }

    #[tokio::test]
    async fn sign_out_clears_the_session() {
        let provider = FirebaseIdentityProvider::new(
            String::new(),
            String::new(),
            "surveyrewards.com".to_string(),
        );
        let mut session = provider.subscribe();
        provider.session.send_replace(Some("u1".to_string()));

        session.changed().await.unwrap();
        assert_eq!(session.borrow_and_update().as_deref(), Some("u1"));

        provider.sign_out();
        session.changed().await.unwrap();
        assert_eq!(*session.borrow(), None);
    }
}
