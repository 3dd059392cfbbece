use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Cents;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub phone: String,
    pub full_name: String,
    pub email: String,
    pub balance: Cents,
    pub total_earnings: Cents,
    pub surveys_completed: i64,
    pub current_package_id: Option<String>,
    pub available_surveys: i64,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub package_expiry: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(id: String, profile: UserProfile, now: DateTime<Utc>) -> Self {
        Self {
            id,
            phone: profile.phone,
            full_name: profile.full_name,
            email: profile.email,
            balance: 0,
            total_earnings: 0,
            surveys_completed: 0,
            current_package_id: None,
            available_surveys: 0,
            package_expiry: None,
            is_active: true,
            created_at: now,
            updated_at: now,
            last_login: Some(now),
        }
    }

    /// A package is usable while it has not expired and still has credits left.
    pub fn has_active_package(&self, now: DateTime<Utc>) -> bool {
        match (&self.current_package_id, self.package_expiry) {
            (Some(_), Some(expiry)) => expiry > now && self.available_surveys > 0,
            _ => false,
        }
    }
}

/// Profile data owned by the identity provider.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub phone: String,
    pub full_name: String,
    pub email: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub phone: String,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub phone: String,
    pub password: String,
    pub full_name: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusUpdate {
    pub is_active: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    pub user_id: String,
    pub profile: UserProfile,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user_with_package(available: i64, expiry: Option<DateTime<Utc>>) -> User {
        let mut user = User::new("u1".to_string(), UserProfile::default(), Utc::now());
        user.current_package_id = Some("basic".to_string());
        user.available_surveys = available;
        user.package_expiry = expiry;
        user
    }

    #[test]
    fn package_is_active_before_expiry_with_credits() {
        let now = Utc::now();
        let user = user_with_package(3, Some(now + Duration::days(1)));
        assert!(user.has_active_package(now));
    }

    #[test]
    fn package_is_inactive_without_credits_or_after_expiry() {
        let now = Utc::now();
        assert!(!user_with_package(0, Some(now + Duration::days(1))).has_active_package(now));
        assert!(!user_with_package(5, Some(now - Duration::seconds(1))).has_active_package(now));
        assert!(!user_with_package(5, None).has_active_package(now));
    }

    #[test]
    fn timestamps_are_stored_as_epoch_millis() {
        let user = User::new("u1".to_string(), UserProfile::default(), Utc::now());
        let document = serde_json::to_value(&user).unwrap();

        assert!(document["createdAt"].is_i64());
        assert!(document["packageExpiry"].is_null());
        assert_eq!(document["balance"], 0);
    }
}
