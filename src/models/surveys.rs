use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Cents;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Survey {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub description: String,
    pub reward: Cents,
    pub category: String,
    /// Expected completion time in minutes.
    pub duration: u32,
    pub is_active: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSurvey {
    pub title: String,
    pub description: String,
    pub reward: Cents,
    pub category: String,
    pub duration: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SurveyCompletion {
    pub id: String,
    pub user_id: String,
    pub survey_id: String,
    pub survey_title: String,
    pub reward: Cents,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub completed_at: DateTime<Utc>,
}

impl SurveyCompletion {
    /// One completion per (user, survey): the key doubles as the uniqueness guard.
    pub fn key(user_id: &str, survey_id: &str) -> String {
        format!("{}_{}", user_id, survey_id)
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyListing {
    #[serde(flatten)]
    pub survey: Survey,
    pub completed: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SurveyReward {
    pub reward: Cents,
    pub survey: Survey,
    pub completion: SurveyCompletion,
    pub new_balance: Cents,
}
