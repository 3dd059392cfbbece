use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::oneshot;

use super::ledger::Ledger;
use super::{RequestHandler, Service, ServiceError};
use crate::models::surveys::{SurveyCompletion, SurveyListing, SurveyReward};
use crate::models::transactions::{TransactionMetadata, TransactionStatus};
use crate::repositories::store::{DocumentStore, Guard, Update};
use crate::repositories::surveys::SurveyRepository;
use crate::repositories::users::UserRepository;

pub enum SurveyRequest {
    CompleteSurvey {
        user_id: String,
        survey_id: String,
        response: oneshot::Sender<Result<SurveyReward, ServiceError>>,
    },
    ListSurveys {
        user_id: Option<String>,
        response: oneshot::Sender<Result<Vec<SurveyListing>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct SurveyRequestHandler {
    surveys: SurveyRepository,
    users: UserRepository,
    ledger: Ledger,
}

fn repository_error(e: anyhow::Error) -> ServiceError {
    ServiceError::Repository("SurveyService".to_string(), e.to_string())
}

impl SurveyRequestHandler {
    pub fn new(store: Arc<dyn DocumentStore>, ledger: Ledger) -> Self {
        SurveyRequestHandler {
            surveys: SurveyRepository::new(store.clone()),
            users: UserRepository::new(store),
            ledger,
        }
    }

    async fn complete_survey(
        &self,
        user_id: &str,
        survey_id: &str,
    ) -> Result<SurveyReward, ServiceError> {
        let survey = self
            .surveys
            .get_survey(survey_id)
            .await
            .map_err(repository_error)?
            .filter(|survey| survey.is_active)
            .ok_or_else(|| ServiceError::NotFound("Survey".to_string()))?;

        let guard = self.ledger.lock(user_id).await;
        if self
            .surveys
            .is_completed(user_id, survey_id)
            .await
            .map_err(repository_error)?
        {
            return Err(ServiceError::AlreadyCompleted);
        }

        let now = Utc::now();
        let user = self
            .users
            .get_user_by_id(user_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;
        if !user.is_active {
            return Err(ServiceError::AccountDisabled);
        }
        if !user.has_active_package(now) {
            log::warn!("{} tried survey {} without an active package", user_id, survey_id);
            return Err(ServiceError::NoActivePackage);
        }

        let completion = SurveyCompletion {
            id: SurveyCompletion::key(user_id, survey_id),
            user_id: user_id.to_string(),
            survey_id: survey_id.to_string(),
            survey_title: survey.title.clone(),
            reward: survey.reward,
            completed_at: now,
        };
        if !self
            .surveys
            .insert_completion(&completion)
            .await
            .map_err(repository_error)?
        {
            return Err(ServiceError::AlreadyCompleted);
        }

        let metadata = TransactionMetadata::SurveyEarning {
            survey_id: survey.id.clone(),
            survey_title: survey.title.clone(),
            category: survey.category.clone(),
            duration: survey.duration,
        };
        let credit = Update::new()
            .increment("availableSurveys", -1)
            .guard(Guard::AtLeast("availableSurveys".to_string(), 1));

        let entry = match self
            .ledger
            .apply_balance_delta(
                &guard,
                survey.reward,
                metadata,
                TransactionStatus::Completed,
                credit,
            )
            .await
        {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.release_completion(&completion.id).await;
                return Err(ServiceError::NoActivePackage);
            }
            // The reward was paid, so the completion must stay.
            Err(e @ ServiceError::UnrecordedBalanceChange(_)) => return Err(e),
            Err(e) => {
                self.release_completion(&completion.id).await;
                return Err(e);
            }
        };

        log::info!(
            "{} completed survey {} for {}",
            user_id,
            survey_id,
            survey.reward
        );

        Ok(SurveyReward {
            reward: survey.reward,
            survey,
            completion,
            new_balance: entry.new_balance,
        })
    }

    async fn release_completion(&self, completion_id: &str) {
        if let Err(e) = self.surveys.remove_completion(completion_id).await {
            log::error!(
                "Completion {} left behind without a reward: {}",
                completion_id,
                e
            );
        }
    }

    async fn list_surveys(&self, user_id: Option<&str>) -> Result<Vec<SurveyListing>, ServiceError> {
        let surveys = self
            .surveys
            .list_active_surveys()
            .await
            .map_err(repository_error)?;

        let completed: HashSet<String> = match user_id {
            Some(user_id) => self
                .surveys
                .get_user_completions(user_id)
                .await
                .map_err(repository_error)?
                .into_iter()
                .map(|completion| completion.survey_id)
                .collect(),
            None => HashSet::new(),
        };

        Ok(surveys
            .into_iter()
            .map(|survey| SurveyListing {
                completed: completed.contains(&survey.id),
                survey,
            })
            .collect())
    }
}

#[async_trait]
impl RequestHandler<SurveyRequest> for SurveyRequestHandler {
    async fn handle_request(&self, request: SurveyRequest) {
        match request {
            SurveyRequest::CompleteSurvey {
                user_id,
                survey_id,
                response,
            } => {
                let result = self.complete_survey(&user_id, &survey_id).await;
                let _ = response.send(result);
            }
            SurveyRequest::ListSurveys { user_id, response } => {
                let result = self.list_surveys(user_id.as_deref()).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct SurveyService;

impl SurveyService {
    pub fn new() -> Self {
        SurveyService {}
    }
}

#[async_trait]
impl Service<SurveyRequest, SurveyRequestHandler> for SurveyService {}
