use std::sync::Arc;

use super::store::{Direction, DocumentStore, Query};
use super::{from_document, from_documents, to_document, SURVEYS, SURVEY_COMPLETIONS};
use crate::models::surveys::{Survey, SurveyCompletion};

#[derive(Clone)]
pub struct SurveyRepository {
    store: Arc<dyn DocumentStore>,
}

impl SurveyRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        SurveyRepository { store }
    }

    pub async fn get_survey(&self, survey_id: &str) -> Result<Option<Survey>, anyhow::Error> {
        self.store
            .get(SURVEYS, survey_id)
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn new_survey(&self, mut survey: Survey) -> Result<Survey, anyhow::Error> {
        survey.id = self.store.add(SURVEYS, to_document(&survey)?).await?;
        Ok(survey)
    }

    /// Active surveys, best paying first.
    pub async fn list_active_surveys(&self) -> Result<Vec<Survey>, anyhow::Error> {
        let documents = self
            .store
            .query(
                SURVEYS,
                Query::new()
                    .filter("isActive", true)
                    .order_by("reward", Direction::Descending),
            )
            .await?;

        from_documents(documents)
    }

    pub async fn is_completed(&self, user_id: &str, survey_id: &str) -> Result<bool, anyhow::Error> {
        let completion = self
            .store
            .get(SURVEY_COMPLETIONS, &SurveyCompletion::key(user_id, survey_id))
            .await?;

        Ok(completion.is_some())
    }

    /// Records the completion unless one already exists. Returns whether it did.
    pub async fn insert_completion(
        &self,
        completion: &SurveyCompletion,
    ) -> Result<bool, anyhow::Error> {
        self.store
            .create(SURVEY_COMPLETIONS, &completion.id, to_document(completion)?)
            .await
    }

    pub async fn remove_completion(&self, completion_id: &str) -> Result<(), anyhow::Error> {
        self.store.delete(SURVEY_COMPLETIONS, completion_id).await
    }

    pub async fn get_user_completions(
        &self,
        user_id: &str,
    ) -> Result<Vec<SurveyCompletion>, anyhow::Error> {
        let documents = self
            .store
            .query(SURVEY_COMPLETIONS, Query::new().filter("userId", user_id))
            .await?;

        from_documents(documents)
    }
}
