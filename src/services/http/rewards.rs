use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::{dispatch, respond, AppState};
use crate::models::packages::PackagePurchaseRequest;
use crate::models::transactions::PackageFunding;
use crate::services::bonuses::BonusRequest;
use crate::services::packages::PackageRequest;
use crate::services::surveys::SurveyRequest;

pub async fn list_surveys(State(state): State<AppState>) -> impl IntoResponse {
    let result = dispatch(&state.channels.surveys, |response| {
        SurveyRequest::ListSurveys {
            user_id: None,
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result.map(|surveys| json!({ "surveys": surveys })))
}

pub async fn list_user_surveys(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.surveys, |response| {
        SurveyRequest::ListSurveys {
            user_id: Some(user_id),
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result.map(|surveys| json!({ "surveys": surveys })))
}

pub async fn complete_survey(
    State(state): State<AppState>,
    Path((user_id, survey_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.surveys, |response| {
        SurveyRequest::CompleteSurvey {
            user_id,
            survey_id,
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn list_packages(State(state): State<AppState>) -> impl IntoResponse {
    let result = dispatch(&state.channels.packages, |response| {
        PackageRequest::ListPackages { response }
    })
    .await;

    respond(StatusCode::OK, result.map(|packages| json!({ "packages": packages })))
}

pub async fn get_active_package(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.packages, |response| {
        PackageRequest::GetActivePackage { user_id, response }
    })
    .await;

    respond(StatusCode::OK, result.map(|package| json!({ "package": package })))
}

/// Pays for a package from the balance. External payments go through `/payments`.
pub async fn purchase_package(
    State(state): State<AppState>,
    Path((user_id, package_id)): Path<(String, String)>,
    Json(purchase): Json<PackagePurchaseRequest>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.packages, |response| {
        PackageRequest::PurchasePackage {
            user_id,
            package_id,
            amount_paid: purchase.amount,
            funding: PackageFunding::Balance,
            response,
        }
    })
    .await;

    respond(StatusCode::CREATED, result)
}

pub async fn get_user_bonuses(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.bonuses, |response| {
        BonusRequest::GetUserBonuses { user_id, response }
    })
    .await;

    respond(StatusCode::OK, result.map(|bonuses| json!({ "bonuses": bonuses })))
}

pub async fn claim_bonus(
    State(state): State<AppState>,
    Path((user_id, bonus_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.bonuses, |response| {
        BonusRequest::ClaimBonus {
            user_id,
            bonus_id,
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result)
}
