use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::{dispatch, respond, AppState};
use crate::models::bonuses::NewBonus;
use crate::models::packages::NewPackage;
use crate::models::surveys::NewSurvey;
use crate::models::users::UserStatusUpdate;
use crate::models::withdrawals::WithdrawalStatusUpdate;
use crate::services::admin::AdminRequest;

pub async fn list_users(State(state): State<AppState>) -> impl IntoResponse {
    let result = dispatch(&state.channels.admin, |response| AdminRequest::ListUsers {
        response,
    })
    .await;

    respond(StatusCode::OK, result.map(|users| json!({ "users": users })))
}

pub async fn update_user_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(update): Json<UserStatusUpdate>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.admin, |response| {
        AdminRequest::UpdateUserStatus {
            user_id,
            is_active: update.is_active,
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result.map(|user| json!({ "user": user })))
}

pub async fn list_withdrawals(State(state): State<AppState>) -> impl IntoResponse {
    let result = dispatch(&state.channels.admin, |response| {
        AdminRequest::ListWithdrawals { response }
    })
    .await;

    respond(
        StatusCode::OK,
        result.map(|withdrawals| json!({ "withdrawals": withdrawals })),
    )
}

pub async fn update_withdrawal_status(
    State(state): State<AppState>,
    Path(withdrawal_id): Path<String>,
    Json(update): Json<WithdrawalStatusUpdate>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.admin, |response| {
        AdminRequest::UpdateWithdrawalStatus {
            withdrawal_id,
            status: update.status,
            response,
        }
    })
    .await;

    respond(
        StatusCode::OK,
        result.map(|withdrawal| json!({ "withdrawal": withdrawal })),
    )
}

pub async fn add_survey(
    State(state): State<AppState>,
    Json(survey): Json<NewSurvey>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.admin, |response| AdminRequest::AddSurvey {
        survey,
        response,
    })
    .await;

    respond(StatusCode::CREATED, result.map(|survey| json!({ "survey": survey })))
}

pub async fn add_package(
    State(state): State<AppState>,
    Json(package): Json<NewPackage>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.admin, |response| AdminRequest::AddPackage {
        package,
        response,
    })
    .await;

    respond(
        StatusCode::CREATED,
        result.map(|package| json!({ "package": package })),
    )
}

pub async fn add_bonus(
    State(state): State<AppState>,
    Json(bonus): Json<NewBonus>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.admin, |response| AdminRequest::AddBonus {
        bonus,
        response,
    })
    .await;

    respond(StatusCode::CREATED, result.map(|bonus| json!({ "bonus": bonus })))
}
