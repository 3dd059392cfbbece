use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::{dispatch, respond, AppState};
use crate::models::transactions::TransactionFilter;
use crate::models::users::{Credential, NewUser, ProfileUpdate};
use crate::services::transactions::TransactionRequest;
use crate::services::users::UserRequest;

pub async fn register(
    State(state): State<AppState>,
    Json(user): Json<NewUser>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.users, |response| UserRequest::Register {
        user,
        response,
    })
    .await;

    respond(StatusCode::CREATED, result.map(|user| json!({ "user": user })))
}

pub async fn sign_in(
    State(state): State<AppState>,
    Json(credential): Json<Credential>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.users, |response| UserRequest::SignIn {
        credential,
        response,
    })
    .await;

    respond(StatusCode::OK, result.map(|user| json!({ "user": user })))
}

pub async fn sign_out(State(state): State<AppState>) -> impl IntoResponse {
    let result = state
        .channels
        .users
        .send(UserRequest::SignOut)
        .await
        .map_err(|e| {
            crate::services::ServiceError::Communication("Http".to_string(), e.to_string())
        });

    respond(StatusCode::OK, result.map(|_| json!({})))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.users, |response| UserRequest::GetUser {
        id: user_id,
        response,
    })
    .await;

    respond(StatusCode::OK, result.map(|user| json!({ "user": user })))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(update): Json<ProfileUpdate>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.users, |response| {
        UserRequest::UpdateProfile {
            id: user_id,
            update,
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result.map(|user| json!({ "user": user })))
}

pub async fn get_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(filter): Query<TransactionFilter>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.transactions, |response| {
        TransactionRequest::GetTransactions {
            user_id,
            transaction_type: filter.transaction_type,
            limit: filter.limit,
            response,
        }
    })
    .await;

    respond(
        StatusCode::OK,
        result.map(|transactions| json!({ "transactions": transactions })),
    )
}
