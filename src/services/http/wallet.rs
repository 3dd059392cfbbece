use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::{dispatch, respond, AppState};
use crate::models::payments::NewPayment;
use crate::models::withdrawals::NewWithdrawal;
use crate::services::payments::PaymentRequest;
use crate::services::transactions::TransactionRequest;

pub async fn initiate_payment(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(payment): Json<NewPayment>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.payments, |response| {
        PaymentRequest::InitiatePayment {
            user_id,
            payment,
            response,
        }
    })
    .await;

    respond(StatusCode::CREATED, result)
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.payments, |response| {
        PaymentRequest::GetPayment {
            reference,
            response,
        }
    })
    .await;

    respond(
        StatusCode::OK,
        result.map(|payment| json!({ "message": payment.status.message(), "payment": payment })),
    )
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.payments, |response| {
        PaymentRequest::ConfirmPayment {
            reference,
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn request_withdrawal(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(withdrawal): Json<NewWithdrawal>,
) -> impl IntoResponse {
    let result = dispatch(&state.channels.transactions, |response| {
        TransactionRequest::CreateWithdrawal {
            user_id,
            amount: withdrawal.amount,
            phone: withdrawal.phone,
            response,
        }
    })
    .await;

    respond(StatusCode::CREATED, result)
}
