use axum::{
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::{ServiceChannels, ServiceError};

mod admin;
mod rewards;
mod users;
mod wallet;

#[derive(Clone)]
pub struct AppState {
    channels: ServiceChannels,
}

type ApiResponse = (StatusCode, Json<Value>);

/// Sends a request to a service and waits for its answer.
async fn dispatch<R, T>(
    channel: &mpsc::Sender<R>,
    request: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> R,
) -> Result<T, ServiceError> {
    let (response_tx, response_rx) = oneshot::channel();

    channel
        .send(request(response_tx))
        .await
        .map_err(|e| ServiceError::Communication("Http".to_string(), e.to_string()))?;

    response_rx
        .await
        .map_err(|e| ServiceError::Communication("Http".to_string(), e.to_string()))?
}

fn status_code(error: &ServiceError) -> StatusCode {
    match error {
        ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::InsufficientBalance
        | ServiceError::AlreadyCompleted
        | ServiceError::AlreadyClaimed
        | ServiceError::NoActivePackage
        | ServiceError::AccountDisabled
        | ServiceError::Conflict(_) => StatusCode::CONFLICT,
        ServiceError::Authentication(_) => StatusCode::UNAUTHORIZED,
        ServiceError::Communication(..) | ServiceError::ExternalService(..) => {
            StatusCode::BAD_GATEWAY
        }
        ServiceError::Internal(_)
        | ServiceError::UnrecordedBalanceChange(_)
        | ServiceError::Database(_)
        | ServiceError::Repository(..) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Renders `{"success": true, ...payload}` or `{"success": false, "error": ...}`.
/// Object payloads are flattened into the envelope; anything else goes under `data`.
fn respond<T: Serialize>(status: StatusCode, result: Result<T, ServiceError>) -> ApiResponse {
    let error = match result {
        Ok(payload) => match serde_json::to_value(payload) {
            Ok(Value::Object(mut fields)) => {
                fields.insert("success".to_string(), Value::Bool(true));
                return (status, Json(Value::Object(fields)));
            }
            Ok(data) => return (status, Json(json!({"success": true, "data": data}))),
            Err(e) => ServiceError::Internal(e.to_string()),
        },
        Err(e) => e,
    };

    if error.is_collaborator_failure() {
        log::error!("Request failed: {}", error);
    }

    (
        status_code(&error),
        Json(json!({"success": false, "error": error.user_message()})),
    )
}

pub fn router(channels: ServiceChannels) -> Router {
    let app_state = AppState { channels };

    Router::new()
        .route("/health", get(|| async { Json(json!({"success": true})) }))
        .route("/auth/register", post(users::register))
        .route("/auth/sign-in", post(users::sign_in))
        .route("/auth/sign-out", post(users::sign_out))
        .route(
            "/users/{id}",
            get(users::get_user).patch(users::update_profile),
        )
        .route("/users/{id}/transactions", get(users::get_transactions))
        .route("/users/{id}/payments", post(wallet::initiate_payment))
        .route("/payments/{reference}", get(wallet::get_payment))
        .route("/payments/{reference}/confirm", post(wallet::confirm_payment))
        .route("/users/{id}/withdrawals", post(wallet::request_withdrawal))
        .route("/surveys", get(rewards::list_surveys))
        .route("/users/{id}/surveys", get(rewards::list_user_surveys))
        .route(
            "/users/{id}/surveys/{survey_id}/complete",
            post(rewards::complete_survey),
        )
        .route("/packages", get(rewards::list_packages))
        .route("/users/{id}/package", get(rewards::get_active_package))
        .route(
            "/users/{id}/packages/{package_id}/purchase",
            post(rewards::purchase_package),
        )
        .route("/users/{id}/bonuses", get(rewards::get_user_bonuses))
        .route(
            "/users/{id}/bonuses/{bonus_id}/claim",
            post(rewards::claim_bonus),
        )
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/{id}/status", put(admin::update_user_status))
        .route("/admin/withdrawals", get(admin::list_withdrawals))
        .route(
            "/admin/withdrawals/{id}/status",
            put(admin::update_withdrawal_status),
        )
        .route("/admin/surveys", post(admin::add_survey))
        .route("/admin/packages", post(admin::add_package))
        .route("/admin/bonuses", post(admin::add_bonus))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(channels: ServiceChannels, listen: &str) -> Result<(), anyhow::Error> {
    let app = router(channels);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
