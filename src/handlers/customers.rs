use crate::handlers::common::{
    created_response, map_service_error, success_response, validate_input,
};
use crate::{
    auth::AuthenticatedUser,
    errors::{ApiError, ServiceError},
    services::customers::RegisterCustomerInput,
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for customer-profile endpoints
pub fn customers_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(register_customer))
        .route("/:id", get(get_customer))
        .route("/:id/loyalty", get(get_loyalty_balance))
}

/// Create the marketplace profile for the calling identity
///
/// The gateway owns credentials; this row carries the commerce side
/// of the account, loyalty balance included.
async fn register_customer(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<RegisterCustomerInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let customer = state
        .services
        .customers
        .register(user.id, payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(customer))
}

async fn get_customer(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    if !user.can_access(id) {
        return Err(map_service_error(ServiceError::Forbidden(
            "customer profiles are only visible to their owner".to_string(),
        )));
    }

    let customer = state
        .services
        .customers
        .get(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(customer))
}

async fn get_loyalty_balance(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    if !user.can_access(id) {
        return Err(map_service_error(ServiceError::Forbidden(
            "loyalty balances are only visible to their owner".to_string(),
        )));
    }

    let balance = state
        .services
        .loyalty
        .balance(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(LoyaltyBalanceResponse {
        customer_id: id,
        loyalty_points: balance,
    }))
}

#[derive(Debug, Serialize)]
pub struct LoyaltyBalanceResponse {
    pub customer_id: Uuid,
    pub loyalty_points: i32,
}
