use crate::handlers::common::{
    created_response, map_service_error, success_response, PaginatedResponse, PaginationParams,
};
use crate::{
    auth::AuthenticatedUser,
    entities::appointment::AppointmentPackage,
    errors::{ApiError, ServiceError},
    services::appointments::BookAppointmentInput,
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for grooming-appointment endpoints
pub fn appointments_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_appointments).post(book_appointment))
        .route("/:id", get(get_appointment))
}

/// Book an appointment for the calling customer
///
/// The package picks the price; payment happens afterwards through
/// the payment endpoints.
async fn book_appointment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<BookAppointmentRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let appointment = state
        .services
        .appointments
        .book(BookAppointmentInput {
            customer_email: user.email,
            service_name: payload.service_name,
            package: payload.package,
            scheduled_for: payload.scheduled_for,
        })
        .await
        .map_err(map_service_error)?;
    Ok(created_response(appointment))
}

async fn get_appointment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let appointment = state
        .services
        .appointments
        .get(id)
        .await
        .map_err(map_service_error)?;

    if !user.is_admin() && appointment.customer_email != user.email {
        return Err(map_service_error(ServiceError::Forbidden(
            "appointments are only visible to their customer".to_string(),
        )));
    }
    Ok(success_response(appointment))
}

/// The calling customer's booking history, newest first
async fn list_appointments(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (appointments, total) = state
        .services
        .appointments
        .list_for_email(&user.email, pagination.page, pagination.per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        appointments,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

#[derive(Debug, Deserialize)]
pub struct BookAppointmentRequest {
    pub service_name: String,
    pub package: AppointmentPackage,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}
