use crate::handlers::common::{
    created_response, map_service_error, success_response, validate_input, PaginatedResponse,
    PaginationParams,
};
use crate::{
    auth::{AuthenticatedUser, Role},
    entities::advertisement::{AdvertisementPaymentStatus, AdvertisementStatus},
    errors::{ApiError, ServiceError},
    services::advertisements::SubmitAdvertisementInput,
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for the advertisement board
pub fn advertisements_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_published).post(submit_advertisement))
        .route("/mine", get(list_own_advertisements))
        .route("/:id", get(get_advertisement))
        .route("/:id/approve", post(approve_advertisement))
        .route("/:id/reject", post(reject_advertisement))
}

/// Submit a listing; providers only
///
/// The listing waits on two gates before it shows on the board:
/// admin approval and the listing-fee payment.
async fn submit_advertisement(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<SubmitAdvertisementInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    user.require_role(Role::Provider).map_err(map_service_error)?;
    validate_input(&payload)?;

    let advertisement = state
        .services
        .advertisements
        .submit(user.id, payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(advertisement))
}

/// The public board: approved and paid listings only
async fn list_published(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (advertisements, total) = state
        .services
        .advertisements
        .list_published(pagination.page, pagination.per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        advertisements,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

/// The calling provider's own submissions regardless of state
async fn list_own_advertisements(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (advertisements, total) = state
        .services
        .advertisements
        .list_for_provider(user.id, pagination.page, pagination.per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        advertisements,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

/// Fetch one listing
///
/// Unpublished listings stay hidden from everyone but their provider
/// and admins; strangers get the same 404 as a nonexistent id.
async fn get_advertisement(
    State(state): State<Arc<AppState>>,
    viewer: Option<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let advertisement = state
        .services
        .advertisements
        .get(id)
        .await
        .map_err(map_service_error)?;

    let published = advertisement.status == AdvertisementStatus::Approved
        && advertisement.payment_status == AdvertisementPaymentStatus::Paid;
    let owner = viewer
        .as_ref()
        .map(|user| user.can_access(advertisement.provider_id))
        .unwrap_or(false);
    if !published && !owner {
        return Err(map_service_error(ServiceError::NotFound(format!(
            "Advertisement {} not found",
            id
        ))));
    }
    Ok(success_response(advertisement))
}

async fn approve_advertisement(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    user.require_admin().map_err(map_service_error)?;

    let advertisement = state
        .services
        .advertisements
        .approve(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(advertisement))
}

async fn reject_advertisement(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    user.require_admin().map_err(map_service_error)?;

    let advertisement = state
        .services
        .advertisements
        .reject(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(advertisement))
}
