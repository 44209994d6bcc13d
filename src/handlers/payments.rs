use crate::handlers::common::{
    created_response, map_service_error, success_response, validate_input, PaginatedResponse,
    PaginationParams,
};
use crate::{
    auth::AuthenticatedUser,
    entities::payment::{self, PaymentReferenceType, PaymentStatus},
    errors::{ApiError, ServiceError},
    services::payments::{CreatePaymentInput, PaymentReference},
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for payment endpoints
pub fn payments_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_order_payment).get(list_payments))
        .route("/appointment", post(create_appointment_payment))
        .route("/advertisement", post(create_advertisement_payment))
        .route("/:id", put(update_payment_status).get(get_payment))
}

/// Record a payment for an order
///
/// `simulate = true`, or any non-card payment type, confirms on the spot.
/// A card payment stays pending so the OTP flow can settle it.
#[utoipa::path(
    post,
    path = "/api/v1/payments",
    summary = "Create order payment",
    request_body = CreateOrderPaymentRequest,
    responses(
        (status = 201, description = "Payment recorded", body = PaymentEnvelope),
        (status = 400, description = "Missing or ambiguous order reference", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the order's owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn create_order_payment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateOrderPaymentRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    // Older clients sent the order id as `referenceId`; honor both spellings.
    let order_id = payload.order_id.or(payload.reference_id);
    let reference = PaymentReference::from_ids(order_id, None, None).map_err(map_service_error)?;
    ensure_reference_access(&state, &user, reference.kind(), reference.id()).await?;

    let created = state
        .services
        .payments
        .create(CreatePaymentInput {
            reference,
            amount: Some(payload.amount),
            method: payload.payment_type.clone(),
        })
        .await
        .map_err(map_service_error)?;

    let payment = if payload.simulate.unwrap_or(false) || !is_card(&payload.payment_type) {
        state
            .services
            .payments
            .confirm(created.id)
            .await
            .map_err(map_service_error)?
    } else {
        created
    };

    Ok(created_response(PaymentEnvelope::from(payment)))
}

/// Record or confirm an appointment payment
///
/// With `paymentID` this confirms the pending payment created during OTP
/// verification; without it a fresh payment is recorded and confirmed.
#[utoipa::path(
    post,
    path = "/api/v1/payments/appointment",
    summary = "Create appointment payment",
    request_body = CreateAppointmentPaymentRequest,
    responses(
        (status = 201, description = "Payment settled", body = PaymentEnvelope),
        (status = 403, description = "Not the appointment's customer", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown appointment or payment", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn create_appointment_payment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateAppointmentPaymentRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let reference = PaymentReference::Appointment(payload.appointment_id);
    ensure_reference_access(&state, &user, reference.kind(), reference.id()).await?;

    let payment = settle_referenced_payment(
        &state,
        reference,
        payload.payment_id,
        payload.amount,
        payload.payment_type,
    )
    .await?;

    Ok(created_response(PaymentEnvelope::from(payment)))
}

/// Record or confirm an advertisement listing-fee payment
#[utoipa::path(
    post,
    path = "/api/v1/payments/advertisement",
    summary = "Create advertisement payment",
    request_body = CreateAdvertisementPaymentRequest,
    responses(
        (status = 201, description = "Payment settled", body = PaymentEnvelope),
        (status = 403, description = "Not the advertisement's provider", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown advertisement or payment", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn create_advertisement_payment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateAdvertisementPaymentRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let reference = PaymentReference::Advertisement(payload.ad_id);
    ensure_reference_access(&state, &user, reference.kind(), reference.id()).await?;

    let payment = settle_referenced_payment(
        &state,
        reference,
        payload.payment_id,
        payload.amount,
        payload.payment_type,
    )
    .await?;

    Ok(created_response(PaymentEnvelope::from(payment)))
}

/// Page through the payment ledger; admin only
#[utoipa::path(
    get,
    path = "/api/v1/payments",
    summary = "List payments",
    params(PaginationParams),
    responses(
        (status = 200, description = "Ledger page, newest first", body = PaginatedResponse<PaymentPayload>),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    user.require_admin().map_err(map_service_error)?;

    let (payments, total) = state
        .services
        .payments
        .list(pagination.page, pagination.per_page)
        .await
        .map_err(map_service_error)?;

    let data = payments.into_iter().map(PaymentPayload::from).collect();
    Ok(success_response(PaginatedResponse::new(
        data,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

/// Transition a payment to success or failed
#[utoipa::path(
    put,
    path = "/api/v1/payments/{id}",
    summary = "Update payment status",
    params(("id" = Uuid, Path, description = "Payment id")),
    request_body = UpdatePaymentStatusRequest,
    responses(
        (status = 200, description = "Payment after the transition", body = PaymentEnvelope),
        (status = 400, description = "Status other than success or failed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown payment", body = crate::errors::ErrorResponse),
        (status = 409, description = "Completed payment cannot be failed", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn update_payment_status(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePaymentStatusRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let status = PaymentStatus::from_str(&payload.status).map_err(|_| {
        map_service_error(ServiceError::ValidationError(format!(
            "Unknown payment status: {}",
            payload.status
        )))
    })?;

    let record = state
        .services
        .payments
        .get(id)
        .await
        .map_err(map_service_error)?;
    ensure_reference_access(&state, &user, record.reference_type, record.reference_id).await?;

    let payment = state
        .services
        .payments
        .update_status(id, status)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaymentEnvelope::from(payment)))
}

/// Fetch one payment; admin or the referent's owner
#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    summary = "Get payment",
    params(("id" = Uuid, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment record", body = PaymentEnvelope),
        (status = 403, description = "Not the referent's owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown payment", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let record = state
        .services
        .payments
        .get(id)
        .await
        .map_err(map_service_error)?;
    ensure_reference_access(&state, &user, record.reference_type, record.reference_id).await?;

    Ok(success_response(PaymentEnvelope::from(record)))
}

/// Confirms `payment_id` against the reference when given, otherwise
/// records a fresh payment and confirms it.
async fn settle_referenced_payment(
    state: &AppState,
    reference: PaymentReference,
    payment_id: Option<Uuid>,
    amount: Option<Decimal>,
    payment_type: String,
) -> Result<payment::Model, ApiError> {
    let payments = &state.services.payments;
    let settled = match payment_id {
        Some(existing) => payments
            .confirm_for_reference(existing, reference)
            .await
            .map_err(map_service_error)?,
        None => {
            let created = payments
                .create(CreatePaymentInput {
                    reference,
                    amount,
                    method: payment_type,
                })
                .await
                .map_err(map_service_error)?;
            payments
                .confirm(created.id)
                .await
                .map_err(map_service_error)?
        }
    };
    Ok(settled)
}

/// Admins see everything; everyone else must own the referenced resource:
/// the order's customer, the appointment's email, or the ad's provider.
async fn ensure_reference_access(
    state: &AppState,
    user: &AuthenticatedUser,
    reference_type: PaymentReferenceType,
    reference_id: Uuid,
) -> Result<(), ApiError> {
    // Resolved for admins too, so an unknown referent stays a 404.
    let allowed = match reference_type {
        PaymentReferenceType::Order => {
            let found = state
                .services
                .orders
                .get(reference_id)
                .await
                .map_err(map_service_error)?;
            user.can_access(found.order.customer_id)
        }
        PaymentReferenceType::Appointment => {
            let found = state
                .services
                .appointments
                .get(reference_id)
                .await
                .map_err(map_service_error)?;
            user.is_admin() || found.customer_email == user.email
        }
        PaymentReferenceType::Advertisement => {
            let found = state
                .services
                .advertisements
                .get(reference_id)
                .await
                .map_err(map_service_error)?;
            user.can_access(found.provider_id)
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(map_service_error(ServiceError::Forbidden(
            "payments are only visible to the resource owner".to_string(),
        )))
    }
}

fn is_card(payment_type: &str) -> bool {
    payment_type.eq_ignore_ascii_case("card")
}

// Wire DTOs (legacy contract: note the `orderID` / `adId` / `paymentID` casing)

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrderPaymentRequest {
    #[serde(rename = "orderID", default)]
    pub order_id: Option<Uuid>,
    pub amount: Decimal,
    #[serde(rename = "paymentType")]
    #[validate(length(min = 1, max = 40))]
    pub payment_type: String,
    /// Legacy alias for the order id
    #[serde(rename = "referenceId", default)]
    pub reference_id: Option<Uuid>,
    #[serde(default)]
    pub simulate: Option<bool>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateAppointmentPaymentRequest {
    #[serde(rename = "appointmentID")]
    pub appointment_id: Uuid,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(rename = "paymentType")]
    #[validate(length(min = 1, max = 40))]
    pub payment_type: String,
    #[serde(rename = "paymentID", default)]
    pub payment_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateAdvertisementPaymentRequest {
    #[serde(rename = "adId")]
    pub ad_id: Uuid,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(rename = "paymentType")]
    #[validate(length(min = 1, max = 40))]
    pub payment_type: String,
    #[serde(rename = "paymentID", default)]
    pub payment_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdatePaymentStatusRequest {
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentEnvelope {
    pub success: bool,
    pub payment: PaymentPayload,
}

impl From<payment::Model> for PaymentEnvelope {
    fn from(record: payment::Model) -> Self {
        Self {
            success: true,
            payment: PaymentPayload::from(record),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub id: Uuid,
    pub payment_number: String,
    pub transaction_ref: String,
    pub reference_type: String,
    pub reference_id: Uuid,
    pub amount: Decimal,
    pub method: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<payment::Model> for PaymentPayload {
    fn from(record: payment::Model) -> Self {
        Self {
            id: record.id,
            payment_number: record.payment_number,
            transaction_ref: record.transaction_ref,
            reference_type: record.reference_type.to_string(),
            reference_id: record.reference_id,
            amount: record.amount,
            method: record.method,
            status: record.status.to_string(),
            paid_at: record.paid_at,
            created_at: record.created_at,
        }
    }
}
