use crate::handlers::common::{map_service_error, success_response};
use crate::{
    entities::payment::PaymentReferenceType,
    errors::{ApiError, ServiceError},
    services::otp::{SendOtpInput, VerifyOtpInput},
    AppState,
};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

/// Creates the router for the one-time-password endpoints
pub fn otp_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/send-otp", post(send_otp))
        .route("/verify-otp", post(verify_otp))
        .route("/resend-otp", post(resend_otp))
}

/// Issue a verification code for a resource
#[utoipa::path(
    post,
    path = "/api/v1/otp/send-otp",
    summary = "Send OTP",
    description = "Issues a six-digit code for the referenced order, appointment, or advertisement and emails it to the customer",
    request_body = SendOtpRequest,
    responses(
        (status = 200, description = "Code issued", body = SendOtpResponse),
        (status = 400, description = "Malformed resource type or email", body = crate::errors::ErrorResponse),
        (status = 404, description = "Referenced resource does not exist", body = crate::errors::ErrorResponse),
    ),
    tag = "otp"
)]
pub async fn send_otp(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SendOtpRequest>,
) -> Result<Response, ApiError> {
    let resource_type = parse_resource_type(&payload.resource_type)?;
    let resource_id = payload.resource_id;

    state
        .services
        .otp
        .send(SendOtpInput {
            resource_type,
            resource_id,
            email: payload.email,
        })
        .await
        .map_err(map_service_error)?;

    Ok(success_response(SendOtpResponse {
        success: true,
        resource_type: resource_type.to_string(),
        resource_id,
    }))
}

/// Verify and consume a code
///
/// Order codes settle the order's payment on the spot; appointment and
/// advertisement codes create the pending payment whose id comes back as
/// `paymentID` for the follow-up confirmation call.
#[utoipa::path(
    post,
    path = "/api/v1/otp/verify-otp",
    summary = "Verify OTP",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Code accepted", body = VerifyOtpResponse),
        (status = 400, description = "Invalid, expired, or unknown code", body = OtpFailureResponse),
    ),
    tag = "otp"
)]
pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<Response, ApiError> {
    let resource_type = parse_resource_type(&payload.resource_type)?;

    let result = state
        .services
        .otp
        .verify(VerifyOtpInput {
            resource_type,
            resource_id: payload.resource_id,
            code: payload.otp,
        })
        .await;

    match result {
        Ok(verified) => Ok(success_response(VerifyOtpResponse {
            success: true,
            resource_id: verified.resource_id,
            payment_id: verified.payment.map(|p| p.id),
        })),
        Err(err) => otp_failure_or(err),
    }
}

/// Reissue a code once the previous one has expired
#[utoipa::path(
    post,
    path = "/api/v1/otp/resend-otp",
    summary = "Resend OTP",
    request_body = SendOtpRequest,
    responses(
        (status = 200, description = "Fresh code issued", body = SendOtpResponse),
        (status = 400, description = "An unexpired code still exists", body = OtpFailureResponse),
    ),
    tag = "otp"
)]
pub async fn resend_otp(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SendOtpRequest>,
) -> Result<Response, ApiError> {
    let resource_type = parse_resource_type(&payload.resource_type)?;
    let resource_id = payload.resource_id;

    let result = state
        .services
        .otp
        .resend(SendOtpInput {
            resource_type,
            resource_id,
            email: payload.email,
        })
        .await;

    match result {
        Ok(()) => Ok(success_response(SendOtpResponse {
            success: true,
            resource_type: resource_type.to_string(),
            resource_id,
        })),
        Err(err) => otp_failure_or(err),
    }
}

/// The legacy contract reports OTP outcomes as `{ success: false, message }`
/// with a 400 rather than the standard error body; anything outside the OTP
/// taxonomy flows through the normal error path.
fn otp_failure_or(err: ServiceError) -> Result<Response, ApiError> {
    match err {
        ServiceError::OtpInvalid
        | ServiceError::OtpExpired
        | ServiceError::OtpNotFound
        | ServiceError::OtpStillValid => {
            let body = OtpFailureResponse {
                success: false,
                message: err.to_string(),
            };
            Ok((StatusCode::BAD_REQUEST, axum::Json(body)).into_response())
        }
        other => Err(map_service_error(other)),
    }
}

fn parse_resource_type(raw: &str) -> Result<PaymentReferenceType, ApiError> {
    PaymentReferenceType::from_str(raw).map_err(|_| {
        map_service_error(ServiceError::ValidationError(format!(
            "resourceType must be order, appointment, or advertisement, got {}",
            raw
        )))
    })
}

// Wire DTOs (legacy contract: note the `resourceID` / `paymentID` casing)

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendOtpRequest {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(rename = "resourceID")]
    pub resource_id: Uuid,
    pub email: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SendOtpResponse {
    pub success: bool,
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(rename = "resourceID")]
    pub resource_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyOtpRequest {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(rename = "resourceID")]
    pub resource_id: Uuid,
    pub otp: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyOtpResponse {
    pub success: bool,
    #[serde(rename = "resourceID")]
    pub resource_id: Uuid,
    #[serde(rename = "paymentID", skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OtpFailureResponse {
    pub success: bool,
    pub message: String,
}
