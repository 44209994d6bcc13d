use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "PawMart API",
        version = "1.0.0",
        description = r#"
# PawMart Pet Services Marketplace API

The commerce backend for the PawMart marketplace: product catalog, carts,
checkout under finite stock, OTP-confirmed card payments, grooming
appointments, provider advertisements, and customer loyalty points.

## Authentication

The edge gateway terminates authentication and forwards the caller's
identity in trusted headers:

```
x-user-id: <uuid>
x-user-email: <email>
x-user-role: customer | provider | admin
```

Requests without these headers are rejected with 401.

## Error Handling

Errors use a consistent envelope with appropriate HTTP status codes:

```json
{
  "error": "Not Found",
  "message": "Order 5d4f... not found",
  "request_id": "c0ffee...",
  "timestamp": "2026-01-01T00:00:00Z"
}
```

The OTP verify and resend endpoints are the exception: their domain
failures come back as `400 {"success": false, "message": "..."}` to
match the legacy storefront contract.

## Pagination

List endpoints accept `page` (default 1) and `per_page` (default 20,
max 100) query parameters.
        "#,
        contact(
            name = "PawMart Engineering",
            email = "engineering@pawmart.io"
        )
    ),
    servers(
        (url = "https://api.pawmart.io", description = "Production server"),
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "orders", description = "Cart checkout and order tracking"),
        (name = "otp", description = "One-time-password payment confirmation"),
        (name = "payments", description = "Payment ledger for orders, appointments and advertisements")
    ),
    paths(
        // Orders
        crate::handlers::orders::checkout,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_fulfillment,

        // OTP confirmation
        crate::handlers::otp::send_otp,
        crate::handlers::otp::verify_otp,
        crate::handlers::otp::resend_otp,

        // Payments
        crate::handlers::payments::create_order_payment,
        crate::handlers::payments::create_appointment_payment,
        crate::handlers::payments::create_advertisement_payment,
        crate::handlers::payments::list_payments,
        crate::handlers::payments::update_payment_status,
        crate::handlers::payments::get_payment,

        // Catalog, cart and profile endpoints intentionally omitted for now
    ),
    components(
        schemas(
            // Order types
            crate::handlers::orders::CheckoutRequest,
            crate::handlers::orders::CheckoutResponse,
            crate::handlers::orders::OrderPayload,
            crate::handlers::orders::OrderItemPayload,
            crate::handlers::orders::OutOfStockPayload,
            crate::handlers::orders::OrderSummary,
            crate::handlers::orders::FulfillmentUpdateRequest,

            // OTP types
            crate::handlers::otp::SendOtpRequest,
            crate::handlers::otp::SendOtpResponse,
            crate::handlers::otp::VerifyOtpRequest,
            crate::handlers::otp::VerifyOtpResponse,
            crate::handlers::otp::OtpFailureResponse,

            // Payment types
            crate::handlers::payments::CreateOrderPaymentRequest,
            crate::handlers::payments::CreateAppointmentPaymentRequest,
            crate::handlers::payments::CreateAdvertisementPaymentRequest,
            crate::handlers::payments::UpdatePaymentStatusRequest,
            crate::handlers::payments::PaymentEnvelope,
            crate::handlers::payments::PaymentPayload,

            // Common types
            crate::handlers::common::PaginationMeta,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDoc;

/// Swagger UI serving the OpenAPI document at /docs
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_includes_pipeline_paths() {
        let openapi = ApiDoc::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("PawMart API"));
        assert!(json.contains("/api/v1/orders"));
        assert!(json.contains("/api/v1/otp/verify-otp"));
        assert!(json.contains("/api/v1/payments/appointment"));
    }

    #[test]
    fn legacy_field_casing_survives_schema_generation() {
        let openapi = ApiDoc::openapi();
        let json = serde_json::to_string(&openapi).unwrap();
        assert!(json.contains("resourceID"));
        assert!(json.contains("outOfStockItems"));
        assert!(json.contains("pointsRedeemed"));
    }
}
