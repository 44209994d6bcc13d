use crate::handlers::common::{
    created_response, map_service_error, success_response, validate_input, PaginatedResponse,
    PaginationParams,
};
use crate::{
    auth::AuthenticatedUser,
    entities::{
        order::{self, FulfillmentStatus, OrderPaymentStatus},
        order_item,
    },
    errors::{ApiError, ServiceError},
    services::orders::{CheckoutInput, CheckoutOutcome, OutOfStockItem},
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

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(checkout).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/fulfillment", put(update_fulfillment))
}

/// Place an order from the caller's cart
///
/// Partial fulfillment is not an error: lines the stock cannot cover come
/// back in `outOfStockItems` and the order carries whatever was granted.
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Checkout",
    description = "Converts the caller's cart into an order, reserving stock and clamping redeemed points to the available balance",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created", body = CheckoutResponse),
        (status = 400, description = "Cart empty or nothing fulfillable", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Customer not registered", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let input = CheckoutInput {
        billing_address: payload.billing_address,
        shipping_address: payload.shipping_address,
        payment_method: payload.payment_method,
        points_redeemed: payload.points_redeemed.unwrap_or(0),
        claimed_subtotal: payload.subtotal,
    };

    let outcome = state
        .services
        .orders
        .checkout(user.id, input)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(CheckoutResponse::from_outcome(outcome)))
}

/// List the caller's orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    params(PaginationParams),
    responses(
        (status = 200, description = "Order history page", body = PaginatedResponse<OrderSummary>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (orders, total) = state
        .services
        .orders
        .list_for_customer(user.id, pagination.page, pagination.per_page)
        .await
        .map_err(map_service_error)?;

    let data = orders.into_iter().map(OrderSummary::from).collect();
    Ok(success_response(PaginatedResponse::new(
        data,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

/// Get one order with its lines; owner or admin only
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with line items", body = OrderPayload),
        (status = 403, description = "Not the order's owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let found = state
        .services
        .orders
        .get(id)
        .await
        .map_err(map_service_error)?;

    if !user.can_access(found.order.customer_id) {
        return Err(map_service_error(ServiceError::Forbidden(
            "orders are only visible to their owner".to_string(),
        )));
    }

    Ok(success_response(OrderPayload::from_parts(
        found.order,
        found.items,
    )))
}

/// Advance fulfillment; admin only
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/fulfillment",
    summary = "Update fulfillment status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = FulfillmentUpdateRequest,
    responses(
        (status = 200, description = "Updated order", body = OrderSummary),
        (status = 400, description = "Unknown status value", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn update_fulfillment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<FulfillmentUpdateRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    user.require_admin().map_err(map_service_error)?;

    let status = FulfillmentStatus::from_str(&payload.status).map_err(|_| {
        map_service_error(ServiceError::ValidationError(format!(
            "Unknown fulfillment status: {}",
            payload.status
        )))
    })?;

    let updated = state
        .services
        .orders
        .update_fulfillment(id, status)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(OrderSummary::from(updated)))
}

// Wire DTOs (legacy contract: camelCase field names)

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[validate(length(min = 1, max = 500))]
    pub billing_address: String,
    #[validate(length(min = 1, max = 500))]
    pub shipping_address: String,
    #[validate(length(min = 1, max = 40))]
    pub payment_method: String,
    #[serde(default)]
    pub points_redeemed: Option<i32>,
    /// Client-side subtotal; compared against the server's computation
    #[serde(default)]
    pub subtotal: Option<Decimal>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub message: String,
    pub order: OrderPayload,
    #[serde(rename = "outOfStockItems", skip_serializing_if = "Option::is_none")]
    pub out_of_stock_items: Option<Vec<OutOfStockPayload>>,
}

impl CheckoutResponse {
    fn from_outcome(outcome: CheckoutOutcome) -> Self {
        let out_of_stock_items = if outcome.out_of_stock_items.is_empty() {
            None
        } else {
            Some(
                outcome
                    .out_of_stock_items
                    .into_iter()
                    .map(OutOfStockPayload::from)
                    .collect(),
            )
        };
        Self {
            message: "Order placed successfully".to_string(),
            order: OrderPayload::from_parts(outcome.order, outcome.items),
            out_of_stock_items,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub billing_address: String,
    pub shipping_address: String,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub points_redeemed: i32,
    pub discount: Decimal,
    pub total: Decimal,
    pub payment_method: String,
    #[schema(value_type = String)]
    pub payment_status: OrderPaymentStatus,
    #[schema(value_type = String)]
    pub fulfillment_status: FulfillmentStatus,
    pub items: Vec<OrderItemPayload>,
    pub created_at: DateTime<Utc>,
}

impl OrderPayload {
    fn from_parts(order: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            customer_id: order.customer_id,
            billing_address: order.billing_address,
            shipping_address: order.shipping_address,
            subtotal: order.subtotal,
            delivery_fee: order.delivery_fee,
            points_redeemed: order.points_redeemed,
            discount: order.discount,
            total: order.total,
            payment_method: order.payment_method,
            payment_status: order.payment_status,
            fulfillment_status: order.fulfillment_status,
            items: items.into_iter().map(OrderItemPayload::from).collect(),
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemPayload {
    pub product_code: String,
    pub name: String,
    pub price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub quantity: i32,
}

impl From<order_item::Model> for OrderItemPayload {
    fn from(item: order_item::Model) -> Self {
        Self {
            product_code: item.product_code,
            name: item.name,
            price: item.price,
            image_url: item.image_url,
            quantity: item.quantity,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OutOfStockPayload {
    pub product_code: String,
    pub name: String,
    pub requested: i32,
    pub granted: i32,
    pub reason: String,
}

impl From<OutOfStockItem> for OutOfStockPayload {
    fn from(item: OutOfStockItem) -> Self {
        Self {
            product_code: item.product_code,
            name: item.name,
            requested: item.requested,
            granted: item.granted,
            reason: item.reason,
        }
    }
}

/// Order without its lines, for list views
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: Uuid,
    pub order_number: String,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub points_redeemed: i32,
    pub discount: Decimal,
    pub total: Decimal,
    #[schema(value_type = String)]
    pub payment_status: OrderPaymentStatus,
    #[schema(value_type = String)]
    pub fulfillment_status: FulfillmentStatus,
    pub created_at: DateTime<Utc>,
}

impl From<order::Model> for OrderSummary {
    fn from(order: order::Model) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            subtotal: order.subtotal,
            delivery_fee: order.delivery_fee,
            points_redeemed: order.points_redeemed,
            discount: order.discount,
            total: order.total,
            payment_status: order.payment_status,
            fulfillment_status: order.fulfillment_status,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FulfillmentUpdateRequest {
    pub status: String,
}
