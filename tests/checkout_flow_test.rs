//! Integration tests for the cart → checkout pipeline: stock reservation,
//! partial fulfillment, loyalty point clamping, and cart lifecycle.

mod common;

use axum::{body, http::Method, response::Response};
use common::{TestApp, TestUser};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Decimals travel as JSON strings; parse them so scale differences don't matter.
fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("decimal serialized as string")
        .parse()
        .expect("decimal value")
}

fn checkout_body() -> Value {
    json!({
        "billingAddress": "12 Bark Lane, Pawville",
        "shippingAddress": "12 Bark Lane, Pawville",
        "paymentMethod": "card",
    })
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn checkout_converts_cart_into_an_order() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;
    app.seed_product("LEASH-RED", dec!(100), 10).await;
    app.add_to_cart(&user, "LEASH-RED", 2).await;

    let response = app
        .request_as(&user, Method::POST, "/api/v1/orders", Some(checkout_body()))
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;

    assert_eq!(body["message"], "Order placed successfully");
    assert!(body.get("outOfStockItems").is_none());

    let order = &body["order"];
    assert_eq!(decimal(&order["subtotal"]), dec!(200));
    assert_eq!(decimal(&order["deliveryFee"]), dec!(50));
    assert_eq!(decimal(&order["discount"]), Decimal::ZERO);
    assert_eq!(decimal(&order["total"]), dec!(250));
    assert_eq!(order["pointsRedeemed"], 0);
    assert_eq!(order["paymentStatus"], "pending");
    assert_eq!(order["items"][0]["productCode"], "LEASH-RED");
    assert_eq!(order["items"][0]["quantity"], 2);

    // The cart is emptied and the stock reserved in the same transaction.
    let cart = app
        .state
        .services
        .carts
        .get_with_items(user.id)
        .await
        .expect("cart");
    assert!(cart.items.is_empty());
    assert_eq!(cart.cart.subtotal, Decimal::ZERO);

    let remaining = app
        .state
        .services
        .inventory
        .available("LEASH-RED")
        .await
        .expect("stock");
    assert_eq!(remaining, 8);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn checkout_grants_partial_quantities_and_reports_shortfalls() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;
    app.seed_product("TUG-TOY", dec!(40), 1).await;
    app.add_to_cart(&user, "TUG-TOY", 3).await;

    let response = app
        .request_as(&user, Method::POST, "/api/v1/orders", Some(checkout_body()))
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;

    let short = &body["outOfStockItems"][0];
    assert_eq!(short["productCode"], "TUG-TOY");
    assert_eq!(short["requested"], 3);
    assert_eq!(short["granted"], 1);
    assert_eq!(short["reason"], "only 1 of 3 available");

    // The order carries the granted quantity and is priced accordingly.
    let order = &body["order"];
    assert_eq!(order["items"][0]["quantity"], 1);
    assert_eq!(decimal(&order["subtotal"]), dec!(40));
    assert_eq!(decimal(&order["total"]), dec!(90));

    let remaining = app
        .state
        .services
        .inventory
        .available("TUG-TOY")
        .await
        .expect("stock");
    assert_eq!(remaining, 0);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn checkout_drops_vanished_products_but_keeps_the_rest() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;
    app.seed_product("BED-L", dec!(150), 5).await;
    app.seed_product("RETIRED-BOWL", dec!(20), 5).await;
    app.add_to_cart(&user, "BED-L", 1).await;
    app.add_to_cart(&user, "RETIRED-BOWL", 2).await;

    // The bowl disappears from the catalog between carting and checkout.
    app.state
        .services
        .products
        .deactivate("RETIRED-BOWL")
        .await
        .expect("deactivate product");

    let response = app
        .request_as(&user, Method::POST, "/api/v1/orders", Some(checkout_body()))
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;

    let short = &body["outOfStockItems"][0];
    assert_eq!(short["productCode"], "RETIRED-BOWL");
    assert_eq!(short["granted"], 0);
    assert_eq!(short["reason"], "no longer available");

    let order = &body["order"];
    assert_eq!(order["items"].as_array().expect("items").len(), 1);
    assert_eq!(order["items"][0]["productCode"], "BED-L");
    assert_eq!(decimal(&order["subtotal"]), dec!(150));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn checkout_with_nothing_in_stock_leaves_cart_and_stock_alone() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;
    app.seed_product("SOLD-OUT-COAT", dec!(80), 0).await;
    app.add_to_cart(&user, "SOLD-OUT-COAT", 2).await;

    let response = app
        .request_as(&user, Method::POST, "/api/v1/orders", Some(checkout_body()))
        .await;
    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert_eq!(
        body["message"],
        "None of the requested items are currently in stock"
    );

    // The failed attempt must not consume the cart.
    let cart = app
        .state
        .services
        .carts
        .get_with_items(user.id)
        .await
        .expect("cart");
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 2);

    let remaining = app
        .state
        .services
        .inventory
        .available("SOLD-OUT-COAT")
        .await
        .expect("stock");
    assert_eq!(remaining, 0);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn checkout_requires_a_registered_customer_and_a_nonempty_cart() {
    let app = TestApp::new().await;
    let stranger = TestUser::customer();

    let response = app
        .request_as(
            &stranger,
            Method::POST,
            "/api/v1/orders",
            Some(checkout_body()),
        )
        .await;
    assert_eq!(response.status(), 404);

    let registered = TestUser::customer();
    app.register_customer(&registered).await;
    let response = app
        .request_as(
            &registered,
            Method::POST,
            "/api/v1/orders",
            Some(checkout_body()),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert_eq!(body["message"], "Cart is empty");
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn checkout_clamps_redeemed_points_to_the_balance() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;
    app.grant_points(&user, 20).await;
    app.seed_product("SHAMPOO-XL", dec!(100), 5).await;
    app.add_to_cart(&user, "SHAMPOO-XL", 1).await;

    let mut payload = checkout_body();
    payload["pointsRedeemed"] = json!(50);

    let response = app
        .request_as(&user, Method::POST, "/api/v1/orders", Some(payload))
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;

    // 20 points at a value of 10 each wipe out the 150 due.
    let order = &body["order"];
    assert_eq!(order["pointsRedeemed"], 20);
    assert_eq!(decimal(&order["discount"]), dec!(200));
    assert_eq!(decimal(&order["total"]), Decimal::ZERO);

    // The balance is only debited when the payment settles.
    let response = app
        .request_as(
            &user,
            Method::GET,
            &format!("/api/v1/customers/{}/loyalty", user.id),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
    let balance = response_json(response).await;
    assert_eq!(balance["loyalty_points"], 20);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn checkout_trusts_the_server_side_subtotal_over_the_claim() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;
    app.seed_product("COLLAR-S", dec!(100), 5).await;
    app.add_to_cart(&user, "COLLAR-S", 1).await;

    let mut payload = checkout_body();
    payload["subtotal"] = json!("1");

    let response = app
        .request_as(&user, Method::POST, "/api/v1/orders", Some(payload))
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(decimal(&body["order"]["subtotal"]), dec!(100));
    assert_eq!(decimal(&body["order"]["total"]), dec!(150));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn orders_are_hidden_from_other_customers() {
    let app = TestApp::new().await;
    let owner = TestUser::customer();
    app.register_customer(&owner).await;
    app.seed_product("TREATS-BAG", dec!(30), 5).await;
    app.add_to_cart(&owner, "TREATS-BAG", 1).await;

    let response = app
        .request_as(&owner, Method::POST, "/api/v1/orders", Some(checkout_body()))
        .await;
    let body = response_json(response).await;
    let order_id = body["order"]["id"].as_str().expect("order id").to_string();

    let other = TestUser::customer();
    let response = app
        .request_as(
            &other,
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), 403);

    let admin = TestUser::admin();
    let response = app
        .request_as(
            &admin,
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
}
