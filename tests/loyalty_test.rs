//! Integration tests for loyalty point reconciliation: conditional debits,
//! email-keyed credits, and the settle-once guarantee across payment paths.

mod common;

use axum::{body, http::Method, response::Response};
use common::{TestApp, TestUser};
use pawmart_api::entities::payment::PaymentReferenceType;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn debit_takes_the_requested_points() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;
    app.grant_points(&user, 50).await;

    let taken = app
        .state
        .services
        .loyalty
        .debit(user.id, 30)
        .await
        .expect("debit");
    assert_eq!(taken, 30);

    let balance = app
        .state
        .services
        .loyalty
        .balance(user.id)
        .await
        .expect("balance");
    assert_eq!(balance, 20);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn debit_clamps_when_the_balance_fell_short() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;
    app.grant_points(&user, 50).await;

    // Asking for more than is left empties the balance and reports what
    // was actually taken.
    let taken = app
        .state
        .services
        .loyalty
        .debit(user.id, 80)
        .await
        .expect("debit");
    assert_eq!(taken, 50);

    let balance = app
        .state
        .services
        .loyalty
        .balance(user.id)
        .await
        .expect("balance");
    assert_eq!(balance, 0);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn nonpositive_debits_and_credits_are_no_ops() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;
    app.grant_points(&user, 15).await;

    let loyalty = &app.state.services.loyalty;
    assert_eq!(loyalty.debit(user.id, 0).await.expect("debit zero"), 0);
    assert_eq!(loyalty.debit(user.id, -5).await.expect("debit negative"), 0);
    assert!(!loyalty
        .credit(&user.email, 0)
        .await
        .expect("credit zero"));

    assert_eq!(loyalty.balance(user.id).await.expect("balance"), 15);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn credit_skips_emails_without_a_customer_record() {
    let app = TestApp::new().await;

    let credited = app
        .state
        .services
        .loyalty
        .credit("ghost@example.com", 10)
        .await
        .expect("credit");
    assert!(!credited);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn credits_accumulate_on_the_balance() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;

    let loyalty = &app.state.services.loyalty;
    assert!(loyalty.credit(&user.email, 5).await.expect("first credit"));
    assert!(loyalty.credit(&user.email, 7).await.expect("second credit"));
    assert_eq!(loyalty.balance(user.id).await.expect("balance"), 12);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn redeemed_points_are_debited_once_across_settlement_paths() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;
    app.grant_points(&user, 30).await;
    app.seed_product("SPA-DAY", dec!(100), 3).await;
    app.add_to_cart(&user, "SPA-DAY", 1).await;

    let response = app
        .request_as(
            &user,
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "billingAddress": "3 Fetch Court, Pawville",
                "shippingAddress": "3 Fetch Court, Pawville",
                "paymentMethod": "card",
                "pointsRedeemed": 10,
            })),
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    let order_id: uuid::Uuid = body["order"]["id"]
        .as_str()
        .expect("order id")
        .parse()
        .expect("order id is a uuid");
    assert_eq!(body["order"]["pointsRedeemed"], 10);

    // Settle through the OTP path first.
    app.request(
        Method::POST,
        "/api/v1/otp/send-otp",
        Some(json!({
            "resourceType": "order",
            "resourceID": order_id,
            "email": user.email,
        })),
        None,
    )
    .await;
    let code = app
        .stored_otp_code(PaymentReferenceType::Order, order_id)
        .await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/otp/verify-otp",
            Some(json!({
                "resourceType": "order",
                "resourceID": order_id,
                "otp": code,
            })),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);

    let balance = app
        .state
        .services
        .loyalty
        .balance(user.id)
        .await
        .expect("balance");
    assert_eq!(balance, 20);

    // A second settlement through the direct payment path finds the order
    // already paid and leaves the balance alone.
    let response = app
        .request_as(
            &user,
            Method::POST,
            "/api/v1/payments",
            Some(json!({
                "orderID": order_id,
                "amount": "50",
                "paymentType": "card",
                "simulate": true,
            })),
        )
        .await;
    assert_eq!(response.status(), 201);

    let balance = app
        .state
        .services
        .loyalty
        .balance(user.id)
        .await
        .expect("balance");
    assert_eq!(balance, 20);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn balances_are_visible_to_their_owner_and_admins_only() {
    let app = TestApp::new().await;
    let owner = TestUser::customer();
    app.register_customer(&owner).await;
    app.grant_points(&owner, 5).await;

    let uri = format!("/api/v1/customers/{}/loyalty", owner.id);

    let stranger = TestUser::customer();
    let response = app.request_as(&stranger, Method::GET, &uri, None).await;
    assert_eq!(response.status(), 403);

    let admin = TestUser::admin();
    let response = app.request_as(&admin, Method::GET, &uri, None).await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["loyalty_points"], 5);

    let response = app.request_as(&owner, Method::GET, &uri, None).await;
    assert_eq!(response.status(), 200);
}
