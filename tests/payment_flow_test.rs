//! Integration tests for the payment ledger: order settlement paths,
//! appointment and advertisement fees, and referent-ownership guards.

mod common;

use axum::{body, http::Method, response::Response};
use common::{TestApp, TestUser};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("decimal serialized as string")
        .parse()
        .expect("decimal value")
}

/// Checkout with a product worth 300, redeeming `points` of the balance.
async fn place_order(app: &TestApp, user: &TestUser, points: i32) -> Uuid {
    // Truncate the uuid so the code fits the service's 32-char limit.
    let code = format!("FOOD-{}", &Uuid::new_v4().simple().to_string()[..27]);
    app.seed_product(&code, dec!(300), 5).await;
    app.add_to_cart(user, &code, 1).await;

    let response = app
        .request_as(
            user,
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "billingAddress": "7 Whisker Way, Pawville",
                "shippingAddress": "7 Whisker Way, Pawville",
                "paymentMethod": "card",
                "pointsRedeemed": points,
            })),
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    body["order"]["id"]
        .as_str()
        .expect("order id")
        .parse()
        .expect("order id is a uuid")
}

async fn loyalty_balance(app: &TestApp, user: &TestUser) -> i64 {
    let response = app
        .request_as(
            user,
            Method::GET,
            &format!("/api/v1/customers/{}/loyalty", user.id),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    body["loyalty_points"].as_i64().expect("points balance")
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn simulated_payment_settles_and_debits_points_once() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;
    app.grant_points(&user, 20).await;

    // 300 + 50 delivery - 200 discount leaves 150 due.
    let order_id = place_order(&app, &user, 20).await;

    let response = app
        .request_as(
            &user,
            Method::POST,
            "/api/v1/payments",
            Some(json!({
                "orderID": order_id,
                "amount": "150",
                "paymentType": "card",
                "simulate": true,
            })),
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["payment"]["status"], "success");
    assert!(body["payment"].get("paidAt").is_some());
    assert_eq!(decimal(&body["payment"]["amount"]), dec!(150));

    assert_eq!(loyalty_balance(&app, &user).await, 0);

    let response = app
        .request_as(
            &user,
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
        )
        .await;
    let body = response_json(response).await;
    assert_eq!(body["paymentStatus"], "success");

    // A second payment against the settled order confirms harmlessly: the
    // order already left pending, so the redeemed points stay debited once.
    let response = app
        .request_as(
            &user,
            Method::POST,
            "/api/v1/payments",
            Some(json!({
                "orderID": order_id,
                "amount": "150",
                "paymentType": "card",
                "simulate": true,
            })),
        )
        .await;
    assert_eq!(response.status(), 201);
    assert_eq!(loyalty_balance(&app, &user).await, 0);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn non_card_payment_settles_without_a_code() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;
    let order_id = place_order(&app, &user, 0).await;

    let response = app
        .request_as(
            &user,
            Method::POST,
            "/api/v1/payments",
            Some(json!({
                "orderID": order_id,
                "amount": "350",
                "paymentType": "cod",
            })),
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(body["payment"]["status"], "success");
    assert_eq!(body["payment"]["method"], "cod");
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn card_payment_stays_pending_until_confirmed() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;
    let order_id = place_order(&app, &user, 0).await;

    let response = app
        .request_as(
            &user,
            Method::POST,
            "/api/v1/payments",
            Some(json!({
                "orderID": order_id,
                "amount": "350",
                "paymentType": "card",
            })),
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(body["payment"]["status"], "pending");
    assert!(body["payment"].get("paidAt").is_none());
    let payment_id = body["payment"]["id"].as_str().expect("payment id").to_string();

    let response = app
        .request_as(
            &user,
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
        )
        .await;
    let body = response_json(response).await;
    assert_eq!(body["paymentStatus"], "pending");

    // Confirm through the status endpoint.
    let response = app
        .request_as(
            &user,
            Method::PUT,
            &format!("/api/v1/payments/{}", payment_id),
            Some(json!({ "status": "success" })),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["payment"]["status"], "success");

    // Confirming again is a no-op, not an error.
    let response = app
        .request_as(
            &user,
            Method::PUT,
            &format!("/api/v1/payments/{}", payment_id),
            Some(json!({ "status": "success" })),
        )
        .await;
    assert_eq!(response.status(), 200);

    // But a settled payment can no longer be failed.
    let response = app
        .request_as(
            &user,
            Method::PUT,
            &format!("/api/v1/payments/{}", payment_id),
            Some(json!({ "status": "failed" })),
        )
        .await;
    assert_eq!(response.status(), 409);

    // And only the two terminal states are accepted at all.
    let response = app
        .request_as(
            &user,
            Method::PUT,
            &format!("/api/v1/payments/{}", payment_id),
            Some(json!({ "status": "refunded" })),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert!(body["message"]
        .as_str()
        .expect("message")
        .contains("Unknown payment status: refunded"));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn failing_a_pending_payment_is_idempotent() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;
    let order_id = place_order(&app, &user, 0).await;

    let response = app
        .request_as(
            &user,
            Method::POST,
            "/api/v1/payments",
            Some(json!({
                "orderID": order_id,
                "amount": "350",
                "paymentType": "card",
            })),
        )
        .await;
    let body = response_json(response).await;
    let payment_id = body["payment"]["id"].as_str().expect("payment id").to_string();

    for _ in 0..2 {
        let response = app
            .request_as(
                &user,
                Method::PUT,
                &format!("/api/v1/payments/{}", payment_id),
                Some(json!({ "status": "failed" })),
            )
            .await;
        assert_eq!(response.status(), 200);
        let body = response_json(response).await;
        assert_eq!(body["payment"]["status"], "failed");
    }
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn appointment_payment_awards_package_points_once() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;

    let response = app
        .request_as(
            &user,
            Method::POST,
            "/api/v1/appointments",
            Some(json!({
                "service_name": "Full groom",
                "package": "premium",
            })),
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    let appointment_id = body["id"].as_str().expect("appointment id").to_string();
    assert_eq!(decimal(&body["amount"]), dec!(999));
    assert_eq!(body["payment_status"], "unpaid");
    assert_eq!(body["points_awarded"], 0);

    // No amount supplied: the package price is charged.
    let response = app
        .request_as(
            &user,
            Method::POST,
            "/api/v1/payments/appointment",
            Some(json!({
                "appointmentID": appointment_id,
                "paymentType": "card",
            })),
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(body["payment"]["status"], "success");
    assert_eq!(decimal(&body["payment"]["amount"]), dec!(999));

    assert_eq!(loyalty_balance(&app, &user).await, 10);

    let response = app
        .request_as(
            &user,
            Method::GET,
            &format!("/api/v1/appointments/{}", appointment_id),
            None,
        )
        .await;
    let body = response_json(response).await;
    assert_eq!(body["payment_status"], "paid");
    assert_eq!(body["points_awarded"], 10);

    // Paying again settles another ledger row but cannot re-award points.
    let response = app
        .request_as(
            &user,
            Method::POST,
            "/api/v1/payments/appointment",
            Some(json!({
                "appointmentID": appointment_id,
                "paymentType": "card",
            })),
        )
        .await;
    assert_eq!(response.status(), 201);
    assert_eq!(loyalty_balance(&app, &user).await, 10);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn advertisement_is_published_only_after_approval_and_payment() {
    let app = TestApp::new().await;
    let provider = TestUser::provider();
    let admin = TestUser::admin();

    let response = app
        .request_as(
            &provider,
            Method::POST,
            "/api/v1/advertisements",
            Some(json!({
                "title": "Dog walking in the city center",
                "body": "Weekday mornings, small dogs preferred.",
            })),
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    let ad_id = body["id"].as_str().expect("advertisement id").to_string();
    assert_eq!(decimal(&body["fee"]), dec!(250));
    assert_eq!(body["status"], "pending");
    assert_eq!(body["payment_status"], "pending");

    // Nothing on the public board yet.
    let response = app
        .request(Method::GET, "/api/v1/advertisements", None, None)
        .await;
    let body = response_json(response).await;
    assert_eq!(body["data"].as_array().expect("data").len(), 0);

    // Moderation is an admin affair.
    let response = app
        .request_as(
            &provider,
            Method::POST,
            &format!("/api/v1/advertisements/{}/approve", ad_id),
            None,
        )
        .await;
    assert_eq!(response.status(), 403);

    let response = app
        .request_as(
            &admin,
            Method::POST,
            &format!("/api/v1/advertisements/{}/approve", ad_id),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["status"], "approved");

    // Approved but unpaid stays off the board.
    let response = app
        .request(Method::GET, "/api/v1/advertisements", None, None)
        .await;
    let body = response_json(response).await;
    assert_eq!(body["data"].as_array().expect("data").len(), 0);

    let response = app
        .request_as(
            &provider,
            Method::POST,
            "/api/v1/payments/advertisement",
            Some(json!({
                "adId": ad_id,
                "paymentType": "card",
            })),
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(body["payment"]["status"], "success");
    assert_eq!(decimal(&body["payment"]["amount"]), dec!(250));

    let response = app
        .request(Method::GET, "/api/v1/advertisements", None, None)
        .await;
    let body = response_json(response).await;
    let listings = body["data"].as_array().expect("data");
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0]["id"].as_str().expect("id"), ad_id);

    // A verdict is final; re-moderating the listing conflicts.
    let response = app
        .request_as(
            &admin,
            Method::POST,
            &format!("/api/v1/advertisements/{}/reject", ad_id),
            None,
        )
        .await;
    assert_eq!(response.status(), 409);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn order_payment_requires_exactly_one_reference() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;
    let order_id = place_order(&app, &user, 0).await;

    let response = app
        .request_as(
            &user,
            Method::POST,
            "/api/v1/payments",
            Some(json!({
                "amount": "350",
                "paymentType": "card",
            })),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert!(body["message"]
        .as_str()
        .expect("message")
        .contains("Payment must reference exactly one"));

    // Older clients send the order id under `referenceId`.
    let response = app
        .request_as(
            &user,
            Method::POST,
            "/api/v1/payments",
            Some(json!({
                "referenceId": order_id,
                "amount": "350",
                "paymentType": "card",
                "simulate": true,
            })),
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(body["payment"]["referenceType"], "order");
    assert_eq!(body["payment"]["referenceId"], order_id.to_string());
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn supplied_amount_is_recorded_even_when_it_differs() {
    let app = TestApp::new().await;
    let user = TestUser::customer();
    app.register_customer(&user).await;
    let order_id = place_order(&app, &user, 0).await;

    // The canonical amount is 350; the mismatch is logged, not rejected.
    let response = app
        .request_as(
            &user,
            Method::POST,
            "/api/v1/payments",
            Some(json!({
                "orderID": order_id,
                "amount": "99",
                "paymentType": "card",
                "simulate": true,
            })),
        )
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(decimal(&body["payment"]["amount"]), dec!(99));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn payments_are_guarded_by_referent_ownership() {
    let app = TestApp::new().await;
    let owner = TestUser::customer();
    app.register_customer(&owner).await;
    let order_id = place_order(&app, &owner, 0).await;

    // A stranger cannot pay for, or read, someone else's order.
    let stranger = TestUser::customer();
    let response = app
        .request_as(
            &stranger,
            Method::POST,
            "/api/v1/payments",
            Some(json!({
                "orderID": order_id,
                "amount": "350",
                "paymentType": "card",
            })),
        )
        .await;
    assert_eq!(response.status(), 403);

    let response = app
        .request_as(
            &owner,
            Method::POST,
            "/api/v1/payments",
            Some(json!({
                "orderID": order_id,
                "amount": "350",
                "paymentType": "card",
            })),
        )
        .await;
    let body = response_json(response).await;
    let payment_id = body["payment"]["id"].as_str().expect("payment id").to_string();

    let response = app
        .request_as(
            &stranger,
            Method::GET,
            &format!("/api/v1/payments/{}", payment_id),
            None,
        )
        .await;
    assert_eq!(response.status(), 403);

    let admin = TestUser::admin();
    let response = app
        .request_as(
            &admin,
            Method::GET,
            &format!("/api/v1/payments/{}", payment_id),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);

    // The full ledger is admin-only.
    let response = app
        .request_as(&owner, Method::GET, "/api/v1/payments", None)
        .await;
    assert_eq!(response.status(), 403);

    let response = app
        .request_as(&admin, Method::GET, "/api/v1/payments", None)
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert!(body["pagination"]["total"].as_u64().expect("total") >= 1);

    // An order nobody placed is a 404 even for its would-be payer.
    let response = app
        .request_as(
            &owner,
            Method::POST,
            "/api/v1/payments",
            Some(json!({
                "orderID": Uuid::new_v4(),
                "amount": "10",
                "paymentType": "card",
            })),
        )
        .await;
    assert_eq!(response.status(), 404);
}
