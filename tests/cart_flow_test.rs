//! Integration tests for the cart endpoints.
//!
//! Covers the cart lifecycle end to end: lazy creation on first add, line
//! mutations, total recomputation from the catalog, and clearing.

mod common;

use axum::{body, http::Method, response::Response};
use common::TestApp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::str::FromStr;

async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

fn decimal(value: &Value) -> Decimal {
    Decimal::from_str(value.as_str().expect("decimal serialized as string"))
        .expect("parse decimal")
}

// ==================== Authentication ====================

#[tokio::test]
async fn cart_endpoints_require_authentication() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/carts", None, None).await;
    assert_eq!(response.status(), 401);

    let response = app
        .request(Method::POST, "/api/v1/carts", Some(json!({})), None)
        .await;
    assert_eq!(response.status(), 401);
}

// ==================== Adding items ====================

#[tokio::test]
async fn add_item_creates_cart_and_derives_line_amounts() {
    let app = TestApp::new().await;
    let user = app.seed_user("buyer@example.com", "user").await;
    let token = app.token_for(user.id, "user");
    let product = app
        .seed_product("Keyboard", dec!(19.99), dec!(0), 10)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/carts",
            Some(json!({ "productId": product.id, "quantity": 2 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    assert_eq!(body["cart"]["user_id"], user.id.to_string());
    assert_eq!(decimal(&body["cart"]["total_price"]), dec!(39.98));
    assert_eq!(
        decimal(&body["cart"]["total_price_after_discount"]),
        dec!(39.98)
    );

    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["product_id"], product.id.to_string());
    assert_eq!(items[0]["quantity"], 2);
    assert_eq!(decimal(&items[0]["line_price"]), dec!(39.98));
}

#[tokio::test]
async fn adding_same_product_increments_the_existing_line() {
    let app = TestApp::new().await;
    let user = app.seed_user("repeat@example.com", "user").await;
    let token = app.token_for(user.id, "user");
    let product = app.seed_product("Mouse", dec!(19.99), dec!(0), 10).await;

    app.request(
        Method::POST,
        "/api/v1/carts",
        Some(json!({ "productId": product.id, "quantity": 2 })),
        Some(&token),
    )
    .await;

    // Quantity defaults to 1 when omitted.
    let response = app
        .request(
            Method::POST,
            "/api/v1/carts",
            Some(json!({ "productId": product.id })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1, "same product lands on one line");
    assert_eq!(items[0]["quantity"], 3);
    assert_eq!(decimal(&items[0]["line_price"]), dec!(59.97));
    assert_eq!(decimal(&body["cart"]["total_price"]), dec!(59.97));
}

#[tokio::test]
async fn catalog_discount_flows_into_line_and_totals() {
    let app = TestApp::new().await;
    let user = app.seed_user("discount@example.com", "user").await;
    let token = app.token_for(user.id, "user");
    let product = app
        .seed_product("Headphones", dec!(100.00), dec!(10), 10)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/carts",
            Some(json!({ "productId": product.id, "quantity": 1 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    let items = body["items"].as_array().unwrap();
    assert_eq!(decimal(&items[0]["line_price"]), dec!(100.00));
    assert_eq!(decimal(&items[0]["line_price_after_discount"]), dec!(90.00));
    assert_eq!(decimal(&body["cart"]["total_price"]), dec!(100.00));
    assert_eq!(
        decimal(&body["cart"]["total_price_after_discount"]),
        dec!(90.00)
    );
}

#[tokio::test]
async fn zero_quantity_is_rejected() {
    let app = TestApp::new().await;
    let user = app.seed_user("zero@example.com", "user").await;
    let token = app.token_for(user.id, "user");
    let product = app.seed_product("Cable", dec!(5.00), dec!(0), 10).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/carts",
            Some(json!({ "productId": product.id, "quantity": 0 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn adding_unknown_product_is_not_found() {
    let app = TestApp::new().await;
    let user = app.seed_user("ghost@example.com", "user").await;
    let token = app.token_for(user.id, "user");

    let response = app
        .request(
            Method::POST,
            "/api/v1/carts",
            Some(json!({
                "productId": "00000000-0000-0000-0000-000000000000",
                "quantity": 1
            })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 404);
}

// ==================== Retrieval ====================

#[tokio::test]
async fn get_cart_without_one_is_not_found() {
    let app = TestApp::new().await;
    let user = app.seed_user("empty@example.com", "user").await;
    let token = app.token_for(user.id, "user");

    let response = app
        .request(Method::GET, "/api/v1/carts", None, Some(&token))
        .await;
    assert_eq!(response.status(), 404);

    let body = response_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("There is no cart for this user"));
}

// ==================== Updating lines ====================

#[tokio::test]
async fn update_item_quantity_recomputes_totals() {
    let app = TestApp::new().await;
    let user = app.seed_user("update@example.com", "user").await;
    let token = app.token_for(user.id, "user");
    let product = app.seed_product("Monitor", dec!(19.99), dec!(0), 10).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/carts",
            Some(json!({ "productId": product.id, "quantity": 2 })),
            Some(&token),
        )
        .await;
    let body = response_json(response).await;
    let item_id = body["items"][0]["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::PATCH,
            &format!("/api/v1/carts/{}", item_id),
            Some(json!({ "quantity": 5 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    assert_eq!(body["items"][0]["quantity"], 5);
    assert_eq!(decimal(&body["cart"]["total_price"]), dec!(99.95));
}

#[tokio::test]
async fn updating_a_line_not_in_the_cart_is_not_found() {
    let app = TestApp::new().await;
    let user = app.seed_user("noline@example.com", "user").await;
    let token = app.token_for(user.id, "user");
    let product = app.seed_product("Desk", dec!(50.00), dec!(0), 10).await;

    app.request(
        Method::POST,
        "/api/v1/carts",
        Some(json!({ "productId": product.id })),
        Some(&token),
    )
    .await;

    let response = app
        .request(
            Method::PATCH,
            "/api/v1/carts/00000000-0000-0000-0000-000000000000",
            Some(json!({ "quantity": 2 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 404);

    let body = response_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("No cart item found"));
}

// ==================== Removing lines ====================

#[tokio::test]
async fn remove_item_empties_line_and_zeroes_totals() {
    let app = TestApp::new().await;
    let user = app.seed_user("remove@example.com", "user").await;
    let token = app.token_for(user.id, "user");
    let product = app.seed_product("Lamp", dec!(25.00), dec!(0), 10).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/carts",
            Some(json!({ "productId": product.id, "quantity": 1 })),
            Some(&token),
        )
        .await;
    let body = response_json(response).await;
    let item_id = body["items"][0]["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/carts/{}", item_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    assert!(body["items"].as_array().unwrap().is_empty());
    assert_eq!(decimal(&body["cart"]["total_price"]), dec!(0));
}

#[tokio::test]
async fn removing_an_absent_line_is_a_silent_no_op() {
    let app = TestApp::new().await;
    let user = app.seed_user("absent@example.com", "user").await;
    let token = app.token_for(user.id, "user");
    let product = app.seed_product("Chair", dec!(80.00), dec!(0), 10).await;

    app.request(
        Method::POST,
        "/api/v1/carts",
        Some(json!({ "productId": product.id })),
        Some(&token),
    )
    .await;

    let response = app
        .request(
            Method::DELETE,
            "/api/v1/carts/00000000-0000-0000-0000-000000000000",
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
}

// ==================== Clearing ====================

#[tokio::test]
async fn clear_cart_deletes_it() {
    let app = TestApp::new().await;
    let user = app.seed_user("clear@example.com", "user").await;
    let token = app.token_for(user.id, "user");
    let product = app.seed_product("Webcam", dec!(45.00), dec!(0), 10).await;

    app.request(
        Method::POST,
        "/api/v1/carts",
        Some(json!({ "productId": product.id })),
        Some(&token),
    )
    .await;

    let response = app
        .request(Method::DELETE, "/api/v1/carts", None, Some(&token))
        .await;
    assert_eq!(response.status(), 204);

    let response = app
        .request(Method::GET, "/api/v1/carts", None, Some(&token))
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn clearing_without_a_cart_is_not_found() {
    let app = TestApp::new().await;
    let user = app.seed_user("no-cart@example.com", "user").await;
    let token = app.token_for(user.id, "user");

    let response = app
        .request(Method::DELETE, "/api/v1/carts", None, Some(&token))
        .await;
    assert_eq!(response.status(), 404);

    let body = response_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("There is no cart for this user"));
}
