//! Integration tests for order queries, admin maintenance, and the
//! post-checkout redirect.

mod common;

use axum::{body, http::Method, response::Response};
use cartflow_api::entities::{order, order_item};
use chrono::{Duration, Utc};
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use serde_json::{json, Value};
use uuid::Uuid;

async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Inserts a materialized order with one line, `age` in the past so list
/// ordering is deterministic.
async fn seed_order(app: &TestApp, user_id: Uuid, age: Duration) -> order::Model {
    let created = Utc::now() - age;
    let order_id = Uuid::new_v4();
    let placed = order::ActiveModel {
        id: Set(order_id),
        user_id: Set(user_id),
        first_name: Set("Amira".to_string()),
        last_name: Set("Hassan".to_string()),
        phone: Set("+201000000000".to_string()),
        total_price: Set(dec!(49.98)),
        shipping_price: Set(dec!(10.00)),
        shipping_country: Set(Some("Egypt".to_string())),
        shipping_address: Set(Some("12 Nile St".to_string())),
        shipping_governorate: Set(Some("Cairo".to_string())),
        shipping_city: Set(Some("Giza".to_string())),
        status: Set("processing".to_string()),
        payment_status: Set("paid".to_string()),
        payment_method_type: Set("card".to_string()),
        created_at: Set(created),
        updated_at: Set(created),
    }
    .insert(&*app.state.db)
    .await
    .expect("seed order");

    order_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        product_id: Set(Uuid::new_v4()),
        quantity: Set(2),
        line_price: Set(dec!(39.98)),
        line_price_after_discount: Set(dec!(39.98)),
        created_at: Set(created),
    }
    .insert(&*app.state.db)
    .await
    .expect("seed order line");

    placed
}

// ==================== Listing ====================

#[tokio::test]
async fn users_only_see_their_own_orders() {
    let app = TestApp::new().await;
    let alice = app.seed_user("alice@example.com", "user").await;
    let bob = app.seed_user("bob@example.com", "user").await;
    seed_order(&app, alice.id, Duration::minutes(2)).await;
    seed_order(&app, bob.id, Duration::minutes(1)).await;

    let token = app.token_for(alice.id, "user");
    let response = app
        .request(Method::GET, "/api/v1/orders", None, Some(&token))
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    assert_eq!(body["total"], 1);
    let orders = body["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(
        orders[0]["order"]["user_id"].as_str().unwrap(),
        alice.id.to_string()
    );
    assert_eq!(orders[0]["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn admins_see_every_order_newest_first() {
    let app = TestApp::new().await;
    let alice = app.seed_user("alice@example.com", "user").await;
    let bob = app.seed_user("bob@example.com", "user").await;
    let older = seed_order(&app, alice.id, Duration::minutes(10)).await;
    let newer = seed_order(&app, bob.id, Duration::minutes(1)).await;

    let admin = app.seed_user("admin@example.com", "admin").await;
    let token = app.token_for(admin.id, "admin");
    let response = app
        .request(Method::GET, "/api/v1/orders", None, Some(&token))
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    assert_eq!(body["total"], 2);
    let orders = body["orders"].as_array().unwrap();
    assert_eq!(
        orders[0]["order"]["id"].as_str().unwrap(),
        newer.id.to_string()
    );
    assert_eq!(
        orders[1]["order"]["id"].as_str().unwrap(),
        older.id.to_string()
    );
}

#[tokio::test]
async fn listing_paginates() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("bulk@example.com", "user").await;
    for i in 0..5 {
        seed_order(&app, buyer.id, Duration::minutes(i)).await;
    }

    let token = app.token_for(buyer.id, "user");
    let response = app
        .request(
            Method::GET,
            "/api/v1/orders?page=2&per_page=2",
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    assert_eq!(body["total"], 5);
    assert_eq!(body["page"], 2);
    assert_eq!(body["per_page"], 2);
    assert_eq!(body["orders"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn listing_requires_authentication() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/orders", None, None).await;
    assert_eq!(response.status(), 401);
}

// ==================== Single order ====================

#[tokio::test]
async fn a_user_fetches_their_order_with_its_lines() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com", "user").await;
    let placed = seed_order(&app, buyer.id, Duration::minutes(1)).await;

    let token = app.token_for(buyer.id, "user");
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", placed.id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    assert_eq!(body["order"]["id"].as_str().unwrap(), placed.id.to_string());
    assert_eq!(body["order"]["status"], "processing");
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["items"][0]["quantity"], 2);
}

#[tokio::test]
async fn someone_elses_order_reads_as_not_found() {
    let app = TestApp::new().await;
    let owner = app.seed_user("owner@example.com", "user").await;
    let placed = seed_order(&app, owner.id, Duration::minutes(1)).await;

    let intruder = app.seed_user("intruder@example.com", "user").await;
    let token = app.token_for(intruder.id, "user");
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", placed.id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 404);

    let body = response_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("You don't have an order"));
}

#[tokio::test]
async fn admins_get_the_admin_not_found_wording() {
    let app = TestApp::new().await;
    let admin = app.seed_user("admin@example.com", "admin").await;
    let token = app.token_for(admin.id, "admin");

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", Uuid::new_v4()),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 404);

    let body = response_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("There is no order"));
}

// ==================== Admin maintenance ====================

#[tokio::test]
async fn only_admins_may_update_or_delete() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com", "user").await;
    let placed = seed_order(&app, buyer.id, Duration::minutes(1)).await;
    let token = app.token_for(buyer.id, "user");

    let response = app
        .request(
            Method::PATCH,
            &format!("/api/v1/orders/{}", placed.id),
            Some(json!({ "status": "delivered" })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 403);

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/orders/{}", placed.id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn admins_update_status_fields() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com", "user").await;
    let placed = seed_order(&app, buyer.id, Duration::minutes(1)).await;

    let admin = app.seed_user("admin@example.com", "admin").await;
    let token = app.token_for(admin.id, "admin");
    let response = app
        .request(
            Method::PATCH,
            &format!("/api/v1/orders/{}", placed.id),
            Some(json!({ "status": "delivered", "paymentStatus": "refunded" })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    assert_eq!(body["status"], "delivered");
    assert_eq!(body["payment_status"], "refunded");
    assert_eq!(body["payment_method_type"], "card");

    // The buyer sees the new status too.
    let buyer_token = app.token_for(buyer.id, "user");
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", placed.id),
            None,
            Some(&buyer_token),
        )
        .await;
    let body = response_json(response).await;
    assert_eq!(body["order"]["status"], "delivered");
}

#[tokio::test]
async fn updating_a_missing_order_is_not_found() {
    let app = TestApp::new().await;
    let admin = app.seed_user("admin@example.com", "admin").await;
    let token = app.token_for(admin.id, "admin");

    let response = app
        .request(
            Method::PATCH,
            &format!("/api/v1/orders/{}", Uuid::new_v4()),
            Some(json!({ "status": "delivered" })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn admins_delete_an_order_and_its_lines() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com", "user").await;
    let placed = seed_order(&app, buyer.id, Duration::minutes(1)).await;

    let admin = app.seed_user("admin@example.com", "admin").await;
    let token = app.token_for(admin.id, "admin");
    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/orders/{}", placed.id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 204);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", placed.id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), 404);

    let remaining = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(placed.id))
        .count(&*app.state.db)
        .await
        .expect("count lines");
    assert_eq!(remaining, 0);
}

// ==================== Redirect ====================

#[tokio::test]
async fn redirect_forwards_the_checkout_status() {
    let app = TestApp::new().await;
    let frontend = app.state.config.checkout.frontend_redirect_url.clone();

    let response = app
        .request(
            Method::GET,
            "/api/v1/orders/redirect?status=cancel",
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), 303);
    assert_eq!(
        response.headers()["location"],
        format!("{}?status=cancel", frontend)
    );
}

#[tokio::test]
async fn redirect_defaults_to_success() {
    let app = TestApp::new().await;
    let frontend = app.state.config.checkout.frontend_redirect_url.clone();

    let response = app
        .request(Method::GET, "/api/v1/orders/redirect", None, None)
        .await;
    assert_eq!(response.status(), 303);
    assert_eq!(
        response.headers()["location"],
        format!("{}?status=success", frontend)
    );

    // Anything unrecognized also lands on success.
    let response = app
        .request(
            Method::GET,
            "/api/v1/orders/redirect?status=weird",
            None,
            None,
        )
        .await;
    assert_eq!(
        response.headers()["location"],
        format!("{}?status=success", frontend)
    );
}
