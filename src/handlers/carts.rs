use crate::handlers::common::{no_content_response, success_response, validate_input};
use crate::{
    auth::AuthenticatedUser,
    errors::{ErrorResponse, ServiceError},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::Response,
    routing::{delete, get, patch, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(add_to_cart))
        .route("/", get(get_cart))
        .route("/", delete(clear_cart))
        .route("/apply-coupon", post(apply_coupon))
        .route("/:item_id", patch(update_item_quantity))
        .route("/:item_id", delete(remove_item))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1))]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateItemRequest {
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1))]
    pub coupon_code: String,
}

/// Add a product to the caller's cart, creating the cart if none exists
#[utoipa::path(
    post,
    path = "/api/v1/carts",
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Cart with the new or incremented line"),
        (status = 400, description = "Invalid quantity", body = ErrorResponse),
        (status = 404, description = "Product not found", body = ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Carts"
)]
pub async fn add_to_cart(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<AddItemRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .carts
        .add_item(user.user_id, payload.product_id, payload.quantity)
        .await?;

    Ok(success_response(cart))
}

/// Get the caller's cart with items
#[utoipa::path(
    get,
    path = "/api/v1/carts",
    responses(
        (status = 200, description = "The caller's cart with its lines"),
        (status = 404, description = "Caller has no cart", body = ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Carts"
)]
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Response, ServiceError> {
    let cart = state.services.carts.get_cart(user.user_id).await?;
    Ok(success_response(cart))
}

/// Set the quantity of one cart line
#[utoipa::path(
    patch,
    path = "/api/v1/carts/{item_id}",
    params(
        ("item_id" = Uuid, Path, description = "Cart line ID")
    ),
    request_body = UpdateItemRequest,
    responses(
        (status = 200, description = "Cart with the line re-derived"),
        (status = 400, description = "Invalid quantity", body = ErrorResponse),
        (status = 404, description = "No such line in the caller's cart", body = ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Carts"
)]
pub async fn update_item_quantity(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateItemRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .carts
        .update_item_quantity(user.user_id, item_id, payload.quantity)
        .await?;

    Ok(success_response(cart))
}

/// Remove one line from the caller's cart
#[utoipa::path(
    delete,
    path = "/api/v1/carts/{item_id}",
    params(
        ("item_id" = Uuid, Path, description = "Cart line ID")
    ),
    responses(
        (status = 200, description = "Cart after removal; removing an absent line changes nothing"),
        (status = 404, description = "Caller has no cart", body = ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Carts"
)]
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(item_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let cart = state
        .services
        .carts
        .remove_item(user.user_id, item_id)
        .await?;

    Ok(success_response(cart))
}

/// Delete the caller's cart entirely
#[utoipa::path(
    delete,
    path = "/api/v1/carts",
    responses(
        (status = 204, description = "Cart deleted"),
        (status = 404, description = "No cart exists for the caller", body = ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Carts"
)]
pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Response, ServiceError> {
    state.services.carts.clear(user.user_id).await?;
    Ok(no_content_response())
}

/// Apply a coupon code to the caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/carts/apply-coupon",
    request_body = ApplyCouponRequest,
    responses(
        (status = 200, description = "Cart totals rescaled by the coupon"),
        (status = 400, description = "Unknown or expired coupon code", body = ErrorResponse),
        (status = 404, description = "Caller has no cart", body = ErrorResponse),
        (status = 409, description = "Cart already has a coupon", body = ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Carts"
)]
pub async fn apply_coupon(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<ApplyCouponRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .carts
        .apply_coupon(user.user_id, &payload.coupon_code)
        .await?;

    Ok(success_response(cart))
}
