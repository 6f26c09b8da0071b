use crate::handlers::common::{no_content_response, success_response, PaginationParams};
use crate::{
    auth::{auth_middleware, AuthenticatedUser, JwtVerifier},
    errors::{ErrorResponse, ServiceError},
    services::{checkout::CheckoutRequest, orders::UpdateOrderRequest},
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    middleware,
    response::{Redirect, Response},
    routing::{delete, get, patch, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for order endpoints. The gateway sends buyers back to
/// `/redirect` with no credentials, so that route stays outside the auth
/// layer.
pub fn orders_routes(verifier: JwtVerifier) -> Router<Arc<AppState>> {
    let protected = Router::new()
        .route("/checkout-session/:cart_id", post(create_checkout_session))
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id", patch(update_order))
        .route("/:id", delete(delete_order))
        .route_layer(middleware::from_fn_with_state(verifier, auth_middleware));

    Router::new()
        .route("/redirect", get(redirect_after_checkout))
        .merge(protected)
}

#[derive(Debug, Deserialize)]
pub struct RedirectParams {
    pub status: Option<String>,
}

/// Start a hosted checkout session for one of the caller's carts
#[utoipa::path(
    post,
    path = "/api/v1/orders/checkout-session/{cart_id}",
    params(
        ("cart_id" = Uuid, Path, description = "Cart ID")
    ),
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Hosted checkout session created"),
        (status = 400, description = "Missing buyer or shipping details", body = ErrorResponse),
        (status = 404, description = "Cart not found", body = ErrorResponse),
        (status = 502, description = "Payment gateway failure", body = ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn create_checkout_session(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<Response, ServiceError> {
    let session = state
        .services
        .checkout
        .create_checkout_session(user.user_id, cart_id, payload)
        .await?;

    Ok(success_response(session))
}

/// Terminal redirect the gateway sends buyers to after checkout. No state
/// changes here; fulfillment is driven solely by the webhook.
#[utoipa::path(
    get,
    path = "/api/v1/orders/redirect",
    params(
        ("status" = Option<String>, Query, description = "success or cancel")
    ),
    responses(
        (status = 303, description = "Redirect to the storefront")
    ),
    tag = "Orders"
)]
pub async fn redirect_after_checkout(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RedirectParams>,
) -> Redirect {
    let status = match params.status.as_deref() {
        Some("cancel") => "cancel",
        _ => "success",
    };
    let target = format!(
        "{}?status={}",
        state.config.checkout.frontend_redirect_url, status
    );
    Redirect::to(&target)
}

/// List orders; users see their own, admins see everything
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(PaginationParams),
    responses(
        (status = 200, description = "Orders for the caller"),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(pagination): Query<PaginationParams>,
) -> Result<Response, ServiceError> {
    let orders = state
        .services
        .orders
        .list_orders(
            user.user_id,
            user.is_admin(),
            pagination.page,
            pagination.per_page,
        )
        .await?;

    Ok(success_response(orders))
}

/// Fetch one order with the caller's role filter applied
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Order with line items"),
        (status = 404, description = "No such order for this caller", body = ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(user.user_id, user.is_admin(), id)
        .await?;

    Ok(success_response(order))
}

/// Admin: update an order's status fields
#[utoipa::path(
    patch,
    path = "/api/v1/orders/{id}",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    request_body = UpdateOrderRequest,
    responses(
        (status = 200, description = "Order updated"),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
        (status = 404, description = "Order not found", body = ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn update_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderRequest>,
) -> Result<Response, ServiceError> {
    user.require_admin()?;

    let order = state.services.orders.update_order(id, payload).await?;
    Ok(success_response(order))
}

/// Admin: delete an order
#[utoipa::path(
    delete,
    path = "/api/v1/orders/{id}",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 204, description = "Order deleted"),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
        (status = 404, description = "Order not found", body = ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn delete_order(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    user.require_admin()?;

    state.services.orders.delete_order(id).await?;
    Ok(no_content_response())
}
