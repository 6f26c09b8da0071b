use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Cartflow API",
        version = "1.0.0",
        description = "Checkout and fulfillment core: carts, coupons, hosted checkout sessions, payment webhooks, and order materialization."
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Carts", description = "Shopping cart management"),
        (name = "Orders", description = "Checkout sessions and order queries"),
        (name = "Webhooks", description = "Payment gateway callbacks")
    ),
    paths(
        crate::handlers::carts::add_to_cart,
        crate::handlers::carts::get_cart,
        crate::handlers::carts::update_item_quantity,
        crate::handlers::carts::remove_item,
        crate::handlers::carts::clear_cart,
        crate::handlers::carts::apply_coupon,
        crate::handlers::orders::create_checkout_session,
        crate::handlers::orders::redirect_after_checkout,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order,
        crate::handlers::orders::delete_order,
        crate::handlers::webhooks::receive_webhook
    ),
    components(
        schemas(
            crate::handlers::carts::AddItemRequest,
            crate::handlers::carts::UpdateItemRequest,
            crate::handlers::carts::ApplyCouponRequest,
            crate::services::checkout::CheckoutRequest,
            crate::services::checkout::ShippingAddressInput,
            crate::services::orders::UpdateOrderRequest,
            crate::gateway::ShippingMetadata,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_includes_all_api_surfaces() {
        let openapi = ApiDoc::openapi();
        let json = serde_json::to_string(&openapi).unwrap();
        assert!(json.contains("/api/v1/carts"));
        assert!(json.contains("/api/v1/orders"));
        assert!(json.contains("/api/v1/webhook"));
        assert!(json.contains("Bearer"));
    }
}
