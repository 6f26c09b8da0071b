use crate::{
    config::CheckoutConfig,
    entities::{cart, cart_item, product, user, user_address},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{
        CheckoutSessionRequest, GatewaySession, PaymentGateway, SessionLineItem, ShippingMetadata,
    },
    services::pricing,
};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Builds external checkout sessions for carts that pass all preconditions.
/// Nothing is persisted locally; the cart id rides along as the session's
/// client reference and comes back on the completion webhook.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    checkout: CheckoutConfig,
}

/// Buyer details for one checkout attempt.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub shipping_address: Option<ShippingAddressInput>,
}

/// Shipping address supplied inline with a checkout request. Every field is
/// required when the block is present; omitting the whole block falls back
/// to the user's oldest saved address.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddressInput {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub governorate: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub post_code: Option<String>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        checkout: CheckoutConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            checkout,
        }
    }

    /// Validates the checkout preconditions in order, then asks the gateway
    /// for a hosted session. No cart or inventory state changes here; if the
    /// gateway call fails the whole attempt simply fails.
    #[instrument(skip(self, request), fields(%user_id, %cart_id))]
    pub async fn create_checkout_session(
        &self,
        user_id: Uuid,
        cart_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<GatewaySession, ServiceError> {
        let cart = cart::Entity::find()
            .filter(cart::Column::Id.eq(cart_id))
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound("There is no cart for this user with this id".to_string())
            })?;

        let (first_name, last_name, phone) = validate_buyer_info(&request)?;

        let metadata = match request.shipping_address {
            Some(ref address) => {
                let (country, addr, governorate, city) = validate_shipping_address(address)?;
                ShippingMetadata {
                    first_name,
                    last_name,
                    phone,
                    country: Some(country),
                    address: Some(addr),
                    governorate: Some(governorate),
                    city: Some(city),
                }
            }
            None => {
                let saved = user_address::Entity::find()
                    .filter(user_address::Column::UserId.eq(user_id))
                    .order_by_asc(user_address::Column::CreatedAt)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::ValidationError(
                            "Please provide shipping address when creating an order, or in your profile"
                                .to_string(),
                        )
                    })?;
                ShippingMetadata {
                    first_name,
                    last_name,
                    phone,
                    country: Some(saved.country),
                    address: Some(saved.address),
                    governorate: Some(saved.governorate),
                    city: Some(saved.city),
                }
            }
        };

        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        if items.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }

        // Line items are priced from the catalog's current price and
        // discount, not from the cart snapshot. Stock is a hard precondition:
        // no session is created referencing unavailable quantity.
        let mut line_items = Vec::with_capacity(items.len());
        for item in &items {
            let product = product::Entity::find_by_id(item.product_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", item.product_id))
                })?;

            if item.quantity > product.quantity_on_hand {
                return Err(ServiceError::ValidationError(
                    "Not enough quantity in stock".to_string(),
                ));
            }

            line_items.push(SessionLineItem {
                name: product.title,
                unit_amount_minor: pricing::discounted_unit_minor(
                    product.price,
                    product.discount_percent,
                ),
                currency: self.checkout.currency.clone(),
                quantity: item.quantity,
            });
        }

        let buyer = user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))?;

        let base = self.checkout.public_base_url.trim_end_matches('/');
        let session = self
            .gateway
            .create_checkout_session(CheckoutSessionRequest {
                client_reference_id: cart.id,
                customer_email: buyer.email,
                line_items,
                shipping_fee_minor: self.checkout.shipping_fee_minor,
                currency: self.checkout.currency.clone(),
                metadata,
                success_url: format!("{}/api/v1/orders/redirect?status=success", base),
                cancel_url: format!("{}/api/v1/orders/redirect?status=cancel", base),
            })
            .await?;

        self.event_sender
            .send_or_log(Event::CheckoutStarted {
                cart_id: cart.id,
                session_id: session.id.clone(),
            })
            .await;

        info!(session_id = %session.id, "checkout session brokered");
        Ok(session)
    }
}

fn required<'a>(value: &'a Option<String>, message: &str) -> Result<&'a str, ServiceError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServiceError::ValidationError(message.to_string()))
}

fn validate_buyer_info(
    request: &CheckoutRequest,
) -> Result<(String, String, String), ServiceError> {
    let first_name = required(&request.first_name, "First name is required")?;
    let last_name = required(&request.last_name, "Last name is required")?;
    let phone = required(&request.phone, "Phone is required")?;
    Ok((
        first_name.to_string(),
        last_name.to_string(),
        phone.to_string(),
    ))
}

fn validate_shipping_address(
    address: &ShippingAddressInput,
) -> Result<(String, String, String, String), ServiceError> {
    let country = required(&address.country, "Country is required")?;
    let addr = required(&address.address, "Address is required")?;
    let governorate = required(&address.governorate, "Governorate is required")?;
    let city = required(&address.city, "City is required")?;
    // Post code is validated but deliberately not forwarded to the gateway
    // metadata; orders do not carry it.
    required(&address.post_code, "Post code is required")?;
    Ok((
        country.to_string(),
        addr.to_string(),
        governorate.to_string(),
        city.to_string(),
    ))
}
